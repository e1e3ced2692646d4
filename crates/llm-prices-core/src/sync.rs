use crate::cache;
use crate::config::SourceConfig;
use crate::error::{PriceError, Result};
use crate::source::{build_client, fetch_providers};

pub struct SyncResult {
    pub provider_count: usize,
    pub model_count: usize,
    pub path: std::path::PathBuf,
}

/// Download the provider list, validate it, and write it to the cache
/// directory where `DataSnapshot::local` will pick it up.
pub async fn sync_data(config: &SourceConfig) -> Result<SyncResult> {
    let client = build_client(config)?;
    let path = cache::providers_path().ok_or_else(|| PriceError::Io("cannot determine cache directory".into()))?;

    // Validate by parsing before writing.
    let providers = fetch_providers(&client, &config.url).await?;
    let json = serde_json::to_string(&providers)?;

    std::fs::write(&path, json).map_err(|e| PriceError::Io(format!("failed to write {}: {e}", path.display())))?;

    Ok(SyncResult {
        provider_count: providers.len(),
        model_count: providers.iter().map(|p| p.models.len()).sum(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Integration test: actually downloads from GitHub and validates.
    /// Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn sync_downloads_and_validates() {
        let result = sync_data(&SourceConfig::default()).await.expect("sync should succeed");
        assert!(result.provider_count >= 10, "expected >=10 providers, got {}", result.provider_count);
        assert!(result.path.exists(), "providers.json not cached");
        assert!(cache::load_cached_providers().is_some());
    }
}
