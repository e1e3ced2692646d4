use std::path::PathBuf;

use tracing::debug;

use crate::provider::{parse_providers, Provider};

const PROVIDERS_FILE: &str = "providers.json";

/// Return the cache directory for llm-prices data files.
/// Creates it if it doesn't exist.
pub fn cache_dir() -> Option<PathBuf> {
    let dir = dirs::cache_dir()?.join("llm-prices");
    if !dir.exists() {
        std::fs::create_dir_all(&dir).ok()?;
    }
    Some(dir)
}

/// Return the path to a cached data file, if the cache directory is available.
pub fn cache_path(filename: &str) -> Option<PathBuf> {
    Some(cache_dir()?.join(filename))
}

pub fn providers_path() -> Option<PathBuf> {
    cache_path(PROVIDERS_FILE)
}

/// Providers saved by the last `sync_data`, if any and still valid.
pub fn load_cached_providers() -> Option<Vec<Provider>> {
    let path = providers_path()?;
    let text = std::fs::read_to_string(&path).ok()?;
    match parse_providers(&text) {
        Ok(providers) => Some(providers),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable cached price data");
            None
        }
    }
}
