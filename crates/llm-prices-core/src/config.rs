use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PriceError, Result};

pub const DEFAULT_URL: &str = "https://raw.githubusercontent.com/pydantic/genai-prices/main/prices/data.json";

/// Environment variable that overrides the configured data URL.
pub const URL_ENV: &str = "LLM_PRICES_URL";

/// Where and how often an auto-updating source refreshes its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub url: String,
    /// Older than this, data is not served without a successful refresh.
    pub max_age: Duration,
    /// Older than this, data is served but refreshed in the background.
    pub fetch_age: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            max_age: Duration::from_secs(60 * 60),
            fetch_age: Duration::from_secs(30 * 60),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    url: Option<String>,
    max_age_secs: Option<u64>,
    fetch_age_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl SourceConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Parse TOML; keys left out keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| PriceError::Config(e.to_string()))?;
        let defaults = Self::default();
        let secs = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_secs);
        let config = Self {
            url: file.url.unwrap_or(defaults.url),
            max_age: secs(file.max_age_secs, defaults.max_age),
            fetch_age: secs(file.fetch_age_secs, defaults.fetch_age),
            connect_timeout: secs(file.connect_timeout_secs, defaults.connect_timeout),
            request_timeout: secs(file.request_timeout_secs, defaults.request_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PriceError::Io(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// `<config dir>/llm-prices/config.toml` if it exists, else the defaults.
    /// Environment overrides are applied either way.
    #[cfg(feature = "network")]
    pub fn discover() -> Result<Self> {
        let path = dirs::config_dir().map(|d| d.join("llm-prices").join("config.toml"));
        let config = match path {
            Some(p) if p.exists() => Self::load(&p)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV) {
            if !url.trim().is_empty() {
                self.url = url.trim().to_owned();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(PriceError::Config("url must not be empty".into()));
        }
        if self.fetch_age > self.max_age {
            return Err(PriceError::Config(format!(
                "fetch_age ({}s) must not exceed max_age ({}s)",
                self.fetch_age.as_secs(),
                self.max_age.as_secs()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(SourceConfig::from_toml_str("").unwrap(), SourceConfig::default());
    }

    #[test]
    fn keys_override_defaults() {
        let c = SourceConfig::from_toml_str(
            r#"
url = "http://localhost:8080/data.json"
max_age_secs = 600
fetch_age_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(c.url, "http://localhost:8080/data.json");
        assert_eq!(c.max_age, Duration::from_secs(600));
        assert_eq!(c.fetch_age, Duration::from_secs(60));
        assert_eq!(c.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn fetch_age_cannot_exceed_max_age() {
        let err = SourceConfig::from_toml_str("max_age_secs = 10\nfetch_age_secs = 20").unwrap_err();
        assert!(matches!(err, PriceError::Config(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(SourceConfig::from_toml_str("max_age = 10").is_err());
    }
}
