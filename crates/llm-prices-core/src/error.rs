use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[cfg(feature = "network")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price data request failed (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid price data: {0}")]
    Validation(String),

    #[error("no provider with id {0:?}")]
    ProviderNotFound(String),

    #[error("no provider matching url {0:?}")]
    ProviderUrlNotFound(String),

    #[error("no model matching {model_ref:?} in provider {provider:?}")]
    ModelNotFound { model_ref: String, provider: String },

    #[error("no provider has a model matching {0:?}")]
    NoProviderForModel(String),

    #[error("price data refresh failed: {0}")]
    Refresh(Arc<PriceError>),

    #[error("cannot extract usage: {0}")]
    Extract(String),

    #[error("bad config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl PriceError {
    /// Whether this is one of the resolver's lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotFound(_)
                | Self::ProviderUrlNotFound(_)
                | Self::ModelNotFound { .. }
                | Self::NoProviderForModel(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PriceError>;
