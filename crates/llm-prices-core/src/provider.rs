use serde::{Deserialize, Serialize};

use crate::conditional::ModelPrices;
use crate::error::{PriceError, Result};
use crate::extract::UsageExtractor;
use crate::matching::{Clause, Pattern};

/// An inference provider and the models it prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_urls: Option<Vec<String>>,
    /// Regex tested against the API URL a request was sent to.
    pub api_pattern: Pattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_comments: Option<String>,
    /// Other names this provider goes by, e.g. `gemini` for `google`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_match: Option<Clause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extractors: Vec<UsageExtractor>,
    /// Providers whose models this one also serves, searched in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_model_providers: Vec<String>,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "match")]
    pub match_logic: Clause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_comments: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    pub prices: ModelPrices,
}

impl ModelInfo {
    pub fn is_match(&self, model_ref: &str) -> bool {
        self.match_logic.is_match(model_ref)
    }

    pub fn is_free(&self) -> bool {
        self.prices.is_free()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Provider {
    pub fn find_model(&self, model_ref: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.is_match(model_ref))
    }

    pub(crate) fn find_model_index(&self, model_ref: &str) -> Option<usize> {
        self.models.iter().position(|m| m.is_match(model_ref))
    }

    /// Model ids unique and sorted, clauses well formed, prices consistent.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for w in self.models.windows(2) {
            if w[0].id == w[1].id {
                return Err(format!("duplicate model id `{}`", w[0].id));
            }
            if w[0].id > w[1].id {
                return Err(format!("models not sorted by id: `{}` must come before `{}`", w[1].id, w[0].id));
            }
        }
        if let Some(clause) = &self.provider_match {
            clause.validate().map_err(|e| format!("provider_match: {e}"))?;
        }
        for extractor in &self.extractors {
            extractor
                .validate()
                .map_err(|e| format!("extractor `{}`: {e}", extractor.api_flavor))?;
        }
        for model in &self.models {
            model
                .match_logic
                .validate()
                .and_then(|()| model.prices.validate())
                .map_err(|e| format!("model `{}`: {e}", model.id))?;
        }
        Ok(())
    }
}

/// Parse and validate a JSON provider list.
pub fn parse_providers(json: &str) -> Result<Vec<Provider>> {
    let providers: Vec<Provider> = serde_json::from_str(json)?;
    validate_providers(&providers)?;
    Ok(providers)
}

pub fn parse_providers_slice(json: &[u8]) -> Result<Vec<Provider>> {
    let providers: Vec<Provider> = serde_json::from_slice(json)?;
    validate_providers(&providers)?;
    Ok(providers)
}

pub fn validate_providers(providers: &[Provider]) -> Result<()> {
    for (i, provider) in providers.iter().enumerate() {
        if providers[..i].iter().any(|p| p.id == provider.id) {
            return Err(PriceError::Validation(format!("duplicate provider id `{}`", provider.id)));
        }
        provider
            .validate()
            .map_err(|e| PriceError::Validation(format!("provider `{}`: {e}", provider.id)))?;
    }
    Ok(())
}

/// Load the provider list shipped with the crate.
pub fn load_bundled_providers() -> Result<Vec<Provider>> {
    parse_providers(include_str!("../../../data/providers.json"))
}
