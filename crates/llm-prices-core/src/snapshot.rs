use std::fmt;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::calc::{calc_price, PriceCalculation};
use crate::error::{PriceError, Result};
use crate::provider::{load_bundled_providers, ModelInfo, Provider};
use crate::usage::Usage;

/// Where a snapshot's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Bundled,
    Fetched,
}

/// Narrows a lookup to one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderSelector {
    /// A provider id or one of its aliases.
    Id(String),
    /// The URL the request was sent to.
    ApiUrl(String),
}

impl ProviderSelector {
    pub fn id(id: &str) -> Self {
        Self::Id(id.trim().to_lowercase())
    }

    pub fn api_url(url: &str) -> Self {
        Self::ApiUrl(url.to_owned())
    }
}

type LookupKey = (Option<ProviderSelector>, String);

/// Immutable provider data plus a memo of past lookups.
///
/// The memo stores `(provider, model)` indices so hits hand back plain
/// references into `providers`.
pub struct DataSnapshot {
    providers: Vec<Provider>,
    created_at: DateTime<Utc>,
    provenance: Provenance,
    lookups: DashMap<LookupKey, (usize, usize)>,
}

impl fmt::Debug for DataSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSnapshot")
            .field("providers", &self.providers.len())
            .field("created_at", &self.created_at)
            .field("provenance", &self.provenance)
            .field("cached_lookups", &self.lookups.len())
            .finish()
    }
}

impl DataSnapshot {
    pub fn new(providers: Vec<Provider>, provenance: Provenance, created_at: DateTime<Utc>) -> Self {
        Self {
            providers,
            created_at,
            provenance,
            lookups: DashMap::new(),
        }
    }

    /// The data compiled into the crate.
    pub fn bundled() -> Result<Self> {
        Ok(Self::new(load_bundled_providers()?, Provenance::Bundled, Utc::now()))
    }

    /// The data saved by the last `sync_data` if it is still readable,
    /// else the bundled data.
    #[cfg(feature = "network")]
    pub fn local() -> Result<Self> {
        match crate::cache::load_cached_providers() {
            Some(providers) => Ok(Self::new(providers, Provenance::Bundled, Utc::now())),
            None => Self::bundled(),
        }
    }

    pub fn fetched(providers: Vec<Provider>) -> Self {
        Self::new(providers, Provenance::Fetched, Utc::now())
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn cached_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// The provider a selector names: by id, then alias, or by API URL.
    pub fn provider_by(&self, selector: &ProviderSelector) -> Result<&Provider> {
        self.select_provider(selector).map(|p| &self.providers[p])
    }

    /// Resolve a model reference to the provider and model that price it.
    pub fn find(&self, model_ref: &str, selector: Option<&ProviderSelector>) -> Result<(&Provider, &ModelInfo)> {
        let model_ref = model_ref.trim();
        let key = (selector.cloned(), model_ref.to_owned());
        if let Some(hit) = self.lookups.get(&key) {
            let (p, m) = *hit;
            return Ok(self.at(p, m));
        }

        let (p, m) = self.resolve(model_ref, selector)?;
        debug!(
            model_ref,
            provider = %self.providers[p].id,
            model = %self.providers[p].models[m].id,
            "resolved model"
        );
        self.lookups.insert(key, (p, m));
        Ok(self.at(p, m))
    }

    /// Price one call. `at` picks among time-dependent prices and defaults
    /// to now.
    pub fn calc(
        &self,
        usage: &Usage,
        model_ref: &str,
        selector: Option<&ProviderSelector>,
        at: Option<DateTime<Utc>>,
    ) -> Result<PriceCalculation<'_>> {
        let (provider, model) = self.find(model_ref, selector)?;
        let at = at.unwrap_or_else(Utc::now);
        let model_price = model
            .prices
            .at(at)
            .ok_or_else(|| PriceError::Validation(format!("model `{}` has no prices", model.id)))?;
        let breakdown = calc_price(usage, model_price);
        Ok(PriceCalculation {
            provider,
            model,
            model_price,
            input_price: breakdown.input_price,
            output_price: breakdown.output_price,
            total_price: breakdown.total_price,
            auto_update_timestamp: (self.provenance == Provenance::Fetched).then_some(self.created_at),
        })
    }

    fn at(&self, p: usize, m: usize) -> (&Provider, &ModelInfo) {
        let provider = &self.providers[p];
        (provider, &provider.models[m])
    }

    fn resolve(&self, model_ref: &str, selector: Option<&ProviderSelector>) -> Result<(usize, usize)> {
        let Some(selector) = selector else {
            return self
                .providers
                .iter()
                .enumerate()
                .find_map(|(p, provider)| provider.find_model_index(model_ref).map(|m| (p, m)))
                .ok_or_else(|| PriceError::NoProviderForModel(model_ref.to_owned()));
        };

        let p = self.select_provider(selector)?;
        let provider = &self.providers[p];
        if let Some(m) = provider.find_model_index(model_ref) {
            return Ok((p, m));
        }
        // One level only: a fallback's own fallbacks are not followed.
        for fallback in &provider.fallback_model_providers {
            let Some(fp) = self.providers.iter().position(|c| &c.id == fallback) else {
                continue;
            };
            if let Some(m) = self.providers[fp].find_model_index(model_ref) {
                return Ok((fp, m));
            }
        }
        Err(PriceError::ModelNotFound {
            model_ref: model_ref.to_owned(),
            provider: provider.id.clone(),
        })
    }

    fn select_provider(&self, selector: &ProviderSelector) -> Result<usize> {
        match selector {
            ProviderSelector::Id(id) => {
                let id = id.trim().to_lowercase();
                self.providers
                    .iter()
                    .position(|p| p.id == id)
                    .or_else(|| {
                        self.providers
                            .iter()
                            .position(|p| p.provider_match.as_ref().is_some_and(|c| c.is_match(&id)))
                    })
                    .ok_or(PriceError::ProviderNotFound(id))
            }
            ProviderSelector::ApiUrl(url) => self
                .providers
                .iter()
                .position(|p| p.api_pattern.is_match(url))
                .ok_or_else(|| PriceError::ProviderUrlNotFound(url.clone())),
        }
    }
}
