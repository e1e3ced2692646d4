pub mod calc;
pub mod conditional;
pub mod config;
mod decimal;
pub mod error;
pub mod extract;
pub mod matching;
pub mod prices;
pub mod provider;
pub mod snapshot;
pub mod usage;

#[cfg(feature = "network")]
pub mod cache;
#[cfg(feature = "network")]
pub mod source;
#[cfg(feature = "network")]
pub mod sync;

pub use calc::{calc_price, calc_price_at, PriceBreakdown, PriceCalculation, PriceModel};
pub use conditional::{ConditionalPrice, Constraint, ModelPrices, TimeOfDay};
pub use config::SourceConfig;
pub use error::{PriceError, Result};
pub use extract::{extract_usage, ArrayMatch, ExtractPath, ExtractStep, UsageExtractor, UsageMapping};
pub use matching::{Clause, Pattern};
pub use prices::{ModelPrice, Rate, Tier, TieredPrices};
pub use provider::{load_bundled_providers, parse_providers, ModelInfo, Provider};
pub use snapshot::{DataSnapshot, Provenance, ProviderSelector};
pub use usage::{Dimension, Usage};

#[cfg(feature = "network")]
pub use source::{AsyncSource, Freshness, SyncSource, Updater};
