use std::fmt;

use rust_decimal::Decimal;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::decimal;
use crate::usage::Dimension;

/// Price in USD per million units of one usage dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Rate {
    Flat(Decimal),
    Tiered(TieredPrices),
}

impl Rate {
    /// Rate applying to `total_units` of this dimension.
    pub fn rate_for(&self, total_units: u64) -> Decimal {
        match self {
            Self::Flat(price) => *price,
            Self::Tiered(tiered) => tiered.rate_for(total_units),
        }
    }

    pub fn is_free(&self) -> bool {
        match self {
            Self::Flat(price) => price.is_zero(),
            Self::Tiered(tiered) => {
                tiered.base.is_zero() && tiered.tiers.iter().all(|t| t.price.is_zero())
            }
        }
    }
}

impl From<Decimal> for Rate {
    fn from(price: Decimal) -> Self {
        Self::Flat(price)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Flat(price) => decimal::serialize(price, serializer),
            Self::Tiered(tiered) => tiered.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RateVisitor;

        impl<'de> Visitor<'de> for RateVisitor {
            type Value = Rate;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a price number or a {base, tiers} object")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Rate, E> {
                decimal::DecimalVisitor.visit_i64(v).map(Rate::Flat)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Rate, E> {
                decimal::DecimalVisitor.visit_u64(v).map(Rate::Flat)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Rate, E> {
                decimal::DecimalVisitor.visit_f64(v).map(Rate::Flat)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Rate, E> {
                decimal::DecimalVisitor.visit_str(v).map(Rate::Flat)
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Rate, A::Error> {
                TieredPrices::deserialize(de::value::MapAccessDeserializer::new(map)).map(Rate::Tiered)
            }
        }

        deserializer.deserialize_any(RateVisitor)
    }
}

/// Threshold pricing: once usage passes a tier's `start`, that tier's price
/// applies to every unit, not just the ones above the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TieredPrices {
    #[serde(with = "decimal")]
    pub base: Decimal,
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tier {
    pub start: u64,
    #[serde(with = "decimal")]
    pub price: Decimal,
}

impl TieredPrices {
    /// Price of the last tier whose `start` is strictly below `total_units`,
    /// or `base` if there is none. Usage exactly at a threshold stays on the
    /// lower tier.
    pub fn rate_for(&self, total_units: u64) -> Decimal {
        self.tiers
            .iter()
            .rev()
            .find(|tier| tier.start < total_units)
            .map_or(self.base, |tier| tier.price)
    }

    pub fn validate(&self) -> Result<(), String> {
        for w in self.tiers.windows(2) {
            if w[0].start >= w[1].start {
                return Err(format!(
                    "tiers must be strictly ascending by start, got {} then {}",
                    w[0].start, w[1].start
                ));
            }
        }
        Ok(())
    }
}

/// Prices for one model, one optional rate per usage dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPrice {
    /// USD per thousand requests.
    #[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
    pub requests_kcount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_audio_read_mtok: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_mtok: Option<Rate>,
}

impl ModelPrice {
    pub fn rate(&self, dim: Dimension) -> Option<&Rate> {
        match dim {
            Dimension::Input => self.input_mtok.as_ref(),
            Dimension::CacheWrite => self.cache_write_mtok.as_ref(),
            Dimension::CacheRead => self.cache_read_mtok.as_ref(),
            Dimension::Output => self.output_mtok.as_ref(),
            Dimension::InputAudio => self.input_audio_mtok.as_ref(),
            Dimension::CacheAudioRead => self.cache_audio_read_mtok.as_ref(),
            Dimension::OutputAudio => self.output_audio_mtok.as_ref(),
        }
    }

    /// True when every price is unset or zero.
    pub fn is_free(&self) -> bool {
        self.requests_kcount.map_or(true, |p| p.is_zero())
            && Dimension::ALL
                .iter()
                .all(|d| self.rate(*d).map_or(true, Rate::is_free))
    }

    pub fn validate(&self) -> Result<(), String> {
        for dim in Dimension::ALL {
            if let Some(Rate::Tiered(tiered)) = self.rate(dim) {
                tiered.validate()?;
            }
        }
        Ok(())
    }
}
