use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::conditional::ModelPrices;
use crate::prices::ModelPrice;
use crate::provider::{ModelInfo, Provider};
use crate::usage::{Dimension, Usage};

const MTOK: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const KREQ: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);

/// Cost of one call, split by input and output. Always `total = input + output`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub input_price: Decimal,
    pub output_price: Decimal,
    pub total_price: Decimal,
}

impl PriceBreakdown {
    pub fn new(input_price: Decimal, output_price: Decimal) -> Self {
        Self { input_price, output_price, total_price: input_price + output_price }
    }
}

/// Anything that can turn usage into a cost. `ModelPrice` is the dataset's
/// implementation; callers can wrap it to add their own fees.
pub trait PriceModel {
    fn calc(&self, usage: &Usage) -> PriceBreakdown;
}

impl PriceModel for ModelPrice {
    fn calc(&self, usage: &Usage) -> PriceBreakdown {
        let mut input = Decimal::ZERO;
        let mut output = Decimal::ZERO;
        for dim in Dimension::ALL {
            let (Some(count), Some(rate)) = (usage.get(dim), self.rate(dim)) else {
                continue;
            };
            // Each dimension picks its tier from its own count.
            let cost = Decimal::from(count) * rate.rate_for(count) / MTOK;
            if dim.is_output() {
                output += cost;
            } else {
                input += cost;
            }
        }
        if let Some(per_k) = self.requests_kcount {
            input += per_k * Decimal::from(usage.request_count()) / KREQ;
        }
        PriceBreakdown::new(input, output)
    }
}

pub fn calc_price<P: PriceModel + ?Sized>(usage: &Usage, model: &P) -> PriceBreakdown {
    model.calc(usage)
}

/// Price `usage` against a model's prices as they stood at `at`. `None` only
/// for an empty conditional list.
pub fn calc_price_at(usage: &Usage, prices: &ModelPrices, at: DateTime<Utc>) -> Option<PriceBreakdown> {
    prices.at(at).map(|price| price.calc(usage))
}

/// Result of pricing one call against a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PriceCalculation<'a> {
    pub provider: &'a Provider,
    pub model: &'a ModelInfo,
    pub model_price: &'a ModelPrice,
    pub input_price: Decimal,
    pub output_price: Decimal,
    pub total_price: Decimal,
    /// When the snapshot was fetched; `None` for the bundled data.
    pub auto_update_timestamp: Option<DateTime<Utc>>,
}

impl PriceCalculation<'_> {
    pub fn breakdown(&self) -> PriceBreakdown {
        PriceBreakdown {
            input_price: self.input_price,
            output_price: self.output_price,
            total_price: self.total_price,
        }
    }
}
