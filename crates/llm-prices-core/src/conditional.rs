use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::prices::ModelPrice;

/// Either one set of prices, or several alternatives chosen by request time.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPrices {
    Single(ModelPrice),
    Conditional(Vec<ConditionalPrice>),
}

impl ModelPrices {
    /// Prices in effect at `at`. `None` only for an empty conditional list,
    /// which validated data never contains.
    pub fn at(&self, at: DateTime<Utc>) -> Option<&ModelPrice> {
        match self {
            Self::Single(price) => Some(price),
            Self::Conditional(prices) => select(prices, at),
        }
    }

    pub fn is_free(&self) -> bool {
        match self {
            Self::Single(price) => price.is_free(),
            Self::Conditional(prices) => prices.iter().all(|c| c.prices.is_free()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Single(price) => price.validate(),
            Self::Conditional(prices) => {
                if prices.is_empty() {
                    return Err("conditional prices may not be empty".into());
                }
                let defaults = prices.iter().filter(|c| c.constraint.is_none()).count();
                if defaults != 1 {
                    return Err(format!(
                        "conditional prices need exactly one entry without a constraint, found {defaults}"
                    ));
                }
                prices.iter().try_for_each(|c| c.prices.validate())
            }
        }
    }
}

impl From<ModelPrice> for ModelPrices {
    fn from(price: ModelPrice) -> Self {
        Self::Single(price)
    }
}

/// Scan from last to first and return the first entry whose constraint holds;
/// falls back to the first entry.
pub fn select(prices: &[ConditionalPrice], at: DateTime<Utc>) -> Option<&ModelPrice> {
    prices
        .iter()
        .rev()
        .find(|c| c.constraint.as_ref().map_or(true, |con| con.is_active(at)))
        .or_else(|| prices.first())
        .map(|c| &c.prices)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionalPrice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    pub prices: ModelPrice,
}

/// Serialized with a `type` tag. The tag is optional when reading: an
/// untagged constraint is told apart by its `start_date` or
/// `start_time`/`end_time` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "RawConstraint")]
pub enum Constraint {
    /// Active from `start_date` onwards.
    StartDate {
        #[serde(with = "start_date")]
        start_date: DateTime<Utc>,
    },
    /// Active daily within `[start_time, end_time)`; wraps past midnight
    /// when `start_time` is later than `end_time`.
    TimeOfDate {
        start_time: TimeOfDay,
        end_time: TimeOfDay,
    },
}

impl Constraint {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        match self {
            Self::StartDate { start_date } => at >= *start_date,
            Self::TimeOfDate { start_time, end_time } => {
                let t = at.num_seconds_from_midnight();
                let (start, end) = (start_time.utc_seconds(), end_time.utc_seconds());
                if start <= end {
                    start <= t && t < end
                } else {
                    t >= start || t < end
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConstraintKind {
    StartDate,
    TimeOfDate,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConstraint {
    #[serde(rename = "type")]
    kind: Option<ConstraintKind>,
    #[serde(default, deserialize_with = "start_date::deserialize_option")]
    start_date: Option<DateTime<Utc>>,
    start_time: Option<TimeOfDay>,
    end_time: Option<TimeOfDay>,
}

impl TryFrom<RawConstraint> for Constraint {
    type Error = String;

    fn try_from(raw: RawConstraint) -> Result<Self, Self::Error> {
        let kind = match raw.kind {
            Some(kind) => kind,
            None if raw.start_date.is_some() => ConstraintKind::StartDate,
            None => ConstraintKind::TimeOfDate,
        };
        match kind {
            ConstraintKind::StartDate => match (raw.start_date, raw.start_time.is_some() || raw.end_time.is_some()) {
                (Some(start_date), false) => Ok(Self::StartDate { start_date }),
                (Some(_), true) => Err("start_date constraint does not take start_time or end_time".into()),
                (None, _) => Err("start_date constraint needs `start_date`".into()),
            },
            ConstraintKind::TimeOfDate => match (raw.start_time, raw.end_time, raw.start_date) {
                (_, _, Some(_)) => Err("time_of_date constraint does not take start_date".into()),
                (Some(start_time), Some(end_time), None) => Ok(Self::TimeOfDate { start_time, end_time }),
                _ => Err("time_of_date constraint needs `start_time` and `end_time`".into()),
            },
        }
    }
}

/// A wall-clock time with a UTC offset, e.g. `16:30:00Z` or `00:30:00+08:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

const SECS_PER_DAY: i64 = 86_400;

impl TimeOfDay {
    fn utc_seconds(&self) -> u32 {
        let local = i64::from(self.time.num_seconds_from_midnight());
        let shifted = (local - i64::from(self.offset.local_minus_utc())).rem_euclid(SECS_PER_DAY);
        shifted as u32
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (clock, offset) = if let Some(clock) = s.strip_suffix('Z') {
            (clock, 0)
        } else if let Some(pos) = s.rfind(['+', '-']) {
            (&s[..pos], parse_offset(&s[pos..])?)
        } else {
            (s, 0)
        };
        let time = NaiveTime::parse_from_str(clock, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(clock, "%H:%M"))
            .map_err(|e| format!("bad time {s:?}: {e}"))?;
        let offset = FixedOffset::east_opt(offset).ok_or_else(|| format!("bad offset in {s:?}"))?;
        Ok(Self { time, offset })
    }
}

fn parse_offset(s: &str) -> Result<i32, String> {
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let (h, m) = s[1..].split_once(':').unwrap_or((&s[1..], "0"));
    let h: i32 = h.parse().map_err(|_| format!("bad offset {s:?}"))?;
    let m: i32 = m.parse().map_err(|_| format!("bad offset {s:?}"))?;
    Ok(sign * (h * 3600 + m * 60))
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time.format("%H:%M:%S"))?;
        let secs = self.offset.local_minus_utc();
        if secs == 0 {
            f.write_str("Z")
        } else {
            let sign = if secs < 0 { '-' } else { '+' };
            let secs = secs.abs();
            write!(f, "{sign}{:02}:{:02}", secs / 3600, secs % 3600 / 60)
        }
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Accepts a bare date (midnight UTC), a naive date-time (UTC) or RFC 3339.
mod start_date {
    use super::*;

    pub(super) fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Ok(naive.and_utc());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("bad start_date {s:?}"))
    }

    pub(super) fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(de::Error::custom)
    }

    pub(super) fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse(&s).map_err(de::Error::custom))
            .transpose()
    }
}

impl Serialize for ModelPrices {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Single(price) => price.serialize(serializer),
            Self::Conditional(prices) => prices.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ModelPrices {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PricesVisitor;

        impl<'de> Visitor<'de> for PricesVisitor {
            type Value = ModelPrices;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a price object or a list of conditional prices")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<ModelPrices, A::Error> {
                ModelPrice::deserialize(de::value::MapAccessDeserializer::new(map)).map(ModelPrices::Single)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<ModelPrices, A::Error> {
                Vec::deserialize(de::value::SeqAccessDeserializer::new(seq)).map(ModelPrices::Conditional)
            }
        }

        deserializer.deserialize_any(PricesVisitor)
    }
}
