//! Interval-level price and generation records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MalformedInputError;
use crate::models::zone::BiddingZone;

/// Reporting resolution of an ENTSO-E time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    QuarterHour,
    Hour,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::QuarterHour => "PT15M",
            Resolution::Hour => "PT60M",
        }
    }

    /// Fraction of an hour one interval covers
    pub fn duration_hours(&self) -> f64 {
        match self {
            Resolution::QuarterHour => 0.25,
            Resolution::Hour => 1.0,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Resolution::QuarterHour => Duration::minutes(15),
            Resolution::Hour => Duration::minutes(60),
        }
    }
}

impl FromStr for Resolution {
    type Err = MalformedInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PT15M" => Ok(Resolution::QuarterHour),
            "PT60M" | "PT1H" => Ok(Resolution::Hour),
            other => Err(MalformedInputError::new(format!(
                "unrecognised resolution '{}'",
                other
            ))),
        }
    }
}

/// One normalized interval: the unit every aggregate is summed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub zone: BiddingZone,
    pub timestamp_start: DateTime<Utc>,
    /// 0.25 or 1.0
    pub duration_hours: f64,
    /// EUR/MWh, may be negative
    pub price: f64,
    pub solar_generation_mwh: f64,
}

/// One stored point of a raw series, as published: a day-ahead price in
/// EUR/MWh or an average solar output in MW over `[start, start + resolution)`.
///
/// Price and solar series are stored apart and joined into [`IntervalRecord`]s
/// on load, so each can arrive in its own import.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub zone: BiddingZone,
    pub timestamp_start: DateTime<Utc>,
    pub resolution: Resolution,
    pub value: f64,
}

impl SeriesPoint {
    pub fn timestamp_end(&self) -> DateTime<Utc> {
        self.timestamp_start + self.resolution.duration()
    }
}

/// Day-ahead price row as exported by the ENTSO-E transparency platform
#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceRecord {
    /// CSV line number, when the row came from a file
    pub line: Option<u64>,
    pub area: String,
    pub timestamp: String,
    pub resolution: String,
    pub contract_type: Option<String>,
    pub sequence: Option<String>,
    pub price: Option<String>,
}

/// Actual generation per production type row
#[derive(Debug, Clone, PartialEq)]
pub struct RawGenerationRecord {
    pub line: Option<u64>,
    pub area: String,
    pub timestamp: String,
    pub resolution: String,
    pub production_type: String,
    pub output_mw: Option<String>,
}
