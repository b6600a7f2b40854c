//! Capture Metric Calculator
//!
//! Every metric is a ratio of sums. The sums are carried as
//! [`SufficientStats`] so that any window can be re-aggregated by plain
//! addition; ratios are only derived when a [`MetricSet`] is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::models::interval::IntervalRecord;
use crate::models::zone::BiddingZone;

/// Summed quantities from which every metric is reconstructed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SufficientStats {
    pub interval_count: u64,
    /// Σ duration
    pub duration_hours: f64,
    /// Σ price × duration
    pub price_duration: f64,
    /// Σ duration where price < 0
    pub negative_price_hours: f64,
    /// Σ solar generation (MWh)
    pub solar_mwh: f64,
    /// Σ price × solar
    pub price_solar: f64,
    /// Σ max(price, 0) × solar
    pub floor_price_solar: f64,
    /// Σ solar where price < 0
    pub solar_at_negative_mwh: f64,
}

impl SufficientStats {
    pub fn from_record(record: &IntervalRecord) -> Self {
        let mut stats = Self::default();
        stats.accumulate(record);
        stats
    }

    pub fn accumulate(&mut self, record: &IntervalRecord) {
        let negative = record.price < 0.0;

        self.interval_count += 1;
        self.duration_hours += record.duration_hours;
        self.price_duration += record.price * record.duration_hours;
        if negative {
            self.negative_price_hours += record.duration_hours;
        }

        if record.solar_generation_mwh > 0.0 {
            let solar = record.solar_generation_mwh;
            self.solar_mwh += solar;
            self.price_solar += record.price * solar;
            self.floor_price_solar += record.price.max(0.0) * solar;
            if negative {
                self.solar_at_negative_mwh += solar;
            }
        }
    }

    pub fn merge(&mut self, other: &SufficientStats) {
        self.interval_count += other.interval_count;
        self.duration_hours += other.duration_hours;
        self.price_duration += other.price_duration;
        self.negative_price_hours += other.negative_price_hours;
        self.solar_mwh += other.solar_mwh;
        self.price_solar += other.price_solar;
        self.floor_price_solar += other.floor_price_solar;
        self.solar_at_negative_mwh += other.solar_at_negative_mwh;
    }

    pub fn is_empty(&self) -> bool {
        self.interval_count == 0
    }

    pub fn metrics(&self) -> MetricSet {
        MetricSet::from_stats(self)
    }
}

impl AddAssign<&SufficientStats> for SufficientStats {
    fn add_assign(&mut self, rhs: &SufficientStats) {
        self.merge(rhs);
    }
}

impl Add for SufficientStats {
    type Output = SufficientStats;

    fn add(mut self, rhs: SufficientStats) -> SufficientStats {
        self.merge(&rhs);
        self
    }
}

impl Sum for SufficientStats {
    fn sum<I: Iterator<Item = SufficientStats>>(iter: I) -> Self {
        iter.fold(SufficientStats::default(), Add::add)
    }
}

impl<'a> Sum<&'a SufficientStats> for SufficientStats {
    fn sum<I: Iterator<Item = &'a SufficientStats>>(iter: I) -> Self {
        iter.fold(SufficientStats::default(), |mut acc, s| {
            acc.merge(s);
            acc
        })
    }
}

impl<'a> FromIterator<&'a IntervalRecord> for SufficientStats {
    fn from_iter<I: IntoIterator<Item = &'a IntervalRecord>>(iter: I) -> Self {
        let mut stats = SufficientStats::default();
        for record in iter {
            stats.accumulate(record);
        }
        stats
    }
}

/// Derived metrics. `None` means "no data", which is never conflated with zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub negative_price_hours: Option<f64>,
    pub avg_price: Option<f64>,
    pub capture_price: Option<f64>,
    pub capture_price_floor0: Option<f64>,
    pub capture_rate_pct: Option<f64>,
    pub solar_at_negative_pct: Option<f64>,
}

impl MetricSet {
    pub fn from_stats(stats: &SufficientStats) -> Self {
        if stats.is_empty() {
            return MetricSet::default();
        }

        let avg_price = ratio(stats.price_duration, stats.duration_hours);
        let capture_price = ratio(stats.price_solar, stats.solar_mwh);
        let capture_price_floor0 = ratio(stats.floor_price_solar, stats.solar_mwh);
        let capture_rate_pct = match (capture_price, avg_price) {
            (Some(capture), Some(avg)) => ratio(capture, avg).map(|r| r * 100.0),
            _ => None,
        };
        let solar_at_negative_pct =
            ratio(stats.solar_at_negative_mwh, stats.solar_mwh).map(|r| r * 100.0);

        MetricSet {
            negative_price_hours: Some(stats.negative_price_hours),
            avg_price,
            capture_price,
            capture_price_floor0,
            capture_rate_pct,
            solar_at_negative_pct,
        }
    }

    /// True when no interval contributed at all
    pub fn is_no_data(&self) -> bool {
        self.negative_price_hours.is_none()
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// Metrics for one zone over the half-open window `start <= t < end`
pub fn calculate_window(
    records: &[IntervalRecord],
    zone: BiddingZone,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> MetricSet {
    records
        .iter()
        .filter(|r| r.zone == zone && r.timestamp_start >= start && r.timestamp_start < end)
        .collect::<SufficientStats>()
        .metrics()
}
