use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::period::Granularity;
use crate::services::analytics::{CombinedMetrics, PeriodMetrics};
use crate::services::capture_metrics::MetricSet;
use crate::services::numeric::round2;

/// Metric values as served, rounded to 2 decimals. `null` means undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDto {
    pub neg_hours: Option<f64>,
    pub avg_market_price: Option<f64>,
    pub capture_price: Option<f64>,
    pub capture_price_floor0: Option<f64>,
    pub capture_rate: Option<f64>,
    pub solar_at_neg_price_pct: Option<f64>,
}

impl From<&MetricSet> for MetricsDto {
    fn from(m: &MetricSet) -> Self {
        Self {
            neg_hours: round2(m.negative_price_hours),
            avg_market_price: round2(m.avg_price),
            capture_price: round2(m.capture_price),
            capture_price_floor0: round2(m.capture_price_floor0),
            capture_rate: round2(m.capture_rate_pct),
            solar_at_neg_price_pct: round2(m.solar_at_negative_pct),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodMetricsDto {
    pub zone: String,
    pub granularity: Granularity,
    pub period_start: NaiveDate,
    /// "2025", "2025-06", "2025-06-01" or "total"
    pub period: String,
    pub interval_count: u64,
    #[serde(flatten)]
    pub metrics: MetricsDto,
}

impl From<&PeriodMetrics> for PeriodMetricsDto {
    fn from(p: &PeriodMetrics) -> Self {
        let start = p.key.period_start;
        let period = match p.key.granularity {
            Granularity::Daily => start.format("%Y-%m-%d").to_string(),
            Granularity::Monthly => start.format("%Y-%m").to_string(),
            Granularity::Yearly => start.format("%Y").to_string(),
            Granularity::Total => "total".to_string(),
        };
        Self {
            zone: p.key.zone.to_string(),
            granularity: p.key.granularity,
            period_start: start,
            period,
            interval_count: p.interval_count,
            metrics: MetricsDto::from(&p.metrics),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonesResponse {
    pub zones: Vec<String>,
    pub count: usize,
}

/// `{"data": [...]}` wrapper of the summary endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryListResponse {
    pub data: Vec<PeriodMetricsDto>,
}

impl SummaryListResponse {
    pub fn from_rows(rows: &[PeriodMetrics]) -> Self {
        Self {
            data: rows.iter().map(PeriodMetricsDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedResponse {
    pub zones: Vec<String>,
    pub interval_count: u64,
    #[serde(flatten)]
    pub metrics: MetricsDto,
}

impl From<&CombinedMetrics> for CombinedResponse {
    fn from(c: &CombinedMetrics) -> Self {
        Self {
            zones: c.zones.iter().map(|z| z.to_string()).collect(),
            interval_count: c.interval_count,
            metrics: MetricsDto::from(&c.metrics),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyDrilldownResponse {
    pub zone: String,
    pub month: String,
    pub data: Vec<PeriodMetricsDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub zone: Option<String>,
    pub granularity: Granularity,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub data: Vec<PeriodMetricsDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code, e.g. "unknown_zone"
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::period::PeriodKey;
    use crate::models::zone::BiddingZone;

    #[test]
    fn test_undefined_metrics_serialize_as_null() {
        let dto = MetricsDto::from(&MetricSet {
            negative_price_hours: Some(0.0),
            avg_price: Some(14.333333),
            ..Default::default()
        });
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["neg_hours"], 0.0);
        assert_eq!(json["avg_market_price"], 14.33);
        assert!(json["capture_price"].is_null());
        assert!(json["capture_rate"].is_null());
    }

    #[test]
    fn test_period_labels() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let monthly = PeriodMetricsDto::from(&PeriodMetrics {
            key: PeriodKey::new(BiddingZone::DeLu, Granularity::Monthly, date),
            interval_count: 1,
            metrics: MetricSet::default(),
        });
        assert_eq!(monthly.period, "2025-06");
        assert_eq!(monthly.zone, "DE-LU");

        let json = serde_json::to_value(&monthly).unwrap();
        assert_eq!(json["granularity"], "monthly");
        assert!(json["neg_hours"].is_null());
    }
}
