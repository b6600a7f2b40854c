use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use energy_market_backend::config::RebuildConfig;
use energy_market_backend::models::interval::{IntervalRecord, Resolution, SeriesPoint};
use energy_market_backend::models::zone::BiddingZone;
use energy_market_backend::services::analytics::AnalyticsService;
use energy_market_backend::services::interval_repository::{InMemoryIntervalRepository, IntervalRepository};
use energy_market_backend::services::summary_rebuild::SummaryRebuilder;
use energy_market_backend::services::summary_store::InMemorySummaryStore;
use energy_market_backend::AppState;

pub fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, m, d, h, 0, 0).unwrap()
}

pub fn record(zone: BiddingZone, ts: DateTime<Utc>, price: f64, solar: f64) -> IntervalRecord {
    IntervalRecord {
        zone,
        timestamp_start: ts,
        duration_hours: 1.0,
        price,
        solar_generation_mwh: solar,
    }
}

/// DE-LU day with two negative hours plus single days for FR and ES
pub fn sample_records() -> Vec<IntervalRecord> {
    vec![
        record(BiddingZone::DeLu, at(6, 1, 10), 60.0, 4.0),
        record(BiddingZone::DeLu, at(6, 1, 11), -5.0, 8.0),
        record(BiddingZone::DeLu, at(6, 1, 12), -12.0, 3.0),
        record(BiddingZone::DeLu, at(6, 2, 12), 40.0, 10.0),
        record(BiddingZone::DeLu, at(7, 1, 12), 50.0, 5.0),
        record(BiddingZone::Fr, at(6, 1, 12), 30.0, 0.0),
        record(BiddingZone::Es, at(6, 1, 12), 20.0, 6.0),
    ]
}

/// Stores hourly fixtures as a price point and a solar point each
pub async fn seed(repo: &dyn IntervalRepository, records: &[IntervalRecord]) {
    let point = |r: &IntervalRecord, value: f64| SeriesPoint {
        zone: r.zone,
        timestamp_start: r.timestamp_start,
        resolution: Resolution::Hour,
        value,
    };
    let prices: Vec<SeriesPoint> = records.iter().map(|r| point(r, r.price)).collect();
    let solar: Vec<SeriesPoint> = records
        .iter()
        .map(|r| point(r, r.solar_generation_mwh))
        .collect();
    repo.append_prices(&prices).await.unwrap();
    repo.append_solar(&solar).await.unwrap();
}

pub struct TestApp {
    pub state: AppState,
    pub intervals: Arc<InMemoryIntervalRepository>,
    pub store: Arc<InMemorySummaryStore>,
}

/// In-memory state seeded with `records`, summaries rebuilt unless `rebuild` is false
pub async fn test_app(records: &[IntervalRecord], rebuild: bool) -> TestApp {
    let intervals = Arc::new(InMemoryIntervalRepository::new());
    seed(intervals.as_ref(), records).await;
    let store = Arc::new(InMemorySummaryStore::new());

    let config = RebuildConfig {
        retry_base_delay: Duration::from_millis(1),
        ..RebuildConfig::default()
    };
    let state = AppState {
        analytics: Arc::new(AnalyticsService::new(
            store.clone(),
            intervals.clone(),
            false,
            Duration::from_secs(300),
        )),
        rebuilder: Arc::new(SummaryRebuilder::new(intervals.clone(), store.clone(), config)),
    };
    if rebuild {
        state.run_rebuild(None, false).await.unwrap();
    }

    TestApp {
        state,
        intervals,
        store,
    }
}
