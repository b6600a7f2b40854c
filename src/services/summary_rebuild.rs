//! Summary rebuild batch
//!
//! Recomputes every summary level of each zone from its interval records and
//! writes the rows in one batch per zone. Zones run concurrently, bounded by
//! a semaphore. One zone failing never affects another.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RebuildConfig;
use crate::error::StoreError;
use crate::models::zone::BiddingZone;
use crate::services::aggregator::aggregate_zone;
use crate::services::interval_repository::IntervalRepository;
use crate::services::summary_store::SummaryStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ZoneOutcome {
    Succeeded {
        zone: BiddingZone,
        intervals: usize,
        rows: usize,
    },
    Failed {
        zone: BiddingZone,
        error: String,
        attempts: u32,
    },
}

impl ZoneOutcome {
    pub fn zone(&self) -> BiddingZone {
        match self {
            ZoneOutcome::Succeeded { zone, .. } | ZoneOutcome::Failed { zone, .. } => *zone,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ZoneOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In zone order
    pub outcomes: Vec<ZoneOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn rows_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                ZoneOutcome::Succeeded { rows, .. } => *rows,
                ZoneOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    /// One line naming each failed zone, `None` when all succeeded
    pub fn failure_summary(&self) -> Option<String> {
        let failures: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ZoneOutcome::Failed { zone, error, .. } => Some(format!("{}: {}", zone, error)),
                ZoneOutcome::Succeeded { .. } => None,
            })
            .collect();
        (!failures.is_empty()).then(|| failures.join("; "))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or has
/// been tried `attempts` times. The delay doubles after every attempt.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, (StoreError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Storage unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

#[derive(Clone)]
pub struct SummaryRebuilder {
    intervals: Arc<dyn IntervalRepository>,
    store: Arc<dyn SummaryStore>,
    config: RebuildConfig,
    /// Held for a whole batch so two batches never write the same zone
    run_lock: Arc<Mutex<()>>,
}

impl SummaryRebuilder {
    pub fn new(
        intervals: Arc<dyn IntervalRepository>,
        store: Arc<dyn SummaryStore>,
        config: RebuildConfig,
    ) -> Self {
        Self {
            intervals,
            store,
            config,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &RebuildConfig {
        &self.config
    }

    /// Rebuilds every zone that has interval data
    pub async fn rebuild_all(&self, dry_run: bool) -> Result<BatchReport, StoreError> {
        let intervals = Arc::clone(&self.intervals);
        let zones = with_retry(self.config.retry_attempts, self.config.retry_base_delay, || {
            let intervals = Arc::clone(&intervals);
            async move { intervals.zones_with_data().await }
        })
        .await
        .map_err(|(e, _)| e)?;

        Ok(self.rebuild_zones(&zones, dry_run).await)
    }

    pub async fn rebuild_zones(&self, zones: &[BiddingZone], dry_run: bool) -> BatchReport {
        let _running = self.run_lock.lock().await;
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut zones = zones.to_vec();
        zones.sort();
        zones.dedup();

        info!(
            run_id = %run_id,
            zones = zones.len(),
            max_parallel = self.config.max_parallel_zones,
            dry_run,
            "Starting summary rebuild"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_zones.max(1)));
        let mut handles = Vec::with_capacity(zones.len());

        for zone in zones {
            let rebuilder = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return ZoneOutcome::Failed {
                            zone,
                            error: e.to_string(),
                            attempts: 0,
                        };
                    }
                };
                rebuilder.rebuild_zone(zone, dry_run).await
            });
            handles.push((zone, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (zone, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| ZoneOutcome::Failed {
                zone,
                error: format!("zone task aborted: {}", e),
                attempts: 0,
            });
            outcomes.push(outcome);
        }

        let report = BatchReport {
            run_id,
            dry_run,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            rows = report.rows_written(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Summary rebuild finished"
        );
        report
    }

    /// Load, aggregate and persist one zone
    pub async fn rebuild_zone(&self, zone: BiddingZone, dry_run: bool) -> ZoneOutcome {
        let (attempts, base) = (self.config.retry_attempts, self.config.retry_base_delay);

        let intervals = Arc::clone(&self.intervals);
        let records = match with_retry(attempts, base, || {
            let intervals = Arc::clone(&intervals);
            async move { intervals.load(zone, None).await }
        })
        .await
        {
            Ok(records) => records,
            Err((e, attempts)) => {
                error!(zone = %zone, attempts, error = %e, "Failed to load intervals");
                return ZoneOutcome::Failed {
                    zone,
                    error: e.to_string(),
                    attempts,
                };
            }
        };

        let aggregate = aggregate_zone(zone, &records);
        let rows = aggregate.rows(self.config.store_daily);

        if dry_run {
            info!(zone = %zone, intervals = records.len(), rows = rows.len(), "Dry run: not persisting");
            return ZoneOutcome::Succeeded {
                zone,
                intervals: records.len(),
                rows: rows.len(),
            };
        }

        let store = Arc::clone(&self.store);
        let rows = Arc::new(rows);
        let persisted = with_retry(attempts, base, || {
            let store = Arc::clone(&store);
            let rows = Arc::clone(&rows);
            async move { store.upsert_batch(&rows).await }
        })
        .await;

        match persisted {
            Ok(written) => {
                info!(zone = %zone, intervals = records.len(), rows = written, "Zone summaries rebuilt");
                ZoneOutcome::Succeeded {
                    zone,
                    intervals: records.len(),
                    rows: written,
                }
            }
            Err((e, attempts)) => {
                error!(zone = %zone, attempts, error = %e, "Failed to persist summaries");
                ZoneOutcome::Failed {
                    zone,
                    error: e.to_string(),
                    attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interval::{IntervalRecord, SeriesPoint};
    use crate::models::period::{Granularity, PeriodKey, PeriodRange};
    use crate::services::capture_metrics::SufficientStats;
    use crate::services::interval_repository::{seed, InMemoryIntervalRepository, TimeWindow};
    use crate::services::summary_store::{InMemorySummaryStore, SummaryRow};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(zone: BiddingZone, day: u32, price: f64, solar: f64) -> IntervalRecord {
        IntervalRecord {
            zone,
            timestamp_start: Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).unwrap(),
            duration_hours: 1.0,
            price,
            solar_generation_mwh: solar,
        }
    }

    fn fast_config() -> RebuildConfig {
        RebuildConfig {
            max_parallel_zones: 2,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            store_daily: false,
        }
    }

    async fn seeded() -> Arc<InMemoryIntervalRepository> {
        let repo = Arc::new(InMemoryIntervalRepository::new());
        seed(
            repo.as_ref(),
            &[
                record(BiddingZone::Fr, 1, 40.0, 10.0),
                record(BiddingZone::Fr, 2, -10.0, 20.0),
                record(BiddingZone::Es, 1, 30.0, 5.0),
                record(BiddingZone::Pt, 1, 35.0, 0.0),
            ],
        )
        .await;
        repo
    }

    #[tokio::test]
    async fn test_rebuild_all_writes_rows_per_zone() {
        let store = Arc::new(InMemorySummaryStore::new());
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        let report = rebuilder.rebuild_all(false).await.unwrap();
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 0);
        // monthly + yearly + total per zone
        assert_eq!(report.rows_written(), 9);
        assert_eq!(store.len(), 9);

        let zones: Vec<BiddingZone> = report.outcomes.iter().map(ZoneOutcome::zone).collect();
        assert_eq!(zones, vec![BiddingZone::Es, BiddingZone::Fr, BiddingZone::Pt]);

        let total = store.get_period(PeriodKey::total(BiddingZone::Fr)).await.unwrap().unwrap();
        assert_eq!(total.interval_count, 2);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let store = Arc::new(InMemorySummaryStore::new());
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        rebuilder.rebuild_all(false).await.unwrap();
        let first = store.snapshot();
        rebuilder.rebuild_all(false).await.unwrap();
        assert_eq!(*first, *store.snapshot());
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let store = Arc::new(InMemorySummaryStore::new());
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        let report = rebuilder.rebuild_all(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.rows_written(), 9);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_daily_adds_daily_rows() {
        let store = Arc::new(InMemorySummaryStore::new());
        let config = RebuildConfig {
            store_daily: true,
            ..fast_config()
        };
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), config);

        rebuilder.rebuild_zones(&[BiddingZone::Fr], false).await;
        let daily = store
            .scan_periods(Some(BiddingZone::Fr), Granularity::Daily, PeriodRange::all())
            .await
            .unwrap();
        assert_eq!(daily.len(), 2);
    }

    /// Fails the first `failures` upserts for one zone
    struct FlakyStore {
        inner: InMemorySummaryStore,
        zone: BiddingZone,
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummaryStore for FlakyStore {
        async fn upsert_period(&self, key: PeriodKey, stats: SufficientStats) -> Result<(), StoreError> {
            self.inner.upsert_period(key, stats).await
        }

        async fn upsert_batch(&self, rows: &[(PeriodKey, SufficientStats)]) -> Result<usize, StoreError> {
            if rows.first().is_some_and(|(k, _)| k.zone == self.zone) {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    return Err(if self.retryable {
                        StoreError::Unavailable("connection reset".into())
                    } else {
                        StoreError::Corrupt("bad row".into())
                    });
                }
            }
            self.inner.upsert_batch(rows).await
        }

        async fn get_period(&self, key: PeriodKey) -> Result<Option<SufficientStats>, StoreError> {
            self.inner.get_period(key).await
        }

        async fn scan_periods(
            &self,
            zone: Option<BiddingZone>,
            granularity: Granularity,
            range: PeriodRange,
        ) -> Result<Vec<SummaryRow>, StoreError> {
            self.inner.scan_periods(zone, granularity, range).await
        }

        async fn list_zones(&self) -> Result<Vec<BiddingZone>, StoreError> {
            self.inner.list_zones().await
        }
    }

    fn flaky(failures: u32, retryable: bool) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemorySummaryStore::new(),
            zone: BiddingZone::Fr,
            failures,
            retryable,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried() {
        let store = flaky(2, true);
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        let report = rebuilder.rebuild_all(false).await.unwrap();
        assert_eq!(report.failed(), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_zone_does_not_abort_batch() {
        let store = flaky(10, true);
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        let report = rebuilder.rebuild_all(false).await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            &report.outcomes[1],
            ZoneOutcome::Failed { zone: BiddingZone::Fr, attempts: 3, .. }
        ));
        assert!(report.failure_summary().unwrap().starts_with("FR:"));
        assert!(store.inner.get_period(PeriodKey::total(BiddingZone::Es)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_error_is_not_retried() {
        let store = flaky(1, false);
        let rebuilder = SummaryRebuilder::new(seeded().await, store.clone(), fast_config());

        let outcome = rebuilder.rebuild_zone(BiddingZone::Fr, false).await;
        assert!(matches!(outcome, ZoneOutcome::Failed { attempts: 1, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    struct DownRepository;

    #[async_trait]
    impl IntervalRepository for DownRepository {
        async fn append_prices(&self, _points: &[SeriesPoint]) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn append_solar(&self, _points: &[SeriesPoint]) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn load_prices(
            &self,
            _zone: BiddingZone,
            _window: Option<TimeWindow>,
        ) -> Result<Vec<SeriesPoint>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn load_solar(
            &self,
            _zone: BiddingZone,
            _window: Option<TimeWindow>,
        ) -> Result<Vec<SeriesPoint>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn zones_with_data(&self) -> Result<Vec<BiddingZone>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_repository_fails_batch_start() {
        let rebuilder = SummaryRebuilder::new(
            Arc::new(DownRepository),
            Arc::new(InMemorySummaryStore::new()),
            fast_config(),
        );
        assert!(rebuilder.rebuild_all(false).await.is_err());

        let report = rebuilder.rebuild_zones(&[BiddingZone::Hu], false).await;
        assert_eq!(report.failed(), 1);
    }
}
