//! Query service over the summary store
//!
//! Monthly, yearly and total figures come from precomputed rows. A total
//! restricted to a date range is the sum of the monthly rows inside it.
//! Daily drill-downs are computed from the interval records of one zone and
//! month (or from daily rows when those are stored) and cached for a short TTL.

use chrono::{Days, Months, NaiveDate, NaiveTime};
use moka::future::Cache;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QueryError, StoreError};
use crate::models::period::{Granularity, PeriodKey, PeriodRange, YearMonth};
use crate::models::zone::BiddingZone;
use crate::services::aggregator::daily_series;
use crate::services::capture_metrics::{MetricSet, SufficientStats};
use crate::services::interval_repository::{IntervalRepository, TimeWindow};
use crate::services::summary_store::{SummaryRow, SummaryStore};

const DRILLDOWN_CACHE_CAPACITY: u64 = 10_000;

/// Metrics of one zone over one period
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMetrics {
    pub key: PeriodKey,
    pub interval_count: u64,
    pub metrics: MetricSet,
}

impl PeriodMetrics {
    pub fn from_stats(key: PeriodKey, stats: &SufficientStats) -> Self {
        Self {
            key,
            interval_count: stats.interval_count,
            metrics: stats.metrics(),
        }
    }
}

impl From<&SummaryRow> for PeriodMetrics {
    fn from(row: &SummaryRow) -> Self {
        Self::from_stats(row.key, &row.stats)
    }
}

/// Statistics of several zones summed before the ratios are taken
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedMetrics {
    pub zones: Vec<BiddingZone>,
    pub interval_count: u64,
    pub metrics: MetricSet,
}

pub struct AnalyticsService {
    store: Arc<dyn SummaryStore>,
    intervals: Arc<dyn IntervalRepository>,
    /// Daily rows are in the store; otherwise computed from intervals
    daily_stored: bool,
    drilldown_cache: Arc<Cache<(BiddingZone, YearMonth), Arc<Vec<PeriodMetrics>>>>,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn SummaryStore>,
        intervals: Arc<dyn IntervalRepository>,
        daily_stored: bool,
        drilldown_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(DRILLDOWN_CACHE_CAPACITY)
            .time_to_live(drilldown_ttl)
            .build();

        Self {
            store,
            intervals,
            daily_stored,
            drilldown_cache: Arc::new(cache),
        }
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }

    /// Zones with summaries, in identifier order
    pub async fn get_zones(&self) -> Result<Vec<BiddingZone>, StoreError> {
        self.store.list_zones().await
    }

    /// One row per (zone, period), ordered by zone then period start.
    /// `zone = None` returns rows for every zone.
    pub async fn get_aggregate(
        &self,
        zone: Option<BiddingZone>,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<Vec<PeriodMetrics>, QueryError> {
        match granularity {
            Granularity::Daily if !self.daily_stored => {
                let (zone, range) = bounded_daily_query(zone, range)?;
                Ok(self.daily_from_intervals(zone, range).await?)
            }
            Granularity::Total if range.is_bounded() => {
                let totals = self.ranged_totals(zone, range).await?;
                Ok(totals
                    .iter()
                    .map(|(zone, stats)| PeriodMetrics::from_stats(PeriodKey::total(*zone), stats))
                    .collect())
            }
            _ => {
                let rows = self.store.scan_periods(zone, granularity, range).await?;
                Ok(rows.iter().map(PeriodMetrics::from).collect())
            }
        }
    }

    /// All zones summed into one figure per granularity window
    pub async fn get_combined(
        &self,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<CombinedMetrics, QueryError> {
        let per_zone: Vec<(BiddingZone, SufficientStats)> = match granularity {
            Granularity::Daily if !self.daily_stored => {
                return Err(QueryError::Unbounded(
                    "combined daily figures need stored daily rows; query one zone instead"
                        .to_string(),
                ));
            }
            Granularity::Total if range.is_bounded() => {
                self.ranged_totals(None, range).await?.into_iter().collect()
            }
            _ => self
                .store
                .scan_periods(None, granularity, range)
                .await?
                .into_iter()
                .map(|row| (row.key.zone, row.stats))
                .collect(),
        };

        let zones: BTreeSet<BiddingZone> = per_zone.iter().map(|(zone, _)| *zone).collect();
        let stats: SufficientStats = per_zone.iter().map(|(_, stats)| stats).sum();
        Ok(CombinedMetrics {
            zones: zones.into_iter().collect(),
            interval_count: stats.interval_count,
            metrics: stats.metrics(),
        })
    }

    /// Statistics per zone summed over the monthly rows whose month starts
    /// inside `range`
    async fn ranged_totals(
        &self,
        zone: Option<BiddingZone>,
        range: PeriodRange,
    ) -> Result<BTreeMap<BiddingZone, SufficientStats>, StoreError> {
        let rows = self.store.scan_periods(zone, Granularity::Monthly, range).await?;
        let mut totals: BTreeMap<BiddingZone, SufficientStats> = BTreeMap::new();
        for row in &rows {
            *totals.entry(row.key.zone).or_default() += &row.stats;
        }
        Ok(totals)
    }

    /// Ordered daily metrics for one zone and month. Days without intervals
    /// are absent.
    pub async fn get_daily_drilldown(
        &self,
        zone: BiddingZone,
        month: YearMonth,
    ) -> Result<Arc<Vec<PeriodMetrics>>, StoreError> {
        let cache_key = (zone, month);
        if let Some(cached) = self.drilldown_cache.get(&cache_key).await {
            tracing::debug!(zone = %zone, month = %month, "Drill-down cache hit");
            return Ok(cached);
        }

        let days: Vec<PeriodMetrics> = if self.daily_stored {
            let last_day = month.next().first_day().pred_opt().unwrap_or(month.first_day());
            let range = PeriodRange::between(month.first_day(), last_day);
            self.store
                .scan_periods(Some(zone), Granularity::Daily, range)
                .await?
                .iter()
                .map(PeriodMetrics::from)
                .collect()
        } else {
            let records = self.intervals.load(zone, Some(month.window())).await?;
            daily_series(zone, &records)
                .iter()
                .map(|(day, stats)| {
                    PeriodMetrics::from_stats(PeriodKey::new(zone, Granularity::Daily, *day), stats)
                })
                .collect()
        };

        let days = Arc::new(days);
        tracing::debug!(zone = %zone, month = %month, days = days.len(), "Computed drill-down");
        self.drilldown_cache.insert(cache_key, Arc::clone(&days)).await;
        Ok(days)
    }

    /// Drops cached drill-downs; called after summaries are rebuilt
    pub async fn invalidate_drilldowns(&self) {
        self.drilldown_cache.invalidate_all();
        self.drilldown_cache.run_pending_tasks().await;
        tracing::info!("Drill-down cache invalidated");
    }

    async fn daily_from_intervals(
        &self,
        zone: BiddingZone,
        range: PeriodRange,
    ) -> Result<Vec<PeriodMetrics>, StoreError> {
        let records = self.intervals.load(zone, range_window(range)).await?;
        Ok(daily_series(zone, &records)
            .iter()
            .filter(|(day, _)| range.contains(**day))
            .map(|(day, stats)| {
                PeriodMetrics::from_stats(PeriodKey::new(zone, Granularity::Daily, *day), stats)
            })
            .collect())
    }
}

/// Daily figures without stored daily rows are computed from raw intervals,
/// so they are limited to one zone and a range within one month
fn bounded_daily_query(
    zone: Option<BiddingZone>,
    range: PeriodRange,
) -> Result<(BiddingZone, PeriodRange), QueryError> {
    let (Some(zone), Some(from), Some(to)) = (zone, range.from, range.to) else {
        return Err(QueryError::Unbounded(
            "daily figures need 'zone', 'from' and 'to' (at most one month apart)".to_string(),
        ));
    };
    let limit = from.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX);
    if to >= limit {
        return Err(QueryError::Unbounded(format!(
            "daily range {}..{} is longer than one month",
            from, to
        )));
    }
    Ok((zone, range))
}

/// Timestamp window covering whole UTC days of an inclusive date range
fn range_window(range: PeriodRange) -> Option<TimeWindow> {
    if range.from.is_none() && range.to.is_none() {
        return None;
    }
    // Open ends are clamped to dates every SQL backend can represent
    let from = range.from.or(NaiveDate::from_ymd_opt(1900, 1, 1))?;
    let to = range.to.or(NaiveDate::from_ymd_opt(9999, 12, 30))?;
    let to_utc = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc();
    Some((to_utc(from), to_utc(to.checked_add_days(Days::new(1))?)))
}
