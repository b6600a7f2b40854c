//! Summary Store
//!
//! Precomputed [`SufficientStats`] keyed by [`PeriodKey`]. Every upsert
//! replaces a whole row, so rebuilding twice leaves the same contents.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::entities::{period_summaries, prelude::PeriodSummaries};
use crate::error::StoreError;
use crate::models::period::{Granularity, PeriodKey, PeriodRange};
use crate::models::zone::BiddingZone;
use crate::services::capture_metrics::{MetricSet, SufficientStats};
use crate::services::numeric::{to_decimal, to_f64};

/// Rows per INSERT statement
const UPSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryRow {
    pub key: PeriodKey,
    pub stats: SufficientStats,
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Replace the statistics of one period
    async fn upsert_period(&self, key: PeriodKey, stats: SufficientStats) -> Result<(), StoreError>;

    /// Replace many rows in one commit. Readers see all of them or none.
    async fn upsert_batch(&self, rows: &[(PeriodKey, SufficientStats)]) -> Result<usize, StoreError>;

    async fn get_period(&self, key: PeriodKey) -> Result<Option<SufficientStats>, StoreError>;

    /// Rows of one granularity whose period_start lies in `range`, ordered by
    /// (zone, period_start). `zone = None` scans every zone.
    async fn scan_periods(
        &self,
        zone: Option<BiddingZone>,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<Vec<SummaryRow>, StoreError>;

    /// Zones that have at least one stored row, in identifier order
    async fn list_zones(&self) -> Result<Vec<BiddingZone>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Metrics over every stored period of `granularity` inside `range`
    async fn query_period(
        &self,
        zone: BiddingZone,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<MetricSet, StoreError> {
        let rows = self.scan_periods(Some(zone), granularity, range).await?;
        let stats: SufficientStats = rows.iter().map(|row| &row.stats).sum();
        Ok(stats.metrics())
    }
}

/// Copy-on-write store: readers clone an `Arc` to an immutable snapshot and
/// never observe a half-applied batch.
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    snapshot: RwLock<Arc<BTreeMap<PeriodKey, SufficientStats>>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<BTreeMap<PeriodKey, SufficientStats>> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn upsert_period(&self, key: PeriodKey, stats: SufficientStats) -> Result<(), StoreError> {
        let mut guard = self.snapshot.write();
        Arc::make_mut(&mut guard).insert(key, stats);
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[(PeriodKey, SufficientStats)]) -> Result<usize, StoreError> {
        let mut guard = self.snapshot.write();
        let map = Arc::make_mut(&mut guard);
        for (key, stats) in rows {
            map.insert(*key, *stats);
        }
        Ok(rows.len())
    }

    async fn get_period(&self, key: PeriodKey) -> Result<Option<SufficientStats>, StoreError> {
        Ok(self.snapshot().get(&key).copied())
    }

    async fn scan_periods(
        &self,
        zone: Option<BiddingZone>,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        let snapshot = self.snapshot();
        // BTreeMap order is (zone, granularity, period_start)
        Ok(snapshot
            .iter()
            .filter(|(key, _)| {
                zone.is_none_or(|z| key.zone == z)
                    && key.granularity == granularity
                    && range.contains(key.period_start)
            })
            .map(|(key, stats)| SummaryRow {
                key: *key,
                stats: *stats,
            })
            .collect())
    }

    async fn list_zones(&self) -> Result<Vec<BiddingZone>, StoreError> {
        let zones: BTreeSet<BiddingZone> = self.snapshot().keys().map(|k| k.zone).collect();
        Ok(zones.into_iter().collect())
    }
}

/// PostgreSQL-backed store over the `period_summaries` table
#[derive(Debug)]
pub struct SeaOrmSummaryStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmSummaryStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn active_model(
        key: &PeriodKey,
        stats: &SufficientStats,
    ) -> Result<period_summaries::ActiveModel, StoreError> {
        Ok(period_summaries::ActiveModel {
            zone: Set(key.zone.as_str().to_string()),
            granularity: Set(key.granularity.as_str().to_string()),
            period_start: Set(key.period_start),
            interval_count: Set(stats.interval_count as i64),
            duration_hours: Set(to_decimal(stats.duration_hours, "duration_hours")?),
            price_duration: Set(to_decimal(stats.price_duration, "price_duration")?),
            negative_price_hours: Set(to_decimal(stats.negative_price_hours, "negative_price_hours")?),
            solar_mwh: Set(to_decimal(stats.solar_mwh, "solar_mwh")?),
            price_solar: Set(to_decimal(stats.price_solar, "price_solar")?),
            floor_price_solar: Set(to_decimal(stats.floor_price_solar, "floor_price_solar")?),
            solar_at_negative_mwh: Set(to_decimal(stats.solar_at_negative_mwh, "solar_at_negative_mwh")?),
            updated_at: Set(Some(Utc::now().fixed_offset())),
            ..Default::default()
        })
    }

    fn on_conflict() -> OnConflict {
        OnConflict::columns([
            period_summaries::Column::Zone,
            period_summaries::Column::Granularity,
            period_summaries::Column::PeriodStart,
        ])
        .update_columns([
            period_summaries::Column::IntervalCount,
            period_summaries::Column::DurationHours,
            period_summaries::Column::PriceDuration,
            period_summaries::Column::NegativePriceHours,
            period_summaries::Column::SolarMwh,
            period_summaries::Column::PriceSolar,
            period_summaries::Column::FloorPriceSolar,
            period_summaries::Column::SolarAtNegativeMwh,
            period_summaries::Column::UpdatedAt,
        ])
        .to_owned()
    }
}

/// Decodes a stored row back into domain types
pub fn row_from_model(model: &period_summaries::Model) -> Result<SummaryRow, StoreError> {
    let zone: BiddingZone = model
        .zone
        .parse()
        .map_err(|e: crate::models::zone::UnknownZone| StoreError::Corrupt(e.to_string()))?;
    let granularity: Granularity = model.granularity.parse().map_err(StoreError::Corrupt)?;

    Ok(SummaryRow {
        key: PeriodKey {
            zone,
            granularity,
            period_start: model.period_start,
        },
        stats: SufficientStats {
            interval_count: model.interval_count.max(0) as u64,
            duration_hours: to_f64(model.duration_hours),
            price_duration: to_f64(model.price_duration),
            negative_price_hours: to_f64(model.negative_price_hours),
            solar_mwh: to_f64(model.solar_mwh),
            price_solar: to_f64(model.price_solar),
            floor_price_solar: to_f64(model.floor_price_solar),
            solar_at_negative_mwh: to_f64(model.solar_at_negative_mwh),
        },
    })
}

#[async_trait]
impl SummaryStore for SeaOrmSummaryStore {
    async fn upsert_period(&self, key: PeriodKey, stats: SufficientStats) -> Result<(), StoreError> {
        // INSERT .. ON CONFLICT DO UPDATE is a single atomic statement per row
        PeriodSummaries::insert(Self::active_model(&key, &stats)?)
            .on_conflict(Self::on_conflict())
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[(PeriodKey, SufficientStats)]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let models = rows
            .iter()
            .map(|(key, stats)| Self::active_model(key, stats))
            .collect::<Result<Vec<_>, _>>()?;

        let txn = self.db.begin().await?;
        for chunk in models.chunks(UPSERT_CHUNK) {
            PeriodSummaries::insert_many(chunk.to_vec())
                .on_conflict(Self::on_conflict())
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        debug!(rows = rows.len(), "Committed summary batch");
        Ok(rows.len())
    }

    async fn get_period(&self, key: PeriodKey) -> Result<Option<SufficientStats>, StoreError> {
        let model = PeriodSummaries::find()
            .filter(period_summaries::Column::Zone.eq(key.zone.as_str()))
            .filter(period_summaries::Column::Granularity.eq(key.granularity.as_str()))
            .filter(period_summaries::Column::PeriodStart.eq(key.period_start))
            .one(self.db.as_ref())
            .await?;

        model
            .map(|m| row_from_model(&m).map(|row| row.stats))
            .transpose()
    }

    async fn scan_periods(
        &self,
        zone: Option<BiddingZone>,
        granularity: Granularity,
        range: PeriodRange,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        let mut query = PeriodSummaries::find()
            .filter(period_summaries::Column::Granularity.eq(granularity.as_str()));
        if let Some(zone) = zone {
            query = query.filter(period_summaries::Column::Zone.eq(zone.as_str()));
        }
        if let Some(from) = range.from {
            query = query.filter(period_summaries::Column::PeriodStart.gte(from));
        }
        if let Some(to) = range.to {
            query = query.filter(period_summaries::Column::PeriodStart.lte(to));
        }

        let models = query
            .order_by(period_summaries::Column::Zone, Order::Asc)
            .order_by(period_summaries::Column::PeriodStart, Order::Asc)
            .all(self.db.as_ref())
            .await?;

        let mut rows = models
            .iter()
            .map(row_from_model)
            .collect::<Result<Vec<_>, _>>()?;
        // SQL orders zone codes as text, which matches enum order
        rows.sort_by_key(|row| (row.key.zone, row.key.period_start));
        Ok(rows)
    }

    async fn list_zones(&self) -> Result<Vec<BiddingZone>, StoreError> {
        let codes: Vec<String> = PeriodSummaries::find()
            .select_only()
            .column(period_summaries::Column::Zone)
            .distinct()
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let zones = codes
            .iter()
            .map(|code| {
                code.parse::<BiddingZone>()
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(zones.into_iter().collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.execute_unprepared("SELECT 1").await?;
        Ok(())
    }
}
