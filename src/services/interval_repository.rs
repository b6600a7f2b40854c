//! Interval Repository
//!
//! Append-only storage of the two normalized series, day-ahead prices and
//! solar output. A second append of the same `(zone, timestamp_start,
//! resolution)` keeps the existing row. Interval records are never stored:
//! they are joined from both series on load, so solar imported after its
//! prices still lands on them and an hourly point hides the quarter-hours it
//! covers whichever arrived first.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::entities::prelude::{DayAheadPrices, SolarGeneration};
use crate::entities::{day_ahead_prices, solar_generation};
use crate::error::StoreError;
use crate::models::interval::{IntervalRecord, Resolution, SeriesPoint};
use crate::models::zone::BiddingZone;
use crate::services::normalizer::{join_series, MAX_INTERVAL_LOOKBACK};
use crate::services::numeric::{to_decimal, to_f64};

const INSERT_CHUNK: usize = 1000;

/// Half-open `[start, end)` window over interval start timestamps
pub type TimeWindow = (DateTime<Utc>, DateTime<Utc>);

#[async_trait]
pub trait IntervalRepository: Send + Sync {
    /// Stores new price points and returns how many were actually inserted
    async fn append_prices(&self, points: &[SeriesPoint]) -> Result<u64, StoreError>;

    /// Stores new solar points (MW) and returns how many were actually inserted
    async fn append_solar(&self, points: &[SeriesPoint]) -> Result<u64, StoreError>;

    async fn load_prices(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError>;

    async fn load_solar(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError>;

    /// Zones with at least one stored price point, in identifier order
    async fn zones_with_data(&self) -> Result<Vec<BiddingZone>, StoreError>;

    /// Interval records of `zone` ordered by timestamp, optionally restricted
    /// to those starting inside `window`
    async fn load(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<IntervalRecord>, StoreError> {
        // points starting shortly before the window still cover or overlap it
        let widened =
            window.map(|(start, end)| (start - Duration::minutes(MAX_INTERVAL_LOOKBACK), end));
        let prices = self.load_prices(zone, widened).await?;
        let solar = self.load_solar(zone, widened).await?;

        let mut records = join_series(&prices, &solar);
        if let Some((start, end)) = window {
            records.retain(|r| r.timestamp_start >= start && r.timestamp_start < end);
        }
        Ok(records)
    }
}

type PointKey = (DateTime<Utc>, &'static str);

#[derive(Debug, Default)]
struct PointTable {
    points: RwLock<HashMap<BiddingZone, BTreeMap<PointKey, SeriesPoint>>>,
}

impl PointTable {
    fn insert_new(&self, points: &[SeriesPoint]) -> u64 {
        let mut map = self.points.write();
        let mut inserted = 0u64;
        for point in points {
            let series = map.entry(point.zone).or_default();
            let key = (point.timestamp_start, point.resolution.as_str());
            if !series.contains_key(&key) {
                series.insert(key, *point);
                inserted += 1;
            }
        }
        inserted
    }

    fn select(&self, zone: BiddingZone, window: Option<TimeWindow>) -> Vec<SeriesPoint> {
        let map = self.points.read();
        let Some(series) = map.get(&zone) else {
            return Vec::new();
        };
        match window {
            // "" sorts before every resolution code
            Some((start, end)) if start < end => series
                .range((start, "")..(end, ""))
                .map(|(_, p)| *p)
                .collect(),
            Some(_) => Vec::new(),
            None => series.values().copied().collect(),
        }
    }

    fn zones(&self) -> BTreeSet<BiddingZone> {
        self.points
            .read()
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(zone, _)| *zone)
            .collect()
    }

    fn len(&self) -> usize {
        self.points.read().values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIntervalRepository {
    prices: PointTable,
    solar: PointTable,
}

impl InMemoryIntervalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored points across both series
    pub fn len(&self) -> usize {
        self.prices.len() + self.solar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IntervalRepository for InMemoryIntervalRepository {
    async fn append_prices(&self, points: &[SeriesPoint]) -> Result<u64, StoreError> {
        Ok(self.prices.insert_new(points))
    }

    async fn append_solar(&self, points: &[SeriesPoint]) -> Result<u64, StoreError> {
        Ok(self.solar.insert_new(points))
    }

    async fn load_prices(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        Ok(self.prices.select(zone, window))
    }

    async fn load_solar(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        Ok(self.solar.select(zone, window))
    }

    async fn zones_with_data(&self) -> Result<Vec<BiddingZone>, StoreError> {
        Ok(self.prices.zones().into_iter().collect())
    }
}

#[derive(Debug)]
pub struct SeaOrmIntervalRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmIntervalRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn price_model(point: &SeriesPoint) -> Result<day_ahead_prices::ActiveModel, StoreError> {
        Ok(day_ahead_prices::ActiveModel {
            zone: Set(point.zone.as_str().to_string()),
            timestamp_start: Set(point.timestamp_start.fixed_offset()),
            resolution: Set(point.resolution.as_str().to_string()),
            price: Set(to_decimal(point.value, "price")?),
            created_at: Set(Some(Utc::now().fixed_offset())),
            ..Default::default()
        })
    }

    fn solar_model(point: &SeriesPoint) -> Result<solar_generation::ActiveModel, StoreError> {
        Ok(solar_generation::ActiveModel {
            zone: Set(point.zone.as_str().to_string()),
            timestamp_start: Set(point.timestamp_start.fixed_offset()),
            resolution: Set(point.resolution.as_str().to_string()),
            output_mw: Set(to_decimal(point.value, "output_mw")?),
            created_at: Set(Some(Utc::now().fixed_offset())),
            ..Default::default()
        })
    }
}

fn decode_point(
    zone: &str,
    timestamp_start: DateTime<Utc>,
    resolution: &str,
    value: Decimal,
) -> Result<SeriesPoint, StoreError> {
    let zone: BiddingZone = zone
        .parse()
        .map_err(|e: crate::models::zone::UnknownZone| StoreError::Corrupt(e.to_string()))?;
    let resolution: Resolution = resolution
        .parse()
        .map_err(|e: crate::error::MalformedInputError| StoreError::Corrupt(e.to_string()))?;
    Ok(SeriesPoint {
        zone,
        timestamp_start,
        resolution,
        value: to_f64(value),
    })
}

pub fn price_from_model(model: &day_ahead_prices::Model) -> Result<SeriesPoint, StoreError> {
    decode_point(
        &model.zone,
        model.timestamp_start.with_timezone(&Utc),
        &model.resolution,
        model.price,
    )
}

pub fn solar_from_model(model: &solar_generation::Model) -> Result<SeriesPoint, StoreError> {
    decode_point(
        &model.zone,
        model.timestamp_start.with_timezone(&Utc),
        &model.resolution,
        model.output_mw,
    )
}

#[async_trait]
impl IntervalRepository for SeaOrmIntervalRepository {
    async fn append_prices(&self, points: &[SeriesPoint]) -> Result<u64, StoreError> {
        let models = points
            .iter()
            .map(Self::price_model)
            .collect::<Result<Vec<_>, _>>()?;

        let mut inserted = 0u64;
        for chunk in models.chunks(INSERT_CHUNK) {
            inserted += DayAheadPrices::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        day_ahead_prices::Column::Zone,
                        day_ahead_prices::Column::TimestampStart,
                        day_ahead_prices::Column::Resolution,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(self.db.as_ref())
                .await?;
        }

        debug!(offered = points.len(), inserted, "Appended price points");
        Ok(inserted)
    }

    async fn append_solar(&self, points: &[SeriesPoint]) -> Result<u64, StoreError> {
        let models = points
            .iter()
            .map(Self::solar_model)
            .collect::<Result<Vec<_>, _>>()?;

        let mut inserted = 0u64;
        for chunk in models.chunks(INSERT_CHUNK) {
            inserted += SolarGeneration::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        solar_generation::Column::Zone,
                        solar_generation::Column::TimestampStart,
                        solar_generation::Column::Resolution,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(self.db.as_ref())
                .await?;
        }

        debug!(offered = points.len(), inserted, "Appended solar points");
        Ok(inserted)
    }

    async fn load_prices(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let mut query =
            DayAheadPrices::find().filter(day_ahead_prices::Column::Zone.eq(zone.as_str()));
        if let Some((start, end)) = window {
            query = query
                .filter(day_ahead_prices::Column::TimestampStart.gte(start.fixed_offset()))
                .filter(day_ahead_prices::Column::TimestampStart.lt(end.fixed_offset()));
        }

        let models = query
            .order_by(day_ahead_prices::Column::TimestampStart, Order::Asc)
            .all(self.db.as_ref())
            .await?;
        models.iter().map(price_from_model).collect()
    }

    async fn load_solar(
        &self,
        zone: BiddingZone,
        window: Option<TimeWindow>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let mut query =
            SolarGeneration::find().filter(solar_generation::Column::Zone.eq(zone.as_str()));
        if let Some((start, end)) = window {
            query = query
                .filter(solar_generation::Column::TimestampStart.gte(start.fixed_offset()))
                .filter(solar_generation::Column::TimestampStart.lt(end.fixed_offset()));
        }

        let models = query
            .order_by(solar_generation::Column::TimestampStart, Order::Asc)
            .all(self.db.as_ref())
            .await?;
        models.iter().map(solar_from_model).collect()
    }

    async fn zones_with_data(&self) -> Result<Vec<BiddingZone>, StoreError> {
        let codes: Vec<String> = DayAheadPrices::find()
            .select_only()
            .column(day_ahead_prices::Column::Zone)
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
}

/// Splits interval fixtures into the price and solar points that join back
/// into them
#[cfg(test)]
pub(crate) fn points_of(records: &[IntervalRecord]) -> (Vec<SeriesPoint>, Vec<SeriesPoint>) {
    let mut prices = Vec::with_capacity(records.len());
    let mut solar = Vec::with_capacity(records.len());
    for r in records {
        let resolution = if r.duration_hours == 0.25 {
            Resolution::QuarterHour
        } else {
            Resolution::Hour
        };
        prices.push(SeriesPoint {
            zone: r.zone,
            timestamp_start: r.timestamp_start,
            resolution,
            value: r.price,
        });
        solar.push(SeriesPoint {
            zone: r.zone,
            timestamp_start: r.timestamp_start,
            resolution,
            value: r.solar_generation_mwh / resolution.duration_hours(),
        });
    }
    (prices, solar)
}

/// Stores interval fixtures through both series
#[cfg(test)]
pub(crate) async fn seed(repo: &dyn IntervalRepository, records: &[IntervalRecord]) {
    let (prices, solar) = points_of(records);
    repo.append_prices(&prices).await.unwrap();
    repo.append_solar(&solar).await.unwrap();
}
