//! Interval Normalizer
//!
//! Turns raw ENTSO-E price and generation rows into validated series points,
//! and joins price and solar series into [`IntervalRecord`]s:
//! - PT15M rows get `duration_hours = 0.25`, PT60M rows get `1.0`
//! - only day-ahead prices of the first auction sequence are kept
//! - quarter-hour points covered by an hourly point of the same zone are ignored
//! - solar output (MW) is turned into energy per price interval by overlap
//!
//! Bad rows become [`MalformedInputError`]s; they never fail the batch.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

use crate::error::MalformedInputError;
use crate::models::interval::{
    IntervalRecord, RawGenerationRecord, RawPriceRecord, Resolution, SeriesPoint,
};
use crate::models::zone::BiddingZone;

pub const DAY_AHEAD: &str = "Day-ahead";
pub const SOLAR: &str = "Solar";
/// Later intraday auction rounds published alongside the day-ahead result
const SKIPPED_SEQUENCES: [&str; 2] = ["2", "3"];
/// Minutes before an interval start at which a point can still overlap it;
/// no series interval is longer than an hour
pub const MAX_INTERVAL_LOOKBACK: i64 = 59;

/// Result of normalizing one batch of raw rows
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    /// Day-ahead prices, ordered by (zone, timestamp_start)
    pub prices: Vec<SeriesPoint>,
    /// Solar output in MW, ordered by (zone, timestamp_start)
    pub solar: Vec<SeriesPoint>,
    pub rejected: Vec<MalformedInputError>,
    /// Rows filtered out on purpose (other contracts, sequences, production
    /// types, unreported output, duplicates)
    pub skipped: usize,
}

impl NormalizedBatch {
    /// Zones with at least one price or solar point
    pub fn zones(&self) -> Vec<BiddingZone> {
        let zones: BTreeSet<BiddingZone> =
            self.prices.iter().chain(&self.solar).map(|p| p.zone).collect();
        zones.into_iter().collect()
    }

    /// Interval records these rows give on their own, without stored data
    pub fn records(&self) -> Vec<IntervalRecord> {
        join_series(&self.prices, &self.solar)
    }
}

/// Validate price rows and solar generation rows
pub fn normalize(prices: &[RawPriceRecord], generation: &[RawGenerationRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    let price_points = collect_prices(prices, &mut batch);
    let solar_points = collect_solar(generation, &mut batch);
    batch.prices = price_points;
    batch.solar = solar_points;

    info!(
        prices = batch.prices.len(),
        solar = batch.solar.len(),
        rejected = batch.rejected.len(),
        skipped = batch.skipped,
        "Normalized raw rows"
    );

    batch
}

/// Joins price and solar series into interval records ordered by
/// (zone, timestamp_start).
///
/// An hourly point wins over every quarter-hour point it covers, in both
/// series, wherever the points came from. Each price interval gets the solar
/// energy delivered while it lasts; without overlapping generation it is 0.
pub fn join_series(prices: &[SeriesPoint], solar: &[SeriesPoint]) -> Vec<IntervalRecord> {
    let solar_series = effective_series(solar);

    let mut records: Vec<IntervalRecord> = effective_series(prices)
        .into_iter()
        .flat_map(|(zone, series)| {
            let solar = solar_series.get(&zone);
            series
                .into_values()
                .map(move |point| IntervalRecord {
                    zone,
                    timestamp_start: point.timestamp_start,
                    duration_hours: point.resolution.duration_hours(),
                    price: point.value,
                    solar_generation_mwh: solar
                        .map(|s| energy_between(s, point.timestamp_start, point.timestamp_end()))
                        .unwrap_or(0.0),
                })
        })
        .collect();

    records.sort_by(|a, b| (a.zone, a.timestamp_start).cmp(&(b.zone, b.timestamp_start)));
    records
}

fn collect_prices(rows: &[RawPriceRecord], batch: &mut NormalizedBatch) -> Vec<SeriesPoint> {
    let mut parsed = Vec::with_capacity(rows.len());

    for row in rows {
        let contract = row.contract_type.as_deref().map(str::trim).unwrap_or_default();
        if !contract.eq_ignore_ascii_case(DAY_AHEAD) {
            batch.skipped += 1;
            continue;
        }
        if let Some(seq) = row.sequence.as_deref().map(str::trim) {
            if SKIPPED_SEQUENCES.contains(&seq) {
                batch.skipped += 1;
                continue;
            }
        }

        match parse_price_row(row) {
            Ok(point) => parsed.push(point),
            Err(e) => reject(batch, e.at_line(row.line)),
        }
    }

    dedup_points(parsed, batch)
}

fn parse_price_row(row: &RawPriceRecord) -> Result<SeriesPoint, MalformedInputError> {
    let zone: BiddingZone = row
        .area
        .parse()
        .map_err(|e: crate::models::zone::UnknownZone| MalformedInputError::new(e.to_string()))?;
    let timestamp = parse_timestamp(&row.timestamp)?;
    let resolution: Resolution = row.resolution.parse()?;
    let price = parse_value(row.price.as_deref())?
        .ok_or_else(|| MalformedInputError::new("missing price"))?;

    Ok(SeriesPoint {
        zone,
        timestamp_start: timestamp,
        resolution,
        value: price,
    })
}

fn collect_solar(rows: &[RawGenerationRecord], batch: &mut NormalizedBatch) -> Vec<SeriesPoint> {
    let mut parsed = Vec::new();

    for row in rows {
        if !row.production_type.trim().eq_ignore_ascii_case(SOLAR) {
            batch.skipped += 1;
            continue;
        }

        match parse_generation_row(row) {
            Ok(Some(point)) => parsed.push(point),
            // Output not reported for this interval
            Ok(None) => batch.skipped += 1,
            Err(e) => reject(batch, e.at_line(row.line)),
        }
    }

    dedup_points(parsed, batch)
}

fn parse_generation_row(
    row: &RawGenerationRecord,
) -> Result<Option<SeriesPoint>, MalformedInputError> {
    let zone: BiddingZone = row
        .area
        .parse()
        .map_err(|e: crate::models::zone::UnknownZone| MalformedInputError::new(e.to_string()))?;
    let timestamp = parse_timestamp(&row.timestamp)?;
    let resolution: Resolution = row.resolution.parse()?;

    let Some(output_mw) = parse_value(row.output_mw.as_deref())? else {
        return Ok(None);
    };
    if output_mw < 0.0 {
        return Err(MalformedInputError::new(format!(
            "negative solar output {} MW",
            output_mw
        )));
    }

    Ok(Some(SeriesPoint {
        zone,
        timestamp_start: timestamp,
        resolution,
        value: output_mw,
    }))
}

/// Keeps the first point per (zone, start, resolution), the storage key,
/// ordered by (zone, timestamp_start)
fn dedup_points(points: Vec<SeriesPoint>, batch: &mut NormalizedBatch) -> Vec<SeriesPoint> {
    let mut seen = HashSet::with_capacity(points.len());
    let mut kept: Vec<SeriesPoint> = points
        .into_iter()
        .filter(|p| {
            let first = seen.insert((p.zone, p.timestamp_start, p.resolution));
            if !first {
                batch.skipped += 1;
            }
            first
        })
        .collect();
    kept.sort_by(|a, b| {
        (a.zone, a.timestamp_start, a.resolution.duration())
            .cmp(&(b.zone, b.timestamp_start, b.resolution.duration()))
    });
    kept
}

type ZoneSeries = HashMap<BiddingZone, BTreeMap<DateTime<Utc>, SeriesPoint>>;

/// One point per (zone, start). Quarter-hour points that an hourly point of
/// the same zone covers are dropped; the first point per start is kept.
fn effective_series(points: &[SeriesPoint]) -> ZoneSeries {
    let mut hourly: HashMap<BiddingZone, BTreeSet<DateTime<Utc>>> = HashMap::new();
    for point in points.iter().filter(|p| p.resolution == Resolution::Hour) {
        hourly.entry(point.zone).or_default().insert(point.timestamp_start);
    }

    let mut series: ZoneSeries = HashMap::new();
    for point in points {
        if point.resolution == Resolution::QuarterHour {
            let start = point.timestamp_start;
            let covered = hourly.get(&point.zone).is_some_and(|starts| {
                starts
                    .range((start - Duration::minutes(MAX_INTERVAL_LOOKBACK))..=start)
                    .next()
                    .is_some()
            });
            if covered {
                continue;
            }
        }
        series
            .entry(point.zone)
            .or_default()
            .entry(point.timestamp_start)
            .or_insert(*point);
    }

    series
}

/// MWh delivered during `[start, end)`, assuming constant output within each generation interval
fn energy_between(
    series: &BTreeMap<DateTime<Utc>, SeriesPoint>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    let lookback = start - Duration::minutes(MAX_INTERVAL_LOOKBACK);

    series
        .range(lookback..end)
        .map(|(gen_start, point)| {
            let overlap_start = (*gen_start).max(start);
            let overlap_end = point.timestamp_end().min(end);
            let overlap_secs = (overlap_end - overlap_start).num_seconds();
            if overlap_secs <= 0 {
                0.0
            } else {
                point.value * overlap_secs as f64 / 3600.0
            }
        })
        .sum()
}

fn reject(batch: &mut NormalizedBatch, error: MalformedInputError) {
    warn!(line = ?error.line, reason = %error.reason, "Skipping malformed record");
    batch.rejected.push(error);
}

/// Parses a numeric CSV cell. Empty cells and `n/e` (not expected) are absent values.
pub fn parse_value(raw: Option<&str>) -> Result<Option<f64>, MalformedInputError> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() || raw.eq_ignore_ascii_case("n/e") || raw == "-" {
        return Ok(None);
    }

    let value: f64 = raw
        .parse()
        .map_err(|_| MalformedInputError::new(format!("invalid number '{}'", raw)))?;
    if !value.is_finite() {
        return Err(MalformedInputError::new(format!("non-finite number '{}'", raw)));
    }
    Ok(Some(value))
}

/// Parses the `DateTime(UTC)` column. Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedInputError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];

    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = trimmed.trim_end_matches('Z');
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|ts| ts.and_utc())
        .ok_or_else(|| MalformedInputError::new(format!("invalid timestamp '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn price(area: &str, ts: &str, res: &str, value: &str) -> RawPriceRecord {
        RawPriceRecord {
            line: None,
            area: area.to_string(),
            timestamp: ts.to_string(),
            resolution: res.to_string(),
            contract_type: Some("Day-ahead".to_string()),
            sequence: None,
            price: Some(value.to_string()),
        }
    }

    fn solar(area: &str, ts: &str, res: &str, mw: &str) -> RawGenerationRecord {
        RawGenerationRecord {
            line: None,
            area: area.to_string(),
            timestamp: ts.to_string(),
            resolution: res.to_string(),
            production_type: "Solar".to_string(),
            output_mw: Some(mw.to_string()),
        }
    }

    fn point(zone: BiddingZone, h: u32, min: u32, resolution: Resolution, value: f64) -> SeriesPoint {
        SeriesPoint {
            zone,
            timestamp_start: Utc.with_ymd_and_hms(2025, 6, 1, h, min, 0).unwrap(),
            resolution,
            value,
        }
    }

    #[test]
    fn test_durations_follow_resolution() {
        let batch = normalize(
            &[
                price("DE-LU", "2025-06-01 10:00:00", "PT60M", "20"),
                price("NL", "2025-06-01 10:00:00", "PT15M", "20"),
            ],
            &[],
        );

        let records = batch.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].zone, BiddingZone::DeLu);
        assert_eq!(records[0].duration_hours, 1.0);
        assert_eq!(records[1].duration_hours, 0.25);
        assert_eq!(records[1].solar_generation_mwh, 0.0);
        assert_eq!(batch.zones(), vec![BiddingZone::DeLu, BiddingZone::Nl]);
    }

    #[test]
    fn test_unknown_resolution_is_rejected_not_fatal() {
        let mut row = price("FR", "2025-06-01 10:00:00", "PT30M", "20");
        row.line = Some(7);
        let batch = normalize(&[row, price("FR", "2025-06-01 11:00:00", "PT60M", "30")], &[]);

        assert_eq!(batch.prices.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].line, Some(7));
        assert!(batch.rejected[0].reason.contains("PT30M"));
    }

    #[test]
    fn test_unknown_zone_and_bad_price_are_rejected() {
        let batch = normalize(
            &[
                price("Narnia", "2025-06-01 10:00:00", "PT60M", "20"),
                price("FR", "2025-06-01 10:00:00", "PT60M", "abc"),
                price("FR", "not a date", "PT60M", "1"),
                price("FR", "2025-06-01 11:00:00", "PT60M", ""),
            ],
            &[],
        );
        assert!(batch.prices.is_empty());
        assert_eq!(batch.rejected.len(), 4);
    }

    #[test]
    fn test_only_first_day_ahead_sequence_is_kept() {
        let mut intraday = price("AT", "2025-06-01 10:00:00", "PT60M", "20");
        intraday.contract_type = Some("Intraday".to_string());
        let mut second_auction = price("AT", "2025-06-01 11:00:00", "PT60M", "20");
        second_auction.sequence = Some("2".to_string());
        let mut first_auction = price("AT", "2025-06-01 12:00:00", "PT60M", "20");
        first_auction.sequence = Some("1".to_string());
        let mut no_contract = price("AT", "2025-06-01 13:00:00", "PT60M", "20");
        no_contract.contract_type = None;
        let mut blank_contract = price("AT", "2025-06-01 14:00:00", "PT60M", "20");
        blank_contract.contract_type = Some(" ".to_string());

        let batch = normalize(
            &[intraday, second_auction, first_auction, no_contract, blank_contract],
            &[],
        );
        assert_eq!(batch.prices.len(), 1);
        assert_eq!(batch.skipped, 4);
        assert!(batch.rejected.is_empty());
    }

    #[test]
    fn test_duplicate_points_keep_the_first() {
        let batch = normalize(
            &[
                price("BE", "2025-06-01 10:00:00", "PT60M", "10"),
                price("BE", "2025-06-01 10:00:00", "PT60M", "99"),
            ],
            &[],
        );
        assert_eq!(batch.prices.len(), 1);
        assert_eq!(batch.prices[0].value, 10.0);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_hourly_row_wins_over_covered_quarter_hours() {
        let batch = normalize(
            &[
                price("BE", "2025-06-01 10:00:00", "PT60M", "-10"),
                price("BE", "2025-06-01 10:00:00", "PT15M", "-10"),
                price("BE", "2025-06-01 10:15:00", "PT15M", "-10"),
                price("BE", "2025-06-01 11:00:00", "PT15M", "5"),
            ],
            &[],
        );

        // All four are valid points; the join ignores the covered ones
        assert_eq!(batch.prices.len(), 4);
        let durations: Vec<f64> = batch.records().iter().map(|r| r.duration_hours).collect();
        assert_eq!(durations, vec![1.0, 0.25]);
    }

    #[test]
    fn test_hourly_point_wins_regardless_of_arrival_order() {
        let mut prices: Vec<SeriesPoint> = [0, 15, 30, 45]
            .iter()
            .map(|m| point(BiddingZone::Be, 10, *m, Resolution::QuarterHour, -10.0))
            .collect();
        // Quarter-hours first, as when they arrive in a later import than the hour
        prices.push(point(BiddingZone::Be, 10, 0, Resolution::Hour, -10.0));

        let records = join_series(&prices, &[]);
        assert_eq!(records.len(), 1);
        let hours: f64 = records.iter().map(|r| r.duration_hours).sum();
        let negative: f64 = records
            .iter()
            .filter(|r| r.price < 0.0)
            .map(|r| r.duration_hours)
            .sum();
        assert_eq!(hours, 1.0);
        assert_eq!(negative, 1.0);
    }

    #[test]
    fn test_solar_joined_as_energy() {
        let batch = normalize(
            &[
                price("ES", "2025-06-01 10:00:00", "PT60M", "40"),
                price("ES", "2025-06-01 11:00:00", "PT15M", "30"),
                price("ES", "2025-06-01 11:15:00", "PT15M", "30"),
            ],
            &[
                solar("ES", "2025-06-01 10:00:00", "PT15M", "100"),
                solar("ES", "2025-06-01 10:15:00", "PT15M", "100"),
                solar("ES", "2025-06-01 10:30:00", "PT15M", "200"),
                solar("ES", "2025-06-01 10:45:00", "PT15M", "200"),
                solar("ES", "2025-06-01 11:00:00", "PT60M", "400"),
            ],
        );

        let records = batch.records();
        assert_eq!(records.len(), 3);
        // 0.25 h each of 100, 100, 200, 200 MW
        assert!((records[0].solar_generation_mwh - 150.0).abs() < 1e-9);
        // a quarter of an hourly 400 MW block
        assert!((records[1].solar_generation_mwh - 100.0).abs() < 1e-9);
        assert!((records[2].solar_generation_mwh - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_solar_from_another_batch_joins_stored_prices() {
        let prices = normalize(&[price("DE-LU", "2025-06-01 10:00:00", "PT60M", "50")], &[]);
        let generation = normalize(&[], &[solar("DE-LU", "2025-06-01 10:00:00", "PT60M", "100")]);
        assert!(generation.records().is_empty());

        let records = join_series(&prices.prices, &generation.solar);
        assert_eq!(records.len(), 1);
        assert!((records[0].solar_generation_mwh - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_generation_filters() {
        let mut wind = solar("PT", "2025-06-01 10:00:00", "PT60M", "50");
        wind.production_type = "Wind Onshore".to_string();
        let missing = solar("PT", "2025-06-01 10:00:00", "PT60M", "n/e");
        let negative = solar("PT", "2025-06-01 10:00:00", "PT60M", "-3");

        let batch = normalize(
            &[price("PT", "2025-06-01 10:00:00", "PT60M", "10")],
            &[wind, missing, negative],
        );

        assert_eq!(batch.records()[0].solar_generation_mwh, 0.0);
        assert!(batch.solar.is_empty());
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.skipped, 2);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-02 03:04:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-01-02 03:04").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-01-02T03:04Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-01-02T04:04:00+01:00").unwrap(), expected);
        assert!(parse_timestamp("02/01/2025").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(Some(" -12.5 ")).unwrap(), Some(-12.5));
        assert_eq!(parse_value(Some("n/e")).unwrap(), None);
        assert_eq!(parse_value(None).unwrap(), None);
        assert!(parse_value(Some("NaN")).is_err());
    }
}
