//! Ingestion of ENTSO-E transparency platform data
//!
//! Reads day-ahead price files and actual-generation files (or rows fetched
//! from the web API), normalizes them and appends both series to the
//! repository. Prices and solar output are stored separately, so either may
//! arrive first.

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{FetchError, IngestError, MalformedInputError};
use crate::models::interval::{RawGenerationRecord, RawPriceRecord};
use crate::models::zone::BiddingZone;
use crate::services::entsoe_api::EntsoeApiService;
use crate::services::interval_repository::IntervalRepository;
use crate::services::normalizer::normalize;

/// Pause between zones when pulling from the web API
pub const ZONE_SPACING: std::time::Duration = std::time::Duration::from_millis(300);

const COL_DATETIME: &str = "DateTime(UTC)";
const COL_PRICE: &str = "Price[Currency/MWh]";
const COL_PRODUCTION_TYPE: &str = "ProductionType";
const COL_OUTPUT: &str = "ActualGenerationOutput[MW]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvKind {
    Prices,
    Generation,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "DateTime(UTC)", default)]
    datetime: String,
    #[serde(rename = "ResolutionCode", default)]
    resolution: String,
    #[serde(rename = "AreaCode", default)]
    area_code: Option<String>,
    #[serde(rename = "AreaDisplayName", default)]
    area_display_name: Option<String>,
    #[serde(rename = "ContractType", default)]
    contract_type: Option<String>,
    #[serde(rename = "Sequence", default)]
    sequence: Option<String>,
    #[serde(rename = "Price[Currency/MWh]", default)]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationRow {
    #[serde(rename = "DateTime(UTC)", default)]
    datetime: String,
    #[serde(rename = "ResolutionCode", default)]
    resolution: String,
    #[serde(rename = "AreaCode", default)]
    area_code: Option<String>,
    #[serde(rename = "AreaDisplayName", default)]
    area_display_name: Option<String>,
    #[serde(rename = "ProductionType", default)]
    production_type: String,
    #[serde(rename = "ActualGenerationOutput[MW]", default)]
    output_mw: Option<String>,
}

/// Raw rows before normalization
#[derive(Debug, Default)]
pub struct RawRows {
    pub prices: Vec<RawPriceRecord>,
    pub generation: Vec<RawGenerationRecord>,
    pub rejected: Vec<MalformedInputError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Files read or zones fetched
    pub sources: usize,
    pub price_rows: usize,
    pub generation_rows: usize,
    /// Normalized price points and solar points
    pub price_points: usize,
    pub solar_points: usize,
    /// Interval records the batch joins into on its own
    pub intervals: usize,
    /// Points new to the repository
    pub inserted_prices: u64,
    pub inserted_solar: u64,
    /// Zones that received at least one new point
    pub zones: Vec<BiddingZone>,
    /// Rows dropped as malformed
    pub rejected: usize,
    /// Rows outside the day-ahead price or solar generation scope
    pub skipped: usize,
    /// Files that could not be read or zones that could not be fetched, with the reason
    pub failed_sources: Vec<String>,
}

/// Tab when the header line contains one, comma otherwise
pub fn detect_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    if header.contains('\t') { b'\t' } else { b',' }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim_start_matches('\u{feff}').trim() == name)
}

pub fn detect_kind(headers: &StringRecord) -> CsvKind {
    if column_index(headers, COL_PRODUCTION_TYPE).is_some() {
        CsvKind::Generation
    } else {
        CsvKind::Prices
    }
}

/// Prefers whichever of the two area columns names a known bidding zone
fn pick_area(display_name: Option<String>, code: Option<String>) -> String {
    let candidates = [display_name, code];
    candidates
        .iter()
        .flatten()
        .find(|c| c.parse::<BiddingZone>().is_ok())
        .or_else(|| candidates.iter().flatten().find(|c| !c.trim().is_empty()))
        .cloned()
        .unwrap_or_default()
}

/// Parses one CSV document. `label` names the source in errors.
pub fn parse_csv(content: &str, label: &str) -> Result<(CsvKind, RawRows), IngestError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(detect_delimiter(content))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let csv_err = |source| IngestError::Csv {
        path: label.to_string(),
        source,
    };

    let mut headers = reader.headers().map_err(csv_err)?.clone();
    // The serde mapping matches on exact header names
    headers = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let kind = detect_kind(&headers);
    let required: &[&str] = match kind {
        CsvKind::Prices => &[COL_DATETIME, COL_PRICE],
        CsvKind::Generation => &[COL_DATETIME, COL_OUTPUT],
    };
    if let Some(missing) = required.iter().find(|c| column_index(&headers, c).is_none()) {
        return Err(IngestError::UnknownLayout {
            path: label.to_string(),
            column: missing.to_string(),
        });
    }

    let mut parsed = RawRows::default();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line());
                warn!(file = label, line = ?line, error = %e, "Unreadable CSV row");
                parsed
                    .rejected
                    .push(MalformedInputError::new(e.to_string()).at_line(line));
                continue;
            }
        };
        let line = record.position().map(|p| p.line());
        if record.iter().all(str::is_empty) {
            continue;
        }

        match kind {
            CsvKind::Prices => match record.deserialize::<PriceRow>(Some(&headers)) {
                Ok(row) => parsed.prices.push(RawPriceRecord {
                    line,
                    area: pick_area(row.area_display_name, row.area_code),
                    timestamp: row.datetime,
                    resolution: row.resolution,
                    contract_type: row.contract_type,
                    sequence: row.sequence,
                    price: row.price,
                }),
                Err(e) => parsed
                    .rejected
                    .push(MalformedInputError::new(e.to_string()).at_line(line)),
            },
            CsvKind::Generation => match record.deserialize::<GenerationRow>(Some(&headers)) {
                Ok(row) => parsed.generation.push(RawGenerationRecord {
                    line,
                    area: pick_area(row.area_display_name, row.area_code),
                    timestamp: row.datetime,
                    resolution: row.resolution,
                    production_type: row.production_type,
                    output_mw: row.output_mw,
                }),
                Err(e) => parsed
                    .rejected
                    .push(MalformedInputError::new(e.to_string()).at_line(line)),
            },
        }
    }

    debug!(
        file = label,
        kind = ?kind,
        prices = parsed.prices.len(),
        generation = parsed.generation.len(),
        rejected = parsed.rejected.len(),
        "Parsed CSV"
    );
    Ok((kind, parsed))
}

pub fn read_csv_file(path: &Path) -> Result<(CsvKind, RawRows), IngestError> {
    let label = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: label.clone(),
        source,
    })?;
    parse_csv(&content, &label)
}

/// `*.csv` files of a directory, sorted by file name
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let io_err = |source| IngestError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub struct IntervalIngestor {
    repository: Arc<dyn IntervalRepository>,
}

impl IntervalIngestor {
    pub fn new(repository: Arc<dyn IntervalRepository>) -> Self {
        Self { repository }
    }

    /// Imports every CSV file of `dir`. Unreadable files are reported and do
    /// not stop the others.
    pub async fn ingest_dir(&self, dir: &Path, dry_run: bool) -> Result<IngestReport, IngestError> {
        let files = list_csv_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Starting CSV import");
        self.ingest_files(&files, dry_run).await
    }

    pub async fn ingest_files(
        &self,
        files: &[PathBuf],
        dry_run: bool,
    ) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let mut combined = RawRows::default();

        for path in files {
            match read_csv_file(path) {
                Ok((kind, parsed)) => {
                    info!(
                        file = %path.display(),
                        kind = ?kind,
                        rows = parsed.prices.len() + parsed.generation.len(),
                        "Read CSV file"
                    );
                    report.sources += 1;
                    combined.prices.extend(parsed.prices);
                    combined.generation.extend(parsed.generation);
                    combined.rejected.extend(parsed.rejected);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping file");
                    report.failed_sources.push(e.to_string());
                }
            }
        }

        self.ingest_parsed(combined, report, dry_run).await
    }

    /// Fetches `[start, end)` of every zone from the web API and ingests it.
    /// A zone that cannot be fetched is reported and does not stop the others.
    pub async fn ingest_from_api(
        &self,
        api: &EntsoeApiService,
        zones: &[BiddingZone],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<IngestReport, IngestError> {
        info!(zones = zones.len(), %start, %end, "Starting ENTSO-E fetch");
        let mut report = IngestReport::default();

        for (i, zone) in zones.iter().copied().enumerate() {
            if i > 0 {
                tokio::time::sleep(ZONE_SPACING).await;
            }

            match fetch_zone(api, zone, start, end).await {
                Ok(rows) => {
                    report.sources += 1;
                    report = self.ingest_parsed(rows, report, dry_run).await?;
                }
                Err(e) => {
                    warn!(zone = %zone, error = %e, "Skipping zone");
                    report.failed_sources.push(format!("{}: {}", zone, e));
                }
            }
        }

        Ok(report)
    }

    /// Normalizes collected rows and appends both series
    pub async fn ingest_parsed(
        &self,
        parsed: RawRows,
        mut report: IngestReport,
        dry_run: bool,
    ) -> Result<IngestReport, IngestError> {
        report.price_rows += parsed.prices.len();
        report.generation_rows += parsed.generation.len();

        let batch = normalize(&parsed.prices, &parsed.generation);
        report.price_points += batch.prices.len();
        report.solar_points += batch.solar.len();
        report.intervals += batch.records().len();
        report.rejected += parsed.rejected.len() + batch.rejected.len();
        report.skipped += batch.skipped;

        if dry_run {
            info!(
                prices = batch.prices.len(),
                solar = batch.solar.len(),
                "Dry run: not appending points"
            );
        } else {
            let inserted_prices = self.repository.append_prices(&batch.prices).await?;
            let inserted_solar = self.repository.append_solar(&batch.solar).await?;
            report.inserted_prices += inserted_prices;
            report.inserted_solar += inserted_solar;
            if inserted_prices + inserted_solar > 0 {
                let mut zones: BTreeSet<BiddingZone> = report.zones.drain(..).collect();
                zones.extend(batch.zones());
                report.zones = zones.into_iter().collect();
            }
        }

        info!(
            sources = report.sources,
            intervals = report.intervals,
            inserted_prices = report.inserted_prices,
            inserted_solar = report.inserted_solar,
            rejected = report.rejected,
            "Import finished"
        );
        Ok(report)
    }
}

async fn fetch_zone(
    api: &EntsoeApiService,
    zone: BiddingZone,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<RawRows, FetchError> {
    Ok(RawRows {
        prices: api.fetch_day_ahead_prices(zone, start, end).await?,
        generation: api.fetch_solar_generation(zone, start, end).await?,
        rejected: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::interval_repository::InMemoryIntervalRepository;

    const PRICES: &str = "\
DateTime(UTC)\tResolutionCode\tAreaCode\tAreaDisplayName\tContractType\tSequence\tPrice[Currency/MWh]
2025-06-01 10:00:00\tPT60M\t10Y1001A1001A82H\tBZN|DE-LU\tDay-ahead\t\t60.00
2025-06-01 11:00:00\tPT60M\t10Y1001A1001A82H\tBZN|DE-LU\tDay-ahead\t\t-5.00
2025-06-01 12:00:00\tPT60M\t10Y1001A1001A82H\tBZN|DE-LU\tIntraday\t\t99.00
2025-06-01 13:00:00\tPT60M\t10Y1001A1001A82H\tBZN|DE-LU\tDay-ahead\t\tabc
";

    const GENERATION: &str = "\
DateTime(UTC),ResolutionCode,AreaDisplayName,ProductionType,ActualGenerationOutput[MW]
2025-06-01 10:00:00,PT60M,DE-LU,Solar,4
2025-06-01 11:00:00,PT60M,DE-LU,Solar,8
2025-06-01 11:00:00,PT60M,DE-LU,Wind Onshore,500
";

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(PRICES), b'\t');
        assert_eq!(detect_delimiter(GENERATION), b',');
        assert_eq!(detect_delimiter(""), b',');
    }

    #[test]
    fn test_parse_price_file() {
        let (kind, parsed) = parse_csv(PRICES, "prices.csv").unwrap();
        assert_eq!(kind, CsvKind::Prices);
        assert_eq!(parsed.prices.len(), 4);
        assert_eq!(parsed.prices[0].area, "BZN|DE-LU");
        assert_eq!(parsed.prices[0].price.as_deref(), Some("60.00"));
        assert_eq!(parsed.prices[0].line, Some(2));
        // Empty Sequence column comes through as an empty string
        assert!(parsed.prices[0].sequence.as_deref().unwrap_or_default().is_empty());
    }

    #[test]
    fn test_parse_generation_file() {
        let (kind, parsed) = parse_csv(GENERATION, "gen.csv").unwrap();
        assert_eq!(kind, CsvKind::Generation);
        assert_eq!(parsed.generation.len(), 3);
        assert_eq!(parsed.generation[2].production_type, "Wind Onshore");
    }

    #[test]
    fn test_missing_price_column_is_unknown_layout() {
        let content = "DateTime(UTC),ResolutionCode,AreaCode\n2025-06-01 10:00,PT60M,FR\n";
        let err = parse_csv(content, "odd.csv").unwrap_err();
        assert!(matches!(err, IngestError::UnknownLayout { ref column, .. } if column == COL_PRICE));
    }

    #[test]
    fn test_pick_area_prefers_known_zone() {
        assert_eq!(
            pick_area(Some("Germany".into()), Some("DE-LU".into())),
            "DE-LU"
        );
        assert_eq!(pick_area(Some("Atlantis".into()), None), "Atlantis");
        assert_eq!(pick_area(None, None), "");
    }

    #[tokio::test]
    async fn test_ingest_joins_prices_and_solar() {
        let repo = Arc::new(InMemoryIntervalRepository::new());
        let ingestor = IntervalIngestor::new(repo.clone());

        let (_, mut parsed) = parse_csv(PRICES, "prices.csv").unwrap();
        let (_, generation) = parse_csv(GENERATION, "gen.csv").unwrap();
        parsed.generation = generation.generation;

        let report = ingestor
            .ingest_parsed(parsed, IngestReport::default(), false)
            .await
            .unwrap();

        assert_eq!(report.price_rows, 4);
        assert_eq!(report.generation_rows, 3);
        assert_eq!(report.intervals, 2);
        assert_eq!(report.inserted_prices, 2);
        assert_eq!(report.inserted_solar, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.zones, vec![BiddingZone::DeLu]);

        let records = repo.load(BiddingZone::DeLu, None).await.unwrap();
        assert_eq!(records[0].solar_generation_mwh, 4.0);
        assert_eq!(records[1].price, -5.0);
    }

    #[tokio::test]
    async fn test_dry_run_appends_nothing() {
        let repo = Arc::new(InMemoryIntervalRepository::new());
        let ingestor = IntervalIngestor::new(repo.clone());
        let (_, parsed) = parse_csv(PRICES, "prices.csv").unwrap();

        let report = ingestor
            .ingest_parsed(parsed, IngestReport::default(), true)
            .await
            .unwrap();
        assert_eq!(report.intervals, 2);
        assert_eq!(report.inserted_prices, 0);
        assert!(report.zones.is_empty());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_dir_reports_unreadable_files() {
        let dir = std::env::temp_dir().join(format!("entsoe-ingest-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a_prices.csv"), PRICES).unwrap();
        std::fs::write(dir.join("b_generation.csv"), GENERATION).unwrap();
        std::fs::write(dir.join("c_broken.csv"), "foo,bar\n1,2\n").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let repo = Arc::new(InMemoryIntervalRepository::new());
        let report = IntervalIngestor::new(repo.clone())
            .ingest_dir(&dir, false)
            .await
            .unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(report.sources, 2);
        assert_eq!(report.failed_sources.len(), 1);
        assert_eq!(report.inserted_prices, 2);
        assert_eq!(report.inserted_solar, 2);
    }

    #[tokio::test]
    async fn test_generation_imported_after_prices_is_joined() {
        let repo = Arc::new(InMemoryIntervalRepository::new());
        let ingestor = IntervalIngestor::new(repo.clone());

        let (_, prices) = parse_csv(PRICES, "prices.csv").unwrap();
        ingestor
            .ingest_parsed(prices, IngestReport::default(), false)
            .await
            .unwrap();
        let before = repo.load(BiddingZone::DeLu, None).await.unwrap();
        assert!(before.iter().all(|r| r.solar_generation_mwh == 0.0));

        let (_, generation) = parse_csv(GENERATION, "gen.csv").unwrap();
        let report = ingestor
            .ingest_parsed(generation, IngestReport::default(), false)
            .await
            .unwrap();
        // the generation file alone joins into no interval
        assert_eq!(report.intervals, 0);
        assert_eq!(report.inserted_solar, 2);
        assert_eq!(report.zones, vec![BiddingZone::DeLu]);

        let after = repo.load(BiddingZone::DeLu, None).await.unwrap();
        let solar: Vec<f64> = after.iter().map(|r| r.solar_generation_mwh).collect();
        assert_eq!(solar, vec![4.0, 8.0]);
    }

    #[tokio::test]
    async fn test_reimport_touches_no_zone() {
        let repo = Arc::new(InMemoryIntervalRepository::new());
        let ingestor = IntervalIngestor::new(repo.clone());

        let (_, first) = parse_csv(PRICES, "prices.csv").unwrap();
        ingestor.ingest_parsed(first, IngestReport::default(), false).await.unwrap();
        let (_, again) = parse_csv(PRICES, "prices.csv").unwrap();
        let report = ingestor
            .ingest_parsed(again, IngestReport::default(), false)
            .await
            .unwrap();

        assert_eq!(report.inserted_prices, 0);
        assert!(report.zones.is_empty());
    }

    const API_PRICES: &str = r#"<Publication_MarketDocument>
  <TimeSeries>
    <Period>
      <timeInterval><start>2025-06-01T10:00Z</start><end>2025-06-01T12:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><price.amount>60</price.amount></Point>
      <Point><position>2</position><price.amount>-5</price.amount></Point>
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#;

    const API_SOLAR: &str = r#"<GL_MarketDocument>
  <TimeSeries>
    <Period>
      <timeInterval><start>2025-06-01T10:00Z</start><end>2025-06-01T12:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><quantity>4</quantity></Point>
      <Point><position>2</position><quantity>8</quantity></Point>
    </Period>
  </TimeSeries>
</GL_MarketDocument>"#;

    #[tokio::test]
    async fn test_api_ingest_continues_past_failing_zone() {
        use axum::{extract::Query, http::StatusCode, routing::get, Router};
        use chrono::TimeZone;
        use std::collections::HashMap;

        let router = Router::new().route(
            "/api",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let domain = params.get("in_Domain").cloned().unwrap_or_default();
                if domain != BiddingZone::DeLu.eic_code() {
                    return (StatusCode::UNAUTHORIZED, "not allowed".to_string());
                }
                match params.get("documentType").map(String::as_str) {
                    Some("A44") => (StatusCode::OK, API_PRICES.to_string()),
                    _ => (StatusCode::OK, API_SOLAR.to_string()),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let api = EntsoeApiService::new("secret".to_string(), base_url)
            .unwrap()
            .with_retry(1, std::time::Duration::from_millis(1));
        let repo = Arc::new(InMemoryIntervalRepository::new());
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let report = IntervalIngestor::new(repo.clone())
            .ingest_from_api(
                &api,
                &[BiddingZone::Fr, BiddingZone::DeLu],
                start,
                start + chrono::Duration::days(1),
                false,
            )
            .await
            .unwrap();

        assert_eq!(report.sources, 1);
        assert_eq!(report.failed_sources.len(), 1);
        assert!(report.failed_sources[0].starts_with("FR"));
        assert_eq!(report.zones, vec![BiddingZone::DeLu]);

        let records = repo.load(BiddingZone::DeLu, None).await.unwrap();
        let solar: Vec<f64> = records.iter().map(|r| r.solar_generation_mwh).collect();
        assert_eq!(solar, vec![4.0, 8.0]);
        assert_eq!(records[1].price, -5.0);
    }
}
