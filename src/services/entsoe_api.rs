//! ENTSO-E transparency platform web API client
//!
//! Fetches day-ahead prices (document A44) and realised solar generation
//! (A75 / A16 / B16) as XML and flattens them into the same raw rows a CSV
//! export yields, so both paths share the normalizer.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::interval::{RawGenerationRecord, RawPriceRecord};
use crate::models::zone::BiddingZone;
use crate::services::normalizer::{parse_timestamp, DAY_AHEAD, SOLAR};

pub const DEFAULT_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const NO_MATCHING_DATA: &str = "No matching data found";
/// Curve type whose points are omitted while the value repeats
const CURVE_VARIABLE_BLOCKS: &str = "A03";
const PSR_SOLAR: &str = "B16";

#[derive(Debug, Deserialize)]
struct MarketDocument {
    #[serde(rename = "TimeSeries", default)]
    time_series: Vec<TimeSeries>,
    #[serde(rename = "Reason", default)]
    reasons: Vec<Reason>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    #[serde(default)]
    code: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(rename = "curveType", default)]
    curve_type: Option<String>,
    #[serde(rename = "classificationSequence_AttributeInstanceComponent.position", default)]
    sequence: Option<String>,
    /// Present on consumption series of a generation document
    #[serde(rename = "outBiddingZone_Domain.mRID", default)]
    out_bidding_zone: Option<IgnoredAny>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "timeInterval")]
    time_interval: TimeInterval,
    resolution: String,
    #[serde(rename = "Point", default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct TimeInterval {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct Point {
    position: u32,
    #[serde(rename = "price.amount", default)]
    price: Option<String>,
    #[serde(default)]
    quantity: Option<String>,
}

/// API timestamp format, `yyyyMMddHHmm` in UTC
pub fn format_period(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d%H%M").to_string()
}

/// Step between points: `PT15M`, `PT60M`, `PT1H` and the like
fn resolution_step(code: &str) -> Option<Duration> {
    let rest = code.trim().strip_prefix("PT")?;
    let amount = |digits: &str| digits.parse::<i64>().ok().filter(|n| *n > 0);
    if let Some(minutes) = rest.strip_suffix('M') {
        amount(minutes).map(Duration::minutes)
    } else if let Some(hours) = rest.strip_suffix('H') {
        amount(hours).map(Duration::hours)
    } else {
        None
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, FetchError> {
    parse_timestamp(raw).map_err(|_| FetchError::Interval(raw.to_string()))
}

/// `(timestamp, value)` per point of a period. Positions start at 1. With
/// `fill_forward` every slot up to the period end repeats the last value.
fn expand_period<'a>(
    period: &'a Period,
    fill_forward: bool,
    value: impl Fn(&'a Point) -> Option<&'a str>,
) -> Result<Vec<(DateTime<Utc>, &'a str)>, FetchError> {
    let Some(step) = resolution_step(&period.resolution) else {
        warn!(resolution = %period.resolution, "Skipping period with unsupported resolution");
        return Ok(Vec::new());
    };
    let start = parse_instant(&period.time_interval.start)?;
    let end = parse_instant(&period.time_interval.end)?;
    if end <= start {
        return Err(FetchError::Interval(format!(
            "{}/{}",
            period.time_interval.start, period.time_interval.end
        )));
    }

    let mut points: Vec<(u32, &str)> = period
        .points
        .iter()
        .filter(|p| p.position >= 1)
        .filter_map(|p| value(p).map(|v| (p.position, v.trim())))
        .collect();
    points.sort_by_key(|(position, _)| *position);

    let at = |position: u32| start + step * (position as i32 - 1);

    if !fill_forward {
        return Ok(points.into_iter().map(|(pos, v)| (at(pos), v)).collect());
    }

    let slots = ((end - start).num_seconds() / step.num_seconds()) as u32;
    let mut expanded = Vec::with_capacity(slots as usize);
    let mut pending = points.into_iter().peekable();
    let mut current = None;
    for position in 1..=slots {
        while let Some((_, v)) = pending.next_if(|(pos, _)| *pos <= position) {
            current = Some(v);
        }
        if let Some(v) = current {
            expanded.push((at(position), v));
        }
    }
    Ok(expanded)
}

fn timestamp_text(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_document(xml: &str) -> Result<MarketDocument, FetchError> {
    let document: MarketDocument = quick_xml::de::from_str(xml)?;
    for reason in &document.reasons {
        debug!(code = %reason.code, text = %reason.text, "ENTSO-E acknowledgement");
    }
    Ok(document)
}

/// Rows of a `Publication_MarketDocument` (A44) for `zone`
pub fn parse_price_document(xml: &str, zone: BiddingZone) -> Result<Vec<RawPriceRecord>, FetchError> {
    let document = parse_document(xml)?;
    let mut rows = Vec::new();

    for series in &document.time_series {
        let fill = series.curve_type.as_deref() == Some(CURVE_VARIABLE_BLOCKS);
        for period in &series.periods {
            for (ts, price) in expand_period(period, fill, |p| p.price.as_deref())? {
                rows.push(RawPriceRecord {
                    line: None,
                    area: zone.as_str().to_string(),
                    timestamp: timestamp_text(ts),
                    resolution: period.resolution.trim().to_string(),
                    contract_type: Some(DAY_AHEAD.to_string()),
                    sequence: series.sequence.clone(),
                    price: Some(price.to_string()),
                });
            }
        }
    }
    Ok(rows)
}

/// Solar rows of a `GL_MarketDocument` (A75, psrType B16) for `zone`.
/// Consumption series are left out.
pub fn parse_generation_document(
    xml: &str,
    zone: BiddingZone,
) -> Result<Vec<RawGenerationRecord>, FetchError> {
    let document = parse_document(xml)?;
    let mut rows = Vec::new();

    for series in document.time_series.iter().filter(|s| s.out_bidding_zone.is_none()) {
        let fill = series.curve_type.as_deref() == Some(CURVE_VARIABLE_BLOCKS);
        for period in &series.periods {
            for (ts, quantity) in expand_period(period, fill, |p| p.quantity.as_deref())? {
                rows.push(RawGenerationRecord {
                    line: None,
                    area: zone.as_str().to_string(),
                    timestamp: timestamp_text(ts),
                    resolution: period.resolution.trim().to_string(),
                    production_type: SOLAR.to_string(),
                    output_mw: Some(quantity.to_string()),
                });
            }
        }
    }
    Ok(rows)
}

#[derive(Clone)]
pub struct EntsoeApiService {
    client: Client,
    token: String,
    base_url: String,
    max_retries: u32,
    retry_base_delay: std::time::Duration,
}

impl EntsoeApiService {
    pub fn new(token: String, base_url: String) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            token,
            base_url,
            max_retries: 3,
            retry_base_delay: std::time::Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay: std::time::Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    pub async fn fetch_day_ahead_prices(
        &self,
        zone: BiddingZone,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawPriceRecord>, FetchError> {
        let (period_start, period_end) = (format_period(start), format_period(end));
        let params = [
            ("documentType", "A44"),
            ("in_Domain", zone.eic_code()),
            ("out_Domain", zone.eic_code()),
            ("periodStart", period_start.as_str()),
            ("periodEnd", period_end.as_str()),
        ];

        let Some(xml) = self.fetch_document(zone, &params).await? else {
            return Ok(Vec::new());
        };
        let rows = parse_price_document(&xml, zone)?;
        info!(zone = %zone, rows = rows.len(), "Fetched day-ahead prices");
        Ok(rows)
    }

    pub async fn fetch_solar_generation(
        &self,
        zone: BiddingZone,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawGenerationRecord>, FetchError> {
        let (period_start, period_end) = (format_period(start), format_period(end));
        let params = [
            ("documentType", "A75"),
            ("processType", "A16"),
            ("psrType", PSR_SOLAR),
            ("in_Domain", zone.eic_code()),
            ("periodStart", period_start.as_str()),
            ("periodEnd", period_end.as_str()),
        ];

        let Some(xml) = self.fetch_document(zone, &params).await? else {
            return Ok(Vec::new());
        };
        let rows = parse_generation_document(&xml, zone)?;
        info!(zone = %zone, rows = rows.len(), "Fetched solar generation");
        Ok(rows)
    }

    /// Document body, or `None` when the platform has no data for the query.
    /// Retries with exponential backoff.
    async fn fetch_document(
        &self,
        zone: BiddingZone,
        params: &[(&str, &str)],
    ) -> Result<Option<String>, FetchError> {
        let document_type = params
            .iter()
            .find(|(k, _)| *k == "documentType")
            .map(|(_, v)| *v)
            .unwrap_or_default();
        let mut delay = self.retry_base_delay;

        for attempt in 1..=self.max_retries {
            match self.send(params).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "Retry {}/{} for {} {}. Waiting {:?}: {}",
                        attempt, self.max_retries, document_type, zone, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(FetchError::Status {
            status: 0,
            body: "max retries exceeded".to_string(),
        })
    }

    async fn send(&self, params: &[(&str, &str)]) -> Result<Option<String>, FetchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("securityToken", self.token.as_str())])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(Some(body));
        }
        if body.contains(NO_MATCHING_DATA) {
            debug!(status = status.as_u16(), "No matching data");
            return Ok(None);
        }
        Err(FetchError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PRICE_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Publication_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:3">
  <mRID>abc</mRID>
  <type>A44</type>
  <TimeSeries>
    <mRID>1</mRID>
    <in_Domain.mRID codingScheme="A01">10Y1001A1001A82H</in_Domain.mRID>
    <out_Domain.mRID codingScheme="A01">10Y1001A1001A82H</out_Domain.mRID>
    <currency_Unit.name>EUR</currency_Unit.name>
    <curveType>A01</curveType>
    <classificationSequence_AttributeInstanceComponent.position>1</classificationSequence_AttributeInstanceComponent.position>
    <Period>
      <timeInterval>
        <start>2025-06-01T22:00Z</start>
        <end>2025-06-01T23:00Z</end>
      </timeInterval>
      <resolution>PT15M</resolution>
      <Point><position>1</position><price.amount>95.01</price.amount></Point>
      <Point><position>2</position><price.amount>-3.5</price.amount></Point>
      <Point><position>4</position><price.amount>12</price.amount></Point>
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#;

    const VARIABLE_BLOCKS_DOC: &str = r#"<Publication_MarketDocument>
  <TimeSeries>
    <curveType>A03</curveType>
    <Period>
      <timeInterval><start>2025-06-01T00:00Z</start><end>2025-06-01T04:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><price.amount>10</price.amount></Point>
      <Point><position>3</position><price.amount>30</price.amount></Point>
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#;

    const GENERATION_DOC: &str = r#"<GL_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-6:generationloaddocument:3:0">
  <TimeSeries>
    <inBiddingZone_Domain.mRID codingScheme="A01">10YFR-RTE------C</inBiddingZone_Domain.mRID>
    <curveType>A01</curveType>
    <MktPSRType><psrType>B16</psrType></MktPSRType>
    <Period>
      <timeInterval><start>2025-06-01T10:00Z</start><end>2025-06-01T12:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><quantity>4200</quantity></Point>
      <Point><position>2</position><quantity>4800</quantity></Point>
    </Period>
  </TimeSeries>
  <TimeSeries>
    <outBiddingZone_Domain.mRID codingScheme="A01">10YFR-RTE------C</outBiddingZone_Domain.mRID>
    <curveType>A01</curveType>
    <Period>
      <timeInterval><start>2025-06-01T10:00Z</start><end>2025-06-01T11:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><quantity>7</quantity></Point>
    </Period>
  </TimeSeries>
</GL_MarketDocument>"#;

    const ACKNOWLEDGEMENT_DOC: &str = r#"<Acknowledgement_MarketDocument>
  <mRID>x</mRID>
  <Reason>
    <code>999</code>
    <text>No matching data found for Data item Day-ahead Prices</text>
  </Reason>
</Acknowledgement_MarketDocument>"#;

    #[test]
    fn test_format_period() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 22, 15, 0).unwrap();
        assert_eq!(format_period(ts), "202506012215");
    }

    #[test]
    fn test_resolution_step() {
        assert_eq!(resolution_step("PT15M"), Some(Duration::minutes(15)));
        assert_eq!(resolution_step("PT60M"), Some(Duration::minutes(60)));
        assert_eq!(resolution_step("PT1H"), Some(Duration::hours(1)));
        assert_eq!(resolution_step("P1D"), None);
        assert_eq!(resolution_step("PT0M"), None);
        assert_eq!(resolution_step("PT"), None);
    }

    #[test]
    fn test_price_points_are_placed_by_position() {
        let rows = parse_price_document(PRICE_DOC, BiddingZone::DeLu).unwrap();

        let stamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec!["2025-06-01 22:00:00", "2025-06-01 22:15:00", "2025-06-01 22:45:00"]
        );
        assert_eq!(rows[1].price.as_deref(), Some("-3.5"));
        assert_eq!(rows[0].area, "DE-LU");
        assert_eq!(rows[0].resolution, "PT15M");
        assert_eq!(rows[0].contract_type.as_deref(), Some(DAY_AHEAD));
        assert_eq!(rows[0].sequence.as_deref(), Some("1"));
    }

    #[test]
    fn test_variable_blocks_repeat_until_period_end() {
        let rows = parse_price_document(VARIABLE_BLOCKS_DOC, BiddingZone::Fr).unwrap();

        let prices: Vec<&str> = rows.iter().filter_map(|r| r.price.as_deref()).collect();
        assert_eq!(prices, vec!["10", "10", "30", "30"]);
        assert_eq!(rows[3].timestamp, "2025-06-01 03:00:00");
    }

    #[test]
    fn test_generation_skips_consumption_series() {
        let rows = parse_generation_document(GENERATION_DOC, BiddingZone::Fr).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.production_type == SOLAR));
        assert_eq!(rows[1].output_mw.as_deref(), Some("4800"));
        assert_eq!(rows[1].timestamp, "2025-06-01 11:00:00");
    }

    #[test]
    fn test_acknowledgement_has_no_rows() {
        assert!(parse_price_document(ACKNOWLEDGEMENT_DOC, BiddingZone::Nl).unwrap().is_empty());
    }

    #[test]
    fn test_inverted_period_is_an_error() {
        let doc = VARIABLE_BLOCKS_DOC.replace("2025-06-01T04:00Z", "2025-05-31T04:00Z");
        let err = parse_price_document(&doc, BiddingZone::Fr).unwrap_err();
        assert!(matches!(err, FetchError::Interval(_)));
    }

    #[test]
    fn test_fetched_rows_normalize_like_csv_rows() {
        let rows = parse_price_document(PRICE_DOC, BiddingZone::DeLu).unwrap();
        let batch = crate::services::normalizer::normalize(&rows, &[]);

        assert_eq!(batch.prices.len(), 3);
        assert!(batch.rejected.is_empty());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let router = Router::new().route(
            "/api",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let seen = Arc::clone(&seen);
                async move {
                    assert_eq!(params.get("securityToken").map(String::as_str), Some("secret"));
                    assert_eq!(params.get("documentType").map(String::as_str), Some("A44"));
                    assert_eq!(
                        params.get("in_Domain").map(String::as_str),
                        Some("10Y1001A1001A82H")
                    );
                    assert_eq!(params.get("periodStart").map(String::as_str), Some("202506012200"));
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
                    } else {
                        (StatusCode::OK, PRICE_DOC.to_string())
                    }
                }
            }),
        );
        let base_url = serve(router).await;

        let api = EntsoeApiService::new("secret".to_string(), base_url)
            .unwrap()
            .with_retry(3, std::time::Duration::from_millis(1));
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap();
        let rows = api
            .fetch_day_ahead_prices(BiddingZone::DeLu, start, start + Duration::days(1))
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_client_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let router = Router::new().route(
            "/api",
            get(move || {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::UNAUTHORIZED, "invalid token")
                }
            }),
        );
        let base_url = serve(router).await;

        let api = EntsoeApiService::new("wrong".to_string(), base_url)
            .unwrap()
            .with_retry(3, std::time::Duration::from_millis(1));
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let err = api
            .fetch_solar_generation(BiddingZone::Fr, start, start + Duration::days(1))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 401, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_matching_data_is_empty() {
        let router = Router::new().route(
            "/api",
            get(|| async { (StatusCode::BAD_REQUEST, ACKNOWLEDGEMENT_DOC) }),
        );
        let base_url = serve(router).await;

        let api = EntsoeApiService::new("secret".to_string(), base_url).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let rows = api
            .fetch_day_ahead_prices(BiddingZone::Nl, start, start + Duration::days(1))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
