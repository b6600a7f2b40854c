//! Summary API handlers
//!
//! Read-only endpoints over precomputed summaries and daily drill-downs.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::handlers::errors::{bad_request, query_error, store_error, ApiError};
use crate::models::period::{Granularity, PeriodRange, YearMonth};
use crate::models::summary::{
    AggregateResponse, CombinedResponse, DailyDrilldownResponse, PeriodMetricsDto,
    SummaryListResponse, ZonesResponse,
};
use crate::models::zone::BiddingZone;
use crate::AppState;

/// Query parameters shared by the summary list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub zone: Option<String>,
    /// Inclusive, YYYY-MM-DD
    pub from: Option<String>,
    /// Inclusive, YYYY-MM-DD
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    pub zone: Option<String>,
    pub granularity: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub zone: Option<String>,
    /// YYYY-MM
    pub month: Option<String>,
}

pub fn parse_zone(raw: Option<&str>) -> Result<Option<BiddingZone>, ApiError> {
    match raw.map(str::trim).filter(|z| !z.is_empty()) {
        None => Ok(None),
        Some(code) => code
            .parse::<BiddingZone>()
            .map(Some)
            .map_err(|e| bad_request("unknown_zone", e.to_string())),
    }
}

fn parse_date(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|d| !d.is_empty()) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").map(Some).map_err(|_| {
            bad_request(
                "invalid_date",
                format!("Invalid {} date: '{}'. Expected YYYY-MM-DD.", name, value),
            )
        }),
    }
}

pub fn parse_range(from: Option<&str>, to: Option<&str>) -> Result<PeriodRange, ApiError> {
    let range = PeriodRange {
        from: parse_date("from", from)?,
        to: parse_date("to", to)?,
    };
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if from > to {
            return Err(bad_request(
                "invalid_range",
                format!("'from' ({}) is after 'to' ({})", from, to),
            ));
        }
    }
    Ok(range)
}

async fn list_level(
    state: &AppState,
    granularity: Granularity,
    query: &SummaryQuery,
) -> Result<Json<SummaryListResponse>, ApiError> {
    let zone = parse_zone(query.zone.as_deref())?;
    let range = parse_range(query.from.as_deref(), query.to.as_deref())?;

    let rows = state
        .analytics
        .get_aggregate(zone, granularity, range)
        .await
        .map_err(query_error)?;

    Ok(Json(SummaryListResponse::from_rows(&rows)))
}

/// GET /api/zones
pub async fn get_zones(State(state): State<AppState>) -> Result<Json<ZonesResponse>, ApiError> {
    let zones = state.analytics.get_zones().await.map_err(store_error)?;
    Ok(Json(ZonesResponse {
        count: zones.len(),
        zones: zones.iter().map(|z| z.to_string()).collect(),
    }))
}

/// GET /api/summary/total
///
/// All zones combined into one figure, with `?zone=` restricted to one zone.
pub async fn get_summary_total(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<CombinedResponse>, ApiError> {
    let zone = parse_zone(query.zone.as_deref())?;
    let range = parse_range(query.from.as_deref(), query.to.as_deref())?;

    let combined = match zone {
        None => state.analytics.get_combined(Granularity::Total, range).await,
        Some(zone) => state
            .analytics
            .get_aggregate(Some(zone), Granularity::Total, range)
            .await
            .map(|rows| crate::services::analytics::CombinedMetrics {
                zones: vec![zone],
                interval_count: rows.first().map(|r| r.interval_count).unwrap_or(0),
                metrics: rows.first().map(|r| r.metrics).unwrap_or_default(),
            }),
    }
    .map_err(query_error)?;

    Ok(Json(CombinedResponse::from(&combined)))
}

/// GET /api/summary/yearly
pub async fn get_summary_yearly(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryListResponse>, ApiError> {
    list_level(&state, Granularity::Yearly, &query).await
}

/// GET /api/summary/monthly
pub async fn get_summary_monthly(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryListResponse>, ApiError> {
    list_level(&state, Granularity::Monthly, &query).await
}

/// GET /api/summary/daily?zone=DE-LU&month=2025-06
pub async fn get_summary_daily(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<DailyDrilldownResponse>, ApiError> {
    let zone = parse_zone(query.zone.as_deref())?
        .ok_or_else(|| bad_request("missing_zone", "Query parameter 'zone' is required"))?;
    let month_raw = query
        .month
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| bad_request("missing_month", "Query parameter 'month' is required"))?;
    let month: YearMonth = month_raw.parse().map_err(|_| {
        bad_request(
            "invalid_month",
            format!("Invalid month: '{}'. Expected YYYY-MM.", month_raw),
        )
    })?;

    let days = state
        .analytics
        .get_daily_drilldown(zone, month)
        .await
        .map_err(store_error)?;

    Ok(Json(DailyDrilldownResponse {
        zone: zone.to_string(),
        month: month.to_string(),
        data: days.iter().map(PeriodMetricsDto::from).collect(),
    }))
}

/// GET /api/aggregate?zone=&granularity=monthly&from=&to=
pub async fn get_aggregate(
    State(state): State<AppState>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let zone = parse_zone(query.zone.as_deref())?;
    let granularity: Granularity = match query.granularity.as_deref().map(str::trim) {
        None | Some("") => Granularity::Monthly,
        Some(raw) => raw
            .parse()
            .map_err(|e: String| bad_request("unknown_granularity", e))?,
    };
    let range = parse_range(query.from.as_deref(), query.to.as_deref())?;

    let rows = state
        .analytics
        .get_aggregate(zone, granularity, range)
        .await
        .map_err(query_error)?;

    Ok(Json(AggregateResponse {
        zone: zone.map(|z| z.to_string()),
        granularity,
        from: range.from,
        to: range.to,
        data: rows.iter().map(PeriodMetricsDto::from).collect(),
    }))
}
