//! Health and maintenance endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::handlers::errors::{store_error, ApiError};
use crate::handlers::summary::parse_zone;
use crate::models::summary::HealthResponse;
use crate::services::summary_rebuild::BatchReport;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RebuildQuery {
    /// Rebuild one zone only
    pub zone: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// GET /health
///
/// 200 when the summary store answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.analytics.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: "connected".to_string(),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: e.to_string(),
                }),
            )
        }
    }
}

/// POST /admin/rebuild-summaries
///
/// Runs the rebuild batch synchronously and returns its per-zone report.
pub async fn rebuild_summaries(
    State(state): State<AppState>,
    Query(query): Query<RebuildQuery>,
) -> Result<Json<BatchReport>, ApiError> {
    let zone = parse_zone(query.zone.as_deref())?;
    tracing::info!(zone = ?zone, dry_run = query.dry_run, "Rebuild requested");

    let report = state
        .run_rebuild(zone.map(|z| vec![z]), query.dry_run)
        .await
        .map_err(store_error)?;

    Ok(Json(report))
}
