// src/lib.rs

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use error::StoreError;
use models::zone::BiddingZone;
use services::{analytics::AnalyticsService, summary_rebuild::{BatchReport, SummaryRebuilder}};

#[derive(Clone)]
pub struct AppState {
    pub analytics: Arc<AnalyticsService>,
    pub rebuilder: Arc<SummaryRebuilder>,
}

impl AppState {
    /// Rebuilds the given zones (all zones with data when `None`) and drops
    /// cached drill-downs afterwards
    pub async fn run_rebuild(
        &self,
        zones: Option<Vec<BiddingZone>>,
        dry_run: bool,
    ) -> Result<BatchReport, StoreError> {
        let report = match zones {
            Some(zones) => self.rebuilder.rebuild_zones(&zones, dry_run).await,
            None => self.rebuilder.rebuild_all(dry_run).await?,
        };
        if !dry_run {
            self.analytics.invalidate_drilldowns().await;
        }
        Ok(report)
    }
}

/// HTTP routes of the service
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::admin::health))
        .route("/api/zones", get(handlers::summary::get_zones))
        .route("/api/summary/total", get(handlers::summary::get_summary_total))
        .route("/api/summary/yearly", get(handlers::summary::get_summary_yearly))
        .route("/api/summary/monthly", get(handlers::summary::get_summary_monthly))
        .route("/api/summary/daily", get(handlers::summary::get_summary_daily))
        .route("/api/aggregate", get(handlers::summary::get_aggregate))
        .route("/admin/rebuild-summaries", post(handlers::admin::rebuild_summaries))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub mod config;
pub mod error;

pub mod entities {
    pub mod prelude;
    pub mod day_ahead_prices;
    pub mod period_summaries;
    pub mod solar_generation;
    pub mod sync_status;
}

pub mod services {
    pub mod aggregator;
    pub mod analytics;
    pub mod capture_metrics;
    pub mod entsoe_api;
    pub mod ingestion;
    pub mod interval_repository;
    pub mod normalizer;
    pub mod numeric;
    pub mod summary_rebuild;
    pub mod summary_store;
    pub mod sync_status;
}

pub mod models {
    pub mod interval;
    pub mod period;
    pub mod summary;
    pub mod zone;
}

pub mod handlers {
    pub mod admin;
    pub mod errors;
    pub mod summary;
}

pub mod jobs {
    pub mod interval_ingest_job;
    pub mod summary_rebuild_job;
}
