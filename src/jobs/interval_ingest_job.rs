//! Interval Ingest Job
//!
//! Periodically pulls the last `INGEST_LOOKBACK_DAYS` of prices and solar
//! output from the ENTSO-E web API, then rebuilds the summaries of the zones
//! that received new points. Re-fetching overlapping windows is harmless:
//! points already stored are kept as they are.

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::EntsoeConfig;
use crate::services::entsoe_api::EntsoeApiService;
use crate::services::ingestion::{IngestReport, IntervalIngestor};
use crate::services::sync_status::{self, jobs};
use crate::AppState;

/// Start the interval ingest job
///
/// # Arguments
///
/// * `db` - Connection holding the `sync_status` table
/// * `state` - Shared services; zones with new points are rebuilt through it
/// * `ingestor` - Appends fetched rows to the interval repository
/// * `api` - ENTSO-E client
/// * `config` - Zones, lookback window and interval (`INGEST_INTERVAL_SECS`)
pub async fn start_interval_ingest_job(
    db: Arc<DatabaseConnection>,
    state: AppState,
    ingestor: Arc<IntervalIngestor>,
    api: EntsoeApiService,
    config: EntsoeConfig,
) {
    tokio::spawn(async move {
        let every = config.ingest_interval;
        let min_interval_secs = i32::try_from(every.as_secs()).unwrap_or(i32::MAX);

        info!(
            interval_secs = every.as_secs(),
            zones = config.zones.len(),
            lookback_days = config.lookback_days,
            "Initializing interval ingest job"
        );

        if let Err(e) = sync_status::set_min_interval(&db, jobs::INTERVAL_INGEST, min_interval_secs).await {
            warn!(error = %e, "Failed to store ingest interval");
        }

        let mut ticker = interval(every.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping interval ingest job gracefully");
                    break;
                }
                _ = ticker.tick() => {
                    match sync_status::should_sync(&db, jobs::INTERVAL_INGEST).await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Skipping interval ingest (recently fetched)");
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to check sync status, fetching anyway");
                        }
                    }

                    run_once(&db, &state, &ingestor, &api, &config, min_interval_secs).await;
                }
            }
        }

        info!("Interval ingest job stopped");
    });
}

/// One fetch pass with its bookkeeping, followed by a rebuild of the
/// zones that changed
pub async fn run_once(
    db: &DatabaseConnection,
    state: &AppState,
    ingestor: &IntervalIngestor,
    api: &EntsoeApiService,
    config: &EntsoeConfig,
    min_interval_secs: i32,
) -> Option<IngestReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let end = Utc::now();
    let start = end - ChronoDuration::days(config.lookback_days);
    info!(run_id = %run_id, "Starting scheduled interval ingest");

    let report = match ingestor.ingest_from_api(api, &config.zones, start, end, false).await {
        Ok(report) => report,
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Interval ingest failed");
            record_failure(db, &run_id, &e.to_string(), config.zones.len() as i32, min_interval_secs).await;
            return None;
        }
    };

    if report.failed_sources.is_empty() {
        if let Err(e) =
            sync_status::record_success(db, jobs::INTERVAL_INGEST, &run_id, min_interval_secs).await
        {
            warn!(error = %e, "Failed to record ingest success");
        }
    } else {
        error!(
            run_id = %run_id,
            failed = report.failed_sources.len(),
            "Interval ingest finished with failed zones"
        );
        record_failure(
            db,
            &run_id,
            &report.failed_sources.join("; "),
            report.failed_sources.len() as i32,
            min_interval_secs,
        )
        .await;
    }

    if !report.zones.is_empty() {
        match state.run_rebuild(Some(report.zones.clone()), false).await {
            Ok(rebuild) => info!(
                zones = report.zones.len(),
                rows = rebuild.rows_written(),
                "Rebuilt summaries of ingested zones"
            ),
            Err(e) => error!(error = %e, "Rebuild after ingest could not start"),
        }
    }

    Some(report)
}

async fn record_failure(
    db: &DatabaseConnection,
    run_id: &str,
    error: &str,
    zones_failed: i32,
    min_interval_secs: i32,
) {
    if let Err(e) = sync_status::record_failure(
        db,
        jobs::INTERVAL_INGEST,
        run_id,
        error,
        zones_failed,
        min_interval_secs,
    )
    .await
    {
        warn!(error = %e, "Failed to record ingest failure");
    }
}
