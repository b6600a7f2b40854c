//! Summary Rebuild Job
//!
//! Periodically recomputes all summaries from the stored intervals.
//! Consults `sync_status` so a restart does not repeat a fresh rebuild, and
//! stops on SIGINT.

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::services::summary_rebuild::BatchReport;
use crate::services::sync_status::{self, jobs};
use crate::AppState;

/// Environment variable for the rebuild interval
pub const ENV_REBUILD_INTERVAL: &str = crate::config::ENV_REBUILD_INTERVAL;

/// Environment variable for dry run mode
pub const ENV_DRY_RUN: &str = crate::config::ENV_REBUILD_DRY_RUN;

/// Start the summary rebuild job
///
/// # Arguments
///
/// * `db` - Connection holding the `sync_status` table
/// * `state` - Shared services; the rebuild invalidates their drill-down cache
/// * `every` - Interval between runs (`REBUILD_INTERVAL_SECS`)
/// * `dry_run` - Aggregate and log without writing (`REBUILD_DRY_RUN`)
pub async fn start_summary_rebuild_job(
    db: Arc<DatabaseConnection>,
    state: AppState,
    every: Duration,
    dry_run: bool,
) {
    tokio::spawn(async move {
        let min_interval_secs = i32::try_from(every.as_secs()).unwrap_or(i32::MAX);

        info!(
            interval_secs = every.as_secs(),
            dry_run,
            "Initializing summary rebuild job"
        );

        if let Err(e) = sync_status::set_min_interval(&db, jobs::SUMMARY_REBUILD, min_interval_secs).await {
            warn!(error = %e, "Failed to store rebuild interval");
        }

        let mut ticker = interval(every.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping summary rebuild job gracefully");
                    break;
                }
                _ = ticker.tick() => {
                    match sync_status::should_sync(&db, jobs::SUMMARY_REBUILD).await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Skipping summary rebuild (recently rebuilt)");
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to check sync status, rebuilding anyway");
                        }
                    }

                    run_once(&db, &state, dry_run, min_interval_secs).await;
                }
            }
        }

        info!("Summary rebuild job stopped");
    });
}

/// One rebuild pass with its bookkeeping. Dry runs are not recorded.
pub async fn run_once(
    db: &DatabaseConnection,
    state: &AppState,
    dry_run: bool,
    min_interval_secs: i32,
) -> Option<BatchReport> {
    info!(dry_run, "Starting scheduled summary rebuild");

    let report = match state.run_rebuild(None, dry_run).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Summary rebuild could not start");
            if !dry_run {
                record_failure(db, "-", &e.to_string(), 0, min_interval_secs).await;
            }
            return None;
        }
    };

    if dry_run {
        info!(rows = report.rows_written(), "DRY RUN: summary rebuild not recorded");
        return Some(report);
    }

    match report.failure_summary() {
        None => {
            if let Err(e) =
                sync_status::record_success(db, jobs::SUMMARY_REBUILD, &report.run_id, min_interval_secs).await
            {
                warn!(error = %e, "Failed to record rebuild success");
            }
        }
        Some(summary) => {
            error!(
                run_id = %report.run_id,
                failed = report.failed(),
                "Summary rebuild finished with failed zones"
            );
            record_failure(db, &report.run_id, &summary, report.failed() as i32, min_interval_secs).await;
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
        jobs::SUMMARY_REBUILD,
        run_id,
        error,
        zones_failed,
        min_interval_secs,
    )
    .await
    {
        warn!(error = %e, "Failed to record rebuild failure");
    }
}
