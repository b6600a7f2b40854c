//! Sync status service for tracking last successful batch runs
//!
//! Prevents a restart from redoing a rebuild that completed recently.

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::sync_status::{self, Entity as SyncStatus};
use crate::error::StoreError;

/// Job names for tracking sync status
pub mod jobs {
    pub const SUMMARY_REBUILD: &str = "summary_rebuild";
    pub const INTERVAL_INGEST: &str = "interval_ingest";
}

/// Default minimum intervals between runs (in seconds)
pub mod intervals {
    pub const SUMMARY_REBUILD: i32 = 86400; // 24 hours, day-ahead results publish once a day
    pub const INTERVAL_INGEST: i32 = 3600;
}

/// Outcome of one batch run, as persisted
#[derive(Debug, Clone)]
pub struct RunRecord<'a> {
    pub run_id: &'a str,
    pub zones_failed: i32,
    pub error: Option<&'a str>,
}

/// Whether `min_interval_secs` has elapsed since `last_success`
pub fn is_due(last_success: Option<NaiveDateTime>, min_interval_secs: i32, now: NaiveDateTime) -> bool {
    match last_success {
        None => true,
        Some(last) => now.signed_duration_since(last) >= Duration::seconds(min_interval_secs as i64),
    }
}

async fn find(db: &DatabaseConnection, job_name: &str) -> Result<Option<sync_status::Model>, StoreError> {
    Ok(SyncStatus::find()
        .filter(sync_status::Column::JobName.eq(job_name))
        .one(db)
        .await?)
}

/// Check if a job should run based on its last successful run
pub async fn should_sync(db: &DatabaseConnection, job_name: &str) -> Result<bool, StoreError> {
    let Some(record) = find(db, job_name).await? else {
        tracing::info!(job = job_name, "First run detected, will sync");
        return Ok(true);
    };

    let now = Utc::now().naive_utc();
    let due = is_due(record.last_success_at, record.min_interval_secs, now);

    match record.last_success_at {
        None => tracing::info!(job = job_name, "No previous successful run, will sync"),
        Some(last) => {
            let elapsed = now.signed_duration_since(last).num_seconds();
            if due {
                tracing::info!(
                    job = job_name,
                    elapsed_secs = elapsed,
                    min_interval_secs = record.min_interval_secs,
                    "Last run is stale, will sync"
                );
            } else {
                tracing::info!(
                    job = job_name,
                    elapsed_secs = elapsed,
                    next_in_secs = record.min_interval_secs as i64 - elapsed,
                    "Skipping sync, last run is recent"
                );
            }
        }
    }

    Ok(due)
}

/// Record a run in which every zone succeeded
pub async fn record_success(
    db: &DatabaseConnection,
    job_name: &str,
    run_id: &str,
    default_interval_secs: i32,
) -> Result<(), StoreError> {
    let run = RunRecord {
        run_id,
        zones_failed: 0,
        error: None,
    };
    record_run(db, job_name, &run, default_interval_secs).await?;
    tracing::debug!(job = job_name, run_id, "Recorded successful run");
    Ok(())
}

/// Record a run that failed entirely or for some zones
pub async fn record_failure(
    db: &DatabaseConnection,
    job_name: &str,
    run_id: &str,
    error: &str,
    zones_failed: i32,
    default_interval_secs: i32,
) -> Result<(), StoreError> {
    let run = RunRecord {
        run_id,
        zones_failed,
        error: Some(error),
    };
    record_run(db, job_name, &run, default_interval_secs).await?;
    tracing::debug!(job = job_name, run_id, error, "Recorded failed run");
    Ok(())
}

async fn record_run(
    db: &DatabaseConnection,
    job_name: &str,
    run: &RunRecord<'_>,
    default_interval_secs: i32,
) -> Result<(), StoreError> {
    let now = Utc::now().naive_utc();
    let succeeded = run.error.is_none();

    match find(db, job_name).await? {
        Some(record) => {
            let (success_count, error_count) = (record.success_count, record.error_count);
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.last_attempt_at = Set(Some(now));
            active_model.last_run_id = Set(Some(run.run_id.to_string()));
            active_model.zones_failed = Set(run.zones_failed);
            active_model.last_error = Set(run.error.map(str::to_string));
            if succeeded {
                active_model.last_success_at = Set(Some(now));
                active_model.success_count = Set(success_count + 1);
            } else {
                active_model.error_count = Set(error_count + 1);
            }
            active_model.update(db).await?;
        }
        None => {
            let new_record = sync_status::ActiveModel {
                job_name: Set(job_name.to_string()),
                last_success_at: Set(succeeded.then_some(now)),
                last_attempt_at: Set(Some(now)),
                last_error: Set(run.error.map(str::to_string)),
                last_run_id: Set(Some(run.run_id.to_string())),
                zones_failed: Set(run.zones_failed),
                success_count: Set(succeeded as i64),
                error_count: Set((!succeeded) as i64),
                min_interval_secs: Set(default_interval_secs),
                ..Default::default()
            };
            new_record.insert(db).await?;
        }
    }
    Ok(())
}

/// Update the minimum interval for a job
pub async fn set_min_interval(
    db: &DatabaseConnection,
    job_name: &str,
    interval_secs: i32,
) -> Result<(), StoreError> {
    match find(db, job_name).await? {
        Some(record) => {
            if record.min_interval_secs == interval_secs {
                return Ok(());
            }
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.min_interval_secs = Set(interval_secs);
            active_model.update(db).await?;
        }
        None => {
            let new_record = sync_status::ActiveModel {
                job_name: Set(job_name.to_string()),
                min_interval_secs: Set(interval_secs),
                zones_failed: Set(0),
                success_count: Set(0),
                error_count: Set(0),
                ..Default::default()
            };
            new_record.insert(db).await?;
        }
    }

    tracing::info!(job = job_name, interval_secs, "Set min interval");
    Ok(())
}
