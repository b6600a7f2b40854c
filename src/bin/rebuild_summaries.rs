// src/bin/rebuild_summaries.rs
//
// Usage: cargo run --bin rebuild_summaries -- [ZONE...] [--dry-run]

use anyhow::Context;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_market_backend::config::AppConfig;
use energy_market_backend::models::zone::BiddingZone;
use energy_market_backend::services::interval_repository::SeaOrmIntervalRepository;
use energy_market_backend::services::summary_rebuild::{SummaryRebuilder, ZoneOutcome};
use energy_market_backend::services::summary_store::SeaOrmSummaryStore;
use energy_market_backend::services::sync_status::{self, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,energy_market_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let zones = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(|a| a.parse::<BiddingZone>())
        .collect::<Result<Vec<_>, _>>()?;

    let config = AppConfig::from_env()?;
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );
    migration::Migrator::up(db.as_ref(), None)
        .await
        .context("Failed to run migrations")?;

    let rebuilder = SummaryRebuilder::new(
        Arc::new(SeaOrmIntervalRepository::new(Arc::clone(&db))),
        Arc::new(SeaOrmSummaryStore::new(Arc::clone(&db))),
        config.rebuild.clone(),
    );

    let report = if zones.is_empty() {
        rebuilder.rebuild_all(dry_run).await?
    } else {
        rebuilder.rebuild_zones(&zones, dry_run).await
    };

    for outcome in &report.outcomes {
        match outcome {
            ZoneOutcome::Succeeded { zone, intervals, rows } => {
                println!("    {:<8} ok      {} intervals, {} rows", zone, intervals, rows);
            }
            ZoneOutcome::Failed { zone, error, attempts } => {
                println!("    {:<8} FAILED  after {} attempt(s): {}", zone, attempts, error);
            }
        }
    }
    println!(
        "\n Rebuild {}: {} ok, {} failed",
        report.run_id,
        report.succeeded(),
        report.failed()
    );

    // Partial rebuilds leave other zones untouched, so only full runs count
    if !dry_run && zones.is_empty() {
        let min_interval = i32::try_from(config.rebuild_interval.as_secs()).unwrap_or(i32::MAX);
        let recorded = match report.failure_summary() {
            None => sync_status::record_success(&db, jobs::SUMMARY_REBUILD, &report.run_id, min_interval).await,
            Some(summary) => {
                sync_status::record_failure(
                    &db,
                    jobs::SUMMARY_REBUILD,
                    &report.run_id,
                    &summary,
                    report.failed() as i32,
                    min_interval,
                )
                .await
            }
        };
        recorded?;
    }

    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
