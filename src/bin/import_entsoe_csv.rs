// src/bin/import_entsoe_csv.rs
//
// Usage: cargo run --bin import_entsoe_csv -- <dir-or-file>... [--dry-run] [--rebuild]

use anyhow::{bail, Context};
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_market_backend::config::AppConfig;
use energy_market_backend::services::ingestion::{list_csv_files, IntervalIngestor};
use energy_market_backend::services::interval_repository::SeaOrmIntervalRepository;
use energy_market_backend::services::summary_rebuild::SummaryRebuilder;
use energy_market_backend::services::summary_store::SeaOrmSummaryStore;

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
    let rebuild = args.iter().any(|a| a == "--rebuild");
    let inputs: Vec<PathBuf> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .collect();
    if inputs.is_empty() {
        bail!("Usage: import_entsoe_csv <dir-or-file>... [--dry-run] [--rebuild]");
    }

    let mut files = Vec::new();
    for input in &inputs {
        if input.is_dir() {
            files.extend(list_csv_files(input)?);
        } else {
            files.push(input.clone());
        }
    }

    let config = AppConfig::from_env()?;
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );
    migration::Migrator::up(db.as_ref(), None)
        .await
        .context("Failed to run migrations")?;

    let intervals = Arc::new(SeaOrmIntervalRepository::new(Arc::clone(&db)));
    let ingestor = IntervalIngestor::new(intervals.clone());

    println!(" Importing {} file(s){}...", files.len(), if dry_run { " (dry run)" } else { "" });
    let report = ingestor.ingest_files(&files, dry_run).await?;

    println!("\n Import complete!");
    println!("    Files read: {}", report.sources);
    println!("    Price rows: {}", report.price_rows);
    println!("    Generation rows: {}", report.generation_rows);
    println!("    Price points: {} ({} new)", report.price_points, report.inserted_prices);
    println!("    Solar points: {} ({} new)", report.solar_points, report.inserted_solar);
    println!("    Intervals: {}", report.intervals);
    println!("    Skipped: {}", report.skipped);
    if report.rejected > 0 {
        println!("    Rejected (malformed): {}", report.rejected);
    }
    for failure in &report.failed_sources {
        println!("    Failed: {}", failure);
    }

    if rebuild && !dry_run {
        println!("\n Rebuilding summaries...");
        let store = Arc::new(SeaOrmSummaryStore::new(db));
        let batch = SummaryRebuilder::new(intervals, store, config.rebuild)
            .rebuild_all(false)
            .await?;
        println!("    Zones rebuilt: {}", batch.succeeded());
        if let Some(failures) = batch.failure_summary() {
            println!("    Failed zones: {}", failures);
        }
    }

    Ok(())
}
