// src/bin/fetch_entsoe.rs
//
// Usage: cargo run --bin fetch_entsoe -- [ZONE...] [--days N] [--dry-run] [--rebuild]

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_market_backend::config::AppConfig;
use energy_market_backend::models::zone::BiddingZone;
use energy_market_backend::services::entsoe_api::EntsoeApiService;
use energy_market_backend::services::ingestion::IntervalIngestor;
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

    let config = AppConfig::from_env()?;
    let Some(token) = config.entsoe.api_token.clone() else {
        bail!("ENTSOE_API_TOKEN must be set (get one at https://transparency.entsoe.eu/)");
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let rebuild = args.iter().any(|a| a == "--rebuild");
    let day_value = args.iter().position(|a| a == "--days").map(|i| i + 1);
    let days = match day_value {
        Some(i) => args
            .get(i)
            .context("--days needs a value")?
            .parse::<i64>()
            .context("--days must be a whole number")?,
        None => config.entsoe.lookback_days,
    };
    let mut zones = args
        .iter()
        .enumerate()
        .filter(|(i, a)| !a.starts_with("--") && Some(*i) != day_value)
        .map(|(_, a)| a.parse::<BiddingZone>())
        .collect::<Result<Vec<_>, _>>()?;
    if zones.is_empty() {
        zones = config.entsoe.zones.clone();
    }

    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );
    migration::Migrator::up(db.as_ref(), None)
        .await
        .context("Failed to run migrations")?;

    let intervals = Arc::new(SeaOrmIntervalRepository::new(Arc::clone(&db)));
    let api = EntsoeApiService::new(token, config.entsoe.base_url.clone())?;
    let end = Utc::now();
    let start = end - Duration::days(days);

    println!(
        " Fetching {} zone(s), last {} day(s){}...",
        zones.len(),
        days,
        if dry_run { " (dry run)" } else { "" }
    );
    let report = IntervalIngestor::new(intervals.clone())
        .ingest_from_api(&api, &zones, start, end, dry_run)
        .await?;

    println!("\n Fetch complete!");
    println!("    Zones fetched: {}", report.sources);
    println!("    Price points: {} ({} new)", report.price_points, report.inserted_prices);
    println!("    Solar points: {} ({} new)", report.solar_points, report.inserted_solar);
    if report.rejected > 0 {
        println!("    Rejected (malformed): {}", report.rejected);
    }
    for failure in &report.failed_sources {
        println!("    Failed: {}", failure);
    }

    if rebuild && !dry_run && !report.zones.is_empty() {
        println!("\n Rebuilding {} zone(s)...", report.zones.len());
        let store = Arc::new(SeaOrmSummaryStore::new(db));
        let batch = SummaryRebuilder::new(intervals, store, config.rebuild)
            .rebuild_zones(&report.zones, false)
            .await;
        println!("    Zones rebuilt: {}", batch.succeeded());
        if let Some(failures) = batch.failure_summary() {
            println!("    Failed zones: {}", failures);
        }
    }

    Ok(())
}
