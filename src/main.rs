use anyhow::Context;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_market_backend::config::AppConfig;
use energy_market_backend::jobs::interval_ingest_job::start_interval_ingest_job;
use energy_market_backend::jobs::summary_rebuild_job::start_summary_rebuild_job;
use energy_market_backend::services::analytics::AnalyticsService;
use energy_market_backend::services::entsoe_api::EntsoeApiService;
use energy_market_backend::services::ingestion::IntervalIngestor;
use energy_market_backend::services::interval_repository::SeaOrmIntervalRepository;
use energy_market_backend::services::summary_rebuild::SummaryRebuilder;
use energy_market_backend::services::summary_store::SeaOrmSummaryStore;
use energy_market_backend::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,energy_market_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    // Connect to database
    tracing::info!("Connecting to database...");
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(db.as_ref(), None)
        .await
        .context("Failed to run migrations")?;

    let intervals = Arc::new(SeaOrmIntervalRepository::new(Arc::clone(&db)));
    let store = Arc::new(SeaOrmSummaryStore::new(Arc::clone(&db)));

    let state = AppState {
        analytics: Arc::new(AnalyticsService::new(
            store.clone(),
            intervals.clone(),
            config.rebuild.store_daily,
            config.drilldown_cache_ttl,
        )),
        rebuilder: Arc::new(SummaryRebuilder::new(intervals.clone(), store, config.rebuild.clone())),
    };

    start_summary_rebuild_job(
        Arc::clone(&db),
        state.clone(),
        config.rebuild_interval,
        config.rebuild_dry_run,
    )
    .await;

    match config.entsoe.api_token.clone() {
        Some(token) => {
            let api = EntsoeApiService::new(token, config.entsoe.base_url.clone())
                .context("Failed to build ENTSO-E client")?;
            start_interval_ingest_job(
                Arc::clone(&db),
                state.clone(),
                Arc::new(IntervalIngestor::new(intervals)),
                api,
                config.entsoe.clone(),
            )
            .await;
        }
        None => tracing::info!("ENTSOE_API_TOKEN not set, interval ingest job disabled"),
    }

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down server");
        })
        .await?;

    Ok(())
}
