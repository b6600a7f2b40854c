pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_day_ahead_prices;
mod m20260301_000002_create_period_summaries;
mod m20260301_000003_create_sync_status;
mod m20260301_000004_create_solar_generation;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_day_ahead_prices::Migration),
            Box::new(m20260301_000002_create_period_summaries::Migration),
            Box::new(m20260301_000003_create_sync_status::Migration),
            Box::new(m20260301_000004_create_solar_generation::Migration),
        ]
    }
}
