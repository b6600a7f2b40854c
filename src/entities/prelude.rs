pub use super::day_ahead_prices::Entity as DayAheadPrices;
pub use super::period_summaries::Entity as PeriodSummaries;
pub use super::solar_generation::Entity as SolarGeneration;
pub use super::sync_status::Entity as SyncStatus;
