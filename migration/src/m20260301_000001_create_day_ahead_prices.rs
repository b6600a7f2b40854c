use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DayAheadPrices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DayAheadPrices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::Zone)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::TimestampStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::Resolution)
                            .string_len(8)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::Price)
                            .decimal_len(12, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Hourly and quarter-hour points may share a start; re-imports hit this and are ignored
        manager
            .create_index(
                Index::create()
                    .name("idx_day_ahead_prices_zone_start_resolution")
                    .table(DayAheadPrices::Table)
                    .col(DayAheadPrices::Zone)
                    .col(DayAheadPrices::TimestampStart)
                    .col(DayAheadPrices::Resolution)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DayAheadPrices::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DayAheadPrices {
    Table,
    Id,
    Zone,
    TimestampStart,
    Resolution,
    Price,
    CreatedAt,
}
