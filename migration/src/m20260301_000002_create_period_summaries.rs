use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

fn sum_column(col: PeriodSummaries) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(24, 6)
        .not_null()
        .default(0)
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PeriodSummaries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PeriodSummaries::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PeriodSummaries::Zone)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PeriodSummaries::Granularity)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PeriodSummaries::PeriodStart)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PeriodSummaries::IntervalCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(sum_column(PeriodSummaries::DurationHours))
                    .col(sum_column(PeriodSummaries::PriceDuration))
                    .col(sum_column(PeriodSummaries::NegativePriceHours))
                    .col(sum_column(PeriodSummaries::SolarMwh))
                    .col(sum_column(PeriodSummaries::PriceSolar))
                    .col(sum_column(PeriodSummaries::FloorPriceSolar))
                    .col(sum_column(PeriodSummaries::SolarAtNegativeMwh))
                    .col(
                        ColumnDef::new(PeriodSummaries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert target
        manager
            .create_index(
                Index::create()
                    .name("idx_period_summaries_key")
                    .table(PeriodSummaries::Table)
                    .col(PeriodSummaries::Zone)
                    .col(PeriodSummaries::Granularity)
                    .col(PeriodSummaries::PeriodStart)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Cross-zone scans of one granularity
        manager
            .create_index(
                Index::create()
                    .name("idx_period_summaries_granularity_start")
                    .table(PeriodSummaries::Table)
                    .col(PeriodSummaries::Granularity)
                    .col(PeriodSummaries::PeriodStart)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PeriodSummaries::Table).to_owned())
            .await
    }
}

#[derive(Iden, Clone, Copy)]
enum PeriodSummaries {
    Table,
    Id,
    Zone,
    Granularity,
    PeriodStart,
    IntervalCount,
    DurationHours,
    PriceDuration,
    NegativePriceHours,
    SolarMwh,
    PriceSolar,
    FloorPriceSolar,
    SolarAtNegativeMwh,
    UpdatedAt,
}
