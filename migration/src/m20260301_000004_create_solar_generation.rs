use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SolarGeneration::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SolarGeneration::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SolarGeneration::Zone).string_len(16).not_null())
                    .col(
                        ColumnDef::new(SolarGeneration::TimestampStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SolarGeneration::Resolution).string_len(8).not_null())
                    .col(
                        ColumnDef::new(SolarGeneration::OutputMw)
                            .decimal_len(14, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SolarGeneration::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_solar_generation_zone_start_resolution")
                    .table(SolarGeneration::Table)
                    .col(SolarGeneration::Zone)
                    .col(SolarGeneration::TimestampStart)
                    .col(SolarGeneration::Resolution)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SolarGeneration::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SolarGeneration {
    Table,
    Id,
    Zone,
    TimestampStart,
    Resolution,
    OutputMw,
    CreatedAt,
}
