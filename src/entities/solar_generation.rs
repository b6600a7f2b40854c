use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "solar_generation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub zone: String,
    pub timestamp_start: DateTimeWithTimeZone,
    pub resolution: String,
    /// Average output over the interval
    #[sea_orm(column_type = "Decimal(Some((14, 4)))")]
    pub output_mw: Decimal,
    pub created_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
