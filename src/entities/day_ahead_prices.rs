//! SeaORM Entity for day-ahead price points (append-only)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "day_ahead_prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Bidding zone code, e.g. "DE-LU"
    pub zone: String,
    pub timestamp_start: DateTimeWithTimeZone,
    /// "PT15M" or "PT60M"
    pub resolution: String,
    /// EUR/MWh
    #[sea_orm(column_type = "Decimal(Some((12, 4)))")]
    pub price: Decimal,
    pub created_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
