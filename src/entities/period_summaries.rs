//! SeaORM Entity for precomputed summary statistics
//!
//! One row per (zone, granularity, period_start). Only sums are stored;
//! ratios are derived on read.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "period_summaries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub zone: String,
    /// 'daily', 'monthly', 'yearly', 'total'
    pub granularity: String,
    pub period_start: Date,
    pub interval_count: i64,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub duration_hours: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub price_duration: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub negative_price_hours: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub solar_mwh: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub price_solar: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub floor_price_solar: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub solar_at_negative_mwh: Decimal,
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
