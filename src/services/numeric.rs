//! Conversions between engine floats and SQL decimals

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::StoreError;

/// Scale of every stored sum
pub const STORED_SCALE: u32 = 6;

pub fn to_decimal(value: f64, field: &str) -> Result<Decimal, StoreError> {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(STORED_SCALE))
        .ok_or_else(|| StoreError::Corrupt(format!("{} is not representable: {}", field, value)))
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Round for presentation; `None` stays `None`
pub fn round2(value: Option<f64>) -> Option<f64> {
    value.map(|v| (v * 100.0).round() / 100.0)
}
