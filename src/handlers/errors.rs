//! HTTP error mapping shared by the handlers

use axum::{http::StatusCode, Json};

use crate::error::{QueryError, StoreError};
use crate::models::summary::ErrorResponse;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(code: &str, error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Unavailable storage is a 503. Rejected statements and corrupt rows are
/// server-side faults.
pub fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::Unavailable(reason) => {
            tracing::error!(error = %reason, "Storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Storage unavailable: {}", reason),
                    code: "storage_unavailable".to_string(),
                }),
            )
        }
        StoreError::Rejected(reason) => {
            tracing::error!(error = %reason, "Storage rejected statement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Storage error: {}", reason),
                    code: "storage_error".to_string(),
                }),
            )
        }
        StoreError::Corrupt(reason) => {
            tracing::error!(error = %reason, "Corrupt stored row");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Corrupt stored data: {}", reason),
                    code: "corrupt_data".to_string(),
                }),
            )
        }
    }
}

pub fn query_error(e: QueryError) -> ApiError {
    match e {
        QueryError::Unbounded(reason) => bad_request("unbounded_daily_query", reason),
        QueryError::Store(e) => store_error(e),
    }
}
