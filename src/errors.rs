use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Structured error payload returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable taxonomy code (e.g. "INSUFFICIENT_STOCK")
    #[schema(example = "INSUFFICIENT_STOCK")]
    pub code: String,
    /// HTTP status category (e.g. "Unprocessable Entity")
    #[schema(example = "Unprocessable Entity")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "line 2: item 550e8400-e29b-41d4-a716-446655440000: available 8.00, requested 20.00")]
    pub message: String,
    /// Additional detail (validation errors, failing line identification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

/// Error type shared by all services and handlers.
///
/// Variants map one-to-one onto the error taxonomy surfaced to callers;
/// `code()` yields the taxonomy string and `status_code()` the HTTP mapping.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid cost: {0}")]
    InvalidCost(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Helper to wrap a database error with consistent typing
    pub fn db_error(err: DbErr) -> Self {
        Self::DatabaseError(err)
    }

    /// Taxonomy code surfaced in the response body
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) | Self::ConcurrentModification(_) => "CONFLICT",
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::InvalidCost(_) => "INVALID_COST",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidQuantity(_) | Self::InvalidCost(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            code: self.code().to_string(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(format!("Validation failed: {}", err))
    }
}

impl From<sea_orm::TransactionError<ServiceError>> for ServiceError {
    fn from(err: sea_orm::TransactionError<ServiceError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(db_err) => Self::DatabaseError(db_err),
            sea_orm::TransactionError::Transaction(service_err) => service_err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_codes_map_to_expected_statuses() {
        let cases = [
            (
                ServiceError::ValidationError("bad".into()),
                "VALIDATION",
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::NotFound("missing".into()),
                "NOT_FOUND",
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::Conflict("illegal transition".into()),
                "CONFLICT",
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::InvalidQuantity("negative".into()),
                "INVALID_QUANTITY",
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::InvalidCost("negative".into()),
                "INVALID_COST",
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::InsufficientStock("short".into()),
                "INSUFFICIENT_STOCK",
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Unauthenticated("no token".into()),
                "UNAUTHENTICATED",
                StatusCode::UNAUTHORIZED,
            ),
            (
                ServiceError::Forbidden("no permission".into()),
                "FORBIDDEN",
                StatusCode::FORBIDDEN,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::InternalError("connection string leaked".into());
        assert_eq!(err.response_message(), "Internal server error");
    }
}
