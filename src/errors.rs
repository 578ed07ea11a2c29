use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Error body returned by every API endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code, stable across releases
    pub code: String,
    /// Additional structured details (shortfall figures for stock errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid stock levels: {0}")]
    InvalidStockLevels(String),

    #[error("Insufficient stock for {item} at {location}: available {available}, requested {requested}")]
    InsufficientStock {
        item: String,
        location: String,
        available: i64,
        requested: i64,
    },

    #[error("Stock changed for {item} at {location}: planned against {planned}, now {available}, requested {requested}")]
    StaleStock {
        item: String,
        location: String,
        planned: i64,
        available: i64,
        requested: i64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Item already exists: {0}")]
    DuplicateItem(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Offline login unavailable: {0}")]
    OfflineUnavailable(String),

    #[error("Hash error: {0}")]
    HashError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::ValidationError(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidStockLevels(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. }
            | Self::StaleStock { .. }
            | Self::DuplicateItem(_)
            | Self::Conflict(_)
            | Self::Store(StoreError::VersionConflict { .. })
            | Self::Store(StoreError::AlreadyExists { .. }) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OfflineUnavailable(_) | Self::Store(StoreError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::HashError(_) | Self::Store(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::InvalidStockLevels(_) => "invalid_stock_levels",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::StaleStock { .. } => "stale_stock",
            Self::NotFound(_) => "not_found",
            Self::DuplicateItem(_) => "duplicate_item",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::OfflineUnavailable(_) => "offline_unavailable",
            Self::HashError(_) => "hash_error",
            Self::Store(StoreError::NotFound { .. }) => "not_found",
            Self::Store(StoreError::Unavailable(_)) => "store_unavailable",
            Self::Store(_) => "store_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::HashError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::Store(StoreError::InvalidDocument(_)) | Self::Store(StoreError::InvalidPath(_)) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                available,
                requested,
                ..
            } => Some(serde_json::json!({
                "available": available,
                "requested": requested,
                "shortfall": requested - available,
            })),
            Self::StaleStock {
                planned,
                available,
                requested,
                ..
            } => Some(serde_json::json!({
                "planned": planned,
                "available": available,
                "requested": requested,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.code().to_string(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
