//! Error handling module
//!
//! Centralized error taxonomy with stable codes and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
///
/// Each variant carries a stable string code (see [`AppError::code`]) and a
/// transport status mapping. Causes are attached for logging and never
/// serialized into response payloads.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Cart not found")]
    CartNotFound { user_id: String },

    #[error("Item not found in cart")]
    ItemNotFound { user_id: String, item_id: String },

    #[error("Cart cannot contain more items")]
    CartLimitExceeded { current_count: usize, max_allowed: usize },

    #[error("Quantity exceeds maximum allowed")]
    QuantityLimitExceeded { quantity: i32, max_allowed: i32 },

    #[error("Quantity must be at least 1")]
    InvalidQuantity { quantity: i32 },

    #[error("Cart has expired")]
    CartExpired { user_id: String },

    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Cart was modified by another request")]
    Conflict {
        expected_version: i64,
        current_version: i64,
    },

    #[error("Too many requests, please try again later")]
    RateLimited,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Idempotency key was already used with a different request")]
    IdempotencyConflict,

    // Server errors (5xx)
    #[error("Persistence operation failed: {operation}")]
    Persistence {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Event publish failed")]
    EventPublish {
        #[source]
        source: anyhow::Error,
    },

    #[error("Service temporarily unavailable")]
    ServiceUnavailable { resource: String },

    #[error("An internal error occurred")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Create a cart not found error
    pub fn cart_not_found(user_id: impl Into<String>) -> Self {
        Self::CartNotFound {
            user_id: user_id.into(),
        }
    }

    /// Create an item not found error
    pub fn item_not_found(user_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self::ItemNotFound {
            user_id: user_id.into(),
            item_id: item_id.into(),
        }
    }

    /// Create a cart expired error
    pub fn cart_expired(user_id: impl Into<String>) -> Self {
        Self::CartExpired {
            user_id: user_id.into(),
        }
    }

    /// Create a validation error with structured details
    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// Create a version conflict error
    pub fn conflict(expected_version: i64, current_version: i64) -> Self {
        Self::Conflict {
            expected_version,
            current_version,
        }
    }

    /// Create a persistence error wrapping the transport cause
    pub fn persistence(operation: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            source: cause.into(),
        }
    }

    /// Create an event publish error wrapping the transport cause
    pub fn event_publish(cause: impl Into<anyhow::Error>) -> Self {
        Self::EventPublish {
            source: cause.into(),
        }
    }

    /// Create a service unavailable error for a named resource
    pub fn service_unavailable(resource: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            resource: resource.into(),
        }
    }

    /// Create an internal error wrapping the cause
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            source: cause.into(),
        }
    }

    /// Stable string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::CartNotFound { .. } => "CART_NOT_FOUND",
            AppError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            AppError::CartLimitExceeded { .. } => "CART_LIMIT_EXCEEDED",
            AppError::QuantityLimitExceeded { .. } => "QUANTITY_LIMIT_EXCEEDED",
            AppError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            AppError::CartExpired { .. } => "CART_EXPIRED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            AppError::Persistence { .. } => "PERSISTENCE_ERROR",
            AppError::EventPublish { .. } => "EVENT_PUBLISH_ERROR",
            AppError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::CartNotFound { .. } | AppError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::CartLimitExceeded { .. }
            | AppError::QuantityLimitExceeded { .. }
            | AppError::InvalidQuantity { .. }
            | AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::CartExpired { .. } => StatusCode::GONE,
            AppError::Conflict { .. } | AppError::IdempotencyConflict => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Persistence { .. }
            | AppError::EventPublish { .. }
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details for the response payload (never the raw cause)
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::CartNotFound { user_id } => Some(json!({ "user_id": user_id })),
            AppError::ItemNotFound { user_id, item_id } => {
                Some(json!({ "user_id": user_id, "item_id": item_id }))
            }
            AppError::CartLimitExceeded {
                current_count,
                max_allowed,
            } => Some(json!({
                "current_count": current_count,
                "max_allowed": max_allowed,
            })),
            AppError::QuantityLimitExceeded {
                quantity,
                max_allowed,
            } => Some(json!({
                "requested_quantity": quantity,
                "max_allowed": max_allowed,
            })),
            AppError::InvalidQuantity { quantity } => Some(json!({ "quantity": quantity })),
            AppError::CartExpired { user_id } => Some(json!({ "user_id": user_id })),
            AppError::Validation { details, .. } => details.clone(),
            AppError::Conflict {
                expected_version,
                current_version,
            } => Some(json!({
                "expected_version": expected_version,
                "current_version": current_version,
            })),
            AppError::ServiceUnavailable { resource } => Some(json!({ "service": resource })),
            _ => None,
        }
    }

    /// Whether this error represents a transient backend fault worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Persistence { .. } | AppError::EventPublish { .. }
        )
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            // Causes stay in the logs, not in the payload
            tracing::error!(code = self.code(), error = ?self, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("1"));
        }
        response
    }
}
