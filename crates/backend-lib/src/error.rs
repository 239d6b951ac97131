// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use campus_safety_common::SafeWalkStatus;
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("User already has an active SOS alert ({sos_id})")]
    AlreadyActive {
        sos_id: String,
        tracking_resumed: bool,
    },

    #[error("SOS event not found")]
    SosNotFound,

    #[error("Safe walk not found")]
    WalkNotFound,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid or expired SOS token")]
    InvalidToken,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Safe walk has already ended")]
    WalkEnded,

    #[error("Invalid safe walk transition from {from} to {to}")]
    InvalidTransition {
        from: SafeWalkStatus,
        to: SafeWalkStatus,
    },

    #[error("SOS event is already resolved")]
    AlreadyResolved,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Authentication rate limit exceeded")]
    AuthRateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken | AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::SosNotFound | AppError::WalkNotFound | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            },
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyActive { .. }
            | AppError::InvalidTransition { .. }
            | AppError::WalkEnded
            | AppError::AlreadyResolved
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimitExceeded | AppError::AuthRateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            },
            AppError::Internal(_) | AppError::Io(_) | AppError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AlreadyActive { .. } => "SOS_001",
            AppError::SosNotFound => "SOS_002",
            AppError::AlreadyResolved => "SOS_003",
            AppError::WalkNotFound => "WALK_001",
            AppError::InvalidTransition { .. } => "WALK_002",
            AppError::WalkEnded => "WALK_003",
            AppError::NotFound(_) => "NF_001",
            AppError::InvalidToken => "TOKEN_001",
            AppError::Auth(_) => "AUTH_001",
            AppError::PermissionDenied(_) => "AUTH_002",
            AppError::AuthRateLimited => "AUTH_003",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Conflict(_) => "STORE_001",
            AppError::StoreUnavailable(_) => "STORE_002",
            AppError::RateLimitExceeded => "RATE_001",
            AppError::Internal(_) => "INT_001",
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::AlreadyActive { .. } => "You already have an active SOS alert".to_string(),
            AppError::SosNotFound | AppError::WalkNotFound | AppError::NotFound(_) => {
                "Resource not found".to_string()
            },
            AppError::InvalidToken => "Invalid or expired SOS token".to_string(),
            AppError::Auth(_) => "Authentication failed".to_string(),
            AppError::PermissionDenied(_) => {
                "You do not have permission to perform this action".to_string()
            },
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::InvalidTransition { .. } => "This status change is not allowed".to_string(),
            AppError::WalkEnded => "This safe walk has already ended".to_string(),
            AppError::AlreadyResolved => "This SOS alert is already resolved".to_string(),
            AppError::Conflict(_) => "The request conflicted with a concurrent change".to_string(),
            AppError::StoreUnavailable(_) => {
                "Service temporarily unavailable, please retry".to_string()
            },
            AppError::RateLimitExceeded => "Rate limit exceeded, please try again later".to_string(),
            AppError::AuthRateLimited => {
                "Too many failed attempts, please try again later".to_string()
            },
            AppError::Json(_) => "Invalid request format".to_string(),
            AppError::Internal(_) | AppError::Io(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }

    /// Transient failures the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_) | AppError::Conflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Token failures always carry the generic message
        let message = if cfg!(debug_assertions) && !matches!(self, AppError::InvalidToken) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let mut body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        if let AppError::AlreadyActive { sos_id, tracking_resumed } = &self {
            body["error"]["sosId"] = serde_json::json!(sos_id);
            body["error"]["trackingResumed"] = serde_json::json!(tracking_resumed);
        }

        (status, axum::Json(body)).into_response()
    }
}
