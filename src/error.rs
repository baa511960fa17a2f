use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub use crate::signature::SignatureError;

/// Magic-link token failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("magic link token not found")]
    NotFound,
    #[error("magic link token expired")]
    Expired,
    #[error("magic link token already used")]
    AlreadyUsed,
}

/// A webhook event that can't be applied to the license store.
/// These are logged and acknowledged, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("no license for subscription {0}")]
    UnknownSubscription(String),
    #[error("event is missing {0}")]
    MissingField(&'static str),
    #[error("event for subscription {0} is older than the last applied event")]
    OutOfOrder(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Container limit reached ({current}/{allowed})")]
    QuotaExceeded { allowed: i64, current: i64 },

    #[error("License is {0}")]
    LicenseInactive(String),

    #[error("License expired")]
    LicenseExpired,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::QuotaExceeded { .. } => (StatusCode::FORBIDDEN, "QUOTA_EXCEEDED"),
            AppError::LicenseInactive(_) => (StatusCode::FORBIDDEN, "LICENSE_INACTIVE"),
            AppError::LicenseExpired => (StatusCode::FORBIDDEN, "LICENSE_EXPIRED"),
            AppError::Token(TokenError::NotFound) => (StatusCode::NOT_FOUND, "TOKEN_NOT_FOUND"),
            AppError::Token(TokenError::Expired) => (StatusCode::GONE, "TOKEN_EXPIRED"),
            AppError::Token(TokenError::AlreadyUsed) => (StatusCode::GONE, "TOKEN_ALREADY_USED"),
            AppError::Signature(SignatureError::InvalidSignature) => {
                (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE")
            }
            AppError::Signature(SignatureError::StaleSignature) => {
                (StatusCode::UNAUTHORIZED, "STALE_SIGNATURE")
            }
            AppError::Signature(SignatureError::MalformedHeader) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_SIGNATURE_HEADER")
            }
            AppError::Lifecycle(_) => (StatusCode::UNPROCESSABLE_ENTITY, "LIFECYCLE_ERROR"),
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Don't leak store internals to clients
        let error = match &self {
            AppError::StoreUnavailable(msg) => {
                tracing::error!(error = %msg, "store unavailable");
                "Service temporarily unavailable".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}
