//! Awarr Domain Errors
//!
//! Typed error definitions for all application domains.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Main application error type
#[derive(Debug)]
pub enum AwarrError {
    // Configuration errors
    ConfigMissing(&'static str),

    // Sonarr errors
    BackendUnavailable,
    SonarrError { status: u16, message: String },

    // External service errors
    RateLimited { service: String, retry_after: Option<u64> },
    NotFound(String),

    // Matching errors
    MatchNotFound { series: String, season: i32 },

    // Download errors
    DownloadNotFound(String),
    DownloadInvalidState { id: String, expected: String, actual: String },
    DownloadFailed(String),
    FinalizationFailed(String),
    Cancelled,

    // Database errors
    Database(String),

    // Validation errors
    InvalidRequest(String),

    // Generic
    Internal(String),
}

impl fmt::Display for AwarrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMissing(key) => write!(f, "Missing required configuration: {}", key),
            Self::BackendUnavailable => write!(f, "Sonarr is not reachable"),
            Self::SonarrError { status, message } => {
                write!(f, "Sonarr error (HTTP {}): {}", status, message)
            }
            Self::RateLimited { service, retry_after } => {
                if let Some(secs) = retry_after {
                    write!(f, "{} rate limited, retry after {}s", service, secs)
                } else {
                    write!(f, "{} rate limited", service)
                }
            }
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::MatchNotFound { series, season } => {
                write!(f, "No source-site match for '{}' season {}", series, season)
            }
            Self::DownloadNotFound(id) => write!(f, "Download not found: {}", id),
            Self::DownloadInvalidState { id, expected, actual } => {
                write!(f, "Download {} in invalid state: expected {}, got {}", id, expected, actual)
            }
            Self::DownloadFailed(msg) => write!(f, "Download failed: {}", msg),
            Self::FinalizationFailed(msg) => write!(f, "Finalization failed: {}", msg),
            Self::Cancelled => write!(f, "Download cancelled by user"),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AwarrError {}

/// HTTP error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AwarrError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            // 404 Not Found
            AwarrError::DownloadNotFound(_) => {
                (StatusCode::NOT_FOUND, "DOWNLOAD_NOT_FOUND", self.to_string(), None)
            }
            AwarrError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string(), None),
            AwarrError::MatchNotFound { .. } => {
                (StatusCode::NOT_FOUND, "MATCH_NOT_FOUND", self.to_string(), None)
            }

            // 400 Bad Request
            AwarrError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", self.to_string(), None)
            }
            AwarrError::ConfigMissing(_) => {
                (StatusCode::BAD_REQUEST, "CONFIG_MISSING", self.to_string(), None)
            }

            // 409 Conflict
            AwarrError::DownloadInvalidState { .. } => {
                (StatusCode::CONFLICT, "INVALID_STATE", self.to_string(), None)
            }
            AwarrError::Cancelled => (StatusCode::CONFLICT, "CANCELLED", self.to_string(), None),

            // 429 Too Many Requests
            AwarrError::RateLimited { retry_after, .. } => {
                let msg = self.to_string();
                let details = retry_after.map(|s| format!("retry_after: {}", s));
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg, details)
            }

            // 503 Service Unavailable
            AwarrError::BackendUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "SONARR_UNAVAILABLE", self.to_string(), None)
            }
            AwarrError::SonarrError { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SONARR_ERROR", self.to_string(), None)
            }

            // 500 Internal Server Error
            AwarrError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", self.to_string(), None)
            }
            AwarrError::DownloadFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DOWNLOAD_FAILED", self.to_string(), None)
            }
            AwarrError::FinalizationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "FINALIZATION_FAILED", self.to_string(), None)
            }
            AwarrError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string(), None)
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions
impl From<rusqlite::Error> for AwarrError {
    fn from(err: rusqlite::Error) -> Self {
        AwarrError::Database(err.to_string())
    }
}

/// Result type alias for Awarr operations
pub type AwarrResult<T> = Result<T, AwarrError>;
