//! Error handling for edgecam

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found (missing artifact, unknown filename)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (bad request input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate filename in the queue)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Config error (invalid capacity, empty channel list)
    #[error("Config error: {0}")]
    Config(String),

    /// Hardware or collaborator not available on this device
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Capture failed for a channel
    #[error("Capture failed for {channel_id}: {message}")]
    Capture { channel_id: String, message: String },

    /// Upload collaborator rejected or failed
    #[error("Upload error: {0}")]
    Upload(String),

    /// Network error (offline, probe failed)
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a capture error for a channel
    pub fn capture(channel_id: &str, message: impl Into<String>) -> Self {
        Error::Capture {
            channel_id: channel_id.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                msg.clone(),
            ),
            Error::Capture { channel_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAPTURE_FAILED",
                format!("Camera {}: {}", channel_id, message),
            ),
            Error::Upload(msg) => (StatusCode::BAD_GATEWAY, "UPLOAD_ERROR", msg.clone()),
            Error::Network(msg) => (StatusCode::BAD_REQUEST, "NETWORK_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
