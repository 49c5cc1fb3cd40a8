//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigLoadError;
use crate::models::channel::InvalidChannel;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid channel: {0}")]
    InvalidChannel(#[from] InvalidChannel),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigLoadError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Origin not allowed: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Redis(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Redis error: {}", e),
            ),
            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {}", e),
            ),
            AppError::InvalidChannel(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::WebSocket(e) => (
                StatusCode::BAD_GATEWAY,
                format!("WebSocket error: {}", e),
            ),
            AppError::Timeout(what) => (StatusCode::GATEWAY_TIMEOUT, format!("{} timed out", what)),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Config(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let res = AppError::Forbidden("http://evil.example".into()).into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let res = AppError::Timeout("redis connect".into()).into_response();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        let res = AppError::from(InvalidChannel::Empty).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = AppError::from(ConfigLoadError::NoChannels).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let res = AppError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
