//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Session missing or expired; recovery is re-authentication, never a retry.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Push channel error: {0}")]
    Transport(String),

    #[error("Collaborator returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Classification failed: {0}")]
    Classifier(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http(_) | AppError::Transport(_) | AppError::Timeout(_) => true,
            AppError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {}", e),
            ),
            AppError::Http(e) => (StatusCode::BAD_GATEWAY, format!("Upstream error: {}", e)),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Jwt(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Transport(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Upstream { .. } => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Classifier(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_errors() {
        assert!(AppError::Transport("reset".into()).is_retryable());
        assert!(AppError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(AppError::Upstream { status: 503, message: String::new() }.is_retryable());
        assert!(!AppError::Upstream { status: 400, message: String::new() }.is_retryable());
        assert!(!AppError::Unauthorized.is_retryable());
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let res = AppError::Unauthorized.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
