//! Error types for warden

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Main error type for warden
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Build lock store error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("No free port: {0}")]
    NoFreePort(String),

    #[error("Container engine error: {0}")]
    EngineError(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Image build error: {0}")]
    BuildError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Build lock error: {0}")]
    BuildLockError(String),

    #[error("No running instance for '{0}'")]
    NotDeployed(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// HTTP status reported to callers of the server
    pub fn status_code(&self) -> StatusCode {
        match self {
            WardenError::ValidationError(_) | WardenError::JsonError(_) => StatusCode::BAD_REQUEST,
            WardenError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            WardenError::NotFound(_) => StatusCode::NOT_FOUND,
            WardenError::NotDeployed(_) => StatusCode::SERVICE_UNAVAILABLE,
            WardenError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            WardenError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            WardenError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self);
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for WardenError {
    fn from(rejection: JsonRejection) -> Self {
        WardenError::ValidationError(rejection.body_text())
    }
}

impl From<QueryRejection> for WardenError {
    fn from(rejection: QueryRejection) -> Self {
        WardenError::ValidationError(rejection.body_text())
    }
}
