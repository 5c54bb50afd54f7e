use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api::response;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication rejected by provider: {0}")]
    Auth(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            // The rejected credential belongs to this service, not the caller.
            AppError::Auth(_) | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
        }
    }

    /// Wraps a schema mismatch in a provider payload.
    pub fn parse(what: &str, err: impl std::fmt::Display) -> Self {
        AppError::Upstream(format!("malformed {} payload: {}", what, err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        response::error::<()>(self.status_code(), self.to_string()).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Upstream(format!("request timed out: {}", err))
        } else if err.is_decode() {
            AppError::parse("response", err)
        } else {
            AppError::Upstream(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Auth("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(AppError::Config("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::InvalidState("x".into()).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn io_errors_become_storage_errors() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, AppError::Storage(msg) if msg.contains("denied")));
    }
}
