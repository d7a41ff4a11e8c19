//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hostpanel_core::CoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Core(err) => match err {
                CoreError::SandboxViolation(_) | CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                CoreError::NotFound(_) | CoreError::EnvironmentMissing(_) => StatusCode::NOT_FOUND,
                CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
                CoreError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
                CoreError::TimedOut(_) => StatusCode::REQUEST_TIMEOUT,
                CoreError::LaunchFailed(_)
                | CoreError::PersistFailed(_)
                | CoreError::CreationFailed(_)
                | CoreError::InstallFailed(_)
                | CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Core(err) => err.code(),
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_code = code, message = %message, "API error");
        } else if matches!(self, ApiError::Core(CoreError::SandboxViolation(_))) {
            warn!(error_code = code, message = %message, "Sandbox violation");
        } else {
            tracing::debug!(error_code = code, message = %message, "Client error");
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_core_error_status_codes() {
        let cases = [
            (
                CoreError::SandboxViolation(PathBuf::from("/etc")),
                StatusCode::FORBIDDEN,
            ),
            (CoreError::forbidden("x"), StatusCode::FORBIDDEN),
            (CoreError::not_found("x"), StatusCode::NOT_FOUND),
            (
                CoreError::EnvironmentMissing("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (CoreError::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (CoreError::invalid("x"), StatusCode::BAD_REQUEST),
            (
                CoreError::TimedOut(Duration::from_secs(1)),
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                CoreError::PersistFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let code = err.code();
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status_code(), status, "{code}");
            assert_eq!(api_err.error_code(), code);
        }
    }

    #[test]
    fn test_bad_request() {
        let err = ApiError::bad_request("no packages");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert_eq!(err.to_string(), "Bad request: no packages");
    }

    #[test]
    fn test_core_message_is_transparent() {
        let err = ApiError::from(CoreError::not_found("scheduled script nightly"));
        assert_eq!(err.to_string(), "not found: scheduled script nightly");
    }
}
