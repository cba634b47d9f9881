use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors returned by HTTP handlers, rendered as `{ error, message }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No credential matched an active identity
    Unauthorized,
    /// Credential resolution could not consult the directory
    AuthenticationInternal,
    NotFound(String),
    BadRequest(String),
    /// Storage failure while serving the request
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationInternal | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::NotFound(_) => "Not Found",
            Self::BadRequest(_) => "Bad Request",
            Self::AuthenticationInternal | Self::Internal(_) => "Internal Server Error",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Unauthorized => "Valid API secret or token required",
            Self::AuthenticationInternal => "Authentication failed",
            Self::NotFound(msg) | Self::BadRequest(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.label(),
            "message": self.message(),
        });
        (self.status(), Json(body)).into_response()
    }
}
