//! HTTP error mapping for the admin API.
//!
//! Validation failures map to 400 with the validator's reason verbatim,
//! missing ids to 404, and everything unexpected to 500. The body always
//! carries the `{success: false, error: {code, message}}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use keyrelay_channel::ChannelError;
use keyrelay_core::{CoreError, RepositoryError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HttpError {
    fn code(&self) -> &'static str {
        match self {
            HttpError::NotFound(_) => "not_found",
            HttpError::BadRequest(_) => "bad_request",
            HttpError::Unauthorized => "unauthorized",
            HttpError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unauthorized => StatusCode::UNAUTHORIZED,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            HttpError::NotFound(msg)
            | HttpError::BadRequest(msg)
            | HttpError::Internal(msg) => msg.clone(),
            HttpError::Unauthorized => "missing or invalid token".to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<CoreError> for HttpError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Repository(repo_err) => repo_err.into(),
            // The validator's reason surfaces verbatim.
            CoreError::Validation(rejection) => HttpError::BadRequest(rejection.to_string()),
            CoreError::InvalidInput(msg) => HttpError::BadRequest(msg),
            CoreError::Internal(msg) => HttpError::Internal(msg),
        }
    }
}

impl From<RepositoryError> for HttpError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => HttpError::NotFound(msg),
            RepositoryError::AlreadyExists(msg) | RepositoryError::Constraint(msg) => {
                HttpError::BadRequest(msg)
            }
            RepositoryError::Storage(msg) => HttpError::Internal(format!("Storage: {msg}")),
            RepositoryError::Serialization(msg) => {
                HttpError::Internal(format!("Serialization: {msg}"))
            }
        }
    }
}

impl From<ChannelError> for HttpError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Repository(repo_err) => repo_err.into(),
            ChannelError::NoScript(_) | ChannelError::UnsupportedType(_) => {
                HttpError::NotFound(err.to_string())
            }
            ChannelError::ScriptSetup(msg) => HttpError::BadRequest(msg),
            other => HttpError::Internal(other.to_string()),
        }
    }
}
