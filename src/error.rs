use std::path::PathBuf;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Problems with the incoming request. Always the caller's fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing fields")]
    MissingFields,
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid provider")]
    InvalidProvider,
    #[error("no sender configured")]
    NoSenderConfigured,
    #[error("invalid request body: {0}")]
    MalformedBody(String),
}

/// The counter file could not be read, parsed or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("counter file {path} is not accessible: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("counter file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Everything that can end a `/send` request early.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Storage(_) | RelayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = match &self {
            RelayError::Validation(err) => json!({ "success": false, "message": err.to_string() }),
            other => json!({ "success": false, "error": other.to_string() }),
        };

        (self.status(), Json(body)).into_response()
    }
}
