//! Error taxonomy shared by the session store and the HTTP handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors reported by [`crate::session::SessionStore`] operations.
///
/// None of these are retried by the store; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A required field was missing or empty, or the request body was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The session (or, for ending a topic, the topic) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A session or topic with this name already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The topic has been ended and no longer accepts inputs.
    #[error("Topic closed: {0}")]
    TopicClosed(String),

    /// The per-session writer lock was not granted in time.
    #[error("Session busy: {0}")]
    Busy(String),

    /// The document backend failed to read or write.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl StoreError {
    /// Machine-readable error kind used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidArgument(_) => "invalid_argument",
            StoreError::NotFound(_) => "not_found",
            StoreError::AlreadyExists(_) => "already_exists",
            StoreError::TopicClosed(_) => "topic_closed",
            StoreError::Busy(_) => "busy",
            StoreError::PersistenceFailure(_) => "persistence_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists(_) | StoreError::TopicClosed(_) => StatusCode::CONFLICT,
            StoreError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::PersistenceFailure(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::PersistenceFailure(e.to_string())
    }
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(name: "request.failed", kind = self.kind(), error = %self, "Request failed");
        }

        error_response(status, self.kind(), self.to_string())
    }
}

/// The `{ success: false, error, message }` body every failure uses.
pub fn error_response(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        success: false,
        error: kind,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}
