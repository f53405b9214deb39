//! Error types for the dispatcher.
//!
//! Delivery failures are not errors: they are folded into per-event outcomes
//! by the executor. Everything here is either a caller mistake (input,
//! not-found) or a system fault that has to reach the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Listener already exists for tenant {tenant_id}, url {url}, event type {event_type}")]
    DuplicateListener {
        tenant_id: String,
        url: String,
        event_type: String,
    },

    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error class exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    NotFound,
    TransportUnavailable,
    Internal,
}

/// Structured `{kind, code, message}` error returned to CRUD and API callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Validation(_) | DispatchError::DuplicateListener { .. } => {
                ErrorKind::Input
            }
            DispatchError::ListenerNotFound(_) => ErrorKind::NotFound,
            DispatchError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            DispatchError::Transport(_)
            | DispatchError::Storage(_)
            | DispatchError::HttpClient(_)
            | DispatchError::Serialization(_)
            | DispatchError::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::DuplicateListener { .. } => "DUPLICATE_LISTENER",
            DispatchError::ListenerNotFound(_) => "LISTENER_NOT_FOUND",
            DispatchError::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            DispatchError::Transport(_) => "TRANSPORT_ERROR",
            DispatchError::Storage(_) => "STORAGE_ERROR",
            DispatchError::HttpClient(_) => "HTTP_CLIENT_ERROR",
            DispatchError::Serialization(_) => "SERIALIZATION_ERROR",
            DispatchError::Io(_) => "IO_ERROR",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Input => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::TransportUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, axum::Json(self.to_body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
