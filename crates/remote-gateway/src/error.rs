//! Error types for remote store operations.

use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or channel unreachable; recoverable by re-fetching later.
    Transport,
    /// Malformed request (e.g. an empty message); recovered locally.
    Validation,
    /// Write collided with existing state.
    Conflict,
    /// Target row or object is already gone.
    NotFound,
    /// Payload exceeds a size limit.
    Quota,
    /// Row from the server does not match the expected shape.
    Data,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Quota => "quota",
            ErrorKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// Error type for all gateway operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Remote error: {status} - {message}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A row could not be mapped onto its record type.
    #[error("invalid {table} row: {message}")]
    Decode { table: String, message: String },

    /// Request rejected before it was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Target does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write conflicted with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Object exceeds the storage size limit.
    #[error("object too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Backend unreachable.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Http(_) | RemoteError::Transport(_) => ErrorKind::Transport,
            RemoteError::Status { status, .. } => kind_for_status(*status),
            RemoteError::Json(_) | RemoteError::Decode { .. } => ErrorKind::Data,
            RemoteError::Validation(_) => ErrorKind::Validation,
            RemoteError::NotFound(_) => ErrorKind::NotFound,
            RemoteError::Conflict(_) => ErrorKind::Conflict,
            RemoteError::TooLarge { .. } => ErrorKind::Quota,
        }
    }

    /// Build an error of the given kind, used by fault injection.
    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Transport => RemoteError::Transport(message),
            ErrorKind::Validation => RemoteError::Validation(message),
            ErrorKind::Conflict => RemoteError::Conflict(message),
            ErrorKind::NotFound => RemoteError::NotFound(message),
            ErrorKind::Quota => RemoteError::TooLarge { size: 0, limit: 0 },
            ErrorKind::Data => RemoteError::Decode {
                table: "unknown".to_string(),
                message,
            },
        }
    }
}

/// Map an HTTP status onto an error kind.
pub(crate) fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::Validation,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        413 => ErrorKind::Quota,
        _ => ErrorKind::Transport,
    }
}

/// Convenience Result type alias for gateway operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
