//! Fetch failure as stored in a view.

use remote_gateway::{ErrorKind, RemoteError};
use thiserror::Error;

/// A failed fetch, kept beside the last good snapshot. Cloneable so views
/// can be shared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
