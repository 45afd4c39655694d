//! Errors returned by dashboard actions.

use attachment_lifecycle::AttachError;
use remote_gateway::{ErrorKind, RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Rejected locally, before any remote call.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Attachment(#[from] AttachError),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Validation(_) => ErrorKind::Validation,
            ActionError::Remote(e) => e.kind(),
            ActionError::Attachment(e) => e.kind(),
        }
    }
}

pub type ActionResult<T> = Result<T, ActionError>;
