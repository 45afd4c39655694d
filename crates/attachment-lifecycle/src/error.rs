//! Attachment error types.

use remote_gateway::{ErrorKind, RemoteError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttachError {
    /// Payload over the configured limit; nothing was sent.
    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Rejected locally (e.g. an unusable task id).
    #[error("invalid attachment: {0}")]
    Invalid(String),

    /// Uploading the object failed.
    #[error("upload failed: {0}")]
    Upload(#[source] RemoteError),

    /// The object was stored but its row could not be written.
    #[error("attachment row insert failed (object {path} orphaned): {source}")]
    Record {
        path: String,
        #[source]
        source: RemoteError,
    },

    /// Removing the row failed.
    #[error("attachment removal failed: {0}")]
    Remove(#[source] RemoteError),
}

impl AttachError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttachError::TooLarge { .. } => ErrorKind::Quota,
            AttachError::Invalid(_) => ErrorKind::Validation,
            AttachError::Upload(e) | AttachError::Remove(e) => e.kind(),
            AttachError::Record { source, .. } => source.kind(),
        }
    }
}

pub type AttachResult<T> = Result<T, AttachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            AttachError::TooLarge { size: 6, limit: 5 }.kind(),
            ErrorKind::Quota
        );
        assert_eq!(AttachError::Invalid("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            AttachError::Upload(RemoteError::Transport("down".into())).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            AttachError::Record {
                path: "T1/a.pdf".into(),
                source: RemoteError::Conflict("dup".into()),
            }
            .kind(),
            ErrorKind::Conflict
        );
    }
}
