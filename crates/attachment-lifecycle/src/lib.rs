//! # Attachment Lifecycle
//!
//! Binary attachments for tasks: object upload plus a `task_attachments`
//! row pointing at the object's public URL, and the reverse on removal.
//!
//! `attach` fails before any network call when the payload is over the
//! size limit. If the row insert fails after the upload, the object is left
//! behind (logged as orphaned) and the error is returned. `detach` removes
//! the row first; the object removal that follows is best effort.
//! Both ask the tracked attachments synchronizer for that task to refresh.

mod error;
mod manager;
mod path;

pub use error::{AttachError, AttachResult};
pub use manager::{
    AttachmentManager, AttachmentManagerConfig, DEFAULT_BUCKET, DEFAULT_MAX_UPLOAD_BYTES,
};
pub use path::{content_type_for, file_type, sanitize_extension, storage_path};
