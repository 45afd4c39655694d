//! Configuration, file system paths and logging bootstrap for teamsync.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_ATTACHMENTS_BUCKET, DEFAULT_LOG_LEVEL, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_POLL_INTERVAL_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
