//! # Observability
//!
//! Logging setup shared by every teamsync crate.
//!
//! Library crates only emit `tracing` events. Binaries call [`init_with_config`]
//! once at startup and decide where those events go:
//!
//! - a JSONL file (default `~/.teamsync/logs/dev.jsonl`), one object per line
//! - optionally a compact human-readable stream on stderr
//!
//! The level filter comes from `RUST_LOG` when set, otherwise from
//! [`LogConfig::default_level`].
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "teamsync".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file_sink;
mod json_layer;

use std::io;
use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_sink::{AppendFile, AppendGuard};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL entry.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// `RUST_LOG` takes precedence when present.
    pub default_level: String,

    /// JSONL file location. Defaults to `~/.teamsync/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also write a compact stream to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "teamsync".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

impl LogConfig {
    /// Resolved JSONL path for this configuration.
    pub fn resolved_log_path(&self) -> PathBuf {
        self.log_path.clone().unwrap_or_else(default_log_path)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".teamsync")
        .join("logs")
        .join("dev.jsonl")
}

/// Initialize logging, falling back to stderr-only output when the log file
/// cannot be opened.
pub fn init_with_config(config: LogConfig) {
    if let Err(err) = try_init_with_config(&config) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(config.env_filter())
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .try_init();
        tracing::warn!(
            error = %err,
            log_path = %config.resolved_log_path().display(),
            "JSONL log file unavailable, logging to stderr only"
        );
    }
}

/// Initialize logging, returning an error if the JSONL file cannot be opened.
///
/// A second initialization in the same process is a no-op.
pub fn try_init_with_config(config: &LogConfig) -> io::Result<()> {
    let log_path = config.resolved_log_path();
    let json_layer = JsonLayer::new(config.service_name.clone(), AppendFile::open(&log_path)?);

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(config.env_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.with_filter(config.env_filter()))
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = %log_path.display(),
            "logging initialized"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "teamsync");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_resolved_log_path_prefers_explicit_path() {
        let config = LogConfig {
            log_path: Some(PathBuf::from("/tmp/teamsync-test.jsonl")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_log_path(),
            PathBuf::from("/tmp/teamsync-test.jsonl")
        );
    }

    #[test]
    fn test_default_log_path_shape() {
        let path = LogConfig::default().resolved_log_path();
        assert!(path.ends_with(".teamsync/logs/dev.jsonl"));
    }
}
