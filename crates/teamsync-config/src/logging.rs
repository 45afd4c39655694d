//! Logging initialization.
//!
//! Thin wrapper over the observability package: JSONL to
//! `~/.teamsync/logs/dev.jsonl`, level from `RUST_LOG` or the given default.

use observability::LogConfig;

use crate::Paths;

/// Initialize logging for the `teamsync` service.
///
/// Stderr output is on unless `TEAMSYNC_LOG_STDERR` is `0` or `false`.
///
/// ```ignore
/// init_logging("info", &paths);
/// tracing::info!("started");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    let also_stderr = std::env::var("TEAMSYNC_LOG_STDERR")
        .map(|raw| !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false"))
        .unwrap_or(true);

    observability::init_with_config(LogConfig {
        service_name: "teamsync".into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr,
    });
}

/// Level named by `level` (case-insensitive, `warning` accepted), INFO otherwise.
pub fn parse_level(level: &str) -> tracing::Level {
    let level = level.trim();
    if level.eq_ignore_ascii_case("warning") {
        return tracing::Level::WARN;
    }
    level.parse().unwrap_or(tracing::Level::INFO)
}
