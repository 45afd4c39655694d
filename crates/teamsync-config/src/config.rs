//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default Supabase project URL (can be overridden at compile time via TEAMSYNC_SUPABASE_URL).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("TEAMSYNC_SUPABASE_URL") {
    Some(url) => url,
    None => "http://127.0.0.1:54321",
};

/// Storage bucket holding task attachments.
pub const DEFAULT_ATTACHMENTS_BUCKET: &str = "task-attachments";

/// Object storage upload limit (5 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Polling interval used while the change channel is degraded.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase anon (publishable) API key.
    #[serde(default)]
    pub supabase_anon_key: String,
    /// Workspace whose roster is shown.
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Bucket for task attachments.
    #[serde(default = "default_attachments_bucket")]
    pub attachments_bucket: String,
    /// Upper bound for a single attachment.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Seconds between re-fetches while realtime is degraded.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_attachments_bucket() -> String {
    DEFAULT_ATTACHMENTS_BUCKET.to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_anon_key: String::new(),
            workspace_id: None,
            attachments_bucket: default_attachments_bucket(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file (defaults when missing),
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CoreError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `TEAMSYNC_*` overrides from the given lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(log_level) = lookup("TEAMSYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(url) = lookup("TEAMSYNC_SUPABASE_URL") {
            self.supabase_url = url;
        }
        if let Some(key) = lookup("TEAMSYNC_SUPABASE_ANON_KEY") {
            self.supabase_anon_key = key;
        }
        if let Some(workspace_id) = lookup("TEAMSYNC_WORKSPACE_ID") {
            self.workspace_id = Some(workspace_id);
        }
    }

    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        if self.max_upload_bytes == 0 {
            return Err(CoreError::Config(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(CoreError::Config(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    /// Realtime websocket endpoint derived from the project URL.
    pub fn realtime_url(&self) -> CoreResult<Url> {
        let mut url = self.supabase_url()?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(CoreError::Config(format!(
                    "unsupported supabase url scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| CoreError::Config("cannot derive realtime url".to_string()))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.supabase_anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Polling interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
        assert_eq!(config.attachments_bucket, "task-attachments");
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "log_level": "debug", "workspace_id": "ws-1" }"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.workspace_id.as_deref(), Some("ws-1"));
        assert_eq!(config.attachments_bucket, DEFAULT_ATTACHMENTS_BUCKET);
    }

    #[test]
    fn test_malformed_config_names_the_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, CoreError::ParseConfig { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.supabase_anon_key = "anon".to_string();
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.supabase_anon_key, "anon");
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.attachments_bucket, DEFAULT_ATTACHMENTS_BUCKET);
    }

    #[test]
    fn test_overrides_skip_blank_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TEAMSYNC_LOG_LEVEL", "warn"),
            ("TEAMSYNC_SUPABASE_URL", "https://abc.supabase.co"),
            ("TEAMSYNC_SUPABASE_ANON_KEY", "  "),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.supabase_url, "https://abc.supabase.co");
        assert_eq!(config.supabase_anon_key, "");
        assert!(config.workspace_id.is_none());
    }

    #[test]
    fn test_realtime_url_from_https() {
        let mut config = Config::default();
        config.supabase_url = "https://abc.supabase.co".to_string();
        config.supabase_anon_key = "key".to_string();

        let url = config.realtime_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert!(url.query().unwrap().contains("apikey=key"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.supabase_url = "not a valid url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
