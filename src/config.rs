//! Watcher and receiver configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables / CLI flags (applied by the binaries).

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_MAX_PENDING_OPERATIONS: usize = 1000;
pub const DEFAULT_OPERATION_EXPIRY_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30 * 1000;
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 8;
pub const DEFAULT_RECEIVER_PORT: u16 = 3000;
pub const DEFAULT_STATUS_PORT: u16 = 3001;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Ignores dotfiles and anything inside dot-directories
pub const DEFAULT_IGNORE_PATTERN: &str = r"(^|/)\.";

/// Configuration for the source-side watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Directory tree to mirror
    pub source_dir: PathBuf,
    /// Base URL of the receiver (e.g. `http://10.0.0.2:3000`)
    pub remote_url: String,
    /// Port for the `/health` and `/status` endpoints (0 = disabled)
    pub status_port: u16,
    /// Quiet period before a changed file is sent
    pub debounce_delay_ms: u64,
    /// Upper bound on scheduled-but-unfired operations
    pub max_pending_operations: usize,
    /// Age after which a pending operation is swept
    pub operation_expiry_ms: u64,
    /// How often the staleness sweep runs
    pub sweep_interval_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub retry_base_delay_ms: u64,
    /// Timeout for a single upload attempt
    pub request_timeout_ms: u64,
    /// Upper bound on simultaneous uploads across all paths
    pub max_concurrent_transfers: usize,
    /// Regexes matched against the `/`-separated relative path
    pub ignore_patterns: Vec<String>,
    /// Schedule every existing file once at startup
    pub sync_on_start: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./source"),
            remote_url: format!("http://127.0.0.1:{}", DEFAULT_RECEIVER_PORT),
            status_port: DEFAULT_STATUS_PORT,
            debounce_delay_ms: DEFAULT_DEBOUNCE_MS,
            max_pending_operations: DEFAULT_MAX_PENDING_OPERATIONS,
            operation_expiry_ms: DEFAULT_OPERATION_EXPIRY_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            ignore_patterns: vec![DEFAULT_IGNORE_PATTERN.to_string()],
            sync_on_start: false,
        }
    }
}

impl WatcherConfig {
    /// Create a config for the given source tree and receiver
    pub fn new(source_dir: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            remote_url: remote_url.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn operation_expiry(&self) -> Duration {
        Duration::from_millis(self.operation_expiry_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Endpoint uploads are posted to
    pub fn upload_url(&self) -> String {
        format!("{}/files", self.remote_url.trim_end_matches('/'))
    }

    /// Compile the ignore patterns
    pub fn ignore_regexes(&self) -> Result<Vec<Regex>> {
        self.ignore_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| MirrorError::Config(format!("Invalid ignore pattern {:?}: {}", p, e)))
            })
            .collect()
    }

    /// Check settings that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.remote_url.trim().is_empty() {
            return Err(MirrorError::Config("remote_url must not be empty".to_string()));
        }
        if !self.remote_url.starts_with("http://") && !self.remote_url.starts_with("https://") {
            return Err(MirrorError::Config(format!(
                "remote_url must start with http:// or https://, got {}",
                self.remote_url
            )));
        }
        if self.max_pending_operations == 0 {
            return Err(MirrorError::Config(
                "max_pending_operations must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(MirrorError::Config(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(MirrorError::Config("sweep_interval_ms must be non-zero".to_string()));
        }
        self.ignore_regexes()?;
        Ok(())
    }
}

/// Configuration for the destination-side receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Root of the mirror tree
    pub destination_dir: PathBuf,
    /// Port to listen on
    pub port: u16,
    /// Where uploads are spooled before verification (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
    /// Request body limit for `POST /files`
    pub max_upload_bytes: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("./mirror"),
            port: DEFAULT_RECEIVER_PORT,
            staging_dir: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ReceiverConfig {
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    /// Resolved staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(MirrorError::Config("max_upload_bytes must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    shellexpand::full(raw)
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(|e| MirrorError::Config(format!("Cannot expand path {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_watcher_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_delay(), Duration::from_millis(500));
        assert_eq!(config.max_pending_operations, 1000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_url_trims_trailing_slash() {
        let config = WatcherConfig::new("/tmp/src", "http://peer:3000/");
        assert_eq!(config.upload_url(), "http://peer:3000/files");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WatcherConfig::new("/tmp/src", "");
        assert!(config.validate().is_err());

        config.remote_url = "ftp://peer".to_string();
        assert!(config.validate().is_err());

        config.remote_url = "http://peer".to_string();
        config.max_pending_operations = 0;
        assert!(config.validate().is_err());

        config.max_pending_operations = 10;
        config.ignore_patterns = vec!["(".to_string()];
        assert!(matches!(config.validate(), Err(MirrorError::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "source_dir = \"/data/in\"\nremote_url = \"http://peer:9000\"\ndebounce_delay_ms = 250"
        )
        .unwrap();

        let config = WatcherConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/data/in"));
        assert_eq!(config.debounce_delay_ms, 250);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(matches!(
            ReceiverConfig::from_toml_file(file.path()),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_expand_path_substitutes_variables() {
        std::env::set_var("MIRRORSYNC_TEST_EXPAND_ROOT", "/srv/mirror");
        assert_eq!(
            expand_path("$MIRRORSYNC_TEST_EXPAND_ROOT/in").unwrap(),
            PathBuf::from("/srv/mirror/in")
        );
        assert_eq!(expand_path("plain/dir").unwrap(), PathBuf::from("plain/dir"));
        assert!(matches!(
            expand_path("$MIRRORSYNC_TEST_EXPAND_UNSET_VAR/x"),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_default_ignore_matches_dotfiles() {
        let regexes = WatcherConfig::default().ignore_regexes().unwrap();
        assert!(regexes[0].is_match(".DS_Store"));
        assert!(regexes[0].is_match("docs/.git/HEAD"));
        assert!(!regexes[0].is_match("docs/notes.txt"));
    }
}
