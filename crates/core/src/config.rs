//! Session configuration
//!
//! Settings for the render cache, the pager window sizes, the I/O pool and
//! the data directory. Configuration can be loaded from a TOML file,
//! environment variables, or created programmatically.

use crate::pager::PagerConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Name of the persisted session file inside the data directory
pub const SESSION_FILE_NAME: &str = "session.json";

/// Directory inside the data directory holding imported documents
pub const DOCUMENTS_DIR_NAME: &str = "documents";

/// Configuration for a document session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadbookConfig {
    /// Maximum number of rendered pages kept in the render cache
    pub cache_entries: usize,

    /// Pages loaded when scrolling forward or backward
    pub page_size: u32,

    /// Pages loaded on refresh or jump
    pub initial_load_size: u32,

    /// Maximum number of pages the presentation keeps in its window
    pub max_window_size: u32,

    /// Number of I/O threads rendering pages
    pub io_threads: usize,

    /// Upper bound on any single I/O wait
    #[serde(rename = "io_timeout_ms", with = "duration_ms")]
    pub io_timeout: Duration,

    /// Directory holding the session file and imported documents
    pub data_dir: PathBuf,
}

impl Default for RoadbookConfig {
    fn default() -> Self {
        Self {
            cache_entries: 20,
            page_size: 5,
            initial_load_size: 7,
            max_window_size: 30,
            io_threads: 2,
            io_timeout: Duration::from_secs(30),
            data_dir: Self::default_data_dir(),
        }
    }
}

impl RoadbookConfig {
    pub fn with_cache_entries(mut self, entries: usize) -> Self {
        self.cache_entries = entries;
        self
    }

    pub fn with_page_size(mut self, pages: u32) -> Self {
        self.page_size = pages;
        self
    }

    pub fn with_initial_load_size(mut self, pages: u32) -> Self {
        self.initial_load_size = pages;
        self
    }

    pub fn with_max_window_size(mut self, pages: u32) -> Self {
        self.max_window_size = pages;
        self
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// Returns the default data directory for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/dev.Roadbook.Roadbook
    /// - Linux: ~/.local/share/roadbook
    /// - Windows: %LOCALAPPDATA%\Roadbook\Roadbook\data
    pub fn default_data_dir() -> PathBuf {
        ProjectDirs::from("dev", "Roadbook", "Roadbook")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".roadbook"))
    }

    /// Path of the persisted session file
    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE_NAME)
    }

    /// Directory imported documents are copied into
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join(DOCUMENTS_DIR_NAME)
    }

    /// Window sizes handed to the pager
    pub fn pager(&self) -> PagerConfig {
        PagerConfig {
            page_size: self.page_size,
            initial_load_size: self.initial_load_size,
            max_window_size: self.max_window_size,
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `ROADBOOK_CACHE_ENTRIES`
    /// - `ROADBOOK_PAGE_SIZE`
    /// - `ROADBOOK_INITIAL_LOAD_SIZE`
    /// - `ROADBOOK_MAX_WINDOW_SIZE`
    /// - `ROADBOOK_IO_THREADS`
    /// - `ROADBOOK_IO_TIMEOUT_MS`
    /// - `ROADBOOK_DATA_DIR`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies any `ROADBOOK_*` environment variables to this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(entries) = env_value("ROADBOOK_CACHE_ENTRIES")? {
            self.cache_entries = entries;
        }
        if let Some(pages) = env_value("ROADBOOK_PAGE_SIZE")? {
            self.page_size = pages;
        }
        if let Some(pages) = env_value("ROADBOOK_INITIAL_LOAD_SIZE")? {
            self.initial_load_size = pages;
        }
        if let Some(pages) = env_value("ROADBOOK_MAX_WINDOW_SIZE")? {
            self.max_window_size = pages;
        }
        if let Some(threads) = env_value("ROADBOOK_IO_THREADS")? {
            self.io_threads = threads;
        }
        if let Some(millis) = env_value::<u64>("ROADBOOK_IO_TIMEOUT_MS")? {
            self.io_timeout = Duration::from_millis(millis);
        }
        if let Ok(dir) = std::env::var("ROADBOOK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys keep their defaults:
    /// ```toml
    /// cache_entries = 20
    /// page_size = 5
    /// initial_load_size = 7
    /// max_window_size = 30
    /// io_threads = 2
    /// io_timeout_ms = 30000
    /// data_dir = "/path/to/data"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks that every bound is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("cache_entries", self.cache_entries as u64),
            ("page_size", u64::from(self.page_size)),
            ("initial_load_size", u64::from(self.initial_load_size)),
            ("max_window_size", u64::from(self.max_window_size)),
            ("io_threads", self.io_threads as u64),
            ("io_timeout_ms", self.io_timeout.as_millis() as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
            }
        }

        if self.max_window_size < self.initial_load_size.max(self.page_size) {
            return Err(ConfigError::Invalid(format!(
                "max_window_size ({}) must hold at least one load ({} pages)",
                self.max_window_size,
                self.initial_load_size.max(self.page_size)
            )));
        }

        Ok(())
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: name.to_string(), value }),
        Err(_) => Ok(None),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("{0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_VARS: &[&str] = &[
        "ROADBOOK_CACHE_ENTRIES",
        "ROADBOOK_PAGE_SIZE",
        "ROADBOOK_INITIAL_LOAD_SIZE",
        "ROADBOOK_MAX_WINDOW_SIZE",
        "ROADBOOK_IO_THREADS",
        "ROADBOOK_IO_TIMEOUT_MS",
        "ROADBOOK_DATA_DIR",
    ];

    #[test]
    fn test_default_config() {
        let config = RoadbookConfig::default();
        assert_eq!(config.cache_entries, 20);
        assert_eq!(config.page_size, 5);
        assert_eq!(config.initial_load_size, 7);
        assert_eq!(config.max_window_size, 30);
        assert_eq!(config.io_threads, 2);
        assert_eq!(config.io_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = RoadbookConfig::default()
            .with_cache_entries(8)
            .with_page_size(3)
            .with_initial_load_size(4)
            .with_max_window_size(12)
            .with_io_threads(1)
            .with_io_timeout(Duration::from_millis(500))
            .with_data_dir("/tmp/roadbook");

        assert_eq!(config.cache_entries, 8);
        assert_eq!(config.pager(), PagerConfig { page_size: 3, initial_load_size: 4, max_window_size: 12 });
        assert_eq!(config.io_timeout, Duration::from_millis(500));
        assert_eq!(config.session_file(), PathBuf::from("/tmp/roadbook/session.json"));
        assert_eq!(config.documents_dir(), PathBuf::from("/tmp/roadbook/documents"));
    }

    #[test]
    fn test_validate_rejects_zero_and_small_window() {
        assert!(RoadbookConfig::default().with_cache_entries(0).validate().is_err());
        assert!(RoadbookConfig::default().with_io_timeout(Duration::ZERO).validate().is_err());

        let err = RoadbookConfig::default().with_max_window_size(6).validate().unwrap_err();
        assert!(err.to_string().contains("max_window_size"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("ROADBOOK_CACHE_ENTRIES", "25");
        env::set_var("ROADBOOK_PAGE_SIZE", "4");
        env::set_var("ROADBOOK_IO_TIMEOUT_MS", "1500");
        env::set_var("ROADBOOK_DATA_DIR", "/tmp/roadbook-env");
        env::remove_var("ROADBOOK_INITIAL_LOAD_SIZE");
        env::remove_var("ROADBOOK_MAX_WINDOW_SIZE");
        env::remove_var("ROADBOOK_IO_THREADS");

        let config = RoadbookConfig::from_env().unwrap();
        assert_eq!(config.cache_entries, 25);
        assert_eq!(config.page_size, 4);
        assert_eq!(config.initial_load_size, 7); // default
        assert_eq!(config.io_timeout, Duration::from_millis(1500));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/roadbook-env"));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("ROADBOOK_IO_THREADS", "many");
        let err = RoadbookConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ROADBOOK_IO_THREADS"));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = RoadbookConfig::default()
            .with_cache_entries(12)
            .with_io_timeout(Duration::from_millis(2500))
            .with_data_dir("/tmp/roadbook");

        let toml = config.to_toml().unwrap();
        assert!(toml.contains("io_timeout_ms = 2500"));
        assert_eq!(RoadbookConfig::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RoadbookConfig::from_toml("page_size = 10\nmax_window_size = 40\n").unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.max_window_size, 40);
        assert_eq!(config.cache_entries, 20); // default
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            RoadbookConfig::from_toml("page_size = \"five\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("roadbook.toml");
        let config = RoadbookConfig::default().with_data_dir(temp.path());

        config.save_to_file(&path).unwrap();
        assert_eq!(RoadbookConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            RoadbookConfig::from_file("/nonexistent/roadbook.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
