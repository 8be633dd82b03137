//! Configuration for the download engine and its INI file.
//!
//! Engine types ([`BatchOptions`], [`DownloaderSettings`]) use builder-style
//! `with_*` setters. [`ConfigFile`] persists user defaults to
//! `<config_dir>/batchfetch/config.ini`:
//!
//! ```ini
//! [download]
//! output_dir = downloads
//! workers = 10
//! skip_probe = false
//! read_timeout_secs = 60
//!
//! [extract]
//! auto_extract = false
//! to_subfolder = false
//! delete_archive = false
//!
//! [logging]
//! directory = /home/user/.cache/batchfetch
//! level = info
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::{BatchEvent, BatchEventCallback, DEFAULT_POOL_SIZE};
use crate::extract::ExtractSettings;
use crate::logging::LoggingConfig;

/// Output root used when nothing else is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Default timeout for a metadata probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for a transfer read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for one batch.
#[derive(Clone)]
pub struct BatchOptions {
    /// Directory every request destination is relative to.
    pub output_root: PathBuf,
    /// Number of concurrent workers for probing and transfers.
    pub pool_size: usize,
    /// Skip the metadata probe; every file is then attempted with a range.
    pub skip_probe: bool,
    /// Extract downloaded `.zip` files once all transfers finished.
    pub auto_extract: bool,
    /// Extract each archive into a folder named after it.
    pub extract_to_subfolder: bool,
    /// Delete each archive after it was extracted.
    pub delete_archive_after_extract: bool,
    /// Receives lifecycle events from the coordinator thread.
    pub event_callback: Option<BatchEventCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            pool_size: DEFAULT_POOL_SIZE,
            skip_probe: false,
            auto_extract: false,
            extract_to_subfolder: false,
            delete_archive_after_extract: false,
            event_callback: None,
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("output_root", &self.output_root)
            .field("pool_size", &self.pool_size)
            .field("skip_probe", &self.skip_probe)
            .field("auto_extract", &self.auto_extract)
            .field("extract_to_subfolder", &self.extract_to_subfolder)
            .field(
                "delete_archive_after_extract",
                &self.delete_archive_after_extract,
            )
            .field("event_callback", &self.event_callback.is_some())
            .finish()
    }
}

impl BatchOptions {
    /// Create options writing into `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Default::default()
        }
    }

    /// Set the number of concurrent workers (minimum 1).
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Enable or disable the metadata probe.
    pub fn with_skip_probe(mut self, skip: bool) -> Self {
        self.skip_probe = skip;
        self
    }

    /// Enable or disable archive extraction.
    pub fn with_auto_extract(mut self, extract: bool) -> Self {
        self.auto_extract = extract;
        self
    }

    /// Extract into per-archive folders.
    pub fn with_extract_to_subfolder(mut self, subfolder: bool) -> Self {
        self.extract_to_subfolder = subfolder;
        self
    }

    /// Delete archives after a successful extraction.
    pub fn with_delete_archive(mut self, delete: bool) -> Self {
        self.delete_archive_after_extract = delete;
        self
    }

    /// Register a lifecycle event callback.
    pub fn with_event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BatchEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn extract_settings(&self) -> ExtractSettings {
        ExtractSettings {
            to_subfolder: self.extract_to_subfolder,
            delete_archive: self.delete_archive_after_extract,
        }
    }
}

/// HTTP client settings shared by every batch of a downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderSettings {
    /// Bound on a whole HEAD probe.
    pub probe_timeout: Duration,
    /// Bound on connection establishment.
    pub connect_timeout: Duration,
    /// Bound on each transfer read.
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: format!("batchfetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownloaderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Errors from loading, saving or editing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSection {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub skip_probe: bool,
    pub read_timeout_secs: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: DEFAULT_POOL_SIZE,
            skip_probe: false,
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
        }
    }
}

/// `[extract]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSection {
    pub auto_extract: bool,
    pub to_subfolder: bool,
    pub delete_archive: bool,
}

/// User configuration persisted as INI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub download: DownloadSection,
    pub extract: ExtractSection,
    pub logging: LoggingConfig,
}

/// Default location of the configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchfetch")
        .join("config.ini")
}

impl ConfigFile {
    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields defaults.
    ///
    /// Unknown sections and keys are ignored. Known keys with malformed
    /// values are an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Read {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(err) => ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini
                .section(Some(key.section()))
                .and_then(|props| props.get(key.key_name()))
            {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }

        ini.write_to_file(path).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Engine options for a batch writing into the configured output dir.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::new(self.download.output_dir.clone())
            .with_pool_size(self.download.workers)
            .with_skip_probe(self.download.skip_probe)
            .with_auto_extract(self.extract.auto_extract)
            .with_extract_to_subfolder(self.extract.to_subfolder)
            .with_delete_archive(self.extract.delete_archive)
    }

    /// HTTP settings with the configured read timeout.
    pub fn downloader_settings(&self) -> DownloaderSettings {
        DownloaderSettings::default()
            .with_read_timeout(Duration::from_secs(self.download.read_timeout_secs))
    }
}

/// A `section.key` address into [`ConfigFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    DownloadOutputDir,
    DownloadWorkers,
    DownloadSkipProbe,
    DownloadReadTimeoutSecs,
    ExtractAutoExtract,
    ExtractToSubfolder,
    ExtractDeleteArchive,
    LoggingDirectory,
    LoggingLevel,
}

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::DownloadOutputDir,
            Self::DownloadWorkers,
            Self::DownloadSkipProbe,
            Self::DownloadReadTimeoutSecs,
            Self::ExtractAutoExtract,
            Self::ExtractToSubfolder,
            Self::ExtractDeleteArchive,
            Self::LoggingDirectory,
            Self::LoggingLevel,
        ]
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::DownloadOutputDir
            | Self::DownloadWorkers
            | Self::DownloadSkipProbe
            | Self::DownloadReadTimeoutSecs => "download",
            Self::ExtractAutoExtract | Self::ExtractToSubfolder | Self::ExtractDeleteArchive => {
                "extract"
            }
            Self::LoggingDirectory | Self::LoggingLevel => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::DownloadOutputDir => "output_dir",
            Self::DownloadWorkers => "workers",
            Self::DownloadSkipProbe => "skip_probe",
            Self::DownloadReadTimeoutSecs => "read_timeout_secs",
            Self::ExtractAutoExtract => "auto_extract",
            Self::ExtractToSubfolder => "to_subfolder",
            Self::ExtractDeleteArchive => "delete_archive",
            Self::LoggingDirectory => "directory",
            Self::LoggingLevel => "level",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value rendered as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::DownloadOutputDir => config.download.output_dir.display().to_string(),
            Self::DownloadWorkers => config.download.workers.to_string(),
            Self::DownloadSkipProbe => config.download.skip_probe.to_string(),
            Self::DownloadReadTimeoutSecs => config.download.read_timeout_secs.to_string(),
            Self::ExtractAutoExtract => config.extract.auto_extract.to_string(),
            Self::ExtractToSubfolder => config.extract.to_subfolder.to_string(),
            Self::ExtractDeleteArchive => config.extract.delete_archive.to_string(),
            Self::LoggingDirectory => config.logging.directory.display().to_string(),
            Self::LoggingLevel => config.logging.level.clone(),
        }
    }

    /// Parse and store `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            Self::DownloadOutputDir => {
                if value.is_empty() {
                    return Err(self.invalid(value, "must not be empty"));
                }
                config.download.output_dir = PathBuf::from(value);
            }
            Self::DownloadWorkers => {
                let workers: usize = value
                    .parse()
                    .map_err(|_| self.invalid(value, "expected a positive integer"))?;
                if workers == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.download.workers = workers;
            }
            Self::DownloadSkipProbe => config.download.skip_probe = self.parse_bool(value)?,
            Self::DownloadReadTimeoutSecs => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| self.invalid(value, "expected a number of seconds"))?;
                if secs == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.download.read_timeout_secs = secs;
            }
            Self::ExtractAutoExtract => config.extract.auto_extract = self.parse_bool(value)?,
            Self::ExtractToSubfolder => config.extract.to_subfolder = self.parse_bool(value)?,
            Self::ExtractDeleteArchive => config.extract.delete_archive = self.parse_bool(value)?,
            Self::LoggingDirectory => config.logging.directory = PathBuf::from(value),
            Self::LoggingLevel => {
                let level = value.to_ascii_lowercase();
                if !matches!(
                    level.as_str(),
                    "trace" | "debug" | "info" | "warn" | "error" | "off"
                ) {
                    return Err(self.invalid(value, "expected trace, debug, info, warn, error or off"));
                }
                config.logging.level = level;
            }
        }
        Ok(())
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_batch_options_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.pool_size, 10);
        assert!(!options.skip_probe);
        assert!(!options.auto_extract);
        assert!(options.event_callback.is_none());
        assert_eq!(options.output_root, PathBuf::from("downloads"));
    }

    #[test]
    fn test_batch_options_builder() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let options = BatchOptions::new("/tmp/out")
            .with_pool_size(0)
            .with_skip_probe(true)
            .with_auto_extract(true)
            .with_extract_to_subfolder(true)
            .with_delete_archive(true)
            .with_event_callback(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(options.pool_size, 1);
        assert!(options.skip_probe);
        assert_eq!(
            options.extract_settings(),
            ExtractSettings {
                to_subfolder: true,
                delete_archive: true,
            }
        );

        let callback = options.event_callback.clone().unwrap();
        callback(&BatchEvent::TransfersComplete);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(format!("{:?}", options).contains("event_callback: true"));
    }

    #[test]
    fn test_downloader_settings_defaults() {
        let settings = DownloaderSettings::default();
        assert_eq!(settings.probe_timeout, Duration::from_secs(15));
        assert_eq!(settings.connect_timeout, Duration::from_secs(15));
        assert_eq!(settings.read_timeout, Duration::from_secs(60));
        assert!(settings.user_agent.starts_with("batchfetch/"));
    }

    #[test]
    fn test_config_key_parse_and_name() {
        let key: ConfigKey = "download.workers".parse().unwrap();
        assert_eq!(key, ConfigKey::DownloadWorkers);
        assert_eq!(key.name(), "download.workers");
        assert_eq!(key.to_string(), "download.workers");
        assert!(matches!(
            "download.nope".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_config_key_set_validates() {
        let mut config = ConfigFile::default();
        ConfigKey::DownloadWorkers.set(&mut config, "4").unwrap();
        ConfigKey::ExtractAutoExtract.set(&mut config, "yes").unwrap();
        ConfigKey::LoggingLevel.set(&mut config, "DEBUG").unwrap();

        assert_eq!(config.download.workers, 4);
        assert!(config.extract.auto_extract);
        assert_eq!(config.logging.level, "debug");

        assert!(ConfigKey::DownloadWorkers.set(&mut config, "0").is_err());
        assert!(ConfigKey::DownloadWorkers.set(&mut config, "many").is_err());
        assert!(ConfigKey::ExtractToSubfolder.set(&mut config, "maybe").is_err());
        assert!(ConfigKey::LoggingLevel.set(&mut config, "loud").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.download.output_dir = PathBuf::from("/data/roms");
        config.download.workers = 3;
        config.extract.to_subfolder = true;
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_ignores_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(
            &path,
            "[download]\nworkers = 2\ncolour = blue\n\n[misc]\nfoo = bar\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.download.workers, 2);
        assert!(!config.download.skip_probe);
    }

    #[test]
    fn test_load_rejects_bad_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[extract]\nauto_extract = sometimes\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_conversion_to_engine_types() {
        let mut config = ConfigFile::default();
        config.download.workers = 6;
        config.download.read_timeout_secs = 5;
        config.extract.auto_extract = true;

        let options = config.batch_options();
        assert_eq!(options.pool_size, 6);
        assert!(options.auto_extract);

        let settings = config.downloader_settings();
        assert_eq!(settings.read_timeout, Duration::from_secs(5));
    }
}
