//! CLI error type.

use std::fmt;
use std::io;
use std::path::PathBuf;

use batchfetch::config::ConfigError;
use batchfetch::logging::LoggingError;
use batchfetch::BatchError;

/// Everything that can end a CLI command unsuccessfully.
#[derive(Debug)]
pub enum CliError {
    /// Bad arguments or configuration.
    Config(String),
    /// Loading or saving the configuration file failed.
    ConfigFile(ConfigError),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// The input file could not be read.
    Input { path: PathBuf, source: io::Error },
    /// The batch could not start or ended with an error.
    Batch(BatchError),
    /// The report could not be serialized.
    Json(serde_json::Error),
    /// The batch finished but some files failed.
    FilesFailed { failed: usize, total: usize },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) | CliError::Input { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "{}", e),
            CliError::Input { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            CliError::Batch(e) => write!(f, "{}", e),
            CliError::Json(e) => write!(f, "Failed to serialize report: {}", e),
            CliError::FilesFailed { failed, total } => {
                write!(f, "{} of {} files failed to download", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Input { source, .. } => Some(source),
            CliError::Batch(e) => Some(e),
            CliError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<BatchError> for CliError {
    fn from(e: BatchError) -> Self {
        CliError::Batch(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}
