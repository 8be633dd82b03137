//! Shared setup for commands that run the engine.

use batchfetch::config::ConfigFile;
use batchfetch::logging::{init_logging, LoggingGuard};

use crate::error::CliError;

/// Loaded configuration plus the logging guard for one CLI invocation.
pub struct CliRunner {
    config: ConfigFile,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load the configuration file and start logging.
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let mut logging = config.logging.clone();
        logging.stderr = verbose;
        let guard = init_logging(&logging)?;

        Ok(Self {
            config,
            _logging: guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Record which command started, and with which version.
    pub fn log_startup(&self, command: &str) {
        tracing::info!(
            version = batchfetch::VERSION,
            command,
            log_file = %self.config.logging.log_file().display(),
            "batchfetch starting"
        );
    }
}
