//! `batchfetch config`: inspect and edit the INI settings file.
//!
//! Keys are addressed as `section.key`, e.g. `download.workers`. Every write
//! goes through [`ConfigKey::set`], so values are validated before the file
//! is rewritten.

use batchfetch::config::{config_file_path, ConfigFile, ConfigKey};
use clap::Subcommand;

use crate::error::CliError;

/// Placeholder printed for keys with an empty value.
const EMPTY_VALUE: &str = "<empty>";

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the value stored under a key
    Get {
        /// Key as section.key, for example download.workers
        key: String,
    },

    /// Validate and store a value under a key
    Set {
        /// Key as section.key, for example extract.auto_extract
        key: String,

        /// New value
        value: String,
    },

    /// Print every key with its current value
    List {
        /// Only show keys of this section (download, extract or logging)
        #[arg(long)]
        section: Option<String>,
    },

    /// Print where the settings file lives
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = lookup(&key)?;
            let config = ConfigFile::load()?;
            println!("{}", display_value(&key.get(&config)));
        }
        ConfigCommands::Set { key, value } => {
            let key = lookup(&key)?;
            let mut config = ConfigFile::load()?;
            key.set(&mut config, &value)?;
            config.save()?;
            println!("{} -> {}", key.name(), display_value(&key.get(&config)));
        }
        ConfigCommands::List { section } => {
            let config = ConfigFile::load()?;
            let lines = listing(&config, section.as_deref())?;
            println!("# {}", config_file_path().display());
            for line in lines {
                println!("{}", line);
            }
        }
        ConfigCommands::Path => println!("{}", config_file_path().display()),
    }
    Ok(())
}

fn lookup(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        let known: Vec<String> = ConfigKey::all().iter().map(ConfigKey::name).collect();
        CliError::Config(format!(
            "no setting named '{}' (known: {})",
            key,
            known.join(", ")
        ))
    })
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        EMPTY_VALUE
    } else {
        value
    }
}

/// One aligned `section.key = value` line per key, optionally for one section.
fn listing(config: &ConfigFile, section: Option<&str>) -> Result<Vec<String>, CliError> {
    let keys: Vec<&ConfigKey> = ConfigKey::all()
        .iter()
        .filter(|key| section.map_or(true, |s| key.section() == s))
        .collect();

    if keys.is_empty() {
        return Err(CliError::Config(format!(
            "no settings section named '{}'",
            section.unwrap_or_default()
        )));
    }

    let width = keys.iter().map(|key| key.name().len()).max().unwrap_or(0);
    Ok(keys
        .into_iter()
        .map(|key| {
            format!(
                "{:<width$} = {}",
                key.name(),
                display_value(&key.get(config)),
                width = width
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_covers_every_key_aligned() {
        let lines = listing(&ConfigFile::default(), None).unwrap();

        assert_eq!(lines.len(), ConfigKey::all().len());
        assert!(lines[0].starts_with("download.output_dir"));
        let columns: Vec<usize> = lines.iter().filter_map(|l| l.find(" = ")).collect();
        assert_eq!(columns.len(), lines.len());
        assert!(columns.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_listing_filters_by_section() {
        let lines = listing(&ConfigFile::default(), Some("extract")).unwrap();

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.starts_with("extract.")));
        assert!(matches!(
            listing(&ConfigFile::default(), Some("network")),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_lookup_reports_known_keys() {
        assert_eq!(lookup("download.workers").unwrap(), ConfigKey::DownloadWorkers);

        let Err(CliError::Config(message)) = lookup("download.speed") else {
            panic!("unknown key accepted");
        };
        assert!(message.contains("download.speed"));
        assert!(message.contains("logging.level"));
    }

    #[test]
    fn test_display_value_marks_empty() {
        assert_eq!(display_value(""), EMPTY_VALUE);
        assert_eq!(display_value("4"), "4");
    }
}
