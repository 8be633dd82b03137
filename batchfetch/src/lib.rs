//! batchfetch - bounded-concurrency batch downloader
//!
//! Fetches a list of remote files over HTTP into an output directory with a
//! fixed number of workers. Interrupted files resume from their `.part`
//! artifact, a running batch can be paused, resumed or cancelled, and
//! downloaded `.zip` archives can be unpacked once every transfer finished.
//!
//! - [`download`]: the engine ([`BatchDownloader`], [`BatchHandle`])
//! - [`extract`]: zip extraction run after the transfer phase
//! - [`config`]: engine options and the INI configuration file
//! - [`logging`]: file and stderr logging setup

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod logging;

pub use config::{BatchOptions, ConfigFile, DownloaderSettings};
pub use download::{
    BatchController, BatchDownloader, BatchEvent, BatchHandle, BatchPhase, BatchReport,
    BatchSnapshot, BatchStatus, DirectoryPlan, DownloadRequest, Eta,
};
pub use error::{BatchError, BatchResult, ExtractError, TransferError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
