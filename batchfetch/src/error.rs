//! Error types for the download engine.
//!
//! Errors are split by how far they propagate:
//!
//! - [`TransferError`] is absorbed per file. The scheduler logs it and counts
//!   the file as failed; the batch keeps going.
//! - [`ExtractError`] describes a single archive failing to unpack. It is
//!   wrapped into [`BatchError::Extraction`] and ends post-processing.
//! - [`BatchError`] is terminal and returned to the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for batch-level operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Result type for a single file transfer.
pub type TransferResult<T> = Result<T, TransferError>;

/// Result type for archive extraction.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors that end a batch (setup or post-processing).
#[derive(Debug, Error)]
pub enum BatchError {
    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The output root could not be created before any transfer started.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A download request cannot be placed under the output root.
    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    /// An archive failed to extract; remaining archives were not attempted.
    #[error("failed to extract {archive}: {source}")]
    Extraction {
        archive: String,
        #[source]
        source: ExtractError,
    },

    /// The runtime driving network I/O could not be started.
    #[error("failed to start network runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The coordinator thread could not be started.
    #[error("failed to start batch coordinator: {0}")]
    SpawnCoordinator(#[source] io::Error),

    /// The coordinator thread panicked before producing a report.
    #[error("batch coordinator panicked")]
    CoordinatorPanicked,
}

/// Errors that abort a single file's transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request could not be sent.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The connection failed while the body was streaming.
    #[error("reading body of {url} failed: {source}")]
    Stream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server sent nothing for longer than the read timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The server answered with a status other than 200 or 206.
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// A local read, write or rename failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stream ended before the expected number of bytes arrived.
    #[error("incomplete transfer of {}: expected {expected} bytes, have {actual}", path.display())]
    Incomplete {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A ranged response does not start where the partial file ends.
    #[error("range mismatch for {url}: requested offset {requested}, server sent {received}")]
    RangeMismatch {
        url: String,
        requested: u64,
        received: u64,
    },
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that fail extraction of one archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive file could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive is corrupt or uses an unsupported feature.
    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// An entry would be written outside the destination directory.
    #[error("entry {entry:?} escapes the destination directory")]
    UnsafeEntry { entry: String },

    /// Writing an entry or removing the archive failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
