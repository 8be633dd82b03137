//! Single-file HTTP transfer with resume support.
//!
//! Bytes always land in `<destination>.part`; the partial is renamed to the
//! final name only after the whole body arrived. A partial is appended to only
//! when the file is resumable *and* the server answers `206` from the offset
//! we asked for. Any other answer restarts the file from zero.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use tokio::time::timeout;

use super::control::BatchControl;
use super::request::ResolvedFile;
use super::state::BatchStats;
use super::transport::Transport;
use crate::error::{TransferError, TransferResult};

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Shared state a transfer reports into and obeys.
#[derive(Debug, Clone, Copy)]
pub struct TransferContext<'a> {
    pub stats: &'a BatchStats,
    pub control: &'a BatchControl,
}

/// How a transfer ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The final artifact already had the expected size.
    Skipped,
    /// The final artifact is in place; `bytes` were fetched by this call.
    Completed { bytes: u64 },
    /// Cancelled mid-stream; the partial holds a valid prefix.
    Cancelled { bytes: u64 },
}

impl TransferOutcome {
    /// Whether the final artifact exists after this outcome.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed { .. })
    }

    /// Bytes fetched by this call.
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Skipped => 0,
            Self::Completed { bytes } | Self::Cancelled { bytes } => *bytes,
        }
    }
}

/// One step of reading a response body.
#[derive(Debug)]
enum Pull<B> {
    Data(B),
    End,
    Cancelled,
}

/// Result of streaming a body to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyOutcome {
    Finished(u64),
    Cancelled(u64),
}

/// Downloads one file at a time with range-based resume.
///
/// Each network wait (the response head, every body chunk) is bounded by
/// `read_timeout` and abandoned as soon as the batch is cancelled.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    transport: Transport,
    read_timeout: Duration,
}

impl HttpTransfer {
    pub fn new(transport: Transport, read_timeout: Duration) -> Self {
        Self {
            transport,
            read_timeout,
        }
    }

    /// Fetch `file`, resuming from its partial artifact when possible.
    pub fn transfer(
        &self,
        file: &ResolvedFile,
        ctx: TransferContext<'_>,
    ) -> TransferResult<TransferOutcome> {
        let part = file.part_path();

        if let Some(len) = file_len(&file.destination) {
            if file.expected_size > 0 && len == file.expected_size {
                tracing::debug!(path = %file.destination.display(), "already complete, skipping");
                return Ok(TransferOutcome::Skipped);
            }
            adopt_as_partial(&file.destination, &part)?;
        }

        let mut existing = file_len(&part).unwrap_or(0);
        if file.expected_size > 0 {
            if existing == file.expected_size {
                finalize(&part, &file.destination)?;
                return Ok(TransferOutcome::Completed { bytes: 0 });
            }
            if existing > file.expected_size {
                existing = 0;
            }
        }

        let range_from = (existing > 0 && file.resumable).then_some(existing);

        let mut request = self.transport.client().get(&file.url);
        if let Some(offset) = range_from {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let read_timeout = self.read_timeout;
        let sent = self
            .transport
            .block_on_cancellable(ctx.control, async move {
                timeout(read_timeout, request.send()).await
            });
        let mut response = match sent {
            None => return Ok(TransferOutcome::Cancelled { bytes: 0 }),
            Some(Err(_)) => {
                return Err(TransferError::Timeout {
                    url: file.url.clone(),
                })
            }
            Some(Ok(result)) => result.map_err(|e| TransferError::Request {
                url: file.url.clone(),
                source: e,
            })?,
        };

        let status = response.status();
        let append = match (status, range_from) {
            (StatusCode::PARTIAL_CONTENT, Some(offset)) => {
                if let Some(start) = content_range_start(&response) {
                    if start != offset {
                        return Err(TransferError::RangeMismatch {
                            url: file.url.clone(),
                            requested: offset,
                            received: start,
                        });
                    }
                }
                true
            }
            (StatusCode::OK, _) => false,
            (StatusCode::RANGE_NOT_SATISFIABLE, Some(_)) if file.expected_size == 0 => {
                // Nothing left past our offset: the partial is the whole file.
                finalize(&part, &file.destination)?;
                return Ok(TransferOutcome::Completed { bytes: 0 });
            }
            _ => {
                return Err(TransferError::Status {
                    url: file.url.clone(),
                    status: status.as_u16(),
                })
            }
        };

        if let Some(parent) = file.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
        }

        let (start_byte, out) = if append {
            let out = OpenOptions::new()
                .append(true)
                .open(&part)
                .map_err(|e| TransferError::io(&part, e))?;
            (existing, out)
        } else {
            if existing > 0 {
                tracing::debug!(url = %file.url, "server did not resume, restarting from zero");
            }
            let out = File::create(&part).map_err(|e| TransferError::io(&part, e))?;
            (0, out)
        };

        let pull = || self.next_chunk(&mut response, &file.url, ctx.control);
        let bytes = match copy_with_progress(pull, out, &part, ctx)? {
            CopyOutcome::Finished(bytes) => bytes,
            CopyOutcome::Cancelled(bytes) => {
                tracing::debug!(path = %part.display(), bytes, "transfer cancelled, partial kept");
                return Ok(TransferOutcome::Cancelled { bytes });
            }
        };

        let total = start_byte + bytes;
        if file.expected_size > 0 && total != file.expected_size {
            return Err(TransferError::Incomplete {
                path: part,
                expected: file.expected_size,
                actual: total,
            });
        }

        finalize(&part, &file.destination)?;
        Ok(TransferOutcome::Completed { bytes })
    }

    /// Wait for the next body chunk, giving up on timeout or cancellation.
    fn next_chunk(
        &self,
        response: &mut Response,
        url: &str,
        control: &BatchControl,
    ) -> TransferResult<Pull<Bytes>> {
        let read_timeout = self.read_timeout;
        let waited = self.transport.block_on_cancellable(control, async {
            timeout(read_timeout, response.chunk()).await
        });
        match waited {
            None => Ok(Pull::Cancelled),
            Some(Err(_)) => Err(TransferError::Timeout {
                url: url.to_string(),
            }),
            Some(Ok(Ok(Some(chunk)))) => Ok(Pull::Data(chunk)),
            Some(Ok(Ok(None))) => Ok(Pull::End),
            Some(Ok(Err(source))) => Err(TransferError::Stream {
                url: url.to_string(),
                source,
            }),
        }
    }
}

/// Drain `pull` into `out`, counting every chunk into the batch stats.
///
/// Between chunks the pause gate is honoured and cancellation checked. The
/// writer is flushed before returning, so whatever was written is a valid
/// prefix of the body.
fn copy_with_progress<B, S, W>(
    mut pull: S,
    out: W,
    path: &Path,
    ctx: TransferContext<'_>,
) -> TransferResult<CopyOutcome>
where
    B: AsRef<[u8]>,
    S: FnMut() -> TransferResult<Pull<B>>,
    W: Write,
{
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, out);
    let mut written = 0u64;

    loop {
        if !ctx.control.checkpoint() {
            writer.flush().map_err(|e| TransferError::io(path, e))?;
            return Ok(CopyOutcome::Cancelled(written));
        }

        let chunk = match pull()? {
            Pull::Data(chunk) => chunk,
            Pull::End => break,
            Pull::Cancelled => {
                writer.flush().map_err(|e| TransferError::io(path, e))?;
                return Ok(CopyOutcome::Cancelled(written));
            }
        };
        let chunk = chunk.as_ref();

        writer
            .write_all(chunk)
            .map_err(|e| TransferError::io(path, e))?;

        written += chunk.len() as u64;
        ctx.stats.add_bytes(chunk.len() as u64);
    }

    writer.flush().map_err(|e| TransferError::io(path, e))?;
    Ok(CopyOutcome::Finished(written))
}

/// Start offset from a `Content-Range: bytes <start>-<end>/<total>` header.
fn content_range_start(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range_start(value)
}

fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Turn a stale final artifact into the partial so the two never coexist.
fn adopt_as_partial(destination: &Path, part: &Path) -> TransferResult<()> {
    if part.exists() {
        fs::remove_file(destination).map_err(|e| TransferError::io(destination, e))
    } else {
        tracing::debug!(path = %destination.display(), "treating existing file as partial");
        fs::rename(destination, part).map_err(|e| TransferError::io(destination, e))
    }
}

fn finalize(part: &Path, destination: &Path) -> TransferResult<()> {
    fs::rename(part, destination).map_err(|e| TransferError::io(part, e))
}
