//! Metadata probing before transfer.
//!
//! A HEAD request per file tells the batch how large each file is and whether
//! the server honours byte ranges. Probing never fails a batch: any error
//! degrades the file to "size unknown, not resumable".

use std::fs;

use parking_lot::Mutex;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};

use super::control::BatchControl;
use super::pool::WorkerPool;
use super::request::ResolvedFile;
use super::state::BatchStats;
use super::transport::Transport;

/// What a HEAD request revealed about a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Remote size in bytes; `0` when unknown.
    pub size: u64,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub resumable: bool,
}

impl ProbeResult {
    /// Result used whenever the probe fails.
    pub fn unknown() -> Self {
        Self {
            size: 0,
            resumable: false,
        }
    }
}

/// Issues metadata-only requests.
#[derive(Debug, Clone)]
pub struct Prober {
    transport: Transport,
}

impl Prober {
    /// Create a prober on `transport`, whose client timeout bounds each probe.
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Query size and range support of `url`.
    pub fn probe(&self, url: &str) -> ProbeResult {
        self.transport.block_on(self.head(url))
    }

    async fn head(&self, url: &str) -> ProbeResult {
        let response = match self.transport.client().head(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url, error = %e, "probe failed");
                return ProbeResult::unknown();
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url, status = %response.status(), "probe returned non-success status");
            return ProbeResult::unknown();
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let resumable = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        ProbeResult { size, resumable }
    }

    /// Probe every file over `pool` and record the bytes still to fetch.
    ///
    /// Files keep their input order. Files left unprobed because of
    /// cancellation keep their original settings.
    pub fn probe_all(
        &self,
        files: Vec<ResolvedFile>,
        pool: &WorkerPool,
        control: &BatchControl,
        stats: &BatchStats,
    ) -> Vec<ResolvedFile> {
        let results: Mutex<Vec<Option<ProbeResult>>> = Mutex::new(vec![None; files.len()]);

        stats.set_probing(true);
        let jobs: Vec<(usize, String)> = files
            .iter()
            .enumerate()
            .map(|(index, file)| (index, file.url.clone()))
            .collect();

        pool.run(jobs, control, |(index, url)| {
            if let Some(result) = self.transport.block_on_cancellable(control, self.head(&url)) {
                results.lock()[index] = Some(result);
                stats.record_probed();
            }
        });

        let results = results.into_inner();
        let resolved: Vec<ResolvedFile> = files
            .into_iter()
            .zip(results)
            .map(|(file, result)| match result {
                Some(probe) => ResolvedFile {
                    expected_size: probe.size,
                    resumable: probe.resumable,
                    ..file
                },
                None => file,
            })
            .collect();

        let expected_total: u64 = resolved.iter().map(remaining_bytes).sum();
        stats.set_bytes_expected_total(expected_total);
        stats.set_probing(false);

        tracing::info!(
            files = resolved.len(),
            bytes_expected = expected_total,
            "probe complete"
        );

        resolved
    }
}

/// Bytes a transfer of `file` is expected to fetch, given what is on disk.
///
/// Zero when the size is unknown or the final artifact already matches.
pub fn remaining_bytes(file: &ResolvedFile) -> u64 {
    if file.expected_size == 0 {
        return 0;
    }

    let final_len = fs::metadata(&file.destination).ok().map(|m| m.len());
    if final_len == Some(file.expected_size) {
        return 0;
    }

    if !file.resumable {
        return file.expected_size;
    }

    let existing = fs::metadata(file.part_path())
        .ok()
        .map(|m| m.len())
        .or(final_len)
        .unwrap_or(0);

    if existing > file.expected_size {
        file.expected_size
    } else {
        file.expected_size - existing
    }
}
