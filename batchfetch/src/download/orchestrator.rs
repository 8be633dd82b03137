//! Batch orchestration.
//!
//! [`BatchDownloader::start_batch`] runs the phases of a batch on a
//! coordinator thread:
//!
//! 1. probe every file (unless disabled),
//! 2. transfer over the worker pool,
//! 3. extract collected archives once the pool has drained.
//!
//! The caller keeps a [`BatchHandle`] to steer and observe the batch.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;

use super::control::BatchControl;
use super::http::{HttpTransfer, TransferContext, TransferOutcome};
use super::pool::WorkerPool;
use super::probe::Prober;
use super::progress::{
    format_duration, megabytes, ActiveClock, BatchSnapshot, ProgressCallback, ProgressMonitor,
    ProgressReporter,
};
use super::request::{part_path, DownloadRequest, ResolvedFile};
use super::state::BatchStats;
use super::transport::{io_runtime, Transport};
use crate::config::{BatchOptions, DownloaderSettings};
use crate::error::{BatchError, BatchResult};
use crate::extract::{extract_archives, ZipExtractor};

/// Callback receiving batch lifecycle events.
pub type BatchEventCallback = Arc<dyn Fn(&BatchEvent) + Send + Sync>;

/// Lifecycle milestones, emitted from the coordinator thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// Sizing finished (immediately when probing is skipped).
    ProbeComplete { bytes_expected_total: u64 },
    /// The transfer pool drained. Emitted exactly once per batch.
    TransfersComplete,
    /// Extraction of `archives` files is starting.
    ExtractionStarted { archives: usize },
    /// The batch produced a report.
    Finished { status: BatchStatus },
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Cancelled,
}

/// Terminal summary of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub file_count: usize,
    /// Files whose final artifact exists, including skipped ones.
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    /// Archives extracted.
    pub extracted: usize,
    /// Active (unpaused) duration.
    pub elapsed: Duration,
}

impl BatchReport {
    /// Average transfer rate over active time, in bytes per second.
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// Whether every file made it.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Completed && self.failed == 0
    }

    /// One-line status message.
    pub fn summary(&self) -> String {
        if self.status == BatchStatus::Cancelled {
            return "Download cancelled".to_string();
        }

        let elapsed = format_duration(self.elapsed);
        let mut line = if self.extracted > 0 {
            format!(
                "✓ Downloaded and extracted {} files in {}",
                self.file_count, elapsed
            )
        } else {
            format!(
                "✓ Downloaded {} files in {} (avg {:.2} MB/s)",
                self.file_count,
                elapsed,
                megabytes(self.average_speed())
            )
        };
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", self.failed));
        }
        line
    }
}

/// Entry point of the engine. Cheap to clone; clones share HTTP clients
/// and the network runtime.
#[derive(Debug, Clone)]
pub struct BatchDownloader {
    prober: Prober,
    transfer: HttpTransfer,
}

impl BatchDownloader {
    /// Build the probe and transfer clients from `settings`.
    pub fn new(settings: DownloaderSettings) -> BatchResult<Self> {
        let runtime = io_runtime().map_err(BatchError::Runtime)?;

        let probe_client = Client::builder()
            .timeout(settings.probe_timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(BatchError::HttpClient)?;

        // No total deadline: bodies may take hours. Each wait is bounded instead.
        let transfer_client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent)
            .build()
            .map_err(BatchError::HttpClient)?;

        Ok(Self {
            prober: Prober::new(Transport::new(probe_client, Arc::clone(&runtime))),
            transfer: HttpTransfer::new(
                Transport::new(transfer_client, runtime),
                settings.read_timeout,
            ),
        })
    }

    /// Start downloading `requests` in the background.
    ///
    /// The output root is created and every destination validated before
    /// this returns; nothing is fetched if either fails. Two requests may
    /// not share a destination, nor may one land on another's partial.
    pub fn start_batch(
        &self,
        requests: Vec<DownloadRequest>,
        options: BatchOptions,
    ) -> BatchResult<BatchHandle> {
        fs::create_dir_all(&options.output_root).map_err(|e| BatchError::CreateOutputDir {
            path: options.output_root.clone(),
            source: e,
        })?;

        let mut claimed = HashSet::with_capacity(requests.len() * 2);
        let mut files = Vec::with_capacity(requests.len());
        for request in &requests {
            let destination = request.resolve_destination(&options.output_root)?;
            let part = part_path(&destination);
            if claimed.contains(&destination) || claimed.contains(&part) {
                return Err(BatchError::InvalidRequest(format!(
                    "duplicate destination '{}'",
                    request.destination.display()
                )));
            }
            claimed.insert(part);
            claimed.insert(destination.clone());
            files.push(ResolvedFile {
                url: request.url.clone(),
                destination,
                expected_size: 0,
                resumable: true,
            });
        }

        let started = Instant::now();
        let stats = Arc::new(BatchStats::new(files.len()));
        let control = Arc::new(BatchControl::new());
        let clock = Arc::new(ActiveClock::start(started));
        let monitor = Arc::new(ProgressMonitor::new(
            Arc::clone(&stats),
            Arc::clone(&control),
            Arc::clone(&clock),
            started,
        ));

        tracing::info!(
            files = files.len(),
            output = %options.output_root.display(),
            workers = options.pool_size,
            skip_probe = options.skip_probe,
            auto_extract = options.auto_extract,
            "batch started"
        );

        let coordinator = Coordinator {
            downloader: self.clone(),
            options,
            stats: Arc::clone(&stats),
            control: Arc::clone(&control),
            clock: Arc::clone(&clock),
        };
        let join = thread::Builder::new()
            .name("batch-coordinator".to_string())
            .spawn(move || coordinator.run(files))
            .map_err(BatchError::SpawnCoordinator)?;

        Ok(BatchHandle {
            controller: BatchController::new(control, clock, Arc::clone(&stats)),
            monitor,
            stats,
            coordinator: Some(join),
        })
    }
}

/// Owns one batch's shared state on the coordinator thread.
struct Coordinator {
    downloader: BatchDownloader,
    options: BatchOptions,
    stats: Arc<BatchStats>,
    control: Arc<BatchControl>,
    clock: Arc<ActiveClock>,
}

impl Coordinator {
    fn run(self, files: Vec<ResolvedFile>) -> BatchResult<BatchReport> {
        let result = self.run_phases(files);

        self.clock.stop(Instant::now());
        self.stats.mark_finished();

        match &result {
            Ok(report) => {
                tracing::info!(
                    status = ?report.status,
                    completed = report.completed,
                    skipped = report.skipped,
                    failed = report.failed,
                    bytes = report.bytes_transferred,
                    extracted = report.extracted,
                    elapsed = %format_duration(report.elapsed),
                    "batch finished"
                );
                self.emit(BatchEvent::Finished {
                    status: report.status,
                });
            }
            Err(e) => tracing::error!(error = %e, "batch failed"),
        }

        result
    }

    fn run_phases(&self, files: Vec<ResolvedFile>) -> BatchResult<BatchReport> {
        let pool = WorkerPool::new(self.options.pool_size);

        let files = if self.options.skip_probe {
            // Sizes unknown: nothing to sum, progress falls back to file counts.
            self.stats.set_bytes_expected_total(0);
            files
        } else {
            self.downloader
                .prober
                .probe_all(files, &pool, &self.control, &self.stats)
        };
        self.emit(BatchEvent::ProbeComplete {
            bytes_expected_total: self.stats.bytes_expected_total(),
        });

        let candidates = self.transfer_all(files, &pool);
        self.emit(BatchEvent::TransfersComplete);

        let mut extracted = 0;
        if self.options.auto_extract && !self.control.is_cancelled() && !candidates.is_empty() {
            self.emit(BatchEvent::ExtractionStarted {
                archives: candidates.len(),
            });
            self.stats.begin_extraction(candidates.len());
            let result = extract_archives(
                &ZipExtractor::new(),
                &candidates,
                self.options.extract_settings(),
                &self.control,
                &self.stats,
            );
            self.stats.end_extraction();
            extracted = result?;
        }

        let status = if self.control.is_cancelled() {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Completed
        };

        Ok(BatchReport {
            status,
            file_count: self.stats.file_count(),
            completed: self.stats.completed(),
            skipped: self.stats.skipped(),
            failed: self.stats.failed(),
            bytes_transferred: self.stats.bytes_transferred(),
            extracted,
            elapsed: self.clock.elapsed(Instant::now()),
        })
    }

    /// Run every transfer and return the archives that are ready to extract.
    fn transfer_all(&self, files: Vec<ResolvedFile>, pool: &WorkerPool) -> Vec<PathBuf> {
        let candidates = Mutex::new(Vec::new());
        let ctx = TransferContext {
            stats: self.stats.as_ref(),
            control: self.control.as_ref(),
        };

        pool.run(files, &self.control, |file| {
            match self.downloader.transfer.transfer(&file, ctx) {
                Ok(outcome @ (TransferOutcome::Skipped | TransferOutcome::Completed { .. })) => {
                    if outcome == TransferOutcome::Skipped {
                        self.stats.record_skipped();
                    } else {
                        self.stats.record_completed();
                    }
                    tracing::debug!(url = %file.url, ?outcome, "file done");
                    if file.is_archive() {
                        candidates.lock().push(file.destination);
                    }
                }
                Ok(TransferOutcome::Cancelled { .. }) => {}
                Err(e) if self.control.is_cancelled() => {
                    tracing::debug!(url = %file.url, error = %e, "transfer interrupted by cancel");
                }
                Err(e) => {
                    tracing::warn!(url = %file.url, error = %e, "download failed");
                    self.stats.record_failed();
                }
            }
        });

        candidates.into_inner()
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(callback) = &self.options.event_callback {
            callback(&event);
        }
    }
}

/// Cloneable pause/resume/cancel access to a running batch.
///
/// Every method is idempotent and becomes a no-op once the batch finished.
#[derive(Debug, Clone)]
pub struct BatchController {
    control: Arc<BatchControl>,
    clock: Arc<ActiveClock>,
    stats: Arc<BatchStats>,
    /// Serializes pause/resume so the gate and the clock flip together.
    transitions: Arc<Mutex<()>>,
}

impl BatchController {
    fn new(control: Arc<BatchControl>, clock: Arc<ActiveClock>, stats: Arc<BatchStats>) -> Self {
        Self {
            control,
            clock,
            stats,
            transitions: Arc::new(Mutex::new(())),
        }
    }

    /// Hold workers at their next checkpoint.
    pub fn pause(&self) {
        let _transition = self.transitions.lock();
        if self.stats.is_finished() {
            return;
        }
        if self.control.pause() {
            self.clock.pause(Instant::now());
            tracing::info!("batch paused");
        }
    }

    /// Release paused workers.
    pub fn resume(&self) {
        let _transition = self.transitions.lock();
        if self.stats.is_finished() {
            return;
        }
        if self.control.resume() {
            self.clock.resume(Instant::now());
            tracing::info!("batch resumed");
        }
    }

    /// Stop the batch, keeping partial files for a later resume.
    pub fn cancel(&self) {
        if self.stats.is_finished() || self.control.is_cancelled() {
            return;
        }
        tracing::info!("batch cancelled");
        self.control.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused() && !self.stats.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

/// Handle to a running batch.
///
/// Dropping the handle without calling [`wait`](Self::wait) cancels the
/// batch and waits for its threads to exit.
pub struct BatchHandle {
    controller: BatchController,
    monitor: Arc<ProgressMonitor>,
    stats: Arc<BatchStats>,
    coordinator: Option<JoinHandle<BatchResult<BatchReport>>>,
}

impl BatchHandle {
    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.controller.is_paused()
    }

    /// Controls usable from other threads.
    pub fn controller(&self) -> BatchController {
        self.controller.clone()
    }

    /// Current progress. Safe to call from any thread, at any rate.
    pub fn poll(&self) -> BatchSnapshot {
        self.monitor.snapshot()
    }

    /// Shared counters of this batch.
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Whether the coordinator has finished every phase.
    pub fn is_finished(&self) -> bool {
        self.stats.is_finished()
    }

    /// Report progress to `callback` every `interval` until the batch ends.
    pub fn start_reporter(&self, callback: ProgressCallback, interval: Duration) -> ProgressReporter {
        ProgressReporter::start(Arc::clone(&self.monitor), callback, interval)
    }

    /// Block until the batch ends.
    pub fn wait(mut self) -> BatchResult<BatchReport> {
        match self.coordinator.take() {
            Some(join) => join.join().map_err(|_| BatchError::CoordinatorPanicked)?,
            None => Err(BatchError::CoordinatorPanicked),
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if let Some(join) = self.coordinator.take() {
            self.controller.cancel();
            join.join().ok();
        }
    }
}
