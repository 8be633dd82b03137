//! Bounded-concurrency batch downloads.
//!
//! This module provides:
//! - Metadata probing of remote files (`probe`)
//! - Single file transfers with `.part` resume (`http`)
//! - A fixed-size worker pool over a closed job queue (`pool`)
//! - Cooperative pause and cancellation (`control`)
//! - Cancellable network waits on a shared runtime (`transport`)
//! - Shared batch counters (`state`) and derived progress (`progress`)
//! - Phase orchestration behind a handle (`orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! BatchDownloader::start_batch
//!         │
//!         └── coordinator thread
//!                 │
//!                 ├── Prober ──────────┐
//!                 │                    ├── WorkerPool (checkpoint per job)
//!                 ├── HttpTransfer ────┘        │
//!                 │                             └── BatchStats (atomics)
//!                 │
//!                 └── extract_archives (after pool join)
//!
//! BatchHandle ── poll() ── ProgressMonitor (speed, ETA, active time)
//!             └─ pause/resume/cancel ── BatchControl
//! ```
//!
//! Workers are OS threads. Their network waits are driven on a small tokio
//! runtime through [`Transport`] and race the cancellation token, so a
//! cancel never waits on a silent server.
//!
//! # Example
//!
//! ```ignore
//! use batchfetch::{BatchDownloader, BatchOptions, DownloadRequest, DownloaderSettings};
//!
//! let downloader = BatchDownloader::new(DownloaderSettings::default())?;
//! let requests = vec![DownloadRequest::new("http://example.com/a.zip", "a.zip")];
//!
//! let handle = downloader.start_batch(requests, BatchOptions::new("downloads").with_auto_extract(true))?;
//! while !handle.is_finished() {
//!     let snapshot = handle.poll();
//!     println!("{:.1}% at {:.2} MB/s", snapshot.percent(), snapshot.speed_bytes_per_sec / 1048576.0);
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! println!("{}", handle.wait()?.summary());
//! ```

mod control;
mod http;
mod orchestrator;
mod pool;
mod probe;
mod progress;
mod request;
mod state;
mod transport;

pub use control::{BatchControl, PauseGate, PAUSE_POLL_INTERVAL};
pub use http::{HttpTransfer, TransferContext, TransferOutcome};
pub use orchestrator::{
    BatchController, BatchDownloader, BatchEvent, BatchEventCallback, BatchHandle, BatchReport,
    BatchStatus,
};
pub use pool::{WorkerPool, DEFAULT_POOL_SIZE};
pub use probe::{remaining_bytes, ProbeResult, Prober};
pub use progress::{
    estimate_eta, format_duration, megabytes, ActiveClock, BatchPhase, BatchSnapshot, Eta,
    ProgressCallback, ProgressMonitor, ProgressReporter, SpeedEstimator, DEFAULT_REPORT_INTERVAL,
    ETA_NOISE_FLOOR_BYTES_PER_SEC, MIN_SAMPLE_INTERVAL,
};
pub use request::{
    is_zip_archive, part_path, DirectoryPlan, DownloadRequest, ResolvedFile, PART_SUFFIX,
};
pub use state::BatchStats;
pub use transport::{io_runtime, Transport};
