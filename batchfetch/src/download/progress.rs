//! Progress reporting for a running batch.
//!
//! Workers only ever touch the atomic counters in [`BatchStats`]. Everything
//! derived from them (smoothed speed, ETA, active elapsed time) is computed
//! here by the reporting side, so no worker ever waits on it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::control::BatchControl;
use super::state::{progress_ratio, BatchStats};

/// Minimum spacing between two speed samples.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Weight of the previous smoothed value in the moving average.
const SMOOTHING_PREVIOUS_WEIGHT: f64 = 0.7;

/// Weight of a new sample in the moving average.
const SMOOTHING_SAMPLE_WEIGHT: f64 = 0.3;

/// Speeds at or below this (0.1 MiB/s) are too noisy for an ETA.
pub const ETA_NOISE_FLOOR_BYTES_PER_SEC: f64 = 0.1 * 1024.0 * 1024.0;

/// Default interval between progress callbacks.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked with each progress snapshot.
pub type ProgressCallback = Box<dyn Fn(&BatchSnapshot) + Send + Sync>;

/// Which stage a batch is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    /// Querying remote sizes.
    Probing,
    /// Fetching files.
    Transferring,
    /// Unpacking archives.
    Extracting,
    /// Done, failed or cancelled.
    Finished,
}

impl BatchPhase {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Probing => "Scanning",
            Self::Transferring => "Downloading",
            Self::Extracting => "Extracting",
            Self::Finished => "Finished",
        }
    }
}

/// Estimated time remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eta {
    /// No total known or speed too low to estimate.
    Unknown,
    /// The batch is paused.
    Paused,
    /// Estimated remaining active time.
    Remaining(Duration),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "calculating..."),
            Self::Paused => write!(f, "paused"),
            Self::Remaining(d) => write!(f, "{}", format_duration(*d)),
        }
    }
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub phase: BatchPhase,
    pub paused: bool,
    pub file_count: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub bytes_expected_total: u64,
    pub probed: usize,
    pub extracted: usize,
    pub extraction_total: usize,
    /// Completion ratio in `[0, 1]`.
    pub progress: f64,
    /// Smoothed transfer rate; zero while paused.
    pub speed_bytes_per_sec: f64,
    pub eta: Eta,
    /// Active (unpaused) time since the batch started.
    pub elapsed: Duration,
}

impl BatchSnapshot {
    /// Completion as a percentage.
    pub fn percent(&self) -> f64 {
        self.progress * 100.0
    }
}

/// Accumulates active time, excluding paused intervals.
#[derive(Debug)]
pub struct ActiveClock {
    state: Mutex<ClockState>,
}

#[derive(Debug)]
struct ClockState {
    accumulated: Duration,
    running_since: Option<Instant>,
    stopped: bool,
    resumes: u64,
}

impl ActiveClock {
    /// Start a clock running from `now`.
    pub fn start(now: Instant) -> Self {
        Self {
            state: Mutex::new(ClockState {
                accumulated: Duration::ZERO,
                running_since: Some(now),
                stopped: false,
                resumes: 0,
            }),
        }
    }

    /// Stop accumulating at a pause boundary.
    pub fn pause(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.accumulated += now.saturating_duration_since(since);
        }
    }

    /// Continue accumulating after a pause. Ignored once stopped.
    pub fn resume(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.running_since.is_none() && !state.stopped {
            state.running_since = Some(now);
            state.resumes += 1;
        }
    }

    /// Freeze the clock for good.
    pub fn stop(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.accumulated += now.saturating_duration_since(since);
        }
        state.stopped = true;
    }

    /// Active time up to `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        state.accumulated
            + state
                .running_since
                .map(|since| now.saturating_duration_since(since))
                .unwrap_or_default()
    }

    /// Whether active time is currently accumulating.
    pub fn is_running(&self) -> bool {
        self.state.lock().running_since.is_some()
    }

    /// Number of resumes so far; changes whenever a pause ends.
    fn resume_epoch(&self) -> u64 {
        self.state.lock().resumes
    }
}

/// Exponentially smoothed transfer speed.
///
/// Owned by the reporting side only; workers never read or write it.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last_bytes: u64,
    last_time: Instant,
    smoothed: f64,
}

impl SpeedEstimator {
    /// Create an estimator with a zero-byte baseline at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            last_bytes: 0,
            last_time: now,
            smoothed: 0.0,
        }
    }

    /// Feed the current byte counter and return the smoothed speed.
    ///
    /// Samples closer than [`MIN_SAMPLE_INTERVAL`] to the previous one are
    /// ignored and the previous estimate is returned.
    pub fn sample(&mut self, bytes: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return self.smoothed;
        }

        let instant = bytes.saturating_sub(self.last_bytes) as f64 / elapsed.as_secs_f64();
        self.smoothed = if self.smoothed == 0.0 {
            instant
        } else {
            SMOOTHING_PREVIOUS_WEIGHT * self.smoothed + SMOOTHING_SAMPLE_WEIGHT * instant
        };
        self.last_bytes = bytes;
        self.last_time = now;
        self.smoothed
    }

    /// Restart sampling from (`bytes`, `now`), keeping the smoothed value.
    pub fn rebase(&mut self, bytes: u64, now: Instant) {
        self.last_bytes = bytes;
        self.last_time = now;
    }

    /// Current smoothed speed in bytes per second.
    pub fn speed(&self) -> f64 {
        self.smoothed
    }
}

/// Estimate the remaining time, if the inputs allow it.
pub fn estimate_eta(expected_total: u64, transferred: u64, speed: f64, paused: bool) -> Eta {
    if paused {
        return Eta::Paused;
    }
    if expected_total == 0 || speed <= ETA_NOISE_FLOOR_BYTES_PER_SEC {
        return Eta::Unknown;
    }
    let remaining = expected_total.saturating_sub(transferred);
    if remaining == 0 {
        return Eta::Unknown;
    }
    let secs = (remaining as f64 / speed).round();
    Eta::Remaining(Duration::from_secs(secs as u64))
}

/// Builds snapshots from the shared counters of one batch.
#[derive(Debug)]
pub struct ProgressMonitor {
    stats: Arc<BatchStats>,
    control: Arc<BatchControl>,
    clock: Arc<ActiveClock>,
    estimator: Mutex<EstimatorState>,
}

#[derive(Debug)]
struct EstimatorState {
    speed: SpeedEstimator,
    resume_epoch: u64,
}

impl ProgressMonitor {
    pub(crate) fn new(
        stats: Arc<BatchStats>,
        control: Arc<BatchControl>,
        clock: Arc<ActiveClock>,
        started: Instant,
    ) -> Self {
        Self {
            stats,
            control,
            clock,
            estimator: Mutex::new(EstimatorState {
                speed: SpeedEstimator::new(started),
                resume_epoch: 0,
            }),
        }
    }

    /// Take a snapshot. Safe to call from any thread.
    pub fn snapshot(&self) -> BatchSnapshot {
        let now = Instant::now();
        let stats = &self.stats;
        let paused = self.control.is_paused() && !stats.is_finished();
        let bytes_transferred = stats.bytes_transferred();
        let bytes_expected_total = stats.bytes_expected_total();
        let completed = stats.completed();
        let file_count = stats.file_count();

        let speed = {
            let mut estimator = self.estimator.lock();
            let epoch = self.clock.resume_epoch();
            if epoch != estimator.resume_epoch {
                estimator.resume_epoch = epoch;
                estimator.speed.rebase(bytes_transferred, now);
            }
            if paused || stats.is_finished() {
                0.0
            } else {
                estimator.speed.sample(bytes_transferred, now)
            }
        };

        BatchSnapshot {
            phase: phase_of(stats),
            paused,
            file_count,
            completed,
            skipped: stats.skipped(),
            failed: stats.failed(),
            bytes_transferred,
            bytes_expected_total,
            probed: stats.probed(),
            extracted: stats.extracted(),
            extraction_total: stats.extraction_total(),
            progress: progress_ratio(bytes_transferred, bytes_expected_total, completed, file_count),
            speed_bytes_per_sec: speed,
            eta: estimate_eta(bytes_expected_total, bytes_transferred, speed, paused),
            elapsed: self.clock.elapsed(now),
        }
    }
}

fn phase_of(stats: &BatchStats) -> BatchPhase {
    if stats.is_finished() {
        BatchPhase::Finished
    } else if stats.is_probing() {
        BatchPhase::Probing
    } else if stats.is_extracting() {
        BatchPhase::Extracting
    } else {
        BatchPhase::Transferring
    }
}

/// Background thread that periodically hands snapshots to a callback.
///
/// Stops after the batch finishes (with one final report) or when dropped.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl ProgressReporter {
    /// Start reporting from `monitor` every `interval`.
    pub fn start(
        monitor: Arc<ProgressMonitor>,
        callback: ProgressCallback,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) && !monitor.stats.is_finished() {
                callback(&monitor.snapshot());
                thread::sleep(interval);
            }

            // Final report
            callback(&monitor.snapshot());
        });

        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Stop the reporter and wait for its final report.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Format a duration rounded to whole seconds, e.g. `1h2m3s`, `4m0s`, `12s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64().round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Bytes expressed in MiB, the unit used in status lines.
pub fn megabytes(bytes: f64) -> f64 {
    bytes / 1024.0 / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn monitor(files: usize) -> (Arc<ProgressMonitor>, Arc<BatchStats>, Arc<BatchControl>) {
        let stats = Arc::new(BatchStats::new(files));
        let control = Arc::new(BatchControl::new());
        let now = Instant::now();
        let clock = Arc::new(ActiveClock::start(now));
        let monitor = Arc::new(ProgressMonitor::new(
            Arc::clone(&stats),
            Arc::clone(&control),
            clock,
            now,
        ));
        (monitor, stats, control)
    }

    #[test]
    fn test_speed_first_sample_taken_as_is() {
        let start = Instant::now();
        let mut speed = SpeedEstimator::new(start);
        let value = speed.sample(1000, start + Duration::from_secs(1));
        assert_eq!(value, 1000.0);
    }

    #[test]
    fn test_speed_is_smoothed() {
        let start = Instant::now();
        let mut speed = SpeedEstimator::new(start);
        speed.sample(1000, start + Duration::from_secs(1));
        let value = speed.sample(3000, start + Duration::from_secs(2));
        // 0.7 * 1000 + 0.3 * 2000
        assert!((value - 1300.0).abs() < 1e-6);
    }

    #[test]
    fn test_speed_ignores_rapid_samples() {
        let start = Instant::now();
        let mut speed = SpeedEstimator::new(start);
        speed.sample(1000, start + Duration::from_secs(1));
        let value = speed.sample(
            999_999,
            start + Duration::from_secs(1) + Duration::from_millis(20),
        );
        assert_eq!(value, 1000.0);
    }

    #[test]
    fn test_rebase_drops_paused_interval() {
        let start = Instant::now();
        let mut speed = SpeedEstimator::new(start);
        speed.sample(1000, start + Duration::from_secs(1));
        speed.rebase(1000, start + Duration::from_secs(60));
        let value = speed.sample(2000, start + Duration::from_secs(61));
        assert!((value - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_eta_requires_total_and_speed() {
        assert_eq!(estimate_eta(0, 0, 10e6, false), Eta::Unknown);
        assert_eq!(estimate_eta(100, 0, 10.0, false), Eta::Unknown);
        assert_eq!(estimate_eta(100, 0, 10e6, true), Eta::Paused);

        let mib = 1024.0 * 1024.0;
        let eta = estimate_eta(20 * 1024 * 1024, 10 * 1024 * 1024, mib, false);
        assert_eq!(eta, Eta::Remaining(Duration::from_secs(10)));
    }

    #[test]
    fn test_active_clock_excludes_pause() {
        let start = Instant::now();
        let clock = ActiveClock::start(start);
        assert!(clock.is_running());
        clock.pause(start + Duration::from_secs(5));
        assert!(!clock.is_running());
        clock.resume(start + Duration::from_secs(65));
        assert_eq!(
            clock.elapsed(start + Duration::from_secs(70)),
            Duration::from_secs(10)
        );

        clock.stop(start + Duration::from_secs(72));
        clock.resume(start + Duration::from_secs(80));
        assert!(!clock.is_running());
        assert_eq!(
            clock.elapsed(start + Duration::from_secs(500)),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_snapshot_while_paused() {
        let (monitor, stats, control) = monitor(2);
        stats.set_bytes_expected_total(100);
        stats.add_bytes(50);
        control.pause();

        let snapshot = monitor.snapshot();
        assert!(snapshot.paused);
        assert_eq!(snapshot.speed_bytes_per_sec, 0.0);
        assert_eq!(snapshot.eta, Eta::Paused);
        assert_eq!(snapshot.percent(), 50.0);
        assert_eq!(snapshot.phase, BatchPhase::Transferring);
    }

    #[test]
    fn test_snapshot_phase_tracks_stats() {
        let (monitor, stats, _control) = monitor(1);
        stats.set_probing(true);
        assert_eq!(monitor.snapshot().phase, BatchPhase::Probing);
        stats.set_probing(false);
        stats.begin_extraction(1);
        assert_eq!(monitor.snapshot().phase, BatchPhase::Extracting);
        stats.mark_finished();
        assert_eq!(monitor.snapshot().phase, BatchPhase::Finished);
    }

    #[test]
    fn test_progress_reporter_lifecycle() {
        let (monitor, stats, _control) = monitor(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let reporter = ProgressReporter::start(
            monitor,
            Box::new(move |_snapshot| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(10),
        );

        thread::sleep(Duration::from_millis(50));
        stats.mark_finished();
        reporter.stop();

        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(400)), "0s");
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m5s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn test_eta_display() {
        assert_eq!(Eta::Paused.to_string(), "paused");
        assert_eq!(Eta::Unknown.to_string(), "calculating...");
        assert_eq!(Eta::Remaining(Duration::from_secs(90)).to_string(), "1m30s");
    }

    proptest! {
        #[test]
        fn prop_smoothed_speed_stays_between_samples(
            first in 0u64..1_000_000,
            second in 0u64..1_000_000,
        ) {
            let start = Instant::now();
            let mut speed = SpeedEstimator::new(start);
            let a = speed.sample(first, start + Duration::from_secs(1));
            let b = speed.sample(first + second, start + Duration::from_secs(2));
            let (lo, hi) = if a < second as f64 { (a, second as f64) } else { (second as f64, a) };
            if a != 0.0 {
                prop_assert!(b >= lo - 1e-6 && b <= hi + 1e-6);
            }
        }
    }
}
