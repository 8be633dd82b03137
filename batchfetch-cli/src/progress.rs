//! Terminal progress display for a running batch.

use std::time::Duration;

use batchfetch::download::{format_duration, megabytes};
use batchfetch::{BatchPhase, BatchSnapshot};
use indicatif::{ProgressBar, ProgressStyle};

/// Resolution of the bar; snapshots report progress as a ratio.
const BAR_STEPS: u64 = 1000;

/// Single progress bar fed from batch snapshots.
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::new(BAR_STEPS);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {prefix:>11.bold} [{bar:40.cyan/blue}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Redraw from `snapshot`.
    pub fn update(&self, snapshot: &BatchSnapshot) {
        let prefix = if snapshot.paused {
            "Paused"
        } else {
            snapshot.phase.name()
        };
        self.bar.set_prefix(prefix);
        self.bar
            .set_position((snapshot.progress * BAR_STEPS as f64).round() as u64);
        self.bar.set_message(status_line(snapshot));
    }

    /// Remove the bar before the summary is printed.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Message shown next to the bar.
pub fn status_line(snapshot: &BatchSnapshot) -> String {
    match snapshot.phase {
        BatchPhase::Probing => format!(
            "{}/{} files scanned",
            snapshot.probed, snapshot.file_count
        ),
        BatchPhase::Extracting => format!(
            "{}/{} archives extracted",
            snapshot.extracted, snapshot.extraction_total
        ),
        BatchPhase::Transferring | BatchPhase::Finished => {
            let mut line = format!(
                "{}/{} files ({:.1}%)",
                snapshot.completed,
                snapshot.file_count,
                snapshot.percent()
            );
            if snapshot.bytes_expected_total > 0 {
                line.push_str(&format!(
                    " | {:.2} MB / {:.2} MB",
                    megabytes(snapshot.bytes_transferred as f64),
                    megabytes(snapshot.bytes_expected_total as f64)
                ));
            }
            line.push_str(&format!(
                " | {:.2} MB/s | Elapsed: {}",
                megabytes(snapshot.speed_bytes_per_sec),
                format_duration(snapshot.elapsed)
            ));
            if snapshot.bytes_expected_total > 0 {
                line.push_str(&format!(" | ETA: {}", snapshot.eta));
            }
            if snapshot.failed > 0 {
                line.push_str(&format!(" | {} failed", snapshot.failed));
            }
            if snapshot.paused {
                line.push_str("  [r] Resume [c] Cancel");
            }
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchfetch::Eta;

    fn snapshot(phase: BatchPhase) -> BatchSnapshot {
        BatchSnapshot {
            phase,
            paused: false,
            file_count: 3,
            completed: 1,
            skipped: 0,
            failed: 0,
            bytes_transferred: 5 * 1024 * 1024,
            bytes_expected_total: 10 * 1024 * 1024,
            probed: 2,
            extracted: 0,
            extraction_total: 0,
            progress: 0.5,
            speed_bytes_per_sec: 2.0 * 1024.0 * 1024.0,
            eta: Eta::Remaining(Duration::from_secs(3)),
            elapsed: Duration::from_secs(4),
        }
    }

    #[test]
    fn test_status_line_transferring() {
        assert_eq!(
            status_line(&snapshot(BatchPhase::Transferring)),
            "1/3 files (50.0%) | 5.00 MB / 10.00 MB | 2.00 MB/s | Elapsed: 4s | ETA: 3s"
        );
    }

    #[test]
    fn test_status_line_paused_without_total() {
        let mut snap = snapshot(BatchPhase::Transferring);
        snap.paused = true;
        snap.bytes_expected_total = 0;
        snap.speed_bytes_per_sec = 0.0;
        snap.eta = Eta::Paused;
        assert_eq!(
            status_line(&snap),
            "1/3 files (50.0%) | 0.00 MB/s | Elapsed: 4s  [r] Resume [c] Cancel"
        );
    }

    #[test]
    fn test_status_line_probing() {
        assert_eq!(
            status_line(&snapshot(BatchPhase::Probing)),
            "2/3 files scanned"
        );
    }
}
