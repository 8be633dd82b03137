//! Shared batch counters.
//!
//! `BatchStats` is the only structure workers share. Every field is an atomic
//! so workers can update it without locks; derived values such as speed are
//! computed by the reporting side in [`super::progress`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Aggregate counters for one batch.
#[derive(Debug, Default)]
pub struct BatchStats {
    file_count: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    bytes_transferred: AtomicU64,
    bytes_expected_total: AtomicU64,
    probing: AtomicBool,
    probed: AtomicUsize,
    extracting: AtomicBool,
    extracted: AtomicUsize,
    extraction_total: AtomicUsize,
    finished: AtomicBool,
}

impl BatchStats {
    /// Create counters for a batch of `file_count` files.
    pub fn new(file_count: usize) -> Self {
        let stats = Self::default();
        stats.file_count.store(file_count, Ordering::SeqCst);
        stats
    }

    /// Number of files in the batch.
    pub fn file_count(&self) -> usize {
        self.file_count.load(Ordering::SeqCst)
    }

    /// Files whose final artifact is in place (transferred or already present).
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Completed files that needed no transfer.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Files whose transfer failed.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Bytes received so far across all workers.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Bytes still expected when the batch started (0 when unknown).
    pub fn bytes_expected_total(&self) -> u64 {
        self.bytes_expected_total.load(Ordering::SeqCst)
    }

    /// Whether the probe phase is running.
    pub fn is_probing(&self) -> bool {
        self.probing.load(Ordering::SeqCst)
    }

    /// Files probed so far.
    pub fn probed(&self) -> usize {
        self.probed.load(Ordering::SeqCst)
    }

    /// Whether the extraction phase is running.
    pub fn is_extracting(&self) -> bool {
        self.extracting.load(Ordering::SeqCst)
    }

    /// Archives extracted so far.
    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::SeqCst)
    }

    /// Archives queued for extraction.
    pub fn extraction_total(&self) -> usize {
        self.extraction_total.load(Ordering::SeqCst)
    }

    /// Add bytes received by a worker. Hot path; never blocks.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a file that reached its final artifact.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a file that was already complete on disk.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed file.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_probing(&self, probing: bool) {
        self.probing.store(probing, Ordering::SeqCst);
    }

    pub(crate) fn record_probed(&self) {
        self.probed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_bytes_expected_total(&self, bytes: u64) {
        self.bytes_expected_total.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn begin_extraction(&self, archives: usize) {
        self.extraction_total.store(archives, Ordering::SeqCst);
        self.extracting.store(true, Ordering::SeqCst);
    }

    pub(crate) fn record_extracted(&self) {
        self.extracted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_extraction(&self) {
        self.extracting.store(false, Ordering::SeqCst);
    }

    /// Whether the batch reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_finished(&self) {
        self.probing.store(false, Ordering::SeqCst);
        self.extracting.store(false, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Fraction of the batch done, in `[0, 1]`.
    ///
    /// Uses bytes when an expected total is known, otherwise files.
    pub fn progress_ratio(&self) -> f64 {
        progress_ratio(
            self.bytes_transferred(),
            self.bytes_expected_total(),
            self.completed(),
            self.file_count(),
        )
    }
}

/// Completion ratio from raw counters, clamped to `[0, 1]`.
pub(crate) fn progress_ratio(
    bytes_transferred: u64,
    bytes_expected_total: u64,
    completed: usize,
    file_count: usize,
) -> f64 {
    let ratio = if bytes_expected_total > 0 {
        bytes_transferred as f64 / bytes_expected_total as f64
    } else if file_count == 0 {
        1.0
    } else {
        completed as f64 / file_count as f64
    };
    ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_batch_stats_new() {
        let stats = BatchStats::new(3);
        assert_eq!(stats.file_count(), 3);
        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.bytes_transferred(), 0);
        assert!(!stats.is_probing());
        assert!(!stats.is_extracting());
    }

    #[test]
    fn test_progress_by_files_when_total_unknown() {
        let stats = BatchStats::new(4);
        stats.record_completed();
        assert_eq!(stats.progress_ratio(), 0.25);
        stats.record_skipped();
        assert_eq!(stats.progress_ratio(), 0.5);
        assert_eq!(stats.skipped(), 1);
    }

    #[test]
    fn test_progress_by_bytes() {
        let stats = BatchStats::new(1);
        stats.set_bytes_expected_total(1000);
        stats.add_bytes(250);
        assert_eq!(stats.progress_ratio(), 0.25);
    }

    #[test]
    fn test_progress_empty_batch_is_done() {
        let stats = BatchStats::new(0);
        assert_eq!(stats.progress_ratio(), 1.0);
    }

    #[test]
    fn test_concurrent_byte_updates() {
        let stats = Arc::new(BatchStats::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_bytes(3);
                    }
                    stats.record_completed();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.bytes_transferred(), 24_000);
        assert_eq!(stats.completed(), 8);
    }

    #[test]
    fn test_extraction_flags() {
        let stats = BatchStats::new(2);
        stats.begin_extraction(2);
        assert!(stats.is_extracting());
        stats.record_extracted();
        assert_eq!(stats.extracted(), 1);
        assert_eq!(stats.extraction_total(), 2);
        stats.end_extraction();
        assert!(!stats.is_extracting());
    }

    proptest! {
        #[test]
        fn prop_progress_ratio_is_bounded(
            bytes in any::<u64>(),
            total in any::<u64>(),
            completed in 0usize..1000,
            files in 0usize..1000,
        ) {
            let ratio = progress_ratio(bytes, total, completed, files);
            prop_assert!((0.0..=1.0).contains(&ratio));
        }
    }
}
