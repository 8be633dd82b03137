//! Cooperative pause and cancellation for a running batch.
//!
//! Workers never get suspended from outside. They call [`BatchControl::checkpoint`]
//! between jobs and between chunks of a transfer; the checkpoint blocks while
//! the batch is paused and reports cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Upper bound on how long a paused worker sleeps before re-checking state.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Gate that holds workers while the batch is paused.
///
/// The atomic flag keeps the hot path lock-free; the mutex and condition
/// variable are only touched on pause transitions and while waiting.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl PauseGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the gate is closed.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Close the gate. Returns `true` if this call changed the state.
    pub fn pause(&self) -> bool {
        let _guard = self.lock.lock();
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Open the gate and wake waiting workers. Returns `true` if this call
    /// changed the state.
    pub fn resume(&self) -> bool {
        let _guard = self.lock.lock();
        let changed = self.paused.swap(false, Ordering::SeqCst);
        self.wake.notify_all();
        changed
    }

    /// Wake every waiter so it re-checks its exit condition.
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.wake.notify_all();
    }

    /// Block while paused. Returns `false` if `cancel` fired while waiting.
    pub fn wait(&self, cancel: &CancellationToken) -> bool {
        if !self.is_paused() {
            return !cancel.is_cancelled();
        }

        let mut guard = self.lock.lock();
        while self.paused.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                return false;
            }
            self.wake.wait_for(&mut guard, PAUSE_POLL_INTERVAL);
        }
        !cancel.is_cancelled()
    }
}

/// Pause gate and cancellation token for one batch.
#[derive(Debug, Default)]
pub struct BatchControl {
    cancel: CancellationToken,
    gate: PauseGate,
}

impl BatchControl {
    /// Create a running, unpaused control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.gate.notify();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Pause the batch. Returns `true` if it was running.
    pub fn pause(&self) -> bool {
        self.gate.pause()
    }

    /// Resume the batch. Returns `true` if it was paused.
    pub fn resume(&self) -> bool {
        self.gate.resume()
    }

    /// Whether the batch is paused.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Wait out a pause, then report whether work may continue.
    ///
    /// Returns `false` once cancellation was requested.
    pub fn checkpoint(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.gate.wait(&self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_checkpoint_passes_when_running() {
        let control = BatchControl::new();
        assert!(control.checkpoint());
    }

    #[test]
    fn test_checkpoint_fails_after_cancel() {
        let control = BatchControl::new();
        control.cancel();
        control.cancel();
        assert!(control.is_cancelled());
        assert!(!control.checkpoint());
    }

    #[test]
    fn test_pause_and_resume_are_idempotent() {
        let control = BatchControl::new();
        assert!(!control.resume());
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert!(!control.resume());
    }

    #[test]
    fn test_paused_worker_blocks_until_resume() {
        let control = Arc::new(BatchControl::new());
        let passed = Arc::new(AtomicUsize::new(0));
        control.pause();

        let worker = {
            let control = Arc::clone(&control);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                if control.checkpoint() {
                    passed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(150));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        control.resume();
        worker.join().unwrap();
        assert_eq!(passed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_wakes_paused_worker() {
        let control = Arc::new(BatchControl::new());
        control.pause();

        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.checkpoint())
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        control.cancel();
        let proceeded = worker.join().unwrap();

        assert!(!proceeded);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
