//! Network waits for the engine's worker threads.
//!
//! Workers are plain OS threads. Every network wait they perform (sending a
//! request, reading the next body chunk) runs on a small runtime shared by a
//! downloader and races the batch's cancellation token, so a cancel
//! interrupts a stalled server at once instead of after a timeout.

use std::future::Future;
use std::io;
use std::sync::Arc;

use reqwest::Client;
use tokio::runtime::{Builder, Runtime};

use super::control::BatchControl;

/// Threads driving connections for all workers of one downloader.
const IO_THREADS: usize = 2;

/// Build the runtime shared by a downloader's transports.
pub fn io_runtime() -> io::Result<Arc<Runtime>> {
    Builder::new_multi_thread()
        .worker_threads(IO_THREADS)
        .thread_name("batchfetch-io")
        .enable_all()
        .build()
        .map(Arc::new)
}

/// HTTP client plus the runtime its futures are driven on.
///
/// Cheap to clone; clones share the connection pool and runtime.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    runtime: Arc<Runtime>,
}

impl Transport {
    pub fn new(client: Client, runtime: Arc<Runtime>) -> Self {
        Self { client, runtime }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drive `future` to completion from the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Drive `future` unless `control` is cancelled first.
    ///
    /// Returns `None` on cancellation; the future is dropped, which closes
    /// any connection it held.
    pub fn block_on_cancellable<F: Future>(
        &self,
        control: &BatchControl,
        future: F,
    ) -> Option<F::Output> {
        if control.is_cancelled() {
            return None;
        }
        self.runtime.block_on(async {
            tokio::select! {
                biased;

                _ = control.cancelled() => None,
                output = future => Some(output),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn transport() -> Transport {
        Transport::new(Client::new(), io_runtime().unwrap())
    }

    #[test]
    fn test_block_on_returns_output() {
        assert_eq!(transport().block_on(async { 2 + 2 }), 4);
    }

    #[test]
    fn test_cancellable_skips_when_already_cancelled() {
        let control = BatchControl::new();
        control.cancel();
        let ran = transport().block_on_cancellable(&control, async { 1 });
        assert_eq!(ran, None);
    }

    #[test]
    fn test_cancel_interrupts_pending_future() {
        let transport = transport();
        let control = BatchControl::new();
        let started = Instant::now();

        let output = thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                transport.block_on_cancellable(&control, async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "slept"
                })
            });
            thread::sleep(Duration::from_millis(100));
            control.cancel();
            waiter.join().unwrap()
        });

        assert_eq!(output, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
