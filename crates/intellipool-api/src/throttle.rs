// Outbound send gate for the raw socket transport.
//
// The controller is a small embedded board; two frames arriving back to
// back can be dropped. Every send holds a single-slot gate for the write
// plus a fixed cool-down, so consecutive frames are always at least
// `interval` apart no matter how many tasks are sending.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;

/// Default spacing between raw-socket sends.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(50);

/// Single-slot FIFO gate with a post-send cool-down.
#[derive(Debug)]
pub struct SendThrottle {
    gate: Mutex<()>,
    interval: Duration,
}

impl SendThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            gate: Mutex::new(()),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `send` while holding the gate, then hold it for `interval` more.
    ///
    /// The gate is a scoped guard: it is released exactly once on every
    /// exit path, including a failed send or the caller dropping this
    /// future mid-wait. Waiters are admitted in arrival order.
    pub async fn run<F, Fut, T>(&self, send: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.gate.lock().await;
        let outcome = send().await;
        tokio::time::sleep(self.interval).await;
        outcome
    }
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_INTERVAL)
    }
}
