//! # Periodic Refill
//!
//! Token buckets refill lazily, so they are correct without any background
//! work. A [`RefillScheduler`] adds a thread that calls
//! [`TokenBucket::refill`] on a fixed interval, which keeps the reported
//! token count fresh while no requests arrive.
//!
//! ```text
//!     ┌────────────────┐   every interval    ┌──────────────┐
//!     │ throttle-refill│ ──── refill() ────► │ TokenBucket  │
//!     │    thread      │                     └──────────────┘
//!     └───────┬────────┘
//!             │ recv_timeout(interval)
//!     stop() ─┴─► channel closed ──► loop exits ──► joined
//! ```
//!
//! Refill is idempotent for a given instant, so stopping the scheduler at any
//! point leaves the bucket consistent.

use super::{
    bucket::TokenBucket,
    error::{ConfigError, ThrottleError},
};
use std::fmt;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{info, trace};

/// Handle to a running refill thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use throttle::{RefillScheduler, TokenBucket};
///
/// let bucket = Arc::new(TokenBucket::new(10, 100.0).unwrap());
/// let scheduler = RefillScheduler::start(bucket.clone(), Duration::from_millis(10)).unwrap();
///
/// assert!(bucket.try_consume(10).is_allowed());
/// std::thread::sleep(Duration::from_millis(50));
///
/// scheduler.stop().unwrap();
/// assert!(bucket.available_tokens() <= 10);
/// ```
pub struct RefillScheduler {
    interval: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RefillScheduler {
    /// Spawns a thread refilling `bucket` every `interval`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroInterval`] when `interval` is zero
    /// - [`ThrottleError::Spawn`] if the thread cannot be created
    pub fn start(bucket: Arc<TokenBucket>, interval: Duration) -> Result<Self, ThrottleError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval.into());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("throttle-refill".to_string())
            .spawn(move || {
                info!(
                    interval_ms = interval.as_millis() as u64,
                    "Started refill scheduler"
                );

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("Refill scheduler stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let available = bucket.refill();
                            trace!(available, "Scheduled refill");
                        }
                    }
                }
            })
            .map_err(ThrottleError::Spawn)?;

        Ok(Self {
            interval,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Interval between refills.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `true` while the refill thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Signals the thread to stop and waits for it to exit.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::SchedulerPanicked`] if the thread panicked.
    pub fn stop(mut self) -> Result<(), ThrottleError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ThrottleError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // the thread may already be gone; dropping the sender wakes it either way
            let _ = stop_tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ThrottleError::SchedulerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for RefillScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for RefillScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefillScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
