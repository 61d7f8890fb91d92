//! # Time Sources
//!
//! Every refill computation and every blocking deadline in the token bucket
//! reads time through the [`Clock`] trait. Production code uses
//! [`MonotonicClock`], which is a thin wrapper over [`Instant`]. Tests use
//! [`ManualClock`], whose time only moves when told to, so refill arithmetic
//! can be asserted exactly.
//!
//! ```text
//!     Clock implementations:
//!
//!     MonotonicClock ──► Instant::now()        thread::sleep()
//!     ManualClock ─────► origin + offset       offset += duration
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source used by the rate limiters.
///
/// Implementations must never move backwards. `sleep` suspends the calling
/// thread for at least `duration` as observed by this clock.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// The process monotonic clock.
///
/// # Example
///
/// ```rust
/// use throttle::{Clock, MonotonicClock};
///
/// let clock = MonotonicClock;
/// let a = clock.now();
/// let b = clock.now();
/// assert!(b >= a);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when asked to.
///
/// `sleep` advances the clock instead of blocking, which turns blocking
/// token-bucket waits into instantaneous, deterministic steps.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use throttle::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now() - start, Duration::from_millis(250));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ns: AtomicU64::new(0),
        }
    }

    /// Convenience constructor returning the clock behind an `Arc`, ready to
    /// be shared with a limiter and kept by the test.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .offset_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Total time this clock has been advanced since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
