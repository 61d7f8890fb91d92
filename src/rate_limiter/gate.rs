//! # Concurrency Gate
//!
//! A bounded pool of permits. Each admitted operation holds one [`Permit`]
//! for as long as it runs; dropping the permit returns it to the pool.
//!
//! ```text
//!     max_permits = 3
//!
//!     try_acquire ──► [■ ■ □] ──► Allowed(permit)     in_flight 2 → 3
//!     try_acquire ──► [■ ■ ■] ──► Rejected(Overload)
//!     acquire(t)  ──► [■ ■ ■] ──► waits on condvar ... permit dropped
//!                     [■ ■ □] ──► woken, re-checks ──► Allowed(permit)
//! ```
//!
//! ## Guarantees
//!
//! - `in_flight` never exceeds `max_permits` and never underflows.
//! - The number of live permits always equals `in_flight`: permits are only
//!   created by a successful acquire and release exactly once, on drop.
//! - A waiter that times out leaves `in_flight` untouched.
//! - No FIFO ordering among waiters.

use super::{
    config::Strategy,
    decision::{Decision, RejectReason},
    error::{ConfigError, MisuseError},
    metrics::{Counters, LimiterMetrics},
};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug)]
struct GateState {
    in_flight: u64,
    waiting: u64,
    last_access: Instant,
}

/// State shared between a gate, its clones and its outstanding permits.
struct GateShared {
    state: Mutex<GateState>,
    permit_freed: Condvar,
    max_permits: u64,
    counters: Counters,
}

impl GateShared {
    /// Returns one permit to the pool and wakes a waiter if there is one.
    fn release_one(&self) {
        let mut state = self.state.lock();
        debug_assert!(
            state.in_flight > 0,
            "concurrency gate released more permits than it granted"
        );
        if state.in_flight == 0 {
            drop(state);
            error!("Concurrency gate released more permits than it granted");
            return;
        }
        state.in_flight -= 1;
        let wake = state.waiting > 0;
        drop(state);

        if wake {
            self.permit_freed.notify_one();
        }
    }
}

/// Proof of admission through a [`ConcurrencyGate`].
///
/// The permit occupies one slot until it is dropped or handed to
/// [`ConcurrencyGate::release`]. Because releasing consumes the permit, a
/// double release cannot be expressed.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    gate: Arc<GateShared>,
}

impl Permit {
    /// `true` if this permit was issued by `gate`.
    pub fn belongs_to(&self, gate: &ConcurrencyGate) -> bool {
        Arc::ptr_eq(&self.gate, &gate.shared)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release_one();
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("max_permits", &self.gate.max_permits)
            .finish()
    }
}

/// Semaphore-style admission gate.
///
/// Clones share the same pool, so a gate can be handed to every request
/// handler.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use throttle::ConcurrencyGate;
///
/// let gate = ConcurrencyGate::new(2).unwrap();
///
/// let a = gate.try_acquire().into_permit().unwrap();
/// let _b = gate.try_acquire().into_permit().unwrap();
/// assert!(gate.try_acquire().is_rejected());
///
/// gate.release(a).unwrap();
/// assert!(gate.acquire(Duration::from_millis(10)).is_allowed());
/// ```
#[derive(Clone)]
pub struct ConcurrencyGate {
    shared: Arc<GateShared>,
}

impl ConcurrencyGate {
    /// Creates a gate admitting at most `max_permits` concurrent operations.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroCapacity`] when `max_permits` is 0.
    pub fn new(max_permits: u64) -> Result<Self, ConfigError> {
        if max_permits == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        debug!(max_permits, "Created concurrency gate");

        Ok(Self {
            shared: Arc::new(GateShared {
                state: Mutex::new(GateState {
                    in_flight: 0,
                    waiting: 0,
                    last_access: Instant::now(),
                }),
                permit_freed: Condvar::new(),
                max_permits,
                counters: Counters::default(),
            }),
        })
    }

    /// Maximum concurrent permits.
    #[inline]
    pub fn max_permits(&self) -> u64 {
        self.shared.max_permits
    }

    /// Takes a permit if one is free, without blocking.
    pub fn try_acquire(&self) -> Decision {
        let mut state = self.shared.state.lock();
        state.last_access = Instant::now();

        if state.in_flight < self.shared.max_permits {
            state.in_flight += 1;
            drop(state);
            self.shared.counters.on_acquisition(1);
            Decision::Allowed(Some(self.permit()))
        } else {
            drop(state);
            self.shared.counters.on_rejection(RejectReason::Overload);
            Decision::overload()
        }
    }

    /// Takes a permit, waiting up to `timeout` for one to be released.
    ///
    /// The wait is bounded by a monotonic deadline and re-checks the pool
    /// after every wake-up, spurious or not. On timeout the gate is left
    /// exactly as it was.
    pub fn acquire(&self, timeout: Duration) -> Decision {
        self.acquire_timed(timeout).0
    }

    /// Same as [`acquire`](Self::acquire), also returning how long the
    /// caller waited for the pool.
    pub fn acquire_timed(&self, timeout: Duration) -> (Decision, Duration) {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let max = self.shared.max_permits;

        let mut state = self.shared.state.lock();
        state.last_access = start;

        if state.in_flight >= max {
            state.waiting += 1;
            loop {
                let timed_out = match deadline {
                    Some(deadline) => self
                        .shared
                        .permit_freed
                        .wait_until(&mut state, deadline)
                        .timed_out(),
                    None => {
                        self.shared.permit_freed.wait(&mut state);
                        false
                    }
                };

                if state.in_flight < max {
                    break;
                }
                if timed_out || deadline.map_or(false, |d| Instant::now() >= d) {
                    state.waiting -= 1;
                    drop(state);
                    let waited = self.record_wait(start);
                    self.shared.counters.on_rejection(RejectReason::TimedOut);
                    debug!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Concurrency gate wait timed out"
                    );
                    return (Decision::timed_out(), waited);
                }
            }
            state.waiting -= 1;
        }

        state.in_flight += 1;
        drop(state);
        let waited = self.record_wait(start);
        self.shared.counters.on_acquisition(1);
        (Decision::Allowed(Some(self.permit())), waited)
    }

    /// Returns `permit` to its gate.
    ///
    /// Equivalent to dropping the permit. A permit issued by another gate is
    /// still returned to the gate that issued it, and the mix-up is reported
    /// as [`MisuseError::ForeignPermit`].
    pub fn release(&self, permit: Permit) -> Result<(), MisuseError> {
        if !permit.belongs_to(self) {
            error!("Permit released through a gate that did not issue it");
            drop(permit);
            return Err(MisuseError::ForeignPermit);
        }
        drop(permit);
        Ok(())
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> u64 {
        self.shared.state.lock().in_flight
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> u64 {
        self.shared.max_permits - self.in_flight()
    }

    /// Callers currently blocked in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> u64 {
        self.shared.state.lock().waiting
    }

    /// `true` if no acquire happened within `idle`.
    pub fn is_inactive(&self, idle: Duration) -> bool {
        let last = self.shared.state.lock().last_access;
        last.elapsed() > idle
    }

    /// `true` if nothing holds or awaits a permit.
    pub fn is_quiescent(&self) -> bool {
        let state = self.shared.state.lock();
        state.in_flight == 0 && state.waiting == 0
    }

    /// Snapshot of counters and free permits.
    pub fn metrics(&self) -> LimiterMetrics {
        self.shared.counters.snapshot(
            Strategy::Concurrency,
            self.available_permits(),
            self.shared.max_permits,
        )
    }

    fn permit(&self) -> Permit {
        Permit {
            gate: Arc::clone(&self.shared),
        }
    }

    fn record_wait(&self, start: Instant) -> Duration {
        let waited = start.elapsed();
        self.shared
            .counters
            .record_wait(u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX));
        waited
    }
}

impl fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConcurrencyGate")
            .field("max_permits", &self.shared.max_permits)
            .field("in_flight", &state.in_flight)
            .field("waiting", &state.waiting)
            .finish()
    }
}
