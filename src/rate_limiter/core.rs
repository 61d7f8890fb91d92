//! # Rate Limiter Facade
//!
//! [`RateLimiter`] is the handle applications hold. It is built from a
//! [`Policy`] and forwards every admission call to the backend the policy
//! selects:
//!
//! ```text
//!     Policy ──► RateLimiter::new ──► validate ──┬──► TokenBucket     (Allowed(None))
//!                                                └──► ConcurrencyGate (Allowed(Some(permit)))
//!
//!     try_acquire()        ─┐
//!     acquire(timeout)      ├──► Decision::{Allowed, Rejected(Overload | TimedOut)}
//!     try_acquire_n(cost)  ─┘
//! ```
//!
//! Handles are cheap to clone and all clones share one backend, so a limiter
//! created at startup can be passed by value to every worker.
//!
//! ## The `Admission` Capability
//!
//! Code that only needs to ask "may I proceed?" can take any
//! [`Admission`] implementor: the facade itself, or one of the two
//! backends used directly.

use super::{
    bucket::TokenBucket,
    clock::{Clock, MonotonicClock},
    config::{Policy, Strategy},
    decision::Decision,
    error::{ConfigError, MisuseError, ThrottleError},
    gate::{ConcurrencyGate, Permit},
    metrics::LimiterMetrics,
    scheduler::RefillScheduler,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Common admission capability shared by every limiter type.
pub trait Admission: Send + Sync {
    /// Admits one unit of work if possible, without blocking.
    fn try_acquire(&self) -> Decision;

    /// Admits one unit of work, waiting up to `timeout`.
    fn acquire(&self, timeout: Duration) -> Decision;

    /// Snapshot of the limiter's counters.
    fn metrics(&self) -> LimiterMetrics;
}

impl Admission for TokenBucket {
    fn try_acquire(&self) -> Decision {
        self.try_consume(1)
    }

    fn acquire(&self, timeout: Duration) -> Decision {
        self.consume(1, timeout)
    }

    fn metrics(&self) -> LimiterMetrics {
        TokenBucket::metrics(self)
    }
}

impl Admission for ConcurrencyGate {
    fn try_acquire(&self) -> Decision {
        ConcurrencyGate::try_acquire(self)
    }

    fn acquire(&self, timeout: Duration) -> Decision {
        ConcurrencyGate::acquire(self, timeout)
    }

    fn metrics(&self) -> LimiterMetrics {
        ConcurrencyGate::metrics(self)
    }
}

#[derive(Clone)]
enum Backend {
    TokenBucket(Arc<TokenBucket>),
    Concurrency(ConcurrencyGate),
}

/// Admission controller configured by a [`Policy`].
///
/// # Examples
///
/// Rate limiting:
///
/// ```rust
/// use throttle::{Policy, RateLimiter, RejectReason};
///
/// let limiter = RateLimiter::new(Policy::token_bucket(2, 1.0)).unwrap();
/// assert!(limiter.try_acquire().is_allowed());
/// assert!(limiter.try_acquire().is_allowed());
/// assert_eq!(limiter.try_acquire().reject_reason(), Some(RejectReason::Overload));
/// ```
///
/// Concurrency limiting with a scoped permit:
///
/// ```rust
/// use std::time::Duration;
/// use throttle::{Policy, RateLimiter};
///
/// let limiter = RateLimiter::new(Policy::concurrency(1)).unwrap();
/// {
///     let _permit = limiter.acquire(Duration::from_millis(10)).into_permit();
///     assert!(limiter.try_acquire().is_rejected());
/// }
/// assert!(limiter.try_acquire().is_allowed());
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    policy: Policy,
    backend: Backend,
}

impl RateLimiter {
    /// Validates `policy` and builds the limiter it describes.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`Policy::validate`].
    pub fn new(policy: Policy) -> Result<Self, ConfigError> {
        Self::with_clock(policy, Arc::new(MonotonicClock))
    }

    /// Like [`new`](Self::new), reading time from `clock`.
    ///
    /// Only the token bucket strategy consults the clock. Concurrency gate
    /// deadlines always use the process monotonic clock.
    pub fn with_clock(policy: Policy, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        policy.validate()?;

        let backend = match policy.strategy {
            Strategy::TokenBucket => {
                Backend::TokenBucket(Arc::new(TokenBucket::from_policy(&policy, clock)?))
            }
            Strategy::Concurrency => Backend::Concurrency(ConcurrencyGate::new(policy.capacity)?),
        };

        debug!(strategy = %policy.strategy, capacity = policy.capacity, "Created rate limiter");

        Ok(Self { policy, backend })
    }

    /// Admits one unit of work if possible, without blocking.
    pub fn try_acquire(&self) -> Decision {
        match &self.backend {
            Backend::TokenBucket(bucket) => bucket.try_consume(1),
            Backend::Concurrency(gate) => gate.try_acquire(),
        }
    }

    /// Admits one unit of work, waiting up to `timeout`.
    pub fn acquire(&self, timeout: Duration) -> Decision {
        match &self.backend {
            Backend::TokenBucket(bucket) => bucket.consume(1, timeout),
            Backend::Concurrency(gate) => gate.acquire(timeout),
        }
    }

    /// Same as [`acquire`](Self::acquire), also returning how long the
    /// caller waited before the decision was made.
    ///
    /// A token bucket measures the wait with its own clock, a concurrency
    /// gate with the monotonic clock.
    pub fn acquire_timed(&self, timeout: Duration) -> (Decision, Duration) {
        match &self.backend {
            Backend::TokenBucket(bucket) => bucket.consume_timed(1, timeout),
            Backend::Concurrency(gate) => gate.acquire_timed(timeout),
        }
    }

    /// Admits `cost` units of work at once, without blocking.
    ///
    /// # Errors
    ///
    /// [`MisuseError::UnsupportedCost`] for a concurrency limiter asked for a
    /// cost other than 1.
    pub fn try_acquire_n(&self, cost: u64) -> Result<Decision, MisuseError> {
        match &self.backend {
            Backend::TokenBucket(bucket) => Ok(bucket.try_consume(cost)),
            Backend::Concurrency(gate) => {
                check_unit_cost(cost)?;
                Ok(gate.try_acquire())
            }
        }
    }

    /// Admits `cost` units of work at once, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`try_acquire_n`](Self::try_acquire_n).
    pub fn acquire_n(&self, cost: u64, timeout: Duration) -> Result<Decision, MisuseError> {
        match &self.backend {
            Backend::TokenBucket(bucket) => Ok(bucket.consume(cost, timeout)),
            Backend::Concurrency(gate) => {
                check_unit_cost(cost)?;
                Ok(gate.acquire(timeout))
            }
        }
    }

    /// Returns a permit early. Dropping it has the same effect.
    ///
    /// # Errors
    ///
    /// - [`MisuseError::ReleaseUnsupported`] on a token bucket limiter
    /// - [`MisuseError::ForeignPermit`] if another gate issued the permit
    ///
    /// In both cases the permit is still returned to the gate that issued
    /// it.
    pub fn release(&self, permit: Permit) -> Result<(), MisuseError> {
        match &self.backend {
            Backend::TokenBucket(_) => {
                error!("Release called on a token bucket limiter");
                drop(permit);
                Err(MisuseError::ReleaseUnsupported)
            }
            Backend::Concurrency(gate) => gate.release(permit),
        }
    }

    /// Starts a background thread that refills the bucket every `interval`.
    ///
    /// Lazy refill already keeps the bucket correct; the scheduler only
    /// keeps `available` fresh for observers between requests.
    ///
    /// # Errors
    ///
    /// - [`MisuseError::SchedulerUnsupported`] on a concurrency limiter
    /// - [`ConfigError::ZeroInterval`] when `interval` is zero
    /// - [`ThrottleError::Spawn`] if the thread cannot be created
    pub fn start_refill_scheduler(&self, interval: Duration) -> Result<RefillScheduler, ThrottleError> {
        match &self.backend {
            Backend::TokenBucket(bucket) => RefillScheduler::start(Arc::clone(bucket), interval),
            Backend::Concurrency(_) => {
                error!("Refill scheduler requested for a concurrency limiter");
                Err(MisuseError::SchedulerUnsupported.into())
            }
        }
    }

    /// Snapshot of the backend's counters.
    pub fn metrics(&self) -> LimiterMetrics {
        match &self.backend {
            Backend::TokenBucket(bucket) => bucket.metrics(),
            Backend::Concurrency(gate) => gate.metrics(),
        }
    }

    /// The backing strategy.
    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.policy.strategy
    }

    /// The policy this limiter was built from.
    #[inline]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The backing token bucket, if any.
    pub fn token_bucket(&self) -> Option<&Arc<TokenBucket>> {
        match &self.backend {
            Backend::TokenBucket(bucket) => Some(bucket),
            Backend::Concurrency(_) => None,
        }
    }

    /// The backing concurrency gate, if any.
    pub fn gate(&self) -> Option<&ConcurrencyGate> {
        match &self.backend {
            Backend::TokenBucket(_) => None,
            Backend::Concurrency(gate) => Some(gate),
        }
    }

    /// `true` if the limiter saw no traffic within `idle` and, for a gate,
    /// nothing holds or awaits a permit. Used by registry cleanup.
    pub fn is_idle(&self, idle: Duration) -> bool {
        match &self.backend {
            Backend::TokenBucket(bucket) => bucket.is_inactive(idle),
            Backend::Concurrency(gate) => gate.is_quiescent() && gate.is_inactive(idle),
        }
    }
}

impl Admission for RateLimiter {
    fn try_acquire(&self) -> Decision {
        RateLimiter::try_acquire(self)
    }

    fn acquire(&self, timeout: Duration) -> Decision {
        RateLimiter::acquire(self, timeout)
    }

    fn metrics(&self) -> LimiterMetrics {
        RateLimiter::metrics(self)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RateLimiter");
        s.field("strategy", &self.policy.strategy);
        match &self.backend {
            Backend::TokenBucket(bucket) => s.field("backend", bucket),
            Backend::Concurrency(gate) => s.field("backend", gate),
        };
        s.finish()
    }
}

fn check_unit_cost(cost: u64) -> Result<(), MisuseError> {
    if cost == 1 {
        Ok(())
    } else {
        error!(cost, "Concurrency limiter asked for a cost other than 1");
        Err(MisuseError::UnsupportedCost { cost })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, RejectReason};
    use std::thread;

    #[test]
    fn test_token_bucket_limiter() {
        let limiter = RateLimiter::new(Policy::token_bucket(3, 1.0)).unwrap();
        assert_eq!(limiter.strategy(), Strategy::TokenBucket);

        for _ in 0..3 {
            let decision = limiter.try_acquire();
            assert!(decision.is_allowed());
            assert!(decision.permit().is_none());
        }
        assert_eq!(
            limiter.try_acquire().reject_reason(),
            Some(RejectReason::Overload)
        );
    }

    #[test]
    fn test_concurrency_limiter_hands_out_permits() {
        let limiter = RateLimiter::new(Policy::concurrency(2)).unwrap();
        let a = limiter.try_acquire().into_permit().unwrap();
        let _b = limiter.try_acquire().into_permit().unwrap();
        assert!(limiter.try_acquire().is_rejected());

        limiter.release(a).unwrap();
        assert!(limiter.try_acquire().is_allowed());
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        assert_eq!(
            RateLimiter::new(Policy::token_bucket(0, 1.0)).unwrap_err(),
            ConfigError::ZeroCapacity
        );
        assert!(matches!(
            RateLimiter::new(Policy::token_bucket(1, 0.0)).unwrap_err(),
            ConfigError::InvalidRate(_)
        ));
        assert_eq!(
            RateLimiter::new(Policy::concurrency(1).with_warmup(Duration::from_secs(1))).unwrap_err(),
            ConfigError::WarmupUnsupported
        );
    }

    #[test]
    fn test_release_on_token_bucket_is_misuse() {
        let bucket_limiter = RateLimiter::new(Policy::token_bucket(1, 1.0)).unwrap();
        let gate_limiter = RateLimiter::new(Policy::concurrency(1)).unwrap();

        let permit = gate_limiter.try_acquire().into_permit().unwrap();
        assert_eq!(
            bucket_limiter.release(permit),
            Err(MisuseError::ReleaseUnsupported)
        );
        // the permit still went back to its own gate
        assert!(gate_limiter.try_acquire().is_allowed());
    }

    #[test]
    fn test_foreign_permit_through_facade() {
        let a = RateLimiter::new(Policy::concurrency(1)).unwrap();
        let b = RateLimiter::new(Policy::concurrency(1)).unwrap();
        let permit = a.try_acquire().into_permit().unwrap();
        assert_eq!(b.release(permit), Err(MisuseError::ForeignPermit));
        assert_eq!(a.gate().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_cost_on_concurrency_limiter() {
        let limiter = RateLimiter::new(Policy::concurrency(4)).unwrap();
        assert!(limiter.try_acquire_n(1).unwrap().is_allowed());
        assert_eq!(
            limiter.try_acquire_n(2).unwrap_err(),
            MisuseError::UnsupportedCost { cost: 2 }
        );
        assert_eq!(
            limiter.acquire_n(0, Duration::ZERO).unwrap_err(),
            MisuseError::UnsupportedCost { cost: 0 }
        );
        // the rejected calls took nothing
        assert_eq!(limiter.gate().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_bulk_acquire_on_token_bucket() {
        let clock = ManualClock::shared();
        let limiter = RateLimiter::with_clock(Policy::token_bucket(10, 5.0), clock.clone()).unwrap();

        assert!(limiter.try_acquire_n(10).unwrap().is_allowed());
        assert!(limiter.try_acquire_n(1).unwrap().is_rejected());

        let decision = limiter.acquire_n(5, Duration::from_secs(2)).unwrap();
        assert!(decision.is_allowed());
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_blocking_acquire_with_manual_clock() {
        let clock = ManualClock::shared();
        let limiter = RateLimiter::with_clock(Policy::token_bucket(1, 1.0), clock.clone()).unwrap();

        assert!(limiter.acquire(Duration::ZERO).is_allowed());
        assert!(limiter.acquire(Duration::from_secs(5)).is_allowed());
        assert!(limiter.acquire(Duration::from_secs(5)).is_allowed());
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_acquire_timed_reports_wait() {
        let clock = ManualClock::shared();
        let limiter = RateLimiter::with_clock(Policy::token_bucket(2, 4.0), clock).unwrap();
        assert!(limiter.try_acquire_n(2).unwrap().is_allowed());

        let (decision, waited) = limiter.acquire_timed(Duration::from_secs(1));
        assert!(decision.is_allowed());
        assert_eq!(waited, Duration::from_millis(250));

        let gate = RateLimiter::new(Policy::concurrency(1)).unwrap();
        let (decision, waited) = gate.acquire_timed(Duration::ZERO);
        assert!(decision.into_permit().is_some());
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_scheduler_unsupported_for_gate() {
        let limiter = RateLimiter::new(Policy::concurrency(1)).unwrap();
        let err = limiter
            .start_refill_scheduler(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            ThrottleError::Misuse(MisuseError::SchedulerUnsupported)
        ));
    }

    #[test]
    fn test_clones_share_backend() {
        let limiter = RateLimiter::new(Policy::token_bucket(4, 1.0)).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || limiter.try_acquire().is_allowed())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(limiter.try_acquire().is_rejected());
        assert_eq!(limiter.metrics().total_acquired, 4);
    }

    #[test]
    fn test_admission_trait_objects() {
        let limiters: Vec<Box<dyn Admission>> = vec![
            Box::new(TokenBucket::new(1, 1.0).unwrap()),
            Box::new(ConcurrencyGate::new(1).unwrap()),
            Box::new(RateLimiter::new(Policy::default()).unwrap()),
        ];

        for limiter in &limiters {
            let decision = limiter.try_acquire();
            assert!(decision.is_allowed());
            assert_eq!(limiter.metrics().total_acquired, 1);
        }
    }

    #[test]
    fn test_is_idle() {
        let clock = ManualClock::shared();
        let bucket = RateLimiter::with_clock(Policy::token_bucket(1, 1.0), clock.clone()).unwrap();
        assert!(!bucket.is_idle(Duration::from_secs(10)));
        clock.advance(Duration::from_secs(11));
        assert!(bucket.is_idle(Duration::from_secs(10)));

        let gate = RateLimiter::new(Policy::concurrency(1)).unwrap();
        let permit = gate.try_acquire().into_permit();
        assert!(!gate.is_idle(Duration::ZERO));
        drop(permit);
        thread::sleep(Duration::from_millis(2));
        assert!(gate.is_idle(Duration::ZERO));
    }

    #[test]
    fn test_debug_impl() {
        let limiter = RateLimiter::new(Policy::concurrency(3)).unwrap();
        let debug = format!("{:?}", limiter);
        assert!(debug.contains("Concurrency"));
        assert!(debug.contains("max_permits: 3"));
    }
}
