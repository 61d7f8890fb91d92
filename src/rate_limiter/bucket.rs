//! # Token Bucket
//!
//! The bucket holds up to `capacity` tokens and gains `rate` tokens per
//! second. Consuming a token admits one unit of work.
//!
//! ```text
//!     How Token Bucket Works (capacity 5, rate 2/s):
//!
//!     t=0.0   [🪙🪙🪙🪙🪙]  5.0   three requests arrive
//!     t=0.0   [🪙🪙      ]  2.0
//!     t=0.75  [🪙🪙🪙½   ]  3.5   refilled lazily on next access
//!     t=5.0   [🪙🪙🪙🪙🪙]  5.0   capped at capacity
//! ```
//!
//! ## Lazy Refill
//!
//! There is no timer. Every access computes the time elapsed since the last
//! refill, multiplies it by the rate and adds the result, capped at capacity.
//! Tokens are stored as a real number, so the fraction of a token earned by a
//! short time slice is kept for the next access instead of being truncated.
//! Admission checks and reported counts use whole tokens.
//!
//! ## Warm-up
//!
//! With a warm-up period `W` the refill rate ramps linearly from
//! `rate / COLD_FACTOR` to `rate` over `W`:
//!
//! ```text
//!     rate ┤          ┌──────────────
//!          │        ╱
//!          │      ╱
//!   rate/3 ┤────╱
//!          └────┬─────┬──────────────► time
//!             start  start + W
//! ```
//!
//! The ramp starts at construction and restarts whenever the bucket has seen
//! no traffic for at least `W`. A restarted bucket keeps at most one stored
//! token, so a cold bucket never releases a burst. A warm-up bucket starts
//! empty; a plain bucket starts full.
//!
//! ## Thread Safety
//!
//! All state lives behind one mutex, held only for the check-and-update step.
//! Blocking waits in [`TokenBucket::consume`] sleep outside the lock.

use super::{
    clock::{Clock, MonotonicClock},
    config::{Policy, Strategy},
    decision::{Decision, RejectReason},
    error::ConfigError,
    metrics::{Counters, LimiterMetrics},
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Ratio between the steady rate and the rate at the start of a warm-up ramp.
pub const COLD_FACTOR: f64 = 3.0;

/// Tolerance for floating point accumulation when comparing token counts.
///
/// Ten refills of 0.1 s at 1 token/s sum to 0.9999999999999999, which must
/// still admit one token.
const TOKEN_EPSILON: f64 = 1e-9;

/// Shortest sleep between retries of a blocking consume.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Mutable bucket state, guarded by the bucket mutex.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    ramp_start: Instant,
    last_access: Instant,
}

/// Result of one locked consume attempt, before metrics are recorded.
enum Attempt {
    Consumed,
    Short { wait: Duration },
    Impossible,
}

/// Token bucket rate limiter.
///
/// ## Example
///
/// ```rust
/// use throttle::TokenBucket;
///
/// // Burst of 3, one token per second
/// let bucket = TokenBucket::new(3, 1.0).unwrap();
///
/// assert!(bucket.try_consume(2).is_allowed());
/// assert!(bucket.try_consume(1).is_allowed());
/// assert!(bucket.try_consume(1).is_rejected());
/// ```
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: u64,
    rate: f64,
    warmup: Option<Duration>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl TokenBucket {
    /// Creates a full bucket of `capacity` tokens refilled at `rate` tokens
    /// per second.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroCapacity`] or [`ConfigError::InvalidRate`].
    pub fn new(capacity: u64, rate: f64) -> Result<Self, ConfigError> {
        Self::from_policy(&Policy::token_bucket(capacity, rate), Arc::new(MonotonicClock))
    }

    /// Creates an empty bucket that ramps up to `rate` over `warmup`.
    pub fn with_warmup(capacity: u64, rate: f64, warmup: Duration) -> Result<Self, ConfigError> {
        Self::from_policy(
            &Policy::token_bucket(capacity, rate).with_warmup(warmup),
            Arc::new(MonotonicClock),
        )
    }

    /// Creates a bucket from the capacity, rate and warm-up of `policy`,
    /// reading time from `clock`.
    ///
    /// The policy is validated as a token bucket policy whatever its
    /// `strategy` field says.
    pub fn from_policy(policy: &Policy, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let policy = Policy {
            strategy: Strategy::TokenBucket,
            ..policy.clone()
        };
        policy.validate()?;

        let now = clock.now();
        let tokens = if policy.warmup.is_some() {
            0.0
        } else {
            policy.capacity as f64
        };

        debug!(
            capacity = policy.capacity,
            rate = policy.rate,
            warmup_ms = policy.warmup.map(|w| w.as_millis() as u64),
            "Created token bucket"
        );

        Ok(Self {
            state: Mutex::new(BucketState {
                tokens,
                last_refill: now,
                ramp_start: now,
                last_access: now,
            }),
            capacity: policy.capacity,
            rate: policy.rate,
            warmup: policy.warmup,
            clock,
            counters: Counters::default(),
        })
    }

    /// Maximum number of tokens the bucket holds.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Steady refill rate in tokens per second.
    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Warm-up period, if configured.
    #[inline]
    pub fn warmup(&self) -> Option<Duration> {
        self.warmup
    }

    /// Attempts to take `cost` tokens without blocking.
    ///
    /// Refills first, then either deducts `cost` and returns
    /// `Allowed(None)`, or leaves the bucket untouched and returns
    /// `Rejected(Overload)`. A cost of zero is always allowed; a cost above
    /// capacity is never allowed.
    pub fn try_consume(&self, cost: u64) -> Decision {
        match self.attempt(cost) {
            Attempt::Consumed => {
                self.counters.on_acquisition(cost);
                Decision::Allowed(None)
            }
            Attempt::Short { .. } | Attempt::Impossible => {
                self.counters.on_rejection(RejectReason::Overload);
                Decision::overload()
            }
        }
    }

    /// Takes `cost` tokens, waiting up to `timeout` for them to accrue.
    ///
    /// Between attempts the caller sleeps (through the clock) for the time
    /// the deficit needs to refill at the current rate, bounded by the time
    /// left before the deadline. Returns `Rejected(TimedOut)` once the
    /// deadline passes, or `Rejected(Overload)` straight away when `cost`
    /// exceeds capacity, since no amount of waiting can satisfy it.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use throttle::{ManualClock, Policy, RejectReason, TokenBucket};
    ///
    /// let clock = ManualClock::shared();
    /// let bucket = TokenBucket::from_policy(&Policy::token_bucket(1, 1.0), clock.clone()).unwrap();
    ///
    /// assert!(bucket.consume(1, Duration::ZERO).is_allowed());
    /// let late = bucket.consume(1, Duration::from_millis(500));
    /// assert_eq!(late.reject_reason(), Some(RejectReason::TimedOut));
    /// assert!(bucket.consume(1, Duration::from_secs(1)).is_allowed());
    /// ```
    pub fn consume(&self, cost: u64, timeout: Duration) -> Decision {
        self.consume_timed(cost, timeout).0
    }

    /// Same as [`consume`](Self::consume), also returning how long the
    /// caller waited as measured by the bucket's clock.
    ///
    /// The wait is zero for an immediate admission and for an `Overload`
    /// rejection.
    pub fn consume_timed(&self, cost: u64, timeout: Duration) -> (Decision, Duration) {
        let start = self.clock.now();
        let deadline = start.checked_add(timeout);

        loop {
            match self.attempt(cost) {
                Attempt::Consumed => {
                    let waited = self.record_wait(start);
                    self.counters.on_acquisition(cost);
                    return (Decision::Allowed(None), waited);
                }
                Attempt::Impossible => {
                    self.counters.on_rejection(RejectReason::Overload);
                    return (Decision::overload(), Duration::ZERO);
                }
                Attempt::Short { wait } => {
                    let remaining = match deadline {
                        Some(deadline) => deadline.saturating_duration_since(self.clock.now()),
                        None => wait,
                    };
                    if remaining.is_zero() {
                        let waited = self.record_wait(start);
                        self.counters.on_rejection(RejectReason::TimedOut);
                        debug!(cost, timeout_ms = timeout.as_millis() as u64, "Token bucket wait timed out");
                        return (Decision::timed_out(), waited);
                    }
                    self.clock.sleep(wait.max(MIN_WAIT).min(remaining));
                }
            }
        }
    }

    /// Credits the tokens earned since the last refill.
    ///
    /// Safe to call at any time and from any thread; calling it twice at
    /// the same instant credits nothing the second time. Returns the whole
    /// tokens available afterwards.
    pub fn refill(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);
        whole_tokens(state.tokens)
    }

    /// Whole tokens available right now (after a refill).
    pub fn available_tokens(&self) -> u64 {
        self.refill()
    }

    /// Refill rate in effect right now, accounting for warm-up.
    pub fn effective_rate(&self) -> f64 {
        let now = self.clock.now();
        let state = self.state.lock();
        self.effective_rate_at(state.ramp_start, now)
    }

    /// Adds `n` tokens, capped at capacity.
    pub fn add_tokens(&self, n: u64) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + n as f64).min(self.capacity as f64);
    }

    /// Restores the construction state and clears the counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.tokens = if self.warmup.is_some() {
            0.0
        } else {
            self.capacity as f64
        };
        state.last_refill = now;
        state.ramp_start = now;
        state.last_access = now;
        drop(state);
        self.counters.reset();
    }

    /// `true` if no consume attempt happened within `idle`.
    pub fn is_inactive(&self, idle: Duration) -> bool {
        let now = self.clock.now();
        let last = self.state.lock().last_access;
        now.saturating_duration_since(last) > idle
    }

    /// Snapshot of counters and current tokens.
    pub fn metrics(&self) -> LimiterMetrics {
        let available = self.available_tokens();
        self.counters
            .snapshot(Strategy::TokenBucket, available, self.capacity)
    }

    fn attempt(&self, cost: u64) -> Attempt {
        if cost > self.capacity {
            return Attempt::Impossible;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();

        self.refill_locked(&mut state, now);
        if let Some(warmup) = self.warmup {
            if now.saturating_duration_since(state.last_access) >= warmup {
                state.ramp_start = now;
                state.tokens = state.tokens.min(1.0);
                debug!("Token bucket idle, restarting warm-up");
            }
        }
        if now > state.last_access {
            state.last_access = now;
        }

        let needed = cost as f64;
        if state.tokens + TOKEN_EPSILON >= needed {
            state.tokens = (state.tokens - needed).max(0.0);
            Attempt::Consumed
        } else {
            let deficit = needed - state.tokens;
            let rate = self.effective_rate_at(state.ramp_start, now);
            let wait = Duration::try_from_secs_f64(deficit / rate).unwrap_or(Duration::MAX);
            Attempt::Short { wait }
        }
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) {
        if now <= state.last_refill {
            return;
        }

        let credit = self.credit(state.ramp_start, state.last_refill, now);
        state.last_refill = now;

        let before = state.tokens;
        state.tokens = (before + credit).min(self.capacity as f64);

        if whole_tokens(state.tokens) > whole_tokens(before) {
            self.counters.on_refill();
            trace!(
                tokens = state.tokens,
                added = state.tokens - before,
                "Refilled token bucket"
            );
        }
    }

    /// Tokens earned between `from` and `to`: the integral of the
    /// (possibly ramping) rate over that interval.
    fn credit(&self, ramp_start: Instant, from: Instant, to: Instant) -> f64 {
        let Some(warmup) = self.warmup else {
            return self.rate * to.saturating_duration_since(from).as_secs_f64();
        };

        let cold = self.rate / COLD_FACTOR;
        let ramp = warmup.as_secs_f64();
        let a = from.saturating_duration_since(ramp_start).as_secs_f64();
        let b = to.saturating_duration_since(ramp_start).as_secs_f64();

        let mut credit = 0.0;
        if a < ramp {
            let end = b.min(ramp);
            credit += cold * (end - a) + (self.rate - cold) * (end * end - a * a) / (2.0 * ramp);
        }
        if b > ramp {
            credit += self.rate * (b - a.max(ramp));
        }
        credit
    }

    fn effective_rate_at(&self, ramp_start: Instant, now: Instant) -> f64 {
        match self.warmup {
            None => self.rate,
            Some(warmup) => {
                let cold = self.rate / COLD_FACTOR;
                let progress = (now.saturating_duration_since(ramp_start).as_secs_f64()
                    / warmup.as_secs_f64())
                .min(1.0);
                cold + (self.rate - cold) * progress
            }
        }
    }

    fn record_wait(&self, start: Instant) -> Duration {
        let waited = self.clock.now().saturating_duration_since(start);
        self.counters
            .record_wait(u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX));
        waited
    }
}

#[inline]
fn whole_tokens(tokens: f64) -> u64 {
    (tokens + TOKEN_EPSILON).floor() as u64
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.state.lock().tokens;
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .field("warmup", &self.warmup)
            .field("tokens", &tokens)
            .finish()
    }
}
