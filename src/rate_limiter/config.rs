//! # Limiter Policy
//!
//! A [`Policy`] is the complete, immutable description of one limiter. It is
//! built once at startup, validated, and handed to
//! [`RateLimiter::new`](super::RateLimiter::new).
//!
//! ## Strategies
//!
//! ```text
//!     Strategy::TokenBucket                 Strategy::Concurrency
//!     ┌──────────────────────────┐          ┌──────────────────────────┐
//!     │ capacity: max burst      │          │ capacity: max in-flight  │
//!     │ rate:     tokens/second  │          │ rate:     unused         │
//!     │ warmup:   optional ramp  │          │ warmup:   not allowed    │
//!     └──────────────────────────┘          └──────────────────────────┘
//! ```

use super::error::ConfigError;
use std::fmt;
use std::time::Duration;

/// Which admission algorithm backs a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Bounded burst with a steady refill rate.
    TokenBucket,

    /// Bounded number of simultaneously in-flight operations.
    Concurrency,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenBucket => f.write_str("token-bucket"),
            Self::Concurrency => f.write_str("concurrency"),
        }
    }
}

/// Configuration for a single limiter.
///
/// ## Examples
///
/// ```rust
/// use std::time::Duration;
/// use throttle::{Policy, Strategy};
///
/// // 100 burst, 20 tokens per second
/// let api = Policy::token_bucket(100, 20.0);
/// assert!(api.validate().is_ok());
///
/// // 50 requests per second, burst of 100
/// let per_sec = Policy::per_second(50);
/// assert_eq!(per_sec.capacity, 100);
///
/// // Ramp from a third of the rate to the full rate over 3 seconds
/// let warm = Policy::token_bucket(5, 5.0).with_warmup(Duration::from_secs(3));
/// assert_eq!(warm.warmup, Some(Duration::from_secs(3)));
///
/// // At most 10 requests in flight
/// let db = Policy::concurrency(10);
/// assert_eq!(db.strategy, Strategy::Concurrency);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Backing algorithm.
    pub strategy: Strategy,

    /// Max burst (token bucket) or max concurrency (concurrency gate).
    pub capacity: u64,

    /// Steady refill rate in tokens per second. Ignored by the concurrency
    /// strategy.
    pub rate: f64,

    /// Ramp-up duration before the bucket reaches its steady rate.
    pub warmup: Option<Duration>,
}

impl Default for Policy {
    /// 50 token burst refilled at 10 tokens per second.
    fn default() -> Self {
        Self::token_bucket(50, 10.0)
    }
}

impl Policy {
    /// A token bucket holding at most `capacity` tokens, refilled at `rate`
    /// tokens per second.
    pub fn token_bucket(capacity: u64, rate: f64) -> Self {
        Self {
            strategy: Strategy::TokenBucket,
            capacity,
            rate,
            warmup: None,
        }
    }

    /// A concurrency cap of `max_permits` simultaneous operations.
    pub fn concurrency(max_permits: u64) -> Self {
        Self {
            strategy: Strategy::Concurrency,
            capacity: max_permits,
            rate: 0.0,
            warmup: None,
        }
    }

    /// Per-second limiting with a burst of twice the rate.
    ///
    /// ```rust
    /// use throttle::Policy;
    ///
    /// let policy = Policy::per_second(100);
    /// assert_eq!(policy.capacity, 200);
    /// assert_eq!(policy.rate, 100.0);
    /// ```
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::token_bucket(
            u64::from(requests_per_second) * 2,
            f64::from(requests_per_second),
        )
    }

    /// Per-minute limiting with a burst of the whole minute's quota.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::token_bucket(
            u64::from(requests_per_minute),
            f64::from(requests_per_minute) / 60.0,
        )
    }

    /// Adds a warm-up ramp. Token bucket only.
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = Some(warmup);
        self
    }

    /// Sets the burst capacity to `multiplier` seconds worth of the rate.
    ///
    /// ```rust
    /// use throttle::Policy;
    ///
    /// let policy = Policy::per_second(10).with_burst_multiplier(5);
    /// assert_eq!(policy.capacity, 50);
    /// ```
    pub fn with_burst_multiplier(mut self, multiplier: u32) -> Self {
        self.capacity = (self.rate * f64::from(multiplier)).ceil() as u64;
        self
    }

    /// Checks that the policy describes a usable limiter.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroCapacity`] when `capacity` is 0
    /// - [`ConfigError::InvalidRate`] when a token bucket rate is not a
    ///   positive finite number
    /// - [`ConfigError::ZeroWarmup`] when the warm-up period is zero
    /// - [`ConfigError::WarmupUnsupported`] when a concurrency policy carries
    ///   a warm-up
    ///
    /// ```rust
    /// use throttle::{ConfigError, Policy};
    ///
    /// assert_eq!(Policy::concurrency(0).validate(), Err(ConfigError::ZeroCapacity));
    /// assert!(Policy::token_bucket(10, -1.0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        match self.strategy {
            Strategy::TokenBucket => {
                if !(self.rate.is_finite() && self.rate > 0.0) {
                    return Err(ConfigError::InvalidRate(self.rate));
                }
                if matches!(self.warmup, Some(w) if w.is_zero()) {
                    return Err(ConfigError::ZeroWarmup);
                }
            }
            Strategy::Concurrency => {
                if self.warmup.is_some() {
                    return Err(ConfigError::WarmupUnsupported);
                }
            }
        }

        Ok(())
    }

    /// Steady admission rate per second, or `None` for the concurrency
    /// strategy, whose throughput depends on how long callers hold permits.
    pub fn steady_rate_per_second(&self) -> Option<f64> {
        match self.strategy {
            Strategy::TokenBucket => Some(self.rate),
            Strategy::Concurrency => None,
        }
    }
}
