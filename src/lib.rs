//! # Throttle - In-Process Admission Control for Rust
//!
//! Throttle decides whether a unit of work may proceed right now, may proceed
//! after a bounded wait, or must be turned away. It protects downstream
//! resources (APIs with quotas, connection pools, databases) from being
//! called faster or more concurrently than they can take.
//!
//! ## Two Strategies
//!
//! ```text
//!     Token Bucket (rate)                    Concurrency Gate (parallelism)
//!
//!     capacity 5, rate 2/s                   max_permits 3
//!     [🪙🪙🪙🪙🪙] ── request ──► ✅           [■ ■ □] ── request ──► ✅ + permit
//!     [          ] ── request ──► ⛔           [■ ■ ■] ── request ──► ⛔
//!     +0.5s [🪙  ] ── request ──► ✅           permit dropped ──► [■ ■ □]
//! ```
//!
//! - **Token bucket** bounds the *rate*: a burst of up to `capacity`, then
//!   `rate` admissions per second. Refill is lazy and keeps fractional
//!   tokens. An optional warm-up ramps the rate up from a third of its
//!   steady value.
//! - **Concurrency gate** bounds how many operations run *at once*. Each
//!   admission yields a [`Permit`] that frees its slot when dropped.
//!
//! Every admission call returns a [`Decision`]: `Allowed`, or `Rejected`
//! with [`RejectReason::Overload`] (no capacity, did not wait) or
//! [`RejectReason::TimedOut`] (waited, deadline passed). Rejections are
//! values, not errors. Errors are reserved for invalid configuration
//! ([`ConfigError`]) and misuse ([`MisuseError`]).
//!
//! ## Quick Start
//!
//! ### Rate Limiting
//!
//! ```rust
//! use std::time::Duration;
//! use throttle::{Policy, RateLimiter};
//!
//! // Burst of 100, 10 requests per second sustained
//! let limiter = RateLimiter::new(Policy::token_bucket(100, 10.0)).unwrap();
//!
//! if limiter.try_acquire().is_allowed() {
//!     // handle the request
//! } else {
//!     // return 429 Too Many Requests
//! }
//!
//! // Or wait up to 200ms for a token
//! let decision = limiter.acquire(Duration::from_millis(200));
//! assert!(decision.is_allowed());
//! ```
//!
//! ### Concurrency Limiting
//!
//! ```rust
//! use std::time::Duration;
//! use throttle::{Policy, RateLimiter};
//!
//! let db = RateLimiter::new(Policy::concurrency(8)).unwrap();
//!
//! if let Some(_permit) = db.acquire(Duration::from_secs(1)).into_permit() {
//!     // run the query; the slot is freed when `_permit` goes out of scope
//! }
//! ```
//!
//! ### Builder
//!
//! ```rust
//! use std::time::Duration;
//! use throttle::RateLimiterBuilder;
//!
//! let limiter = RateLimiterBuilder::new()
//!     .capacity(5)
//!     .rate(5.0)
//!     .warmup(Duration::from_secs(3))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(limiter.policy().warmup, Some(Duration::from_secs(3)));
//! ```
//!
//! ### Per-Key Limiting
//!
//! ```rust
//! use throttle::{LimiterRegistry, Policy};
//!
//! let per_client = LimiterRegistry::new(Policy::per_second(10)).unwrap();
//! assert!(per_client.try_acquire(&"10.0.0.1").is_allowed());
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │  RateLimiter / Registry  │
//!                    ├──────────────────────────┤
//!                    │  • try_acquire()         │
//!                    │  • acquire(timeout)      │
//!                    │  • release(permit)       │
//!                    │  • metrics()             │
//!                    └──────────┬───────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                               │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   TokenBucket       │       │   ConcurrencyGate    │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Lazy refill       │       │ • Bounded permits    │
//!     │ • Fractional carry  │       │ • Timed waits        │
//!     │ • Warm-up ramp      │       │ • Release on drop    │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! Every type is `Send + Sync`. Each limiter keeps its state behind a single
//! mutex held only for the check-and-update step; blocked callers sleep or
//! wait on a condition variable without holding it. Limiters never admit
//! more than their capacity, whatever the interleaving. Waiters are not
//! served in FIFO order.
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and installs no subscriber. Creation
//! and timeouts are logged at `debug`, scheduler start and stop at `info`,
//! registry pressure at `warn` and misuse at `error`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

mod rate_limiter;

pub use rate_limiter::{
    Admission, Clock, ConcurrencyGate, ConfigError, Decision, HealthStatus, LimiterMetrics,
    LimiterRegistry, ManualClock, MisuseError, MonotonicClock, Permit, Policy, RateLimiter,
    RefillScheduler, RegistryStats, RejectReason, Result, Strategy, ThrottleError, TokenBucket,
    COLD_FACTOR, DEFAULT_MAX_ENTRIES,
};

use std::sync::Arc;
use std::time::Duration;

/// A registry wrapped in `Arc` for sharing across request handlers.
///
/// [`RateLimiter`] handles are already cheap to clone and share their
/// state, so they need no wrapper.
pub type SharedRegistry<K> = Arc<LimiterRegistry<K>>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use throttle::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical admission-control use cases.
    //!
    //! # Example
    //! ```rust
    //! use throttle::prelude::*;
    //!
    //! let limiter = RateLimiter::new(Policy::per_second(50)).unwrap();
    //! let decision: Decision = limiter.try_acquire();
    //! assert!(decision.is_allowed());
    //! ```

    pub use crate::{
        Admission, ConfigError, Decision, HealthStatus, LimiterMetrics, LimiterRegistry,
        MisuseError, Permit, Policy, RateLimiter, RateLimiterBuilder, RejectReason,
        SharedRegistry, Strategy,
    };
}

/// Fluent construction of a [`RateLimiter`].
///
/// Starts from a token bucket with a burst of 50 and 10 tokens per second.
///
/// # Example
///
/// ```rust
/// use throttle::{ConfigError, RateLimiterBuilder, Strategy};
///
/// let gate = RateLimiterBuilder::new()
///     .concurrency()
///     .capacity(4)
///     .build()
///     .unwrap();
/// assert_eq!(gate.strategy(), Strategy::Concurrency);
///
/// let invalid = RateLimiterBuilder::new().capacity(0).build();
/// assert_eq!(invalid.unwrap_err(), ConfigError::ZeroCapacity);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiterBuilder {
    policy: Policy,
    clock: Option<Arc<dyn Clock>>,
}

impl RateLimiterBuilder {
    /// Creates a builder with the default token bucket policy.
    pub fn new() -> Self {
        Self {
            policy: Policy::default(),
            clock: None,
        }
    }

    /// Selects the token bucket strategy.
    pub fn token_bucket(mut self) -> Self {
        self.policy.strategy = Strategy::TokenBucket;
        self
    }

    /// Selects the concurrency strategy.
    pub fn concurrency(mut self) -> Self {
        self.policy.strategy = Strategy::Concurrency;
        self
    }

    /// Max burst for a token bucket, max in-flight for a gate.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.policy.capacity = capacity;
        self
    }

    /// Steady refill rate in tokens per second.
    pub fn rate(mut self, tokens_per_second: f64) -> Self {
        self.policy.rate = tokens_per_second;
        self
    }

    /// Warm-up ramp for a token bucket.
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.policy.warmup = Some(warmup);
        self
    }

    /// Reads time from `clock` instead of the process monotonic clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the whole policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates the policy and builds the limiter.
    ///
    /// # Errors
    ///
    /// The [`ConfigError`] reported by [`Policy::validate`].
    pub fn build(self) -> std::result::Result<RateLimiter, ConfigError> {
        match self.clock {
            Some(clock) => RateLimiter::with_clock(self.policy, clock),
            None => RateLimiter::new(self.policy),
        }
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
