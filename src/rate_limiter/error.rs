//! # Error Taxonomy
//!
//! Rejections are not errors. A request that cannot be admitted comes back as
//! [`Decision::Rejected`](super::Decision::Rejected) carrying a
//! [`RejectReason`](super::RejectReason). The types in this module cover the
//! two remaining failure classes:
//!
//! ```text
//!     ConfigError ──► invalid policy at construction, fatal, never retried
//!     MisuseError ──► programmer error (bad release, wrong strategy), loud
//! ```
//!
//! [`ThrottleError`] wraps both, plus the I/O failure of spawning the refill
//! thread.

use thiserror::Error;

/// A policy could not be turned into a limiter.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Capacity (max burst or max concurrency) must be at least one.
    #[error("capacity must be greater than 0")]
    ZeroCapacity,

    /// Token bucket refill rate must be a positive, finite number.
    #[error("refill rate must be a positive finite number of tokens per second, got {0}")]
    InvalidRate(f64),

    /// A warm-up period, when present, must be non-zero.
    #[error("warm-up period must be greater than 0")]
    ZeroWarmup,

    /// Warm-up only applies to the token bucket strategy.
    #[error("warm-up is only supported by the token bucket strategy")]
    WarmupUnsupported,

    /// The periodic refill interval must be non-zero.
    #[error("refill interval must be greater than 0")]
    ZeroInterval,

    /// A registry must be able to hold at least one limiter.
    #[error("registry max_entries must be greater than 0")]
    ZeroMaxEntries,
}

/// The caller used the limiter in a way its strategy does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MisuseError {
    /// `release` was called on a token bucket limiter, which hands out no
    /// permits.
    #[error("release is not supported by a token bucket limiter")]
    ReleaseUnsupported,

    /// The permit handed to `release` was issued by a different gate.
    #[error("permit was issued by a different concurrency gate")]
    ForeignPermit,

    /// A concurrency limiter admits exactly one unit per permit.
    #[error("a concurrency limiter admits exactly one unit per permit, got cost {cost}")]
    UnsupportedCost {
        /// The cost that was requested.
        cost: u64,
    },

    /// Periodic refill was requested for a concurrency limiter.
    #[error("refill scheduling requires a token bucket limiter")]
    SchedulerUnsupported,
}

/// Umbrella error for fallible operations in this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ThrottleError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid use of a limiter.
    #[error(transparent)]
    Misuse(#[from] MisuseError),

    /// The refill thread could not be started.
    #[error("failed to spawn refill thread")]
    Spawn(#[source] std::io::Error),

    /// The refill thread panicked before it could be joined.
    #[error("refill thread panicked")]
    SchedulerPanicked,
}

/// Result alias defaulting to [`ThrottleError`].
pub type Result<T, E = ThrottleError> = std::result::Result<T, E>;
