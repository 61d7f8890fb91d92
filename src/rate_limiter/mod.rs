//! # Rate Limiter Module
//!
//! Internal layout of the admission-control core.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── clock.rs        (Monotonic and manual time sources)
//!     ├── config.rs       (Policy, strategies and validation)
//!     ├── bucket.rs       (Token bucket with lazy refill and warm-up)
//!     ├── gate.rs         (Concurrency gate and scoped permits)
//!     ├── decision.rs     (Admission outcomes)
//!     ├── core.rs         (RateLimiter facade and Admission trait)
//!     ├── scheduler.rs    (Optional periodic refill thread)
//!     ├── registry.rs     (Per-key limiters)
//!     ├── metrics.rs      (Counters and health)
//!     └── error.rs        (Config and misuse errors)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Caller
//!       │
//!       ▼
//!     ┌──────────┐      ┌─────────────┐
//!     │ Registry │ ───► │ RateLimiter │ ◄── Policy
//!     └──────────┘      └──────┬──────┘
//!                              │
//!                 ┌────────────┴────────────┐
//!                 ▼                         ▼
//!          ┌─────────────┐          ┌─────────────────┐
//!          │ TokenBucket │ ◄─ Clock │ ConcurrencyGate │
//!          └──────┬──────┘          └────────┬────────┘
//!                 ▲                          │
//!         RefillScheduler                 Permit
//! ```

mod bucket;
mod clock;
mod config;
mod core;
mod decision;
mod error;
mod gate;
mod metrics;
mod registry;
mod scheduler;

/// Time sources
pub use clock::{Clock, ManualClock, MonotonicClock};

/// Limiter configuration
pub use config::{Policy, Strategy};

/// Token bucket backend
pub use bucket::{TokenBucket, COLD_FACTOR};

/// Concurrency gate backend
pub use gate::{ConcurrencyGate, Permit};

/// Admission outcomes
pub use decision::{Decision, RejectReason};

/// Facade over both backends
pub use core::{Admission, RateLimiter};

/// Background refill
pub use scheduler::RefillScheduler;

/// Per-key limiters
pub use registry::{LimiterRegistry, RegistryStats, DEFAULT_MAX_ENTRIES};

/// Observability
pub use metrics::{HealthStatus, LimiterMetrics};

/// Errors
pub use error::{ConfigError, MisuseError, Result, ThrottleError};
