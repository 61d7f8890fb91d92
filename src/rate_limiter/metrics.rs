//! # Limiter Metrics
//!
//! Every limiter keeps a small set of atomic counters next to its state.
//! [`LimiterMetrics`] is a point-in-time snapshot of those counters plus the
//! current capacity, with the derived ratios operators care about.
//!
//! Overload and timeout rejections are counted separately so dashboards can
//! tell "no capacity right now" apart from "waited and gave up".
//!
//! ```text
//!     Metrics Dashboard:
//!     ┌─────────────────────────────────────┐
//!     │  Success Rate: 85%                  │
//!     │  Overloaded: 10   Timed Out: 5      │
//!     │  Available: 7/10                    │
//!     │  Health: Healthy                    │
//!     └─────────────────────────────────────┘
//! ```

use super::config::Strategy;
use super::decision::RejectReason;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Consecutive rejections above which a limiter counts as under sustained
/// pressure.
const SUSTAINED_REJECTION_STREAK: u32 = 10;

/// Rejection ratio above which a limiter counts as under sustained pressure.
const SUSTAINED_PRESSURE_RATIO: f64 = 0.3;

/// Live counters shared by every limiter implementation.
///
/// Counters are statistics, not admission state, so relaxed ordering is
/// enough: admission correctness comes from each limiter's mutex.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    acquired: AtomicU64,
    overloaded: AtomicU64,
    timed_out: AtomicU64,
    refills: AtomicU64,
    consecutive_rejections: AtomicU32,
    max_wait_time_ns: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn on_acquisition(&self, n: u64) {
        self.acquired.fetch_add(n, Ordering::Relaxed);
        if self.consecutive_rejections.load(Ordering::Relaxed) > 0 {
            self.consecutive_rejections.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn on_rejection(&self, reason: RejectReason) {
        match reason {
            RejectReason::Overload => self.overloaded.fetch_add(1, Ordering::Relaxed),
            RejectReason::TimedOut => self.timed_out.fetch_add(1, Ordering::Relaxed),
        };
        self.consecutive_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_refill(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    /// Records how long a blocking acquire spent waiting.
    pub(crate) fn record_wait(&self, wait_ns: u64) {
        self.max_wait_time_ns.fetch_max(wait_ns, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.acquired.store(0, Ordering::Relaxed);
        self.overloaded.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        self.refills.store(0, Ordering::Relaxed);
        self.consecutive_rejections.store(0, Ordering::Relaxed);
        self.max_wait_time_ns.store(0, Ordering::Relaxed);
    }

    /// Builds a snapshot; `available` and `capacity` come from the caller's
    /// own state.
    pub(crate) fn snapshot(&self, strategy: Strategy, available: u64, capacity: u64) -> LimiterMetrics {
        let total_acquired = self.acquired.load(Ordering::Relaxed);
        let total_overloaded = self.overloaded.load(Ordering::Relaxed);
        let total_timed_out = self.timed_out.load(Ordering::Relaxed);
        let total_rejected = total_overloaded + total_timed_out;
        let total = total_acquired + total_rejected;
        let pressure_ratio = if total == 0 {
            0.0
        } else {
            total_rejected as f64 / total as f64
        };

        LimiterMetrics {
            strategy,
            total_acquired,
            total_overloaded,
            total_timed_out,
            total_refills: self.refills.load(Ordering::Relaxed),
            available,
            capacity,
            consecutive_rejections: self.consecutive_rejections.load(Ordering::Relaxed),
            max_wait_time_ns: self.max_wait_time_ns.load(Ordering::Relaxed),
            pressure_ratio,
        }
    }
}

/// Snapshot of a limiter's counters and capacity.
///
/// For a token bucket `available` is the floored token count; for a
/// concurrency gate it is the number of free permits.
///
/// ## Example Usage
///
/// ```rust
/// use throttle::{Policy, RateLimiter};
///
/// let limiter = RateLimiter::new(Policy::token_bucket(2, 1.0)).unwrap();
/// let _ = limiter.try_acquire();
/// let _ = limiter.try_acquire();
/// let _ = limiter.try_acquire();
///
/// let metrics = limiter.metrics();
/// assert_eq!(metrics.total_acquired, 2);
/// assert_eq!(metrics.total_overloaded, 1);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterMetrics {
    /// Algorithm that produced these numbers.
    pub strategy: Strategy,

    /// Units admitted (tokens consumed or permits granted).
    pub total_acquired: u64,

    /// Requests rejected because capacity was exhausted.
    pub total_overloaded: u64,

    /// Blocking requests rejected because their deadline passed.
    pub total_timed_out: u64,

    /// Refill steps that credited at least one token. Always zero for the
    /// concurrency strategy.
    pub total_refills: u64,

    /// Capacity available right now.
    pub available: u64,

    /// Configured capacity.
    pub capacity: u64,

    /// Rejections since the last successful acquisition.
    pub consecutive_rejections: u32,

    /// Longest time a blocking acquire spent waiting, in nanoseconds.
    pub max_wait_time_ns: u64,

    /// Rejected requests over all requests (0.0 to 1.0).
    pub pressure_ratio: f64,
}

impl LimiterMetrics {
    /// Total rejections of either kind.
    #[inline]
    pub fn total_rejected(&self) -> u64 {
        self.total_overloaded + self.total_timed_out
    }

    /// Admitted requests plus rejected requests.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_acquired + self.total_rejected()
    }

    /// Fraction of requests admitted. `1.0` before any traffic.
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.total_acquired as f64 / total as f64
        }
    }

    /// Fraction of requests rejected.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Share of the capacity currently in use (0.0 idle, 1.0 exhausted).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.available as f64 / self.capacity as f64)
        }
    }

    /// Remaining capacity as a percentage.
    #[inline]
    pub fn availability_percentage(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.available as f64 / self.capacity as f64) * 100.0
        }
    }

    /// Immediate pressure: most requests fail, or nothing is available.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.success_rate() < 0.5 || self.available == 0
    }

    /// Sustained pressure: a long rejection streak or a high rejection ratio.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.consecutive_rejections > SUSTAINED_REJECTION_STREAK
            || self.pressure_ratio > SUSTAINED_PRESSURE_RATIO
    }

    /// Longest wait in milliseconds.
    #[inline]
    pub fn max_wait_time_ms(&self) -> f64 {
        self.max_wait_time_ns as f64 / 1_000_000.0
    }

    /// Three-level health assessment.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Multi-line report suitable for logs.
    pub fn summary(&self) -> String {
        format!(
            "Limiter Metrics ({}):\n\
             ├─ Performance:\n\
             │  ├─ Success Rate: {:.2}%\n\
             │  ├─ Rejection Rate: {:.2}%\n\
             │  └─ Max Wait Time: {:.3}ms\n\
             ├─ Capacity:\n\
             │  ├─ Available: {}/{}\n\
             │  └─ Utilization: {:.2}%\n\
             ├─ Counters:\n\
             │  ├─ Total Acquired: {}\n\
             │  ├─ Total Overloaded: {}\n\
             │  ├─ Total Timed Out: {}\n\
             │  ├─ Total Refills: {}\n\
             │  └─ Consecutive Rejections: {}\n\
             └─ Health: {:?}",
            self.strategy,
            self.success_rate() * 100.0,
            self.rejection_rate() * 100.0,
            self.max_wait_time_ms(),
            self.available,
            self.capacity,
            self.utilization() * 100.0,
            self.total_acquired,
            self.total_overloaded,
            self.total_timed_out,
            self.total_refills,
            self.consecutive_rejections,
            self.health_status(),
        )
    }
}

impl fmt::Display for LimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Health of a limiter derived from its metrics.
///
/// ```text
///     Healthy ──────► Normal operation, plenty of capacity
///        │
///     Degraded ─────► Some pressure, monitor closely
///        │
///     Critical ─────► Severe pressure, immediate action needed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,

    /// Under immediate pressure but recoverable.
    Degraded,

    /// Under sustained pressure.
    Critical,
}

impl HealthStatus {
    /// `true` for anything but `Healthy`.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for this status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider increasing capacity",
            Self::Critical => "Immediate action required: scale up or reduce load",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("Healthy"),
            Self::Degraded => f.write_str("Degraded"),
            Self::Critical => f.write_str("Critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LimiterMetrics {
        LimiterMetrics {
            strategy: Strategy::TokenBucket,
            total_acquired: 80,
            total_overloaded: 15,
            total_timed_out: 5,
            total_refills: 10,
            available: 25,
            capacity: 100,
            consecutive_rejections: 2,
            max_wait_time_ns: 1_500_000,
            pressure_ratio: 0.2,
        }
    }

    #[test]
    fn test_metrics_calculations() {
        let metrics = sample();
        assert_eq!(metrics.total_rejected(), 20);
        assert_eq!(metrics.total_requests(), 100);
        assert_eq!(metrics.success_rate(), 0.8);
        assert_eq!(metrics.utilization(), 0.75);
        assert_eq!(metrics.availability_percentage(), 25.0);
        assert_eq!(metrics.max_wait_time_ms(), 1.5);
        assert_eq!(metrics.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_health_levels() {
        let degraded = LimiterMetrics {
            available: 0,
            ..sample()
        };
        assert_eq!(degraded.health_status(), HealthStatus::Degraded);

        let critical = LimiterMetrics {
            consecutive_rejections: 15,
            ..sample()
        };
        assert_eq!(critical.health_status(), HealthStatus::Critical);
        assert!(critical.health_status().is_unhealthy());
        assert!(critical
            .health_status()
            .suggested_action()
            .contains("Immediate"));
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = Counters::default().snapshot(Strategy::Concurrency, 0, 0);
        assert_eq!(metrics.success_rate(), 1.0);
        assert_eq!(metrics.pressure_ratio, 0.0);
        assert_eq!(metrics.utilization(), 0.0);
        assert_eq!(metrics.availability_percentage(), 0.0);
    }

    #[test]
    fn test_counters_track_reasons_separately() {
        let counters = Counters::default();
        counters.on_acquisition(3);
        counters.on_rejection(RejectReason::Overload);
        counters.on_rejection(RejectReason::TimedOut);
        counters.on_rejection(RejectReason::TimedOut);
        counters.record_wait(500);
        counters.record_wait(200);

        let metrics = counters.snapshot(Strategy::Concurrency, 1, 4);
        assert_eq!(metrics.total_acquired, 3);
        assert_eq!(metrics.total_overloaded, 1);
        assert_eq!(metrics.total_timed_out, 2);
        assert_eq!(metrics.consecutive_rejections, 3);
        assert_eq!(metrics.max_wait_time_ns, 500);
        assert_eq!(metrics.pressure_ratio, 0.5);

        counters.on_acquisition(1);
        assert_eq!(
            counters.snapshot(Strategy::Concurrency, 1, 4).consecutive_rejections,
            0
        );

        counters.reset();
        let metrics = counters.snapshot(Strategy::Concurrency, 1, 4);
        assert_eq!(metrics.total_requests(), 0);
        assert_eq!(metrics.max_wait_time_ns, 0);
    }

    #[test]
    fn test_summary_and_display() {
        let metrics = sample();
        let summary = metrics.summary();
        assert!(summary.contains("token-bucket"));
        assert!(summary.contains("Total Timed Out: 5"));
        assert_eq!(format!("{}", metrics), summary);
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
    }
}
