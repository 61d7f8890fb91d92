//! # Admission Decisions
//!
//! Every admission call returns a [`Decision`]. There are no exceptions for
//! control flow: a request is either allowed, or rejected with a reason.
//!
//! ```text
//!     Decision
//!     ├─ Allowed(Some(Permit))   concurrency gate, release by dropping
//!     ├─ Allowed(None)           token bucket, nothing to give back
//!     └─ Rejected(reason)
//!        ├─ Overload             no capacity at the instant of the check
//!        └─ TimedOut             blocking wait hit its deadline
//! ```

use super::gate::Permit;
use std::fmt;

/// Why a request was not admitted.
///
/// Both variants are recoverable. The caller owns any retry or backoff
/// policy; the limiter never retries internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Capacity was exhausted at the instant of a non-blocking check.
    Overload,

    /// A blocking acquire reached its deadline without capacity freeing up.
    TimedOut,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overload => f.write_str("overload"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// The outcome of an admission check.
///
/// An `Allowed` decision from a concurrency limiter owns a [`Permit`]; the
/// slot is held until that permit is dropped or passed to `release`.
/// Discarding the decision (`let _ = limiter.try_acquire()`) therefore
/// releases the slot immediately.
///
/// # Example
///
/// ```rust
/// use throttle::{Policy, RateLimiter, RejectReason};
///
/// let limiter = RateLimiter::new(Policy::concurrency(1)).unwrap();
///
/// let first = limiter.try_acquire();
/// assert!(first.is_allowed());
///
/// let second = limiter.try_acquire();
/// assert_eq!(second.reject_reason(), Some(RejectReason::Overload));
///
/// drop(first);
/// assert!(limiter.try_acquire().is_allowed());
/// ```
#[must_use = "dropping an allowed decision releases its permit immediately"]
#[derive(Debug)]
pub enum Decision {
    /// The request may proceed.
    Allowed(Option<Permit>),

    /// The request must not proceed.
    Rejected(RejectReason),
}

impl Decision {
    #[inline]
    pub(crate) fn overload() -> Self {
        Self::Rejected(RejectReason::Overload)
    }

    #[inline]
    pub(crate) fn timed_out() -> Self {
        Self::Rejected(RejectReason::TimedOut)
    }

    /// `true` if the request was admitted.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// `true` if the request was rejected for any reason.
    #[inline]
    pub fn is_rejected(&self) -> bool {
        !self.is_allowed()
    }

    /// The rejection reason, or `None` when allowed.
    #[inline]
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Allowed(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }

    /// Borrows the permit carried by an allowed concurrency decision.
    pub fn permit(&self) -> Option<&Permit> {
        match self {
            Self::Allowed(permit) => permit.as_ref(),
            Self::Rejected(_) => None,
        }
    }

    /// Takes the permit out of the decision so it can be held for the
    /// duration of the work and released explicitly.
    pub fn into_permit(self) -> Option<Permit> {
        match self {
            Self::Allowed(permit) => permit,
            Self::Rejected(_) => None,
        }
    }

    /// Converts the decision into a `Result`, keeping the permit on success.
    pub fn into_result(self) -> Result<Option<Permit>, RejectReason> {
        match self {
            Self::Allowed(permit) => Ok(permit),
            Self::Rejected(reason) => Err(reason),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed(_) => f.write_str("allowed"),
            Self::Rejected(reason) => write!(f, "rejected ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_without_permit() {
        let decision = Decision::Allowed(None);
        assert!(decision.is_allowed());
        assert!(!decision.is_rejected());
        assert_eq!(decision.reject_reason(), None);
        assert!(decision.permit().is_none());
        assert_eq!(decision.to_string(), "allowed");
        assert!(matches!(decision.into_result(), Ok(None)));
    }

    #[test]
    fn test_rejected_reasons() {
        let overload = Decision::overload();
        assert!(overload.is_rejected());
        assert_eq!(overload.reject_reason(), Some(RejectReason::Overload));
        assert_eq!(overload.to_string(), "rejected (overload)");

        let timed_out = Decision::timed_out();
        assert_eq!(timed_out.reject_reason(), Some(RejectReason::TimedOut));
        assert!(matches!(
            timed_out.into_result(),
            Err(RejectReason::TimedOut)
        ));
    }

    #[test]
    fn test_rejected_has_no_permit() {
        assert!(Decision::overload().into_permit().is_none());
    }
}
