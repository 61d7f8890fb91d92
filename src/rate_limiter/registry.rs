//! # Keyed Limiter Registry
//!
//! One independent limiter per key: per client, per tenant, per endpoint.
//! Limiters are created on first use from a template policy, or registered
//! up front with a policy of their own.
//!
//! ```text
//!     "tenant-a" ──┐
//!     "tenant-b" ──┼──► LimiterRegistry ──► DashMap<K, RateLimiter>
//!     "tenant-c" ──┘          │                 ┌────────────────┐
//!                             │                 │ a → bucket 100 │
//!                             │                 │ b → bucket 100 │
//!                             ▼                 │ c → gate   8   │
//!                     cap: max_entries          └────────────────┘
//! ```
//!
//! The number of keys is bounded. Once `max_entries` limiters exist, an
//! admission call for a new key is rejected with
//! [`RejectReason::Overload`](super::RejectReason::Overload) until
//! [`cleanup`](LimiterRegistry::cleanup) or
//! [`remove`](LimiterRegistry::remove) frees a slot.

use super::{
    config::Policy,
    core::RateLimiter,
    decision::Decision,
    error::ConfigError,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default maximum number of keys tracked at once.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Share of `max_entries` above which the registry counts as near capacity.
const NEAR_CAPACITY_RATIO: f64 = 0.8;

/// Per-key limiters created on demand.
///
/// # Example
///
/// ```rust
/// use throttle::{LimiterRegistry, Policy};
///
/// let registry = LimiterRegistry::new(Policy::token_bucket(2, 1.0)).unwrap();
///
/// assert!(registry.try_acquire(&"alice").is_allowed());
/// assert!(registry.try_acquire(&"alice").is_allowed());
/// assert!(registry.try_acquire(&"alice").is_rejected());
///
/// // every key has its own bucket
/// assert!(registry.try_acquire(&"bob").is_allowed());
/// assert_eq!(registry.len(), 2);
/// ```
pub struct LimiterRegistry<K> {
    limiters: DashMap<K, RateLimiter, ahash::RandomState>,
    active_count: AtomicUsize,
    template: Policy,
    max_entries: usize,
    total_created: AtomicU64,
    total_removed: AtomicU64,
}

impl<K> LimiterRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Creates a registry that builds limiters from `template`, holding at
    /// most [`DEFAULT_MAX_ENTRIES`] keys.
    ///
    /// # Errors
    ///
    /// The template's [`ConfigError`], if it does not validate.
    pub fn new(template: Policy) -> Result<Self, ConfigError> {
        Self::with_max_entries(template, DEFAULT_MAX_ENTRIES)
    }

    /// Creates a registry holding at most `max_entries` keys.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroMaxEntries`], or the template's validation error.
    pub fn with_max_entries(template: Policy, max_entries: usize) -> Result<Self, ConfigError> {
        if max_entries == 0 {
            return Err(ConfigError::ZeroMaxEntries);
        }
        template.validate()?;

        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(4, 64);
        let initial_capacity = (max_entries / num_shards).clamp(16, 1024);

        Ok(Self {
            limiters: DashMap::with_capacity_and_hasher_and_shard_amount(
                initial_capacity,
                ahash::RandomState::new(),
                num_shards,
            ),
            active_count: AtomicUsize::new(0),
            template,
            max_entries,
            total_created: AtomicU64::new(0),
            total_removed: AtomicU64::new(0),
        })
    }

    /// The policy new keys receive.
    pub fn template(&self) -> &Policy {
        &self.template
    }

    /// Maximum number of keys.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the limiter for `key`, creating it from the template if it
    /// does not exist yet.
    ///
    /// Returns `None` when the key is new and the registry is full.
    pub fn limiter(&self, key: &K) -> Option<RateLimiter> {
        if let Some(limiter) = self.limiters.get(key) {
            return Some(limiter.clone());
        }

        if self.active_count.load(Ordering::Acquire) >= self.max_entries {
            warn!(?key, max_entries = self.max_entries, "Limiter registry full, rejecting new key");
            return None;
        }

        match self.limiters.entry(key.clone()) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let prev = self.active_count.fetch_add(1, Ordering::AcqRel);
                if prev >= self.max_entries {
                    self.active_count.fetch_sub(1, Ordering::AcqRel);
                    warn!(?key, max_entries = self.max_entries, "Limiter registry full, rejecting new key");
                    return None;
                }

                let limiter = match RateLimiter::new(self.template.clone()) {
                    Ok(limiter) => limiter,
                    Err(err) => {
                        // the template was validated at construction
                        self.active_count.fetch_sub(1, Ordering::AcqRel);
                        warn!(%err, "Template policy no longer valid");
                        return None;
                    }
                };
                vacant.insert(limiter.clone());

                self.total_created.fetch_add(1, Ordering::Relaxed);
                debug!(?key, total = prev + 1, "Created limiter for key");

                Some(limiter)
            }
        }
    }

    /// Installs a limiter with its own `policy` for `key`, replacing any
    /// existing one. Explicit registrations are not subject to
    /// `max_entries`.
    ///
    /// # Errors
    ///
    /// The policy's [`ConfigError`]; the registry is left unchanged.
    pub fn register(&self, key: K, policy: Policy) -> Result<RateLimiter, ConfigError> {
        let limiter = RateLimiter::new(policy)?;

        match self.limiters.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(limiter.clone());
            }
            Entry::Vacant(vacant) => {
                self.active_count.fetch_add(1, Ordering::AcqRel);
                vacant.insert(limiter.clone());
                self.total_created.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(limiter)
    }

    /// Admits one unit of work for `key` without blocking.
    pub fn try_acquire(&self, key: &K) -> Decision {
        match self.limiter(key) {
            Some(limiter) => limiter.try_acquire(),
            None => Decision::overload(),
        }
    }

    /// Admits one unit of work for `key`, waiting up to `timeout`.
    ///
    /// The wait happens outside the map, so other keys are never blocked
    /// by it.
    pub fn acquire(&self, key: &K, timeout: Duration) -> Decision {
        match self.limiter(key) {
            Some(limiter) => limiter.acquire(timeout),
            None => Decision::overload(),
        }
    }

    /// Removes the limiter for `key`. Outstanding handles and permits stay
    /// valid; the key starts fresh on next use.
    pub fn remove(&self, key: &K) -> Option<RateLimiter> {
        let (_, limiter) = self.limiters.remove(key)?;
        self.active_count.fetch_sub(1, Ordering::AcqRel);
        self.total_removed.fetch_add(1, Ordering::Relaxed);
        Some(limiter)
    }

    /// Number of keys currently tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// `true` if no key is tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the tracked keys.
    pub fn keys(&self) -> Vec<K> {
        self.limiters.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes limiters idle for longer than `idle`.
    ///
    /// A concurrency limiter is only removed when no permit is outstanding
    /// and nobody is waiting. Returns the number of limiters removed.
    pub fn cleanup(&self, idle: Duration) -> usize {
        let mut removed = 0;

        self.limiters.retain(|key, limiter| {
            if limiter.is_idle(idle) {
                debug!(?key, "Removing idle limiter");
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.active_count.fetch_sub(removed, Ordering::AcqRel);
            self.total_removed.fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, remaining = self.len(), "Limiter registry cleanup");
        }

        removed
    }

    /// Removes every limiter.
    ///
    /// Keys created while the clear is in progress may survive it; the
    /// count only drops by the entries actually removed.
    pub fn clear(&self) {
        let mut removed = 0usize;
        self.limiters.retain(|_, _| {
            removed += 1;
            false
        });

        self.active_count.fetch_sub(removed, Ordering::AcqRel);
        self.total_removed.fetch_add(removed as u64, Ordering::Relaxed);
        info!(removed, "Cleared limiter registry");
    }

    /// Occupancy and lifetime counters.
    pub fn stats(&self) -> RegistryStats {
        let active = self.len();
        RegistryStats {
            active,
            max_entries: self.max_entries,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            capacity_used: active as f64 / self.max_entries as f64,
        }
    }
}

impl<K> fmt::Debug for LimiterRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("active", &self.active_count.load(Ordering::Acquire))
            .field("max_entries", &self.max_entries)
            .field("template", &self.template)
            .finish()
    }
}

/// Occupancy statistics for a [`LimiterRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    /// Keys currently tracked.
    pub active: usize,

    /// Maximum number of keys.
    pub max_entries: usize,

    /// Limiters created since startup.
    pub total_created: u64,

    /// Limiters removed since startup, by cleanup, `remove` or `clear`.
    pub total_removed: u64,

    /// `active / max_entries`, from 0.0 to 1.0.
    pub capacity_used: f64,
}

impl RegistryStats {
    /// `true` above 80% occupancy.
    pub fn is_near_capacity(&self) -> bool {
        self.capacity_used > NEAR_CAPACITY_RATIO
    }

    /// Multi-line report.
    pub fn summary(&self) -> String {
        format!(
            "Limiter Registry Stats:\n\
             ├─ Capacity:\n\
             │  ├─ Active Keys: {}/{}\n\
             │  ├─ Capacity Used: {:.2}%\n\
             │  └─ Free Slots: {}\n\
             └─ Lifetime:\n\
                ├─ Created: {}\n\
                └─ Removed: {}",
            self.active,
            self.max_entries,
            self.capacity_used * 100.0,
            self.max_entries.saturating_sub(self.active),
            self.total_created,
            self.total_removed,
        )
    }
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RejectReason, Strategy};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_keys_are_isolated() {
        let registry = LimiterRegistry::new(Policy::token_bucket(3, 1.0)).unwrap();

        for _ in 0..3 {
            assert!(registry.try_acquire(&"a").is_allowed());
            assert!(registry.try_acquire(&"b").is_allowed());
        }
        assert!(registry.try_acquire(&"a").is_rejected());
        assert!(registry.try_acquire(&"b").is_rejected());
        assert!(registry.try_acquire(&"c").is_allowed());

        assert_eq!(registry.len(), 3);
        let mut keys = registry.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cap_rejects_new_keys_only() {
        let registry = LimiterRegistry::with_max_entries(Policy::token_bucket(10, 1.0), 2).unwrap();

        assert!(registry.try_acquire(&1).is_allowed());
        assert!(registry.try_acquire(&2).is_allowed());
        assert_eq!(
            registry.try_acquire(&3).reject_reason(),
            Some(RejectReason::Overload)
        );
        assert!(registry.limiter(&3).is_none());

        // existing keys keep working
        assert!(registry.try_acquire(&1).is_allowed());

        registry.remove(&1).unwrap();
        assert!(registry.try_acquire(&3).is_allowed());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_construction() {
        assert_eq!(
            LimiterRegistry::<u32>::with_max_entries(Policy::default(), 0).unwrap_err(),
            ConfigError::ZeroMaxEntries
        );
        assert_eq!(
            LimiterRegistry::<u32>::new(Policy::concurrency(0)).unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }

    #[test]
    fn test_register_overrides_template() {
        let registry = LimiterRegistry::new(Policy::token_bucket(100, 10.0)).unwrap();
        let db = registry.register("db", Policy::concurrency(1)).unwrap();
        assert_eq!(db.strategy(), Strategy::Concurrency);

        let permit = registry.try_acquire(&"db").into_permit();
        assert!(permit.is_some());
        assert!(registry.try_acquire(&"db").is_rejected());

        assert!(registry.register("bad", Policy::token_bucket(0, 1.0)).is_err());
        assert_eq!(registry.len(), 1);

        // replacing keeps the count
        registry.register("db", Policy::concurrency(2)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cleanup_removes_idle_limiters() {
        let registry = LimiterRegistry::new(Policy::concurrency(1)).unwrap();

        let held = registry.try_acquire(&"busy").into_permit().unwrap();
        assert!(registry.try_acquire(&"idle").is_allowed());
        thread::sleep(Duration::from_millis(20));

        let removed = registry.cleanup(Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert_eq!(registry.keys(), vec!["busy"]);

        drop(held);
        assert_eq!(registry.cleanup(Duration::from_millis(10)), 1);
        assert!(registry.is_empty());

        let stats = registry.stats();
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.total_removed, 2);
    }

    #[test]
    fn test_stats_and_summary() {
        let registry = LimiterRegistry::with_max_entries(Policy::default(), 10).unwrap();
        for i in 0..9 {
            let _ = registry.try_acquire(&i);
        }

        let stats = registry.stats();
        assert_eq!(stats.active, 9);
        assert!(stats.is_near_capacity());
        assert!(stats.summary().contains("Active Keys: 9/10"));
        assert!(stats.to_string().contains("Free Slots: 1"));

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.stats().total_removed, 9);
    }

    #[test]
    fn test_concurrent_creation_respects_cap() {
        let registry = Arc::new(
            LimiterRegistry::with_max_entries(Policy::token_bucket(1, 1.0), 16).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let _ = registry.try_acquire(&(t * 10 + i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 16);
        assert_eq!(registry.keys().len(), 16);
    }

    #[test]
    fn test_clear_during_creation_keeps_count_consistent() {
        let registry = Arc::new(
            LimiterRegistry::with_max_entries(Policy::token_bucket(1, 1.0), 100_000).unwrap(),
        );

        let creators: Vec<_> = (0..4u64)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..2_000u64 {
                        let _ = registry.try_acquire(&(t * 10_000 + i));
                        if i % 100 == 0 {
                            let _ = registry.register(t * 10_000 + i, Policy::concurrency(1));
                        }
                    }
                })
            })
            .collect();

        let clearer = {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    registry.clear();
                    thread::yield_now();
                }
            })
        };

        for handle in creators {
            handle.join().unwrap();
        }
        clearer.join().unwrap();

        let keys = registry.keys();
        assert_eq!(registry.len(), keys.len());

        let stats = registry.stats();
        assert_eq!(stats.total_created - stats.total_removed, keys.len() as u64);

        for key in &keys {
            assert!(registry.remove(key).is_some());
        }
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_same_key_created_once() {
        let registry = Arc::new(LimiterRegistry::new(Policy::token_bucket(50, 1.0)).unwrap());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| registry.try_acquire(&"shared").is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(registry.stats().total_created, 1);
    }
}
