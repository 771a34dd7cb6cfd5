//! Keyed single-flight memoization.
//!
//! Each key owns one pending-computation slot. The first caller for a key runs
//! the computation; concurrent callers for the same key wait on that slot and
//! receive a clone of its result. Completed results are kept according to the
//! cache's [`CachePolicy`].

use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::trace;

/// Retention policy for memoized results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Keep every result for the lifetime of the cache.
    #[default]
    Unbounded,
    /// Keep at most this many completed keys, evicting the oldest completed
    /// first. In-flight entries are never evicted.
    Bounded(NonZeroUsize),
}

impl CachePolicy {
    /// `None` or zero means unbounded.
    pub fn from_capacity(capacity: Option<usize>) -> Self {
        capacity
            .and_then(NonZeroUsize::new)
            .map_or(CachePolicy::Unbounded, CachePolicy::Bounded)
    }
}

/// Single-flight memo table.
pub struct SingleFlight<K, V> {
    slots: DashMap<K, Arc<OnceCell<V>>>,
    completion_order: Mutex<VecDeque<K>>,
    policy: CachePolicy,
    computations: AtomicU64,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            slots: DashMap::new(),
            completion_order: Mutex::new(VecDeque::new()),
            policy,
            computations: AtomicU64::new(0),
        }
    }

    /// Return the memoized value for `key`, running `compute` at most once
    /// across all concurrent callers.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let slot = self.slot(&key);
        let mut computed = false;
        let value = slot
            .get_or_init(|| {
                computed = true;
                self.computations.fetch_add(1, Ordering::Relaxed);
                compute()
            })
            .await
            .clone();

        // Only completed entries are eligible for eviction.
        if computed {
            self.record_completion(key);
        }
        value
    }

    /// Completed value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Drop the entry for `key` so the next caller recomputes it.
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
        self.lock_order().retain(|k| k != key);
    }

    pub fn clear(&self) {
        self.slots.clear();
        self.lock_order().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of computations started so far.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Fetch or create the slot for `key`. Check-and-insert happens under the
    /// map's shard lock, so two callers can never create two slots.
    fn slot(&self, key: &K) -> Arc<OnceCell<V>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }

        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }

    fn record_completion(&self, key: K) {
        let CachePolicy::Bounded(capacity) = self.policy else {
            return;
        };

        let evicted: Vec<K> = {
            let mut order = self.lock_order();
            order.push_back(key);
            let excess = order.len().saturating_sub(capacity.get());
            order.drain(..excess).collect()
        };

        for key in evicted {
            trace!("Evicting memoized entry");
            self.slots.remove_if(&key, |_, slot| slot.initialized());
        }
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, VecDeque<K>> {
        self.completion_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(CachePolicy::Unbounded)
    }
}
