//! Subscription Registry
//!
//! Every event source owns one registry mapping a [`SubscriptionId`] to the
//! callback registered under it. Entries are kept in an `IndexMap` so that
//! both insertion and removal by id are O(1); removal uses `swap_remove`,
//! which means no ordering among subscribers is promised.
//!
//! An entry may carry a liveness predicate. Before its callback is invoked
//! the predicate is checked, and entries whose owner has gone away are
//! dropped on the spot instead of being called.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with the published value.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Predicate telling the registry whether a subscriber still exists.
pub type Liveness = Arc<dyn Fn() -> bool + Send + Sync>;

struct Entry<T> {
    callback: Callback<T>,
    alive: Option<Liveness>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            alive: self.alive.clone(),
        }
    }
}

impl<T> Entry<T> {
    fn is_alive(&self) -> bool {
        self.alive.as_ref().map_or(true, |alive| alive())
    }
}

/// Per-source table of subscribers.
pub struct SubscriptionRegistry<T> {
    entries: IndexMap<SubscriptionId, Entry<T>>,
}

impl<T> SubscriptionRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register a callback.
    pub fn add(&mut self, callback: Callback<T>) -> SubscriptionId {
        self.insert(callback, None)
    }

    /// Register a callback that is skipped and pruned once `alive` returns false.
    pub fn add_with_liveness(&mut self, callback: Callback<T>, alive: Liveness) -> SubscriptionId {
        self.insert(callback, Some(alive))
    }

    fn insert(&mut self, callback: Callback<T>, alive: Option<Liveness>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.entries.insert(id, Entry { callback, alive });
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.swap_remove(&id).is_some()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered subscriptions, dead ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove entries whose liveness check fails. Returns how many were pruned.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_alive());
        before - self.entries.len()
    }

    /// Invoke every live callback with `value`.
    ///
    /// Callbacks run while `self` is borrowed, so they cannot touch this
    /// registry. Shared sources use [`snapshot`](Self::snapshot) and
    /// [`dispatch`] instead.
    pub fn publish(&mut self, value: &T) {
        self.prune();
        for entry in self.entries.values() {
            (entry.callback)(value);
        }
    }

    /// Copy out the current entries so they can be invoked without holding a lock.
    pub(crate) fn snapshot(&self) -> Vec<(SubscriptionId, Callback<T>, Option<Liveness>)> {
        self.entries
            .iter()
            .map(|(id, entry)| {
                let entry = entry.clone();
                (*id, entry.callback, entry.alive)
            })
            .collect()
    }
}

impl<T> Default for SubscriptionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a snapshot taken with [`SubscriptionRegistry::snapshot`].
///
/// `still_registered` is consulted before each call so that a subscriber
/// removed by an earlier callback in the same cycle is not invoked. Dead
/// entries are reported through `on_dead` for removal.
pub(crate) fn dispatch<T>(
    snapshot: Vec<(SubscriptionId, Callback<T>, Option<Liveness>)>,
    value: &T,
    mut still_registered: impl FnMut(SubscriptionId) -> bool,
    mut on_dead: impl FnMut(SubscriptionId),
) {
    for (id, callback, alive) in snapshot {
        if !still_registered(id) {
            continue;
        }
        if let Some(alive) = alive {
            if !alive() {
                on_dead(id);
                continue;
            }
        }
        callback(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32};

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        let id3 = SubscriptionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn add_publish_remove() {
        let mut registry = SubscriptionRegistry::<i32>::new();
        let sum = Arc::new(AtomicI32::new(0));
        let sum_clone = sum.clone();

        let id = registry.add(Arc::new(move |v: &i32| {
            sum_clone.fetch_add(*v, Ordering::SeqCst);
        }));
        assert!(registry.contains(id));

        registry.publish(&5);
        assert_eq!(sum.load(Ordering::SeqCst), 5);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.publish(&5);
        assert_eq!(sum.load(Ordering::SeqCst), 5);
        assert!(registry.is_empty());
    }

    #[test]
    fn removal_keeps_other_subscribers() {
        let mut registry = SubscriptionRegistry::<()>::new();
        let calls = Arc::new(AtomicI32::new(0));

        let ids: Vec<_> = (0..4)
            .map(|_| {
                let calls = calls.clone();
                registry.add(Arc::new(move |_: &()| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }))
            })
            .collect();

        registry.remove(ids[1]);
        registry.publish(&());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn dead_entries_are_pruned_not_called() {
        let mut registry = SubscriptionRegistry::<()>::new();
        let alive = Arc::new(AtomicBool::new(true));
        let called = Arc::new(AtomicI32::new(0));

        let alive_clone = alive.clone();
        let called_clone = called.clone();
        registry.add_with_liveness(
            Arc::new(move |_: &()| {
                called_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move || alive_clone.load(Ordering::SeqCst)),
        );

        registry.publish(&());
        assert_eq!(called.load(Ordering::SeqCst), 1);

        alive.store(false, Ordering::SeqCst);
        registry.publish(&());
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn dispatch_skips_entries_removed_mid_cycle() {
        let mut registry = SubscriptionRegistry::<()>::new();
        let calls = Arc::new(AtomicI32::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            registry.add(Arc::new(move |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let snapshot = registry.snapshot();
        let removed = snapshot[2].0;
        dispatch(snapshot, &(), |id| id != removed, |_| {});
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
