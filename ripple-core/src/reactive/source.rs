//! Event Source
//!
//! A multicast notification primitive. Cloned handles share one
//! [`SubscriptionRegistry`]; [`EventSource::emit`] runs every callback
//! synchronously on the calling thread.
//!
//! # Reentrancy
//!
//! The registry lock is held only while copying out the subscriber list.
//! Callbacks therefore run without the lock and may subscribe, unsubscribe
//! or emit again. A subscriber removed during an emit is not called later in
//! that emit; a subscriber added during an emit waits for the next one.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::subscriber::{dispatch, Liveness, SubscriptionId, SubscriptionRegistry};

type SharedRegistry<T> = Arc<Mutex<SubscriptionRegistry<T>>>;

/// Type-erased removal hook so [`Subscription`] is not generic.
trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId);
}

impl<T: 'static> Unsubscribe for Mutex<SubscriptionRegistry<T>> {
    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().remove(id);
    }
}

/// Handle to a registered callback.
///
/// Dropping the handle unsubscribes. Call [`detach`](Self::detach) to keep
/// the callback registered for as long as the source lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    fn new<T: 'static>(id: SubscriptionId, registry: &SharedRegistry<T>) -> Self {
        let weak: Weak<Mutex<SubscriptionRegistry<T>>> = Arc::downgrade(registry);
        let registry: Weak<dyn Unsubscribe> = weak;
        Self {
            id,
            registry: Some(registry),
        }
    }

    /// A subscription that is not attached to anything.
    pub fn inert() -> Self {
        Self {
            id: SubscriptionId::new(),
            registry: None,
        }
    }

    /// The subscription's identity within its source.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback from its source. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unsubscribe(self.id);
        }
    }

    /// Give up the handle without unsubscribing.
    pub fn detach(mut self) -> SubscriptionId {
        self.registry = None;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.registry.is_some())
            .finish()
    }
}

/// Multicast publisher of `T` values.
pub struct EventSource<T> {
    registry: SharedRegistry<T>,
}

impl<T: 'static> EventSource<T> {
    /// Create a source with no subscribers.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
        }
    }

    /// Register a callback invoked on every emit.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.lock().add(Arc::new(callback));
        Subscription::new(id, &self.registry)
    }

    /// Register a callback that is dropped once `alive` reports false.
    pub fn subscribe_while<A, F>(&self, alive: A, callback: F) -> Subscription
    where
        A: Fn() -> bool + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let alive: Liveness = Arc::new(alive);
        let id = self
            .registry
            .lock()
            .add_with_liveness(Arc::new(callback), alive);
        Subscription::new(id, &self.registry)
    }

    /// Notify every subscriber of `value`.
    pub fn emit(&self, value: &T) {
        let snapshot = self.registry.lock().snapshot();
        if snapshot.is_empty() {
            return;
        }
        dispatch(
            snapshot,
            value,
            |id| self.registry.lock().contains(id),
            |id| {
                self.registry.lock().remove(id);
            },
        );
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Drop every subscriber. Outstanding [`Subscription`] handles become inert.
    pub fn clear(&self) {
        self.registry.lock().clear();
    }
}

impl<T: 'static> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> std::fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
