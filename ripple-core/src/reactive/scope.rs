//! Context values passed down a computation subtree.
//!
//! Each computation owns a [`ContextScope`] whose parent is the scope of the
//! computation that created it. Values are keyed by type; lookups walk up
//! the chain. A scope is cleared whenever its computation re-runs, since the
//! body provides its values again.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

type ContextValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub(crate) struct ContextScope {
    values: DashMap<TypeId, ContextValue>,
    parent: Option<Arc<ContextScope>>,
}

impl ContextScope {
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn child_of(parent: Option<Arc<ContextScope>>) -> Arc<Self> {
        Arc::new(Self {
            values: DashMap::new(),
            parent,
        })
    }

    pub(crate) fn provide<T: Send + Sync + 'static>(&self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub(crate) fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let found = current
                .values
                .get(&TypeId::of::<T>())
                .map(|entry| Arc::clone(entry.value()));
            if let Some(value) = found {
                return value.downcast::<T>().ok();
            }
            scope = current.parent.as_deref();
        }
        None
    }

    pub(crate) fn clear(&self) {
        self.values.clear();
    }
}
