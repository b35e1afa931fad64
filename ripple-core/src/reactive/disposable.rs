//! Disposable resources.
//!
//! Anything a computation hands to
//! [`ComputationBuilder::use_disposable`](super::ComputationBuilder::use_disposable)
//! is disposed when that computation re-runs or is itself disposed.

use parking_lot::Mutex;

/// A resource with an explicit, idempotent release operation.
pub trait Disposable: Send + Sync {
    /// Release the resource. Calling this more than once has no further effect.
    fn dispose(&self);
}

/// A one-shot cleanup closure.
pub struct DisposeFn {
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DisposeFn {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }

    /// Whether the cleanup already ran.
    pub fn is_disposed(&self) -> bool {
        self.cleanup.lock().is_none()
    }
}

impl Disposable for DisposeFn {
    fn dispose(&self) {
        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl std::fmt::Debug for DisposeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeFn")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<D: Disposable + ?Sized> Disposable for std::sync::Arc<D> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispose_fn_runs_once() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let cleanup = DisposeFn::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!cleanup.is_disposed());
        cleanup.dispose();
        cleanup.dispose();
        assert!(cleanup.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
