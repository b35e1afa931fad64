//! Tracking Context
//!
//! The tracking context records which computation is currently running on
//! this thread. Computations push an entry when their body starts and pop
//! it when the body returns, so nested computations (a child created inside
//! a parent's body) stack naturally.
//!
//! # Implementation
//!
//! We use a thread-local stack of node IDs. The builder consults it to
//! reject use outside its own run and to refuse tracking a computed value
//! whose body is still on the stack, which would be a self-dependency.

use std::cell::RefCell;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct TrackingContext {
    node: NodeId,
}

impl TrackingContext {
    /// Enter a tracking context for `node`.
    pub fn enter(node: NodeId) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(node));
        Self { node }
    }

    /// Check if any computation is running on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost running computation, if any.
    pub fn current() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
    }

    /// Whether `node` is anywhere on this thread's stack.
    pub fn is_running(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().contains(&node))
    }

    /// Number of nested computations currently running.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.node),
                "TrackingContext mismatch: expected {:?}, got {:?}",
                self.node,
                popped
            );
        });
    }
}
