//! Execution context and cooperative cancellation.
//!
//! The context owns the namespace that snippets read and write; the abort
//! handle lets another thread (the SIGINT handler) stop a running snippet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::script::Namespace;

/// Handle for cooperative cancellation of a running snippet.
///
/// `AbortHandle` is cheap to clone and safe to share across threads. Any
/// clone can trip the flag and every other clone observes it.
///
/// # Example
///
/// ```
/// use vesta_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let signal_side = handle.clone();
///
/// assert!(!handle.is_aborted());
/// signal_side.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an abort has been requested.
    ///
    /// The interpreter polls this on loop iterations and function calls.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Request that the running snippet stop.
    ///
    /// Only touches an atomic, so it may be called from a signal handler.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Clear the flag before the next execution.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }
}

/// Lifecycle of an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No execution has succeeded yet.
    Fresh,
    /// At least one execution has succeeded.
    Populated,
}

/// The persistent evaluation context shared by all executions.
///
/// Created once at startup and owned by the kernel, which lends it to the
/// engine by `&mut` for each request. Nothing else holds it.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    namespace: Namespace,
    executions: u64,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ContextState {
        if self.executions == 0 {
            ContextState::Fresh
        } else {
            ContextState::Populated
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.namespace
    }

    /// Record a successful execution.
    pub fn record_success(&mut self) {
        self.executions += 1;
    }

    /// Number of successful executions against this context.
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::script::Value;

    #[test]
    fn test_abort_visible_across_clones() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        thread::spawn(move || clone.abort()).join().unwrap();
        assert!(handle.is_aborted());
        handle.reset();
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_context_state_transitions() {
        let mut context = ExecutionContext::new();
        assert_eq!(context.state(), ContextState::Fresh);

        context.namespace_mut().set("x", Value::Int(1));
        assert_eq!(context.state(), ContextState::Fresh);

        context.record_success();
        context.record_success();
        assert_eq!(context.state(), ContextState::Populated);
        assert_eq!(context.executions(), 2);
        assert!(context.namespace().contains("x"));
    }
}
