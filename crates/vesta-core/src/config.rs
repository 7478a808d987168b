//! Kernel configuration.

use crate::script::DEFAULT_MAX_CALL_DEPTH;

/// What the `restart` method does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Acknowledge and keep every binding.
    #[default]
    Acknowledge,
    /// Acknowledge and replace the context with a fresh one.
    ResetContext,
}

/// Settings for a [`crate::Kernel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub restart_policy: RestartPolicy,
    /// Nesting of script function calls above which `RecursionError` is raised.
    pub max_call_depth: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
