//! Error types for vesta-core.

use thiserror::Error;

/// Result type for vesta-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vesta-core.
///
/// These are kernel-level failures. A failing snippet is not one of them:
/// it surfaces as [`crate::script::ExecutionFailure`] and becomes an
/// `execution_error` response without ever reaching this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to decode a request line.
    #[error("parse error: {0}")]
    Parse(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IPC communication error with the frontend.
    #[error("IPC error: {0}")]
    Ipc(String),
}

impl Error {
    /// Short hint on how to recover, used by the binary when it exits.
    pub fn with_hint(&self) -> String {
        match self {
            Error::Ipc(_) => {
                format!("{}\n  hint: the frontend closed the kernel's pipes; restart the kernel", self)
            }
            _ => self.to_string(),
        }
    }
}
