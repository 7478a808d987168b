//! Core engine for the Vesta execution kernel.
//!
//! This crate provides:
//! - The line-delimited JSON protocol and its framing
//! - The request loop that dispatches protocol methods
//! - Snippet execution with output capture against a persistent context
//! - An embedded Python-flavoured scripting language

pub mod config;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod kernel;
pub mod script;

pub use config::{KernelConfig, RestartPolicy};
pub use error::{Error, Result};
pub use execute::{AbortHandle, ExecutionContext, ExecutionEngine, ScriptRuntime};
pub use kernel::Kernel;
pub use script::{
    DEFAULT_MAX_CALL_DEPTH, ExecutionFailure, Interpreter, MAX_CALL_DEPTH_LIMIT, Namespace,
};
