//! Snippet execution for the kernel.
//!
//! # Architecture
//!
//! ```text
//! Kernel (owns ExecutionContext)
//!     │
//!     └── ExecutionEngine::execute(code, &mut context)
//!             │
//!             ├── OutputChannel::redirect(CaptureBuffer)  ── Redirect guard
//!             │
//!             └── ScriptRuntime::run(code, namespace, output)
//!                     │
//!                     └── Interpreter (polls AbortHandle)
//! ```
//!
//! # Module Structure
//!
//! - `context` - persistent execution context and the abort handle
//! - `capture` - output channel, capture buffer and redirect guard
//! - `engine` - `ExecutionEngine` and the `ScriptRuntime` capability

mod capture;
mod context;
mod engine;

pub use capture::{CaptureBuffer, OutputChannel, Redirect, StderrSink, TextSink};
pub use context::{AbortHandle, ContextState, ExecutionContext};
pub use engine::{EMPTY_OUTPUT_SENTINEL, ExecutionEngine, ScriptRuntime};
