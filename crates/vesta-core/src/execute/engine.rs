//! Runs snippets against the execution context and captures their output.

use tracing::debug;

use super::capture::{CaptureBuffer, OutputChannel};
use super::context::{AbortHandle, ExecutionContext};
use crate::ipc::DisplayData;
use crate::script::{ExecutionFailure, Interpreter, Namespace};

/// Text reported for an execution that printed nothing.
pub const EMPTY_OUTPUT_SENTINEL: &str = "ok";

/// Capability to run a snippet of source text.
///
/// The engine only needs this; the concrete language lives behind it.
pub trait ScriptRuntime {
    /// Run `source` with `namespace` as its module scope, writing printed
    /// text to `output`.
    fn run(
        &mut self,
        source: &str,
        namespace: &mut Namespace,
        output: &mut OutputChannel,
    ) -> Result<(), ExecutionFailure>;
}

/// Executes snippets one at a time.
///
/// Owns the output channel and the runtime. The context is lent in for each
/// call and never kept.
pub struct ExecutionEngine<R = Interpreter> {
    runtime: R,
    output: OutputChannel,
    abort: AbortHandle,
}

impl ExecutionEngine<Interpreter> {
    /// Engine backed by the built-in interpreter.
    pub fn new(max_call_depth: usize) -> Self {
        let abort = AbortHandle::new();
        let runtime = Interpreter::new(abort.clone()).with_max_call_depth(max_call_depth);
        Self::with_runtime(runtime, abort)
    }
}

impl<R: ScriptRuntime> ExecutionEngine<R> {
    /// Engine backed by `runtime`, which must observe `abort`.
    pub fn with_runtime(runtime: R, abort: AbortHandle) -> Self {
        Self {
            runtime,
            output: OutputChannel::default(),
            abort,
        }
    }

    /// Handle that interrupts the running snippet when tripped.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run `code` against `context` and return what it printed.
    ///
    /// Output is captured only for the duration of the run. Nothing printed
    /// yields [`EMPTY_OUTPUT_SENTINEL`]. A failure is returned as-is after
    /// the output channel has been restored.
    pub fn execute(
        &mut self,
        code: &str,
        context: &mut ExecutionContext,
    ) -> Result<DisplayData, ExecutionFailure> {
        self.abort.reset();
        let buffer = CaptureBuffer::new();
        {
            let mut redirect = self.output.redirect(buffer.clone());
            self.runtime
                .run(code, context.namespace_mut(), &mut redirect)?;
        }
        context.record_success();

        let text = buffer.text();
        debug!(output_len = text.len(), "Execution succeeded");
        let text_plain = if text.is_empty() {
            EMPTY_OUTPUT_SENTINEL.to_string()
        } else {
            text
        };
        Ok(DisplayData { text_plain })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{DEFAULT_MAX_CALL_DEPTH, Value};

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(DEFAULT_MAX_CALL_DEPTH)
    }

    #[test]
    fn test_output_and_sentinel() {
        let mut engine = engine();
        let mut context = ExecutionContext::new();
        let display = engine.execute("x = 41", &mut context).unwrap();
        assert_eq!(display.text_plain, "ok");
        let display = engine.execute("print(x + 1)", &mut context).unwrap();
        assert_eq!(display.text_plain, "42\n");
    }

    #[test]
    fn test_sentinel_collision() {
        let mut engine = engine();
        let mut context = ExecutionContext::new();
        let display = engine
            .execute("print('ok', end='')", &mut context)
            .unwrap();
        assert_eq!(display.text_plain, EMPTY_OUTPUT_SENTINEL);
    }

    #[test]
    fn test_failure_restores_channel_and_keeps_context() {
        let mut engine = engine();
        let mut context = ExecutionContext::new();
        engine.execute("y = 1", &mut context).unwrap();

        let err = engine
            .execute("print('partial')\nundefined_name", &mut context)
            .unwrap_err();
        assert_eq!(err.to_string(), "NameError: name 'undefined_name' is not defined");
        assert!(!engine.output.is_redirected());
        assert_eq!(context.executions(), 1);

        // Output from the failed run does not leak into the next one.
        let display = engine.execute("print(y)", &mut context).unwrap();
        assert_eq!(display.text_plain, "1\n");
    }

    #[test]
    fn test_abort_flag_is_cleared_per_execution() {
        let mut engine = engine();
        let mut context = ExecutionContext::new();
        engine.abort_handle().abort();
        let display = engine
            .execute("for i in range(3):\n    pass", &mut context)
            .unwrap();
        assert_eq!(display.text_plain, "ok");
    }

    struct Scripted;

    impl ScriptRuntime for Scripted {
        fn run(
            &mut self,
            source: &str,
            namespace: &mut Namespace,
            output: &mut OutputChannel,
        ) -> Result<(), ExecutionFailure> {
            namespace.set("last", Value::str(source));
            output.write("ran ");
            output.write(source);
            Ok(())
        }
    }

    #[test]
    fn test_custom_runtime() {
        let mut engine = ExecutionEngine::with_runtime(Scripted, AbortHandle::new());
        let mut context = ExecutionContext::new();
        let display = engine.execute("anything", &mut context).unwrap();
        assert_eq!(display.text_plain, "ran anything");
        assert!(context.namespace().contains("last"));
    }
}
