//! The request/response loop.
//!
//! Reads one request per line, runs it to completion, writes exactly one
//! response, then reads the next. Per-request failures become error
//! responses; only a failure of the streams themselves ends the loop early.

use std::io::{BufRead, Write};

use tracing::{debug, info, warn};

use crate::config::{KernelConfig, RestartPolicy};
use crate::error::{Error, Result};
use crate::execute::{AbortHandle, ExecutionContext, ExecutionEngine, ScriptRuntime};
use crate::ipc::{ErrorCode, Method, Reply, Request, Response, decode_request, read_line, write_message};
use crate::script::Interpreter;

/// A kernel session: the engine plus the context it executes against.
pub struct Kernel<R = Interpreter> {
    engine: ExecutionEngine<R>,
    context: ExecutionContext,
    config: KernelConfig,
}

impl Kernel<Interpreter> {
    pub fn new(config: KernelConfig) -> Self {
        let engine = ExecutionEngine::new(config.max_call_depth);
        Self::with_engine(engine, config)
    }
}

impl<R: ScriptRuntime> Kernel<R> {
    pub fn with_engine(engine: ExecutionEngine<R>, config: KernelConfig) -> Self {
        Self {
            engine,
            context: ExecutionContext::new(),
            config,
        }
    }

    /// Handle that interrupts the snippet currently running.
    pub fn abort_handle(&self) -> AbortHandle {
        self.engine.abort_handle()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Serve requests from `input` until it is exhausted.
    ///
    /// Returns the number of responses written. Fails only when reading
    /// `input` or writing `output` fails.
    pub fn serve<I: BufRead, O: Write>(&mut self, mut input: I, mut output: O) -> Result<u64> {
        info!("Kernel started");
        let mut line = Vec::new();
        let mut responses = 0;
        while read_line(&mut input, &mut line)? {
            if let Some(response) = self.handle_line(&line) {
                write_message(&mut output, &response)?;
                responses += 1;
            }
        }
        info!(responses, "Input closed, kernel stopping");
        Ok(responses)
    }

    /// Produce the response for one input line, or `None` for a blank line.
    pub fn handle_line(&mut self, line: &[u8]) -> Option<Response> {
        if line.trim_ascii().is_empty() {
            return None;
        }
        match decode_request(line) {
            Ok(request) => Some(self.dispatch(request)),
            Err(err) => {
                let message = match err {
                    Error::Parse(detail) => detail,
                    other => other.to_string(),
                };
                warn!(%message, "Failed to decode request");
                Some(Response::error(None, ErrorCode::ParseError, message))
            }
        }
    }

    /// Run a decoded request.
    pub fn dispatch(&mut self, request: Request) -> Response {
        let id = request.reply_id();
        debug!(id = ?id, method = %request.method, "Request received");

        let Some(method) = Method::from_name(&request.method) else {
            return Response::error(id, ErrorCode::UnknownMethod, request.method);
        };
        match method {
            Method::Execute => match self.engine.execute(&request.code(), &mut self.context) {
                Ok(display) => Response::result(id, Reply::Display(display)),
                Err(failure) => {
                    debug!(%failure, "Execution failed");
                    Response::error(id, ErrorCode::ExecutionError, failure.to_string())
                }
            },
            Method::Restart => {
                if self.config.restart_policy == RestartPolicy::ResetContext {
                    info!(
                        executions = self.context.executions(),
                        "Restart requested, discarding context"
                    );
                    self.context = ExecutionContext::new();
                }
                Response::result(id, Reply::ack())
            }
            Method::Interrupt | Method::Ping => Response::result(id, Reply::ack()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::execute::ContextState;
    use crate::ipc::DisplayData;
    use crate::ipc::protocol::{ErrorPayload, ResponseBody};

    fn kernel() -> Kernel {
        Kernel::new(KernelConfig::default())
    }

    fn text(response: Response) -> String {
        match response.body {
            ResponseBody::Result(Reply::Display(DisplayData { text_plain })) => text_plain,
            other => panic!("expected display result, got {:?}", other),
        }
    }

    fn error(response: Response) -> ErrorPayload {
        match response.body {
            ResponseBody::Error(payload) => payload,
            other => panic!("expected error, got {:?}", other),
        }
    }

    fn execute(kernel: &mut Kernel, code: &str) -> Response {
        let line = json!({"id": "t", "method": "execute", "params": {"code": code}}).to_string();
        kernel.handle_line(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut kernel = kernel();
        assert!(kernel.handle_line(b"").is_none());
        assert!(kernel.handle_line(b"   \t ").is_none());
    }

    #[test]
    fn test_parse_error_has_no_id() {
        let response = kernel().handle_line(b"{not json").unwrap();
        assert_eq!(response.id, None);
        let payload = error(response);
        assert_eq!(payload.code, ErrorCode::ParseError);
        assert!(!payload.message.is_empty());
    }

    #[test]
    fn test_unknown_method_echoes_name() {
        let response = kernel()
            .handle_line(br#"{"id": "7", "method": "frobnicate"}"#)
            .unwrap();
        assert_eq!(response.id, Some(json!("7")));
        let payload = error(response);
        assert_eq!(payload.code, ErrorCode::UnknownMethod);
        assert_eq!(payload.message, "frobnicate");
    }

    #[test]
    fn test_non_string_method_is_unknown() {
        let mut kernel = kernel();
        let response = kernel
            .handle_line(br#"{"id": "1", "method": null}"#)
            .unwrap();
        assert_eq!(response.id, Some(json!("1")));
        let payload = error(response);
        assert_eq!(payload.code, ErrorCode::UnknownMethod);
        assert_eq!(payload.message, "");

        let response = kernel.handle_line(br#"{"id": "2", "method": 5}"#).unwrap();
        assert_eq!(response.id, Some(json!("2")));
        let payload = error(response);
        assert_eq!(payload.code, ErrorCode::UnknownMethod);
        assert_eq!(payload.message, "5");
    }

    #[test]
    fn test_execute_round_trip() {
        let mut kernel = kernel();
        assert_eq!(kernel.context().state(), ContextState::Fresh);
        assert_eq!(text(execute(&mut kernel, "x = 41")), "ok");
        assert_eq!(text(execute(&mut kernel, "print(x + 1)")), "42\n");
        assert_eq!(kernel.context().state(), ContextState::Populated);
    }

    #[test]
    fn test_execution_error_keeps_bindings() {
        let mut kernel = kernel();
        execute(&mut kernel, "x = 5");
        let payload = error(execute(&mut kernel, "def ("));
        assert_eq!(payload.code, ErrorCode::ExecutionError);
        assert!(payload.message.starts_with("SyntaxError"));
        assert_eq!(text(execute(&mut kernel, "print(x)")), "5\n");
    }

    #[test]
    fn test_runaway_recursion_on_caller_stack() {
        let mut kernel = kernel();
        let payload = error(execute(&mut kernel, "def f(n):\n    return f(n + 1)\nf(0)"));
        assert_eq!(payload.message, "RecursionError: maximum recursion depth exceeded");

        let mut kernel = Kernel::new(KernelConfig {
            max_call_depth: usize::MAX,
            ..KernelConfig::default()
        });
        let payload = error(execute(&mut kernel, "def f(n):\n    return f(n + 1)\nf(0)"));
        assert_eq!(payload.message, "RecursionError: maximum recursion depth exceeded");
        assert_eq!(text(execute(&mut kernel, "print('alive')")), "alive\n");
    }

    #[test]
    fn test_acknowledgements() {
        let mut kernel = kernel();
        execute(&mut kernel, "x = 1");
        for method in ["ping", "interrupt", "restart"] {
            let line = json!({"id": method, "method": method, "params": {"junk": 1}}).to_string();
            let response = kernel.handle_line(line.as_bytes()).unwrap();
            assert_eq!(response.body, ResponseBody::Result(Reply::ack()));
        }
        assert_eq!(text(execute(&mut kernel, "print(x)")), "1\n");
    }

    #[test]
    fn test_restart_with_reset_policy() {
        let mut kernel = Kernel::new(KernelConfig {
            restart_policy: RestartPolicy::ResetContext,
            ..KernelConfig::default()
        });
        execute(&mut kernel, "x = 1");
        kernel.handle_line(br#"{"method": "restart"}"#).unwrap();
        assert_eq!(kernel.context().state(), ContextState::Fresh);
        let payload = error(execute(&mut kernel, "print(x)"));
        assert_eq!(payload.message, "NameError: name 'x' is not defined");
    }

    #[test]
    fn test_serve_writes_one_line_per_request() {
        let input = b"{\"id\":\"1\",\"method\":\"ping\"}\n\n{\"id\":\"2\",\"method\":\"nope\"}\n";
        let mut output = Vec::new();
        let written = kernel().serve(&input[..], &mut output).unwrap();
        assert_eq!(written, 2);

        let lines: Vec<serde_json::Value> = output
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"id": "1", "result": {"ok": true}}));
        assert_eq!(
            lines[1],
            json!({"id": "2", "error": {"code": "unknown_method", "message": "nope"}})
        );
    }
}
