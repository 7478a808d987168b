//! Wire protocol between the frontend and the kernel.
//!
//! Line-delimited JSON over stdin/stdout: one request object per input line,
//! one response object per output line.
//!
//! ```text
//! → {"id": "1", "method": "execute", "params": {"code": "print(1)"}}
//! ← {"id":"1","result":{"text/plain":"1\n"}}
//! → {"id": "2", "method": "frobnicate"}
//! ← {"id":"2","error":{"code":"unknown_method","message":"frobnicate"}}
//! ```

use std::io::{BufRead, Write};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// A decoded request line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Request {
    /// Correlation id, echoed on the response. Strings are the norm; other
    /// JSON scalars are echoed unchanged.
    #[serde(default)]
    pub id: Option<Json>,
    /// Method name. `null` counts as absent; other non-strings are kept as
    /// their JSON text so they reach dispatch as unknown methods.
    #[serde(default, deserialize_with = "method_name")]
    pub method: String,
    #[serde(default)]
    pub params: Json,
}

impl Request {
    /// The id to echo back. `null` and `""` count as absent.
    pub fn reply_id(&self) -> Option<Json> {
        match &self.id {
            None | Some(Json::Null) => None,
            Some(Json::String(s)) if s.is_empty() => None,
            Some(id) => Some(id.clone()),
        }
    }

    /// `params.code` as snippet text.
    ///
    /// Missing or `null` is the empty snippet; non-string values are taken
    /// as their JSON text.
    pub fn code(&self) -> String {
        match self.params.get("code") {
            None | Some(Json::Null) => String::new(),
            Some(Json::String(code)) => code.clone(),
            Some(other) => other.to_string(),
        }
    }
}

fn method_name<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Json::deserialize(deserializer)? {
        Json::Null => String::new(),
        Json::String(name) => name,
        other => other.to_string(),
    })
}

/// Methods the kernel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Execute,
    Interrupt,
    Restart,
    Ping,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "execute" => Some(Method::Execute),
            "interrupt" => Some(Method::Interrupt),
            "restart" => Some(Method::Restart),
            "ping" => Some(Method::Ping),
            _ => None,
        }
    }
}

/// Decode one input line into a request.
///
/// Fails with [`Error::Parse`] carrying the decoder's diagnostic when the
/// line is not UTF-8, not JSON, or not a JSON object.
pub fn decode_request(line: &[u8]) -> Result<Request> {
    let text = std::str::from_utf8(line).map_err(|e| Error::Parse(e.to_string()))?;
    let value: Json = serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::Parse(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Error codes sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The line could not be decoded as a request.
    ParseError,
    /// The method is not one the kernel knows.
    UnknownMethod,
    /// The snippet failed to compile or raised.
    ExecutionError,
}

/// Output of a successful `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayData {
    #[serde(rename = "text/plain")]
    pub text_plain: String,
}

/// Value of a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Display(DisplayData),
    /// `{"ok": true}`
    Ack { ok: bool },
}

impl Reply {
    pub fn ack() -> Self {
        Reply::Ack { ok: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Result(Reply),
    Error(ErrorPayload),
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Json>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn result(id: Option<Json>, reply: Reply) -> Self {
        Self {
            id,
            body: ResponseBody::Result(reply),
        }
    }

    pub fn error(id: Option<Json>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            body: ResponseBody::Error(ErrorPayload {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Read one line (without its terminator) into `buf`.
///
/// Returns `false` at end of input. Bytes are not checked for UTF-8 here so
/// that a bad line becomes a `parse_error` instead of ending the loop.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    buf.clear();
    let read = reader
        .read_until(b'\n', buf)
        .map_err(|e| Error::Ipc(format!("Failed to read request line: {}", e)))?;
    if read == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(true)
}

/// Write a response as one JSON line and flush it.
pub fn write_message<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let mut line = serde_json::to_vec(response)
        .map_err(|e| Error::Serialization(format!("Failed to encode response: {}", e)))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .map_err(|e| Error::Ipc(format!("Failed to write response: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush response stream: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    fn encode(response: &Response) -> Json {
        let mut buf = Vec::new();
        write_message(&mut buf, response).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn test_decode_defaults() {
        let request = decode_request(br#"{"method": "ping"}"#).unwrap();
        assert_eq!(request.method, "ping");
        assert_eq!(request.reply_id(), None);
        assert_eq!(request.code(), "");

        let request = decode_request(b"{}").unwrap();
        assert_eq!(request.method, "");
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        for line in [&b"not json"[..], &b"[1, 2]"[..], &b"42"[..], &b"\xff\xfe"[..]] {
            match decode_request(line) {
                Err(Error::Parse(message)) => assert!(!message.is_empty()),
                other => panic!("expected parse error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_non_string_method() {
        let request = decode_request(br#"{"id": "1", "method": null}"#).unwrap();
        assert_eq!(request.method, "");
        assert_eq!(request.reply_id(), Some(json!("1")));

        let request = decode_request(br#"{"id": "2", "method": 5}"#).unwrap();
        assert_eq!(request.method, "5");
        assert_eq!(Method::from_name(&request.method), None);

        let request = decode_request(br#"{"method": ["ping"]}"#).unwrap();
        assert_eq!(request.method, r#"["ping"]"#);
    }

    #[test]
    fn test_reply_id_normalisation() {
        let id = |line: &[u8]| decode_request(line).unwrap().reply_id();
        assert_eq!(id(br#"{"id": "a"}"#), Some(json!("a")));
        assert_eq!(id(br#"{"id": 7}"#), Some(json!(7)));
        assert_eq!(id(br#"{"id": ""}"#), None);
        assert_eq!(id(br#"{"id": null}"#), None);
    }

    #[test]
    fn test_code_coercion() {
        let code = |line: &[u8]| decode_request(line).unwrap().code();
        assert_eq!(code(br#"{"params": {"code": "x = 1"}}"#), "x = 1");
        assert_eq!(code(br#"{"params": {"code": null}}"#), "");
        assert_eq!(code(br#"{"params": null}"#), "");
        assert_eq!(code(br#"{"params": {"code": 42}}"#), "42");
    }

    #[test]
    fn test_response_encoding() {
        let display = Response::result(
            Some(json!("1")),
            Reply::Display(DisplayData {
                text_plain: "hi\n".to_string(),
            }),
        );
        assert_eq!(
            encode(&display),
            json!({"id": "1", "result": {"text/plain": "hi\n"}})
        );

        assert_eq!(
            encode(&Response::result(None, Reply::ack())),
            json!({"result": {"ok": true}})
        );

        let error = Response::error(Some(json!("9")), ErrorCode::UnknownMethod, "frobnicate");
        assert_eq!(
            encode(&error),
            json!({"id": "9", "error": {"code": "unknown_method", "message": "frobnicate"}})
        );
    }

    #[test]
    fn test_read_line_strips_terminators() {
        let mut reader = Cursor::new(b"first\r\nsecond\nlast".to_vec());
        let mut buf = Vec::new();
        assert!(read_line(&mut reader, &mut buf).unwrap());
        assert_eq!(buf, b"first");
        assert!(read_line(&mut reader, &mut buf).unwrap());
        assert_eq!(buf, b"second");
        assert!(read_line(&mut reader, &mut buf).unwrap());
        assert_eq!(buf, b"last");
        assert!(!read_line(&mut reader, &mut buf).unwrap());
    }
}
