//! Failures raised by running a snippet.

use thiserror::Error;

/// A failure raised while compiling or running a snippet.
///
/// Carries the exception kind (`NameError`, `SyntaxError`, ...) and its
/// detail. `Display` renders the single-line `Kind: detail` form that the
/// kernel sends back as the `execution_error` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.summary())]
pub struct ExecutionFailure {
    kind: String,
    message: String,
}

impl ExecutionFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A compile-time failure at a source position (1-indexed).
    pub fn syntax(message: impl AsRef<str>, line: usize, column: usize) -> Self {
        Self::new(
            "SyntaxError",
            format!("{} (line {}, column {})", message.as_ref(), line, column),
        )
    }

    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{}' is not defined", name))
    }

    /// A function-local name read before the function assigned it.
    pub fn unbound_local(name: &str) -> Self {
        Self::new(
            "UnboundLocalError",
            format!(
                "cannot access local variable '{}' where it is not associated with a value",
                name
            ),
        )
    }

    pub fn recursion(message: impl Into<String>) -> Self {
        Self::new("RecursionError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    /// `KeyError` whose detail is the repr of the missing key.
    pub fn key_error(key_repr: impl Into<String>) -> Self {
        Self::new("KeyError", key_repr)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new("AttributeError", message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new("OverflowError", message)
    }

    pub fn interrupted() -> Self {
        Self::new("KeyboardInterrupt", "execution interrupted")
    }

    /// Exception kind, e.g. `ValueError`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Detail text without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// One-line `Kind: detail` description.
    ///
    /// Multi-line details are folded onto one line; a failure with no detail
    /// renders as the bare kind.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            return self.kind.clone();
        }
        let detail = self
            .message
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}: {}", self.kind, detail)
    }

    /// Whether an `except` clause naming `base` catches this failure.
    pub fn is_instance_of(&self, base: &str) -> bool {
        is_subclass(&self.kind, base)
    }
}

/// Builtin exception names, in the order they are exposed to scripts.
pub const EXCEPTION_KINDS: &[&str] = &[
    "BaseException",
    "Exception",
    "ArithmeticError",
    "LookupError",
    "ValueError",
    "TypeError",
    "NameError",
    "UnboundLocalError",
    "KeyError",
    "IndexError",
    "ZeroDivisionError",
    "AttributeError",
    "RuntimeError",
    "AssertionError",
    "OverflowError",
    "RecursionError",
    "ImportError",
    "KeyboardInterrupt",
];

/// Exception hierarchy check.
pub fn is_subclass(kind: &str, base: &str) -> bool {
    if kind == base || base == "BaseException" {
        return true;
    }
    match base {
        "Exception" => kind != "KeyboardInterrupt",
        "ArithmeticError" => matches!(kind, "ZeroDivisionError" | "OverflowError"),
        "LookupError" => matches!(kind, "KeyError" | "IndexError"),
        "RuntimeError" => kind == "RecursionError",
        "NameError" => kind == "UnboundLocalError",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_formats() {
        assert_eq!(
            ExecutionFailure::name_error("x").to_string(),
            "NameError: name 'x' is not defined"
        );
        assert_eq!(
            ExecutionFailure::new("AssertionError", "").to_string(),
            "AssertionError"
        );
        assert_eq!(
            ExecutionFailure::new("ValueError", "first\n  second\n").summary(),
            "ValueError: first second"
        );
    }

    #[test]
    fn test_syntax_position() {
        let failure = ExecutionFailure::syntax("invalid syntax", 2, 7);
        assert_eq!(failure.kind(), "SyntaxError");
        assert_eq!(failure.message(), "invalid syntax (line 2, column 7)");
    }

    #[test]
    fn test_hierarchy() {
        assert!(is_subclass("KeyError", "LookupError"));
        assert!(is_subclass("ZeroDivisionError", "Exception"));
        assert!(is_subclass("KeyboardInterrupt", "BaseException"));
        assert!(!is_subclass("KeyboardInterrupt", "Exception"));
        assert!(!is_subclass("TypeError", "ValueError"));
        assert!(is_subclass("UnboundLocalError", "NameError"));
        assert!(is_subclass("UnboundLocalError", "Exception"));
    }
}
