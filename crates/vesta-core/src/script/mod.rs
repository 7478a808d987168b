//! Embedded scripting language.
//!
//! A small Python-flavoured language: indentation-structured statements,
//! functions with closures, exceptions, list/dict/str methods and the `math`
//! and `json` modules.
//!
//! # Pipeline
//!
//! ```text
//! source ──▶ lexer ──▶ parser ──▶ Vec<Stmt> ──▶ interpreter ──▶ Namespace
//!                                                    │
//!                                                    └── print ──▶ OutputChannel
//! ```
//!
//! # Module Structure
//!
//! - `lexer` - tokens, including INDENT/DEDENT
//! - `parser` - recursive-descent parser producing the `ast`
//! - `interpreter` - statement and expression evaluation
//! - `value` - runtime values and the persistent `Namespace`
//! - `ops` - operators, comparisons and subscripts
//! - `builtins`, `methods`, `modules` - the standard library
//! - `format` - format specs, `str.format` and `%` formatting
//! - `failure` - `ExecutionFailure` and the exception hierarchy

mod ast;
mod builtins;
mod failure;
mod format;
mod interpreter;
mod lexer;
mod methods;
mod modules;
mod ops;
mod parser;
mod value;

pub use failure::{EXCEPTION_KINDS, ExecutionFailure};
pub use interpreter::{DEFAULT_MAX_CALL_DEPTH, Interpreter, MAX_CALL_DEPTH_LIMIT};
pub use value::{Namespace, Value};
