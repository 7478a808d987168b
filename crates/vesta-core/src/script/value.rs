//! Runtime values and the namespace they live in.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::failure::ExecutionFailure;

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// Shared, mutable variable scope of a function call.
pub type Scope = Rc<RefCell<FxHashMap<String, Value>>>;

/// A script value.
///
/// Scalars are stored inline; lists and dicts are shared and mutable, so
/// aliasing behaves the way scripts expect (`b = a; b.append(1)` is visible
/// through `a`).
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    /// An exception class such as `ValueError`.
    ExceptionType(Rc<str>),
    /// A raised or constructed exception instance.
    Exception(Rc<ExecutionFailure>),
}

/// A user-defined function or lambda.
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Evaluated default per parameter, aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
    /// Scopes of the enclosing function calls, outermost first.
    pub enclosing: Vec<Scope>,
}

/// A method looked up on a value, waiting to be called.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

/// An imported module.
#[derive(Debug)]
pub struct Module {
    pub name: &'static str,
    pub members: FxHashMap<&'static str, Value>,
}

impl Value {
    pub fn str(text: impl Into<Rc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Name of the value's type as scripts see it.
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(builtin) if builtin.is_type() => "type",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::ExceptionType(_) => "type",
            Value::Exception(failure) => failure.kind(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Text produced by `str()` and `print`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(failure) => failure.message().to_string(),
            _ => self.repr(),
        }
    }

    /// Text produced by `repr()`; containers show their elements this way.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    fn write_repr(&self, out: &mut String, active: &mut Vec<*const ()>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const ();
                if active.contains(&id) {
                    out.push_str("[...]");
                    return;
                }
                active.push(id);
                out.push('[');
                write_items(out, &items.borrow(), active);
                out.push(']');
                active.pop();
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items, active);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const ();
                if active.contains(&id) {
                    out.push_str("{...}");
                    return;
                }
                active.push(id);
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, active);
                    out.push_str(": ");
                    value.write_repr(out, active);
                }
                out.push('}');
                active.pop();
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Function(function) => {
                out.push_str(&format!("<function {}>", function.def.name));
            }
            Value::Builtin(builtin) if builtin.is_type() => {
                out.push_str(&format!("<class '{}'>", builtin.name()));
            }
            Value::Builtin(builtin) => {
                out.push_str(&format!("<built-in function {}>", builtin.name()));
            }
            Value::Method(method) => {
                out.push_str(&format!(
                    "<built-in method {} of {} object>",
                    method.name,
                    method.receiver.type_name()
                ));
            }
            Value::Module(module) => out.push_str(&format!("<module '{}'>", module.name)),
            Value::ExceptionType(kind) => out.push_str(&format!("<class '{}'>", kind)),
            Value::Exception(failure) => {
                out.push_str(failure.kind());
                out.push('(');
                if !failure.message().is_empty() {
                    out.push_str(&quote_str(failure.message()));
                }
                out.push(')');
            }
        }
    }

    /// Value equality (`==`). Numbers compare across `bool`, `int` and `float`.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || sequences_equal(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || sequences_equal(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value.equals(&other)))
            }
            (
                Value::Range { start, stop, step },
                Value::Range {
                    start: s2,
                    stop: e2,
                    step: p2,
                },
            ) => start == s2 && stop == e2 && step == p2,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(_), Some(_)) => numbers_equal(self, other),
                _ => false,
            },
        }
    }

    /// Numeric value as a float, for `bool`, `int` and `float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value of an `int` or `bool`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Iterate over the value, as `for` loops do.
    ///
    /// Lists are snapshotted when iteration starts.
    pub fn iter(&self) -> Result<ValueIter> {
        let items = match self {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(dict) => dict.borrow().keys(),
            Value::Range { start, stop, step } => {
                return Ok(ValueIter::Range {
                    next: *start,
                    stop: *stop,
                    step: *step,
                });
            }
            other => {
                return Err(ExecutionFailure::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    /// Collect the items of an iterable value.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        Ok(self.iter()?.collect())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

fn write_items(out: &mut String, items: &[Value], active: &mut Vec<*const ()>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, active);
    }
}

fn sequences_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_float() == b.as_float(),
    }
}

/// Number of elements in `range(start, stop, step)`.
pub fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// Iterator over the items of an iterable value.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, stop: i64, step: i64 },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { next, stop, step } => {
                let running = if *step > 0 { *next < *stop } else { *next > *stop };
                if !running {
                    return None;
                }
                let current = *next;
                match next.checked_add(*step) {
                    Some(following) => *next = following,
                    None => *next = *stop,
                }
                Some(Value::Int(current))
            }
        }
    }
}

/// Render a float the way scripts print it: shortest round-trip digits,
/// always with a fractional part or exponent.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scientific = format!("{:e}", value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }
    let plain = value.to_string();
    if plain.contains('.') {
        plain
    } else {
        format!("{}.0", plain)
    }
}

/// Quote a string for `repr`, preferring single quotes.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Reject keys that cannot be used in a dict.
pub fn check_hashable(key: &Value) -> Result<()> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(ExecutionFailure::type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

/// Insertion-ordered dictionary.
///
/// Lookup is linear: script dicts are small and keys only need equality,
/// which lets `1`, `1.0` and `True` address the same entry.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.equals(key))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].1.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    /// Insert or overwrite; an existing key keeps its position.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        check_hashable(&key)?;
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    /// `(key, value)` tuples in insertion order.
    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

/// The persistent module-level namespace.
///
/// Owned by the execution context and lent to the interpreter for each run;
/// bindings made by one snippet stay visible to the next.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: FxHashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_display() {
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr_of_containers() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0)]);
        assert_eq!(list.repr(), "[1, 'a', 2.0]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").to_str(), "a\nb");

        let mut dict = Dict::new();
        dict.insert(Value::str("k"), Value::None).unwrap();
        assert_eq!(Value::dict(dict).repr(), "{'k': None}");
    }

    #[test]
    fn test_self_referencing_list_repr() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
    }

    #[test]
    fn test_numeric_equality() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(1).equals(&Value::str("1")));
        assert!(Value::tuple(vec![Value::Int(1)]).equals(&Value::tuple(vec![Value::Float(1.0)])));
    }

    #[test]
    fn test_dict_keys_unify_numbers() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::str("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("float")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Bool(true)).unwrap().to_str(), "float");

        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
    }

    #[test]
    fn test_range_iteration() {
        let values: Vec<i64> = Value::Range {
            start: 10,
            stop: 0,
            step: -3,
        }
        .iter()
        .unwrap()
        .filter_map(|v| v.as_int())
        .collect();
        assert_eq!(values, vec![10, 7, 4, 1]);
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(5, 0, 1), 0);
    }

    #[test]
    fn test_namespace_names_sorted() {
        let mut namespace = Namespace::new();
        namespace.set("b", Value::Int(1));
        namespace.set("a", Value::Int(2));
        assert_eq!(namespace.names(), vec!["a", "b"]);
        assert!(namespace.remove("a").is_some());
        assert!(!namespace.contains("a"));
    }
}
