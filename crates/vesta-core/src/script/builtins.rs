//! Builtin functions.

use std::cmp::Ordering;
use std::num::IntErrorKind;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp};
use super::failure::{EXCEPTION_KINDS, ExecutionFailure};
use super::interpreter::Machine;
use super::modules;
use super::ops;
use super::value::{Value, quote_str, range_len};

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// A builtin callable. Module functions (`math.sqrt`, `json.dumps`) are
/// builtins too; they are reachable only through their module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Str,
    Repr,
    Int,
    Float,
    Bool,
    List,
    Tuple,
    Dict,
    Abs,
    Min,
    Max,
    Sum,
    Any,
    All,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Round,
    Isinstance,
    MathSqrt,
    MathFloor,
    MathCeil,
    MathPow,
    MathLog,
    MathSin,
    MathCos,
    MathFabs,
    JsonDumps,
    JsonLoads,
}

/// Builtins bound in every namespace.
const GLOBAL_BUILTINS: &[Builtin] = &[
    Builtin::Print,
    Builtin::Len,
    Builtin::Range,
    Builtin::Str,
    Builtin::Repr,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::List,
    Builtin::Tuple,
    Builtin::Dict,
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Sum,
    Builtin::Any,
    Builtin::All,
    Builtin::Sorted,
    Builtin::Reversed,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Round,
    Builtin::Isinstance,
];

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Repr => "repr",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Round => "round",
            Builtin::Isinstance => "isinstance",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathPow => "pow",
            Builtin::MathLog => "log",
            Builtin::MathSin => "sin",
            Builtin::MathCos => "cos",
            Builtin::MathFabs => "fabs",
            Builtin::JsonDumps => "dumps",
            Builtin::JsonLoads => "loads",
        }
    }

    /// Whether the builtin is a type constructor (`int`, `list`, ...).
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Builtin::Range
                | Builtin::Str
                | Builtin::Int
                | Builtin::Float
                | Builtin::Bool
                | Builtin::List
                | Builtin::Tuple
                | Builtin::Dict
        )
    }
}

/// Resolve a name that is not bound in any scope.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(builtin) = GLOBAL_BUILTINS.iter().find(|b| b.name() == name) {
        return Some(Value::Builtin(*builtin));
    }
    EXCEPTION_KINDS
        .iter()
        .find(|kind| **kind == name)
        .map(|kind| Value::ExceptionType(Rc::from(*kind)))
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

pub(crate) fn take_kwarg(kwargs: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(key, _)| key == name)?;
    Some(kwargs.remove(position).1)
}

pub(crate) fn reject_kwargs(function: &str, kwargs: &[(String, Value)]) -> Result<()> {
    match kwargs.first() {
        Some((key, _)) => Err(ExecutionFailure::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            function, key
        ))),
        None => Ok(()),
    }
}

pub(crate) fn arity(function: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    let given = args.len();
    if given >= min && given <= max {
        return Ok(());
    }
    let (qualifier, count) = if min == max {
        ("exactly", min)
    } else if given < min {
        ("at least", min)
    } else {
        ("at most", max)
    };
    let noun = if count == 1 { "argument" } else { "arguments" };
    Err(ExecutionFailure::type_error(format!(
        "{}() takes {} {} {} ({} given)",
        function, qualifier, count, noun, given
    )))
}

/// An integer argument; floats are rejected the way `range(1.5)` is.
pub(crate) fn index_arg(value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        ExecutionFailure::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn text_kwarg(value: Option<Value>, name: &str, default: &str) -> Result<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ExecutionFailure::type_error(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

pub(crate) fn float_to_int(value: f64) -> Result<i64> {
    if value.is_nan() {
        return Err(ExecutionFailure::value_error(
            "cannot convert float NaN to integer",
        ));
    }
    if value.is_infinite() {
        return Err(ExecutionFailure::overflow(
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = value.trunc();
    if !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&truncated) {
        return Err(ExecutionFailure::overflow("integer overflow"));
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: i64) -> Result<i64> {
    let invalid = || {
        ExecutionFailure::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            quote_str(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(ExecutionFailure::value_error(
            "int() base must be >= 2 and <= 36, or 0",
        ));
    }

    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = unsigned.to_ascii_lowercase();
    let mut radix = if base == 0 { 10 } else { base as u32 };
    let mut digits = unsigned;
    for (prefix, prefix_radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if lower.starts_with(prefix) && (base == 0 || base == i64::from(prefix_radix)) {
            digits = &unsigned[2..];
            radix = prefix_radix;
        }
    }
    if digits.is_empty()
        || digits.starts_with(['_', '+', '-'])
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let signed = if negative {
        format!("-{}", cleaned)
    } else {
        cleaned
    };
    i64::from_str_radix(&signed, radix).map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            ExecutionFailure::overflow("integer overflow")
        }
        _ => invalid(),
    })
}

fn parse_float(text: &str) -> Result<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().map_err(|_| {
        ExecutionFailure::value_error(format!(
            "could not convert string to float: {}",
            quote_str(text)
        ))
    })
}

// ----------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------

pub(crate) fn call(
    machine: &mut Machine<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let name = builtin.name();
    let takes_keywords = matches!(
        builtin,
        Builtin::Print
            | Builtin::Sorted
            | Builtin::Min
            | Builtin::Max
            | Builtin::Dict
            | Builtin::Enumerate
            | Builtin::Sum
            | Builtin::Round
            | Builtin::JsonDumps
    );
    if !takes_keywords {
        reject_kwargs(name, &kwargs)?;
    }

    match builtin {
        Builtin::Print => {
            let sep = text_kwarg(take_kwarg(&mut kwargs, "sep"), "sep", " ")?;
            let end = text_kwarg(take_kwarg(&mut kwargs, "end"), "end", "\n")?;
            take_kwarg(&mut kwargs, "flush");
            reject_kwargs(name, &kwargs)?;
            let mut text = args
                .iter()
                .map(Value::to_str)
                .collect::<Vec<_>>()
                .join(&sep);
            text.push_str(&end);
            machine.write(&text);
            Ok(Value::None)
        }
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count() as i64,
                Value::List(items) => items.borrow().len() as i64,
                Value::Tuple(items) => items.len() as i64,
                Value::Dict(dict) => dict.borrow().len() as i64,
                Value::Range { start, stop, step } => range_len(*start, *stop, *step),
                other => {
                    return Err(ExecutionFailure::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(len))
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let bounds = args.iter().map(index_arg).collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(ExecutionFailure::value_error(
                    "range() arg 3 must not be zero",
                ));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Ok(Value::str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        Builtin::Repr => {
            arity(name, &args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        Builtin::Int => {
            arity(name, &args, 0, 2)?;
            if let [value, base] = args.as_slice() {
                let base = index_arg(base)?;
                return match value {
                    Value::Str(s) => parse_int(s, base).map(Value::Int),
                    _ => Err(ExecutionFailure::type_error(
                        "int() can't convert non-string with explicit base",
                    )),
                };
            }
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Float(f)) => float_to_int(*f).map(Value::Int),
                Some(Value::Str(s)) => parse_int(s, 10).map(Value::Int),
                Some(value) => value.as_int().map(Value::Int).ok_or_else(|| {
                    ExecutionFailure::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        value.type_name()
                    ))
                }),
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(value) => value.as_float().map(Value::Float).ok_or_else(|| {
                    ExecutionFailure::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        value.type_name()
                    ))
                }),
            }
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(value.to_vec()?)),
            }
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
                Some(value) => Ok(Value::tuple(value.to_vec()?)),
            }
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            let mut dict = match args.first() {
                None => Default::default(),
                Some(pairs) => ops::dict_from_pairs(pairs)?,
            };
            for (key, value) in kwargs {
                dict.insert(Value::str(key), value)?;
            }
            Ok(Value::dict(dict))
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                value => match value.as_int() {
                    Some(i) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| ExecutionFailure::overflow("integer overflow")),
                    None => Err(ExecutionFailure::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        Builtin::Min | Builtin::Max => extremum(machine, builtin, args, kwargs),
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).cloned() {
                Some(start) => Some(start),
                None => take_kwarg(&mut kwargs, "start"),
            };
            reject_kwargs(name, &kwargs)?;
            let mut total = start.unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(ExecutionFailure::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in args[0].iter()? {
                total = ops::binary(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Any => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(args[0].iter()?.any(|item| item.truthy())))
        }
        Builtin::All => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(args[0].iter()?.all(|item| item.truthy())))
        }
        Builtin::Sorted => {
            arity(name, &args, 1, 1)?;
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            reject_kwargs(name, &kwargs)?;
            let items = args[0].to_vec()?;
            Ok(Value::list(sort_values(machine, items, key.as_ref(), reverse)?))
        }
        Builtin::Reversed => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                value @ (Value::List(_)
                | Value::Tuple(_)
                | Value::Str(_)
                | Value::Range { .. }
                | Value::Dict(_)) => {
                    let mut items = value.to_vec()?;
                    items.reverse();
                    Ok(Value::list(items))
                }
                other => Err(ExecutionFailure::type_error(format!(
                    "'{}' object is not reversible",
                    other.type_name()
                ))),
            }
        }
        Builtin::Enumerate => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).cloned() {
                Some(start) => Some(start),
                None => take_kwarg(&mut kwargs, "start"),
            };
            reject_kwargs(name, &kwargs)?;
            let start = start.as_ref().map(index_arg).transpose()?.unwrap_or(0);
            let mut pairs = Vec::new();
            for (offset, item) in args[0].iter()?.enumerate() {
                let index = start
                    .checked_add(offset as i64)
                    .ok_or_else(|| ExecutionFailure::overflow("integer overflow"))?;
                pairs.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Ok(Value::list(pairs))
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(Value::to_vec)
                .collect::<Result<Vec<_>>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..len)
                .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
                .collect();
            Ok(Value::list(rows))
        }
        Builtin::Round => {
            arity(name, &args, 1, 2)?;
            let digits = match args.get(1).cloned() {
                Some(digits) => Some(digits),
                None => take_kwarg(&mut kwargs, "ndigits"),
            };
            reject_kwargs(name, &kwargs)?;
            let digits = match digits {
                None | Some(Value::None) => None,
                Some(value) => Some(index_arg(&value)?),
            };
            round(&args[0], digits)
        }
        Builtin::Isinstance => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(instance_of(&args[0], &args[1])?))
        }
        Builtin::MathSqrt
        | Builtin::MathFloor
        | Builtin::MathCeil
        | Builtin::MathPow
        | Builtin::MathLog
        | Builtin::MathSin
        | Builtin::MathCos
        | Builtin::MathFabs => modules::call_math(builtin, &args),
        Builtin::JsonDumps => {
            arity(name, &args, 1, 1)?;
            let indent = match take_kwarg(&mut kwargs, "indent") {
                None | Some(Value::None) => None,
                Some(value) => Some(usize::try_from(index_arg(&value)?).unwrap_or(0)),
            };
            let sort_keys = take_kwarg(&mut kwargs, "sort_keys").is_some_and(|v| v.truthy());
            reject_kwargs(name, &kwargs)?;
            modules::json_dumps(&args[0], indent, sort_keys).map(Value::str)
        }
        Builtin::JsonLoads => {
            arity(name, &args, 1, 1)?;
            modules::json_loads(&args[0])
        }
    }
}

fn extremum(
    machine: &mut Machine<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let name = builtin.name();
    let key = take_kwarg(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
    let default = take_kwarg(&mut kwargs, "default");
    reject_kwargs(name, &kwargs)?;

    let items = match args.len() {
        0 => {
            return Err(ExecutionFailure::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )));
        }
        1 => args[0].to_vec()?,
        _ => args,
    };

    let (op, wanted) = if builtin == Builtin::Max {
        (CmpOp::Gt, Ordering::Greater)
    } else {
        (CmpOp::Lt, Ordering::Less)
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match &key {
            Some(key) => machine.call_value(key, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::order(op, &item_key, best_key)? == Some(wanted),
        };
        if replace {
            best = Some((item_key, item));
        }
    }

    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExecutionFailure::value_error(format!(
            "{}() iterable argument is empty",
            name
        ))),
    }
}

fn round(value: &Value, digits: Option<i64>) -> Result<Value> {
    match (value, digits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(digits)) if digits >= 0 => {
            // Formatting rounds the exact binary value, as Python does.
            if !f.is_finite() || digits > 330 {
                return Ok(Value::Float(*f));
            }
            format!("{:.*}", digits as usize, f)
                .parse()
                .map(Value::Float)
                .map_err(|_| ExecutionFailure::value_error("cannot round float"))
        }
        (Value::Float(f), Some(digits)) => {
            let factor = 10f64.powi((-digits).min(308) as i32);
            let scaled = f / factor;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() * factor))
        }
        (value, digits) => match value.as_int() {
            Some(i) => match digits {
                Some(d) if d < 0 => {
                    let factor = 10f64.powi((-d).min(308) as i32);
                    float_to_int((i as f64 / factor).round_ties_even() * factor).map(Value::Int)
                }
                _ => Ok(Value::Int(i)),
            },
            None => Err(ExecutionFailure::type_error(format!(
                "type {} doesn't define __round__ method",
                value.type_name()
            ))),
        },
    }
}

fn instance_of(value: &Value, class: &Value) -> Result<bool> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if instance_of(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::ExceptionType(kind) => {
            Ok(matches!(value, Value::Exception(failure) if failure.is_instance_of(kind)))
        }
        Value::Builtin(builtin) if builtin.is_type() => Ok(match builtin {
            Builtin::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
            Builtin::Bool => matches!(value, Value::Bool(_)),
            Builtin::Float => matches!(value, Value::Float(_)),
            Builtin::Str => matches!(value, Value::Str(_)),
            Builtin::List => matches!(value, Value::List(_)),
            Builtin::Tuple => matches!(value, Value::Tuple(_)),
            Builtin::Dict => matches!(value, Value::Dict(_)),
            Builtin::Range => matches!(value, Value::Range { .. }),
            _ => false,
        }),
        _ => Err(ExecutionFailure::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

/// Stable sort with an optional key function, shared by `sorted` and `list.sort`.
pub(crate) fn sort_values(
    machine: &mut Machine<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<Vec<Value>> {
    let key = key.filter(|k| !matches!(k, Value::None));
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let sort_key = match key {
            Some(key) => machine.call_value(key, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        keyed.push((sort_key, item));
    }
    let sorted = merge_sort(keyed, reverse)?;
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

fn less(a: &Value, b: &Value) -> Result<bool> {
    Ok(ops::order(CmpOp::Lt, a, b)? == Some(Ordering::Less))
}

/// Merge sort over fallible comparisons; a failing comparison aborts the sort.
fn merge_sort(mut items: Vec<(Value, Value)>, reverse: bool) -> Result<Vec<(Value, Value)>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, reverse)?;
    let right = merge_sort(right, reverse)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                if reverse {
                    less(&l.0, &r.0)?
                } else {
                    less(&r.0, &l.0)?
                }
            }
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        merged.extend(if take_right { right.next() } else { left.next() });
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(matches!(lookup("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(matches!(lookup("ValueError"), Some(Value::ExceptionType(_))));
        assert!(lookup("sqrt").is_none());
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0x1f", 0).unwrap(), 31);
        let err = parse_int("abc", 10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
        assert_eq!(parse_int("99999999999999999999", 10).unwrap_err().kind(), "OverflowError");
    }

    #[test]
    fn test_float_conversions() {
        assert_eq!(parse_float("2.5").unwrap(), 2.5);
        assert!(parse_float("inf").unwrap().is_infinite());
        assert!(parse_float("x").is_err());
        assert_eq!(float_to_int(-3.9).unwrap(), -3);
        assert_eq!(float_to_int(f64::NAN).unwrap_err().kind(), "ValueError");
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(round(&Value::Float(2.5), None).unwrap().as_int(), Some(2));
        assert_eq!(round(&Value::Float(3.5), None).unwrap().as_int(), Some(4));
        assert_eq!(round(&Value::Float(3.14159), Some(2)).unwrap().repr(), "3.14");
        assert_eq!(round(&Value::Float(2.675), Some(2)).unwrap().repr(), "2.67");
        assert_eq!(round(&Value::Float(0.125), Some(2)).unwrap().repr(), "0.12");
        assert_eq!(round(&Value::Float(0.375), Some(2)).unwrap().repr(), "0.38");
        assert_eq!(round(&Value::Float(1250.0), Some(-2)).unwrap().repr(), "1200.0");
        assert_eq!(round(&Value::Int(1234), Some(-2)).unwrap().as_int(), Some(1200));
    }

    #[test]
    fn test_arity_message() {
        let err = arity("len", &[Value::None, Value::None], 1, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: len() takes exactly 1 argument (2 given)"
        );
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let items = vec![
            (Value::Int(2), Value::str("a")),
            (Value::Int(1), Value::str("b")),
            (Value::Int(2), Value::str("c")),
            (Value::Int(1), Value::str("d")),
        ];
        let labels = |sorted: Vec<(Value, Value)>| {
            sorted.into_iter().map(|(_, v)| v.to_str()).collect::<String>()
        };
        assert_eq!(labels(merge_sort(items.clone(), false).unwrap()), "bdac");
        assert_eq!(labels(merge_sort(items, true).unwrap()), "acbd");
    }
}
