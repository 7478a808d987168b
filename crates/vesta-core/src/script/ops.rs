//! Operators, comparisons and item access.

use std::cmp::Ordering;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::failure::ExecutionFailure;
use super::format;
use super::value::{Dict, Value, check_hashable, range_len};

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// Longest sequence a repetition may build.
const MAX_REPEAT_LEN: usize = 1 << 32;

fn overflow() -> ExecutionFailure {
    ExecutionFailure::overflow("integer overflow")
}

fn unsupported(op: &str, left: &Value, right: &Value) -> ExecutionFailure {
    ExecutionFailure::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int(_) | Value::Float(_))
}

/// Check a float result computed from finite operands.
fn finite(result: f64, left: f64, right: f64) -> Result<Value> {
    if result.is_infinite() && left.is_finite() && right.is_finite() {
        return Err(ExecutionFailure::overflow("numerical result out of range"));
    }
    Ok(Value::Float(result))
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, value) if value.as_int().is_some() => value
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, value) if value.as_int().is_some() => {
            Ok(Value::Int(value.as_int().unwrap_or_default()))
        }
        (op, value) => Err(ExecutionFailure::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            value.type_name()
        ))),
    }
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if is_number(left) && is_number(right) {
        return arithmetic(op, left, right);
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(joined))
        }
        (BinOp::Add, Value::Str(_), other) => Err(ExecutionFailure::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::List(_), other) => Err(ExecutionFailure::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, sequence, count) | (BinOp::Mul, count, sequence)
            if count.as_int().is_some()
                && matches!(sequence, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            repeat(sequence, count.as_int().unwrap_or_default())
        }
        (BinOp::Mod, Value::Str(template), args) => {
            Ok(Value::str(format::percent_format(template, args)?))
        }
        (op, left, right) => Err(unsupported(op.symbol(), left, right)),
    }
}

fn repeat(sequence: &Value, count: i64) -> Result<Value> {
    let count = usize::try_from(count).unwrap_or(0);
    let len = match sequence {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => 0,
    };
    if len.checked_mul(count).is_none_or(|total| total > MAX_REPEAT_LEN) {
        return Err(ExecutionFailure::overflow("repeated sequence is too long"));
    }
    Ok(match sequence {
        Value::Str(s) => Value::str(s.repeat(count)),
        Value::List(items) => Value::list(repeated(&items.borrow(), count)),
        Value::Tuple(items) => Value::tuple(repeated(items, count)),
        other => other.clone(),
    })
}

fn repeated(items: &[Value], count: usize) -> Vec<Value> {
    items
        .iter()
        .cloned()
        .cycle()
        .take(items.len() * count)
        .collect()
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_arithmetic(op, a, b);
    }
    let (a, b) = (
        left.as_float().unwrap_or_default(),
        right.as_float().unwrap_or_default(),
    );
    match op {
        BinOp::Add => finite(a + b, a, b),
        BinOp::Sub => finite(a - b, a, b),
        BinOp::Mul => finite(a * b, a, b),
        BinOp::Div => {
            if b == 0.0 {
                return Err(ExecutionFailure::zero_division("division by zero"));
            }
            finite(a / b, a, b)
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExecutionFailure::zero_division("float floor division by zero"));
            }
            finite((a / b).floor(), a, b)
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExecutionFailure::zero_division("float modulo"));
            }
            Ok(Value::Float(float_mod(a, b)))
        }
        BinOp::Pow => float_pow(a, b),
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ExecutionFailure::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ExecutionFailure::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            a.checked_div(b).map(|q| {
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ExecutionFailure::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let r = a.wrapping_rem(b);
            Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ExecutionFailure::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn float_pow(a: f64, b: f64) -> Result<Value> {
    if a == 0.0 && b < 0.0 {
        return Err(ExecutionFailure::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
        return Err(ExecutionFailure::value_error(
            "negative number cannot be raised to a fractional power",
        ));
    }
    finite(a.powf(b), a, b)
}

/// `left op= right`. Lists extend in place so aliases observe the change.
pub fn inplace(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, left) {
        let extra = right.to_vec()?;
        items.borrow_mut().extend(extra);
        return Ok(left.clone());
    }
    binary(op, left, right)
}

/// Evaluate one link of a comparison chain.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    Ok(match op {
        CmpOp::Eq => left.equals(right),
        CmpOp::NotEq => !left.equals(right),
        CmpOp::Lt => order(op, left, right)? == Some(Ordering::Less),
        CmpOp::LtE => matches!(
            order(op, left, right)?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        CmpOp::Gt => order(op, left, right)? == Some(Ordering::Greater),
        CmpOp::GtE => matches!(
            order(op, left, right)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    })
}

/// Ordering used by `<`, `sorted`, `min` and `max`. `None` means unordered (NaN).
pub fn order(op: CmpOp, left: &Value, right: &Value) -> Result<Option<Ordering>> {
    if is_number(left) && is_number(right) {
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(Some(a.cmp(&b)));
        }
        let (a, b) = (
            left.as_float().unwrap_or_default(),
            right.as_float().unwrap_or_default(),
        );
        return Ok(a.partial_cmp(&b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            order_sequences(op, &a, &b)
        }
        (Value::Tuple(a), Value::Tuple(b)) => order_sequences(op, a, b),
        _ => Err(ExecutionFailure::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn order_sequences(op: CmpOp, a: &[Value], b: &[Value]) -> Result<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.equals(y) {
            return order(op, x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(ExecutionFailure::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|x| x.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|x| x.equals(item))),
        Value::Dict(dict) => {
            check_hashable(item)?;
            Ok(dict.borrow().contains_key(item))
        }
        Value::Range { start, stop, step } => {
            let Some(n) = item.as_int().or_else(|| match item {
                Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
                _ => None,
            }) else {
                return Ok(false);
            };
            let inside = if *step > 0 {
                *start <= n && n < *stop
            } else {
                *stop < n && n <= *start
            };
            Ok(inside && (i128::from(n) - i128::from(*start)) % i128::from(*step) == 0)
        }
        other => Err(ExecutionFailure::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Identity (`is`). Immutable scalars compare by value.
pub fn identical(left: &Value, right: &Value) -> bool {
    use std::rc::Rc;
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
        (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
        _ => false,
    }
}

/// A subscript: a single index or a slice with optional bounds.
#[derive(Clone)]
pub enum Index {
    Item(Value),
    Slice {
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    },
}

fn sequence_index(container: &Value, index: &Value, len: usize) -> Result<usize> {
    let Some(raw) = index.as_int() else {
        return Err(ExecutionFailure::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            index.type_name()
        )));
    };
    let len = len as i64;
    let position = if raw < 0 { raw + len } else { raw };
    if position < 0 || position >= len {
        let what = match container {
            Value::Str(_) => "string",
            Value::Range { .. } => "range object",
            other => other.type_name(),
        };
        return Err(ExecutionFailure::index_error(format!(
            "{} index out of range",
            what
        )));
    }
    Ok(position as usize)
}

fn slice_bound(value: &Option<Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => v.as_int().map(Some).ok_or_else(|| {
            ExecutionFailure::type_error("slice indices must be integers or None")
        }),
    }
}

/// Positions selected by a slice over a sequence of `len` items.
pub fn slice_positions(
    len: usize,
    lower: &Option<Value>,
    upper: &Option<Value>,
    step: &Option<Value>,
) -> Result<Vec<usize>> {
    let step = slice_bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(ExecutionFailure::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let (start, stop) = if step > 0 {
        (
            slice_bound(lower)?.map_or(0, |b| clamp(b, 0, len)),
            slice_bound(upper)?.map_or(len, |b| clamp(b, 0, len)),
        )
    } else {
        (
            slice_bound(lower)?.map_or(len - 1, |b| clamp(b, -1, len - 1)),
            slice_bound(upper)?.map_or(-1, |b| clamp(b, -1, len - 1)),
        )
    };

    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        i += step;
    }
    Ok(positions)
}

pub fn get_index(container: &Value, index: &Index) -> Result<Value> {
    match index {
        Index::Item(item) => get_item(container, item),
        Index::Slice { lower, upper, step } => match container {
            Value::List(items) => {
                let items = items.borrow();
                let positions = slice_positions(items.len(), lower, upper, step)?;
                Ok(Value::list(positions.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let positions = slice_positions(items.len(), lower, upper, step)?;
                Ok(Value::tuple(positions.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let positions = slice_positions(chars.len(), lower, upper, step)?;
                Ok(Value::str(positions.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range { .. } => {
                let items = container.to_vec()?;
                let positions = slice_positions(items.len(), lower, upper, step)?;
                Ok(Value::list(positions.into_iter().map(|i| items[i].clone()).collect()))
            }
            other => Err(not_subscriptable(other)),
        },
    }
}

fn not_subscriptable(value: &Value) -> ExecutionFailure {
    ExecutionFailure::type_error(format!(
        "'{}' object is not subscriptable",
        value.type_name()
    ))
}

pub fn get_item(container: &Value, index: &Value) -> Result<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = sequence_index(container, index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = sequence_index(container, index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let len = s.chars().count();
            let i = sequence_index(container, index, len)?;
            Ok(Value::str(s.chars().nth(i).map(String::from).unwrap_or_default()))
        }
        Value::Range { start, stop, step } => {
            let len = usize::try_from(range_len(*start, *stop, *step)).unwrap_or(usize::MAX);
            let i = sequence_index(container, index, len)?;
            Ok(Value::Int(start + step * i as i64))
        }
        Value::Dict(dict) => {
            check_hashable(index)?;
            dict.borrow()
                .get(index)
                .ok_or_else(|| ExecutionFailure::key_error(index.repr()))
        }
        other => Err(not_subscriptable(other)),
    }
}

fn immutable(container: &Value) -> ExecutionFailure {
    ExecutionFailure::type_error(format!(
        "'{}' object does not support item assignment",
        container.type_name()
    ))
}

pub fn set_index(container: &Value, index: Index, value: Value) -> Result<()> {
    match (container, index) {
        (Value::List(items), Index::Item(item)) => {
            let len = items.borrow().len();
            let i = sequence_index(container, &item, len)?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        (Value::List(items), Index::Slice { lower, upper, step }) => {
            let replacement = value.to_vec()?;
            let len = items.borrow().len();
            let positions = slice_positions(len, &lower, &upper, &step)?;
            let stepped = !matches!(slice_bound(&step)?, None | Some(1));
            if stepped {
                if replacement.len() != positions.len() {
                    return Err(ExecutionFailure::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        positions.len()
                    )));
                }
                let mut items = items.borrow_mut();
                for (position, item) in positions.into_iter().zip(replacement) {
                    items[position] = item;
                }
                return Ok(());
            }
            let start = match positions.first() {
                Some(first) => *first,
                None => slice_bound(&lower)?
                    .map_or(0, |b| if b < 0 { (b + len as i64).max(0) } else { b })
                    .min(len as i64) as usize,
            };
            let end = start + positions.len();
            items.borrow_mut().splice(start..end, replacement);
            Ok(())
        }
        (Value::Dict(dict), Index::Item(key)) => dict.borrow_mut().insert(key, value),
        (other, _) => Err(immutable(other)),
    }
}

pub fn del_index(container: &Value, index: Index) -> Result<()> {
    match (container, index) {
        (Value::List(items), Index::Item(item)) => {
            let len = items.borrow().len();
            let i = sequence_index(container, &item, len)?;
            items.borrow_mut().remove(i);
            Ok(())
        }
        (Value::List(items), Index::Slice { lower, upper, step }) => {
            let len = items.borrow().len();
            let mut positions = slice_positions(len, &lower, &upper, &step)?;
            positions.sort_unstable();
            let mut items = items.borrow_mut();
            for position in positions.into_iter().rev() {
                items.remove(position);
            }
            Ok(())
        }
        (Value::Dict(dict), Index::Item(key)) => {
            check_hashable(&key)?;
            dict.borrow_mut()
                .remove(&key)
                .map(|_| ())
                .ok_or_else(|| ExecutionFailure::key_error(key.repr()))
        }
        (other, _) => Err(ExecutionFailure::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Build a dict from `(key, value)` pairs, as `dict(iterable)` does.
pub fn dict_from_pairs(pairs: &Value) -> Result<Dict> {
    if let Value::Dict(dict) = pairs {
        return Ok(dict.borrow().clone());
    }
    let mut dict = Dict::new();
    for (i, pair) in pairs.iter()?.enumerate() {
        let items = pair.to_vec()?;
        if items.len() != 2 {
            return Err(ExecutionFailure::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                items.len()
            )));
        }
        let mut items = items.into_iter();
        if let (Some(key), Some(value)) = (items.next(), items.next()) {
            dict.insert(key, value)?;
        }
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_sign_of_divisor() {
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap().as_int(), Some(-4));
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap().as_int(), Some(1));
        assert_eq!(binary(BinOp::Mod, &int(7), &int(-2)).unwrap().as_int(), Some(-1));
        assert_eq!(binary(BinOp::Div, &int(7), &int(2)).unwrap().repr(), "3.5");
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        let err = binary(BinOp::Mod, &int(1), &int(0)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ZeroDivisionError: integer division or modulo by zero"
        );
    }

    #[test]
    fn test_integer_overflow() {
        let err = binary(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind(), "OverflowError");
        assert_eq!(binary(BinOp::Pow, &int(2), &int(10)).unwrap().as_int(), Some(1024));
        assert_eq!(binary(BinOp::Pow, &int(2), &int(-1)).unwrap().repr(), "0.5");
    }

    #[test]
    fn test_mixed_type_errors() {
        let err = binary(BinOp::Add, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: can only concatenate str (not \"int\") to str"
        );
        let err = binary(BinOp::Sub, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for -: 'str' and 'int'"
        );
        let err = compare(CmpOp::Lt, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
    }

    #[test]
    fn test_sequence_repetition() {
        assert_eq!(binary(BinOp::Mul, &Value::str("ab"), &int(3)).unwrap().to_str(), "ababab");
        assert_eq!(
            binary(BinOp::Mul, &int(2), &Value::list(vec![int(0)])).unwrap().repr(),
            "[0, 0]"
        );
        let pair = Value::tuple(vec![int(1), int(2)]);
        assert_eq!(binary(BinOp::Mul, &pair, &int(2)).unwrap().repr(), "(1, 2, 1, 2)");
        assert_eq!(binary(BinOp::Mul, &pair, &int(-1)).unwrap().repr(), "()");
        let shared = Value::list(vec![Value::list(vec![])]);
        assert_eq!(binary(BinOp::Mul, &shared, &int(3)).unwrap().repr(), "[[], [], []]");
    }

    #[test]
    fn test_slicing() {
        let list = Value::list((0..6).map(int).collect());
        let slice = |lower: Option<i64>, upper: Option<i64>, step: Option<i64>| Index::Slice {
            lower: lower.map(int),
            upper: upper.map(int),
            step: step.map(int),
        };
        assert_eq!(get_index(&list, &slice(Some(1), Some(-1), None)).unwrap().repr(), "[1, 2, 3, 4]");
        assert_eq!(get_index(&list, &slice(None, None, Some(-2))).unwrap().repr(), "[5, 3, 1]");
        assert_eq!(
            get_index(&Value::str("hello"), &slice(None, None, Some(-1))).unwrap().to_str(),
            "olleh"
        );
        let err = get_index(&list, &slice(None, None, Some(0))).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: slice step cannot be zero");
    }

    #[test]
    fn test_index_errors() {
        let list = Value::list(vec![int(1)]);
        assert_eq!(get_item(&list, &int(-1)).unwrap().as_int(), Some(1));
        let err = get_item(&list, &int(3)).unwrap_err();
        assert_eq!(err.to_string(), "IndexError: list index out of range");

        let dict = Value::dict(Dict::new());
        let err = get_item(&dict, &Value::str("missing")).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'missing'");

        let err = get_item(&int(3), &int(0)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'int' object is not subscriptable");
    }

    #[test]
    fn test_slice_assignment_and_deletion() {
        let list = Value::list((0..5).map(int).collect());
        set_index(
            &list,
            Index::Slice {
                lower: Some(int(1)),
                upper: Some(int(3)),
                step: None,
            },
            Value::list(vec![Value::str("x")]),
        )
        .unwrap();
        assert_eq!(list.repr(), "[0, 'x', 3, 4]");
        del_index(
            &list,
            Index::Slice {
                lower: None,
                upper: None,
                step: Some(int(2)),
            },
        )
        .unwrap();
        assert_eq!(list.repr(), "['x', 4]");
    }

    #[test]
    fn test_inplace_add_extends_shared_list() {
        let list = Value::list(vec![int(1)]);
        let alias = list.clone();
        inplace(BinOp::Add, &list, &Value::tuple(vec![int(2)])).unwrap();
        assert_eq!(alias.repr(), "[1, 2]");
    }

    #[test]
    fn test_membership() {
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::Range { start: 0, stop: 10, step: 2 }, &int(4)).unwrap());
        assert!(!contains(&Value::Range { start: 0, stop: 10, step: 2 }, &int(5)).unwrap());
        assert!(contains(&int(1), &int(1)).is_err());
    }
}
