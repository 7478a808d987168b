//! Methods of lists, dicts and strings.

use std::cell::RefCell;
use std::rc::Rc;

use super::builtins::{arity, index_arg, reject_kwargs, sort_values, take_kwarg};
use super::failure::ExecutionFailure;
use super::format;
use super::interpreter::Machine;
use super::ops;
use super::value::{BoundMethod, Dict, Value, check_hashable};

type Result<T> = std::result::Result<T, ExecutionFailure>;

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "clear", "reverse", "sort",
    "copy",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "update", "setdefault", "clear", "copy",
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "count", "format", "title", "isdigit",
];

/// Bind `receiver.name` if the receiver's type has such a method.
pub fn lookup(receiver: &Value, name: &str) -> Option<Value> {
    let table = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => return None,
    };
    let name = table.iter().find(|method| **method == name)?;
    Some(Value::Method(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        name: Rc::from(*name),
    })))
}

pub(crate) fn call(
    machine: &mut Machine<'_>,
    method: &BoundMethod,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let qualified = format!("{}.{}", method.receiver.type_name(), method.name);
    match &method.receiver {
        Value::List(items) => list_method(machine, items, &method.name, &qualified, args, kwargs),
        Value::Dict(dict) => {
            if method.name.as_ref() != "update" {
                reject_kwargs(&qualified, &kwargs)?;
            }
            dict_method(dict, &method.name, &qualified, args, kwargs)
        }
        Value::Str(s) => {
            if !matches!(method.name.as_ref(), "format" | "split") {
                reject_kwargs(&qualified, &kwargs)?;
            }
            str_method(s, &method.name, &qualified, args, kwargs)
        }
        other => Err(ExecutionFailure::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            method.name
        ))),
    }
}

fn list_method(
    machine: &mut Machine<'_>,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    qualified: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    if name == "sort" {
        arity(qualified, &args, 0, 0)?;
        let key = take_kwarg(&mut kwargs, "key");
        let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
        reject_kwargs(qualified, &kwargs)?;
        let snapshot = items.borrow().clone();
        let sorted = sort_values(machine, snapshot, key.as_ref(), reverse)?;
        *items.borrow_mut() = sorted;
        return Ok(Value::None);
    }
    reject_kwargs(qualified, &kwargs)?;

    match name {
        "append" => {
            arity(qualified, &args, 1, 1)?;
            items.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(qualified, &args, 1, 1)?;
            let extra = args[0].to_vec()?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            arity(qualified, &args, 0, 1)?;
            let len = items.borrow().len() as i64;
            if len == 0 {
                return Err(ExecutionFailure::index_error("pop from empty list"));
            }
            let raw = args.first().map(index_arg).transpose()?.unwrap_or(-1);
            let position = if raw < 0 { raw + len } else { raw };
            if !(0..len).contains(&position) {
                return Err(ExecutionFailure::index_error("pop index out of range"));
            }
            Ok(items.borrow_mut().remove(position as usize))
        }
        "insert" => {
            arity(qualified, &args, 2, 2)?;
            let len = items.borrow().len() as i64;
            let raw = index_arg(&args[0])?;
            let position = if raw < 0 { (raw + len).max(0) } else { raw.min(len) };
            items.borrow_mut().insert(position as usize, args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            arity(qualified, &args, 1, 1)?;
            let position = items.borrow().iter().position(|item| item.equals(&args[0]));
            match position {
                Some(position) => {
                    items.borrow_mut().remove(position);
                    Ok(Value::None)
                }
                None => Err(ExecutionFailure::value_error(
                    "list.remove(x): x not in list",
                )),
            }
        }
        "index" => {
            arity(qualified, &args, 1, 1)?;
            let position = items.borrow().iter().position(|item| item.equals(&args[0]));
            position.map(|p| Value::Int(p as i64)).ok_or_else(|| {
                ExecutionFailure::value_error(format!("{} is not in list", args[0].repr()))
            })
        }
        "count" => {
            arity(qualified, &args, 1, 1)?;
            let count = items.borrow().iter().filter(|item| item.equals(&args[0])).count();
            Ok(Value::Int(count as i64))
        }
        "clear" => {
            arity(qualified, &args, 0, 0)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "reverse" => {
            arity(qualified, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::list(items.borrow().clone()))
        }
    }
}

fn dict_method(
    dict: &Rc<RefCell<Dict>>,
    name: &str,
    qualified: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    match name {
        "get" => {
            arity(qualified, &args, 1, 2)?;
            check_hashable(&args[0])?;
            let found = dict.borrow().get(&args[0]);
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().items()))
        }
        "pop" => {
            arity(qualified, &args, 1, 2)?;
            check_hashable(&args[0])?;
            let removed = dict.borrow_mut().remove(&args[0]);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ExecutionFailure::key_error(args[0].repr())),
            }
        }
        "update" => {
            arity(qualified, &args, 0, 1)?;
            let mut incoming = match args.first() {
                Some(other) => ops::dict_from_pairs(other)?,
                None => Dict::new(),
            };
            for (key, value) in kwargs {
                incoming.insert(Value::str(key), value)?;
            }
            let mut dict = dict.borrow_mut();
            for (key, value) in incoming.iter() {
                dict.insert(key.clone(), value.clone())?;
            }
            Ok(Value::None)
        }
        "setdefault" => {
            arity(qualified, &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0]);
            match existing {
                Some(value) => Ok(value),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(args[0].clone(), default.clone())?;
                    Ok(default)
                }
            }
        }
        "clear" => {
            arity(qualified, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
    }
}

fn str_arg<'a>(qualified: &str, value: &'a Value) -> Result<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ExecutionFailure::type_error(format!(
            "{}() argument must be str, not {}",
            qualified,
            other.type_name()
        ))),
    }
}

/// Optional strip-set argument; `None` means whitespace.
fn strip_chars(qualified: &str, args: &[Value]) -> Result<Option<Vec<char>>> {
    arity(qualified, args, 0, 1)?;
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(value) => Ok(Some(str_arg(qualified, value)?.chars().collect())),
    }
}

fn split(s: &str, separator: Option<&str>, max_splits: i64) -> Result<Vec<Value>> {
    let limit = usize::try_from(max_splits).ok();
    let parts: Vec<String> = match separator {
        Some("") => return Err(ExecutionFailure::value_error("empty separator")),
        Some(separator) => match limit {
            Some(limit) => s.splitn(limit + 1, separator).map(String::from).collect(),
            None => s.split(separator).map(String::from).collect(),
        },
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if limit.is_some_and(|limit| parts.len() == limit) {
                    parts.push(rest.to_string());
                    break;
                }
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        parts.push(rest.to_string());
                        break;
                    }
                }
            }
            parts
        }
    };
    Ok(parts.into_iter().map(Value::from).collect())
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(c);
            previous_cased = false;
        }
    }
    out
}

/// Prefix/suffix argument: a string or a tuple of strings.
fn affixes(qualified: &str, value: &Value) -> Result<Vec<Rc<str>>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Tuple(items) => items
            .iter()
            .map(|item| str_arg(qualified, item).map(Rc::from))
            .collect(),
        other => Err(ExecutionFailure::type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            qualified,
            other.type_name()
        ))),
    }
}

fn str_method(
    s: &Rc<str>,
    name: &str,
    qualified: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    match name {
        "upper" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(qualified, &args)?;
            let strip = |c: char| match &chars {
                Some(chars) => chars.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => s.trim_matches(strip),
                "lstrip" => s.trim_start_matches(strip),
                _ => s.trim_end_matches(strip),
            };
            Ok(Value::str(stripped))
        }
        "split" => {
            arity(qualified, &args, 0, 2)?;
            let separator = args
                .first()
                .cloned()
                .or_else(|| take_kwarg(&mut kwargs, "sep"));
            let max_splits = args
                .get(1)
                .cloned()
                .or_else(|| take_kwarg(&mut kwargs, "maxsplit"));
            reject_kwargs(qualified, &kwargs)?;
            let separator = match &separator {
                None | Some(Value::None) => None,
                Some(value) => Some(str_arg(qualified, value)?),
            };
            let max_splits = max_splits.as_ref().map(index_arg).transpose()?.unwrap_or(-1);
            Ok(Value::list(split(s, separator, max_splits)?))
        }
        "join" => {
            arity(qualified, &args, 1, 1)?;
            let mut parts = Vec::new();
            for (i, item) in args[0].iter()?.enumerate() {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => {
                        return Err(ExecutionFailure::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )));
                    }
                }
            }
            let parts: Vec<&str> = parts.iter().map(|p| p.as_ref()).collect();
            Ok(Value::str(parts.join(&**s)))
        }
        "replace" => {
            arity(qualified, &args, 2, 3)?;
            let old = str_arg(qualified, &args[0])?;
            let new = str_arg(qualified, &args[1])?;
            let count = args.get(2).map(index_arg).transpose()?.unwrap_or(-1);
            let replaced = match usize::try_from(count) {
                Ok(count) => s.replacen(old, new, count),
                Err(_) => s.replace(old, new),
            };
            Ok(Value::str(replaced))
        }
        "startswith" | "endswith" => {
            arity(qualified, &args, 1, 1)?;
            let candidates = affixes(qualified, &args[0])?;
            let found = candidates.iter().any(|affix| {
                if name == "startswith" {
                    s.starts_with(affix.as_ref())
                } else {
                    s.ends_with(affix.as_ref())
                }
            });
            Ok(Value::Bool(found))
        }
        "find" => {
            arity(qualified, &args, 1, 1)?;
            let needle = str_arg(qualified, &args[0])?;
            let position = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(position))
        }
        "count" => {
            arity(qualified, &args, 1, 1)?;
            let needle = str_arg(qualified, &args[0])?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "format" => Ok(Value::str(format::format_template(s, &args, &kwargs)?)),
        "title" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(title(s)))
        }
        _ => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::Bool(
                !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
            ))
        }
    }
}
