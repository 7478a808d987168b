//! Importable modules: `math` and `json`.

use std::cell::Cell;
use std::fmt;
use std::io;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::ser::{Formatter, PrettyFormatter};

use super::builtins::{Builtin, arity, float_to_int};
use super::failure::ExecutionFailure;
use super::value::{Dict, Module, Value, format_float};

/// Nesting depth past which `json.dumps` assumes a reference cycle.
const MAX_JSON_DEPTH: usize = 256;

/// Load a module by name.
pub fn import(name: &str) -> Result<Rc<Module>, ExecutionFailure> {
    let (name, members): (&'static str, Vec<(&'static str, Value)>) = match name {
        "math" => (
            "math",
            vec![
                ("pi", Value::Float(std::f64::consts::PI)),
                ("e", Value::Float(std::f64::consts::E)),
                ("tau", Value::Float(std::f64::consts::TAU)),
                ("inf", Value::Float(f64::INFINITY)),
                ("nan", Value::Float(f64::NAN)),
                ("sqrt", Value::Builtin(Builtin::MathSqrt)),
                ("floor", Value::Builtin(Builtin::MathFloor)),
                ("ceil", Value::Builtin(Builtin::MathCeil)),
                ("pow", Value::Builtin(Builtin::MathPow)),
                ("log", Value::Builtin(Builtin::MathLog)),
                ("sin", Value::Builtin(Builtin::MathSin)),
                ("cos", Value::Builtin(Builtin::MathCos)),
                ("fabs", Value::Builtin(Builtin::MathFabs)),
            ],
        ),
        "json" => (
            "json",
            vec![
                ("dumps", Value::Builtin(Builtin::JsonDumps)),
                ("loads", Value::Builtin(Builtin::JsonLoads)),
            ],
        ),
        other => {
            return Err(ExecutionFailure::new(
                "ImportError",
                format!("No module named '{}'", other),
            ));
        }
    };
    Ok(Rc::new(Module {
        name,
        members: members.into_iter().collect::<FxHashMap<_, _>>(),
    }))
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

fn domain_error() -> ExecutionFailure {
    ExecutionFailure::value_error("math domain error")
}

fn real(value: &Value) -> Result<f64, ExecutionFailure> {
    value.as_float().ok_or_else(|| {
        ExecutionFailure::type_error(format!(
            "must be real number, not {}",
            value.type_name()
        ))
    })
}

fn checked(result: f64, inputs_finite: bool) -> Result<Value, ExecutionFailure> {
    if result.is_infinite() && inputs_finite {
        return Err(ExecutionFailure::overflow("math range error"));
    }
    Ok(Value::Float(result))
}

pub(crate) fn call_math(builtin: Builtin, args: &[Value]) -> Result<Value, ExecutionFailure> {
    let name = builtin.name();
    match builtin {
        Builtin::MathPow => {
            arity(name, args, 2, 2)?;
            let (x, y) = (real(&args[0])?, real(&args[1])?);
            if (x == 0.0 && y < 0.0) || (x < 0.0 && y.is_finite() && y.fract() != 0.0) {
                return Err(domain_error());
            }
            checked(x.powf(y), x.is_finite() && y.is_finite())
        }
        Builtin::MathLog => {
            arity(name, args, 1, 2)?;
            let x = real(&args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = real(base)?;
                    if base <= 0.0 {
                        return Err(domain_error());
                    }
                    if base == 1.0 {
                        return Err(ExecutionFailure::zero_division("float division by zero"));
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        _ => {
            arity(name, args, 1, 1)?;
            let value = &args[0];
            if let (Builtin::MathFloor | Builtin::MathCeil, Some(i)) = (builtin, value.as_int()) {
                return Ok(Value::Int(i));
            }
            let x = real(value)?;
            match builtin {
                Builtin::MathSqrt => {
                    if x < 0.0 {
                        return Err(domain_error());
                    }
                    Ok(Value::Float(x.sqrt()))
                }
                Builtin::MathFloor => float_to_int(x.floor()).map(Value::Int),
                Builtin::MathCeil => float_to_int(x.ceil()).map(Value::Int),
                Builtin::MathSin | Builtin::MathCos if x.is_infinite() => Err(domain_error()),
                Builtin::MathSin => Ok(Value::Float(x.sin())),
                Builtin::MathCos => Ok(Value::Float(x.cos())),
                _ => Ok(Value::Float(x.abs())),
            }
        }
    }
}

// ----------------------------------------------------------------------
// json
// ----------------------------------------------------------------------

/// Text the formatter writes for the next `null`.
///
/// serde_json turns non-finite floats into `null` before the formatter sees
/// them, so the serializer leaves the `NaN`/`Infinity` token here instead.
type NullToken = Rc<Cell<Option<&'static str>>>;

fn non_finite_token(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn write_null_token<W: ?Sized + io::Write>(writer: &mut W, token: &NullToken) -> io::Result<()> {
    writer.write_all(token.take().unwrap_or("null").as_bytes())
}

/// Serializes a script value; dict key order is preserved.
struct JsonValue<'a> {
    value: &'a Value,
    sort_keys: bool,
    depth: usize,
    null_token: NullToken,
}

impl JsonValue<'_> {
    fn child<'b>(&self, value: &'b Value) -> JsonValue<'b> {
        JsonValue {
            value,
            sort_keys: self.sort_keys,
            depth: self.depth + 1,
            null_token: self.null_token.clone(),
        }
    }
}

fn json_key(key: &Value) -> Result<String, String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) if !f.is_finite() => Ok(non_finite_token(*f).to_string()),
        Value::Float(f) => Ok(format_float(*f)),
        Value::Bool(b) => Ok(b.to_string()),
        Value::None => Ok("null".to_string()),
        other => Err(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        )),
    }
}

impl Serialize for JsonValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use ser::Error as _;

        if self.depth > MAX_JSON_DEPTH {
            return Err(S::Error::custom("Circular reference detected"));
        }
        match self.value {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if !f.is_finite() => {
                self.null_token.set(Some(non_finite_token(*f)));
                serializer.serialize_unit()
            }
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let mut entries = dict
                    .iter()
                    .map(|(key, value)| json_key(key).map(|key| (key, value)))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(S::Error::custom)?;
                if self.sort_keys {
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                }
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&key, &self.child(value))?;
                }
                map.end()
            }
            other => Err(S::Error::custom(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            ))),
        }
    }
}

/// Writes strings with non-ASCII characters escaped as `\uXXXX`.
fn write_ascii<W: ?Sized + io::Write>(writer: &mut W, fragment: &str) -> io::Result<()> {
    let mut start = 0;
    for (i, c) in fragment.char_indices() {
        if c.is_ascii() {
            continue;
        }
        writer.write_all(&fragment.as_bytes()[start..i])?;
        let mut units = [0u16; 2];
        for unit in c.encode_utf16(&mut units) {
            write!(writer, "\\u{:04x}", unit)?;
        }
        start = i + c.len_utf8();
    }
    writer.write_all(&fragment.as_bytes()[start..])
}

/// Single-line output with `", "` and `": "` separators.
struct CompactFormatter {
    null_token: NullToken,
}

impl Formatter for CompactFormatter {
    fn write_null<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        write_null_token(writer, &self.null_token)
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(format_float(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        write_ascii(writer, fragment)
    }
}

/// Indented output, delegating layout to serde_json's pretty printer.
struct IndentFormatter<'a> {
    pretty: PrettyFormatter<'a>,
    null_token: NullToken,
}

impl Formatter for IndentFormatter<'_> {
    fn write_null<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        write_null_token(writer, &self.null_token)
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(format_float(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        write_ascii(writer, fragment)
    }
}

fn dump_error(err: serde_json::Error) -> ExecutionFailure {
    let message = err.to_string();
    if message.starts_with("Circular") {
        ExecutionFailure::value_error(message)
    } else {
        ExecutionFailure::type_error(message)
    }
}

/// `json.dumps(value, indent=None, sort_keys=False)`.
pub(crate) fn json_dumps(
    value: &Value,
    indent: Option<usize>,
    sort_keys: bool,
) -> Result<String, ExecutionFailure> {
    let null_token = NullToken::default();
    let root = JsonValue {
        value,
        sort_keys,
        depth: 0,
        null_token: null_token.clone(),
    };
    let mut out = Vec::new();
    match indent {
        None => {
            let formatter = CompactFormatter { null_token };
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            root.serialize(&mut serializer).map_err(dump_error)?;
        }
        Some(width) => {
            let indent = " ".repeat(width);
            let formatter = IndentFormatter {
                pretty: PrettyFormatter::with_indent(indent.as_bytes()),
                null_token,
            };
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            root.serialize(&mut serializer).map_err(dump_error)?;
        }
    }
    String::from_utf8(out).map_err(|err| ExecutionFailure::value_error(err.to_string()))
}

/// A script value decoded from JSON text.
struct Loaded(Value);

impl<'de> Deserialize<'de> for Loaded {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LoadedVisitor).map(Loaded)
    }
}

struct LoadedVisitor;

impl<'de> Visitor<'de> for LoadedVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Value::None)
    }

    fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
        Ok(Value::Bool(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
        Ok(Value::Int(value))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64)))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
        Ok(Value::Float(value))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
        Ok(Value::str(value))
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
        Ok(Value::str(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(Loaded(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::list(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut dict = Dict::new();
        while let Some((key, Loaded(value))) = map.next_entry::<String, Loaded>()? {
            dict.insert(Value::str(key), value)
                .map_err(|err| <A::Error as de::Error>::custom(err.to_string()))?;
        }
        Ok(Value::dict(dict))
    }
}

/// `json.loads(text)`.
pub(crate) fn json_loads(text: &Value) -> Result<Value, ExecutionFailure> {
    let Value::Str(text) = text else {
        return Err(ExecutionFailure::type_error(format!(
            "the JSON object must be str, not {}",
            text.type_name()
        )));
    };
    serde_json::from_str::<Loaded>(text)
        .map(|Loaded(value)| value)
        .map_err(|err| ExecutionFailure::value_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let mut dict = Dict::new();
        dict.insert(Value::str("b"), Value::list(vec![Value::Int(1), Value::Float(2.5)]))
            .unwrap();
        dict.insert(Value::str("a"), Value::None).unwrap();
        Value::dict(dict)
    }

    #[test]
    fn test_dumps_uses_script_separators_and_order() {
        assert_eq!(
            json_dumps(&sample(), None, false).unwrap(),
            r#"{"b": [1, 2.5], "a": null}"#
        );
        assert_eq!(
            json_dumps(&sample(), None, true).unwrap(),
            r#"{"a": null, "b": [1, 2.5]}"#
        );
    }

    #[test]
    fn test_dumps_indent() {
        let value = Value::list(vec![Value::Int(1)]);
        assert_eq!(json_dumps(&value, Some(2), false).unwrap(), "[\n  1\n]");
    }

    #[test]
    fn test_dumps_non_finite_floats() {
        let value = Value::list(vec![
            Value::Float(f64::NAN),
            Value::None,
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
        ]);
        assert_eq!(
            json_dumps(&value, None, false).unwrap(),
            "[NaN, null, Infinity, -Infinity]"
        );
        assert_eq!(json_dumps(&Value::Float(f64::NAN), Some(2), false).unwrap(), "NaN");
    }

    #[test]
    fn test_dumps_escapes_non_ascii() {
        assert_eq!(json_dumps(&Value::str("é"), None, false).unwrap(), r#""\u00e9""#);
    }

    #[test]
    fn test_dumps_rejects_functions() {
        let err = json_dumps(&Value::Builtin(Builtin::Len), None, false).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
        assert!(err.message().contains("not JSON serializable"));
    }

    #[test]
    fn test_loads_preserves_key_order() {
        let value = json_loads(&Value::str(r#"{"z": 1, "a": [true, null, 1.5]}"#)).unwrap();
        assert_eq!(value.repr(), "{'z': 1, 'a': [True, None, 1.5]}");
        assert_eq!(json_loads(&Value::str("{")).unwrap_err().kind(), "ValueError");
    }

    #[test]
    fn test_math_domain() {
        let err = call_math(Builtin::MathSqrt, &[Value::Int(-1)]).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: math domain error");
        assert_eq!(
            call_math(Builtin::MathFloor, &[Value::Float(-1.5)]).unwrap().as_int(),
            Some(-2)
        );
    }

    #[test]
    fn test_unknown_module() {
        let err = import("numpy").unwrap_err();
        assert_eq!(err.to_string(), "ImportError: No module named 'numpy'");
    }
}
