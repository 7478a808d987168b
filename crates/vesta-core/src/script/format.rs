//! Format specifications for f-strings, `str.format` and `%` formatting.

use super::failure::ExecutionFailure;
use super::value::{Value, format_float};

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]`.
#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid_spec() -> ExecutionFailure {
    ExecutionFailure::value_error("Invalid format specifier")
}

fn parse_spec(spec: &str) -> Result<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = Spec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let width_start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > width_start {
        let digits: String = chars[width_start..i].iter().collect();
        parsed.width = digits.parse().map_err(|_| invalid_spec())?;
    }
    if matches!(chars.get(i), Some(',') | Some('_')) {
        parsed.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(ExecutionFailure::value_error("Format specifier missing precision"));
        }
        let digits: String = chars[start..i].iter().collect();
        parsed.precision = Some(digits.parse().map_err(|_| invalid_spec())?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid_spec());
    }
    Ok(parsed)
}

fn unknown_code(kind: char, value: &Value) -> ExecutionFailure {
    ExecutionFailure::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        kind,
        value.type_name()
    ))
}

/// Format a value with a format-spec string, as `format(value, spec)` does.
pub fn format_value(value: &Value, spec: &str) -> Result<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    render(value, &spec)
}

fn render(value: &Value, spec: &Spec) -> Result<String> {
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    if !numeric {
        let text = match spec.kind {
            None | Some('s') => value.to_str(),
            Some(kind) => return Err(unknown_code(kind, value)),
        };
        if spec.sign.is_some() {
            return Err(ExecutionFailure::value_error(
                "Sign not allowed in string format specifier",
            ));
        }
        let text = match spec.precision {
            Some(p) => text.chars().take(p).collect(),
            None => text,
        };
        return Ok(pad(String::new(), text, spec, '<'));
    }

    let (negative, body) = number_body(value, spec)?;
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    Ok(pad(sign.to_string(), body, spec, '>'))
}

/// Digits of a number without its sign.
fn number_body(value: &Value, spec: &Spec) -> Result<(bool, String)> {
    let kind = spec.kind;
    if let (Some(i), Some('d' | 'x' | 'X' | 'o' | 'b' | 'n') | None) = (value.as_int(), kind) {
        let digits = match kind {
            Some('x') => format!("{:x}", i.unsigned_abs()),
            Some('X') => format!("{:X}", i.unsigned_abs()),
            Some('o') => format!("{:o}", i.unsigned_abs()),
            Some('b') => format!("{:b}", i.unsigned_abs()),
            _ => i.unsigned_abs().to_string(),
        };
        let digits = if spec.grouping { group(&digits) } else { digits };
        return Ok((i < 0, digits));
    }

    let Some(x) = value.as_float() else {
        return Err(unknown_code(kind.unwrap_or('?'), value));
    };
    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let body = match kind {
        Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6)),
        Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6)),
        Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6)),
        Some('%') => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6))),
        None => match spec.precision {
            Some(p) => general(magnitude, p.max(1)),
            None => format_float(magnitude),
        },
        Some(other) => return Err(unknown_code(other, value)),
    };
    let body = if matches!(kind, Some('E' | 'G' | 'F')) {
        body.to_uppercase()
    } else {
        body
    };
    let body = if spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        format!("{}{}", group(&body[..split]), &body[split..])
    } else {
        body
    };
    Ok((negative, body))
}

fn fixed(x: f64, precision: usize) -> String {
    if !x.is_finite() {
        return format_float(x);
    }
    format!("{:.*}", precision, x)
}

fn scientific(x: f64, precision: usize) -> String {
    if !x.is_finite() {
        return format_float(x);
    }
    let raw = format!("{:.*e}", precision, x);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => raw,
    }
}

fn general(x: f64, precision: usize) -> String {
    if !x.is_finite() {
        return format_float(x);
    }
    let precision = precision.max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    let rounded = format!("{:.*e}", precision - 1, x);
    let exponent: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(format!("{:.*}", decimals, x))
    } else {
        let text = scientific(x, precision - 1);
        match text.split_once('e') {
            Some((mantissa, exponent)) => {
                format!("{}e{}", trim_fraction(mantissa.to_string()), exponent)
            }
            None => text,
        }
    }
}

fn trim_fraction(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn group(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn pad(sign: String, body: String, spec: &Spec, default_align: char) -> String {
    let (fill, align) = if spec.zero && spec.align.is_none() && default_align == '>' {
        ('0', '=')
    } else {
        (
            spec.fill.unwrap_or(if spec.zero { '0' } else { ' ' }),
            spec.align.unwrap_or(default_align),
        )
    };
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return sign + &body;
    }
    let padding = spec.width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{}{}{}", sign, body, fill_str(padding)),
        '^' => {
            let left = padding / 2;
            format!("{}{}{}{}", fill_str(left), sign, body, fill_str(padding - left))
        }
        '=' => format!("{}{}{}", sign, fill_str(padding), body),
        _ => format!("{}{}{}", fill_str(padding), sign, body),
    }
}

/// `template.format(*args, **kwargs)`.
pub fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return Err(ExecutionFailure::value_error(
                "Single '}' encountered in format string",
            ));
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        let Some(close) = chars[i + 1..].iter().position(|&c| c == '}') else {
            return Err(ExecutionFailure::value_error(
                "Single '{' encountered in format string",
            ));
        };
        let field: String = chars[i + 1..i + 1 + close].iter().collect();
        i += close + 2;

        let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
        let (name, conversion) = match head.split_once('!') {
            Some((name, conversion)) => (name, Some(conversion)),
            None => (head, None),
        };
        let value = if name.is_empty() {
            let value = args.get(auto_index).cloned();
            auto_index += 1;
            value.ok_or_else(|| {
                ExecutionFailure::index_error(format!(
                    "Replacement index {} out of range for positional args tuple",
                    auto_index - 1
                ))
            })?
        } else if let Ok(position) = name.parse::<usize>() {
            args.get(position).cloned().ok_or_else(|| {
                ExecutionFailure::index_error(format!(
                    "Replacement index {} out of range for positional args tuple",
                    position
                ))
            })?
        } else {
            kwargs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| ExecutionFailure::key_error(format!("'{}'", name)))?
        };
        let value = match conversion {
            None => value,
            Some("r") | Some("a") => Value::str(value.repr()),
            Some("s") => Value::str(value.to_str()),
            Some(other) => {
                return Err(ExecutionFailure::value_error(format!(
                    "Unknown conversion specifier {}",
                    other
                )));
            }
        };
        out.push_str(&format_value(&value, spec)?);
    }
    Ok(out)
}

/// `template % args`, printf-style.
pub fn percent_format(template: &str, args: &Value) -> Result<String> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut spec = Spec::default();
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => spec.align = Some('<'),
                '0' => spec.zero = true,
                '+' | ' ' => spec.sign = Some(flag),
                '#' => {}
                _ => break,
            }
            i += 1;
        }
        while let Some(digit) = chars.get(i).and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + digit as usize;
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = 0;
            while let Some(digit) = chars.get(i).and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + digit as usize;
                i += 1;
            }
            spec.precision = Some(precision);
        }
        let Some(&conversion) = chars.get(i) else {
            return Err(ExecutionFailure::value_error("incomplete format"));
        };
        i += 1;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let Some(value) = values.next() else {
            return Err(ExecutionFailure::type_error(
                "not enough arguments for format string",
            ));
        };
        if spec.align.is_none() {
            spec.align = Some('>');
            if spec.zero {
                spec.align = Some('=');
                spec.fill = Some('0');
            }
        }
        let text = match conversion {
            's' => render(&Value::str(value.to_str()), &spec)?,
            'r' => render(&Value::str(value.repr()), &spec)?,
            'd' | 'i' => {
                let Some(x) = value.as_float() else {
                    return Err(ExecutionFailure::type_error(format!(
                        "%d format: a real number is required, not {}",
                        value.type_name()
                    )));
                };
                spec.kind = Some('d');
                render(&Value::Int(value.as_int().unwrap_or(x.trunc() as i64)), &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                if value.as_float().is_none() {
                    return Err(ExecutionFailure::type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    )));
                }
                spec.kind = Some(conversion);
                render(&value, &spec)?
            }
            other => {
                return Err(ExecutionFailure::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )));
            }
        };
        out.push_str(&text);
    }

    if values.next().is_some() {
        return Err(ExecutionFailure::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}
