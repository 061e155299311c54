//! Methods of builtin types and string formatting.

use std::cell::RefCell;
use std::rc::Rc;

use super::error::RuntimeError;
use super::ops;
use super::value::{Args, Dict, Key, Value};
use super::vm::Vm;

static STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "splitlines", "join", "startswith",
    "endswith", "replace", "find", "count", "format",
];

static LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "index", "count", "remove", "sort", "reverse", "copy", "clear",
];

static DICT_METHODS: &[&str] = &["keys", "values", "items", "get", "update", "pop", "setdefault", "copy", "clear"];

pub fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(_) => DICT_METHODS.contains(&name),
        _ => false,
    }
}

pub fn call(vm: &mut Vm, receiver: &Value, name: &str, args: Args) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Str(s) if has_method(receiver, name) => str_method(vm, s, name, args),
        Value::List(items) if has_method(receiver, name) => list_method(vm, items, name, args),
        Value::Dict(entries) if has_method(receiver, name) => dict_method(vm, entries, name, args),
        other => Err(RuntimeError::no_attribute(&other.type_name(), name)),
    }
}

fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, RuntimeError> {
    value
        .as_str()
        .ok_or_else(|| RuntimeError::type_error(format!("{what} must be str, not '{}'", value.type_name())))
}

fn arg_or_none(args: &Args, index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::None)
}

// ── str ─────────────────────────────────────────────────────────

fn str_method(vm: &mut Vm, s: &str, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let method = format!("str.{name}");
    match name {
        "upper" | "lower" => {
            args.check(&method, 0, 0)?;
            Ok(Value::from(if name == "upper" { s.to_uppercase() } else { s.to_lowercase() }))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(&method, 0, 1)?;
            let chars = match arg_or_none(&args, 0) {
                Value::None => None,
                value => Some(expect_str(&value, "strip chars")?.chars().collect::<Vec<_>>()),
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::str(out))
        }
        "split" => {
            let maxsplit = args.take_keyword("maxsplit").or_else(|| args.get(1).cloned());
            let sep = args.take_keyword("sep").or_else(|| args.get(0).cloned()).unwrap_or(Value::None);
            let maxsplit = match maxsplit {
                Some(value) => value.as_int().ok_or_else(|| RuntimeError::type_error("maxsplit must be int"))?,
                None => -1,
            };
            let parts: Vec<Value> = match &sep {
                Value::None => {
                    let words = s.split_whitespace().map(Value::str);
                    match usize::try_from(maxsplit) {
                        Ok(n) => split_whitespace_n(s, n),
                        Err(_) => words.collect(),
                    }
                }
                sep => {
                    let sep = expect_str(sep, "separator")?;
                    if sep.is_empty() {
                        return Err(RuntimeError::value_error("empty separator"));
                    }
                    match usize::try_from(maxsplit) {
                        Ok(n) => s.splitn(n + 1, sep).map(Value::str).collect(),
                        Err(_) => s.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            args.check(&method, 0, 0)?;
            Ok(Value::list(s.lines().map(Value::str).collect()))
        }
        "join" => {
            args.check(&method, 1, 1)?;
            let items = vm.iterate(&arg_or_none(&args, 0))?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(part) => parts.push(part.to_string()),
                    None => {
                        return Err(RuntimeError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            item.type_name()
                        )));
                    }
                }
            }
            Ok(Value::from(parts.join(s)))
        }
        "startswith" | "endswith" => {
            args.check(&method, 1, 1)?;
            let candidates = match arg_or_none(&args, 0) {
                Value::Tuple(items) => items.to_vec(),
                value => vec![value],
            };
            for candidate in &candidates {
                let affix = expect_str(candidate, &format!("{name} argument"))?;
                let hit = if name == "startswith" { s.starts_with(affix) } else { s.ends_with(affix) };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "replace" => {
            args.check(&method, 2, 3)?;
            let old = expect_str(&args.positional[0], "replace argument")?.to_string();
            let new = expect_str(&args.positional[1], "replace argument")?.to_string();
            let out = match args.get(2).and_then(Value::as_int).and_then(|n| usize::try_from(n).ok()) {
                Some(count) => s.replacen(&old, &new, count),
                None => s.replace(&old, &new),
            };
            Ok(Value::from(out))
        }
        "find" => {
            args.check(&method, 1, 1)?;
            let needle = expect_str(&args.positional[0], "find argument")?;
            Ok(Value::Int(match s.find(needle) {
                Some(byte) => i64::try_from(s[..byte].chars().count()).unwrap_or(-1),
                None => -1,
            }))
        }
        "count" => {
            args.check(&method, 1, 1)?;
            let needle = expect_str(&args.positional[0], "count argument")?;
            let n = if needle.is_empty() { s.chars().count() + 1 } else { s.matches(needle).count() };
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        "format" => format_str(s, &args).map(Value::from),
        _ => Err(RuntimeError::no_attribute("str", name)),
    }
}

fn split_whitespace_n(s: &str, n: usize) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if out.len() == n {
            out.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

/// `str.format` with automatic, positional and keyword fields.
fn format_str(template: &str, args: &Args) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(RuntimeError::value_error("expected '}' before end of string")),
                    }
                }
                let (field, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (field, conversion) = match field.split_once('!') {
                    Some((field, conversion)) => (field, Some(conversion)),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    auto += 1;
                    args.get(auto - 1).cloned()
                } else if let Ok(index) = field.parse::<usize>() {
                    args.get(index).cloned()
                } else {
                    args.keywords.iter().find(|(k, _)| k == field).map(|(_, v)| v.clone())
                };
                let value = value.ok_or_else(|| {
                    RuntimeError::Key(if field.is_empty() { "format index out of range".into() } else { field.to_string() })
                })?;
                let value = match conversion {
                    Some("r") => Value::str(&value.repr()),
                    _ => value,
                };
                out.push_str(&format_value(&value, spec)?);
            }
            '}' => return Err(RuntimeError::value_error("single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

// ── list ────────────────────────────────────────────────────────

fn list_method(vm: &mut Vm, items: &Rc<RefCell<Vec<Value>>>, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let method = format!("list.{name}");
    match name {
        "append" => {
            args.check(&method, 1, 1)?;
            items.borrow_mut().push(arg_or_none(&args, 0));
            Ok(Value::None)
        }
        "extend" => {
            args.check(&method, 1, 1)?;
            let extra = vm.iterate(&arg_or_none(&args, 0))?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            args.check(&method, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeError::Index("pop from empty list".into()));
            }
            let i = match args.get(0) {
                Some(index) => ops::index(items.len(), index, "pop")?,
                None => items.len() - 1,
            };
            Ok(items.remove(i))
        }
        "insert" => {
            args.check(&method, 2, 2)?;
            let at = args.positional[0]
                .as_int()
                .ok_or_else(|| RuntimeError::type_error("list.insert() index must be an integer"))?;
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(usize::try_from(at).unwrap_or(0), args.positional[1].clone());
            Ok(Value::None)
        }
        "index" | "count" | "remove" => {
            args.check(&method, 1, 1)?;
            let needle = arg_or_none(&args, 0);
            let position = items.borrow().iter().position(|v| v.equals(&needle));
            match (name, position) {
                ("count", _) => {
                    let n = items.borrow().iter().filter(|v| v.equals(&needle)).count();
                    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
                }
                ("index", Some(i)) => Ok(Value::Int(i64::try_from(i).unwrap_or(i64::MAX))),
                ("remove", Some(i)) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                ("index", None) => Err(RuntimeError::value_error(format!("{} is not in list", needle.repr()))),
                _ => Err(RuntimeError::value_error("list.remove(x): x not in list")),
            }
        }
        "sort" => {
            let key = args.take_keyword("key").unwrap_or(Value::None);
            let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
            args.check(&method, 0, 0)?;
            let values = items.borrow().clone();
            let sorted = sorted(vm, values, &key, reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            args.check(&method, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            args.check(&method, 0, 0)?;
            Ok(Value::list(items.borrow().clone()))
        }
        "clear" => {
            args.check(&method, 0, 0)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(RuntimeError::no_attribute("list", name)),
    }
}

/// Sort `values` by an optional key function.
pub fn sorted(vm: &mut Vm, values: Vec<Value>, key: &Value, reverse: bool) -> Result<Vec<Value>, RuntimeError> {
    let mut keyed = Vec::with_capacity(values.len());
    for value in values {
        let k = if key.is_none() { value.clone() } else { vm.call(key, Args::new(vec![value.clone()]))? };
        keyed.push((k, value));
    }
    ops::sort(&mut keyed, reverse)?;
    Ok(keyed.into_iter().map(|(_, value)| value).collect())
}

// ── dict ────────────────────────────────────────────────────────

fn dict_method(vm: &mut Vm, entries: &Rc<RefCell<Dict>>, name: &str, args: Args) -> Result<Value, RuntimeError> {
    let method = format!("dict.{name}");
    match name {
        "keys" => {
            args.check(&method, 0, 0)?;
            Ok(Value::list(entries.borrow().keys().map(Key::to_value).collect()))
        }
        "values" => {
            args.check(&method, 0, 0)?;
            Ok(Value::list(entries.borrow().values().cloned().collect()))
        }
        "items" => {
            args.check(&method, 0, 0)?;
            Ok(Value::list(
                entries.borrow().iter().map(|(k, v)| ops::tuple(vec![k.to_value(), v.clone()])).collect(),
            ))
        }
        "get" => {
            args.check(&method, 1, 2)?;
            let key = Key::from_value(&args.positional[0])?;
            Ok(entries.borrow().get(&key).cloned().unwrap_or_else(|| arg_or_none(&args, 1)))
        }
        "update" => {
            if args.len() > 1 {
                return Err(RuntimeError::type_error(format!("update expected at most 1 argument, got {}", args.len())));
            }
            let mut pairs = match args.get(0) {
                Some(other) => mapping_pairs(vm, other)?,
                None => Vec::new(),
            };
            pairs.extend(args.keywords.iter().map(|(k, v)| (Key::str(k), v.clone())));
            entries.borrow_mut().extend(pairs);
            Ok(Value::None)
        }
        "pop" => {
            args.check(&method, 1, 2)?;
            let key = Key::from_value(&args.positional[0])?;
            match (entries.borrow_mut().shift_remove(&key), args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeError::Key(args.positional[0].repr())),
            }
        }
        "setdefault" => {
            args.check(&method, 1, 2)?;
            let key = Key::from_value(&args.positional[0])?;
            let default = arg_or_none(&args, 1);
            Ok(entries.borrow_mut().entry(key).or_insert(default).clone())
        }
        "copy" => {
            args.check(&method, 0, 0)?;
            Ok(Value::dict(entries.borrow().clone()))
        }
        "clear" => {
            args.check(&method, 0, 0)?;
            entries.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(RuntimeError::no_attribute("dict", name)),
    }
}

/// Key/value pairs of a dict, a namespace or an iterable of pairs.
pub fn mapping_pairs(vm: &mut Vm, value: &Value) -> Result<Vec<(Key, Value)>, RuntimeError> {
    match value {
        Value::Dict(entries) => Ok(entries.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Namespace(ns) => Ok(ns.attrs.borrow().iter().map(|(k, v)| (Key::str(k), v.clone())).collect()),
        other => {
            let mut pairs = Vec::new();
            for item in vm.iterate(other)? {
                let pair = vm.iterate(&item)?;
                let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                    RuntimeError::value_error(format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        pair.len()
                    ))
                })?;
                pairs.push((Key::from_value(&key)?, value));
            }
            Ok(pairs)
        }
    }
}

// ── Format specs ────────────────────────────────────────────────

#[derive(Debug, Default)]
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

fn parse_spec(spec: &str) -> Result<Spec, RuntimeError> {
    let chars: Vec<char> = spec.chars().collect();
    let invalid = || RuntimeError::value_error(format!("invalid format specifier '{spec}'"));
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: Option<&char>| matches!(c, Some('<' | '>' | '^' | '='));
    if is_align(chars.get(1)) {
        out.fill = chars.first().copied();
        out.align = chars.get(1).copied();
        i = 2;
    } else if is_align(chars.first()) {
        out.align = chars.first().copied();
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().map_err(|_| invalid())?;
    }
    if let Some(',' | '_') = chars.get(i) {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        out.precision = Some(chars[start..i].iter().collect::<String>().parse().map_err(|_| invalid())?);
    }
    out.kind = chars.get(i).copied();
    if chars.len() > i + 1 {
        return Err(invalid());
    }
    Ok(out)
}

/// Format a value according to a format spec (`format(value, spec)`).
pub fn format_value(value: &Value, spec: &str) -> Result<String, RuntimeError> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let spec = parse_spec(spec)?;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let body = match (spec.kind, value) {
        (Some('s') | None, Value::Str(s)) => match spec.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.to_string(),
        },
        (Some('d' | 'n') | None, Value::Int(_) | Value::Bool(_)) if spec.precision.is_none() || spec.kind.is_some() => {
            let i = value.as_int().unwrap_or(0);
            let digits = i.unsigned_abs().to_string();
            sign_prefix(i < 0, spec.sign) + &group(&digits, spec.grouping)
        }
        (Some(radix @ ('x' | 'X' | 'o' | 'b')), Value::Int(_) | Value::Bool(_)) => {
            let i = value.as_int().unwrap_or(0);
            let magnitude = i.unsigned_abs();
            let digits = match radix {
                'x' => format!("{magnitude:x}"),
                'X' => format!("{magnitude:X}"),
                'o' => format!("{magnitude:o}"),
                _ => format!("{magnitude:b}"),
            };
            sign_prefix(i < 0, spec.sign) + &digits
        }
        (kind @ (Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') | None), _) if numeric => {
            let f = value.as_float().unwrap_or(0.0);
            let kind = kind.unwrap_or('g');
            let magnitude = f.abs();
            let text = match kind {
                'f' | 'F' => format!("{magnitude:.*}", spec.precision.unwrap_or(6)),
                'e' | 'E' => {
                    let text = exponent(magnitude, spec.precision.unwrap_or(6));
                    if kind == 'E' { text.to_uppercase() } else { text }
                }
                '%' => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
                _ if spec.precision.is_none() && spec.kind.is_none() => super::value::format_float(magnitude),
                _ => general(magnitude, spec.precision.unwrap_or(6)),
            };
            let text = if spec.grouping { group_number(&text) } else { text };
            sign_prefix(f.is_sign_negative() && !f.is_nan(), spec.sign) + &text
        }
        (Some(kind), other) => {
            return Err(RuntimeError::value_error(format!(
                "unknown format code '{kind}' for object of type '{}'",
                other.type_name()
            )));
        }
        (None, other) => other.to_string(),
    };
    Ok(pad(&body, &spec, numeric))
}

fn sign_prefix(negative: bool, sign: Option<char>) -> String {
    match (negative, sign) {
        (true, _) => "-".into(),
        (false, Some('+')) => "+".into(),
        (false, Some(' ')) => " ".into(),
        _ => String::new(),
    }
}

fn group(digits: &str, grouping: bool) -> String {
    if !grouping {
        return digits.to_string();
    }
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn group_number(text: &str) -> String {
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    group(&text[..split], true) + &text[split..]
}

/// `1.500000e+00` style exponent notation.
fn exponent(f: f64, precision: usize) -> String {
    let text = format!("{f:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => text,
    }
}

/// `g` presentation: `precision` significant digits, trailing zeros removed.
fn general(f: f64, precision: usize) -> String {
    if f == 0.0 || !f.is_finite() {
        return super::value::format_float(f).trim_end_matches(".0").to_string();
    }
    let precision = precision.max(1);
    #[allow(clippy::cast_possible_truncation)]
    let exp = f.abs().log10().floor() as i32;
    let limit = i32::try_from(precision).unwrap_or(i32::MAX);
    if exp < -4 || exp >= limit {
        let text = exponent(f, precision - 1);
        match text.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{exp}", trim_zeros(mantissa)),
            None => text,
        }
    } else {
        let decimals = usize::try_from(limit - 1 - exp).unwrap_or(0);
        trim_zeros(&format!("{f:.decimals$}")).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn pad(body: &str, spec: &Spec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body.to_string();
    }
    let missing = spec.width - len;
    let (fill, align) = match (spec.fill, spec.align) {
        (fill, Some(align)) => (fill.unwrap_or(' '), align),
        (_, None) if spec.zero && numeric => ('0', '='),
        (_, None) if numeric => (' ', '>'),
        _ => (' ', '<'),
    };
    let filler = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{body}{}", filler(missing)),
        '^' => format!("{}{body}{}", filler(missing / 2), filler(missing - missing / 2)),
        '=' => {
            let sign_len = body.chars().take_while(|c| matches!(c, '+' | '-' | ' ')).count();
            let (sign, digits) = body.split_at(sign_len);
            format!("{sign}{}{digits}", filler(missing))
        }
        _ => format!("{}{body}", filler(missing)),
    }
}

/// printf-style `template % values`.
pub fn percent_format(template: &str, values: &Value) -> Result<String, RuntimeError> {
    let positional: Vec<Value> = match values {
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mut next = positional.into_iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ')' {
                    break;
                }
                name.push(c);
            }
            key = Some(name);
        }
        let mut flags = String::new();
        while let Some(&c @ ('-' | '+' | ' ' | '0' | '#')) = chars.peek() {
            flags.push(c);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&c) = chars.peek().filter(|c| c.is_ascii_digit() || **c == '.') {
            width.push(c);
            chars.next();
        }
        let kind = chars
            .next()
            .ok_or_else(|| RuntimeError::value_error("incomplete format"))?;
        let value = match &key {
            Some(name) => match values {
                Value::Dict(entries) => entries
                    .borrow()
                    .get(&Key::str(name))
                    .cloned()
                    .ok_or_else(|| RuntimeError::Key(super::value::repr_str(name)))?,
                _ => return Err(RuntimeError::type_error("format requires a mapping")),
            },
            None => next
                .next()
                .ok_or_else(|| RuntimeError::type_error("not enough arguments for format string"))?,
        };
        let align = if flags.contains('-') { "<" } else { "" };
        let sign = if flags.contains('+') { "+" } else if flags.contains(' ') { " " } else { "" };
        let zero = if flags.contains('0') && !flags.contains('-') { "0" } else { "" };
        let text = match kind {
            's' => format_value(&Value::from(value.to_string()), &format!("{align}{width}"))?,
            'r' => format_value(&Value::from(value.repr()), &format!("{align}{width}"))?,
            'd' | 'i' | 'u' => {
                let int = match &value {
                    Value::Float(f) => Value::Int(ops::float_to_int(*f)?),
                    other => other.clone(),
                };
                format_value(&int, &format!("{align}{sign}{zero}{width}d"))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                format_value(&value, &format!("{align}{sign}{zero}{width}{kind}"))?
            }
            other => return Err(RuntimeError::value_error(format!("unsupported format character '{other}'"))),
        };
        out.push_str(&text);
    }
    if next.next().is_some() {
        return Err(RuntimeError::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::str("ab"), "^6").unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert_eq!(format_value(&Value::Float(0.5), ".0%").unwrap(), "50%");
        assert_eq!(format_value(&Value::Float(1500.0), "e").unwrap(), "1.500000e+03");
        assert_eq!(format_value(&Value::Float(0.0001234), "g").unwrap(), "0.0001234");
        assert!(format_value(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn percent_formatting() {
        let args = ops::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(percent_format("%s=%d (%.1f%%)", &args).unwrap(), "x=3 (0.5%)");
        assert_eq!(percent_format("%-4s|", &Value::str("a")).unwrap(), "a   |");
        assert!(percent_format("%s %s", &Value::str("a")).is_err());
    }

    #[test]
    fn str_format_fields() {
        let mut args = Args::new(vec![Value::Int(1), Value::str("two")]);
        args.keywords.push(("name".into(), Value::str("n")));
        assert_eq!(format_str("{} {} {name!r} {0:>3} {{}}", &args).unwrap(), "1 two 'n'   1 {}");
    }

    #[test]
    fn whitespace_split_with_limit() {
        let parts = split_whitespace_n("  a b  c ", 1);
        assert_eq!(parts, vec![Value::str("a"), Value::str("b  c ")]);
    }
}
