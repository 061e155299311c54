use std::rc::Rc;

use super::error::RuntimeError;
use super::methods;
use super::ops;
use super::value::{is_subclass, Args, Attrs, Class, Dict, Key, Value};
use super::vm::Vm;
use crate::host::ast::BinOp;

/// Built-in function: name, implementation and the one-line description shown
/// by the reference listing.
pub struct Builtin {
    pub name: &'static str,
    pub func: fn(&mut Vm, Args) -> Result<Value, RuntimeError>,
    pub description: &'static str,
}

/// All built-in functions of the host language.
pub static BUILTINS: &[Builtin] = &[
    // ── Output and conversion ───────────────────────────────────
    Builtin { name: "print", func: print, description: "Write values to the output sink" },
    Builtin { name: "str", func: str_, description: "String form of a value" },
    Builtin { name: "repr", func: repr, description: "Quoted, unambiguous form of a value" },
    Builtin { name: "int", func: int, description: "Convert to an integer" },
    Builtin { name: "float", func: float, description: "Convert to a float ('nan' and 'inf' accepted)" },
    Builtin { name: "bool", func: bool_, description: "Truthiness of a value" },
    Builtin { name: "list", func: list, description: "New list from an iterable" },
    Builtin { name: "tuple", func: tuple, description: "New tuple from an iterable" },
    Builtin { name: "dict", func: dict, description: "New dict from a mapping, pairs or keywords" },
    Builtin { name: "namespace", func: namespace, description: "Attribute bag from keywords" },
    // ── Sequences ───────────────────────────────────────────────
    Builtin { name: "len", func: len, description: "Number of items" },
    Builtin { name: "range", func: range, description: "List of integers in [start, stop) by step" },
    Builtin { name: "enumerate", func: enumerate, description: "(index, item) pairs" },
    Builtin { name: "zip", func: zip, description: "Tuples of corresponding items" },
    Builtin { name: "sorted", func: sorted, description: "Sorted list, optional key and reverse" },
    Builtin { name: "reversed", func: reversed, description: "Items in reverse order" },
    Builtin { name: "min", func: min, description: "Smallest item" },
    Builtin { name: "max", func: max, description: "Largest item" },
    Builtin { name: "sum", func: sum, description: "Sum of items" },
    Builtin { name: "any", func: any, description: "Whether any item is truthy" },
    Builtin { name: "all", func: all, description: "Whether every item is truthy" },
    Builtin { name: "abs", func: abs, description: "Absolute value" },
    // ── Introspection ───────────────────────────────────────────
    Builtin { name: "type", func: type_, description: "Class of a value" },
    Builtin { name: "isinstance", func: isinstance, description: "Whether a value is an instance of a class" },
    Builtin { name: "getattr", func: getattr, description: "Read an attribute, optional default" },
    Builtin { name: "setattr", func: setattr, description: "Write an attribute" },
    Builtin { name: "hasattr", func: hasattr, description: "Whether an attribute can be read" },
];

/// Exception classes and their base, in definition order.
static EXCEPTIONS: &[(&str, &str)] = &[
    ("Exception", ""),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("KeyError", "LookupError"),
    ("IndexError", "LookupError"),
    ("ValueError", "Exception"),
    ("TypeError", "Exception"),
    ("NameError", "Exception"),
    ("AttributeError", "Exception"),
    ("AssertionError", "Exception"),
    ("ImportError", "Exception"),
    ("RuntimeError", "Exception"),
    ("AssignmentError", "RuntimeError"),
    ("PropertyError", "AttributeError"),
];

pub fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// The builtins namespace of a fresh interpreter.
pub fn table() -> Attrs {
    let mut attrs = Attrs::new();
    for builtin in BUILTINS {
        attrs.insert(builtin.name.to_string(), Value::native(builtin.name, builtin.func));
    }
    let mut classes: Vec<Rc<Class>> = Vec::new();
    for (name, base) in EXCEPTIONS {
        let bases = classes.iter().filter(|c| c.name == *base).cloned().collect();
        let class = Class::new(*name, bases);
        if base.is_empty() {
            let mut class_attrs = class.attrs.borrow_mut();
            class_attrs.insert("__exception__".into(), Value::Bool(true));
            class_attrs.insert("__init__".into(), Value::native("__init__", exception_init));
        }
        let class = Rc::new(class);
        attrs.insert((*name).to_string(), Value::Class(Rc::clone(&class)));
        classes.push(class);
    }
    attrs
}

fn exception_init(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let mut positional = args.positional.into_iter();
    let Some(Value::Instance(inst)) = positional.next() else {
        return Err(RuntimeError::type_error("exception __init__ needs an instance"));
    };
    let rest: Vec<Value> = positional.collect();
    let message = match rest.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        many => ops::tuple(many.to_vec()).to_string(),
    };
    let mut attrs = inst.attrs.borrow_mut();
    attrs.insert("args".into(), ops::tuple(rest));
    attrs.insert("message".into(), Value::from(message));
    Ok(Value::None)
}

fn one(args: &Args, name: &str) -> Result<Value, RuntimeError> {
    args.check(name, 1, 1)?;
    Ok(args.get(0).cloned().unwrap_or(Value::None))
}

// ── Output and conversion ───────────────────────────────────────

fn print(vm: &mut Vm, mut args: Args) -> Result<Value, RuntimeError> {
    let sep = match args.take_keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(sep) => sep.to_string(),
    };
    let end = match args.take_keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(end) => end.to_string(),
    };
    args.check("print", 0, usize::MAX)?;
    let mut parts = Vec::with_capacity(args.len());
    for value in &args.positional {
        parts.push(vm.to_str(value)?);
    }
    vm.write_out(&(parts.join(&sep) + &end))?;
    Ok(Value::None)
}

fn str_(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("str", 0, 1)?;
    match args.get(0) {
        Some(value) => Ok(Value::from(vm.to_str(value)?)),
        None => Ok(Value::str("")),
    }
}

fn repr(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    Ok(Value::from(one(&args, "repr")?.repr()))
}

fn parse_int(text: &str, radix: u32) -> Option<i64> {
    let text = text.trim().replace('_', "");
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, text.strip_prefix('+').unwrap_or(&text).to_string()),
    };
    let lowered = digits.to_ascii_lowercase();
    let digits = match radix {
        16 => lowered.strip_prefix("0x").unwrap_or(&lowered),
        8 => lowered.strip_prefix("0o").unwrap_or(&lowered),
        2 => lowered.strip_prefix("0b").unwrap_or(&lowered),
        _ => &lowered,
    };
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn int(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("int", 0, 2)?;
    let radix = match args.get(1) {
        Some(base) => base
            .as_int()
            .and_then(|b| u32::try_from(b).ok())
            .filter(|b| (2..=36).contains(b))
            .ok_or_else(|| RuntimeError::value_error("int() base must be >= 2 and <= 36"))?,
        None => 10,
    };
    match args.get(0) {
        None => Ok(Value::Int(0)),
        Some(Value::Str(s)) => parse_int(s, radix)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::value_error(format!("invalid literal for int() with base {radix}: {}", Value::Str(s.clone()).repr()))),
        Some(Value::Float(f)) => ops::float_to_int(*f).map(Value::Int),
        Some(value @ (Value::Int(_) | Value::Bool(_))) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        Some(other) => Err(RuntimeError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("float", 0, 1)?;
    match args.get(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let text = s.trim().to_ascii_lowercase().replace('_', "");
            let parsed = match text.trim_start_matches(['+', '-']) {
                "nan" => Some(f64::NAN),
                "inf" | "infinity" => Some(if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }),
                _ => text.parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| RuntimeError::value_error(format!("could not convert string to float: {}", Value::Str(s.clone()).repr())))
        }
        Some(value) => value.as_float().map(Value::Float).ok_or_else(|| {
            RuntimeError::type_error(format!("float() argument must be a string or a number, not '{}'", value.type_name()))
        }),
    }
}

fn bool_(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("bool", 0, 1)?;
    Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
}

fn list(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("list", 0, 1)?;
    match args.get(0) {
        Some(iterable) => Ok(Value::list(vm.iterate(iterable)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn tuple(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("tuple", 0, 1)?;
    match args.get(0) {
        Some(iterable) => Ok(ops::tuple(vm.iterate(iterable)?)),
        None => Ok(ops::tuple(Vec::new())),
    }
}

fn dict(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    if args.len() > 1 {
        return Err(RuntimeError::type_error(format!("dict expected at most 1 argument, got {}", args.len())));
    }
    let mut entries = Dict::new();
    if let Some(source) = args.get(0) {
        entries.extend(methods::mapping_pairs(vm, source)?);
    }
    entries.extend(args.keywords.into_iter().map(|(k, v)| (Key::str(&k), v)));
    Ok(Value::dict(entries))
}

fn namespace(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    if !args.positional.is_empty() {
        return Err(RuntimeError::type_error("namespace() takes keyword arguments only"));
    }
    Ok(Value::namespace(args.keywords.into_iter().collect()))
}

// ── Sequences ───────────────────────────────────────────────────

fn len(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let n = match one(&args, "len")? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(entries) => entries.borrow().len(),
        Value::Namespace(ns) => ns.attrs.borrow().len(),
        other => {
            return Err(RuntimeError::type_error(format!("object of type '{}' has no len()", other.type_name())));
        }
    };
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn int_arg(value: &Value, name: &str) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!("'{}' object cannot be interpreted as an integer in {name}()", value.type_name()))
    })
}

fn range(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("range", 1, 3)?;
    let ints = args.positional.iter().map(|v| int_arg(v, "range")).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(out))
}

fn enumerate(vm: &mut Vm, mut args: Args) -> Result<Value, RuntimeError> {
    let start = match args.take_keyword("start").or_else(|| args.get(1).cloned()) {
        Some(start) => int_arg(&start, "enumerate")?,
        None => 0,
    };
    let items = vm.iterate(&one(&Args::new(args.positional.into_iter().take(1).collect()), "enumerate")?)?;
    Ok(Value::list(
        items.into_iter().zip(start..).map(|(item, i)| ops::tuple(vec![Value::Int(i), item])).collect(),
    ))
}

fn zip(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let mut columns = Vec::with_capacity(args.len());
    for iterable in &args.positional {
        columns.push(vm.iterate(iterable)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|row| ops::tuple(columns.iter().filter_map(|column| column.get(row).cloned()).collect()))
            .collect(),
    ))
}

fn sorted(vm: &mut Vm, mut args: Args) -> Result<Value, RuntimeError> {
    let key = args.take_keyword("key").unwrap_or(Value::None);
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
    let items = vm.iterate(&one(&args, "sorted")?)?;
    Ok(Value::list(methods::sorted(vm, items, &key, reverse)?))
}

fn reversed(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let mut items = vm.iterate(&one(&args, "reversed")?)?;
    items.reverse();
    Ok(Value::list(items))
}

fn extremum(vm: &mut Vm, mut args: Args, name: &str, keep: std::cmp::Ordering) -> Result<Value, RuntimeError> {
    let key = args.take_keyword("key").unwrap_or(Value::None);
    let default = args.take_keyword("default");
    let items = match args.positional.as_slice() {
        [single] => vm.iterate(single)?,
        _ => args.positional.clone(),
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = if key.is_none() { item.clone() } else { vm.call(&key, Args::new(vec![item.clone()]))? };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::order(&k, best_key)? == Some(keep),
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(RuntimeError::value_error(format!("{name}() arg is an empty sequence"))),
    }
}

fn min(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    extremum(vm, args, "min", std::cmp::Ordering::Less)
}

fn max(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    extremum(vm, args, "max", std::cmp::Ordering::Greater)
}

fn sum(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("sum", 1, 2)?;
    let items = vm.iterate(&args.positional[0])?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in items {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn any(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let items = vm.iterate(&one(&args, "any")?)?;
    Ok(Value::Bool(items.iter().any(Value::truthy)))
}

fn all(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    let items = vm.iterate(&one(&args, "all")?)?;
    Ok(Value::Bool(items.iter().all(Value::truthy)))
}

fn abs(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    match one(&args, "abs")? {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        value @ (Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::value_error("integer overflow")),
        other => Err(RuntimeError::type_error(format!("bad operand type for abs(): '{}'", other.type_name()))),
    }
}

// ── Introspection ───────────────────────────────────────────────

fn type_(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    Ok(match one(&args, "type")? {
        Value::Instance(inst) => Value::Class(Rc::clone(&inst.class)),
        other => Value::Class(Rc::new(Class::new(other.type_name(), Vec::new()))),
    })
}

/// Whether `value` is an instance of `class`, which is a class or one of the
/// conversion builtins standing in for a builtin type.
fn instance_of(value: &Value, class: &Value) -> Result<bool, RuntimeError> {
    match class {
        Value::Class(class) => Ok(match value {
            Value::Instance(inst) => is_subclass(&inst.class, class),
            _ => false,
        }),
        Value::Native(native) => Ok(match native.name.as_str() {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "namespace" => matches!(value, Value::Namespace(_)),
            name => value.type_name() == name,
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if instance_of(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(RuntimeError::type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not '{}'",
            other.type_name()
        ))),
    }
}

fn isinstance(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("isinstance", 2, 2)?;
    Ok(Value::Bool(instance_of(&args.positional[0], &args.positional[1])?))
}

fn attr_name<'a>(value: &'a Value, func: &str) -> Result<&'a str, RuntimeError> {
    value
        .as_str()
        .ok_or_else(|| RuntimeError::type_error(format!("{func}(): attribute name must be string")))
}

fn getattr(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("getattr", 2, 3)?;
    let name = attr_name(&args.positional[1], "getattr")?;
    match (vm.get_attr(&args.positional[0], name), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(RuntimeError::Attribute(_)), Some(default)) => Ok(default.clone()),
        (Err(err), _) => Err(err),
    }
}

fn setattr(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("setattr", 3, 3)?;
    let name = attr_name(&args.positional[1], "setattr")?;
    vm.set_attr(&args.positional[0], name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn hasattr(vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("hasattr", 2, 2)?;
    let name = attr_name(&args.positional[1], "hasattr")?;
    Ok(Value::Bool(vm.get_attr(&args.positional[0], name).is_ok()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::parser::parse_module;
    use crate::runtime::vm::OutputBuffer;

    fn output(source: &str) -> String {
        let out = OutputBuffer::new();
        let mut vm = Vm::new().with_output(out.clone());
        vm.exec_module(&parse_module(source, "<test>").unwrap()).unwrap();
        out.contents()
    }

    #[test]
    fn every_builtin_is_registered() {
        let table = table();
        for builtin in BUILTINS {
            assert!(table.contains_key(builtin.name), "{} missing", builtin.name);
        }
        assert!(lookup_builtin("print").is_some());
        assert!(lookup_builtin("nope").is_none());
    }

    #[test]
    fn conversions() {
        assert_eq!(output("print(int('0x1f', 16), int(' 42 '), int(3.9), float('nan'), float('-inf'))\n"), "31 42 3 nan -inf\n");
        assert_eq!(output("print(str(1.0), repr('a'), bool([]), list('ab'), tuple([1]))\n"), "1.0 'a' False ['a', 'b'] (1,)\n");
    }

    #[test]
    fn int_of_a_huge_float_overflows() {
        let source = "\
for v in [1e300, -1e300, float('inf')]:
    try:
        int(v)
    except ValueError as e:
        print(e)
";
        assert_eq!(output(source), "integer overflow\ninteger overflow\ncannot convert float inf to integer\n");
    }

    #[test]
    fn sequences() {
        assert_eq!(output("print(range(3), list(enumerate('ab', 1)), zip([1, 2], 'xyz'))\n"), "[0, 1, 2] [(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')]\n");
        assert_eq!(output("print(sorted([3, 1, 2], reverse=True), min(4, 2, 8), max(['a', 'bbb'], key=len), sum([1, 2, 3]))\n"), "[3, 2, 1] 2 bbb 6\n");
    }

    #[test]
    fn exception_hierarchy() {
        let table = table();
        let (Some(Value::Class(key)), Some(Value::Class(lookup))) = (table.get("KeyError"), table.get("LookupError")) else {
            panic!("exception classes missing");
        };
        assert!(is_subclass(key, lookup));
        assert!(key.lookup("__exception__").is_some());
    }

    #[test]
    fn isinstance_with_builtin_types() {
        assert_eq!(output("print(isinstance(1, int), isinstance('a', (int, str)), isinstance([], dict))\n"), "True True False\n");
    }
}
