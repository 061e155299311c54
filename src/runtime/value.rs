//! Runtime values of the host language.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::error::RuntimeError;
use super::object::HostObject;
use super::vm::{Env, Vm};
use crate::host::ast::FunctionDef;

pub type Dict = IndexMap<Key, Value>;
pub type Attrs = IndexMap<String, Value>;

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
    Function(Rc<Function>),
    /// A function produced by the closure decorator. Calling it pushes its
    /// self argument on the scope stack.
    Closure(Rc<Function>),
    Native(Rc<NativeFn>),
    Method(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Namespace(Rc<Namespace>),
    Object(Rc<dyn HostObject>),
}

/// Hashable projection of a value, used for dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Rc<[Key]>),
}

impl Key {
    pub fn str(s: &str) -> Self {
        Key::Str(s.into())
    }

    pub fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        Ok(match value {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Key::Int(*f as i64),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => {
                Key::Tuple(items.iter().map(Key::from_value).collect::<Result<Vec<_>, _>>()?.into())
            }
            other => {
                return Err(RuntimeError::type_error(format!("unhashable type: '{}'", other.type_name())));
            }
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Tuple(items) => Value::Tuple(items.iter().map(Key::to_value).collect()),
        }
    }
}

/// A user function closed over its defining scope.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub env: Env,
    /// Evaluated defaults for the trailing parameters that declare one.
    pub defaults: Vec<Value>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

pub type NativeCallback = dyn Fn(&mut Vm, Args) -> Result<Value, RuntimeError>;

pub struct NativeFn {
    pub name: String,
    pub func: Box<NativeCallback>,
}

/// A callable bound to its receiver.
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

pub enum Method {
    /// A user function found on the receiver's class.
    Function(Rc<Function>),
    /// A native function found on the receiver's class, called with the
    /// receiver prepended.
    Native(Rc<NativeFn>),
    /// A built-in or host method, dispatched by name on the receiver's type.
    Named(Rc<str>),
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<Attrs>,
}

impl Class {
    pub fn new(name: impl Into<String>, bases: Vec<Rc<Class>>) -> Self {
        Self { name: name.into(), bases, attrs: RefCell::new(Attrs::new()) }
    }

    /// Attribute lookup through the class and its bases, depth-first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.borrow().get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }
}

pub fn is_subclass(class: &Rc<Class>, of: &Rc<Class>) -> bool {
    Rc::ptr_eq(class, of) || class.bases.iter().any(|base| is_subclass(base, of))
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<Attrs>,
}

/// A bag of attributes. Dict configuration runs the closure against one of these.
#[derive(Default)]
pub struct Namespace {
    pub attrs: RefCell<Attrs>,
}

impl Namespace {
    pub fn new(attrs: Attrs) -> Self {
        Self { attrs: RefCell::new(attrs) }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }
}

/// Positional and keyword arguments of a call.
#[derive(Default, Clone)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self { positional, keywords: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Remove and return a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Fail unless the call passed between `min` and `max` positional arguments
    /// and no keywords.
    pub fn check(&self, name: &str, min: usize, max: usize) -> Result<(), RuntimeError> {
        if let Some((keyword, _)) = self.keywords.first() {
            return Err(RuntimeError::type_error(format!(
                "{name}() got an unexpected keyword argument '{keyword}'"
            )));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
            return Err(RuntimeError::type_error(format!(
                "{name}() takes {expected} arguments ({n} given)"
            )));
        }
        Ok(())
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn namespace(attrs: Attrs) -> Self {
        Value::Namespace(Rc::new(Namespace::new(attrs)))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        Value::Object(Rc::new(object))
    }

    /// Wrap a Rust closure as a callable host value.
    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&mut Vm, Args) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Value::Native(Rc::new(NativeFn { name: name.into(), func: Box::new(func) }))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Function(_) | Value::Closure(_) => "function".into(),
            Value::Native(_) => "builtin_function".into(),
            Value::Method(_) => "method".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(inst) => inst.class.name.clone(),
            Value::Namespace(_) => "namespace".into(),
            Value::Object(obj) => obj.type_name().to_string(),
        }
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Value::Function(_)
            | Value::Closure(_)
            | Value::Native(_)
            | Value::Method(_)
            | Value::Class(_) => true,
            Value::Instance(inst) => inst.class.lookup("__call__").is_some(),
            Value::Object(obj) => obj.is_callable(),
            _ => false,
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
            Value::Dict(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    /// Identity comparison (`is`). Scalars compare by value.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) | (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }

    /// Structural equality (`==`).
    #[allow(clippy::float_cmp)]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            (Value::Namespace(a), Value::Namespace(b)) => {
                let (a, b) = (a.attrs.borrow(), b.attrs.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => a.is_same(b),
            },
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => self.as_float(),
            _ => None,
        }
    }

    /// `repr()` form.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => repr_str(s),
            _ => self.to_string(),
        }
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

/// Quote a string the way `repr()` does, preferring single quotes.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
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
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[allow(clippy::float_cmp)]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

thread_local! {
    /// Containers whose contents are being formatted on this thread.
    static IN_REPR: RefCell<Vec<*const ()>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container as being formatted until dropped. Entering one that is
/// already marked yields `None`, so cycles print as `[...]`.
struct ReprGuard(*const ());

impl ReprGuard {
    fn enter(ptr: *const ()) -> Option<Self> {
        IN_REPR.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&ptr) {
                return None;
            }
            active.push(ptr);
            Some(Self(ptr))
        })
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        IN_REPR.with(|active| active.borrow_mut().retain(|p| *p != self.0));
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                let Some(_guard) = ReprGuard::enter(Rc::as_ptr(items).cast()) else {
                    return write!(f, "[...]");
                };
                let items: Vec<_> = items.borrow().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Tuple(items) => match &items[..] {
                [only] => write!(f, "({},)", only.repr()),
                items => {
                    let items: Vec<_> = items.iter().map(Value::repr).collect();
                    write!(f, "({})", items.join(", "))
                }
            },
            Value::Dict(entries) => {
                let Some(_guard) = ReprGuard::enter(Rc::as_ptr(entries).cast()) else {
                    return write!(f, "{{...}}");
                };
                let entries: Vec<_> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Closure(func) => write!(f, "<closure {}>", func.name()),
            Value::Native(native) => write!(f, "<built-in function {}>", native.name),
            Value::Method(method) => match &method.method {
                Method::Function(func) => write!(f, "<bound method {}.{}>", method.receiver.type_name(), func.name()),
                Method::Native(native) => write!(f, "<bound method {}.{}>", method.receiver.type_name(), native.name),
                Method::Named(name) => write!(f, "<bound method {}.{name}>", method.receiver.type_name()),
            },
            Value::Class(class) => write!(f, "<class '{}'>", class.name),
            Value::Instance(inst) => match inst.attrs.borrow().get("message") {
                Some(message) if inst.class.lookup("__exception__").is_some() => write!(f, "{message}"),
                _ => write!(f, "<{} object>", inst.class.name),
            },
            Value::Namespace(ns) => {
                let Some(_guard) = ReprGuard::enter(Rc::as_ptr(ns).cast()) else {
                    return write!(f, "namespace(...)");
                };
                let attrs: Vec<_> = ns.attrs.borrow().iter().map(|(k, v)| format!("{k}={}", v.repr())).collect();
                write!(f, "namespace({})", attrs.join(", "))
            }
            Value::Object(obj) => write!(f, "{}", obj.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_and_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0), Value::None]);
        assert_eq!(list.to_string(), "[1, 'a', 2.0, None]");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::Tuple(vec![Value::Int(1)].into()).to_string(), "(1,)");
    }

    #[test]
    fn self_referential_containers_print_an_ellipsis() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.to_string(), "[1, [...]]");

        let dict = Value::dict(Dict::new());
        if let Value::Dict(entries) = &dict {
            entries.borrow_mut().insert(Key::str("self"), dict.clone());
        }
        assert_eq!(dict.repr(), "{'self': {...}}");

        let shared = Value::list(vec![]);
        let pair = Value::list(vec![shared.clone(), shared]);
        assert_eq!(pair.to_string(), "[[], []]");
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::str("1"), Value::Int(1));
    }

    #[test]
    fn dict_keys() {
        assert_eq!(Key::from_value(&Value::Float(2.0)).unwrap(), Key::Int(2));
        assert!(Key::from_value(&Value::list(vec![])).is_err());
        let key = Key::from_value(&Value::Tuple(vec![Value::Int(1), Value::str("x")].into())).unwrap();
        assert_eq!(key.to_value().to_string(), "(1, 'x')");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::str("").truthy());
        assert!(Value::list(vec![Value::None]).truthy());
        assert!(!Value::Float(0.0).truthy());
    }

    #[test]
    fn argument_checks() {
        let args = Args::new(vec![Value::Int(1)]);
        assert!(args.check("f", 1, 2).is_ok());
        assert_eq!(args.check("f", 2, 2).unwrap_err().to_string(), "f() takes 2 arguments (1 given)");
    }
}
