//! Dynamic name resolution and the configuration protocol.
//!
//! Free names in transpiled code are read through [`Vm::lookup`] and written
//! through [`Vm::set`]. Both walk the same layers: the executing frame, the
//! scope stack from innermost to outermost, then the module globals and the
//! builtins.

use std::rc::Rc;

use super::error::RuntimeError;
use super::methods;
use super::object::Member;
use super::scope::{ScopeEntry, ScopeGuard};
use super::value::{Args, Attrs, Key, Namespace, Value};
use super::vm::{bind, FrameKind, Vm};

/// Attributes a dict proxy never copies back into the dict.
const RESERVED_PROXY_NAMES: &[&str] = &["__doc__", "__dict__", "__module__", "__repr__", "__weakref__"];

impl Vm {
    /// Read a free name.
    pub fn lookup(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let frame = self.current_env();
        if let Some(value) = frame.get(name) {
            return Ok(value);
        }
        if frame.kind() == FrameKind::Class {
            if let Some(value) = frame.parent().and_then(|parent| parent.get(name)) {
                return Ok(value);
            }
        }
        for entry in self.runtime().entries().into_iter().rev() {
            match entry {
                ScopeEntry::Object(target) => {
                    if let Some(value) = self.lookup_member(&target, name)? {
                        return Ok(value);
                    }
                }
                ScopeEntry::Locals(env) => {
                    if let Some(value) = env.get(name) {
                        return Ok(value);
                    }
                }
            }
        }
        if let Some(value) = self.global(name).or_else(|| self.builtin(name)) {
            return Ok(value);
        }
        tracing::debug!(name, depth = self.runtime().depth(), "name not found");
        Err(RuntimeError::NameNotFound { name: name.to_string(), scopes: self.runtime().summary() })
    }

    /// Member `name` of a scope-stack object, or `None` when it has none.
    /// A declared but unset property is an error rather than a miss.
    pub fn lookup_member(&mut self, target: &Value, name: &str) -> Result<Option<Value>, RuntimeError> {
        Ok(match target {
            Value::None => None,
            Value::Dict(entries) => entries.borrow().get(&Key::str(name)).cloned(),
            Value::Namespace(ns) => ns.get(name),
            Value::Object(obj) => match obj.get_attr(name) {
                Member::Value(value) => Some(value),
                Member::Unset => return self.get_attr(target, name).map(Some),
                Member::Absent if obj.is_method(name) => Some(self.get_attr(target, name)?),
                Member::Absent => obj.as_name_provider().and_then(|provider| provider.lookup_name(name)),
            },
            _ => self.optional_attr(target, name),
        })
    }

    /// Whether `target` declares `name`, set or not.
    pub fn has_member(&self, target: &Value, name: &str) -> bool {
        match target {
            Value::Dict(entries) => entries.borrow().contains_key(&Key::str(name)),
            Value::Namespace(ns) => ns.attrs.borrow().contains_key(name),
            Value::Instance(inst) => inst.attrs.borrow().contains_key(name) || inst.class.lookup(name).is_some(),
            Value::Class(class) => class.lookup(name).is_some(),
            Value::Object(obj) => !matches!(obj.get_attr(name), Member::Absent) || obj.is_method(name),
            _ => false,
        }
    }

    /// Whether `name` is behavior rather than data on `target`.
    pub fn is_method_member(&self, target: &Value, name: &str) -> bool {
        match target {
            Value::Instance(inst) => {
                !inst.attrs.borrow().contains_key(name)
                    && matches!(inst.class.lookup(name), Some(Value::Function(_) | Value::Native(_)))
            }
            Value::Object(obj) => obj.is_method(name),
            Value::Dict(_) | Value::Namespace(_) | Value::Class(_) => false,
            other => methods::has_method(other, name),
        }
    }

    /// Write a free name.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let frame = self.current_env();
        if frame.contains(name) {
            frame.set(name, value);
            return Ok(());
        }
        for entry in self.runtime().entries().into_iter().rev() {
            match entry {
                ScopeEntry::Object(target) => {
                    if self.is_method_member(&target, name) {
                        return Err(RuntimeError::CannotAssign {
                            name: name.to_string(),
                            reason: format!("it is a method of '{}'", target.type_name()),
                        });
                    }
                    if self.has_member(&target, name) {
                        return self.set_object_property(&target, name, value);
                    }
                }
                ScopeEntry::Locals(env) => {
                    if env.contains(name) {
                        return Err(cannot_assign_outer(name, "nonlocal"));
                    }
                }
            }
        }
        if frame.kind() != FrameKind::Module {
            if frame.enclosing_with(name).is_some() {
                return Err(cannot_assign_outer(name, "nonlocal"));
            }
            if self.globals().contains(name) {
                return Err(cannot_assign_outer(name, "global"));
            }
        }
        if frame.kind() == FrameKind::Closure {
            if let Some(delegate) = frame.delegate().filter(|d| !d.is_none()) {
                return self.set_object_property(&delegate, name, value);
            }
        }
        frame.set(name, value);
        Ok(())
    }

    /// Assign `target.name = value`, giving a property owner first refusal.
    /// A declined write or an attribute error from the owner falls back to a
    /// plain attribute write; any other error propagates.
    pub fn set_object_property(&mut self, target: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        if let Value::Object(obj) = target {
            let obj = Rc::clone(obj);
            if let Some(owner) = obj.as_property_owner() {
                match owner.set_property(self, name, value.clone()) {
                    Ok(true) => return Ok(()),
                    Ok(false) | Err(RuntimeError::Attribute(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        match target {
            Value::Dict(entries) => {
                entries.borrow_mut().insert(Key::str(name), value);
                Ok(())
            }
            _ => self.set_attr(target, name, value),
        }
    }

    /// Run `closure` against `target`: its own `configure` if it has one, a
    /// namespace proxy for dicts, otherwise the target itself.
    pub fn configure_object(&mut self, target: &Value, closure: &Value) -> Result<Value, RuntimeError> {
        let _locals = self.push_caller_locals();
        self.configure(target, closure)
    }

    /// Lowering of `target { ... }`: a callable target receives the closure,
    /// anything else is configured by it.
    pub fn call_block(&mut self, target: &Value, closure: &Value) -> Result<Value, RuntimeError> {
        let _locals = self.push_caller_locals();
        if target.is_callable() {
            self.call(target, Args::new(vec![closure.clone()]))
        } else {
            self.configure(target, closure)
        }
    }

    fn push_caller_locals(&self) -> Option<ScopeGuard> {
        let caller = self.current_env();
        (caller.kind() != FrameKind::Module).then(|| self.runtime().push(ScopeEntry::Locals(caller)))
    }

    fn configure(&mut self, target: &Value, closure: &Value) -> Result<Value, RuntimeError> {
        match target {
            Value::Object(obj) => {
                let obj = Rc::clone(obj);
                if let Some(configurable) = obj.as_configurable() {
                    return configurable.configure(self, closure.clone());
                }
            }
            Value::Instance(inst) => {
                if let Some(method) = inst.class.lookup("configure") {
                    let bound = bind(target, method);
                    return self.call(&bound, Args::new(vec![closure.clone()]));
                }
            }
            Value::Dict(entries) => {
                let attrs: Attrs = entries
                    .borrow()
                    .iter()
                    .filter_map(|(key, value)| match key {
                        Key::Str(name) => Some((name.to_string(), value.clone())),
                        _ => None,
                    })
                    .collect();
                let proxy = Rc::new(Namespace::new(attrs));
                self.call(closure, Args::new(vec![Value::Namespace(Rc::clone(&proxy))]))?;
                let mut entries = entries.borrow_mut();
                entries.retain(|key, _| !matches!(key, Key::Str(_)));
                for (name, value) in proxy.attrs.borrow().iter() {
                    if !RESERVED_PROXY_NAMES.contains(&name.as_str()) {
                        entries.insert(Key::str(name), value.clone());
                    }
                }
                return Ok(target.clone());
            }
            _ => {}
        }
        self.call(closure, Args::new(vec![target.clone()]))?;
        Ok(target.clone())
    }
}

fn cannot_assign_outer(name: &str, keyword: &str) -> RuntimeError {
    RuntimeError::CannotAssign {
        name: name.to_string(),
        reason: format!("it belongs to an enclosing scope; declare it '{keyword}' to rebind it"),
    }
}
