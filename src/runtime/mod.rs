//! Name-resolution runtime and the interpreter that executes transpiled code.
//!
//! Transpiled modules reach the runtime through a single global (by default
//! `__runtime__`) bound to a [`RuntimeObject`]. Its methods are thin wrappers
//! over the resolution operations implemented on [`Vm`].

#[allow(
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::needless_pass_by_value,
)]
pub mod builtins;
pub mod error;
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::needless_pass_by_value,
)]
pub mod methods;
pub mod object;
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
)]
pub mod ops;
mod resolve;
pub mod scope;
#[allow(clippy::wildcard_imports)]
pub mod value;
#[allow(
    clippy::wildcard_imports,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
)]
pub mod vm;

use std::any::Any;

pub use error::RuntimeError;
pub use object::{Configurable, HostObject, Member, NameProvider, PropertyOwner};
pub use scope::{Runtime, RuntimeState, ScopeEntry, ScopeGuard};
pub use value::{Args, Attrs, Value};
pub use vm::{OutputBuffer, Vm};

/// Methods the runtime object exposes to transpiled code.
const METHODS: &[&str] = &[
    "__getitem__",
    "__setitem__",
    "lookup",
    "set",
    "closure",
    "configure_object",
    "call_block",
    "set_object_property",
];

/// The object transpiled code resolves names through.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeObject;

impl HostObject for RuntimeObject {
    fn type_name(&self) -> &str {
        "Runtime"
    }

    fn is_method(&self, name: &str) -> bool {
        METHODS.contains(&name)
    }

    fn call_method(&self, vm: &mut Vm, name: &str, args: Args) -> Result<Value, RuntimeError> {
        match name {
            "__getitem__" | "lookup" => {
                args.check(name, 1, 1)?;
                let key = name_arg(&args, 0)?;
                vm.lookup(&key)
            }
            "__setitem__" | "set" => {
                args.check(name, 2, 2)?;
                let key = name_arg(&args, 0)?;
                vm.set(&key, arg(&args, 1))?;
                Ok(Value::None)
            }
            "closure" => {
                args.check(name, 0, 0)?;
                Ok(Value::native("closure", make_closure))
            }
            "configure_object" => {
                args.check(name, 2, 2)?;
                vm.configure_object(&arg(&args, 0), &arg(&args, 1))
            }
            "call_block" => {
                args.check(name, 2, 2)?;
                vm.call_block(&arg(&args, 0), &arg(&args, 1))
            }
            "set_object_property" => {
                args.check(name, 3, 3)?;
                let key = name_arg(&args, 1)?;
                vm.set_object_property(&arg(&args, 0), &key, arg(&args, 2))?;
                Ok(Value::None)
            }
            _ => Err(RuntimeError::no_attribute(self.type_name(), name)),
        }
    }

    fn repr(&self) -> String {
        "<runtime>".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn arg(args: &Args, index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::None)
}

fn name_arg(args: &Args, index: usize) -> Result<String, RuntimeError> {
    match args.get(index) {
        Some(Value::Str(name)) => Ok(name.to_string()),
        Some(other) => Err(RuntimeError::type_error(format!("names must be str, not '{}'", other.type_name()))),
        None => Err(RuntimeError::type_error("missing name argument")),
    }
}

/// The decorator returned by `closure()`: marks a function as a closure.
fn make_closure(_vm: &mut Vm, args: Args) -> Result<Value, RuntimeError> {
    args.check("closure", 1, 1)?;
    match args.get(0) {
        Some(Value::Function(func) | Value::Closure(func)) => Ok(Value::Closure(func.clone())),
        Some(other) => Err(RuntimeError::type_error(format!("cannot make a closure of '{}'", other.type_name()))),
        None => Err(RuntimeError::type_error("closure() needs a function")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::parser::parse_module;

    fn run(vm: &mut Vm, source: &str) -> Result<(), RuntimeError> {
        let module = parse_module(source, "<test>").unwrap();
        vm.exec_module(&module)
    }

    fn vm_with_runtime() -> (Vm, OutputBuffer) {
        let out = OutputBuffer::new();
        let mut vm = Vm::new().with_output(out.clone());
        vm.set_global("__runtime__", Value::object(RuntimeObject));
        (vm, out)
    }

    #[test]
    fn subscript_reads_and_writes_go_through_resolution() {
        let (mut vm, out) = vm_with_runtime();
        let mut attrs = Attrs::new();
        attrs.insert("name".into(), Value::str("world"));
        let _ctx = vm.runtime().push(ScopeEntry::Object(Value::namespace(attrs)));
        run(&mut vm, "__runtime__['print'](__runtime__['name'])\n__runtime__['name'] = 'there'\n").unwrap();
        assert_eq!(out.contents(), "world\n");
        assert_eq!(vm.lookup("name").unwrap(), Value::str("there"));
    }

    #[test]
    fn closure_pushes_its_explicit_target() {
        let (mut vm, out) = vm_with_runtime();
        let source = "\
@__runtime__.closure()
def body(self):
    __runtime__['print'](__runtime__['version'])
    __runtime__['version'] = 2
target = namespace(version=1)
body(target)
print(target.version)
";
        run(&mut vm, source).unwrap();
        assert_eq!(out.contents(), "1\n2\n");
        assert_eq!(vm.runtime().depth(), 0);
    }

    #[test]
    fn scope_stack_is_restored_when_a_closure_raises() {
        let (mut vm, _out) = vm_with_runtime();
        let source = "\
@__runtime__.closure()
def body(self):
    raise ValueError('boom')
body(namespace())
";
        let err = run(&mut vm, source).unwrap_err();
        assert_eq!(err.class_name(), "ValueError");
        assert_eq!(vm.runtime().depth(), 0);
    }

    #[test]
    fn writes_to_enclosing_function_locals_are_rejected() {
        let (mut vm, _out) = vm_with_runtime();
        let source = "\
def outer():
    count = 0
    @__runtime__.closure()
    def body(self):
        __runtime__['count'] = 1
    body(namespace())
outer()
";
        let err = run(&mut vm, source).unwrap_err();
        assert!(matches!(&err, RuntimeError::CannotAssign { name, .. } if name == "count"), "{err}");
        assert!(err.to_string().contains("nonlocal"));
    }

    #[test]
    fn closure_decorator_rejects_non_functions() {
        let (mut vm, _out) = vm_with_runtime();
        let err = run(&mut vm, "__runtime__.closure()(1)\n").unwrap_err();
        assert_eq!(err.to_string(), "cannot make a closure of 'int'");
    }
}
