//! Extension points for objects supplied by the embedding application.
//!
//! Context objects, configuration targets and anything else handed to host
//! code from Rust implement [`HostObject`]. The optional capabilities
//! ([`Configurable`], [`PropertyOwner`], [`NameProvider`]) plug into the
//! runtime's name resolution and configuration protocol.

use std::any::Any;

use super::error::RuntimeError;
use super::value::{Args, Value};
use super::vm::Vm;

/// Result of reading a member of a host object.
#[derive(Debug, Clone)]
pub enum Member {
    Value(Value),
    /// Declared on the object's type but holding no value yet. Reading it is
    /// an attribute error rather than a miss.
    Unset,
    Absent,
}

pub trait HostObject: Any {
    fn type_name(&self) -> &str;

    fn get_attr(&self, _name: &str) -> Member {
        Member::Absent
    }

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), RuntimeError> {
        Err(RuntimeError::no_attribute(self.type_name(), name))
    }

    /// Whether `name` is a method, callable through [`HostObject::call_method`].
    fn is_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, _vm: &mut Vm, name: &str, _args: Args) -> Result<Value, RuntimeError> {
        Err(RuntimeError::no_attribute(self.type_name(), name))
    }

    fn is_callable(&self) -> bool {
        false
    }

    fn call(&self, _vm: &mut Vm, _args: Args) -> Result<Value, RuntimeError> {
        Err(RuntimeError::type_error(format!("'{}' object is not callable", self.type_name())))
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }

    fn as_property_owner(&self) -> Option<&dyn PropertyOwner> {
        None
    }

    fn as_name_provider(&self) -> Option<&dyn NameProvider> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Objects that run configuration closures themselves.
pub trait Configurable {
    fn configure(&self, vm: &mut Vm, closure: Value) -> Result<Value, RuntimeError>;
}

/// Objects with a property model of their own.
pub trait PropertyOwner {
    /// Store `value` under `name`. `Ok(false)` declines, and the runtime falls
    /// back to a plain attribute write.
    fn set_property(&self, vm: &mut Vm, name: &str, value: Value) -> Result<bool, RuntimeError>;
}

/// Objects that can resolve names beyond their attributes.
pub trait NameProvider {
    fn lookup_name(&self, name: &str) -> Option<Value>;
}
