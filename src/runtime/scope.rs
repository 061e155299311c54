use std::cell::RefCell;
use std::rc::Rc;

use super::value::Value;
use super::vm::Env;

/// One layer of the dynamic scope stack.
#[derive(Clone)]
pub enum ScopeEntry {
    /// A closure target or the root context.
    Object(Value),
    /// Locals of the code that called `configure_object`.
    Locals(Env),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Nothing pushed. Only the globals and builtins resolve.
    Idle,
    /// At least the root context is on the stack.
    Executing,
}

/// The dynamic scope stack. Owned by a single interpreter, so each thread of
/// execution has its own.
#[derive(Default)]
pub struct Runtime {
    stack: RefCell<Vec<ScopeEntry>>,
}

/// Pops everything pushed since it was created when dropped, on success and
/// error paths alike.
#[must_use = "the entry is popped as soon as the guard is dropped"]
pub struct ScopeGuard {
    runtime: Rc<Runtime>,
    depth: usize,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.runtime.stack.borrow_mut().truncate(self.depth);
    }
}

impl Runtime {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Push `entry` as the innermost layer until the guard drops.
    pub fn push(self: &Rc<Self>, entry: ScopeEntry) -> ScopeGuard {
        let mut stack = self.stack.borrow_mut();
        let depth = stack.len();
        stack.push(entry);
        ScopeGuard { runtime: Rc::clone(self), depth }
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn state(&self) -> RuntimeState {
        if self.stack.borrow().is_empty() {
            RuntimeState::Idle
        } else {
            RuntimeState::Executing
        }
    }

    /// Innermost object layer, the implicit `self` of closures called without one.
    pub fn top(&self) -> Option<Value> {
        self.stack.borrow().iter().rev().find_map(|entry| match entry {
            ScopeEntry::Object(value) => Some(value.clone()),
            ScopeEntry::Locals(_) => None,
        })
    }

    /// Snapshot of the stack, outermost first. Resolution iterates over a
    /// snapshot so that host calls made during the walk may push and pop.
    pub fn entries(&self) -> Vec<ScopeEntry> {
        self.stack.borrow().clone()
    }

    /// Type names of the layers, innermost first, for error messages.
    pub fn summary(&self) -> Vec<String> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .map(|entry| match entry {
                ScopeEntry::Object(value) => value.type_name(),
                ScopeEntry::Locals(_) => "<locals>".to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn guards_pop_in_any_order() {
        let runtime = Runtime::new();
        assert_eq!(runtime.state(), RuntimeState::Idle);
        let outer = runtime.push(ScopeEntry::Object(Value::Int(1)));
        let inner = runtime.push(ScopeEntry::Object(Value::Int(2)));
        assert_eq!(runtime.top(), Some(Value::Int(2)));
        drop(outer);
        assert_eq!(runtime.depth(), 0);
        drop(inner);
        assert_eq!(runtime.state(), RuntimeState::Idle);
    }

    #[test]
    fn top_skips_locals_layers() {
        let runtime = Runtime::new();
        let _root = runtime.push(ScopeEntry::Object(Value::str("root")));
        let _locals = runtime.push(ScopeEntry::Locals(Env::module()));
        assert_eq!(runtime.top(), Some(Value::str("root")));
        assert_eq!(runtime.summary(), vec!["<locals>".to_string(), "str".to_string()]);
    }

    #[test]
    fn popped_on_error_path() {
        fn fails(runtime: &Rc<Runtime>) -> Result<(), String> {
            let _guard = runtime.push(ScopeEntry::Object(Value::None));
            Err("boom".into())
        }
        let runtime = Runtime::new();
        assert!(fails(&runtime).is_err());
        assert_eq!(runtime.depth(), 0);
    }
}
