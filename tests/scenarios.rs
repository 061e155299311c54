//! End-to-end scripts run against an embedder-provided project object.
//!
//! The project exposes a declared `name` property guarded by a property
//! owner, a `task` method returning configurable tasks, and extra names
//! through a name provider.

#![allow(clippy::unwrap_used)]

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use craftr_dsl::runtime::value::Namespace;
use craftr_dsl::runtime::{
    Args, Attrs, Configurable, HostObject, Member, NameProvider, OutputBuffer, PropertyOwner, RuntimeError, Value, Vm,
};
use craftr_dsl::{Driver, Error};

struct Task {
    name: String,
    attrs: Rc<Namespace>,
}

impl HostObject for Task {
    fn type_name(&self) -> &str {
        "Task"
    }

    fn get_attr(&self, name: &str) -> Member {
        match name {
            "name" => Member::Value(Value::str(&self.name)),
            _ => self.attrs.get(name).map_or(Member::Absent, Member::Value),
        }
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Configurable for Task {
    fn configure(&self, vm: &mut Vm, closure: Value) -> Result<Value, RuntimeError> {
        vm.call(&closure, Args::new(vec![Value::Namespace(Rc::clone(&self.attrs))]))
    }
}

#[derive(Default)]
struct Project {
    name: RefCell<Option<String>>,
    tasks: RefCell<Vec<Rc<Task>>>,
}

impl Project {
    fn task(&self, name: &str) -> Option<Rc<Task>> {
        self.tasks.borrow().iter().find(|t| t.name == name).cloned()
    }
}

impl HostObject for Project {
    fn type_name(&self) -> &str {
        "Project"
    }

    fn get_attr(&self, name: &str) -> Member {
        match name {
            "name" => self.name.borrow().as_deref().map_or(Member::Unset, |n| Member::Value(Value::str(n))),
            "tasks" => {
                let names = self.tasks.borrow().iter().map(|t| Value::str(&t.name)).collect();
                Member::Value(Value::list(names))
            }
            _ => Member::Absent,
        }
    }

    fn is_method(&self, name: &str) -> bool {
        name == "task"
    }

    fn call_method(&self, _vm: &mut Vm, name: &str, args: Args) -> Result<Value, RuntimeError> {
        match (name, args.get(0)) {
            ("task", Some(Value::Str(task))) => {
                let task = Rc::new(Task { name: task.to_string(), attrs: Rc::new(Namespace::new(Attrs::new())) });
                self.tasks.borrow_mut().push(Rc::clone(&task));
                Ok(Value::Object(task))
            }
            _ => Err(RuntimeError::type_error(format!("bad call to {name}()"))),
        }
    }

    fn as_property_owner(&self) -> Option<&dyn PropertyOwner> {
        Some(self)
    }

    fn as_name_provider(&self) -> Option<&dyn NameProvider> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PropertyOwner for Project {
    fn set_property(&self, _vm: &mut Vm, name: &str, value: Value) -> Result<bool, RuntimeError> {
        if name != "name" {
            return Ok(false);
        }
        let Some(text) = value.as_str() else {
            return Err(RuntimeError::Property(format!("'name' must be a str, not '{}'", value.type_name())));
        };
        *self.name.borrow_mut() = Some(text.to_owned());
        Ok(true)
    }
}

impl NameProvider for Project {
    fn lookup_name(&self, name: &str) -> Option<Value> {
        (name == "VERSION").then(|| Value::str("1.0"))
    }
}

fn run(source: &str) -> (Rc<Project>, Result<String, Error>) {
    let project = Rc::new(Project::default());
    let out = OutputBuffer::new();
    let mut vm = Vm::new().with_output(out.clone());
    let result = Driver::new().run(source, "build.craftr", Value::Object(project.clone()), &mut vm);
    assert_eq!(vm.runtime().depth(), 0);
    (project, result.map(|()| out.contents()))
}

#[test]
fn properties_and_provided_names() {
    let (project, output) = run("name = 'demo'\nprint(name, VERSION)\n");
    assert_eq!(output.unwrap(), "demo 1.0\n");
    assert_eq!(project.name.borrow().as_deref(), Some("demo"));
}

#[test]
fn property_owner_rejection_is_catchable() {
    let source = "\
try:
  name = 42
except AttributeError as e:
  print('rejected:', e)
";
    let (project, output) = run(source);
    assert_eq!(output.unwrap(), "rejected: 'name' must be a str, not 'int'\n");
    assert_eq!(*project.name.borrow(), None);
}

#[test]
fn every_attribute_write_form_goes_through_the_property_owner() {
    let source = "\
self.name = 'demo'
self.name += '-dev'
print(name)
self.name, count = 'lib', 2
print(name, count)
self.name = alias = 'app'
print(name, alias)
try:
  self.name, count = 3, 4
except PropertyError as e:
  print(e)
";
    let (project, output) = run(source);
    assert_eq!(output.unwrap(), "demo-dev\nlib 2\napp app\n'name' must be a str, not 'int'\n");
    assert_eq!(project.name.borrow().as_deref(), Some("app"));
}

#[test]
fn unset_property_is_an_attribute_error() {
    let (_project, output) = run("print(name)\n");
    let err = output.unwrap_err();
    let source = err.as_runtime().unwrap();
    assert_eq!(source.to_string(), "property 'name' of 'Project' object has no value");
}

#[test]
fn methods_cannot_be_shadowed() {
    let (_project, output) = run("task = 1\n");
    assert!(matches!(output.unwrap_err().as_runtime(), Some(RuntimeError::CannotAssign { name, .. }) if name == "task"));
}

#[test]
fn configurable_tasks_receive_their_block() {
    let source = "\
task('compile') {
  command = 'cc'
  args = ['-O2']
}
print(tasks)
";
    let (project, output) = run(source);
    assert_eq!(output.unwrap(), "['compile']\n");
    let task = project.task("compile").unwrap();
    assert_eq!(task.attrs.get("command"), Some(Value::str("cc")));
    assert_eq!(task.attrs.get("args").map(|v| v.to_string()), Some("['-O2']".to_string()));
}

#[test]
fn blocks_see_the_locals_of_the_calling_function() {
    let source = "\
def build(kind):
  out = kind + '.o'
  task(kind) {
    command = 'cc -o ' + out
  }
build('main')
";
    let (project, output) = run(source);
    output.unwrap();
    let task = project.task("main").unwrap();
    assert_eq!(task.attrs.get("command"), Some(Value::str("cc -o main.o")));
}

#[test]
fn arrow_closures_are_plain_callables() {
    let (_project, output) = run("double = (x) -> x * 2\nprint(double(21))\n");
    assert_eq!(output.unwrap(), "42\n");
}

#[test]
fn nested_blocks_resolve_innermost_first() {
    let source = "\
config = namespace(level=1, inner=namespace(level=2))
config {
  print(level)
  inner {
    print(level)
  }
  print(level)
}
";
    let (_project, output) = run(source);
    assert_eq!(output.unwrap(), "1\n2\n1\n");
}

#[test]
fn failing_block_leaves_the_stack_balanced() {
    let source = "\
config = namespace()
try:
  config {
    missing_name
  }
except NameError as e:
  print('caught')
print(VERSION)
";
    let (_project, output) = run(source);
    assert_eq!(output.unwrap(), "caught\n1.0\n");
}

#[test]
fn yaml_macro_splices_a_literal() {
    let source = "\
deps = !yaml {
  lib: [a, b]
  debug: true
}
print(deps['lib'], deps['debug'])
";
    let (_project, output) = run(source);
    assert_eq!(output.unwrap(), "['a', 'b'] True\n");
}
