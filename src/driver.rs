//! Compile and run DSL scripts.
//!
//! The driver ties the pipeline together: it compiles source with the
//! configured options and macro plugins, then executes the module on an
//! interpreter whose runtime has the caller's context as its bottom layer.

use std::path::Path;

use crate::dsl::{self, macros::MacroRegistry};
use crate::error::{Error, Result};
use crate::host::ast::Module;
use crate::host::unparse::unparse_module;
use crate::runtime::{RuntimeObject, ScopeEntry, Value, Vm};
use crate::settings::TranspileOptions;

/// Names accepted by [`builtin_context`].
pub const CONTEXT_NAMES: &[&str] = &["void", "namespace"];

/// One of the root contexts available without an embedding application:
/// `void` (nothing to resolve against) or `namespace` (an empty attribute bag).
pub fn builtin_context(name: &str) -> Option<Value> {
    match name {
        "void" => Some(Value::None),
        "namespace" => Some(Value::namespace(crate::runtime::Attrs::new())),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Driver {
    options: TranspileOptions,
    macros: MacroRegistry,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    /// Default options with the built-in macro plugins.
    pub fn new() -> Self {
        Self { options: TranspileOptions::default(), macros: MacroRegistry::with_builtins() }
    }

    pub fn with_options(mut self, options: TranspileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_macros(mut self, macros: MacroRegistry) -> Self {
        self.macros = macros;
        self
    }

    pub fn options(&self) -> &TranspileOptions {
        &self.options
    }

    pub fn compile(&self, source: &str, filename: &str) -> Result<Module> {
        Ok(dsl::compile_source(source, filename, &self.options, &self.macros)?)
    }

    /// The transpiled module printed as host source.
    pub fn transpile(&self, source: &str, filename: &str) -> Result<String> {
        Ok(unparse_module(&self.compile(source, filename)?))
    }

    /// Compile `source` and execute it on `vm` with `context` as the root of
    /// the scope stack. The stack is back to its previous depth afterwards,
    /// whether or not the script failed.
    pub fn run(&self, source: &str, filename: &str, context: Value, vm: &mut Vm) -> Result<()> {
        let module = self.compile(source, filename)?;
        self.execute(&module, filename, context, vm)
    }

    pub fn run_file(&self, path: &Path, context: Value, vm: &mut Vm) -> Result<()> {
        let source = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        self.run(&source, &path.display().to_string(), context, vm)
    }

    pub fn execute(&self, module: &Module, filename: &str, context: Value, vm: &mut Vm) -> Result<()> {
        vm.set_global(&self.options.runtime_name, Value::object(RuntimeObject));
        vm.set_global("self", context.clone());
        let _root = vm.runtime().push(ScopeEntry::Object(context));
        tracing::debug!(filename, statements = module.body.len(), "executing module");
        vm.exec_module(module).map_err(|source| Error::Runtime {
            filename: filename.to_string(),
            line: vm.error_line(),
            source,
        })
    }
}

/// [`Driver::transpile`] with the given options and the built-in macros.
pub fn transpile_source(source: &str, filename: &str, options: &TranspileOptions) -> Result<String> {
    Driver::new().with_options(options.clone()).transpile(source, filename)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::runtime::{Args, Attrs, OutputBuffer, RuntimeState};

    fn vm() -> (Vm, OutputBuffer) {
        let out = OutputBuffer::new();
        (Vm::new().with_output(out.clone()), out)
    }

    /// Native function calling its block argument without a target.
    fn invoke_block() -> Value {
        Value::native("invoke", |vm, args| {
            let closure = args.get(0).cloned().unwrap_or(Value::None);
            vm.call(&closure, Args::default())
        })
    }

    #[test]
    fn block_reads_names_from_the_context() {
        let (mut vm, out) = vm();
        let mut attrs = Attrs::new();
        attrs.insert("name".into(), Value::str("world"));
        attrs.insert("greet".into(), invoke_block());
        Driver::new()
            .run("greet { print(name) }\n", "<test>", Value::namespace(attrs), &mut vm)
            .unwrap();
        assert_eq!(out.contents(), "world\n");
        assert_eq!(vm.runtime().state(), RuntimeState::Idle);
    }

    #[test]
    fn outer_local_definition_is_readable_in_a_block() {
        let (mut vm, out) = vm();
        let mut attrs = Attrs::new();
        attrs.insert("foo".into(), invoke_block());
        let context = Value::namespace(attrs);
        Driver::new().run("let x = 1\nfoo { x }\nfoo { print(x) }\n", "<test>", context, &mut vm).unwrap();
        assert_eq!(out.contents(), "1\n");
    }

    #[test]
    fn unmatched_brace_is_a_syntax_error() {
        let err = Driver::new().compile("foo {\n  bar()\n", "build.craftr").unwrap_err();
        let Error::Syntax(err) = &err else {
            panic!("expected a syntax error, got {err}");
        };
        assert_eq!(err.text_hint(), "foo {\n~~~~^");
        assert!(err.to_string().contains("in build.craftr at line 1"));
    }

    #[test]
    fn runtime_error_reports_the_line() {
        let (mut vm, _out) = vm();
        let err = Driver::new().run("a = 1\nb = a / 0\n", "build.craftr", Value::None, &mut vm).unwrap_err();
        let Error::Runtime { line, source, .. } = &err else {
            panic!("expected a runtime error, got {err}");
        };
        assert_eq!(*line, Some(2));
        assert_eq!(source.class_name(), "ZeroDivisionError");
        assert_eq!(vm.runtime().depth(), 0);
    }

    #[test]
    fn configure_blocks_write_to_their_target() {
        let (mut vm, out) = vm();
        let source = "\
project = namespace(name=None, version=None)
project {
  name = 'demo'
  version = '1.0'
}
print(project.name, project.version)
";
        Driver::new().run(source, "<test>", Value::None, &mut vm).unwrap();
        assert_eq!(out.contents(), "demo 1.0\n");
    }

    #[test]
    fn dict_targets_are_configured_through_a_proxy() {
        let (mut vm, out) = vm();
        let source = "\
settings = {'debug': False}
settings {
  debug = True
  level = 3
}
print(settings)
";
        Driver::new().run(source, "<test>", Value::None, &mut vm).unwrap();
        assert_eq!(out.contents(), "{'debug': True, 'level': 3}\n");
    }

    #[test]
    fn transpile_only_prints_host_source() {
        let code = transpile_source("x = 1\n", "<test>", &TranspileOptions::default()).unwrap();
        assert_eq!(code, "__runtime__['x'] = 1\n");
    }

    #[test]
    fn builtin_contexts() {
        assert!(builtin_context("void").is_some_and(|v| v.is_none()));
        assert_eq!(builtin_context("namespace").map(|v| v.type_name()), Some("namespace".to_string()));
        assert!(builtin_context("project").is_none());
    }
}
