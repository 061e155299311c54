//! Tree-walking evaluator for host programs.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use super::builtins;
use super::error::RuntimeError;
use super::methods;
use super::object::Member;
use super::ops;
use super::scope::{Runtime, ScopeEntry};
use super::value::*;
use crate::host::ast::*;

/// Maximum call depth to stop runaway recursion.
const MAX_DEPTH: usize = 100;

/// Native stack the interpreter may use below its outermost call. Kept well
/// under the 2 MiB of a default spawned thread so unoptimized builds raise
/// instead of overflowing.
const STACK_BUDGET: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Function,
    /// Body of a function produced by the closure decorator.
    Closure,
    Class,
}

pub struct Frame {
    vars: Attrs,
    parent: Option<Env>,
    kind: FrameKind,
    globals: Vec<String>,
    nonlocals: Vec<String>,
    /// The object a closure frame writes unknown names to.
    delegate: Option<Value>,
}

/// A shared, mutable variable frame. Functions capture the frame they were
/// defined in.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Frame>>);

impl Env {
    pub fn module() -> Self {
        Self::new(FrameKind::Module, None)
    }

    fn new(kind: FrameKind, parent: Option<Env>) -> Self {
        Self(Rc::new(RefCell::new(Frame {
            vars: Attrs::new(),
            parent,
            kind,
            globals: Vec::new(),
            nonlocals: Vec::new(),
            delegate: None,
        })))
    }

    pub fn child(&self, kind: FrameKind) -> Self {
        Self::new(kind, Some(self.clone()))
    }

    pub fn kind(&self) -> FrameKind {
        self.0.borrow().kind
    }

    pub fn parent(&self) -> Option<Env> {
        self.0.borrow().parent.clone()
    }

    pub fn delegate(&self) -> Option<Value> {
        self.0.borrow().delegate.clone()
    }

    fn set_delegate(&self, delegate: Option<Value>) {
        self.0.borrow_mut().delegate = delegate;
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().vars.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().vars.contains_key(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.borrow_mut().vars.insert(name.to_string(), value);
    }

    pub fn names(&self) -> Vec<String> {
        self.0.borrow().vars.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Attrs {
        self.0.borrow().vars.clone()
    }

    pub fn declares_global(&self, name: &str) -> bool {
        self.0.borrow().globals.iter().any(|n| n == name)
    }

    pub fn declares_nonlocal(&self, name: &str) -> bool {
        self.0.borrow().nonlocals.iter().any(|n| n == name)
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Nearest enclosing function-like frame holding `name`, skipping class
    /// bodies and the module frame.
    pub fn enclosing_with(&self, name: &str) -> Option<Env> {
        let mut current = self.parent();
        while let Some(env) = current {
            match env.kind() {
                FrameKind::Module => return None,
                FrameKind::Class => {}
                FrameKind::Function | FrameKind::Closure => {
                    if env.contains(name) {
                        return Some(env);
                    }
                }
            }
            current = env.parent();
        }
        None
    }
}

/// Output sink that keeps everything written to it, for tests and embedders.
#[derive(Clone, Default)]
pub struct OutputBuffer(Rc<RefCell<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Interpreter state for one program execution.
pub struct Vm {
    globals: Env,
    builtins: Attrs,
    runtime: Rc<Runtime>,
    frames: Vec<Env>,
    modules: Attrs,
    out: Box<dyn Write>,
    /// One collector per active generator call.
    yields: Vec<Vec<Value>>,
    /// Errors being handled by an `except` clause, for bare `raise`.
    handling: Vec<RuntimeError>,
    depth: usize,
    /// Stack address at the outermost active call, `0` when idle.
    stack_base: usize,
    error_line: Option<usize>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let globals = Env::module();
        Self {
            frames: vec![globals.clone()],
            globals,
            builtins: builtins::table(),
            runtime: Runtime::new(),
            modules: Attrs::new(),
            out: Box::new(io::stdout()),
            yields: Vec::new(),
            handling: Vec::new(),
            depth: 0,
            stack_base: 0,
            error_line: None,
        }
    }

    /// Send `print` output somewhere other than stdout.
    pub fn with_output(mut self, out: impl Write + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    /// Make `value` importable as `name`.
    pub fn register_module(&mut self, name: &str, value: Value) {
        self.modules.insert(name.to_string(), value);
    }

    /// The frame of the code currently executing.
    pub fn current_env(&self) -> Env {
        self.frames.last().cloned().unwrap_or_else(|| self.globals.clone())
    }

    /// Line of the innermost statement that raised the last uncaught error.
    pub fn error_line(&self) -> Option<usize> {
        self.error_line
    }

    pub fn write_out(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| RuntimeError::Runtime(format!("cannot write output: {e}")))
    }

    pub fn exec_module(&mut self, module: &Module) -> Result<(), RuntimeError> {
        self.error_line = None;
        self.exec_block(&module.body)?;
        self.out.flush().map_err(|e| RuntimeError::Runtime(format!("cannot write output: {e}")))
    }

    // ── Statements ──────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        let result = self.exec_stmt_kind(stmt);
        if result.is_err() && self.error_line.is_none() {
            self.error_line = Some(stmt.span.line);
        }
        result
    }

    fn exec_stmt_kind(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(msg) => {
                            let value = self.eval(msg)?;
                            self.to_str(&value)?
                        }
                        None => String::new(),
                    };
                    return Err(RuntimeError::Assertion(message));
                }
            }
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Yield(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                self.collector()?.push(value);
            }
            StmtKind::YieldFrom(expr) => {
                let value = self.eval(expr)?;
                let items = self.iterate(&value)?;
                self.collector()?.extend(items);
            }
            StmtKind::Import(names) => {
                for alias in names {
                    let module = if alias.asname.is_some() { alias.name.as_str() } else { alias.binding() };
                    let value = self.import(module)?;
                    self.store_name(alias.binding(), value)?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let value = self.import(module)?;
                for alias in names {
                    let member = self.get_attr(&value, &alias.name).map_err(|_| {
                        RuntimeError::Import(format!("cannot import name '{}' from '{module}'", alias.name))
                    })?;
                    self.store_name(alias.binding(), member)?;
                }
            }
            StmtKind::Global(names) => {
                let env = self.current_env();
                env.0.borrow_mut().globals.extend(names.iter().cloned());
            }
            StmtKind::Nonlocal(names) => {
                let env = self.current_env();
                for name in names {
                    if env.enclosing_with(name).is_none() {
                        return Err(RuntimeError::Runtime(format!("no binding for nonlocal '{name}' found")));
                    }
                }
                env.0.borrow_mut().nonlocals.extend(names.iter().cloned());
            }
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() { self.exec_block(body) } else { self.exec_block(orelse) };
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::With { context, target, body } => return self.exec_with(context, target.as_ref(), body),
            StmtKind::Try { body, handlers, finalbody } => return self.exec_try(body, handlers, finalbody),
            StmtKind::FunctionDef(def) => {
                let decorators = self.eval_all(&def.decorators)?;
                let mut value = self.make_function(def)?;
                for decorator in decorators.iter().rev() {
                    value = self.call(decorator, Args::new(vec![value]))?;
                }
                self.store_name(&def.name, value)?;
            }
            StmtKind::ClassDef(class) => self.exec_class(class)?,
        }
        Ok(Flow::Normal)
    }

    fn collector(&mut self) -> Result<&mut Vec<Value>, RuntimeError> {
        self.yields
            .last_mut()
            .ok_or_else(|| RuntimeError::Runtime("'yield' outside function".into()))
    }

    fn import(&self, name: &str) -> Result<Value, RuntimeError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::Import(format!("no module named '{name}'")))
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value, RuntimeError> {
        let mut defaults = Vec::new();
        for param in &def.params.args {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        Ok(Value::Function(Rc::new(Function { def: Rc::clone(def), env: self.current_env(), defaults })))
    }

    fn exec_class(&mut self, class: &ClassDef) -> Result<(), RuntimeError> {
        let decorators = self.eval_all(&class.decorators)?;
        let mut bases = Vec::new();
        for base in &class.bases {
            match self.eval(base)? {
                Value::Class(base) => bases.push(base),
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "class base must be a class, not '{}'",
                        other.type_name()
                    )));
                }
            }
        }
        let env = self.current_env().child(FrameKind::Class);
        self.frames.push(env.clone());
        let result = self.exec_block(&class.body);
        self.frames.pop();
        result?;
        let cls = Class::new(&class.name, bases);
        *cls.attrs.borrow_mut() = env.snapshot();
        let mut value = Value::Class(Rc::new(cls));
        for decorator in decorators.iter().rev() {
            value = self.call(decorator, Args::new(vec![value]))?;
        }
        self.store_name(&class.name, value)
    }

    fn exec_with(&mut self, context: &Expr, target: Option<&Expr>, body: &[Stmt]) -> Result<Flow, RuntimeError> {
        let manager = self.eval(context)?;
        let entered = match self.optional_attr(&manager, "__enter__") {
            Some(enter) => self.call(&enter, Args::default())?,
            None => manager.clone(),
        };
        if let Some(target) = target {
            self.assign(target, entered)?;
        }
        let result = self.exec_block(body);
        let Some(exit) = self.optional_attr(&manager, "__exit__") else {
            return result;
        };
        let exit_args = match &result {
            Ok(_) => vec![Value::None, Value::None, Value::None],
            Err(err) => {
                let exc = self.exception_value(err);
                let class = self.error_class(err).map_or(Value::None, Value::Class);
                vec![class, exc, Value::None]
            }
        };
        let suppress = self.call(&exit, Args::new(exit_args))?.truthy();
        match result {
            Err(_) if suppress => {
                self.error_line = None;
                Ok(Flow::Normal)
            }
            other => other,
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        finalbody: &[Stmt],
    ) -> Result<Flow, RuntimeError> {
        let mut result = self.exec_block(body);
        if let Err(err) = result {
            let mut handled = None;
            for handler in handlers {
                if self.handler_matches(handler, &err)? {
                    handled = Some(handler);
                    break;
                }
            }
            result = match handled {
                Some(handler) => {
                    self.error_line = None;
                    if let Some(name) = &handler.name {
                        let exc = self.exception_value(&err);
                        self.store_name(name, exc)?;
                    }
                    self.handling.push(err);
                    let outcome = self.exec_block(&handler.body);
                    self.handling.pop();
                    outcome
                }
                None => Err(err),
            };
        }
        if !finalbody.is_empty() {
            let pending_line = self.error_line.take();
            match self.exec_block(finalbody)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
            self.error_line = pending_line;
        }
        result
    }

    fn handler_matches(&mut self, handler: &ExceptHandler, err: &RuntimeError) -> Result<bool, RuntimeError> {
        let Some(kind) = &handler.kind else {
            return Ok(true);
        };
        let Some(class) = self.error_class(err) else {
            return Ok(false);
        };
        let candidates = match self.eval(kind)? {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other],
        };
        for candidate in candidates {
            match candidate {
                Value::Class(of) => {
                    if is_subclass(&class, &of) {
                        return Ok(true);
                    }
                }
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "catching '{}' that does not inherit from Exception is not allowed",
                        other.type_name()
                    )));
                }
            }
        }
        Ok(false)
    }

    /// Exception class of an error: the raised instance's class, else the
    /// builtin class named after the error kind.
    pub fn error_class(&self, err: &RuntimeError) -> Option<Rc<Class>> {
        if let RuntimeError::Raised { value: Value::Instance(inst), .. } = err {
            return Some(Rc::clone(&inst.class));
        }
        match self.builtins.get(err.class_name()).or_else(|| self.builtins.get("Exception")) {
            Some(Value::Class(class)) => Some(Rc::clone(class)),
            _ => None,
        }
    }

    /// The value bound by `except ... as name`.
    pub fn exception_value(&self, err: &RuntimeError) -> Value {
        if let RuntimeError::Raised { value, .. } = err {
            if !value.is_none() {
                return value.clone();
            }
        }
        let Some(class) = self.error_class(err) else {
            return Value::str(&err.to_string());
        };
        let message = Value::str(&err.to_string());
        let mut attrs = Attrs::new();
        attrs.insert("args".into(), Value::Tuple(vec![message.clone()].into()));
        attrs.insert("message".into(), message);
        Value::Instance(Rc::new(Instance { class, attrs: RefCell::new(attrs) }))
    }

    fn raise(&mut self, exc: Option<&Expr>) -> Result<RuntimeError, RuntimeError> {
        let Some(exc) = exc else {
            return self
                .handling
                .last()
                .cloned()
                .ok_or_else(|| RuntimeError::Runtime("no active exception to reraise".into()));
        };
        let value = match self.eval(exc)? {
            Value::Class(class) => self.instantiate(&class, Args::default())?,
            value => value,
        };
        let Value::Instance(inst) = &value else {
            return Err(RuntimeError::type_error(format!(
                "exceptions must derive from Exception, not '{}'",
                value.type_name()
            )));
        };
        if inst.class.lookup("__exception__").is_none() {
            return Err(RuntimeError::type_error(format!(
                "exceptions must derive from Exception, not '{}'",
                inst.class.name
            )));
        }
        let message = inst.attrs.borrow().get("message").map(Value::to_string).unwrap_or_default();
        let class = inst.class.name.clone();
        Ok(RuntimeError::Raised { class, message, value })
    }

    // ── Names and assignment ────────────────────────────────────

    /// Lexical name load: current frame, enclosing function frames, module
    /// globals, builtins. Class bodies are only visible from themselves.
    pub(crate) fn load_name(&self, name: &str) -> Result<Value, RuntimeError> {
        let frame = self.current_env();
        if frame.declares_global(name) {
            return self
                .globals
                .get(name)
                .or_else(|| self.builtin(name))
                .ok_or_else(|| RuntimeError::NameNotFound { name: name.into(), scopes: Vec::new() });
        }
        if let Some(value) = frame.get(name) {
            return Ok(value);
        }
        let mut current = frame.parent();
        while let Some(env) = current {
            if env.kind() != FrameKind::Class {
                if let Some(value) = env.get(name) {
                    return Ok(value);
                }
            }
            current = env.parent();
        }
        self.builtin(name)
            .ok_or_else(|| RuntimeError::NameNotFound { name: name.into(), scopes: Vec::new() })
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let frame = self.current_env();
        if frame.declares_global(name) {
            self.globals.set(name, value);
        } else if frame.declares_nonlocal(name) {
            let env = frame
                .enclosing_with(name)
                .ok_or_else(|| RuntimeError::Runtime(format!("no binding for nonlocal '{name}' found")))?;
            env.set(name, value);
        } else {
            frame.set(name, value);
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), RuntimeError> {
        match &target.kind {
            ExprKind::Name(name) => self.store_name(name, value),
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                self.set_object_property(&object, attr, value)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.set_item(&object, &index, value)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let values = self.iterate(&value)?;
                if values.len() != targets.len() {
                    return Err(RuntimeError::value_error(format!(
                        "expected {} values to unpack, got {}",
                        targets.len(),
                        values.len()
                    )));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            _ => Err(RuntimeError::type_error("cannot assign to expression")),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Result<(), RuntimeError> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let updated = self.binary_inplace(op, &current, &rhs)?;
                self.store_name(name, updated)
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value)?;
                let updated = self.binary_inplace(op, &current, &rhs)?;
                self.set_object_property(&object, attr, updated)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.binary_inplace(op, &current, &rhs)?;
                self.set_item(&object, &index, updated)
            }
            _ => Err(RuntimeError::type_error("illegal expression for augmented assignment")),
        }
    }

    fn binary_inplace(&mut self, op: BinOp, current: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        if let (BinOp::Add, Value::List(items)) = (op, current) {
            let extra = self.iterate(rhs)?;
            items.borrow_mut().extend(extra);
            return Ok(current.clone());
        }
        self.binary(op, current, rhs)
    }

    // ── Expressions ─────────────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s),
            }),
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr { value, conversion, spec } => {
                            let value = self.eval(value)?;
                            let value = match conversion {
                                Some('r' | 'a') => Value::str(&value.repr()),
                                Some(_) => Value::str(&self.to_str(&value)?),
                                None => value,
                            };
                            match spec.as_deref() {
                                None | Some("") => out.push_str(&self.to_str(&value)?),
                                Some(spec) => out.push_str(&methods::format_value(&value, spec)?),
                            }
                        }
                    }
                }
                Ok(Value::from(out))
            }
            ExprKind::Name(name) => self.load_name(name),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items)?)),
            ExprKind::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?.into())),
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = Key::from_value(&self.eval(key)?)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            ExprKind::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehension(elt, generators, &mut out)?;
                Ok(Value::list(out))
            }
            ExprKind::Attribute { value, attr } => {
                let value = self.eval(value)?;
                self.get_attr(&value, attr)
            }
            ExprKind::Subscript { value, index } => {
                let value = self.eval(value)?;
                match &index.kind {
                    ExprKind::Slice { lower, upper, step } => {
                        let lower = self.eval_bound(lower.as_deref())?;
                        let upper = self.eval_bound(upper.as_deref())?;
                        let step = self.eval_bound(step.as_deref())?;
                        ops::slice(&value, lower, upper, step)
                    }
                    _ => {
                        let index = self.eval(index)?;
                        self.get_item(&value, &index)
                    }
                }
            }
            ExprKind::Slice { .. } => Err(RuntimeError::type_error("slice outside of a subscript")),
            ExprKind::Call { func, args } => {
                let callee = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call(&callee, args)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                ops::unary(*op, &value)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            ExprKind::Compare { left, ops } => {
                let mut left = self.eval(left)?;
                for (op, right) in ops {
                    let right = self.eval(right)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match op {
                    LogicalOp::And if !left.truthy() => Ok(left),
                    LogicalOp::Or if left.truthy() => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_bound(&mut self, expr: Option<&Expr>) -> Result<Option<i64>, RuntimeError> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value
                .as_int()
                .map(Some)
                .ok_or_else(|| RuntimeError::type_error("slice indices must be integers or None")),
        }
    }

    /// Comprehension variables are bound in the enclosing frame.
    fn comprehension(&mut self, elt: &Expr, generators: &[Comprehension], out: &mut Vec<Value>) -> Result<(), RuntimeError> {
        let Some((first, rest)) = generators.split_first() else {
            out.push(self.eval(elt)?);
            return Ok(());
        };
        let iterable = self.eval(&first.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.assign(&first.target, item)?;
            for cond in &first.ifs {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(elt, rest, out)?;
        }
        Ok(())
    }

    fn eval_args(&mut self, args: &[Arg]) -> Result<Args, RuntimeError> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr)?),
                Arg::Starred(expr) => {
                    let value = self.eval(expr)?;
                    out.positional.extend(self.iterate(&value)?);
                }
                Arg::Keyword(name, expr) => out.keywords.push((name.clone(), self.eval(expr)?)),
                Arg::DoubleStarred(expr) => match self.eval(expr)? {
                    Value::Dict(entries) => {
                        for (key, value) in entries.borrow().iter() {
                            let Key::Str(name) = key else {
                                return Err(RuntimeError::type_error("keywords must be strings"));
                            };
                            out.keywords.push((name.to_string(), value.clone()));
                        }
                    }
                    Value::Namespace(ns) => {
                        out.keywords.extend(ns.attrs.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "argument after ** must be a mapping, not '{}'",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(out)
    }

    fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
        if let Value::Instance(inst) = left {
            let dunder = format!("__{}__", ops::dunder_name(op));
            if let Some(method) = inst.class.lookup(&dunder) {
                let bound = bind(left, method);
                return self.call(&bound, Args::new(vec![right.clone()]));
            }
        }
        ops::binary(op, left, right)
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
        Ok(match op {
            CmpOp::Eq => left.equals(right),
            CmpOp::NotEq => !left.equals(right),
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => ops::compare(op, left, right)?,
        })
    }

    pub fn contains(&mut self, container: &Value, item: &Value) -> Result<bool, RuntimeError> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(&**needle)),
                other => Err(RuntimeError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
            Value::Dict(entries) => Ok(entries.borrow().contains_key(&Key::from_value(item)?)),
            Value::Namespace(ns) => Ok(item.as_str().is_some_and(|name| ns.attrs.borrow().contains_key(name))),
            Value::Object(obj) if obj.is_method("__contains__") => {
                let obj = Rc::clone(obj);
                Ok(obj.call_method(self, "__contains__", Args::new(vec![item.clone()]))?.truthy())
            }
            other => {
                let items = self.iterate(other)?;
                Ok(items.iter().any(|v| v.equals(item)))
            }
        }
    }

    // ── Calls ───────────────────────────────────────────────────

    pub fn call(&mut self, callee: &Value, args: Args) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(func) => self.call_function(func, args, FrameKind::Function, None),
            Value::Closure(func) => self.call_closure(func, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Method(method) => {
                let mut args = args;
                match &method.method {
                    Method::Function(func) => {
                        args.positional.insert(0, method.receiver.clone());
                        self.call_function(func, args, FrameKind::Function, None)
                    }
                    Method::Native(native) => {
                        args.positional.insert(0, method.receiver.clone());
                        (native.func)(self, args)
                    }
                    Method::Named(name) => self.call_method(&method.receiver, name, args),
                }
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::Instance(inst) => match inst.class.lookup("__call__") {
                Some(method) => {
                    let bound = bind(callee, method);
                    self.call(&bound, args)
                }
                None => Err(RuntimeError::type_error(format!("'{}' object is not callable", inst.class.name))),
            },
            Value::Object(obj) => {
                let obj = Rc::clone(obj);
                obj.call(self, args)
            }
            other => Err(RuntimeError::type_error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    /// Call a method by name on any value.
    pub fn call_method(&mut self, receiver: &Value, name: &str, args: Args) -> Result<Value, RuntimeError> {
        match receiver {
            Value::Object(obj) => {
                let obj = Rc::clone(obj);
                obj.call_method(self, name, args)
            }
            Value::Instance(_) | Value::Class(_) | Value::Namespace(_) => {
                let method = self.get_attr(receiver, name)?;
                self.call(&method, args)
            }
            _ => methods::call(self, receiver, name, args),
        }
    }

    /// Calling convention of closure functions. The first declared parameter
    /// is the closure's self. When the caller supplies it, it is pushed on the
    /// scope stack for the duration of the call; otherwise the innermost
    /// object on the stack is passed.
    fn call_closure(&mut self, func: &Rc<Function>, mut args: Args) -> Result<Value, RuntimeError> {
        let declared = func.def.params.args.len().saturating_sub(1);
        if args.positional.len() > declared {
            let target = args.positional.first().cloned().unwrap_or(Value::None);
            tracing::trace!(closure = func.name(), target = %target.type_name(), "push closure target");
            let _guard = self.runtime.push(ScopeEntry::Object(target.clone()));
            self.call_function(func, args, FrameKind::Closure, Some(target))
        } else {
            let target = self.runtime.top().unwrap_or(Value::None);
            args.positional.insert(0, target.clone());
            self.call_function(func, args, FrameKind::Closure, Some(target))
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Args,
        kind: FrameKind,
        delegate: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let here = stack_address();
        if self.depth == 0 {
            self.stack_base = here;
        }
        if self.depth >= MAX_DEPTH || self.stack_base.abs_diff(here) > STACK_BUDGET {
            return Err(RuntimeError::Runtime("maximum recursion depth exceeded".into()));
        }
        let env = func.env.child(kind);
        env.set_delegate(delegate);
        bind_params(func, &env, args)?;
        let generator = func.def.is_generator;
        if generator {
            self.yields.push(Vec::new());
        }
        self.depth += 1;
        self.frames.push(env);
        let result = self.exec_block(&func.def.body);
        self.frames.pop();
        self.depth -= 1;
        let yielded = if generator { self.yields.pop() } else { None };
        let flow = result?;
        if let Some(items) = yielded {
            return Ok(Value::list(items));
        }
        Ok(match flow {
            Flow::Return(value) => value,
            _ => Value::None,
        })
    }

    pub fn instantiate(&mut self, class: &Rc<Class>, args: Args) -> Result<Value, RuntimeError> {
        let value = Value::Instance(Rc::new(Instance { class: Rc::clone(class), attrs: RefCell::new(Attrs::new()) }));
        match class.lookup("__init__") {
            Some(init) => {
                let bound = bind(&value, init);
                self.call(&bound, args)?;
            }
            None if !args.is_empty() => {
                return Err(RuntimeError::type_error(format!("{}() takes no arguments", class.name)));
            }
            None => {}
        }
        Ok(value)
    }

    // ── Attributes, items, iteration ────────────────────────────

    pub fn get_attr(&mut self, value: &Value, name: &str) -> Result<Value, RuntimeError> {
        match value {
            Value::Instance(inst) => {
                if let Some(attr) = inst.attrs.borrow().get(name) {
                    return Ok(attr.clone());
                }
                match inst.class.lookup(name) {
                    Some(attr) => Ok(bind(value, attr)),
                    None => Err(RuntimeError::no_attribute(&inst.class.name, name)),
                }
            }
            Value::Class(class) if name == "__name__" => Ok(Value::str(&class.name)),
            Value::Class(class) => class
                .lookup(name)
                .ok_or_else(|| RuntimeError::attribute(format!("type object '{}' has no attribute '{name}'", class.name))),
            Value::Namespace(ns) => ns.get(name).ok_or_else(|| RuntimeError::no_attribute("namespace", name)),
            Value::Object(obj) => match obj.get_attr(name) {
                Member::Value(attr) => Ok(attr),
                Member::Unset => Err(RuntimeError::attribute(format!(
                    "property '{name}' of '{}' object has no value",
                    obj.type_name()
                ))),
                Member::Absent if obj.is_method(name) => Ok(named_method(value, name)),
                Member::Absent => Err(RuntimeError::no_attribute(obj.type_name(), name)),
            },
            Value::Function(func) | Value::Closure(func) if name == "__name__" => Ok(Value::str(func.name())),
            Value::Native(native) if name == "__name__" => Ok(Value::str(&native.name)),
            _ if methods::has_method(value, name) => Ok(named_method(value, name)),
            _ => Err(RuntimeError::no_attribute(&value.type_name(), name)),
        }
    }

    /// `get_attr` that treats any failure as absence.
    pub(crate) fn optional_attr(&mut self, value: &Value, name: &str) -> Option<Value> {
        self.get_attr(value, name).ok()
    }

    pub fn set_attr(&mut self, target: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match target {
            Value::Instance(inst) => {
                inst.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Namespace(ns) => {
                ns.set(name, value);
                Ok(())
            }
            Value::Object(obj) => obj.set_attr(name, value),
            other => Err(RuntimeError::attribute(format!(
                "'{}' object attribute '{name}' is read-only",
                other.type_name()
            ))),
        }
    }

    pub fn get_item(&mut self, value: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match value {
            Value::List(items) => {
                let items = items.borrow();
                let i = ops::index(items.len(), index, "list")?;
                items.get(i).cloned().ok_or_else(|| RuntimeError::Index("list index out of range".into()))
            }
            Value::Tuple(items) => {
                let i = ops::index(items.len(), index, "tuple")?;
                items.get(i).cloned().ok_or_else(|| RuntimeError::Index("tuple index out of range".into()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = ops::index(chars.len(), index, "string")?;
                chars
                    .get(i)
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| RuntimeError::Index("string index out of range".into()))
            }
            Value::Dict(entries) => {
                let key = Key::from_value(index)?;
                entries.borrow().get(&key).cloned().ok_or_else(|| RuntimeError::Key(index.repr()))
            }
            Value::Instance(_) | Value::Object(_) if self.has_method(value, "__getitem__") => {
                self.call_method(value, "__getitem__", Args::new(vec![index.clone()]))
            }
            other => Err(RuntimeError::type_error(format!("'{}' object is not subscriptable", other.type_name()))),
        }
    }

    pub fn set_item(&mut self, target: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
        match target {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = ops::index(items.len(), index, "list")?;
                let slot = items
                    .get_mut(i)
                    .ok_or_else(|| RuntimeError::Index("list assignment index out of range".into()))?;
                *slot = value;
                Ok(())
            }
            Value::Dict(entries) => {
                entries.borrow_mut().insert(Key::from_value(index)?, value);
                Ok(())
            }
            Value::Instance(_) | Value::Object(_) if self.has_method(target, "__setitem__") => {
                self.call_method(target, "__setitem__", Args::new(vec![index.clone(), value]))?;
                Ok(())
            }
            other => Err(RuntimeError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn has_method(&self, value: &Value, name: &str) -> bool {
        match value {
            Value::Instance(inst) => inst.class.lookup(name).is_some(),
            Value::Object(obj) => obj.is_method(name),
            _ => methods::has_method(value, name),
        }
    }

    /// Materialize the items of an iterable.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, RuntimeError> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.borrow().keys().map(Key::to_value).collect()),
            Value::Instance(_) | Value::Object(_) if self.has_method(value, "__iter__") => {
                let items = self.call_method(value, "__iter__", Args::default())?;
                self.iterate(&items)
            }
            other => Err(RuntimeError::type_error(format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    /// `str()` of a value, honoring `__str__` on instances.
    pub fn to_str(&mut self, value: &Value) -> Result<String, RuntimeError> {
        if let Value::Instance(inst) = value {
            if let Some(method) = inst.class.lookup("__str__") {
                let bound = bind(value, method);
                return Ok(self.call(&bound, Args::default())?.to_string());
            }
        }
        Ok(value.to_string())
    }
}

/// Bind a class attribute to its receiver when it is a function.
/// Address of a local in the caller's frame, a measure of native stack depth.
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::ptr::addr_of!(marker) as usize
}

pub(crate) fn bind(receiver: &Value, attr: Value) -> Value {
    let method = match attr {
        Value::Function(func) => Method::Function(func),
        Value::Native(native) => Method::Native(native),
        other => return other,
    };
    Value::Method(Rc::new(BoundMethod { receiver: receiver.clone(), method }))
}

fn named_method(receiver: &Value, name: &str) -> Value {
    Value::Method(Rc::new(BoundMethod { receiver: receiver.clone(), method: Method::Named(name.into()) }))
}

fn bind_params(func: &Function, env: &Env, args: Args) -> Result<(), RuntimeError> {
    let params = &func.def.params;
    let name = func.name();
    let given = args.positional.len();
    let mut positional = args.positional.into_iter();
    for param in &params.args {
        match positional.next() {
            Some(value) => env.set(&param.name, value),
            None => break,
        }
    }
    let extra: Vec<Value> = positional.collect();
    match &params.vararg {
        Some(vararg) => env.set(vararg, Value::Tuple(extra.into())),
        None if !extra.is_empty() => {
            return Err(RuntimeError::type_error(format!(
                "{name}() takes {} positional arguments but {given} were given",
                params.args.len()
            )));
        }
        None => {}
    }
    let mut kwargs = Dict::new();
    for (key, value) in args.keywords {
        if params.args.iter().any(|p| p.name == key) {
            if env.contains(&key) {
                return Err(RuntimeError::type_error(format!("{name}() got multiple values for argument '{key}'")));
            }
            env.set(&key, value);
        } else if params.kwarg.is_some() {
            kwargs.insert(Key::str(&key), value);
        } else {
            return Err(RuntimeError::type_error(format!("{name}() got an unexpected keyword argument '{key}'")));
        }
    }
    if let Some(kwarg) = &params.kwarg {
        env.set(kwarg, Value::dict(kwargs));
    }
    let required = params.args.len().saturating_sub(func.defaults.len());
    for (i, param) in params.args.iter().enumerate() {
        if env.contains(&param.name) {
            continue;
        }
        match i.checked_sub(required).and_then(|d| func.defaults.get(d)) {
            Some(default) => env.set(&param.name, default.clone()),
            None => {
                return Err(RuntimeError::type_error(format!(
                    "{name}() missing required argument: '{}'",
                    param.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::parser::parse_module;

    fn run(source: &str) -> (Vm, OutputBuffer) {
        let out = OutputBuffer::new();
        let mut vm = Vm::new().with_output(out.clone());
        let module = parse_module(source, "<test>").unwrap();
        vm.exec_module(&module).unwrap();
        (vm, out)
    }

    fn fails(source: &str) -> (RuntimeError, Option<usize>) {
        let mut vm = Vm::new().with_output(OutputBuffer::new());
        let module = parse_module(source, "<test>").unwrap();
        let err = vm.exec_module(&module).unwrap_err();
        (err, vm.error_line())
    }

    #[test]
    fn arithmetic_and_print() {
        let (_, out) = run("x = 2 + 3 * 4\nprint(x, x // 3, x / 4)\n");
        assert_eq!(out.contents(), "14 4 3.5\n");
    }

    #[test]
    fn functions_with_defaults_and_keywords() {
        let source = "def f(a, b=10, *rest, **kw):\n    return [a, b, rest, kw]\nprint(f(1))\nprint(f(1, 2, 3, k=4))\n";
        let (_, out) = run(source);
        assert_eq!(out.contents(), "[1, 10, (), {}]\n[1, 2, (3,), {'k': 4}]\n");
    }

    #[test]
    fn missing_argument_is_type_error() {
        let (err, line) = fails("def f(a):\n    return a\n\nf()\n");
        assert_eq!(err.class_name(), "TypeError");
        assert_eq!(err.to_string(), "f() missing required argument: 'a'");
        assert_eq!(line, Some(4));
    }

    #[test]
    fn lexical_closures_and_nonlocal() {
        let source = "\
def counter():
    n = 0
    def inc():
        nonlocal n
        n += 1
        return n
    return inc
c = counter()
c()
print(c())
";
        let (_, out) = run(source);
        assert_eq!(out.contents(), "2\n");
    }

    #[test]
    fn classes_and_methods() {
        let source = "\
class Point:
    scale = 2
    def __init__(self, x):
        self.x = x
    def scaled(self):
        return self.x * self.scale
p = Point(3)
print(p.scaled(), Point.__name__)
";
        let (_, out) = run(source);
        assert_eq!(out.contents(), "6 Point\n");
    }

    #[test]
    fn try_except_finally() {
        let source = "\
log = []
try:
    {}['missing']
except KeyError as e:
    log.append('caught ' + str(e))
finally:
    log.append('done')
print(log)
";
        let (_, out) = run(source);
        assert_eq!(out.contents(), "[\"caught 'missing'\", 'done']\n");
    }

    #[test]
    fn user_exceptions_match_base_classes() {
        let source = "\
class Oops(ValueError):
    pass
try:
    raise Oops('bad')
except ValueError as e:
    print(type(e).__name__, e)
";
        let (_, out) = run(source);
        assert_eq!(out.contents(), "Oops bad\n");
    }

    #[test]
    fn uncaught_raise_reports_innermost_line() {
        let (err, line) = fails("def f():\n    raise RuntimeError('boom')\n\nf()\n");
        assert_eq!(err.report(), "RuntimeError: boom");
        assert_eq!(line, Some(2));
    }

    #[test]
    fn generators_collect_eagerly() {
        let (_, out) = run("def g(n):\n    for i in range(n):\n        yield i * i\nprint(g(4))\n");
        assert_eq!(out.contents(), "[0, 1, 4, 9]\n");
    }

    #[test]
    fn comprehensions_and_slices() {
        let (_, out) = run("xs = [i * 2 for i in range(6) if i % 2]\nprint(xs, xs[::-1], 'hello'[1:3])\n");
        assert_eq!(out.contents(), "[2, 6, 10] [10, 6, 2] el\n");
    }

    #[test]
    fn imports_resolve_registered_modules() {
        let out = OutputBuffer::new();
        let mut vm = Vm::new().with_output(out.clone());
        let mut attrs = Attrs::new();
        attrs.insert("answer".into(), Value::Int(42));
        vm.register_module("facts", Value::namespace(attrs));
        let module = parse_module("from facts import answer\nimport facts as f\nprint(answer, f.answer)\n", "<test>").unwrap();
        vm.exec_module(&module).unwrap();
        assert_eq!(out.contents(), "42 42\n");

        let module = parse_module("import missing\n", "<test>").unwrap();
        let err = vm.exec_module(&module).unwrap_err();
        assert_eq!(err.report(), "ImportError: no module named 'missing'");
    }

    #[test]
    fn closure_receives_top_of_stack_when_called_without_self() {
        let out = OutputBuffer::new();
        let mut vm = Vm::new().with_output(out.clone());
        let def = match parse_module("def c(self, x):\n    print(self, x)\n", "<test>").unwrap().body.remove(0).kind {
            StmtKind::FunctionDef(def) => def,
            _ => panic!("expected a function"),
        };
        let func = Rc::new(Function { def, env: vm.globals().clone(), defaults: Vec::new() });
        let closure = Value::Closure(func);
        vm.call(&closure, Args::new(vec![Value::str("target"), Value::Int(1)])).unwrap();
        let _root = vm.runtime().push(ScopeEntry::Object(Value::str("root")));
        vm.call(&closure, Args::new(vec![Value::Int(2)])).unwrap();
        assert_eq!(out.contents(), "target 1\nroot 2\n");
        assert_eq!(vm.runtime().depth(), 1);
    }

    #[test]
    fn recursion_is_bounded() {
        let (err, _) = fails("def f():\n    return f()\nf()\n");
        assert_eq!(err.to_string(), "maximum recursion depth exceeded");
    }

    #[test]
    fn recursion_with_arguments_is_bounded_on_a_default_thread() {
        let handle = std::thread::spawn(|| fails("def f(n):\n    return f(n + 1)\nf(0)\n").0.to_string());
        assert_eq!(handle.join().unwrap(), "maximum recursion depth exceeded");
    }
}
