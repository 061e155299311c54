//! Turn rewritten text plus its closure registry into a host module.
//!
//! Three passes run over the parsed module:
//!
//! 1. closure insertion: every closure id is replaced by a decorated function
//!    definition placed right before the innermost statement referencing it;
//! 2. lowering: block calls become runtime `call_block`/`configure_object`
//!    calls and attribute stores become `set_object_property`;
//! 3. name routing: names not bound by an enclosing definition are read and
//!    written through the runtime object (`__runtime__['x']`).

use std::collections::HashSet;
use std::rc::Rc;

use super::closure::{Closure, ClosureBody, ClosureRegistry, RewriteResult};
use super::error::SyntaxError;
use crate::host::ast::*;
use crate::host::parser::parse_module;
use crate::settings::TranspileOptions;

/// Transpile the output of the rewriter.
pub fn transpile(rewritten: &RewriteResult, filename: &str, options: &TranspileOptions) -> Result<Module, SyntaxError> {
    Transpiler::new(filename, options, &rewritten.closures).transpile(&rewritten.code)
}

pub struct Transpiler<'a> {
    filename: &'a str,
    options: &'a TranspileOptions,
    closures: &'a ClosureRegistry,
}

impl<'a> Transpiler<'a> {
    pub fn new(filename: &'a str, options: &'a TranspileOptions, closures: &'a ClosureRegistry) -> Self {
        Self { filename, options, closures }
    }

    pub fn transpile(&self, code: &str) -> Result<Module, SyntaxError> {
        let module = parse_module(code, self.filename)?;
        let mut body = self.insert_closures(module.body)?;
        if !self.options.preamble.trim().is_empty() {
            let preamble = parse_module(&self.options.preamble, "<preamble>")?;
            body.splice(0..0, preamble.body);
        }
        self.lower_block(&mut body);
        NameRouter::new(self.options).route_block(&mut body);
        tracing::debug!(filename = self.filename, statements = body.len(), "transpiled module");
        Ok(Module { body })
    }

    fn runtime(&self, span: Span) -> Expr {
        Expr::name(&self.options.runtime_name, span)
    }

    // ── Closure insertion ──────────────────────────────────────────

    fn insert_closures(&self, body: Vec<Stmt>) -> Result<Vec<Stmt>, SyntaxError> {
        let mut out = Vec::with_capacity(body.len());
        for mut stmt in body {
            let mut ids = Vec::new();
            for expr in stmt.exprs_mut() {
                self.collect_closure_refs(expr, &mut ids);
            }
            for block in stmt.blocks_mut() {
                *block = self.insert_closures(std::mem::take(block))?;
            }
            for id in ids {
                out.push(self.closure_def(&id)?);
            }
            out.push(stmt);
        }
        Ok(out)
    }

    fn collect_closure_refs(&self, expr: &mut Expr, ids: &mut Vec<String>) {
        if let ExprKind::Name(name) = &expr.kind {
            if self.closures.contains(name) && !ids.contains(name) {
                ids.push(name.clone());
            }
            return;
        }
        for child in expr.children_mut() {
            self.collect_closure_refs(child, ids);
        }
    }

    /// Definition of closure `id`, decorated so that calls go through the
    /// runtime's closure calling convention.
    fn closure_def(&self, id: &str) -> Result<Stmt, SyntaxError> {
        let Some(closure) = self.closures.get(id) else {
            return Err(SyntaxError::new(format!("unknown closure '{id}'"), self.filename, 0, 0, ""));
        };
        let source = self.closure_source(closure);
        tracing::debug!(closure = id, line = closure.line, "generated closure definition");
        let module = parse_module(&source, self.filename)?;
        let mut stmts = module.body.into_iter();
        let (Some(Stmt { kind: StmtKind::FunctionDef(def), span }), None) = (stmts.next(), stmts.next()) else {
            return Err(SyntaxError::new(
                "closure body does not form a single definition",
                self.filename,
                closure.line,
                closure.column,
                "",
            ));
        };
        let mut def = Rc::unwrap_or_clone(def);
        def.body = self.insert_closures(std::mem::take(&mut def.body))?;
        let decorator = Expr::call(Expr::attribute(self.runtime(span), "closure"), Vec::new());
        def.decorators.insert(0, decorator);
        Ok(Stmt::new(StmtKind::FunctionDef(Rc::new(def)), span))
    }

    /// Host text for a closure, placed so that its body keeps its source lines.
    fn closure_source(&self, closure: &Closure) -> String {
        let mut params = Vec::with_capacity(1);
        let declared = closure.parameters.as_deref().unwrap_or_default();
        if declared.first().map(String::as_str) != Some("self") {
            params.push("self");
        }
        params.extend(declared.iter().map(String::as_str));
        let header = format!(
            "{}def {}({}):",
            "\n".repeat(closure.line.saturating_sub(1)),
            closure.id,
            params.join(", ")
        );
        match &closure.body {
            ClosureBody::Expr(expr) => format!("{header} return {expr}\n"),
            ClosureBody::Block(code) if code.trim().is_empty() => format!("{header} pass\n"),
            ClosureBody::Block(code) => format!("{header}{code}\n"),
        }
    }

    // ── Lowering ───────────────────────────────────────────────────

    fn lower_block(&self, body: &mut [Stmt]) {
        for stmt in body {
            for block in stmt.blocks_mut() {
                self.lower_block(block);
            }
            for expr in stmt.exprs_mut() {
                self.lower_expr(expr);
            }
            if let StmtKind::Assign { targets, value } = &mut stmt.kind {
                if let [Expr { kind: ExprKind::Attribute { value: object, attr }, span }] = targets.as_mut_slice() {
                    let span = *span;
                    let object = std::mem::replace(&mut **object, Expr::name("", span));
                    let value = std::mem::replace(value, Expr::name("", span));
                    let setter = Expr::attribute(self.runtime(span), "set_object_property");
                    let call = Expr::call(setter, vec![object, Expr::str(attr.as_str(), span), value]);
                    stmt.kind = StmtKind::Expr(call);
                }
            }
        }
    }

    fn lower_expr(&self, expr: &mut Expr) {
        for child in expr.children_mut() {
            self.lower_expr(child);
        }
        let ExprKind::Call { func, args } = &mut expr.kind else {
            return;
        };
        let [Arg::Positional(Expr { kind: ExprKind::Name(id), .. })] = args.as_slice() else {
            return;
        };
        if !self.closures.get(id).is_some_and(Closure::is_block_form) {
            return;
        }
        let span = expr.span;
        let closure = Expr::name(id.as_str(), span);
        let target = std::mem::replace(&mut **func, Expr::name("", span));
        let operation = match target.kind {
            ExprKind::Call { .. } => "configure_object",
            _ => "call_block",
        };
        *expr = Expr::call(Expr::attribute(self.runtime(span), operation), vec![target, closure]);
    }
}

// ── Name routing ───────────────────────────────────────────────────

/// Routes free names through the runtime object. A name stays native when an
/// enclosing scope binds it: parameters, `def`/`class`/`import` statements,
/// loop targets and prefixed local definitions.
struct NameRouter<'a> {
    options: &'a TranspileOptions,
    scopes: Vec<HashSet<String>>,
}

impl<'a> NameRouter<'a> {
    fn new(options: &'a TranspileOptions) -> Self {
        Self { options, scopes: vec![HashSet::new()] }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        name == self.options.runtime_name
            || self.options.is_pure_builtin(name)
            || self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn with_scope(&mut self, names: HashSet<String>, f: impl FnOnce(&mut Self)) {
        self.scopes.push(names);
        f(self);
        self.scopes.pop();
    }

    fn route_block(&mut self, body: &mut [Stmt]) {
        for stmt in body {
            self.route_stmt(stmt);
        }
    }

    fn route_stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Assign { targets, .. } if self.options.local_defs => {
                if let [Expr { kind: ExprKind::Name(name), .. }] = targets.as_mut_slice() {
                    if let Some(local) = name.strip_prefix(&self.options.local_def_prefix) {
                        *name = local.to_string();
                        self.declare(name);
                    }
                }
                self.route_own_exprs(stmt);
            }
            StmtKind::For { target, iter, body } => {
                let mut names = HashSet::new();
                target_names(target, &mut names);
                self.with_scope(names, |router| {
                    router.route_expr(target);
                    router.route_expr(iter);
                    router.route_block(body);
                });
            }
            StmtKind::FunctionDef(def) => {
                let def = Rc::make_mut(def);
                self.declare(&def.name);
                for expr in def.decorators.iter_mut().chain(def.params.args.iter_mut().filter_map(|p| p.default.as_mut())) {
                    self.route_expr(expr);
                }
                let params = def.params.names().map(str::to_string).collect();
                let body = &mut def.body;
                self.with_scope(params, |router| router.route_block(body));
            }
            StmtKind::ClassDef(class) => {
                self.declare(&class.name);
                for expr in class.decorators.iter_mut().chain(class.bases.iter_mut()) {
                    self.route_expr(expr);
                }
                let mut names = HashSet::new();
                for stmt in &class.body {
                    if let StmtKind::Assign { targets, .. } = &stmt.kind {
                        for target in targets {
                            target_names(target, &mut names);
                        }
                    }
                }
                let body = &mut class.body;
                self.with_scope(names, |router| router.route_block(body));
            }
            StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
                let bindings: Vec<String> = aliases.iter().map(|alias| alias.binding().to_string()).collect();
                for name in bindings {
                    self.declare(&name);
                }
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                for name in names.clone() {
                    self.declare(&name);
                }
            }
            StmtKind::Try { handlers, .. } => {
                let names: Vec<String> = handlers.iter().filter_map(|h| h.name.clone()).collect();
                for name in names {
                    self.declare(&name);
                }
                self.route_own_exprs(stmt);
                for block in stmt.blocks_mut() {
                    self.route_block(block);
                }
            }
            _ => {
                self.route_own_exprs(stmt);
                for block in stmt.blocks_mut() {
                    self.route_block(block);
                }
            }
        }
    }

    fn route_own_exprs(&mut self, stmt: &mut Stmt) {
        for expr in stmt.exprs_mut() {
            self.route_expr(expr);
        }
    }

    fn route_expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Name(name) if !self.is_bound(name) => {
                let key = Expr::str(name.as_str(), expr.span);
                *expr = Expr::subscript(Expr::name(&self.options.runtime_name, expr.span), key);
            }
            ExprKind::ListComp { generators, .. } => {
                let mut names = HashSet::new();
                for generator in generators.iter() {
                    target_names(&generator.target, &mut names);
                }
                self.with_scope(names, |router| {
                    for child in expr.children_mut() {
                        router.route_expr(child);
                    }
                });
            }
            _ => {
                for child in expr.children_mut() {
                    self.route_expr(child);
                }
            }
        }
    }
}

fn target_names(target: &Expr, names: &mut HashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::rewrite::Rewriter;
    use crate::host::unparse::unparse_module;

    fn transpile_str(source: &str) -> String {
        let options = TranspileOptions::default();
        let rewritten = Rewriter::new(source, "<test>")
            .with_local_defs(options.local_def_prefix())
            .rewrite()
            .unwrap();
        unparse_module(&transpile(&rewritten, "<test>", &options).unwrap())
    }

    #[test]
    fn block_call_inserts_closure_before_statement() {
        assert_eq!(
            transpile_str("greet { print(name) }\n"),
            "@__runtime__.closure()\n\
             def _closure_1(self):\n    \
             __runtime__['print'](__runtime__['name'])\n\
             __runtime__.call_block(__runtime__['greet'], _closure_1)\n"
        );
    }

    #[test]
    fn call_with_arguments_then_block_configures_the_result() {
        let code = transpile_str("task('build') {\n  deps = ['a']\n}\n");
        assert!(code.contains("__runtime__.configure_object(__runtime__['task']('build'), _closure_1)"), "{code}");
        assert!(code.contains("    __runtime__['deps'] = ['a']"), "{code}");
    }

    #[test]
    fn local_definitions_stay_native() {
        let code = transpile_str("let x = 1\nfoo { x }\n");
        assert!(code.starts_with("x = 1\n"), "{code}");
        assert!(code.contains("def _closure_1(self):\n    x\n"), "{code}");
    }

    #[test]
    fn attribute_store_goes_through_the_runtime() {
        assert_eq!(
            transpile_str("project.version = '1.0'\n"),
            "__runtime__.set_object_property(__runtime__['project'], 'version', '1.0')\n"
        );
    }

    #[test]
    fn parameters_and_loop_targets_are_local() {
        let code = transpile_str("def f(a):\n  return a + b\nfor i in items:\n  print(i)\n");
        assert!(code.contains("return a + __runtime__['b']"), "{code}");
        assert!(code.contains("for i in __runtime__['items']:"), "{code}");
        assert!(code.contains("__runtime__['print'](i)"), "{code}");
    }

    #[test]
    fn arrow_closure_takes_explicit_parameters_after_self() {
        let code = transpile_str("double = (x) -> x * 2\n");
        assert!(code.contains("def _closure_1(self, x):\n    return x * 2\n"), "{code}");
        assert!(code.contains("__runtime__['double'] = _closure_1"), "{code}");
    }

    #[test]
    fn nested_closures_are_defined_inside_their_parent() {
        let code = transpile_str("outer {\n  inner {\n    x = 1\n  }\n}\n");
        let outer = code.find("def _closure_1(self):").unwrap();
        let inner = code.find("    def _closure_1_closure_1(self):").unwrap();
        assert!(outer < inner, "{code}");
        assert!(code.contains("    __runtime__.call_block(__runtime__['inner'], _closure_1_closure_1)"), "{code}");
    }

    #[test]
    fn imports_and_pure_builtins_are_left_alone() {
        let options = TranspileOptions { pure_builtins: vec!["print".into()], ..TranspileOptions::default() };
        let rewritten = Rewriter::new("import os\nprint(os)\n", "<test>").rewrite().unwrap();
        let code = unparse_module(&transpile(&rewritten, "<test>", &options).unwrap());
        assert_eq!(code, "import os\nprint(os)\n");
    }

    #[test]
    fn preamble_is_prepended() {
        let options = TranspileOptions { preamble: "VERSION = 1\n".into(), ..TranspileOptions::default() };
        let rewritten = Rewriter::new("x\n", "<test>").rewrite().unwrap();
        let code = unparse_module(&transpile(&rewritten, "<test>", &options).unwrap());
        assert_eq!(code, "__runtime__['VERSION'] = 1\n__runtime__['x']\n");
    }

    #[test]
    fn closure_body_keeps_source_lines() {
        let options = TranspileOptions::default();
        let rewritten = Rewriter::new("a = 1\n\nfoo {\n  bar()\n}\n", "<test>").rewrite().unwrap();
        let module = transpile(&rewritten, "<test>", &options).unwrap();
        let Some(StmtKind::FunctionDef(def)) = module.body.get(1).map(|s| &s.kind) else {
            panic!("expected the closure definition second");
        };
        assert_eq!(def.span.line, 3);
        assert_eq!(def.body.first().map(|s| s.span.line), Some(4));
    }
}
