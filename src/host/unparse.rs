//! Render host ASTs back to source text.

use std::fmt::Write as _;

use super::ast::*;

const INDENT: &str = "    ";

pub fn unparse_module(module: &Module) -> String {
    let mut out = String::new();
    write_block(&mut out, &module.body, 0);
    out
}

pub fn unparse_expr(expr: &Expr) -> String {
    render(expr, 0)
}

/// Single-quoted host string literal for `value`.
pub fn quote_str(value: &str) -> String {
    format!("'{}'", escape(value, '\''))
}

/// Float literal that reads back as the same value.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        "float('nan')".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "float('inf')" } else { "-float('inf')" }.to_string()
    } else {
        format!("{value:?}")
    }
}

fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

// ── Statements ────────────────────────────────────────────────

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

fn write_block(out: &mut String, body: &[Stmt], depth: usize) {
    if body.is_empty() {
        line(out, depth, "pass");
    }
    for stmt in body {
        write_stmt(out, stmt, depth);
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match &stmt.kind {
        StmtKind::Expr(e) => line(out, depth, &render(e, 0)),
        StmtKind::Assign { targets, value } => {
            let mut text: Vec<String> = targets.iter().map(|t| render(t, 0)).collect();
            text.push(render(value, 0));
            line(out, depth, &text.join(" = "));
        }
        StmtKind::AugAssign { target, op, value } => {
            line(out, depth, &format!("{} {}= {}", render(target, 0), op.symbol(), render(value, 0)));
        }
        StmtKind::Pass => line(out, depth, "pass"),
        StmtKind::Break => line(out, depth, "break"),
        StmtKind::Continue => line(out, depth, "continue"),
        StmtKind::Return(value) => line(out, depth, &keyword_with("return", value.as_ref())),
        StmtKind::Raise(value) => line(out, depth, &keyword_with("raise", value.as_ref())),
        StmtKind::Yield(value) => line(out, depth, &keyword_with("yield", value.as_ref())),
        StmtKind::YieldFrom(value) => line(out, depth, &format!("yield from {}", render(value, 0))),
        StmtKind::Assert { test, msg } => {
            let text = match msg {
                Some(msg) => format!("assert {}, {}", render(test, 1), render(msg, 1)),
                None => format!("assert {}", render(test, 1)),
            };
            line(out, depth, &text);
        }
        StmtKind::Import(names) => line(out, depth, &format!("import {}", aliases(names))),
        StmtKind::ImportFrom { module, names } => {
            line(out, depth, &format!("from {module} import {}", aliases(names)));
        }
        StmtKind::Global(names) => line(out, depth, &format!("global {}", names.join(", "))),
        StmtKind::Nonlocal(names) => line(out, depth, &format!("nonlocal {}", names.join(", "))),
        StmtKind::If { test, body, orelse } => {
            line(out, depth, &format!("if {}:", render(test, 1)));
            write_block(out, body, depth + 1);
            write_orelse(out, orelse, depth);
        }
        StmtKind::While { test, body } => {
            line(out, depth, &format!("while {}:", render(test, 1)));
            write_block(out, body, depth + 1);
        }
        StmtKind::For { target, iter, body } => {
            line(out, depth, &format!("for {} in {}:", render(target, 0), render(iter, 0)));
            write_block(out, body, depth + 1);
        }
        StmtKind::With { context, target, body } => {
            let header = match target {
                Some(target) => format!("with {} as {}:", render(context, 1), render(target, 0)),
                None => format!("with {}:", render(context, 1)),
            };
            line(out, depth, &header);
            write_block(out, body, depth + 1);
        }
        StmtKind::Try { body, handlers, finalbody } => {
            line(out, depth, "try:");
            write_block(out, body, depth + 1);
            for handler in handlers {
                let header = match (&handler.kind, &handler.name) {
                    (Some(kind), Some(name)) => format!("except {} as {name}:", render(kind, 1)),
                    (Some(kind), None) => format!("except {}:", render(kind, 1)),
                    (None, _) => "except:".to_string(),
                };
                line(out, depth, &header);
                write_block(out, &handler.body, depth + 1);
            }
            if !finalbody.is_empty() {
                line(out, depth, "finally:");
                write_block(out, finalbody, depth + 1);
            }
        }
        StmtKind::FunctionDef(def) => {
            for decorator in &def.decorators {
                line(out, depth, &format!("@{}", render(decorator, 0)));
            }
            line(out, depth, &format!("def {}({}):", def.name, params(&def.params)));
            write_block(out, &def.body, depth + 1);
        }
        StmtKind::ClassDef(class) => {
            for decorator in &class.decorators {
                line(out, depth, &format!("@{}", render(decorator, 0)));
            }
            if class.bases.is_empty() {
                line(out, depth, &format!("class {}:", class.name));
            } else {
                let bases: Vec<_> = class.bases.iter().map(|b| render(b, 1)).collect();
                line(out, depth, &format!("class {}({}):", class.name, bases.join(", ")));
            }
            write_block(out, &class.body, depth + 1);
        }
    }
}

fn write_orelse(out: &mut String, orelse: &[Stmt], depth: usize) {
    match orelse {
        [] => {}
        [Stmt { kind: StmtKind::If { test, body, orelse }, .. }] => {
            line(out, depth, &format!("elif {}:", render(test, 1)));
            write_block(out, body, depth + 1);
            write_orelse(out, orelse, depth);
        }
        _ => {
            line(out, depth, "else:");
            write_block(out, orelse, depth + 1);
        }
    }
}

fn keyword_with(keyword: &str, value: Option<&Expr>) -> String {
    match value {
        Some(value) => format!("{keyword} {}", render(value, 0)),
        None => keyword.to_string(),
    }
}

fn aliases(names: &[Alias]) -> String {
    let names: Vec<_> = names
        .iter()
        .map(|a| match &a.asname {
            Some(asname) => format!("{} as {asname}", a.name),
            None => a.name.clone(),
        })
        .collect();
    names.join(", ")
}

fn params(params: &Params) -> String {
    let mut parts: Vec<String> = params
        .args
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!("{}={}", p.name, render(default, 1)),
            None => p.name.clone(),
        })
        .collect();
    parts.extend(params.vararg.iter().map(|v| format!("*{v}")));
    parts.extend(params.kwarg.iter().map(|k| format!("**{k}")));
    parts.join(", ")
}

// ── Expressions ───────────────────────────────────────────────

const PREC_TERNARY: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_NOT: u8 = 4;
const PREC_COMPARE: u8 = 5;
const PREC_UNARY: u8 = 12;
const PREC_POWER: u8 = 13;
const PREC_ATOM: u8 = 14;

fn binop_prec(op: BinOp) -> u8 {
    match op {
        BinOp::BitOr => 6,
        BinOp::BitXor => 7,
        BinOp::BitAnd => 8,
        BinOp::LShift | BinOp::RShift => 9,
        BinOp::Add | BinOp::Sub => 10,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::MatMul => 11,
        BinOp::Pow => PREC_POWER,
    }
}

/// Render `expr`, parenthesized when it binds looser than `context`.
fn render(expr: &Expr, context: u8) -> String {
    let (prec, text) = render_bare(expr);
    if prec < context {
        format!("({text})")
    } else {
        text
    }
}

fn render_bare(expr: &Expr) -> (u8, String) {
    match &expr.kind {
        ExprKind::Constant(constant) => (PREC_ATOM, constant_text(constant)),
        ExprKind::FString(parts) => (PREC_ATOM, fstring(parts)),
        ExprKind::Name(name) => (PREC_ATOM, name.clone()),
        ExprKind::List(items) => (PREC_ATOM, format!("[{}]", list(items))),
        ExprKind::Tuple(items) => {
            let text = match items.as_slice() {
                [only] => format!("({},)", render(only, PREC_TERNARY)),
                _ => format!("({})", list(items)),
            };
            (PREC_ATOM, text)
        }
        ExprKind::Dict(entries) => {
            let entries: Vec<_> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", render(k, PREC_TERNARY), render(v, PREC_TERNARY)))
                .collect();
            (PREC_ATOM, format!("{{{}}}", entries.join(", ")))
        }
        ExprKind::ListComp { elt, generators } => {
            let mut text = render(elt, PREC_TERNARY);
            for generator in generators {
                let _ = write!(text, " for {} in {}", render(&generator.target, 0), render(&generator.iter, PREC_OR));
                for cond in &generator.ifs {
                    let _ = write!(text, " if {}", render(cond, PREC_OR));
                }
            }
            (PREC_ATOM, format!("[{text}]"))
        }
        ExprKind::Attribute { value, attr } => (PREC_ATOM, format!("{}.{attr}", render(value, PREC_ATOM))),
        ExprKind::Subscript { value, index } => {
            let index = match &index.kind {
                ExprKind::Tuple(items) if items.len() > 1 => list(items),
                _ => render(index, 0),
            };
            (PREC_ATOM, format!("{}[{index}]", render(value, PREC_ATOM)))
        }
        ExprKind::Slice { lower, upper, step } => {
            let part = |e: &Option<Box<Expr>>| e.as_ref().map(|e| render(e, PREC_TERNARY)).unwrap_or_default();
            let mut text = format!("{}:{}", part(lower), part(upper));
            if step.is_some() {
                text.push(':');
                text += &part(step);
            }
            (PREC_ATOM, text)
        }
        ExprKind::Call { func, args } => {
            let args: Vec<_> = args
                .iter()
                .map(|arg| match arg {
                    Arg::Positional(e) => render(e, PREC_TERNARY),
                    Arg::Starred(e) => format!("*{}", render(e, PREC_TERNARY)),
                    Arg::Keyword(k, e) => format!("{k}={}", render(e, PREC_TERNARY)),
                    Arg::DoubleStarred(e) => format!("**{}", render(e, PREC_TERNARY)),
                })
                .collect();
            (PREC_ATOM, format!("{}({})", render(func, PREC_ATOM), args.join(", ")))
        }
        ExprKind::Unary { op: UnaryOp::Not, operand } => (PREC_NOT, format!("not {}", render(operand, PREC_NOT))),
        ExprKind::Unary { op, operand } => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            (PREC_UNARY, format!("{symbol}{}", render(operand, PREC_UNARY)))
        }
        ExprKind::Binary { op, left, right } => {
            let prec = binop_prec(*op);
            let (l, r) = if *op == BinOp::Pow { (prec + 1, PREC_UNARY) } else { (prec, prec + 1) };
            (prec, format!("{} {} {}", render(left, l), op.symbol(), render(right, r)))
        }
        ExprKind::Compare { left, ops } => {
            let mut text = render(left, PREC_COMPARE + 1);
            for (op, right) in ops {
                let _ = write!(text, " {} {}", op.symbol(), render(right, PREC_COMPARE + 1));
            }
            (PREC_COMPARE, text)
        }
        ExprKind::Logical { op, left, right } => {
            let (prec, word) = match op {
                LogicalOp::And => (PREC_AND, "and"),
                LogicalOp::Or => (PREC_OR, "or"),
            };
            (prec, format!("{} {word} {}", render(left, prec), render(right, prec + 1)))
        }
        ExprKind::IfExp { test, body, orelse } => (
            PREC_TERNARY,
            format!("{} if {} else {}", render(body, PREC_OR), render(test, PREC_OR), render(orelse, PREC_TERNARY)),
        ),
    }
}

fn list(items: &[Expr]) -> String {
    let items: Vec<_> = items.iter().map(|e| render(e, PREC_TERNARY)).collect();
    items.join(", ")
}

fn constant_text(constant: &Constant) -> String {
    match constant {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => float_repr(*f),
        Constant::Str(s) => quote_str(s),
    }
}

fn fstring(parts: &[FStringPart]) -> String {
    let mut text = String::from("f\"");
    for part in parts {
        match part {
            FStringPart::Literal(s) => text += &escape(s, '"').replace('{', "{{").replace('}', "}}"),
            FStringPart::Expr { value, conversion, spec } => {
                text.push('{');
                text += &render(value, PREC_TERNARY);
                if let Some(conversion) = conversion {
                    text.push('!');
                    text.push(*conversion);
                }
                if let Some(spec) = spec {
                    text.push(':');
                    text += spec;
                }
                text.push('}');
            }
        }
    }
    text.push('"');
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::parser::{parse_expression, parse_module};

    fn roundtrip_expr(source: &str) -> String {
        unparse_expr(&parse_expression(source, "<test>").unwrap())
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_str("it's\n"), "'it\\'s\\n'");
        assert_eq!(quote_str("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn floats_read_back() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(f64::INFINITY), "float('inf')");
    }

    #[test]
    fn parentheses_follow_precedence() {
        assert_eq!(roundtrip_expr("(a + b) * c"), "(a + b) * c");
        assert_eq!(roundtrip_expr("a + b * c"), "a + b * c");
        assert_eq!(roundtrip_expr("a - (b - c)"), "a - (b - c)");
        assert_eq!(roundtrip_expr("not (a or b)"), "not (a or b)");
        assert_eq!(roundtrip_expr("-x ** 2"), "-x ** 2");
        assert_eq!(roundtrip_expr("(-x) ** 2"), "(-x) ** 2");
    }

    #[test]
    fn containers_and_calls() {
        assert_eq!(roundtrip_expr("f(1, *a, k = 2)"), "f(1, *a, k=2)");
        assert_eq!(roundtrip_expr("{'a': [1, (2,)]}"), "{'a': [1, (2,)]}");
        assert_eq!(roundtrip_expr("x[1:2, ::3]"), "x[1:2, ::3]");
        assert_eq!(roundtrip_expr("[i for i in r if i]"), "[i for i in r if i]");
    }

    #[test]
    fn fstring_rebuilt() {
        assert_eq!(roundtrip_expr("f'{a!r:>3} {{b}}'"), "f\"{a!r:>3} {{b}}\"");
    }

    #[test]
    fn statements() {
        let source = "@deco\ndef f(a, b=1, *c):\n  if a:\n    return b\n  elif c:\n    pass\n  else:\n    x += 1\n";
        let module = parse_module(source, "<test>").unwrap();
        assert_eq!(
            unparse_module(&module),
            "@deco\ndef f(a, b=1, *c):\n    if a:\n        return b\n    elif c:\n        pass\n    else:\n        x += 1\n"
        );
    }

    #[test]
    fn reparse_is_stable() {
        let source = "try:\n    import os as o\nexcept (A, B) as e:\n    raise\nfinally:\n    del_ = [x for x in y]\n";
        let once = unparse_module(&parse_module(source, "<test>").unwrap());
        let twice = unparse_module(&parse_module(&once, "<test>").unwrap());
        assert_eq!(once, twice);
    }
}
