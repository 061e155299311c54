//! Recursive-descent parser for the host language.
//!
//! Runs over the same scanner as the DSL rewriter. A pre-pass turns the raw
//! token stream into logical lines: layout inside brackets and blank lines
//! disappear, every remaining line starts with an `Indent` token and ends
//! with a `Newline`.

use std::rc::Rc;

use super::ast::*;
use crate::dsl::error::SyntaxError;
use crate::dsl::lexer::{tokenize, Pos, Token, TokenKind};

pub fn parse_module(source: &str, filename: &str) -> Result<Module, SyntaxError> {
    Parser::new(source, filename).parse_module()
}

/// Parse a lone expression (or bare tuple), e.g. the inside of an f-string field.
pub fn parse_expression(source: &str, filename: &str) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(source, filename);
    parser.skip_layout();
    let expr = parser.parse_exprlist()?;
    parser.skip_layout();
    let token = parser.peek();
    if !token.is_eof() {
        return Err(parser.error(format!("unexpected {token}"), token.pos));
    }
    Ok(expr)
}

/// Drop layout the grammar does not care about. Indents survive only at
/// the start of non-blank lines outside brackets.
fn logical_tokens(source: &str) -> Vec<Token<'_>> {
    let raw = tokenize(source);
    let mut out: Vec<Token<'_>> = Vec::with_capacity(raw.len());
    let mut depth = 0usize;
    for (i, token) in raw.iter().enumerate() {
        match token.kind {
            TokenKind::Whitespace | TokenKind::Comment => {}
            TokenKind::Indent => {
                let next = raw[i + 1..]
                    .iter()
                    .find(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::Comment));
                let blank = next.map_or(true, |t| matches!(t.kind, TokenKind::Newline | TokenKind::Eof));
                if depth == 0 && !blank {
                    out.push(*token);
                }
            }
            TokenKind::Newline => {
                if depth == 0 && out.last().is_some_and(|t| t.kind != TokenKind::Newline) {
                    out.push(*token);
                }
            }
            TokenKind::Control => {
                match token.text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                out.push(*token);
            }
            _ => out.push(*token),
        }
    }
    out
}

struct Parser<'s> {
    source: &'s str,
    filename: &'s str,
    tokens: Vec<Token<'s>>,
    pos: usize,
    eof: Token<'s>,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str, filename: &'s str) -> Self {
        let tokens = logical_tokens(source);
        let eof = tokens.last().copied().unwrap_or(Token { kind: TokenKind::Eof, text: "", pos: Pos::START });
        Self { source, filename, tokens, pos: 0, eof }
    }

    fn parse_module(&mut self) -> Result<Module, SyntaxError> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            let token = self.peek();
            if token.is_eof() {
                break;
            }
            // Top-level statements may start at any column.
            let width = if token.kind == TokenKind::Indent {
                self.advance();
                token.text.len()
            } else {
                0
            };
            body.extend(self.parse_statement(width)?);
        }
        Ok(Module { body })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> Token<'s> {
        self.tokens.get(self.pos).copied().unwrap_or(self.eof)
    }

    fn peek_at(&self, n: usize) -> Token<'s> {
        self.tokens.get(self.pos + n).copied().unwrap_or(self.eof)
    }

    fn span(&self) -> Span {
        let pos = self.peek().pos;
        Span::new(pos.line, pos.column)
    }

    fn advance(&mut self) -> Token<'s> {
        let token = self.peek();
        if !token.is_eof() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, glyph: &str) -> bool {
        self.peek().is_control(glyph)
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.peek().is_name(kw)
    }

    fn eat(&mut self, glyph: &str) -> bool {
        let hit = self.at(glyph);
        if hit {
            self.advance();
        }
        hit
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        let hit = self.at_kw(kw);
        if hit {
            self.advance();
        }
        hit
    }

    fn expect(&mut self, glyph: &str) -> Result<Token<'s>, SyntaxError> {
        let token = self.peek();
        if token.is_control(glyph) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{glyph}' but got {token}"), token.pos))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SyntaxError> {
        let token = self.peek();
        if token.is_name(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}' but got {token}"), token.pos))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        let token = self.peek();
        if token.kind == TokenKind::Name && !is_keyword(token.text) {
            self.advance();
            Ok(token.text.to_string())
        } else {
            Err(self.error(format!("expected a name but got {token}"), token.pos))
        }
    }

    fn error(&self, message: impl Into<String>, pos: Pos) -> SyntaxError {
        SyntaxError::at(message, self.filename, self.source, pos)
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_layout(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Indent) {
            self.advance();
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn at_stmt_end(&self) -> bool {
        self.at_line_end() || self.at(";")
    }

    /// Next line is a continuation clause (`else`, `except`, ...) of a
    /// compound statement at `width`.
    fn at_clause(&self, width: usize, kw: &str) -> bool {
        let indent = self.peek();
        indent.kind == TokenKind::Indent && indent.text.len() == width && self.peek_at(1).is_name(kw)
    }

    fn starts_expr(&self) -> bool {
        let token = self.peek();
        match token.kind {
            TokenKind::Literal => true,
            TokenKind::Name => !is_keyword(token.text) || token.is_name_in(&["None", "True", "False", "not"]),
            TokenKind::Control => token.is_control_in(&["(", "[", "{", "-", "+", "~"]),
            _ => false,
        }
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_statement(&mut self, width: usize) -> Result<Vec<Stmt>, SyntaxError> {
        let token = self.peek();
        if token.is_control("@") {
            return Ok(vec![self.parse_decorated(width)?]);
        }
        if token.kind == TokenKind::Name {
            let stmt = match token.text {
                "if" => Some(self.parse_if(width)?),
                "while" => Some(self.parse_while(width)?),
                "for" => Some(self.parse_for(width)?),
                "with" => Some(self.parse_with(width)?),
                "try" => Some(self.parse_try(width)?),
                "def" => Some(self.parse_def(width, Vec::new())?),
                "class" => Some(self.parse_class(width, Vec::new())?),
                _ => None,
            };
            if let Some(stmt) = stmt {
                return Ok(vec![stmt]);
            }
        }
        self.parse_simple_stmts()
    }

    /// The body after a `:`, either on the same line or as an indented block.
    fn parse_suite(&mut self, parent: usize) -> Result<Vec<Stmt>, SyntaxError> {
        if self.peek().kind != TokenKind::Newline {
            return self.parse_simple_stmts();
        }
        self.advance();
        let first = self.peek();
        if first.kind != TokenKind::Indent || first.text.len() <= parent {
            let at = if first.kind == TokenKind::Indent { self.peek_at(1) } else { first };
            return Err(self.error("expected an indented block", at.pos));
        }
        let width = first.text.len();
        let mut body = Vec::new();
        loop {
            let indent = self.peek();
            if indent.kind != TokenKind::Indent || indent.text.len() < width {
                break;
            }
            if indent.text.len() > width {
                return Err(self.error("unexpected indent", self.peek_at(1).pos));
            }
            self.advance();
            body.extend(self.parse_statement(width)?);
        }
        Ok(body)
    }

    fn parse_if(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance(); // `if` or `elif`
        let test = self.parse_expr()?;
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        let orelse = if self.at_clause(width, "elif") {
            self.advance();
            vec![self.parse_if(width)?]
        } else if self.at_clause(width, "else") {
            self.advance();
            self.advance();
            self.expect(":")?;
            self.parse_suite(width)?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, span))
    }

    fn parse_while(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        let test = self.parse_expr()?;
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        Ok(Stmt::new(StmtKind::While { test, body }, span))
    }

    fn parse_for(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect_kw("in")?;
        let iter = self.parse_exprlist()?;
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        Ok(Stmt::new(StmtKind::For { target, iter, body }, span))
    }

    fn parse_with(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        let context = self.parse_expr()?;
        let target = if self.eat_kw("as") { Some(self.parse_target_list()?) } else { None };
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        Ok(Stmt::new(StmtKind::With { context, target, body }, span))
    }

    fn parse_try(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        self.expect(":")?;
        let body = self.parse_suite(width)?;

        let mut handlers = Vec::new();
        while self.at_clause(width, "except") {
            self.advance();
            let span = self.span();
            self.advance();
            let kind = if self.at(":") { None } else { Some(self.parse_expr()?) };
            let name = if self.eat_kw("as") { Some(self.expect_ident()?) } else { None };
            self.expect(":")?;
            let body = self.parse_suite(width)?;
            handlers.push(ExceptHandler { kind, name, body, span });
        }

        let finalbody = if self.at_clause(width, "finally") {
            self.advance();
            self.advance();
            self.expect(":")?;
            self.parse_suite(width)?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            let token = self.peek();
            return Err(self.error("expected 'except' or 'finally' block", token.pos));
        }
        Ok(Stmt::new(StmtKind::Try { body, handlers, finalbody }, span))
    }

    fn parse_decorated(&mut self, width: usize) -> Result<Stmt, SyntaxError> {
        let mut decorators = Vec::new();
        while self.eat("@") {
            decorators.push(self.parse_expr()?);
            let token = self.peek();
            if token.kind != TokenKind::Newline {
                return Err(self.error(format!("expected a line break after decorator, got {token}"), token.pos));
            }
            self.advance();
            let indent = self.peek();
            if indent.kind != TokenKind::Indent || indent.text.len() != width {
                return Err(self.error("expected a definition after decorator", indent.pos));
            }
            self.advance();
        }
        let token = self.peek();
        if token.is_name("def") {
            self.parse_def(width, decorators)
        } else if token.is_name("class") {
            self.parse_class(width, decorators)
        } else {
            Err(self.error(format!("expected 'def' or 'class' after decorator, got {token}"), token.pos))
        }
    }

    fn parse_def(&mut self, width: usize, decorators: Vec<Expr>) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        let name = self.expect_ident()?;
        self.expect("(")?;
        let params = self.parse_params()?;
        self.expect(")")?;
        if self.eat("->") {
            self.parse_expr()?;
        }
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        let is_generator = contains_yield(&body);
        let def = FunctionDef { name, params, body, decorators, is_generator, span };
        Ok(Stmt::new(StmtKind::FunctionDef(Rc::new(def)), span))
    }

    fn parse_params(&mut self) -> Result<Params, SyntaxError> {
        let mut params = Params::default();
        while !self.at(")") {
            if self.eat("**") {
                params.kwarg = Some(self.expect_ident()?);
            } else if self.eat("*") {
                params.vararg = Some(self.expect_ident()?);
            } else {
                let token = self.peek();
                let name = self.expect_ident()?;
                if self.eat(":") {
                    self.parse_expr()?;
                }
                let default = if self.eat("=") { Some(self.parse_expr()?) } else { None };
                if default.is_none() && params.args.last().is_some_and(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument", token.pos));
                }
                if params.names().any(|n| n == name) {
                    return Err(self.error(format!("duplicate argument '{name}'"), token.pos));
                }
                params.args.push(Param { name, default });
            }
            if !self.eat(",") {
                break;
            }
        }
        Ok(params)
    }

    fn parse_class(&mut self, width: usize, decorators: Vec<Expr>) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        self.advance();
        let name = self.expect_ident()?;
        let mut bases = Vec::new();
        if self.eat("(") {
            while !self.at(")") {
                bases.push(self.parse_expr()?);
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(")")?;
        }
        self.expect(":")?;
        let body = self.parse_suite(width)?;
        Ok(Stmt::new(StmtKind::ClassDef(ClassDef { name, bases, body, decorators }), span))
    }

    /// Statements on one line, separated by `;`, including the line break.
    fn parse_simple_stmts(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_simple()?);
            if !self.eat(";") || self.at_line_end() {
                break;
            }
        }
        let token = self.peek();
        match token.kind {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::Eof => {}
            _ => return Err(self.error(format!("unexpected {token}"), token.pos)),
        }
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        let token = self.peek();
        if token.kind != TokenKind::Name {
            return self.parse_expr_stmt();
        }
        let kind = match token.text {
            "pass" => {
                self.advance();
                StmtKind::Pass
            }
            "break" => {
                self.advance();
                StmtKind::Break
            }
            "continue" => {
                self.advance();
                StmtKind::Continue
            }
            "return" => {
                self.advance();
                StmtKind::Return(self.parse_optional_exprlist()?)
            }
            "assert" => {
                self.advance();
                let test = self.parse_expr()?;
                let msg = if self.eat(",") { Some(self.parse_expr()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            "raise" => {
                self.advance();
                let exc = self.parse_optional_exprlist()?;
                if exc.is_some() && self.eat_kw("from") {
                    self.parse_expr()?;
                }
                StmtKind::Raise(exc)
            }
            "yield" => {
                self.advance();
                if self.eat_kw("from") {
                    StmtKind::YieldFrom(self.parse_expr()?)
                } else {
                    StmtKind::Yield(self.parse_optional_exprlist()?)
                }
            }
            "import" => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    names.push(self.parse_alias(true)?);
                    if !self.eat(",") {
                        break;
                    }
                }
                StmtKind::Import(names)
            }
            "from" => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect_kw("import")?;
                let grouped = self.eat("(");
                let mut names = Vec::new();
                loop {
                    names.push(self.parse_alias(false)?);
                    if !self.eat(",") || (grouped && self.at(")")) {
                        break;
                    }
                }
                if grouped {
                    self.expect(")")?;
                }
                StmtKind::ImportFrom { module, names }
            }
            "global" | "nonlocal" => {
                self.advance();
                let mut names = vec![self.expect_ident()?];
                while self.eat(",") {
                    names.push(self.expect_ident()?);
                }
                if token.text == "global" {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            _ => return self.parse_expr_stmt(),
        };
        Ok(Stmt::new(kind, span))
    }

    fn parse_optional_exprlist(&mut self) -> Result<Option<Expr>, SyntaxError> {
        if self.at_stmt_end() {
            Ok(None)
        } else {
            self.parse_exprlist().map(Some)
        }
    }

    fn parse_dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_ident()?;
        while self.eat(".") {
            name.push('.');
            name += &self.expect_ident()?;
        }
        Ok(name)
    }

    fn parse_alias(&mut self, dotted: bool) -> Result<Alias, SyntaxError> {
        let name = if dotted { self.parse_dotted_name()? } else { self.expect_ident()? };
        let asname = if self.eat_kw("as") { Some(self.expect_ident()?) } else { None };
        Ok(Alias { name, asname })
    }

    /// Expression statement, assignment chain or augmented assignment.
    fn parse_expr_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        let first = self.parse_exprlist()?;

        let token = self.peek();
        if token.kind == TokenKind::Control {
            if let Some(op) = BinOp::from_augmented(token.text) {
                if !matches!(first.kind, ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }) {
                    return Err(self.error("illegal target for augmented assignment", token.pos));
                }
                self.advance();
                let value = self.parse_exprlist()?;
                return Ok(Stmt::new(StmtKind::AugAssign { target: first, op, value }, span));
            }
        }

        if !self.at("=") {
            return Ok(Stmt::new(StmtKind::Expr(first), span));
        }
        let mut targets = vec![first];
        let value = loop {
            self.advance();
            let value = self.parse_exprlist()?;
            if !self.at("=") {
                break value;
            }
            targets.push(value);
        };
        if let Some(bad) = targets.iter().find(|t| !t.is_assignable()) {
            let pos = self.pos_of(bad.span);
            return Err(self.error("cannot assign to expression", pos));
        }
        Ok(Stmt::new(StmtKind::Assign { targets, value }, span))
    }

    fn pos_of(&self, span: Span) -> Pos {
        self.tokens
            .iter()
            .find(|t| t.pos.line == span.line && t.pos.column == span.column)
            .map_or(self.peek().pos, |t| t.pos)
    }

    fn parse_target_list(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let token = self.peek();
        let mut items = vec![self.parse_bit_or()?];
        let mut tuple = false;
        while self.eat(",") {
            tuple = true;
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_bit_or()?);
        }
        let target = match items.pop() {
            Some(only) if !tuple => only,
            last => {
                items.extend(last);
                Expr::new(ExprKind::Tuple(items), span)
            }
        };
        if !target.is_assignable() {
            return Err(self.error("cannot assign to expression", token.pos));
        }
        Ok(target)
    }

    // ── Expression parsing (precedence climbing) ──────────────────

    /// Comma-separated expressions, yielding a tuple when there is a comma.
    fn parse_exprlist(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let first = self.parse_expr()?;
        if !self.at(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        let body = self.parse_or()?;
        if !self.eat_kw("if") {
            return Ok(body);
        }
        let test = self.parse_or()?;
        self.expect_kw("else")?;
        let orelse = self.parse_expr()?;
        let span = body.span;
        Ok(Expr::new(
            ExprKind::IfExp { test: Box::new(test), body: Box::new(body), orelse: Box::new(orelse) },
            span,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;
        while self.eat_kw("or") {
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_not()?;
        while self.eat_kw("and") {
            let right = self.parse_not()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        if self.eat_kw("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }, span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.parse_bit_or()?;
        let mut ops = Vec::new();
        loop {
            let token = self.peek();
            let op = match token.text {
                "<" if token.kind == TokenKind::Control => CmpOp::Lt,
                ">" if token.kind == TokenKind::Control => CmpOp::Gt,
                "==" => CmpOp::Eq,
                "!=" => CmpOp::NotEq,
                "<=" => CmpOp::LtE,
                ">=" => CmpOp::GtE,
                "in" if token.kind == TokenKind::Name => CmpOp::In,
                "not" if token.kind == TokenKind::Name && self.peek_at(1).is_name("in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                "is" if token.kind == TokenKind::Name => {
                    if self.peek_at(1).is_name("not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_bit_or()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = left.span;
        Ok(Expr::new(ExprKind::Compare { left: Box::new(left), ops }, span))
    }

    fn parse_bit_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_bit_xor()?;
        while self.eat("|") {
            let right = self.parse_bit_xor()?;
            left = binary(BinOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_bit_and()?;
        while self.eat("^") {
            let right = self.parse_bit_and()?;
            left = binary(BinOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_shift()?;
        while self.eat("&") {
            let right = self.parse_shift()?;
            left = binary(BinOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_add()?;
        loop {
            let op = if self.eat("<<") {
                BinOp::LShift
            } else if self.eat(">>") {
                BinOp::RShift
            } else {
                break;
            };
            let right = self.parse_add()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_mul()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.peek();
            let op = match token.text {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "//" => BinOp::FloorDiv,
                "%" => BinOp::Mod,
                "@" => BinOp::MatMul,
                _ => break,
            };
            if token.kind != TokenKind::Control {
                break;
            }
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Pos
        } else if self.eat("~") {
            UnaryOp::Invert
        } else {
            return self.parse_power();
        };
        let operand = self.parse_unary()?;
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_postfix()?;
        if self.eat("**") {
            let exponent = self.parse_unary()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let attr = self.expect_ident()?;
                expr = Expr::attribute(expr, attr);
            } else if self.eat("(") {
                let args = self.parse_call_args()?;
                let span = expr.span;
                expr = Expr::new(ExprKind::Call { func: Box::new(expr), args }, span);
            } else if self.eat("[") {
                let index = self.parse_subscript()?;
                self.expect("]")?;
                expr = Expr::subscript(expr, index);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after `(`, through the closing `)`.
    fn parse_call_args(&mut self) -> Result<Vec<Arg>, SyntaxError> {
        let mut args = Vec::new();
        while !self.at(")") {
            let arg = if self.eat("**") {
                Arg::DoubleStarred(self.parse_expr()?)
            } else if self.eat("*") {
                Arg::Starred(self.parse_expr()?)
            } else if self.peek().kind == TokenKind::Name && self.peek_at(1).is_control("=") {
                let name = self.expect_ident()?;
                self.advance();
                Arg::Keyword(name, self.parse_expr()?)
            } else {
                let value = self.parse_expr()?;
                if args.is_empty() && self.at_kw("for") {
                    Arg::Positional(self.parse_comprehension(value)?)
                } else {
                    Arg::Positional(value)
                }
            };
            args.push(arg);
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn parse_subscript(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let first = self.parse_slice_item()?;
        if !self.at(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(",") {
            if self.at("]") {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_slice_item(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let lower = if self.at(":") { None } else { Some(self.parse_expr()?) };
        let lower = match lower {
            Some(index) if !self.at(":") => return Ok(index),
            other => other.map(Box::new),
        };
        self.expect(":")?;
        let bound_ends = |p: &Self| p.at(":") || p.at("]") || p.at(",");
        let upper = if bound_ends(self) { None } else { Some(Box::new(self.parse_expr()?)) };
        let step = if self.eat(":") && !bound_ends(self) { Some(Box::new(self.parse_expr()?)) } else { None };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, span))
    }

    fn parse_comprehension(&mut self, elt: Expr) -> Result<Expr, SyntaxError> {
        let span = elt.span;
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(Expr::new(ExprKind::ListComp { elt: Box::new(elt), generators }, span))
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let token = self.peek();
        match token.kind {
            TokenKind::Name => {
                self.advance();
                let constant = match token.text {
                    "None" => Constant::None,
                    "True" => Constant::Bool(true),
                    "False" => Constant::Bool(false),
                    kw if is_keyword(kw) => {
                        return Err(self.error(format!("unexpected keyword '{kw}'"), token.pos));
                    }
                    name => return Ok(Expr::name(name, span)),
                };
                Ok(Expr::new(ExprKind::Constant(constant), span))
            }
            TokenKind::Literal => self.parse_literal(),
            TokenKind::Control if token.text == "(" => {
                self.advance();
                if self.eat(")") {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
                }
                let first = self.parse_expr()?;
                if self.at_kw("for") {
                    let comp = self.parse_comprehension(first)?;
                    self.expect(")")?;
                    return Ok(comp);
                }
                if !self.at(",") {
                    self.expect(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(",") && !self.at(")") {
                    items.push(self.parse_expr()?);
                }
                self.expect(")")?;
                Ok(Expr::new(ExprKind::Tuple(items), span))
            }
            TokenKind::Control if token.text == "[" => {
                self.advance();
                let mut items = Vec::new();
                while !self.at("]") {
                    let item = self.parse_expr()?;
                    if items.is_empty() && self.at_kw("for") {
                        let comp = self.parse_comprehension(item)?;
                        self.expect("]")?;
                        return Ok(comp);
                    }
                    items.push(item);
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect("]")?;
                Ok(Expr::new(ExprKind::List(items), span))
            }
            TokenKind::Control if token.text == "{" => {
                self.advance();
                let mut entries = Vec::new();
                while !self.at("}") {
                    let key = self.parse_expr()?;
                    self.expect(":")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect("}")?;
                Ok(Expr::new(ExprKind::Dict(entries), span))
            }
            TokenKind::Unknown => Err(self.error(format!("unexpected character {:?}", token.text), token.pos)),
            _ => Err(self.error(format!("unexpected {token}"), token.pos)),
        }
    }

    // ── Literals ──────────────────────────────────────────────────

    /// A number, or a run of adjacent string literals joined into one.
    fn parse_literal(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let token = self.advance();
        let Some((prefix, body)) = split_string(token.text) else {
            let constant = parse_number(token.text).map_err(|msg| self.error(msg, token.pos))?;
            return Ok(Expr::new(ExprKind::Constant(constant), span));
        };

        let mut parts = self.string_parts(prefix, body, token.pos)?;
        while let Some((prefix, body)) =
            Some(self.peek()).filter(|t| t.kind == TokenKind::Literal).and_then(|t| split_string(t.text))
        {
            let pos = self.advance().pos;
            parts.extend(self.string_parts(prefix, body, pos)?);
        }

        if parts.iter().all(|p| matches!(p, FStringPart::Literal(_))) {
            let text: String = parts
                .into_iter()
                .filter_map(|p| match p {
                    FStringPart::Literal(s) => Some(s),
                    FStringPart::Expr { .. } => None,
                })
                .collect();
            return Ok(Expr::str(text, span));
        }
        Ok(Expr::new(ExprKind::FString(parts), span))
    }

    fn string_parts(&self, prefix: &str, body: &str, pos: Pos) -> Result<Vec<FStringPart>, SyntaxError> {
        let raw = prefix.contains(['r', 'R']);
        let decode = |text: &str| if raw { Ok(text.to_string()) } else { unescape(text) };
        if !prefix.contains(['f', 'F']) {
            let text = decode(body).map_err(|msg| self.error(msg, pos))?;
            return Ok(vec![FStringPart::Literal(text)]);
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(self.error("single '}' is not allowed in f-string", pos)),
                '{' => {
                    let end = field_end(body, i + 1)
                        .ok_or_else(|| self.error("expected '}' in f-string", pos))?;
                    while chars.peek().is_some_and(|&(j, _)| j <= end) {
                        chars.next();
                    }
                    if !literal.is_empty() {
                        let text = decode(&std::mem::take(&mut literal)).map_err(|msg| self.error(msg, pos))?;
                        parts.push(FStringPart::Literal(text));
                    }
                    parts.push(self.fstring_field(&body[i + 1..end], pos)?);
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            let text = decode(&literal).map_err(|msg| self.error(msg, pos))?;
            parts.push(FStringPart::Literal(text));
        }
        Ok(parts)
    }

    /// `expr`, `expr!r` or `expr:spec` between the braces of an f-string.
    fn fstring_field(&self, field: &str, pos: Pos) -> Result<FStringPart, SyntaxError> {
        let (field, spec) = match top_level_find(field, ':') {
            Some(i) => (&field[..i], Some(field[i + 1..].to_string())),
            None => (field, None),
        };
        let (expr_text, conversion) = match field.trim_end().rsplit_once('!') {
            Some((expr, conv)) if matches!(conv, "r" | "s" | "a") => (expr, conv.chars().next()),
            _ => (field, None),
        };
        if expr_text.trim().is_empty() {
            return Err(self.error("f-string: empty expression not allowed", pos));
        }
        let value = parse_expression(expr_text, self.filename)
            .map_err(|e| self.error(format!("f-string: {}", e.message), pos))?;
        Ok(FStringPart::Expr { value: Box::new(value), conversion, spec })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span)
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(ExprKind::Logical { op, left: Box::new(left), right: Box::new(right) }, span)
}

fn contains_yield(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Yield(_) | StmtKind::YieldFrom(_) => true,
        StmtKind::If { body, orelse, .. } => contains_yield(body) || contains_yield(orelse),
        StmtKind::While { body, .. } | StmtKind::For { body, .. } | StmtKind::With { body, .. } => {
            contains_yield(body)
        }
        StmtKind::Try { body, handlers, finalbody } => {
            contains_yield(body)
                || handlers.iter().any(|h| contains_yield(&h.body))
                || contains_yield(finalbody)
        }
        _ => false,
    })
}

/// Split a string literal token into its prefix letters and unquoted body.
fn split_string(text: &str) -> Option<(&str, &str)> {
    let quote_at = text.find(['"', '\''])?;
    let (prefix, quoted) = text.split_at(quote_at);
    let q = quoted.chars().next()?;
    let triple: String = std::iter::repeat(q).take(3).collect();
    let body = if quoted.len() >= 6 && quoted.starts_with(&triple) {
        &quoted[3..quoted.len() - 3]
    } else {
        &quoted[1..quoted.len() - 1]
    };
    Some((prefix, body))
}

fn parse_number(text: &str) -> Result<Constant, String> {
    let clean: String = text.chars().filter(|&c| c != '_').collect::<String>().to_ascii_lowercase();
    let radix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| clean.strip_prefix(prefix).map(|digits| (digits, radix)));
    if let Some((digits, radix)) = radix {
        return i64::from_str_radix(digits, radix)
            .map(Constant::Int)
            .map_err(|_| format!("invalid number literal '{text}'"));
    }
    if clean.contains(['.', 'e']) {
        return clean
            .parse::<f64>()
            .map(Constant::Float)
            .map_err(|_| format!("invalid number literal '{text}'"));
    }
    clean.parse::<i64>().map(Constant::Int).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => format!("integer literal too large: {text}"),
        _ => format!("invalid number literal '{text}'"),
    })
}

/// Resolve backslash escapes. Unknown escapes are kept verbatim.
fn unescape(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        match e {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(e),
            '0'..='7' => {
                let mut code = e.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let code = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == width)
                    .ok_or_else(|| format!("truncated \\{e} escape"))?;
                out.push(char::from_u32(code).ok_or_else(|| format!("invalid \\{e} escape"))?);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Byte index of the `}` closing an f-string field that starts at `start`.
fn field_end(body: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in body.get(start..)?.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, '}') if depth == 0 => return Some(start + i),
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    None
}

/// First `needle` outside brackets and quotes.
fn top_level_find(text: &str, needle: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, c) if c == needle && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source, "<test>").unwrap()
    }

    fn expr(source: &str) -> Expr {
        parse_expression(source, "<test>").unwrap()
    }

    #[test]
    fn assignment_and_call() {
        let module = parse("x = 1\nprint(x)\n");
        assert_eq!(module.body.len(), 2);
        assert!(matches!(&module.body[0].kind, StmtKind::Assign { targets, .. } if targets[0].as_name() == Some("x")));
        assert!(matches!(&module.body[1].kind, StmtKind::Expr(e) if matches!(e.kind, ExprKind::Call { .. })));
    }

    #[test]
    fn chained_assignment() {
        let module = parse("a = b = 3");
        let StmtKind::Assign { targets, .. } = &module.body[0].kind else { panic!() };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn tuple_unpacking_target() {
        let module = parse("a, b = 1, 2\n");
        let StmtKind::Assign { targets, value } = &module.body[0].kind else { panic!() };
        assert!(matches!(&targets[0].kind, ExprKind::Tuple(items) if items.len() == 2));
        assert!(matches!(&value.kind, ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn invalid_target() {
        let err = parse_module("f() = 1\n", "<test>").unwrap_err();
        assert_eq!(err.message, "cannot assign to expression");
    }

    #[test]
    fn if_elif_else() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &module.body[0].kind else { panic!() };
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else { panic!() };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn nested_blocks_and_dedent() {
        let module = parse("def f(a, b=2, *rest, **kw):\n  for i in a:\n    if i:\n      return i\n  return b\nx = f\n");
        assert_eq!(module.body.len(), 2);
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        assert_eq!(def.params.names().collect::<Vec<_>>(), vec!["a", "b", "rest", "kw"]);
        assert_eq!(def.body.len(), 2);
        assert!(!def.is_generator);
    }

    #[test]
    fn generator_detected() {
        let module = parse("def g():\n    for i in range(3):\n        yield i\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        assert!(def.is_generator);
    }

    #[test]
    fn inline_suite() {
        let module = parse("if x: a(); b()\nelse: c()\n");
        let StmtKind::If { body, orelse, .. } = &module.body[0].kind else { panic!() };
        assert_eq!((body.len(), orelse.len()), (2, 1));
    }

    #[test]
    fn brackets_span_lines() {
        let module = parse("x = [\n  1,\n    2,\n]\ny = f(a,\n      b)\n");
        assert_eq!(module.body.len(), 2);
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let module = parse("def f():\n\n    # note\n    return 1\n\n# trailing\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn unexpected_indent() {
        let err = parse_module("def f():\n  a = 1\n    b = 2\n", "<test>").unwrap_err();
        assert_eq!(err.message, "unexpected indent");
        assert_eq!(err.line, 3);
    }

    #[test]
    fn missing_block() {
        let err = parse_module("if a:\nb = 1\n", "<test>").unwrap_err();
        assert_eq!(err.message, "expected an indented block");
    }

    #[test]
    fn decorators_attach() {
        let module = parse("@rt.closure()\ndef c(self):\n    pass\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        assert_eq!(def.decorators.len(), 1);
    }

    #[test]
    fn try_except_finally() {
        let module = parse("try:\n    f()\nexcept KeyError as e:\n    g(e)\nexcept:\n    pass\nfinally:\n    h()\n");
        let StmtKind::Try { handlers, finalbody, .. } = &module.body[0].kind else { panic!() };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn precedence() {
        let e = expr("1 + 2 * 3 ** 2");
        let ExprKind::Binary { op: BinOp::Add, right, .. } = e.kind else { panic!() };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn comparisons_chain() {
        let e = expr("a < b <= c not in d is not e");
        let ExprKind::Compare { ops, .. } = e.kind else { panic!() };
        let ops: Vec<_> = ops.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn ternary_and_logic() {
        let e = expr("a if not b and c else d");
        assert!(matches!(e.kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn comprehension_and_slices() {
        assert!(matches!(expr("[x * 2 for x in xs if x]").kind, ExprKind::ListComp { .. }));
        assert!(matches!(expr("sum(x for x in xs)").kind, ExprKind::Call { .. }));
        let ExprKind::Subscript { index, .. } = expr("a[1:]").kind else { panic!() };
        assert!(matches!(index.kind, ExprKind::Slice { upper: None, step: None, .. }));
        let ExprKind::Subscript { index, .. } = expr("a[::2]").kind else { panic!() };
        assert!(matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) }));
    }

    #[test]
    fn call_argument_forms() {
        let ExprKind::Call { args, .. } = expr("f(1, *a, k=2, **kw)").kind else { panic!() };
        assert!(matches!(args[0], Arg::Positional(_)));
        assert!(matches!(args[1], Arg::Starred(_)));
        assert!(matches!(&args[2], Arg::Keyword(k, _) if k == "k"));
        assert!(matches!(args[3], Arg::DoubleStarred(_)));
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("0x1F"), Ok(Constant::Int(31)));
        assert_eq!(parse_number("1_000"), Ok(Constant::Int(1000)));
        assert_eq!(parse_number("2.5e1"), Ok(Constant::Float(25.0)));
        assert!(parse_number("99999999999999999999").unwrap_err().starts_with("integer literal too large"));
    }

    #[test]
    fn strings_and_escapes() {
        let ExprKind::Constant(Constant::Str(s)) = expr(r#"'a\n' "b" r'\d'"#).kind else { panic!() };
        assert_eq!(s, "a\nb\\d");
        let ExprKind::Constant(Constant::Str(s)) = expr("'''x\ny'''").kind else { panic!() };
        assert_eq!(s, "x\ny");
        let ExprKind::Constant(Constant::Str(s)) = expr(r"'\x41\u00e9'").kind else { panic!() };
        assert_eq!(s, "Aé");
    }

    #[test]
    fn fstrings() {
        let ExprKind::FString(parts) = expr("f'{name!r}: {value:>4} {{x}}'").kind else { panic!() };
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], FStringPart::Expr { conversion: Some('r'), .. }));
        assert!(matches!(&parts[2], FStringPart::Expr { spec: Some(s), .. } if s == ">4"));
        assert!(matches!(&parts[3], FStringPart::Literal(s) if s == " {x}"));
        let ExprKind::FString(parts) = expr("f'{a != b}'").kind else { panic!() };
        assert!(matches!(&parts[0], FStringPart::Expr { conversion: None, .. }));
    }

    #[test]
    fn imports() {
        let module = parse("import os.path as p, sys\nfrom m import (a, b as c,)\n");
        let StmtKind::Import(names) = &module.body[0].kind else { panic!() };
        assert_eq!(names[0].binding(), "p");
        assert_eq!(names[1].binding(), "sys");
        let StmtKind::ImportFrom { module: m, names } = &module.body[1].kind else { panic!() };
        assert_eq!(m, "m");
        assert_eq!(names[1].binding(), "c");
    }

    #[test]
    fn keyword_is_not_a_name() {
        let err = parse_module("x = class\n", "<test>").unwrap_err();
        assert_eq!(err.message, "unexpected keyword 'class'");
    }
}
