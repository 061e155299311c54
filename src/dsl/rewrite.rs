//! Block/closure extractor.
//!
//! Walks the token stream with a hand-written recursive-descent recognizer and
//! emits plain host text. Every closure is cut out into a [`ClosureRegistry`]
//! entry and replaced by its id in the surrounding text. Whitespace and
//! comments are copied through untouched, so the output keeps the line
//! structure of the input.

use std::ops::BitOr;

use super::closure::{Closure, ClosureBody, ClosureRegistry, RewriteResult};
use super::error::SyntaxError;
use super::lexer::{KindSet, Pos, Token, TokenKind, Tokenizer, TokenizerState};
use super::macros::MacroRegistry;

const BINARY_OPERATORS: &[&str] = &[
    "-", "+", "*", "**", "/", "//", "%", "@", "&", "|", "^", "<<", ">>", "==", "!=", "<", ">",
    "<=", ">=", ".",
];
const UNARY_OPERATORS: &[&str] = &["-", "+", "~"];
const WORD_OPERATORS: &[&str] = &["and", "or", "in", "is", "not", "if", "else"];
const AUGMENTED_ASSIGN: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", "&=", "|=", "^=", "<<=", ">>=", "@=",
];
const BLOCK_KEYWORDS: &[&str] = &[
    "class", "def", "if", "elif", "else", "for", "while", "with", "try", "except", "finally",
];
const EXPR_LIST_KEYWORDS: &[&str] = &["return", "assert", "yield", "raise"];
const VERBATIM_KEYWORDS: &[&str] = &["import", "from", "global", "nonlocal"];
const BARE_KEYWORDS: &[&str] = &["pass", "break", "continue"];
const CLOSERS: &[&str] = &[")", "]", "}"];

/// Flags describing the expression context being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseMode(u8);

impl ParseMode {
    pub const DEFAULT: Self = Self(0);
    /// Inside brackets: newlines do not end the expression.
    pub const GROUPED: Self = Self(1);
    /// The parenthesis being opened belongs to a call.
    pub const FUNCTION_CALL: Self = Self(1 << 1);
    /// Parsing the arguments of a call (`*`, `**` and `name=` are allowed).
    pub const CALL_ARGS: Self = Self(1 << 2);
    /// Inside `[...]`: `:` separates slice bounds.
    pub const SUBSCRIPT: Self = Self(1 << 3);

    pub const fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    fn grouped(self) -> bool {
        self.has(Self::GROUPED)
    }
}

impl BitOr for ParseMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Everything a failed speculative parse has to roll back.
#[derive(Clone, Copy)]
struct Checkpoint<'s> {
    tokens: TokenizerState<'s>,
    counter: usize,
    closures: usize,
    stack: usize,
}

pub struct Rewriter<'s> {
    tokens: Tokenizer<'s>,
    filename: String,
    local_def_prefix: Option<String>,
    macros: MacroRegistry,
    closure_stack: Vec<String>,
    closure_counter: usize,
    closures: ClosureRegistry,
}

/// Rewrite `source` with local definitions enabled under the default `_def_` prefix.
pub fn rewrite(source: &str, filename: &str) -> Result<RewriteResult, SyntaxError> {
    Rewriter::new(source, filename)
        .with_local_defs(Some("_def_"))
        .rewrite()
}

impl<'s> Rewriter<'s> {
    pub fn new(source: &'s str, filename: &str) -> Self {
        Self {
            tokens: Tokenizer::new(source),
            filename: filename.to_string(),
            local_def_prefix: None,
            macros: MacroRegistry::default(),
            closure_stack: Vec::new(),
            closure_counter: 0,
            closures: ClosureRegistry::new(),
        }
    }

    /// Enable `def name = expr` / `let name = expr`, renaming the target to `<prefix>name`.
    pub fn with_local_defs(mut self, prefix: Option<&str>) -> Self {
        self.local_def_prefix = prefix.map(str::to_string);
        self
    }

    pub fn with_macros(mut self, macros: MacroRegistry) -> Self {
        self.macros = macros;
        self
    }

    pub fn rewrite(mut self) -> Result<RewriteResult, SyntaxError> {
        let mut code = String::new();
        loop {
            code += &self.rewrite_stmt_block(None)?;
            let state = self.tokens.state();
            let trailing = self.consume_whitespace(true, false);
            let token = self.cur();
            if token.is_eof() {
                code += &trailing;
                break;
            }
            self.tokens.restore(state);
            // Top-level statements may dedent freely; anything else stuck here is stray.
            if self.cur().kind != TokenKind::Indent || token.is_control_in(CLOSERS) {
                return Err(self.error(format!("unexpected {token}"), token.pos));
            }
        }
        self.closures.sort_by_position();
        tracing::debug!(
            filename = %self.filename,
            closures = self.closures.len(),
            "rewrote source"
        );
        Ok(RewriteResult { code, closures: self.closures })
    }

    // ── Handles for macro plugins ──────────────────────────────────

    pub fn tokenizer(&mut self) -> &mut Tokenizer<'s> {
        &mut self.tokens
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn error(&self, message: impl Into<String>, pos: Pos) -> SyntaxError {
        SyntaxError::at(message, &self.filename, self.tokens.source(), pos)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn cur(&self) -> Token<'s> {
        self.tokens.current()
    }

    fn bump(&mut self) -> Token<'s> {
        self.tokens.bump()
    }

    fn checkpoint(&self) -> Checkpoint<'s> {
        Checkpoint {
            tokens: self.tokens.state(),
            counter: self.closure_counter,
            closures: self.closures.len(),
            stack: self.closure_stack.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint<'s>) {
        self.tokens.restore(checkpoint.tokens);
        self.closure_counter = checkpoint.counter;
        self.closures.truncate(checkpoint.closures);
        self.closure_stack.truncate(checkpoint.stack);
    }

    /// Run `parse`, rolling back tokenizer and closure state if it fails.
    pub fn try_parse<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        let checkpoint = self.checkpoint();
        let result = parse(self);
        if result.is_err() {
            self.rollback(checkpoint);
        }
        result
    }

    /// Consume whitespace, indents, comments and (optionally) newlines. With
    /// `reset_to_indent`, an indent directly before the next real token is
    /// left unconsumed so statement parsing can measure it.
    fn consume_whitespace(&mut self, newlines: bool, reset_to_indent: bool) -> String {
        let mut parts = String::new();
        let mut last_indent: Option<(TokenizerState<'s>, usize)> = None;
        loop {
            let token = self.cur();
            if !token.is_ignorable(newlines) {
                break;
            }
            last_indent = (token.kind == TokenKind::Indent).then(|| (self.tokens.state(), parts.len()));
            parts.push_str(token.text);
            self.bump();
        }
        if reset_to_indent {
            if let Some((state, len)) = last_indent {
                self.tokens.restore(state);
                parts.truncate(len);
            }
        }
        parts
    }

    fn ws(&mut self, mode: ParseMode) -> String {
        self.consume_whitespace(mode.grouped(), false)
    }

    fn at_stmt_end(&self) -> bool {
        let token = self.cur();
        token.is_eof()
            || token.kind == TokenKind::Newline
            || token.is_control(";")
            || token.is_control_in(CLOSERS)
    }

    // ── Closures ───────────────────────────────────────────────────

    /// Try to parse a closure at the current position:
    ///
    /// `{ stmts }`, `arg -> { stmts }`, `(a, b) -> { stmts }`, `() -> expr`, `arg -> expr`.
    ///
    /// Returns `None` (with everything rolled back) when there is no closure here.
    fn parse_closure(&mut self) -> Result<Option<Closure>, SyntaxError> {
        let start = self.cur().pos;
        let checkpoint = self.checkpoint();
        let parameters = self.parse_closure_header();
        let id = format!("{}_closure_{}", self.closure_stack.concat(), self.closure_counter + 1);
        self.closure_stack.push(id.clone());

        let body = if self.cur().is_control("{") {
            let code = self.parse_closure_body()?;
            (!code.trim().is_empty()).then_some(ClosureBody::Block(code))
        } else if parameters.is_some() {
            Some(ClosureBody::Expr(self.rewrite_expr(ParseMode::DEFAULT)?))
        } else {
            None
        };

        self.closure_stack.pop();
        let Some(body) = body else {
            self.rollback(checkpoint);
            return Ok(None);
        };

        self.closure_counter += 1;
        tracing::trace!(id = %id, line = start.line, "extracted closure");
        Ok(Some(Closure {
            id,
            line: start.line,
            column: start.column,
            parameters,
            body,
        }))
    }

    fn parse_closure_body(&mut self) -> Result<String, SyntaxError> {
        let open = self.cur().pos;
        self.bump();

        let mut code = self.consume_whitespace(true, true);
        if code.contains('\n') {
            code += &self.rewrite_stmt_block(None)?;
            code += &self.consume_whitespace(true, false);
        } else {
            while !self.cur().is_control("}") && !self.cur().is_eof() {
                code += &self.rewrite_simple_stmts()?;
                code += &self.consume_whitespace(true, false);
                if self.cur().kind == TokenKind::Control && !self.cur().is_control("}") {
                    break;
                }
            }
        }

        let token = self.cur();
        if !token.is_control("}") {
            let pos = if token.is_eof() { open } else { token.pos };
            return Err(self.error("expected closure closing brace", pos));
        }
        self.bump();
        Ok(code)
    }

    /// `(a, b) ->` or `name ->`. Rolls back and returns `None` if absent.
    fn parse_closure_header(&mut self) -> Option<Vec<String>> {
        let state = self.tokens.state();
        let previous = self.tokens.set_skipped(KindSet::of(&[TokenKind::Whitespace]));

        let token = self.cur();
        let arglist = if token.is_control("(") {
            self.parse_closure_arglist()
        } else if token.kind == TokenKind::Name {
            self.bump();
            Some(vec![token.text.to_string()])
        } else {
            None
        };

        let result = match arglist {
            Some(args) if self.cur().is_control("->") => {
                self.bump();
                Some(args)
            }
            _ => {
                self.tokens.restore(state);
                None
            }
        };
        self.tokens.set_skipped(previous);
        result
    }

    fn parse_closure_arglist(&mut self) -> Option<Vec<String>> {
        let header_skip = self.tokens.set_skipped(KindSet::TRIVIA);
        self.bump();

        let mut arglist = Vec::new();
        let mut delimited = true;
        while !self.cur().is_control(")") {
            let token = self.cur();
            if !delimited || token.kind != TokenKind::Name {
                return None;
            }
            arglist.push(token.text.to_string());
            delimited = self.bump().is_control(",");
            if delimited {
                self.bump();
            }
        }

        self.tokens.set_skipped(header_skip);
        self.bump();
        Some(arglist)
    }

    // ── Expressions ────────────────────────────────────────────────

    /// One expression, not crossing a top-level comma.
    pub fn rewrite_expr(&mut self, mode: ParseMode) -> Result<String, SyntaxError> {
        let mut code = self.ws(mode);
        code += &self.rewrite_atom(mode)?;

        loop {
            let ws = self.ws(mode);
            let token = self.cur();
            if token.kind == TokenKind::Control && BINARY_OPERATORS.contains(&token.text) {
                code += &ws;
                code += token.text;
                self.bump();
                code += &self.rewrite_expr(mode)?;
            } else if token.is_name_in(WORD_OPERATORS) || (mode.grouped() && token.is_name("for")) {
                code += &ws;
                code += &self.rewrite_word_operator()?;
                code += &self.rewrite_expr(mode)?;
            } else if token.is_control("(") {
                code += &ws;
                code += &self.rewrite_atom(ParseMode::FUNCTION_CALL | ParseMode::GROUPED)?;
            } else if token.is_control("[") {
                code += &ws;
                code += &self.rewrite_atom(ParseMode::SUBSCRIPT)?;
            } else {
                code += &ws;
                break;
            }
        }
        Ok(code)
    }

    /// `is [not]`, `not in` and the single-word continuations.
    fn rewrite_word_operator(&mut self) -> Result<String, SyntaxError> {
        let word = self.cur();
        self.bump();
        let mut code = word.text.to_string();
        match word.text {
            "is" => {
                let state = self.tokens.state();
                let ws = self.consume_whitespace(false, false);
                if self.cur().is_name("not") {
                    code += &ws;
                    code += "not";
                    self.bump();
                } else {
                    self.tokens.restore(state);
                }
            }
            "not" => {
                code += &self.consume_whitespace(false, false);
                if !self.cur().is_name("in") {
                    return Err(self.error(format!("expected 'in' after 'not', got {}", self.cur()), self.cur().pos));
                }
                code += "in";
                self.bump();
            }
            _ => {}
        }
        Ok(code)
    }

    /// Comma-separated expressions (a tuple, an argument list or slice bounds).
    pub fn rewrite_items(&mut self, mode: ParseMode) -> Result<String, SyntaxError> {
        let mut code = String::new();
        loop {
            code += &self.ws(mode);
            let slice_gap = mode.has(ParseMode::SUBSCRIPT)
                && (self.cur().is_control(":") || self.cur().is_control("]"));
            if !slice_gap {
                code += &self.rewrite_expr(mode)?;
                code += &self.ws(mode);
            }
            if mode.has(ParseMode::CALL_ARGS) && self.cur().is_control("=") {
                code += "=";
                self.bump();
                code += &self.rewrite_expr(mode)?;
                code += &self.ws(mode);
            }
            let token = self.cur();
            let separator = token.is_control(",")
                || (mode.has(ParseMode::SUBSCRIPT) && token.is_control(":"));
            if !separator {
                break;
            }
            code += token.text;
            self.bump();
            let ws = self.ws(mode);
            let closes = self.cur().is_control_in(CLOSERS) && !token.is_control(":");
            code += &ws;
            if closes || (!mode.grouped() && self.at_stmt_end()) {
                break;
            }
        }
        Ok(code)
    }

    fn rewrite_atom(&mut self, mode: ParseMode) -> Result<String, SyntaxError> {
        let token = self.cur();

        if token.is_control("{") && self.test_dict() {
            return self.rewrite_dict();
        }

        if let Some(closure) = self.parse_closure()? {
            let id = closure.id.clone();
            self.closures.insert(closure);
            return Ok(id);
        }

        if token.is_control("!") {
            return self.rewrite_macro();
        }

        let mut code = String::new();
        if token.is_control_in(&["(", "[", "{"]) {
            let close = match token.text {
                "(" => ")",
                "[" => "]",
                _ => "}",
            };
            code += token.text;
            self.bump();
            code += &self.consume_whitespace(true, false);
            if !self.cur().is_control(close) {
                let inner = if mode.has(ParseMode::FUNCTION_CALL) {
                    ParseMode::CALL_ARGS
                } else if mode.has(ParseMode::SUBSCRIPT) {
                    ParseMode::SUBSCRIPT
                } else {
                    ParseMode::DEFAULT
                };
                code += &self.rewrite_items(inner | ParseMode::GROUPED).map_err(|e| {
                    let end = self.cur();
                    if end.is_eof() && (e.line, e.column) == (end.pos.line, end.pos.column) {
                        self.error(format!("expected '{close}' but got {end}"), token.pos)
                    } else {
                        e
                    }
                })?;
            }
            let end = self.cur();
            if !end.is_control(close) {
                let pos = if end.is_eof() { token.pos } else { end.pos };
                return Err(self.error(format!("expected '{close}' but got {end}"), pos));
            }
            code += close;
            self.bump();
        } else if mode.has(ParseMode::CALL_ARGS) && token.is_control_in(&["*", "**"]) {
            code += token.text;
            self.bump();
            code += &self.rewrite_expr(ParseMode::DEFAULT)?;
        } else if matches!(token.kind, TokenKind::Name | TokenKind::Literal) && !token.is_name("not") {
            code += token.text;
            self.bump();
        } else if token.is_name("not") || token.is_control_in(UNARY_OPERATORS) {
            code += token.text;
            self.bump();
            code += &self.rewrite_expr(mode)?;
        } else {
            return Err(self.error(format!("unexpected {token}"), token.pos));
        }
        Ok(code)
    }

    /// Does the `{` at the current position open a dict literal? Always rolls back.
    fn test_dict(&mut self) -> bool {
        let checkpoint = self.checkpoint();
        self.bump();
        self.consume_whitespace(true, false);
        let is_dict = self.rewrite_expr(ParseMode::GROUPED).is_ok() && {
            self.consume_whitespace(true, false);
            self.cur().is_control(":")
        };
        self.rollback(checkpoint);
        is_dict
    }

    fn rewrite_dict(&mut self) -> Result<String, SyntaxError> {
        let open = self.cur().pos;
        self.bump();
        let mut code = String::from("{");

        while !self.cur().is_control("}") {
            code += &self.consume_whitespace(true, false);
            code += &self.rewrite_expr(ParseMode::GROUPED)?;
            code += &self.consume_whitespace(true, false);
            if !self.cur().is_control(":") {
                return Err(self.error(format!("expected ':' but got {}", self.cur()), self.cur().pos));
            }
            code += ":";
            self.bump();
            code += &self.consume_whitespace(true, false);
            code += &self.rewrite_expr(ParseMode::GROUPED)?;
            code += &self.consume_whitespace(true, false);
            if !self.cur().is_control(",") {
                break;
            }
            code += ",";
            self.bump();
            code += &self.consume_whitespace(true, false);
        }

        if !self.cur().is_control("}") {
            let pos = if self.cur().is_eof() { open } else { self.cur().pos };
            return Err(self.error(format!("expected '}}' but got {}", self.cur()), pos));
        }
        self.bump();
        Ok(code + "}")
    }

    /// `!name ...`: hand the tokenizer to the macro plugin registered under `name`.
    fn rewrite_macro(&mut self) -> Result<String, SyntaxError> {
        let name = self.bump();
        if name.kind != TokenKind::Name {
            return Err(self.error(format!("expected macro name, got {name}"), name.pos));
        }
        let Some(plugin) = self.macros.get(name.text) else {
            return Err(self.error(format!("unknown macro: '{}'", name.text), name.pos));
        };
        self.bump();
        tracing::trace!(name = name.text, "expanding macro");
        plugin.parse_macro(self)
    }

    // ── Statements ─────────────────────────────────────────────────

    /// Statements on one line, separated by `;`.
    fn rewrite_simple_stmts(&mut self) -> Result<String, SyntaxError> {
        let mut code = String::new();
        loop {
            code += &self.rewrite_stmt_singleline()?;
            let ws = self.consume_whitespace(false, false);
            code += &ws;
            if !self.cur().is_control(";") {
                break;
            }
            code += ";";
            self.bump();
            code += &self.consume_whitespace(false, false);
            if self.at_stmt_end() {
                break;
            }
        }
        Ok(code)
    }

    fn rewrite_stmt_singleline(&mut self) -> Result<String, SyntaxError> {
        let mut code = self.consume_whitespace(false, false);
        let token = self.cur();

        if self.local_def_prefix.is_some() && token.is_name_in(&["def", "let"]) {
            if let Some(def) = self.test_local_def()? {
                return Ok(code + &def);
            }
        }

        if token.is_name_in(BARE_KEYWORDS) {
            self.bump();
            code += token.text;
        } else if token.is_name_in(EXPR_LIST_KEYWORDS) {
            code += token.text;
            self.bump();
            if token.is_name("yield") {
                let state = self.tokens.state();
                let ws = self.consume_whitespace(false, false);
                if self.cur().is_name("from") {
                    code += &ws;
                    code += "from";
                    self.bump();
                } else {
                    self.tokens.restore(state);
                }
            }
            code += &self.consume_whitespace(false, false);
            if !self.at_stmt_end() {
                code += &self.rewrite_items(ParseMode::DEFAULT)?;
            }
        } else if token.is_name_in(VERBATIM_KEYWORDS) || token.is_control("@") {
            while !self.at_line_end() && !self.cur().is_control(";") {
                code += self.cur().text;
                self.bump();
            }
        } else {
            code += &self.rewrite_stmt_expr_or_assign()?;
        }
        Ok(code)
    }

    fn at_line_end(&self) -> bool {
        let token = self.cur();
        token.is_eof() || token.kind == TokenKind::Newline
    }

    fn rewrite_stmt_expr_or_assign(&mut self) -> Result<String, SyntaxError> {
        let mut code = self.rewrite_items(ParseMode::DEFAULT)?;
        code += &self.consume_whitespace(false, false);

        if self.cur().is_control_in(AUGMENTED_ASSIGN) {
            code += self.cur().text;
            self.bump();
            code += &self.rewrite_items(ParseMode::DEFAULT)?;
        } else {
            while self.cur().is_control("=") {
                code += "=";
                self.bump();
                code += &self.rewrite_items(ParseMode::DEFAULT)?;
                code += &self.consume_whitespace(false, false);
            }
        }

        let token = self.cur();
        if !token.is_eof() && !token.is_ignorable(true) && !token.is_control_in(&[")", "]", "}", ":", ";"]) {
            // Unparenthesized call: `target arg, key=value` or `target { ... }`.
            code.truncate(code.trim_end_matches([' ', '\t']).len());
            code += "(";
            code += &self.rewrite_items(ParseMode::CALL_ARGS)?;
            code += ")";
        }
        Ok(code)
    }

    /// `def name = expr` / `let name = expr`. Rolls back and returns `None` for anything else.
    fn test_local_def(&mut self) -> Result<Option<String>, SyntaxError> {
        let Some(prefix) = self.local_def_prefix.clone() else {
            return Ok(None);
        };
        let checkpoint = self.checkpoint();
        self.bump();
        self.consume_whitespace(false, false);
        let name = self.cur();
        if name.kind != TokenKind::Name {
            self.rollback(checkpoint);
            return Ok(None);
        }
        self.bump();
        let ws = self.consume_whitespace(false, false);
        if !self.cur().is_control("=") {
            self.rollback(checkpoint);
            return Ok(None);
        }
        self.bump();
        let value = self.rewrite_items(ParseMode::DEFAULT)?;
        Ok(Some(format!("{prefix}{}{ws}={value}", name.text)))
    }

    /// One statement at exactly `indentation`. `None` ends the enclosing block.
    fn rewrite_stmt(&mut self, indentation: usize) -> Result<Option<String>, SyntaxError> {
        let start = self.tokens.state();
        let mut code = self.consume_whitespace(true, true);

        let indent = self.cur();
        if indent.kind != TokenKind::Indent {
            self.tokens.restore(start);
            return Ok(None);
        }
        let next = self.bump();
        if next.is_eof() || next.is_control_in(CLOSERS) {
            self.tokens.restore(start);
            return Ok(None);
        }
        let width = indent.text.len();
        if width < indentation {
            self.tokens.restore(start);
            return Ok(None);
        }
        if width > indentation {
            return Err(self.error("unexpected indentation", next.pos));
        }
        code += indent.text;

        if next.is_name_in(BLOCK_KEYWORDS) && !self.is_local_def_ahead() {
            code += &self.rewrite_block_header()?;
            let ws = self.consume_whitespace(false, false);
            code += &ws;
            if self.at_line_end() {
                code += &self.rewrite_stmt_block(Some(indentation))?;
            } else {
                code += &self.rewrite_simple_stmts()?;
            }
            return Ok(Some(code));
        }

        code += &self.rewrite_simple_stmts()?;
        Ok(Some(code))
    }

    fn is_local_def_ahead(&mut self) -> bool {
        if self.local_def_prefix.is_none() || !self.cur().is_name("def") {
            return false;
        }
        let state = self.tokens.state();
        self.bump();
        self.consume_whitespace(false, false);
        let named = self.cur().kind == TokenKind::Name;
        self.bump();
        self.consume_whitespace(false, false);
        let assigns = named && self.cur().is_control("=");
        self.tokens.restore(state);
        assigns
    }

    /// Copy a block header through verbatim up to its colon.
    fn rewrite_block_header(&mut self) -> Result<String, SyntaxError> {
        let mut code = String::new();
        let mut depth = 0usize;
        loop {
            let token = self.cur();
            if token.is_eof() || (depth == 0 && token.kind == TokenKind::Newline) {
                return Err(self.error(format!("expected ':' but got {token}"), token.pos));
            }
            if depth == 0 && token.is_control(":") {
                break;
            }
            if token.is_control_in(&["(", "[", "{"]) {
                depth += 1;
            } else if token.is_control_in(CLOSERS) {
                depth = depth.saturating_sub(1);
            }
            code += token.text;
            self.bump();
        }
        code += ":";
        self.bump();
        Ok(code)
    }

    fn rewrite_stmt_block(&mut self, parent: Option<usize>) -> Result<String, SyntaxError> {
        let mut code = self.consume_whitespace(true, true);
        let indent = self.cur();
        if indent.kind != TokenKind::Indent {
            return Ok(code);
        }
        let width = indent.text.len();
        if let Some(parent) = parent {
            if width <= parent {
                let state = self.tokens.state();
                let next = self.bump();
                self.tokens.restore(state);
                return Err(self.error(format!("expected indent > {parent}"), next.pos));
            }
        }
        while let Some(stmt) = self.rewrite_stmt(width)? {
            code += &stmt;
            code += &self.consume_whitespace(true, true);
        }
        Ok(code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn rw(source: &str) -> RewriteResult {
        rewrite(source, "<test>").unwrap()
    }

    fn err(source: &str) -> SyntaxError {
        rewrite(source, "<test>").unwrap_err()
    }

    #[test]
    fn block_call_becomes_call_with_closure() {
        let result = rw("greet { print(name) }");
        assert_eq!(result.code, "greet(_closure_1)");
        let closure = result.closures.get("_closure_1").unwrap();
        assert_eq!(closure.block(), Some(" print(name) "));
        assert!(closure.parameters.is_none());
    }

    #[test]
    fn call_with_args_then_block() {
        let result = rw("target(a, b) {\n  x = 1\n}\n");
        assert_eq!(result.code, "target(a, b)(_closure_1)\n");
        assert_eq!(result.closures.get("_closure_1").unwrap().block(), Some("\n  x = 1\n"));
    }

    #[test]
    fn dict_literal_is_not_a_closure() {
        let result = rw("x = { a: 1, b: 2 }");
        assert_eq!(result.code, "x = { a: 1, b: 2 }");
        assert!(result.closures.is_empty());
    }

    #[test]
    fn braces_without_colon_are_a_closure() {
        let result = rw("x = { doSomething() }");
        assert_eq!(result.code, "x = _closure_1");
        assert_eq!(result.closures.len(), 1);
    }

    #[test]
    fn empty_braces_stay_a_dict() {
        let result = rw("x = {}");
        assert_eq!(result.code, "x = {}");
        assert!(result.closures.is_empty());
    }

    #[test]
    fn arrow_closures() {
        let result = rw("f = x -> x * 2\ng = (a, b) -> a + b\nh = () -> {\n  pass\n}\n");
        assert_eq!(result.code, "f = _closure_1\ng = _closure_2\nh = _closure_3\n");
        let f = result.closures.get("_closure_1").unwrap();
        assert_eq!(f.parameters, Some(vec!["x".to_string()]));
        assert_eq!(f.expr(), Some("x * 2"));
        let g = result.closures.get("_closure_2").unwrap();
        assert_eq!(g.parameters, Some(vec!["a".to_string(), "b".to_string()]));
        let h = result.closures.get("_closure_3").unwrap();
        assert_eq!(h.parameters, Some(vec![]));
        assert!(h.block().is_some());
    }

    #[test]
    fn arrow_closure_as_argument() {
        let result = rw("items.map(x -> x + 1, other)");
        assert_eq!(result.code, "items.map(_closure_1, other)");
        assert_eq!(result.closures.get("_closure_1").unwrap().expr(), Some("x + 1"));
    }

    #[test]
    fn nested_closure_ids_carry_parent_prefix() {
        let result = rw("a {\n  b {\n    c()\n  }\n}\nd {\n  e()\n}\n");
        let ids: Vec<_> = result.closures.ids().collect();
        // The counter advances when a closure completes, so the inner one consumes `2`.
        assert_eq!(ids, vec!["_closure_1", "_closure_1_closure_1", "_closure_3"]);
        assert_eq!(result.code, "a(_closure_1)\nd(_closure_3)\n");
        assert!(result.closures.get("_closure_1").unwrap().text().contains("b(_closure_1_closure_1)"));
        assert!(result.unreferenced().is_empty());
    }

    #[test]
    fn implicit_call_arguments() {
        assert_eq!(rw("print 'hi', end=''").code, "print('hi', end='')");
        assert_eq!(rw("include 'a.craftr'\n").code, "include('a.craftr')\n");
    }

    #[test]
    fn local_definitions() {
        assert_eq!(rw("def x = 1\nlet y = x + 1\n").code, "_def_x = 1\n_def_y = x + 1\n");
        assert_eq!(rw("def f(a):\n  return a\n").code, "def f(a):\n  return a\n");
    }

    #[test]
    fn local_definitions_disabled() {
        let result = Rewriter::new("let(x)", "<test>").rewrite().unwrap();
        assert_eq!(result.code, "let(x)");
    }

    #[test]
    fn word_operators_continue_expressions() {
        let source = "x = a and not b or c in d\ny = a is not None\nz = a not in b\nw = 1 if c else 2\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn comprehension_and_slices() {
        let source = "x = [i * 2 for i in items if i]\ny = s[1:]\nz = s[:-1]\nq = s[::2]\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn block_statements_pass_through() {
        let source = "if a == {'k': 1}:\n  b()\nelse:\n  for i in c:\n    print(i)\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn inline_suite_after_colon() {
        let source = "if a: b()\nwhile x: x -= 1\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn closure_inside_block_statement() {
        let result = rw("if flag:\n  task {\n    run()\n  }\n");
        assert_eq!(result.code, "if flag:\n  task(_closure_1)\n");
    }

    #[test]
    fn semicolons_separate_statements() {
        assert_eq!(rw("a = 1; b = 2\n").code, "a = 1; b = 2\n");
        let result = rw("f { a = 1; b = 2 }");
        assert_eq!(result.closures.get("_closure_1").unwrap().text(), " a = 1; b = 2 ");
    }

    #[test]
    fn statements_keep_keywords() {
        let source = "def f():\n  yield from g()\n  return\n\nimport os.path\nfrom a import b\nassert x, 'msg'\nraise Error('x')\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn decorators_copied() {
        let source = "@wrap(1)\ndef f():\n  pass\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn indentation_continuation_accepted() {
        let result = rw("f {\n  a()\n  b()\n}\n");
        assert_eq!(result.closures.get("_closure_1").unwrap().text(), "\n  a()\n  b()\n");
    }

    #[test]
    fn indentation_deeper_without_parent_is_an_error() {
        let e = err("f {\n  a()\n    b()\n}\n");
        assert_eq!(e.message, "unexpected indentation");
        assert_eq!(e.line, 3);
        assert_eq!(e.column, 4);
    }

    #[test]
    fn dedent_to_zero_ends_closure_body() {
        let result = rw("f {\n  a()\n}\nb()\n");
        assert_eq!(result.code, "f(_closure_1)\nb()\n");
    }

    #[test]
    fn top_level_may_dedent() {
        let source = "  a = 1\nb = 2\n";
        assert_eq!(rw(source).code, source);
    }

    #[test]
    fn block_needs_deeper_body() {
        let e = err("if x:\ny()\n");
        assert_eq!(e.message, "expected indent > 0");
    }

    #[test]
    fn unmatched_open_brace_points_at_brace() {
        let e = err("x = 1\nfoo {\n  bar()\n");
        assert_eq!(e.message, "expected closure closing brace");
        assert_eq!(e.line, 2);
        assert_eq!(e.column, 4);
        assert_eq!(e.text_hint(), "foo {\n~~~~^");
    }

    #[test]
    fn unmatched_paren_reported() {
        let e = err("print(a,\n");
        assert_eq!(e.line, 1);
        assert_eq!(e.column, 5);
    }

    #[test]
    fn unknown_character_is_a_syntax_error() {
        let e = err("x = $");
        assert_eq!(e.message, "unexpected Unknown(\"$\")");
    }

    #[test]
    fn speculation_discards_closures() {
        // The dict test parses `{ x -> y }` speculatively before treating it as a closure.
        let result = rw("f { g(a -> a) }");
        let ids: Vec<_> = result.closures.ids().collect();
        assert_eq!(ids, vec!["_closure_1", "_closure_1_closure_1"]);
    }

    #[test]
    fn rewriting_is_idempotent_on_plain_code() {
        let plain = "def f(a, b=2):\n  return {'a': a, 'b': [b, -1]}\n\nx = f(1)\nprint(x['a'], x.get('b'))\n";
        let once = rw(plain);
        assert_eq!(once.code, plain);
        assert_eq!(rw(&once.code).code, once.code);
    }

    #[test]
    fn try_parse_rolls_back_on_failure() {
        let mut rewriter = Rewriter::new("a b", "<test>");
        let before = rewriter.cur();
        let result: Result<(), SyntaxError> = rewriter.try_parse(|r| {
            r.bump();
            r.bump();
            Err(r.error("nope", r.cur().pos))
        });
        assert!(result.is_err());
        assert_eq!(rewriter.cur(), before);
    }
}
