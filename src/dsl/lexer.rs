//! Lazy scanner shared by the DSL rewriter and the host-language parser.
//!
//! The scanner never fails: characters that no rule accepts come out as
//! [`TokenKind::Unknown`] so that speculative parses can reject them and
//! backtrack instead of aborting the whole pass.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    /// Horizontal whitespace at the start of a line. Emitted for every line,
    /// possibly empty.
    Indent,
    Whitespace,
    Newline,
    Comment,
    Name,
    Literal,
    Control,
    /// A single character no other rule accepts.
    Unknown,
}

impl TokenKind {
    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A set of token kinds the tokenizer steps over transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindSet(u16);

impl KindSet {
    pub const NONE: Self = Self(0);
    /// Layout that never ends a statement.
    pub const LAYOUT: Self = Self::of(&[TokenKind::Indent, TokenKind::Whitespace, TokenKind::Comment]);
    /// Layout plus line breaks.
    pub const TRIVIA: Self = Self::LAYOUT.with(TokenKind::Newline);

    pub const fn of(kinds: &[TokenKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn with(self, kind: TokenKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub const fn contains(self, kind: TokenKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// Source position. Lines are 1-based, columns are 0-based character counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub const START: Self = Self { offset: 0, line: 1, column: 0 };

    fn advance_over(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        self.offset += text.len();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub text: &'s str,
    pub pos: Pos,
}

impl<'s> Token<'s> {
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is_control(&self, glyph: &str) -> bool {
        self.kind == TokenKind::Control && self.text == glyph
    }

    pub fn is_control_in(&self, glyphs: &[&str]) -> bool {
        self.kind == TokenKind::Control && glyphs.contains(&self.text)
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }

    pub fn is_name_in(&self, names: &[&str]) -> bool {
        self.kind == TokenKind::Name && names.contains(&self.text)
    }

    /// Whitespace, indentation and comments, plus newlines when `newlines` is set.
    pub fn is_ignorable(&self, newlines: bool) -> bool {
        KindSet::LAYOUT.contains(self.kind) || (newlines && self.kind == TokenKind::Newline)
    }

    pub fn end(&self) -> usize {
        self.pos.offset + self.text.len()
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eof() {
            write!(f, "end of input")
        } else {
            write!(f, "{:?}({:?})", self.kind, self.text)
        }
    }
}

/// Control glyphs, longest first so that a prefix scan yields the longest match.
const CONTROL: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...",
    "->", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "@=", ":=",
    "(", ")", "[", "]", "{", "}", ",", ".", ";", ":", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "<", ">", "=", "!", "@",
];

/// Opaque checkpoint of the complete tokenizer state. Restoring is O(1).
#[derive(Debug, Clone, Copy)]
pub struct TokenizerState<'s> {
    cursor: Pos,
    line_start: bool,
    current: Token<'s>,
    skipped: KindSet,
}

/// Produces tokens lazily from a cursor over the source text.
pub struct Tokenizer<'s> {
    source: &'s str,
    bytes: &'s [u8],
    state: TokenizerState<'s>,
}

/// Eagerly scan `source` into a token vector ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = vec![tokenizer.current()];
    while !tokenizer.current().is_eof() {
        tokens.push(tokenizer.bump());
    }
    tokens
}

impl<'s> Tokenizer<'s> {
    pub fn new(source: &'s str) -> Self {
        let mut tokenizer = Self {
            source,
            bytes: source.as_bytes(),
            state: TokenizerState {
                cursor: Pos::START,
                line_start: true,
                current: Token { kind: TokenKind::Eof, text: "", pos: Pos::START },
                skipped: KindSet::NONE,
            },
        };
        tokenizer.advance();
        tokenizer
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn current(&self) -> Token<'s> {
        self.state.current
    }

    /// Move to the next token that is not in the skipped set and return it.
    pub fn bump(&mut self) -> Token<'s> {
        if !self.state.current.is_eof() {
            self.advance();
        }
        self.state.current
    }

    pub fn state(&self) -> TokenizerState<'s> {
        self.state
    }

    pub fn restore(&mut self, state: TokenizerState<'s>) {
        self.state = state;
    }

    pub fn skipped(&self) -> KindSet {
        self.state.skipped
    }

    /// Replace the skipped set, stepping over the current token if it is now
    /// skipped. Returns the previous set.
    pub fn set_skipped(&mut self, kinds: KindSet) -> KindSet {
        let previous = std::mem::replace(&mut self.state.skipped, kinds);
        while kinds.contains(self.state.current.kind) && !self.state.current.is_eof() {
            self.advance();
        }
        previous
    }

    /// Run `f` with `kinds` skipped, restoring the previous set afterwards.
    pub fn with_skipped<T>(&mut self, kinds: KindSet, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = self.set_skipped(kinds);
        let result = f(self);
        self.set_skipped(previous);
        result
    }

    /// The full text of the line containing `pos`, without its line break.
    pub fn line_text(&self, pos: Pos) -> &'s str {
        line_at(self.source, pos.offset)
    }

    /// Reposition the scanner at a byte offset and scan the token found there.
    pub fn jump_to(&mut self, offset: usize) {
        let from = self.state.current.pos;
        let mut pos = if offset >= from.offset { from } else { Pos::START };
        pos.advance_over(self.source.get(pos.offset..offset).unwrap_or(""));
        self.state.cursor = pos;
        self.state.line_start = offset == 0 || self.bytes.get(offset - 1) == Some(&b'\n');
        self.advance();
    }

    fn advance(&mut self) {
        loop {
            let token = self.scan();
            self.state.current = token;
            if token.is_eof() || !self.state.skipped.contains(token.kind) {
                break;
            }
        }
    }

    fn scan(&mut self) -> Token<'s> {
        let start = self.state.cursor;
        let i = start.offset;
        if i >= self.bytes.len() {
            return Token { kind: TokenKind::Eof, text: "", pos: start };
        }

        let (kind, len) = if self.state.line_start {
            self.state.line_start = false;
            (TokenKind::Indent, self.run_len(i, |b| b == b' ' || b == b'\t'))
        } else {
            self.classify(i)
        };

        let text = &self.source[i..i + len];
        self.state.cursor.advance_over(text);
        if kind == TokenKind::Newline {
            self.state.line_start = true;
        }
        Token { kind, text, pos: start }
    }

    fn classify(&self, i: usize) -> (TokenKind, usize) {
        let b = self.bytes[i];
        match b {
            b'\n' => (TokenKind::Newline, 1),
            b'\r' if self.peek_at(i + 1) == Some(b'\n') => (TokenKind::Newline, 2),
            b' ' | b'\t' | b'\r' | b'\x0c' => (
                TokenKind::Whitespace,
                self.run_len(i, |b| matches!(b, b' ' | b'\t' | b'\x0c'))
                    .max(1),
            ),
            b'#' => (TokenKind::Comment, self.run_len(i, |b| b != b'\n')),
            b'"' | b'\'' => self.string(i, i),
            b'0'..=b'9' => (TokenKind::Literal, self.number(i)),
            b'.' if self.peek_at(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                (TokenKind::Literal, self.number(i))
            }
            b if is_ident_start(b) => {
                let len = self.run_len(i, is_ident_continue);
                let is_prefix = len <= 2
                    && self.bytes[i..i + len].iter().all(|c| b"bBrRfFuU".contains(c));
                if is_prefix && matches!(self.peek_at(i + len), Some(b'"' | b'\'')) {
                    self.string(i, i + len)
                } else {
                    (TokenKind::Name, len)
                }
            }
            _ => {
                let rest = &self.source[i..];
                match CONTROL.iter().find(|glyph| rest.starts_with(*glyph)) {
                    Some(glyph) => (TokenKind::Control, glyph.len()),
                    None => (TokenKind::Unknown, rest.chars().next().map_or(1, char::len_utf8)),
                }
            }
        }
    }

    /// String literal starting at `start` whose opening quote sits at `quote_at`
    /// (after any prefix letters). Unterminated strings yield a one-character
    /// Unknown token.
    fn string(&self, start: usize, quote_at: usize) -> (TokenKind, usize) {
        let q = self.bytes[quote_at];
        let triple = self.peek_at(quote_at + 1) == Some(q) && self.peek_at(quote_at + 2) == Some(q);
        let mut j = quote_at + if triple { 3 } else { 1 };
        loop {
            match self.peek_at(j) {
                None => return (TokenKind::Unknown, 1),
                Some(b'\\') => j += 2,
                Some(b'\n') if !triple => return (TokenKind::Unknown, 1),
                Some(c) if c == q => {
                    if !triple {
                        return (TokenKind::Literal, j + 1 - start);
                    }
                    if self.peek_at(j + 1) == Some(q) && self.peek_at(j + 2) == Some(q) {
                        return (TokenKind::Literal, j + 3 - start);
                    }
                    j += 1;
                }
                Some(_) => j += 1,
            }
        }
    }

    fn number(&self, i: usize) -> usize {
        if self.bytes[i] == b'0'
            && matches!(self.peek_at(i + 1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B'))
            && self.peek_at(i + 2).is_some_and(|c| c.is_ascii_alphanumeric())
        {
            return 2 + self.run_len(i + 2, |c| c.is_ascii_alphanumeric() || c == b'_');
        }
        let digits = |c: u8| c.is_ascii_digit() || c == b'_';
        let mut j = i + self.run_len(i, digits);
        if self.peek_at(j) == Some(b'.') && self.peek_at(j + 1) != Some(b'.') {
            j += 1;
            j += self.run_len(j, digits);
        }
        if matches!(self.peek_at(j), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(j + 1), Some(b'+' | b'-')));
            if self.peek_at(j + 1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                j += 1 + sign;
                j += self.run_len(j, digits);
            }
        }
        j - i
    }

    fn peek_at(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    fn run_len(&self, i: usize, pred: impl Fn(u8) -> bool) -> usize {
        self.bytes.get(i..).map_or(0, |rest| rest.iter().take_while(|&&b| pred(b)).count())
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// The line of `source` containing byte `offset`, without its line break.
pub fn line_at(source: &str, offset: usize) -> &str {
    let offset = offset.min(source.len());
    let start = source.get(..offset).and_then(|s| s.rfind('\n')).map_or(0, |i| i + 1);
    let end = source.get(offset..).and_then(|s| s.find('\n')).map_or(source.len(), |i| offset + i);
    source.get(start..end).unwrap_or("").trim_end_matches('\r')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn tok(s: &str) -> Vec<(TokenKind, &str)> {
        tokenize(s).into_iter().map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(tok("x = 1\n  y"), vec![
            (Indent, ""), (Name, "x"), (Whitespace, " "), (Control, "="), (Whitespace, " "),
            (Literal, "1"), (Newline, "\n"),
            (Indent, "  "), (Name, "y"), (Eof, ""),
        ]);
    }

    #[test]
    fn indent_only_at_line_start() {
        let kinds: Vec<_> = tok("a  b\n\n c").into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![
            Indent, Name, Whitespace, Name, Newline, Indent, Newline, Indent, Name, Eof,
        ]);
    }

    #[test]
    fn string_literals() {
        let tokens = tok(r#"'a\'b' """x
y""" r"raw" f"{x}""#);
        let literals: Vec<_> = tokens.iter().filter(|(k, _)| *k == Literal).map(|(_, t)| *t).collect();
        assert_eq!(literals, vec![r"'a\'b'", "\"\"\"x\ny\"\"\"", r#"r"raw""#, r#"f"{x}""#]);
    }

    #[test]
    fn numeric_literals() {
        let tokens = tok("0x1F 1_000 3.14 1e10 .5 2.5e-3");
        let literals: Vec<_> = tokens.iter().filter(|(k, _)| *k == Literal).map(|(_, t)| *t).collect();
        assert_eq!(literals, vec!["0x1F", "1_000", "3.14", "1e10", ".5", "2.5e-3"]);
    }

    #[test]
    fn control_longest_match() {
        let glyphs: Vec<_> = tok("a->b **= c != d // e")
            .into_iter()
            .filter(|(k, _)| *k == Control)
            .map(|(_, t)| t)
            .collect();
        assert_eq!(glyphs, vec!["->", "**=", "!=", "//"]);
    }

    #[test]
    fn word_operators_are_names() {
        assert_eq!(tok("is island not"), vec![
            (Indent, ""), (Name, "is"), (Whitespace, " "), (Name, "island"), (Whitespace, " "),
            (Name, "not"), (Eof, ""),
        ]);
    }

    #[test]
    fn unknown_character() {
        assert_eq!(tok("a $ b")[3], (Unknown, "$"));
    }

    #[test]
    fn unterminated_string_is_unknown() {
        assert_eq!(tok("x = 'abc")[5], (Unknown, "'"));
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        assert_eq!(tok("x # hi\ny")[3], (Comment, "# hi"));
    }

    #[test]
    fn positions() {
        let tokens = tokenize("ab\n  cd");
        let cd = tokens.iter().find(|t| t.text == "cd").unwrap();
        assert_eq!(cd.pos, Pos { offset: 5, line: 2, column: 2 });
    }

    #[test]
    fn checkpoint_restore() {
        let mut t = Tokenizer::new("a b c");
        t.bump();
        let saved = t.state();
        t.bump();
        t.bump();
        assert_eq!(t.current().text, "b");
        t.restore(saved);
        assert_eq!(t.current().text, "a");
    }

    #[test]
    fn skipped_kinds() {
        let mut t = Tokenizer::new("a  # c\n  b");
        t.set_skipped(KindSet::TRIVIA);
        assert_eq!(t.current().text, "a");
        assert_eq!(t.bump().text, "b");
        assert!(t.bump().is_eof());
    }

    #[test]
    fn skip_set_is_scoped() {
        let mut t = Tokenizer::new("a  b c");
        let next = t.with_skipped(KindSet::of(&[TokenKind::Indent, TokenKind::Whitespace]), |t| t.bump());
        assert_eq!(next.text, "b");
        assert_eq!(t.current().text, "b");
        assert_eq!(t.bump().kind, TokenKind::Whitespace);
    }

    #[test]
    fn line_text_lookup() {
        let t = Tokenizer::new("first\nsecond line\nthird");
        let pos = Pos { offset: 9, line: 2, column: 3 };
        assert_eq!(t.line_text(pos), "second line");
    }

    #[test]
    fn jump_to_line_start() {
        let source = "a\n  b\nc";
        let mut t = Tokenizer::new(source);
        t.jump_to(source.find('c').unwrap());
        assert_eq!(t.current().kind, Indent);
        assert_eq!(t.current().pos.line, 3);
        assert_eq!(t.bump().text, "c");
    }
}
