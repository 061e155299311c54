use std::fmt;

use super::lexer::{line_at, Pos};

/// A syntax error with enough location context to render the offending line.
///
/// Parsing a file is all-or-nothing: the first error aborts the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub filename: String,
    pub line: usize,
    pub column: usize,
    pub text: String,
}

impl SyntaxError {
    pub fn new(
        message: impl Into<String>,
        filename: impl Into<String>,
        line: usize,
        column: usize,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            filename: filename.into(),
            line,
            column,
            text: text.into(),
        }
    }

    /// Build an error at `pos`, taking the line text from `source`.
    pub fn at(message: impl Into<String>, filename: &str, source: &str, pos: Pos) -> Self {
        Self::new(message, filename, pos.line, pos.column, line_at(source, pos.offset))
    }

    /// The offending line followed by a caret under the error column.
    pub fn text_hint(&self) -> String {
        format!("{}\n{}^", self.text, "~".repeat(self.column))
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        write!(f, "  in {} at line {}: {}", self.filename, self.line, self.message)?;
        for line in self.text_hint().lines() {
            write!(f, "\n  |{line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn caret_under_column() {
        let err = SyntaxError::new("boom", "build.craftr", 3, 4, "foo {");
        assert_eq!(err.text_hint(), "foo {\n~~~~^");
    }

    #[test]
    fn rendered_text() {
        let err = SyntaxError::new("expected closure closing brace", "<string>", 1, 2, "a {");
        assert_eq!(
            err.to_string(),
            "\n  in <string> at line 1: expected closure closing brace\n  |a {\n  |~~^"
        );
    }

    #[test]
    fn at_takes_line_from_source() {
        let source = "x = 1\ny = (\n";
        let pos = Pos { offset: 10, line: 2, column: 4 };
        let err = SyntaxError::at("unbalanced", "f", source, pos);
        assert_eq!(err.text, "y = (");
        assert_eq!(err.column, 4);
    }
}
