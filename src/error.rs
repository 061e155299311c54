use std::path::PathBuf;

use crate::dsl::error::SyntaxError;
use crate::dsl::macros::UnknownMacro;
use crate::runtime::error::RuntimeError;

/// Errors returned by the driver. A syntax error aborts a whole compilation;
/// a runtime error carries the position of the statement that raised it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("{}", runtime_location(.filename, .line, .source))]
    Runtime {
        filename: String,
        line: Option<usize>,
        #[source]
        source: RuntimeError,
    },
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options file {}: {message}", .path.display())]
    Options { path: PathBuf, message: String },
    #[error(transparent)]
    UnknownMacro(#[from] UnknownMacro),
}

#[allow(clippy::ref_option)]
fn runtime_location(filename: &str, line: &Option<usize>, source: &RuntimeError) -> String {
    match *line {
        Some(line) => format!("{}\n  in {filename} at line {line}", source.report()),
        None => format!("{}\n  in {filename}", source.report()),
    }
}

impl Error {
    /// The runtime error behind a failed execution, if that is what this is.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            Error::Runtime { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_name_the_line() {
        let err = Error::Runtime {
            filename: "build.craftr".into(),
            line: Some(3),
            source: RuntimeError::ZeroDivision("division by zero".into()),
        };
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero\n  in build.craftr at line 3");
        assert_eq!(err.as_runtime().map(RuntimeError::class_name), Some("ZeroDivisionError"));
    }

    #[test]
    fn unknown_macro_message() {
        assert_eq!(Error::from(UnknownMacro("toml".into())).to_string(), "unknown macro: 'toml'");
    }
}
