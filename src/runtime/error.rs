use super::value::Value;

/// Errors raised while executing host code.
///
/// Every variant maps to an exception class name (see [`RuntimeError::class_name`])
/// so that `except` clauses can match internal failures and user raises alike.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("name '{name}' is not defined{}", scope_summary(.scopes))]
    NameNotFound { name: String, scopes: Vec<String> },
    #[error("cannot assign to '{name}': {reason}")]
    CannotAssign { name: String, reason: String },
    #[error("{0}")]
    Attribute(String),
    /// A property owner rejected a write.
    #[error("{0}")]
    Property(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Value(String),
    #[error("{0}")]
    Key(String),
    #[error("{0}")]
    Index(String),
    #[error("{0}")]
    ZeroDivision(String),
    #[error("{0}")]
    Assertion(String),
    #[error("{0}")]
    Import(String),
    #[error("{0}")]
    Runtime(String),
    /// An exception instance raised by host code.
    #[error("{message}")]
    Raised { class: String, message: String, value: Value },
}

fn scope_summary(scopes: &[String]) -> String {
    if scopes.is_empty() {
        String::new()
    } else {
        format!(" (scope stack: {})", scopes.join(", "))
    }
}

impl RuntimeError {
    pub fn attribute(message: impl Into<String>) -> Self {
        Self::Attribute(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }

    pub fn no_attribute(type_name: &str, name: &str) -> Self {
        Self::Attribute(format!("'{type_name}' object has no attribute '{name}'"))
    }

    /// Name of the exception class this error is an instance of.
    pub fn class_name(&self) -> &str {
        match self {
            Self::NameNotFound { .. } => "NameError",
            Self::CannotAssign { .. } => "AssignmentError",
            Self::Attribute(_) => "AttributeError",
            Self::Property(_) => "PropertyError",
            Self::Type(_) => "TypeError",
            Self::Value(_) => "ValueError",
            Self::Key(_) => "KeyError",
            Self::Index(_) => "IndexError",
            Self::ZeroDivision(_) => "ZeroDivisionError",
            Self::Assertion(_) => "AssertionError",
            Self::Import(_) => "ImportError",
            Self::Runtime(_) => "RuntimeError",
            Self::Raised { class, .. } => class,
        }
    }

    /// `ClassName: message`, the way an uncaught error is reported.
    pub fn report(&self) -> String {
        let message = self.to_string();
        if message.is_empty() {
            self.class_name().to_string()
        } else {
            format!("{}: {message}", self.class_name())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn name_error_lists_scopes() {
        let err = RuntimeError::NameNotFound {
            name: "x".into(),
            scopes: vec!["namespace".into(), "dict".into()],
        };
        assert_eq!(err.report(), "NameError: name 'x' is not defined (scope stack: namespace, dict)");
    }

    #[test]
    fn empty_message_reports_class_only() {
        let err = RuntimeError::Raised { class: "Oops".into(), message: String::new(), value: Value::None };
        assert_eq!(err.report(), "Oops");
    }
}
