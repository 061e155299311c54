//! Macro plugins: `!name ...` hands the tokenizer to a plugin that consumes
//! raw source and returns a host expression to splice in its place.

mod yaml;

use std::fmt;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::error::SyntaxError;
use super::rewrite::Rewriter;

pub use yaml::{to_host_literal, YamlMacro};

pub trait MacroPlugin: Send + Sync {
    /// Consume one invocation. The tokenizer is positioned on the token right
    /// after the macro name; on success it must be left on the first token
    /// after the invocation.
    fn parse_macro(&self, rewriter: &mut Rewriter<'_>) -> Result<String, SyntaxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown macro: '{0}'")]
pub struct UnknownMacro(pub String);

/// Named set of macro plugins handed to a rewriter.
#[derive(Clone, Default)]
pub struct MacroRegistry {
    plugins: IndexMap<String, Arc<dyn MacroPlugin>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every plugin that ships with the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("yaml", YamlMacro);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: impl MacroPlugin + 'static) {
        self.plugins.insert(name.into(), Arc::new(plugin));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MacroPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// The subset of this registry named by `names`, in the order given.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, UnknownMacro> {
        let mut selected = Self::new();
        for name in names {
            let name = name.as_ref();
            let plugin = self.get(name).ok_or_else(|| UnknownMacro(name.to_string()))?;
            selected.plugins.insert(name.to_string(), plugin);
        }
        Ok(selected)
    }
}

impl fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

static GLOBAL: LazyLock<RwLock<MacroRegistry>> =
    LazyLock::new(|| RwLock::new(MacroRegistry::with_builtins()));

/// Process-wide registry that named plugins are resolved against.
pub fn global() -> &'static RwLock<MacroRegistry> {
    &GLOBAL
}

/// Resolve plugin names against the process-wide registry.
pub fn resolve<S: AsRef<str>>(names: &[S]) -> Result<MacroRegistry, UnknownMacro> {
    global().read().select(names)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::lexer::TokenKind;

    /// `!answer` expands to a constant.
    struct Answer;

    impl MacroPlugin for Answer {
        fn parse_macro(&self, _rewriter: &mut Rewriter<'_>) -> Result<String, SyntaxError> {
            Ok("42".to_string())
        }
    }

    /// `!upper NAME` expands to the quoted upper-cased name.
    struct Upper;

    impl MacroPlugin for Upper {
        fn parse_macro(&self, rewriter: &mut Rewriter<'_>) -> Result<String, SyntaxError> {
            let mut token = rewriter.tokenizer().current();
            while token.kind == TokenKind::Whitespace {
                token = rewriter.tokenizer().bump();
            }
            if token.kind != TokenKind::Name {
                return Err(rewriter.error("expected a name", token.pos));
            }
            rewriter.tokenizer().bump();
            Ok(format!("'{}'", token.text.to_uppercase()))
        }
    }

    #[test]
    fn custom_plugin_is_spliced() {
        let mut registry = MacroRegistry::new();
        registry.register("answer", Answer);
        let result = Rewriter::new("x = !answer + 1\n", "<test>")
            .with_macros(registry)
            .rewrite()
            .unwrap();
        assert_eq!(result.code, "x = 42 + 1\n");
    }

    #[test]
    fn plugin_consumes_tokens() {
        let mut registry = MacroRegistry::new();
        registry.register("upper", Upper);
        let result = Rewriter::new("print(!upper hello)\n", "<test>")
            .with_macros(registry)
            .rewrite()
            .unwrap();
        assert_eq!(result.code, "print('HELLO')\n");
    }

    #[test]
    fn unknown_macro_is_reported() {
        let err = Rewriter::new("x = !nope 1\n", "<test>").rewrite().unwrap_err();
        assert_eq!(err.message, "unknown macro: 'nope'");
        assert_eq!((err.line, err.column), (1, 5));
    }

    #[test]
    fn select_by_name() {
        let registry = MacroRegistry::with_builtins();
        assert_eq!(registry.select(&["yaml"]).unwrap().len(), 1);
        assert_eq!(
            registry.select(&["toml"]).unwrap_err(),
            UnknownMacro("toml".to_string())
        );
    }

    #[test]
    fn global_registry_has_builtins() {
        assert!(global().read().get("yaml").is_some());
        assert!(resolve(&["yaml"]).is_ok());
    }
}
