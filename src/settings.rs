use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Transpile options ────────────────────────────────────────────

/// Options controlling how DSL source is rewritten and transpiled.
///
/// Every field has a default, so an options file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileOptions {
    /// Global through which free names are resolved at runtime.
    pub runtime_name: String,
    /// Prefix the rewriter gives `def x = ...` targets.
    pub local_def_prefix: String,
    /// Whether `def x = ...` / `let x = ...` are recognized at all.
    pub local_defs: bool,
    /// Names that are never routed through the runtime.
    pub pure_builtins: Vec<String>,
    /// Host source prepended to every compiled module.
    pub preamble: String,
}

pub const DEFAULT_RUNTIME_NAME: &str = "__runtime__";
pub const DEFAULT_LOCAL_DEF_PREFIX: &str = "_def_";

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            runtime_name: DEFAULT_RUNTIME_NAME.to_string(),
            local_def_prefix: DEFAULT_LOCAL_DEF_PREFIX.to_string(),
            local_defs: true,
            pure_builtins: Vec::new(),
            preamble: String::new(),
        }
    }
}

impl TranspileOptions {
    /// The prefix handed to the rewriter, `None` when local definitions are off.
    pub fn local_def_prefix(&self) -> Option<&str> {
        self.local_defs.then_some(self.local_def_prefix.as_str())
    }

    pub fn is_pure_builtin(&self, name: &str) -> bool {
        self.pure_builtins.iter().any(|pure| pure == name)
    }
}

/// Load options from a JSON file.
pub fn load_options(path: &Path) -> Result<TranspileOptions> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
    let options: TranspileOptions = serde_json::from_str(&text)
        .map_err(|e| Error::Options { path: path.to_path_buf(), message: e.to_string() })?;
    if options.runtime_name.is_empty() || options.local_def_prefix.is_empty() {
        return Err(Error::Options {
            path: path.to_path_buf(),
            message: "runtime_name and local_def_prefix must not be empty".into(),
        });
    }
    tracing::debug!(path = %path.display(), "loaded transpile options");
    Ok(options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{ "pure_builtins": ["print"], "local_defs": false }"#).unwrap();

        let options = load_options(&path).unwrap();
        assert_eq!(options.runtime_name, "__runtime__");
        assert_eq!(options.local_def_prefix(), None);
        assert!(options.is_pure_builtin("print"));
        assert!(!options.is_pure_builtin("len"));
    }

    #[test]
    fn malformed_file_is_an_options_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_options(&path), Err(Error::Options { .. })));
    }

    #[test]
    fn empty_runtime_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{ "runtime_name": "" }"#).unwrap();
        assert!(matches!(load_options(&path), Err(Error::Options { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_options(&dir.path().join("nope.json")), Err(Error::Io { .. })));
    }
}
