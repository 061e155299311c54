use indexmap::IndexMap;

/// Body of an extracted closure. A closure always has exactly one of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureBody {
    /// Statements between the braces, as rewritten host text with original indentation.
    Block(String),
    /// A single expression following a closure header.
    Expr(String),
}

/// A closure captured by the rewriter, still in text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    /// Unique per file. Nested closures carry their parents' ids as a prefix.
    pub id: String,
    pub line: usize,
    pub column: usize,
    /// `None` for the headerless block form `{ ... }`.
    pub parameters: Option<Vec<String>>,
    pub body: ClosureBody,
}

impl Closure {
    pub fn block(&self) -> Option<&str> {
        match &self.body {
            ClosureBody::Block(code) => Some(code),
            ClosureBody::Expr(_) => None,
        }
    }

    pub fn expr(&self) -> Option<&str> {
        match &self.body {
            ClosureBody::Expr(code) => Some(code),
            ClosureBody::Block(_) => None,
        }
    }

    /// Host text of the body, whichever form it takes.
    pub fn text(&self) -> &str {
        match &self.body {
            ClosureBody::Block(code) | ClosureBody::Expr(code) => code,
        }
    }

    /// Headerless `{ ... }` closures configure their target instead of taking arguments.
    pub fn is_block_form(&self) -> bool {
        self.parameters.is_none()
    }
}

/// Ordered table of closures extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureRegistry {
    closures: IndexMap<String, Closure>,
}

impl ClosureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, closure: Closure) {
        self.closures.insert(closure.id.clone(), closure);
    }

    pub fn get(&self, id: &str) -> Option<&Closure> {
        self.closures.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.closures.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Closure> {
        self.closures.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.closures.keys().map(String::as_str)
    }

    /// Drop entries registered after a checkpoint of length `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.closures.truncate(len);
    }

    /// Order entries by where their headers appear in the source.
    pub(crate) fn sort_by_position(&mut self) {
        self.closures
            .sort_by(|_, a, _, b| (a.line, a.column).cmp(&(b.line, b.column)));
    }
}

/// Output of the rewriter: host text with closures replaced by their ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub code: String,
    pub closures: ClosureRegistry,
}

impl RewriteResult {
    /// Ids that appear in neither the top-level code nor any other closure.
    pub fn unreferenced(&self) -> Vec<&str> {
        self.closures
            .ids()
            .filter(|id| {
                !contains_ident(&self.code, id)
                    && !self
                        .closures
                        .iter()
                        .any(|c| c.id != *id && contains_ident(c.text(), id))
            })
            .collect()
    }
}

/// Whole-identifier occurrence test.
pub(crate) fn contains_ident(haystack: &str, ident: &str) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    haystack.match_indices(ident).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + ident.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn closure(id: &str, line: usize, body: &str) -> Closure {
        Closure {
            id: id.into(),
            line,
            column: 0,
            parameters: None,
            body: ClosureBody::Block(body.into()),
        }
    }

    #[test]
    fn sorted_by_header_position() {
        let mut registry = ClosureRegistry::new();
        registry.insert(closure("_closure_1_closure_1", 2, " x "));
        registry.insert(closure("_closure_1", 1, "\n  f(_closure_1_closure_1)\n"));
        registry.sort_by_position();
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["_closure_1", "_closure_1_closure_1"]);
    }

    #[test]
    fn truncate_rolls_back() {
        let mut registry = ClosureRegistry::new();
        registry.insert(closure("_closure_1", 1, " a "));
        registry.insert(closure("_closure_2", 2, " b "));
        registry.truncate(1);
        assert!(registry.contains("_closure_1"));
        assert!(!registry.contains("_closure_2"));
    }

    #[test]
    fn whole_identifier_match() {
        assert!(contains_ident("f(_closure_1)", "_closure_1"));
        assert!(!contains_ident("f(_closure_12)", "_closure_1"));
        assert!(!contains_ident("_closure_1_closure_1", "_closure_1"));
    }

    #[test]
    fn unreferenced_entries() {
        let mut registry = ClosureRegistry::new();
        registry.insert(closure("_closure_1", 1, " a "));
        registry.insert(closure("_closure_2", 2, " b "));
        let result = RewriteResult { code: "f(_closure_1)".into(), closures: registry };
        assert_eq!(result.unreferenced(), vec!["_closure_2"]);
    }
}
