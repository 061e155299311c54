use serde_yaml::Value as Yaml;

use super::MacroPlugin;
use crate::dsl::error::SyntaxError;
use crate::dsl::lexer::{KindSet, TokenKind};
use crate::dsl::rewrite::Rewriter;
use crate::host::unparse::{float_repr, quote_str};

/// `!yaml {` + newline, an indented YAML document, then `}` on its own line.
/// Expands to the equivalent host literal, padded with line breaks so that
/// line numbers after the block are unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlMacro;

impl MacroPlugin for YamlMacro {
    fn parse_macro(&self, rewriter: &mut Rewriter<'_>) -> Result<String, SyntaxError> {
        let source = rewriter.tokenizer().source();
        let (brace, after) = rewriter.tokenizer().with_skipped(KindSet::of(&[TokenKind::Whitespace]), |tokens| {
            let brace = tokens.current();
            if !brace.is_control("{") {
                return (brace, None);
            }
            let mut after = tokens.bump();
            if after.kind == TokenKind::Comment {
                after = tokens.bump();
            }
            (brace, Some(after))
        });
        let Some(after) = after else {
            return Err(rewriter.error(format!("expected '{{' after !yaml, got {brace}"), brace.pos));
        };
        if after.kind != TokenKind::Newline {
            return Err(rewriter.error(format!("expected a line break after '{{', got {after}"), after.pos));
        }

        let mut offset = after.end();
        let mut indent: Option<usize> = None;
        let mut document = String::new();
        loop {
            let rest = source.get(offset..).unwrap_or("");
            if rest.is_empty() {
                return Err(rewriter.error("expected '}' to close the yaml block", brace.pos));
            }
            let len = rest.find('\n').map_or(rest.len(), |i| i + 1);
            let line = &rest[..len];
            let content = line.trim_start_matches([' ', '\t']);
            if content.trim().is_empty() {
                document.push('\n');
                offset += len;
                continue;
            }
            let width = line.len() - content.len();
            let block = match indent {
                None if width == 0 => {
                    return Err(rewriter.error("expected an indented yaml block", brace.pos));
                }
                None => *indent.insert(width),
                Some(block) if width < block => break,
                Some(block) => block,
            };
            document.push_str(&line[block..]);
            offset += len;
        }

        let tokens = rewriter.tokenizer();
        tokens.jump_to(offset);
        let close = tokens.with_skipped(KindSet::of(&[TokenKind::Indent, TokenKind::Whitespace]), |tokens| tokens.current());
        if !close.is_control("}") {
            return Err(rewriter.error(format!("expected '}}' to close the yaml block, got {close}"), close.pos));
        }
        tokens.bump();

        let value: Yaml = serde_yaml::from_str(&document)
            .map_err(|e| rewriter.error(format!("invalid yaml: {e}"), brace.pos))?;
        let breaks = source[brace.pos.offset..close.end()].matches('\n').count();
        tracing::trace!(lines = breaks, "expanded yaml block");
        Ok(format!("({}{})", to_host_literal(&value), "\n".repeat(breaks)))
    }
}

/// Render a YAML value as a host literal expression.
pub fn to_host_literal(value: &Yaml) -> String {
    match value {
        Yaml::Null => "None".to_string(),
        Yaml::Bool(true) => "True".to_string(),
        Yaml::Bool(false) => "False".to_string(),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                // Past the host integer range.
                float_repr(u as f64)
            } else {
                float_repr(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Yaml::String(s) => quote_str(s),
        Yaml::Sequence(items) => {
            let items: Vec<_> = items.iter().map(to_host_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Yaml::Mapping(map) => {
            let entries: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", to_host_literal(k), to_host_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Yaml::Tagged(tagged) => to_host_literal(&tagged.value),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::macros::MacroRegistry;

    fn expand(source: &str) -> Result<String, SyntaxError> {
        Rewriter::new(source, "<test>")
            .with_macros(MacroRegistry::with_builtins())
            .rewrite()
            .map(|r| r.code)
    }

    #[test]
    fn mapping_becomes_dict_literal() {
        let code = expand("config = !yaml {\n  name: demo\n  deps: [a, b]\n}\nx = 1\n").unwrap();
        assert_eq!(code, "config = ({'name': 'demo', 'deps': ['a', 'b']}\n\n\n)\nx = 1\n");
    }

    #[test]
    fn scalars() {
        let value: Yaml = serde_yaml::from_str("[1, 2.5, true, null, 'it''s']").unwrap();
        assert_eq!(to_host_literal(&value), "[1, 2.5, True, None, 'it\\'s']");
    }

    #[test]
    fn blank_lines_inside_block() {
        let code = expand("v = !yaml {\n  a: 1\n\n  b: 2\n}\n").unwrap();
        assert_eq!(code, "v = ({'a': 1, 'b': 2}\n\n\n\n)\n");
    }

    #[test]
    fn block_must_be_indented() {
        let err = expand("v = !yaml {\na: 1\n}\n").unwrap_err();
        assert_eq!(err.message, "expected an indented yaml block");
        assert_eq!((err.line, err.column), (1, 10));
    }

    #[test]
    fn brace_required() {
        let err = expand("v = !yaml [1]\n").unwrap_err();
        assert!(err.message.starts_with("expected '{' after !yaml"));
    }

    #[test]
    fn block_must_start_on_a_new_line() {
        let err = expand("v = !yaml { a: 1 }\n").unwrap_err();
        assert!(err.message.starts_with("expected a line break after '{'"), "{}", err.message);
    }

    #[test]
    fn invalid_yaml_points_at_brace() {
        let err = expand("v = !yaml {\n  a: [1\n}\n").unwrap_err();
        assert!(err.message.starts_with("invalid yaml"));
        assert_eq!(err.line, 1);
    }
}
