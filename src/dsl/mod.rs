//! The DSL front end: scanner, rewriter, closure registry and transpiler.

pub mod closure;
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod macros;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod rewrite;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod transpiler;

use crate::host::ast::Module;
use crate::settings::TranspileOptions;
use closure::RewriteResult;
use error::SyntaxError;
use macros::MacroRegistry;

/// Rewrite DSL source into host text and its closure registry.
pub fn rewrite_source(
    source: &str,
    filename: &str,
    options: &TranspileOptions,
    macros: &MacroRegistry,
) -> Result<RewriteResult, SyntaxError> {
    rewrite::Rewriter::new(source, filename)
        .with_local_defs(options.local_def_prefix())
        .with_macros(macros.clone())
        .rewrite()
}

/// Compile a DSL source string into a host module ready for execution.
///
/// This is the primary public entry point for the DSL pipeline:
/// source → scan → rewrite → parse → insert closures → route names → `Module`
pub fn compile_source(
    source: &str,
    filename: &str,
    options: &TranspileOptions,
    macros: &MacroRegistry,
) -> Result<Module, SyntaxError> {
    let rewritten = rewrite_source(source, filename, options, macros)?;
    transpiler::transpile(&rewritten, filename, options)
}
