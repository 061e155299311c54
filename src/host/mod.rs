//! The host language that rewritten DSL code is expressed in.

#[allow(clippy::wildcard_imports)]
pub mod ast;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod parser;
#[allow(clippy::wildcard_imports)]
pub mod unparse;
