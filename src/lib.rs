//! Block-structured build-script DSL.
//!
//! Source is rewritten into a small Python-flavoured host language, with
//! every `{ ... }` block cut out as a closure, then transpiled so that free
//! names resolve at runtime against a stack of context objects.

pub mod driver;
#[allow(clippy::module_name_repetitions)]
pub mod dsl;
pub mod error;
pub mod host;
pub mod runtime;
pub mod settings;

pub use driver::{builtin_context, transpile_source, Driver};
pub use error::{Error, Result};
pub use settings::TranspileOptions;
