//! Property tests for the block rewriter and the transpiler.

#![allow(clippy::unwrap_used)]

use std::fmt::Write as _;

use proptest::prelude::*;

use craftr_dsl::dsl::rewrite::rewrite;
use craftr_dsl::host::parser::parse_module;
use craftr_dsl::{transpile_source, TranspileOptions};

/// One top-level block per entry, nested as deep as the entry says.
fn nested_blocks(depths: &[usize]) -> String {
    let mut source = String::new();
    for (i, &depth) in depths.iter().enumerate() {
        for level in 0..depth {
            let _ = writeln!(source, "{}call{i}_{level} {{", "  ".repeat(level));
        }
        let _ = writeln!(source, "{}value = {i}", "  ".repeat(depth));
        for level in (0..depth).rev() {
            let _ = writeln!(source, "{}}}", "  ".repeat(level));
        }
    }
    source
}

proptest! {
    #[test]
    fn every_block_gets_its_own_id(depths in prop::collection::vec(1usize..4, 1..6)) {
        let source = nested_blocks(&depths);
        let result = rewrite(&source, "<prop>").unwrap();
        prop_assert_eq!(result.closures.len(), depths.iter().sum::<usize>());
        prop_assert!(result.unreferenced().is_empty());
    }

    #[test]
    fn plain_assignments_pass_through_unchanged(values in prop::collection::vec(0i64..1000, 1..20)) {
        let mut source = String::new();
        for (i, n) in values.iter().enumerate() {
            let _ = writeln!(source, "a{i} = {n} + 1");
        }
        let result = rewrite(&source, "<prop>").unwrap();
        prop_assert_eq!(&result.code, &source);
        prop_assert!(result.closures.is_empty());
    }

    #[test]
    fn transpiled_blocks_parse_as_host_code(depths in prop::collection::vec(1usize..4, 1..5)) {
        let source = nested_blocks(&depths);
        let code = transpile_source(&source, "<prop>", &TranspileOptions::default()).unwrap();
        let decorators = code.matches("@__runtime__.closure()").count();
        prop_assert_eq!(decorators, depths.iter().sum::<usize>());
        prop_assert!(parse_module(&code, "<prop>").is_ok());
    }
}
