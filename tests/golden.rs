//! Golden cases for the rewriter and the transpiler.
//!
//! Each case pairs DSL source with the exact text the stage must produce.

#![allow(clippy::unwrap_used)]

use craftr_dsl::dsl::macros::MacroRegistry;
use craftr_dsl::dsl::rewrite_source;
use craftr_dsl::{transpile_source, TranspileOptions};

/// (source, rewritten host text, number of extracted closures)
const REWRITE_CASES: &[(&str, &str, usize)] = &[
    ("greet { print(name) }", "greet(_closure_1)", 1),
    ("target(a, b) {\n  x = 1\n}\n", "target(a, b)(_closure_1)\n", 1),
    ("x = { a: 1, b: 2 }", "x = { a: 1, b: 2 }", 0),
    ("x = {}", "x = {}", 0),
    ("print 'hi', end=''", "print('hi', end='')", 0),
    ("include 'a.craftr'\n", "include('a.craftr')\n", 0),
    ("def x = 1\nlet y = x + 1\n", "_def_x = 1\n_def_y = x + 1\n", 0),
    ("def f(a):\n  return a\n", "def f(a):\n  return a\n", 0),
    ("a {\n  b {\n    c()\n  }\n}\nd {\n  e()\n}\n", "a(_closure_1)\nd(_closure_3)\n", 3),
    (
        "config = !yaml {\n  name: demo\n  deps: [a, b]\n}\nx = 1\n",
        "config = ({'name': 'demo', 'deps': ['a', 'b']}\n\n\n)\nx = 1\n",
        0,
    ),
];

/// (source, transpiled host source)
const TRANSPILE_CASES: &[(&str, &str)] = &[
    ("x = 1\n", "__runtime__['x'] = 1\n"),
    (
        "greet { print(name) }\n",
        "@__runtime__.closure()\ndef _closure_1(self):\n    __runtime__['print'](__runtime__['name'])\n\
         __runtime__.call_block(__runtime__['greet'], _closure_1)\n",
    ),
    (
        "project.version = '1.0'\n",
        "__runtime__.set_object_property(__runtime__['project'], 'version', '1.0')\n",
    ),
];

#[test]
fn rewriter_golden_cases() {
    let options = TranspileOptions::default();
    let macros = MacroRegistry::with_builtins();
    for (source, expected, closures) in REWRITE_CASES {
        let result = rewrite_source(source, "<golden>", &options, &macros).unwrap();
        assert_eq!(result.code, *expected, "rewriting {source:?}");
        assert_eq!(result.closures.len(), *closures, "closures of {source:?}");
        assert!(result.unreferenced().is_empty(), "unreferenced closures in {source:?}");
    }
}

#[test]
fn transpiler_golden_cases() {
    let options = TranspileOptions::default();
    for (source, expected) in TRANSPILE_CASES {
        assert_eq!(transpile_source(source, "<golden>", &options).unwrap(), *expected, "transpiling {source:?}");
    }
}
