//! Command-line behaviour of the `craftr-dsl` binary.

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn craftr(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_craftr-dsl"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn script(dir: &TempDir, name: &str, source: &str) -> String {
    fs::write(dir.path().join(name), source).unwrap();
    name.to_string()
}

#[test]
fn transpile_flag_prints_host_source() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "x = 1\n");
    let out = craftr(&["-E", &file], dir.path());
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "__runtime__['x'] = 1\n");
}

#[test]
fn runs_against_a_namespace_context() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "name = 'demo'\nprint(name)\n");
    let out = craftr(&["--context", "namespace", &file], dir.path());
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "demo\n");
}

#[test]
fn syntax_errors_fail_with_a_hint() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "foo {\n  bar()\n");
    let out = craftr(&[&file], dir.path());
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("SyntaxError: "), "{stderr}");
    assert!(stderr.contains("build.craftr"), "{stderr}");
}

#[test]
fn runtime_errors_name_the_line() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "a = 1\nprint(b)\n");
    let out = craftr(&[&file], dir.path());
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("NameError: name 'b' is not defined"), "{stderr}");
    assert!(stderr.contains("at line 2"), "{stderr}");
}

#[test]
fn unknown_context_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "x = 1\n");
    let out = craftr(&["--context", "project", &file], dir.path());
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn options_file_renames_the_runtime() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "x = 1\n");
    let options = script(&dir, "options.json", r#"{"runtime_name": "__rt__"}"#);
    let out = craftr(&["-E", "--options", &options, &file], dir.path());
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "__rt__['x'] = 1\n");
}

#[test]
fn unknown_macro_is_rejected() {
    let dir = TempDir::new().unwrap();
    let file = script(&dir, "build.craftr", "x = 1\n");
    let out = craftr(&["--macro", "toml", &file], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown macro: 'toml'"));
}
