mod common;

use common::{codes, compile, manifest_json};
use objc3c::compile::{CompileStatus, Stage};

const PRAGMA: &str = "#pragma objc_language_version(3)\n";

fn count(codes: &[&str], code: &str) -> usize {
    codes.iter().filter(|c| **c == code).count()
}

#[test]
fn two_pragmas_yield_one_duplicate() {
    let src = format!("{PRAGMA}{PRAGMA}fn main() -> i32 {{ return 0; }}\n");
    let result = compile(&src);
    let found = codes(&result);
    assert_eq!(count(&found, "O3L007"), 1);
    assert_eq!(count(&found, "O3L008"), 0);
    assert_eq!(result.status, CompileStatus::Diagnostics);
    assert!(result.semantic_skipped);
    assert!(!result.stage(Stage::Sema).attempted);
    assert_eq!(result.stage(Stage::Lex).diagnostics, 1);
}

#[test]
fn pragma_after_a_declaration_yields_one_non_leading() {
    let src = format!("let x = 1;\n{PRAGMA}fn main() -> i32 {{ return x; }}\n");
    let result = compile(&src);
    let found = codes(&result);
    assert_eq!(count(&found, "O3L008"), 1);
    assert_eq!(count(&found, "O3L007"), 0);
    assert!(result.diagnostics_text().contains("language-version pragma must stay in the file-scope prelude"));
}

#[test]
fn single_leading_pragma_is_clean() {
    let src = format!("{PRAGMA}fn main() -> i32 {{ return 0; }}\n");
    let result = compile(&src);
    assert_eq!(result.status, CompileStatus::Ok, "{}", result.diagnostics_text());
    let contract = &manifest_json(&result)["frontend"]["language_version_pragma_contract"];
    assert_eq!(contract["seen"], true);
    assert_eq!(contract["directive_count"], 1);
    assert_eq!(contract["duplicate"], false);
    assert_eq!(contract["non_leading"], false);
    assert_eq!(contract["first_line"], 1);
}

#[test]
fn no_pragma_is_also_clean() {
    let result = compile("fn main() -> i32 { return 0; }\n");
    assert_eq!(result.status, CompileStatus::Ok);
    assert_eq!(manifest_json(&result)["frontend"]["language_version_pragma_contract"]["seen"], false);
}
