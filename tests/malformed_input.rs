mod common;

use common::{codes, compile};
use objc3c::compile::{CompileResult, CompileStatus, Stage};

fn compile_on_large_stack(src: String) -> CompileResult {
    std::thread::Builder::new()
        .stack_size(16 * 1024 * 1024)
        .spawn(move || compile(&src))
        .expect("spawn")
        .join()
        .expect("compile thread")
}

#[test]
fn stray_switch_labels_terminate_with_one_diagnostic() {
    for src in [
        "fn main() -> i32 { case 1: return 0; }\n",
        "fn main() -> i32 { default: return 0; }\n",
    ] {
        let result = compile(src);
        assert_eq!(result.status, CompileStatus::Diagnostics);
        assert_eq!(codes(&result), vec!["O3P100"]);
        assert!(result.semantic_skipped);
        assert!(!result.stage(Stage::Sema).attempted);
        assert!(result.ir.is_none());
    }
}

#[test]
fn deep_parentheses_are_rejected_not_fatal() {
    let depth = 2000;
    let src = format!("fn main() -> i32 {{ return {}1{}; }}\n", "(".repeat(depth), ")".repeat(depth));
    let result = compile_on_large_stack(src);
    assert_eq!(result.status, CompileStatus::Diagnostics);
    assert_eq!(codes(&result), vec!["O3P103"]);
    assert!(result.diagnostics[0].message.contains("nesting depth exceeds limit"));
}

#[test]
fn moderate_nesting_still_compiles() {
    let depth = 60;
    let src = format!(
        "fn main() -> i32 {{ let x = {}1{}; if (x == 1) {{ {} return x; {} }} return 0; }}\n",
        "(".repeat(depth),
        ")".repeat(depth),
        "{".repeat(depth),
        "}".repeat(depth)
    );
    let result = compile_on_large_stack(src);
    assert_eq!(result.status, CompileStatus::Ok, "{:?}", result.diagnostics);
    assert!(result.ir.is_some());
}

#[test]
fn non_ascii_identifier_is_one_diagnostic() {
    let result = compile("let é = 1;\n");
    assert_eq!(result.status, CompileStatus::Diagnostics);
    let lexer: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| d.code == "O3L001")
        .map(|d| d.message.clone())
        .collect();
    assert_eq!(lexer, vec!["unexpected character 'é'".to_string()]);
}
