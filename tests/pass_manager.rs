mod common;

use common::{INVENTORY, analyze, lenient, manifest_json};
use objc3c::compile::{CompileStatus, compile_source};

const PROGRAMS: &[&str] = &[
    "fn main() -> i32 { return 0; }",
    INVENTORY,
    "let g = 0;\nlet g = 1;\nfn f() -> i32 { return y; }\npure fn p() -> i32 { g = 2; return 0; }\n",
    "fn f(a: i32) -> i32 { if (a) { return 1; } }\nfn h() -> i32 { break; return 0; }\n",
    "@interface Box\n@property (nonatomic, shiny) i32 size;\n@end\nfn g() -> i32 { return nope(1); }\n",
    "fn g(a: i32) -> i32 { return a; }\nfn f() -> i32 { return g(); }\n",
];

#[test]
fn cumulative_counts_never_decrease() {
    for src in PROGRAMS {
        let (out, diags) = analyze(src);
        let after = out.parity.diagnostics_after_pass;
        assert!(after.windows(2).all(|w| w[0] <= w[1]), "{:?} for {}", after, src);
        assert!(out.parity.diagnostics_monotonic);
        assert_eq!(after[2], diags.len());

        let mut running = 0;
        for (emitted, total) in out.parity.diagnostics_emitted_by_pass.iter().zip(after) {
            running += emitted;
            assert_eq!(running, total);
        }
    }
}

#[test]
fn manifest_mirrors_pass_counts() {
    for src in PROGRAMS {
        let (out, _) = analyze(src);
        let result = compile_source(&lenient(), src);
        assert_ne!(result.status, CompileStatus::UsageError);
        if result.manifest.is_none() {
            continue;
        }
        let pm = &manifest_json(&result)["frontend"]["pipeline"]["sema_pass_manager"];
        assert_eq!(pm["diagnostics_after_build"], out.parity.diagnostics_after_pass[0]);
        assert_eq!(pm["diagnostics_after_validate_bodies"], out.parity.diagnostics_after_pass[1]);
        assert_eq!(pm["diagnostics_after_validate_pure_contract"], out.parity.diagnostics_after_pass[2]);
        assert_eq!(pm["diagnostics_monotonic"], true);
    }
}

#[test]
fn sema_stage_reports_one_diagnostic_per_pass() {
    let src = PROGRAMS[2];
    let result = compile_source(&lenient(), src);
    let spans: Vec<(usize, usize)> = result.diagnostics.iter().map(|d| (d.span.line, d.span.column)).collect();
    let mut sorted = spans.clone();
    sorted.sort();
    assert_eq!(spans, sorted);
    assert_eq!(result.stage(objc3c::compile::Stage::Sema).diagnostics, 3);
}
