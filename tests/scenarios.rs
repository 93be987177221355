mod common;

use common::{analyze, codes, compile, lenient, manifest_json};
use objc3c::compile::{CompileOptions, CompileStatus, Stage, compile_source};
use objc3c::lower::LoweringContract;
use objc3c::sema::bodies::ReceiverProof;

const NIL_SEND: &str = "@interface Widget\n- (i32) ping;\n@end\n\
                        @implementation Widget\n- (i32) ping { return 1; }\n@end\n\
                        fn main() -> i32 { return [nil ping]; }\n";

fn contract<'a>(manifest: &'a serde_json::Value, area: &str) -> &'a serde_json::Value {
    manifest["lowering_contracts"]
        .as_array()
        .and_then(|all| all.iter().find(|c| c["area"] == area))
        .expect("contract present")
}

#[test]
fn literal_nil_send_is_folded() {
    let (out, diags) = analyze(NIL_SEND);
    assert!(diags.is_empty(), "{:?}", diags);
    let proofs: Vec<ReceiverProof> = out.bodies.proofs.values().copied().collect();
    assert_eq!(proofs, vec![ReceiverProof::NilLiteral]);
    assert!(proofs[0].is_foldable());

    let result = compile(NIL_SEND);
    assert_eq!(result.status, CompileStatus::Ok);
    let ir = result.ir.as_deref().expect("ir");
    let header = ir
        .lines()
        .find(|l| l.starts_with("; nil_receiver_semantics_foldability_lowering = "))
        .expect("nil receiver header");
    assert!(header.contains("message_send_sites=1;"));
    assert!(header.contains("contract_violation_sites=0;"));
    assert!(ir.contains("define i32 @main() {\nentry:\n  ret i32 0\n}\n"));

    let manifest = manifest_json(&result);
    let nil = contract(&manifest, "nil_receiver_semantics_foldability");
    assert_eq!(nil["surface"]["message_send_sites"], 1);
    assert_eq!(nil["surface"]["nil_receiver_foldable_sites"], 1);
    assert_eq!(nil["surface"]["contract_violation_sites"], 0);
    assert_eq!(nil["valid"], true);
}

#[test]
fn unknown_property_attribute_is_one_diagnostic() {
    let src = "@interface Box\n@property (nonatomic, shiny) i32 size;\n@end\nfn main() -> i32 { return 0; }\n";
    let result = compile(src);
    assert_eq!(result.status, CompileStatus::Diagnostics);
    assert_eq!(codes(&result), vec!["O3S206"]);
    assert!(
        result.diagnostics[0]
            .message
            .starts_with("type mismatch: unknown @property attribute 'shiny'")
    );
    assert!(result.ir.is_none());

    let clean = compile_source(&lenient(), "@interface Box\n@property (nonatomic) i32 size;\n@end\n");
    let dirty = compile_source(&lenient(), src);
    let violations = |r: &objc3c::compile::CompileResult| {
        manifest_json(r)["frontend"]["objc_profiles"]["property_attribute"]["contract_violation_sites"]
            .as_u64()
            .expect("counter")
    };
    assert_eq!(violations(&dirty), violations(&clean) + 1);
}

#[test]
fn oversized_arg_slots_fail_before_parsing() {
    let options = CompileOptions {
        lowering: LoweringContract {
            max_message_send_args: 17,
            ..LoweringContract::default()
        },
        ..CompileOptions::default()
    };
    let result = compile_source(&options, "fn main( -> {{{ this would not parse");
    assert_eq!(result.status, CompileStatus::UsageError);
    assert_eq!(result.exit_code(), 2);
    assert!(result.diagnostics.is_empty());
    assert!(Stage::ALL.iter().all(|s| !result.stage(*s).attempted));
    assert!(result.ir.is_none() && result.manifest.is_none());
    assert!(
        result
            .usage_error
            .as_deref()
            .is_some_and(|m| m.contains("max_message_send_args"))
    );
}

#[test]
fn limit_itself_is_accepted() {
    let options = CompileOptions {
        lowering: LoweringContract {
            max_message_send_args: 16,
            ..LoweringContract::default()
        },
        ..CompileOptions::default()
    };
    let result = compile_source(&options, "fn main() -> i32 { return 0; }");
    assert_eq!(result.status, CompileStatus::Ok);
    assert_eq!(manifest_json(&result)["lowering"]["runtime_dispatch_arg_slots"], 16);
}

#[test]
fn empty_dispatch_symbol_is_usage_error() {
    let options = CompileOptions {
        lowering: LoweringContract {
            runtime_dispatch_symbol: String::new(),
            ..LoweringContract::default()
        },
        ..CompileOptions::default()
    };
    let result = compile_source(&options, "fn main() -> i32 { return 0; }");
    assert_eq!(result.status, CompileStatus::UsageError);
}
