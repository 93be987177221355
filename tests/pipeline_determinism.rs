mod common;

use common::{INVENTORY, compile, manifest_json};
use objc3c::compile::{CompileOptions, CompileStatus, compile_source, sha256_hex};
use sha2::{Digest, Sha256};

#[test]
fn sequential_compiles_are_byte_identical() {
    let first = compile(INVENTORY);
    assert_eq!(first.status, CompileStatus::Ok, "{}", first.diagnostics_text());
    let second = compile(INVENTORY);

    let digest = |text: &Option<String>| hex::encode(Sha256::digest(text.as_deref().expect("artifact").as_bytes()));
    assert_eq!(digest(&first.ir), digest(&second.ir));
    assert_eq!(digest(&first.manifest), digest(&second.manifest));
    assert_eq!(first.ir_sha256.as_deref(), Some(digest(&first.ir).as_str()));
    assert_eq!(first.manifest_sha256.as_deref(), Some(digest(&first.manifest).as_str()));
}

#[test]
fn repeated_runs_never_drift() {
    let baseline = compile(INVENTORY);
    for _ in 0..8 {
        let again = compile(INVENTORY);
        assert_eq!(again.ir_sha256, baseline.ir_sha256);
        assert_eq!(again.manifest_sha256, baseline.manifest_sha256);
        assert_eq!(again.diagnostics, baseline.diagnostics);
    }
}

#[test]
fn lowering_contract_changes_are_visible_in_artifacts() {
    let baseline = compile(INVENTORY);
    let options = CompileOptions {
        lowering: objc3c::lower::LoweringContract {
            runtime_dispatch_symbol: "objc3_msgsend_alt".to_string(),
            ..Default::default()
        },
        ..CompileOptions::default()
    };
    let alt = compile_source(&options, INVENTORY);
    assert_eq!(alt.status, CompileStatus::Ok);
    assert_ne!(alt.ir_sha256, baseline.ir_sha256);
    assert!(alt.ir.as_deref().is_some_and(|ir| ir.contains("declare i32 @objc3_msgsend_alt(")));
    assert_eq!(manifest_json(&alt)["lowering"]["runtime_dispatch_symbol"], "objc3_msgsend_alt");
}

#[test]
fn artifacts_are_well_formed() {
    let result = compile(INVENTORY);
    let ir = result.ir.as_deref().expect("ir");
    assert!(ir.starts_with("; objc3c native frontend IR\n"));
    assert!(ir.contains("@base = global i32 10, align 4\n"));
    assert!(ir.contains("@scale = global i32 21, align 4\n"));
    assert!(ir.contains("define i32 @objc3c_entry() {"));
    assert!(ir.ends_with("}\n"));

    let manifest = manifest_json(&result);
    assert_eq!(manifest["module"], "inventory");
    assert_eq!(manifest["frontend"]["pipeline"]["semantic_skipped"], false);
    assert_eq!(manifest["lowering_contracts"].as_array().map(Vec::len), Some(40));
    let contracts = manifest["lowering_contracts"].as_array().expect("contracts");
    assert!(contracts.iter().all(|c| c["valid"] == true), "{:?}", contracts);
    assert_eq!(sha256_hex(ir.as_bytes()), result.ir_sha256.clone().expect("digest"));
}
