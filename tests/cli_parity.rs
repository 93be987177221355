mod common;

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use common::INVENTORY;
use objc3c::compile::{CompileOptions, compile_file, sha256_hex};
use objc3c::lower::LoweringContract;
use objc3c::sema::CompatibilityMode;
use predicates::prelude::*;

fn objc3c() -> Command {
    Command::cargo_bin("objc3c").expect("binary built")
}

fn write_source(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write source");
    path
}

#[test]
fn cli_and_library_emit_identical_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_source(dir.path(), "inventory.objc3", INVENTORY);
    let out = dir.path().join("out");

    objc3c()
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::is_empty());

    let library = compile_file(&CompileOptions::default(), &input).expect("readable");
    let ir = fs::read(out.join("inventory.ll")).expect("ir written");
    let manifest = fs::read(out.join("inventory.manifest.json")).expect("manifest written");
    assert_eq!(Some(sha256_hex(&ir)), library.ir_sha256);
    assert_eq!(Some(sha256_hex(&manifest)), library.manifest_sha256);
    assert_eq!(fs::read_to_string(out.join("inventory.diagnostics.txt")).expect("diagnostics"), "");
}

#[test]
fn flags_match_equivalent_library_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_source(dir.path(), "m.objc3", INVENTORY);
    let out = dir.path().join("out");

    objc3c()
        .arg(&input)
        .args(["--out-dir", out.to_str().expect("utf8")])
        .args(["--emit-prefix", "custom"])
        .args(["--objc3-runtime-dispatch-symbol", "objc3_send"])
        .args(["--objc3-max-message-args", "6"])
        .args(["--objc3-compat-mode", "legacy"])
        .assert()
        .code(0);

    let options = CompileOptions {
        compatibility_mode: CompatibilityMode::Legacy,
        lowering: LoweringContract {
            max_message_send_args: 6,
            runtime_dispatch_symbol: "objc3_send".to_string(),
        },
        ..CompileOptions::default()
    };
    let library = compile_file(&options, &input).expect("readable");
    let ir = fs::read_to_string(out.join("custom.ll")).expect("ir written");
    assert_eq!(Some(ir), library.ir);
    let manifest = fs::read_to_string(out.join("custom.manifest.json")).expect("manifest written");
    assert_eq!(Some(manifest), library.manifest);
}

#[test]
fn contract_file_feeds_the_same_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_source(dir.path(), "m.objc3", INVENTORY);
    let contract = write_source(
        dir.path(),
        "lowering.toml",
        "[lowering]\nmax_message_send_args = 2\n\n[frontend]\ncompatibility_mode = \"legacy\"\n",
    );
    let out = dir.path().join("out");
    objc3c()
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .arg("--contract")
        .arg(&contract)
        .assert()
        .success();

    let options = CompileOptions {
        compatibility_mode: CompatibilityMode::Legacy,
        lowering: LoweringContract {
            max_message_send_args: 2,
            ..LoweringContract::default()
        },
        ..CompileOptions::default()
    };
    let library = compile_file(&options, &input).expect("readable");
    assert_eq!(fs::read_to_string(out.join("m.ll")).ok(), library.ir);
}

#[test]
fn diagnostics_exit_one_and_print_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_source(dir.path(), "bad.objc3", "fn main() -> i32 { return y; }\n");
    let out = dir.path().join("out");
    objc3c()
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("undefined identifier 'y' [O3S202]"));
    assert!(!out.join("bad.ll").exists());
    let text = fs::read_to_string(out.join("bad.diagnostics.txt")).expect("diagnostics");
    assert!(text.starts_with("error:1:"));

    objc3c()
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .arg("--emit-with-diagnostics")
        .assert()
        .code(1);
    assert!(out.join("bad.ll").exists());
}

#[test]
fn usage_errors_exit_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_source(dir.path(), "m.objc3", "fn main() -> i32 { return 0; }\n");

    objc3c()
        .arg(&input)
        .args(["--objc3-max-message-args", "17"])
        .arg("--out-dir")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_message_send_args: 17"));

    objc3c()
        .arg(&input)
        .args(["--objc3-language-version", "2"])
        .arg("--out-dir")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported language version"));

    objc3c()
        .arg(dir.path().join("missing.objc3"))
        .arg("--out-dir")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to read"));

    objc3c().assert().code(2);
}
