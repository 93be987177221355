use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=OBJC3C_GIT_COMMIT");

    let commit = match env::var("OBJC3C_GIT_COMMIT") {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => {
            println!("cargo:rerun-if-changed=.git/HEAD");
            git_commit()
        }
    };

    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let label = match &commit {
        Some(commit) => {
            println!("cargo:rustc-env=OBJC3C_GIT_COMMIT={commit}");
            format!("{version} ({commit})")
        }
        None => version,
    };
    println!("cargo:rustc-env=OBJC3C_VERSION_LABEL={label}");
}

fn git_commit() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}
