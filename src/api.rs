// Purpose: Embeddable-library surface over the pipeline facade.
// Inputs/Outputs: A Context per host session; each call returns a CompileResult and records the last error text.
// Invariants: A Context keeps only the last error; compilations never share state through it.
// Gotchas: compile_file read failures surface as usage errors so hosts see one status vocabulary.

use std::path::Path;

use crate::compile::{self, CompileOptions, CompileResult, CompileStatus};

#[derive(Debug, Default)]
pub struct Context {
    last_error: String,
}

pub fn create_context() -> Context {
    Context::default()
}

pub fn destroy_context(ctx: Context) {
    drop(ctx);
}

impl Context {
    pub fn compile_source(&mut self, options: &CompileOptions, source: &str) -> CompileResult {
        let result = compile::compile_source(options, source);
        self.remember(&result);
        result
    }

    pub fn compile_file(&mut self, options: &CompileOptions, path: &Path) -> CompileResult {
        match compile::compile_file(options, path) {
            Ok(result) => {
                self.remember(&result);
                result
            }
            Err(err) => {
                let result = CompileResult::usage(format!("{:#}", err));
                self.remember(&result);
                result
            }
        }
    }

    /// Empty after a successful compilation.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    fn remember(&mut self, result: &CompileResult) {
        self.last_error = match result.status {
            CompileStatus::Ok => String::new(),
            CompileStatus::UsageError => result.usage_error.clone().unwrap_or_default(),
            _ => result
                .diagnostics
                .first()
                .map(|d| d.render())
                .unwrap_or_else(|| format!("compilation finished with status {:?}", result.status)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_tracks_the_latest_call() {
        let mut ctx = create_context();
        let bad = ctx.compile_source(&CompileOptions::default(), "fn main() -> i32 { return y; }");
        assert_eq!(bad.status, CompileStatus::Diagnostics);
        assert!(ctx.last_error().starts_with("error:1:"));

        let ok = ctx.compile_source(&CompileOptions::default(), "fn main() -> i32 { return 0; }");
        assert_eq!(ok.status, CompileStatus::Ok);
        assert_eq!(ctx.last_error(), "");
        destroy_context(ctx);
    }

    #[test]
    fn unreadable_file_is_usage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = create_context();
        let result = ctx.compile_file(&CompileOptions::default(), &dir.path().join("missing.objc3"));
        assert_eq!(result.status, CompileStatus::UsageError);
        assert!(ctx.last_error().contains("failed to read"));
    }

    #[test]
    fn file_and_source_agree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("m.objc3");
        let src = "let g = 4;\nfn main() -> i32 { return g; }\n";
        std::fs::write(&path, src).expect("write source");
        let mut ctx = create_context();
        let from_file = ctx.compile_file(&CompileOptions::default(), &path);
        let options = CompileOptions {
            source_name: Some(path.display().to_string()),
            ..CompileOptions::default()
        };
        let from_source = ctx.compile_source(&options, src);
        assert_eq!(from_file.ir_sha256, from_source.ir_sha256);
        assert_eq!(from_file.manifest_sha256, from_source.manifest_sha256);
    }
}
