// Purpose: The one pipeline facade shared by the library API, the C shim and the CLI.
// Inputs/Outputs: Source text plus CompileOptions in; a CompileResult with status, diagnostics, stages and artifacts out.
// Invariants: One call owns all of its state; equal inputs give byte-identical artifacts and digests.
// Gotchas: Usage errors are decided before tokenizing, and lexer or parser diagnostics skip sema entirely.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::codegen::manifest::{ManifestInputs, build_manifest};
use crate::codegen::{EmitError, EmitInputs, FrontendProfile, emit_ir};
use crate::frontend::ast::{Program, Span};
use crate::frontend::diagnostic::{Diagnostic, DiagnosticsBus, SeverityCounts, render_all};
use crate::frontend::lexer::{LexOptions, PragmaContract, tokenize};
use crate::frontend::parser::{ParseOptions, parse};
use crate::lower::{
    ContractInputs, DiagnosticCounts, LoweringBoundary, LoweringContract, LoweringContracts, build_contracts, normalize,
};
use crate::sema::{CompatibilityMode, SemaOptions, SemaOutput, run_passes};

pub const SUPPORTED_LANGUAGE_VERSION: u32 = 3;
pub const IN_MEMORY_SOURCE: &str = "<memory>";
pub const EMIT_FAILURE_CODE: &str = "O3L300";
pub const DEFAULT_EMIT_PREFIX: &str = "module";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub language_version: u32,
    pub compatibility_mode: CompatibilityMode,
    pub migration_assist: bool,
    pub lowering: LoweringContract,
    pub fail_on_diagnostics: bool,
    pub emit_ir: bool,
    pub emit_manifest: bool,
    /// Recorded as the manifest `source`; `compile_file` fills it from the path.
    pub source_name: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            language_version: SUPPORTED_LANGUAGE_VERSION,
            compatibility_mode: CompatibilityMode::Canonical,
            migration_assist: false,
            lowering: LoweringContract::default(),
            fail_on_diagnostics: true,
            emit_ir: true,
            emit_manifest: true,
            source_name: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Ok,
    Diagnostics,
    UsageError,
    EmitError,
    InternalError,
}

impl CompileStatus {
    pub fn code(self) -> u32 {
        match self {
            CompileStatus::Ok => 0,
            CompileStatus::Diagnostics => 1,
            CompileStatus::UsageError => 2,
            CompileStatus::EmitError => 3,
            CompileStatus::InternalError => 4,
        }
    }

    pub fn exit_code(self) -> i32 {
        self.code() as i32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lex,
    Parse,
    Sema,
    Lower,
    Emit,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Lex, Stage::Parse, Stage::Sema, Stage::Lower, Stage::Emit];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Sema => "sema",
            Stage::Lower => "lower",
            Stage::Emit => "emit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub attempted: bool,
    pub skipped: bool,
    pub diagnostics: usize,
    pub severities: SeverityCounts,
}

impl StageSummary {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            attempted: false,
            skipped: true,
            diagnostics: 0,
            severities: SeverityCounts::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileResult {
    pub status: CompileStatus,
    pub diagnostics: Vec<Diagnostic>,
    pub stages: [StageSummary; 5],
    pub semantic_skipped: bool,
    pub usage_error: Option<String>,
    pub ir: Option<String>,
    pub manifest: Option<String>,
    pub ir_sha256: Option<String>,
    pub manifest_sha256: Option<String>,
}

impl CompileResult {
    fn new() -> Self {
        Self {
            status: CompileStatus::Ok,
            diagnostics: Vec::new(),
            stages: Stage::ALL.map(StageSummary::pending),
            semantic_skipped: false,
            usage_error: None,
            ir: None,
            manifest: None,
            ir_sha256: None,
            manifest_sha256: None,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.status = CompileStatus::UsageError;
        result.semantic_skipped = true;
        result.usage_error = Some(message.into());
        result
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn stage(&self, stage: Stage) -> &StageSummary {
        &self.stages[stage as usize]
    }

    /// One rendered diagnostic per line.
    pub fn diagnostics_text(&self) -> String {
        render_all(&self.diagnostics)
    }

    fn record(&mut self, stage: Stage, batch: Vec<Diagnostic>) {
        self.stages[stage as usize] = StageSummary {
            stage,
            attempted: true,
            skipped: false,
            diagnostics: batch.len(),
            severities: SeverityCounts::of(&batch),
        };
        debug!(stage = stage.label(), diagnostics = batch.len(), "stage finished");
        self.diagnostics.extend(batch);
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Rejects option combinations before any source is looked at.
pub fn validate_options(options: &CompileOptions) -> std::result::Result<LoweringBoundary, String> {
    if options.language_version != SUPPORTED_LANGUAGE_VERSION {
        return Err(format!(
            "unsupported language version: {} (expected {})",
            options.language_version, SUPPORTED_LANGUAGE_VERSION
        ));
    }
    normalize(&options.lowering).map_err(|e| e.to_string())
}

fn count_fixits(items: &[Diagnostic]) -> usize {
    items.iter().filter(|d| d.message.contains("did you mean")).count()
}

pub fn compile_source(options: &CompileOptions, source: &str) -> CompileResult {
    let boundary = match validate_options(options) {
        Ok(boundary) => boundary,
        Err(message) => {
            debug!(%message, "usage error");
            return CompileResult::usage(message);
        }
    };
    let mut result = CompileResult::new();

    let lexed = tokenize(
        source,
        LexOptions {
            language_version: options.language_version,
            migration_assist: options.migration_assist,
        },
    );
    let lex_count = lexed.diags.len();
    result.record(Stage::Lex, lexed.diags.into_canonical());

    let parsed = parse(
        lexed.tokens,
        ParseOptions {
            runtime_dispatch_arg_slots: boundary.runtime_dispatch_arg_slots,
        },
    );
    let parse_count = parsed.diags.len();
    result.record(Stage::Parse, parsed.diags.into_canonical());
    let program = parsed.program;

    if lex_count + parse_count > 0 {
        result.semantic_skipped = true;
        result.status = CompileStatus::Diagnostics;
        return result;
    }

    let mut bus = DiagnosticsBus::default();
    let sema = run_passes(
        &program,
        &SemaOptions {
            max_message_send_args: boundary.runtime_dispatch_arg_slots,
            compatibility_mode: options.compatibility_mode,
            migration_assist: options.migration_assist,
            hints: lexed.hints,
        },
        &mut bus,
    );
    let sema_diags = bus.into_items();
    let sema_count = sema_diags.len();
    let fixits = count_fixits(&sema_diags);
    result.record(Stage::Sema, sema_diags);

    let stages = DiagnosticCounts {
        lexer: lex_count,
        parser: parse_count,
        semantic: sema_count,
        fixits,
    };
    let contracts = build_contracts(&ContractInputs {
        surface: &sema.surface,
        facts: &sema.bodies.facts,
        boundary: &boundary,
        handoff_replay_key: &sema.handoff_replay_key,
        diagnostics: stages,
        sema_ready: sema.parity.ready,
    });
    result.record(Stage::Lower, Vec::new());

    if sema_count > 0 {
        result.status = CompileStatus::Diagnostics;
        if options.fail_on_diagnostics {
            return result;
        }
    }

    let frontend = FrontendProfile {
        language_version: options.language_version,
        compatibility_mode: options.compatibility_mode,
        migration_assist: options.migration_assist,
        hints: lexed.hints,
    };
    let emitted = emit_artifacts(&Artifacts {
        options,
        program: &program,
        sema: &sema,
        boundary: &boundary,
        contracts: &contracts,
        frontend,
        pragma: lexed.pragma,
        stages,
    });

    match emitted {
        Ok((ir, manifest)) => {
            result.ir_sha256 = ir.as_deref().map(|t| sha256_hex(t.as_bytes()));
            result.manifest_sha256 = manifest.as_deref().map(|t| sha256_hex(t.as_bytes()));
            result.ir = ir;
            result.manifest = manifest;
            result.record(Stage::Emit, Vec::new());
        }
        Err(e) => {
            let diag = Diagnostic::error(
                EMIT_FAILURE_CODE,
                format!("LLVM IR emission failed: {}", e),
                Span::at(1, 1),
            );
            result.record(Stage::Emit, vec![diag]);
            result.status = CompileStatus::EmitError;
        }
    }
    result
}

struct Artifacts<'a> {
    options: &'a CompileOptions,
    program: &'a Program,
    sema: &'a SemaOutput,
    boundary: &'a LoweringBoundary,
    contracts: &'a LoweringContracts,
    frontend: FrontendProfile,
    pragma: PragmaContract,
    stages: DiagnosticCounts,
}

type Emitted = (Option<String>, Option<String>);

fn emit_artifacts(a: &Artifacts<'_>) -> std::result::Result<Emitted, EmitError> {
    let ir = if a.options.emit_ir {
        Some(emit_ir(&EmitInputs {
            program: a.program,
            surface: &a.sema.surface,
            proofs: &a.sema.bodies.proofs,
            boundary: a.boundary,
            contracts: a.contracts,
            frontend: a.frontend,
        })?)
    } else {
        None
    };
    let manifest = if a.options.emit_manifest {
        Some(build_manifest(&ManifestInputs {
            source: a.options.source_name.as_deref().unwrap_or(IN_MEMORY_SOURCE),
            program: a.program,
            surface: &a.sema.surface,
            parity: &a.sema.parity,
            handoff_replay_key: &a.sema.handoff_replay_key,
            boundary: a.boundary,
            contracts: a.contracts,
            frontend: a.frontend,
            pragma: a.pragma,
            max_message_send_args: a.options.lowering.max_message_send_args,
            stages: a.stages,
            semantic_skipped: false,
        })?)
    } else {
        None
    };
    Ok((ir, manifest))
}

/// Reads `path` and compiles it; the path becomes the manifest `source` unless one is set.
pub fn compile_file(options: &CompileOptions, path: &Path) -> Result<CompileResult> {
    let source = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut options = options.clone();
    if options.source_name.is_none() {
        options.source_name = Some(path.display().to_string());
    }
    Ok(compile_source(&options, &source))
}

/// The input's file stem, or `module` when there is no usable stem.
pub fn default_emit_prefix(input: Option<&Path>) -> String {
    input
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_EMIT_PREFIX.to_string())
}

/// Writes `<prefix>.ll`, `<prefix>.manifest.json` and `<prefix>.diagnostics.txt` under `out_dir`.
pub fn write_artifacts(result: &CompileResult, out_dir: &Path, prefix: &str) -> Result<ArtifactPaths> {
    fs::create_dir_all(out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut paths = ArtifactPaths::default();
    let diagnostics = out_dir.join(format!("{}.diagnostics.txt", prefix));
    fs::write(&diagnostics, result.diagnostics_text())
        .with_context(|| format!("failed to write {}", diagnostics.display()))?;
    paths.diagnostics = Some(diagnostics);
    if let Some(ir) = &result.ir {
        let path = out_dir.join(format!("{}.ll", prefix));
        fs::write(&path, ir).with_context(|| format!("failed to write {}", path.display()))?;
        paths.ir = Some(path);
    }
    if let Some(manifest) = &result.manifest {
        let path = out_dir.join(format!("{}.manifest.json", prefix));
        fs::write(&path, manifest).with_context(|| format!("failed to write {}", path.display()))?;
        paths.manifest = Some(path);
    }
    Ok(paths)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub ir: Option<std::path::PathBuf>,
    pub manifest: Option<std::path::PathBuf>,
    pub diagnostics: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_source_emits_both_artifacts() {
        let result = compile_source(&CompileOptions::default(), "fn main() -> i32 { return 0; }");
        assert_eq!(result.status, CompileStatus::Ok);
        assert!(result.diagnostics.is_empty());
        assert!(result.ir.as_deref().is_some_and(|ir| ir.starts_with("; objc3c native frontend IR\n")));
        assert!(result.manifest.is_some());
        assert_eq!(result.ir_sha256.as_ref().map(String::len), Some(64));
        assert!(Stage::ALL.iter().all(|s| result.stage(*s).attempted));
    }

    #[test]
    fn unsupported_language_version_is_usage_error() {
        let options = CompileOptions {
            language_version: 2,
            ..CompileOptions::default()
        };
        let result = compile_source(&options, "this is not even lexed");
        assert_eq!(result.status, CompileStatus::UsageError);
        assert_eq!(result.exit_code(), 2);
        assert_eq!(
            result.usage_error.as_deref(),
            Some("unsupported language version: 2 (expected 3)")
        );
        assert!(!result.stage(Stage::Lex).attempted);
    }

    #[test]
    fn parse_errors_skip_sema_and_emission() {
        let result = compile_source(&CompileOptions::default(), "fn main( -> i32 { return 0; }");
        assert_eq!(result.status, CompileStatus::Diagnostics);
        assert!(result.semantic_skipped);
        assert!(result.stage(Stage::Parse).diagnostics > 0);
        assert!(!result.stage(Stage::Sema).attempted);
        assert!(result.ir.is_none());
    }

    #[test]
    fn semantic_diagnostics_block_unless_host_opts_in() {
        let src = "fn main() -> i32 { return y; }";
        let blocked = compile_source(&CompileOptions::default(), src);
        assert_eq!(blocked.status, CompileStatus::Diagnostics);
        assert!(blocked.ir.is_none());

        let lenient = compile_source(
            &CompileOptions {
                fail_on_diagnostics: false,
                ..CompileOptions::default()
            },
            src,
        );
        assert_eq!(lenient.status, CompileStatus::Diagnostics);
        assert!(lenient.ir.is_some());
        assert_eq!(lenient.diagnostics, blocked.diagnostics);
    }

    #[test]
    fn emission_can_be_switched_off() {
        let result = compile_source(
            &CompileOptions {
                emit_ir: false,
                ..CompileOptions::default()
            },
            "fn main() -> i32 { return 0; }",
        );
        assert!(result.ir.is_none());
        assert!(result.ir_sha256.is_none());
        assert!(result.manifest.is_some());
    }

    #[test]
    fn emit_prefix_follows_input_stem() {
        assert_eq!(default_emit_prefix(Some(Path::new("dir/hello.objc3"))), "hello");
        assert_eq!(default_emit_prefix(None), "module");
    }

    #[test]
    fn manifest_records_source_name() {
        let options = CompileOptions {
            source_name: Some("demo.objc3".to_string()),
            ..CompileOptions::default()
        };
        let result = compile_source(&options, "fn main() -> i32 { return 0; }");
        let manifest: serde_json::Value =
            serde_json::from_str(result.manifest.as_deref().expect("manifest")).expect("json");
        assert_eq!(manifest["source"], "demo.objc3");
        assert_eq!(manifest["frontend"]["max_message_send_args"], 4);
    }
}
