// Purpose: Semantic pass manager running surface building, body validation and the pure contract.
// Inputs/Outputs: Consumes a parsed Program plus SemaOptions; yields surface, handoff, body facts and a parity report.
// Invariants: Passes run in PASS_ORDER and each batch is canonicalized before it reaches the bus.
// Gotchas: Determinism flags are computed by re-deriving, so every pass must stay a pure function of its inputs.

pub mod bodies;
pub mod consteval;
pub mod handoff;
pub mod pure_contract;
pub mod summary;
pub mod surface;
pub mod visit;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::frontend::ast::{Program, Span};
use crate::frontend::diagnostic::{Diagnostic, Diagnostics, DiagnosticsBus};
use crate::frontend::lexer::MigrationHints;
use bodies::{BodyOptions, BodyReport, validate_bodies};
use handoff::{TypeMetadataHandoff, build_type_metadata_handoff};
use pure_contract::validate_pure_contract;
use surface::{IntegrationSurface, build_integration_surface};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityMode {
    #[default]
    Canonical,
    Legacy,
}

impl CompatibilityMode {
    pub fn label(self) -> &'static str {
        match self {
            CompatibilityMode::Canonical => "canonical",
            CompatibilityMode::Legacy => "legacy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "canonical" => Some(CompatibilityMode::Canonical),
            "legacy" => Some(CompatibilityMode::Legacy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaPass {
    BuildIntegrationSurface,
    ValidateBodies,
    ValidatePureContract,
}

pub const PASS_ORDER: [SemaPass; 3] = [
    SemaPass::BuildIntegrationSurface,
    SemaPass::ValidateBodies,
    SemaPass::ValidatePureContract,
];

impl SemaPass {
    pub fn label(self) -> &'static str {
        match self {
            SemaPass::BuildIntegrationSurface => "build_integration_surface",
            SemaPass::ValidateBodies => "validate_bodies",
            SemaPass::ValidatePureContract => "validate_pure_contract",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SemaOptions {
    pub max_message_send_args: usize,
    pub compatibility_mode: CompatibilityMode,
    pub migration_assist: bool,
    pub hints: MigrationHints,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParitySurface {
    pub diagnostics_after_pass: [usize; 3],
    pub diagnostics_emitted_by_pass: [usize; 3],
    pub diagnostics_total: usize,
    pub diagnostics_monotonic: bool,
    pub deterministic_semantic_diagnostics: bool,
    pub deterministic_type_metadata_handoff: bool,
    pub globals_total: usize,
    pub functions_total: usize,
    pub interfaces_total: usize,
    pub implementations_total: usize,
    pub protocols_total: usize,
    pub type_metadata_global_entries: usize,
    pub type_metadata_function_entries: usize,
    pub type_metadata_interface_entries: usize,
    pub type_metadata_implementation_entries: usize,
    pub ready: bool,
}

pub struct SemaOutput {
    pub surface: IntegrationSurface,
    pub handoff: TypeMetadataHandoff,
    pub bodies: BodyReport,
    pub parity: ParitySurface,
    pub handoff_replay_key: String,
}

pub fn is_monotonic(after: &[usize]) -> bool {
    after.windows(2).all(|w| w[0] <= w[1])
}

fn migration_assist_diagnostics(options: &SemaOptions) -> Diagnostics {
    let mut diags = Diagnostics::default();
    if !options.migration_assist || options.compatibility_mode != CompatibilityMode::Canonical {
        return diags;
    }
    let hints = options.hints;
    for (count, column, legacy, canonical) in [
        (hints.legacy_yes, 1, "YES", "true"),
        (hints.legacy_no, 2, "NO", "false"),
        (hints.legacy_null, 3, "NULL", "nil"),
    ] {
        if count > 0 {
            diags.push(
                "O3S216",
                format!(
                    "migration assist requires canonical literal '{}' instead of legacy '{}' ({} occurrence(s))",
                    canonical, legacy, count
                ),
                Span::at(1, column),
            );
        }
    }
    diags
}

struct PassResults {
    surface: IntegrationSurface,
    bodies: BodyReport,
    batches: [Vec<Diagnostic>; 3],
}

fn run_pass_batches(program: &Program, options: &SemaOptions) -> PassResults {
    let (surface, surface_diags) = build_integration_surface(program);
    let bodies = validate_bodies(
        program,
        &surface,
        BodyOptions {
            max_message_send_args: options.max_message_send_args,
        },
    );
    let mut pure = validate_pure_contract(program, &surface);
    pure.items.extend(migration_assist_diagnostics(options).items);
    let batches = [
        surface_diags.into_canonical(),
        bodies.diags.clone().into_canonical(),
        pure.into_canonical(),
    ];
    PassResults {
        surface,
        bodies,
        batches,
    }
}

/// Runs every pass in order, publishing each canonical batch to `bus`.
pub fn run_passes(program: &Program, options: &SemaOptions, bus: &mut DiagnosticsBus) -> SemaOutput {
    let PassResults {
        surface,
        bodies,
        batches,
    } = run_pass_batches(program, options);

    let mut parity = ParitySurface::default();
    let mut published: Vec<Diagnostic> = Vec::new();
    for (i, (pass, batch)) in PASS_ORDER.iter().zip(batches).enumerate() {
        parity.diagnostics_emitted_by_pass[i] = batch.len();
        published.extend(batch.iter().cloned());
        bus.publish(batch);
        parity.diagnostics_after_pass[i] = bus.count();
        trace!(
            pass = pass.label(),
            emitted = parity.diagnostics_emitted_by_pass[i],
            after = parity.diagnostics_after_pass[i],
            "sema pass"
        );
    }
    parity.diagnostics_total = bus.count();
    parity.diagnostics_monotonic = is_monotonic(&parity.diagnostics_after_pass);

    let replay = run_pass_batches(program, options).batches;
    parity.deterministic_semantic_diagnostics = replay
        .iter()
        .map(Vec::len)
        .eq(parity.diagnostics_emitted_by_pass)
        && replay.concat() == published;

    let handoff = build_type_metadata_handoff(&surface);
    let again = build_type_metadata_handoff(&surface);
    parity.deterministic_type_metadata_handoff = handoff == again && handoff.is_sorted();

    parity.globals_total = surface.globals.len();
    parity.functions_total = surface.functions.len();
    parity.interfaces_total = surface.interfaces.len();
    parity.implementations_total = surface.implementations.len();
    parity.protocols_total = surface.protocols.len();
    parity.type_metadata_global_entries = handoff.globals.len();
    parity.type_metadata_function_entries = handoff.functions.len();
    parity.type_metadata_interface_entries = handoff.interfaces.len();
    parity.type_metadata_implementation_entries = handoff.implementations.len();
    parity.ready = parity.diagnostics_monotonic
        && parity.deterministic_semantic_diagnostics
        && parity.deterministic_type_metadata_handoff;

    let handoff_replay_key = handoff.replay_key();
    SemaOutput {
        surface,
        handoff,
        bodies,
        parity,
        handoff_replay_key,
    }
}

#[cfg(test)]
mod tests {
    use super::{CompatibilityMode, SemaOptions, run_passes};
    use crate::frontend::diagnostic::DiagnosticsBus;
    use crate::frontend::lexer::{LexOptions, MigrationHints, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};

    fn run(src: &str, migration_assist: bool) -> (super::SemaOutput, Vec<String>) {
        let lexed = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist,
            },
        );
        let hints: MigrationHints = lexed.hints;
        let program = parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        )
        .program;
        let mut bus = DiagnosticsBus::default();
        let out = run_passes(
            &program,
            &SemaOptions {
                max_message_send_args: 4,
                compatibility_mode: CompatibilityMode::Canonical,
                migration_assist,
                hints,
            },
            &mut bus,
        );
        let rendered = bus.items().iter().map(|d| d.render()).collect();
        (out, rendered)
    }

    #[test]
    fn clean_program_is_ready() {
        let (out, diags) = run("fn main() -> i32 { return 0; }", false);
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(out.parity.ready);
        assert_eq!(out.parity.diagnostics_after_pass, [0, 0, 0]);
        assert_eq!(out.parity.functions_total, 1);
    }

    #[test]
    fn counts_accumulate_per_pass() {
        let src = "let g = 0;\nlet g = 1;\nfn f() -> i32 { return y; }\npure fn p() -> i32 { g = 2; return 0; }\n";
        let (out, _) = run(src, false);
        let p = &out.parity;
        assert_eq!(p.diagnostics_emitted_by_pass, [1, 1, 1]);
        assert_eq!(p.diagnostics_after_pass, [1, 2, 3]);
        assert!(p.diagnostics_monotonic);
        assert!(p.ready);
    }

    #[test]
    fn migration_assist_reports_legacy_literals_last() {
        let (out, diags) = run("fn f() -> bool { let a = YES; let b = NO; return YES; }", true);
        assert_eq!(
            diags,
            vec![
                "error:1:1: migration assist requires canonical literal 'true' instead of legacy 'YES' (2 occurrence(s)) [O3S216]",
                "error:1:2: migration assist requires canonical literal 'false' instead of legacy 'NO' (1 occurrence(s)) [O3S216]",
            ]
        );
        assert_eq!(out.parity.diagnostics_emitted_by_pass, [0, 0, 2]);
    }

    #[test]
    fn canonical_mode_names_round_trip() {
        for mode in [CompatibilityMode::Canonical, CompatibilityMode::Legacy] {
            assert_eq!(CompatibilityMode::parse(mode.label()), Some(mode));
        }
        assert_eq!(CompatibilityMode::parse("strict"), None);
    }
}
