use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use super::{EmitError, FrontendProfile};
use crate::frontend::ast::Program;
use crate::frontend::lexer::PragmaContract;
use crate::lower::{DiagnosticCounts, FeatureContract, FieldValue, LoweringBoundary, LoweringContracts};
use crate::sema::ParitySurface;
use crate::sema::consteval::resolve_global_values;
use crate::sema::surface::IntegrationSurface;

pub struct ManifestInputs<'a> {
    pub source: &'a str,
    pub program: &'a Program,
    pub surface: &'a IntegrationSurface,
    pub parity: &'a ParitySurface,
    pub handoff_replay_key: &'a str,
    pub boundary: &'a LoweringBoundary,
    pub contracts: &'a LoweringContracts,
    pub frontend: FrontendProfile,
    pub pragma: PragmaContract,
    pub max_message_send_args: usize,
    pub stages: DiagnosticCounts,
    pub semantic_skipped: bool,
}

// Field order below is the on-disk order.

#[derive(Serialize)]
struct Manifest<'a> {
    source: &'a str,
    module: &'a str,
    frontend: FrontendSection<'a>,
    lowering: LoweringSection<'a>,
    lowering_contracts: Vec<ContractEntry>,
    globals: Vec<GlobalEntry<'a>>,
    functions: Vec<FunctionEntry<'a>>,
}

#[derive(Serialize)]
struct FrontendSection<'a> {
    language_version: u32,
    compatibility_mode: &'static str,
    migration_assist: bool,
    migration_hints: HintsEntry,
    language_version_pragma_contract: PragmaContract,
    max_message_send_args: usize,
    pipeline: PipelineSection<'a>,
    objc_profiles: Profiles,
}

#[derive(Serialize)]
struct HintsEntry {
    legacy_yes: usize,
    legacy_no: usize,
    legacy_null: usize,
    legacy_total: usize,
}

#[derive(Serialize)]
struct PipelineSection<'a> {
    semantic_skipped: bool,
    stages: StagesEntry,
    sema_pass_manager: PassManagerEntry,
    semantic_surface: SurfaceEntry<'a>,
}

#[derive(Serialize)]
struct StageCount {
    diagnostics: usize,
}

#[derive(Serialize)]
struct StagesEntry {
    lexer: StageCount,
    parser: StageCount,
    semantic: StageCount,
}

#[derive(Serialize)]
struct PassManagerEntry {
    diagnostics_after_build: usize,
    diagnostics_after_validate_bodies: usize,
    diagnostics_after_validate_pure_contract: usize,
    diagnostics_emitted_by_build: usize,
    diagnostics_emitted_by_validate_bodies: usize,
    diagnostics_emitted_by_validate_pure_contract: usize,
    diagnostics_monotonic: bool,
    diagnostics_total: usize,
    deterministic_semantic_diagnostics: bool,
    deterministic_type_metadata_handoff: bool,
    ready: bool,
}

#[derive(Serialize)]
struct SurfaceEntry<'a> {
    declared_globals: usize,
    declared_functions: usize,
    declared_interfaces: usize,
    declared_implementations: usize,
    declared_protocols: usize,
    type_metadata_global_entries: usize,
    type_metadata_function_entries: usize,
    type_metadata_interface_entries: usize,
    type_metadata_implementation_entries: usize,
    type_metadata_handoff_replay_key: &'a str,
}

#[derive(Serialize)]
struct LoweringSection<'a> {
    runtime_dispatch_symbol: &'a str,
    runtime_dispatch_arg_slots: usize,
    selector_global_ordering: &'static str,
    replay_key: String,
}

#[derive(Serialize)]
struct ContractEntry {
    area: &'static str,
    lane_contract: &'static str,
    valid: bool,
    deterministic: bool,
    replay_key: String,
    surface: OrderedFields,
}

#[derive(Serialize)]
struct GlobalEntry<'a> {
    name: &'a str,
    value: i32,
}

#[derive(Serialize)]
struct FunctionEntry<'a> {
    name: &'a str,
    params: Vec<&'static str>,
    return_type: &'static str,
    is_pure: bool,
    is_extern: bool,
    is_async: bool,
    is_throws: bool,
    has_definition: bool,
}

/// A JSON object whose keys keep their declared order.
struct OrderedFields(Vec<(&'static str, FieldValue)>);

impl Serialize for OrderedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct Profiles(Vec<(&'static str, OrderedFields)>);

impl Serialize for Profiles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (profile, fields) in &self.0 {
            map.serialize_entry(profile, fields)?;
        }
        map.end()
    }
}

// Summary entries are counters plus one `deterministic` flag.
fn profile_value(text: String) -> FieldValue {
    match text.as_str() {
        "true" => FieldValue::Flag(true),
        "false" => FieldValue::Flag(false),
        _ => match text.parse::<usize>() {
            Ok(n) => FieldValue::Count(n),
            Err(_) => FieldValue::Text(text),
        },
    }
}

fn profiles(surface: &IntegrationSurface) -> Profiles {
    Profiles(
        surface
            .summaries
            .profiles()
            .into_iter()
            .map(|(name, entries)| {
                let fields = entries.into_iter().map(|(k, v)| (k, profile_value(v))).collect();
                (name, OrderedFields(fields))
            })
            .collect(),
    )
}

fn contract_entry(contract: &dyn FeatureContract) -> ContractEntry {
    ContractEntry {
        area: contract.area(),
        lane_contract: contract.lane_contract(),
        valid: contract.is_valid(),
        deterministic: contract.deterministic(),
        replay_key: contract.replay_key(),
        surface: OrderedFields(contract.fields()),
    }
}

/// Pretty JSON with two-space indent and a trailing newline.
pub fn build_manifest(input: &ManifestInputs<'_>) -> Result<String, EmitError> {
    let program = input.program;
    let values = resolve_global_values(&program.globals).map_err(|idx| EmitError::GlobalInitializer {
        name: program.globals.get(idx).map(|g| g.name.clone()).unwrap_or_default(),
    })?;
    let mut seen = std::collections::BTreeSet::new();
    let globals = program
        .globals
        .iter()
        .zip(values)
        .filter(|(g, _)| seen.insert(g.name.as_str()))
        .map(|(g, value)| GlobalEntry {
            name: g.name.as_str(),
            value,
        })
        .collect();

    let functions = input
        .surface
        .functions
        .iter()
        .map(|(name, info)| FunctionEntry {
            name: name.as_str(),
            params: info.param_types.iter().map(|t| t.name()).collect(),
            return_type: info.return_type.name(),
            is_pure: info.is_pure,
            is_extern: info.is_extern,
            is_async: info.is_async,
            is_throws: info.is_throws,
            has_definition: info.has_definition,
        })
        .collect();

    let parity = input.parity;
    let hints = input.frontend.hints;
    let manifest = Manifest {
        source: input.source,
        module: &program.module_name,
        frontend: FrontendSection {
            language_version: input.frontend.language_version,
            compatibility_mode: input.frontend.compatibility_mode.label(),
            migration_assist: input.frontend.migration_assist,
            migration_hints: HintsEntry {
                legacy_yes: hints.legacy_yes,
                legacy_no: hints.legacy_no,
                legacy_null: hints.legacy_null,
                legacy_total: hints.legacy_total(),
            },
            language_version_pragma_contract: input.pragma,
            max_message_send_args: input.max_message_send_args,
            pipeline: PipelineSection {
                semantic_skipped: input.semantic_skipped,
                stages: StagesEntry {
                    lexer: StageCount {
                        diagnostics: input.stages.lexer,
                    },
                    parser: StageCount {
                        diagnostics: input.stages.parser,
                    },
                    semantic: StageCount {
                        diagnostics: input.stages.semantic,
                    },
                },
                sema_pass_manager: PassManagerEntry {
                    diagnostics_after_build: parity.diagnostics_after_pass[0],
                    diagnostics_after_validate_bodies: parity.diagnostics_after_pass[1],
                    diagnostics_after_validate_pure_contract: parity.diagnostics_after_pass[2],
                    diagnostics_emitted_by_build: parity.diagnostics_emitted_by_pass[0],
                    diagnostics_emitted_by_validate_bodies: parity.diagnostics_emitted_by_pass[1],
                    diagnostics_emitted_by_validate_pure_contract: parity.diagnostics_emitted_by_pass[2],
                    diagnostics_monotonic: parity.diagnostics_monotonic,
                    diagnostics_total: parity.diagnostics_total,
                    deterministic_semantic_diagnostics: parity.deterministic_semantic_diagnostics,
                    deterministic_type_metadata_handoff: parity.deterministic_type_metadata_handoff,
                    ready: parity.ready,
                },
                semantic_surface: SurfaceEntry {
                    declared_globals: parity.globals_total,
                    declared_functions: parity.functions_total,
                    declared_interfaces: parity.interfaces_total,
                    declared_implementations: parity.implementations_total,
                    declared_protocols: parity.protocols_total,
                    type_metadata_global_entries: parity.type_metadata_global_entries,
                    type_metadata_function_entries: parity.type_metadata_function_entries,
                    type_metadata_interface_entries: parity.type_metadata_interface_entries,
                    type_metadata_implementation_entries: parity.type_metadata_implementation_entries,
                    type_metadata_handoff_replay_key: input.handoff_replay_key,
                },
            },
            objc_profiles: profiles(input.surface),
        },
        lowering: LoweringSection {
            runtime_dispatch_symbol: &input.boundary.runtime_dispatch_symbol,
            runtime_dispatch_arg_slots: input.boundary.runtime_dispatch_arg_slots,
            selector_global_ordering: input.boundary.selector_global_ordering,
            replay_key: input.boundary.replay_key(),
        },
        lowering_contracts: input.contracts.entries().into_iter().map(contract_entry).collect(),
        globals,
        functions,
    };
    let mut text =
        serde_json::to_string_pretty(&manifest).map_err(|e| EmitError::Manifest(e.to_string()))?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::MigrationHints;
    use crate::lower::{LoweringContract, normalize};
    use crate::sema::CompatibilityMode;
    use crate::sema::surface::build_integration_surface;

    fn manifest_for(program: &Program) -> String {
        let (surface, _) = build_integration_surface(program);
        let boundary = normalize(&LoweringContract::default()).expect("default contract");
        let contracts = LoweringContracts::default();
        let parity = ParitySurface::default();
        build_manifest(&ManifestInputs {
            source: "demo.objc3",
            program,
            surface: &surface,
            parity: &parity,
            handoff_replay_key: "",
            boundary: &boundary,
            contracts: &contracts,
            frontend: FrontendProfile {
                language_version: 3,
                compatibility_mode: CompatibilityMode::Canonical,
                migration_assist: false,
                hints: MigrationHints::default(),
            },
            pragma: PragmaContract::default(),
            max_message_send_args: 4,
            stages: DiagnosticCounts::default(),
            semantic_skipped: false,
        })
        .expect("manifest builds")
    }

    #[test]
    fn top_level_keys_keep_declared_order() {
        let text = manifest_for(&Program::default());
        assert!(text.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(value["module"], "objc3_module");
        let order: Vec<usize> = [
            "\"source\"",
            "\"module\"",
            "\"frontend\"",
            "\"lowering\"",
            "\"lowering_contracts\"",
            "\"globals\"",
            "\"functions\"",
        ]
        .iter()
        .map(|k| text.find(k).expect("key present"))
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{:?}", order);
    }

    #[test]
    fn contracts_follow_catalog_order() {
        let text = manifest_for(&Program::default());
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        let contracts = value["lowering_contracts"].as_array().expect("array");
        assert_eq!(contracts.len(), 40);
        assert_eq!(contracts[0]["area"], "method_lookup_override_conflict");
        assert_eq!(contracts[5]["area"], "nil_receiver_semantics_foldability");
        assert_eq!(contracts[5]["surface"]["message_send_sites"], 0);
        assert_eq!(
            value["lowering"]["replay_key"],
            "runtime_dispatch_symbol=objc3_msgsend_i32;runtime_dispatch_arg_slots=4;selector_global_ordering=lexicographic"
        );
    }

    #[test]
    fn ordered_fields_type_their_values() {
        let fields = OrderedFields(vec![
            ("b_count", FieldValue::Count(3)),
            ("a_flag", FieldValue::Flag(true)),
            ("digest", FieldValue::Text("1234".to_string())),
        ]);
        let text = serde_json::to_string(&fields).expect("serializes");
        assert_eq!(text, r#"{"b_count":3,"a_flag":true,"digest":"1234"}"#);
        assert_eq!(profile_value("false".to_string()), FieldValue::Flag(false));
        assert_eq!(profile_value("12".to_string()), FieldValue::Count(12));
    }
}
