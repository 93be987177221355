use sha2::{Digest, Sha256};

use super::contract::{DEFAULT_RUNTIME_DISPATCH_SYMBOL, LoweringBoundary};
use super::features::*;
use crate::frontend::ast::{MethodFamily, ReceiverKind, SelectorForm};
use crate::sema::bodies::{BodyFacts, ReceiverProof};
use crate::sema::surface::IntegrationSurface;

/// Blocks heavier than this land in the heavy tier of the perf baseline.
pub const HEAVY_BLOCK_WEIGHT: usize = 8;

/// Per-stage diagnostic counts folded into the recovery contract.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiagnosticCounts {
    pub lexer: usize,
    pub parser: usize,
    pub semantic: usize,
    pub fixits: usize,
}

pub struct ContractInputs<'a> {
    pub surface: &'a IntegrationSurface,
    pub facts: &'a BodyFacts,
    pub boundary: &'a LoweringBoundary,
    pub handoff_replay_key: &'a str,
    pub diagnostics: DiagnosticCounts,
    pub sema_ready: bool,
}

/// First 16 hex chars of the handoff replay key's SHA-256.
pub fn interface_digest(handoff_replay_key: &str) -> String {
    let digest = Sha256::digest(handoff_replay_key.as_bytes());
    let mut text = hex::encode(digest);
    text.truncate(16);
    text
}

pub fn build_contracts(input: &ContractInputs<'_>) -> LoweringContracts {
    let mut c = LoweringContracts::default();
    let sums = &input.surface.summaries;
    let decl = &input.surface.facts;
    let types = &decl.types;
    let facts = input.facts;

    let m = &sums.method_lookup_override_conflict;
    c.method_lookup = MethodLookupOverrideConflictContract {
        method_lookup_sites: m.method_lookup_sites,
        method_lookup_hits: m.method_lookup_hits,
        method_lookup_misses: m.method_lookup_misses,
        override_lookup_sites: m.override_lookup_sites,
        override_lookup_hits: m.override_lookup_hits,
        override_lookup_misses: m.override_lookup_misses,
        override_conflicts: m.override_conflicts,
        unresolved_base_interfaces: m.unresolved_base_interfaces,
        deterministic: m.deterministic,
    };

    let p = &sums.property_synthesis_ivar_binding;
    c.property_synthesis = PropertySynthesisIvarBindingContract {
        property_synthesis_sites: p.property_synthesis_sites,
        property_synthesis_explicit_ivar_bindings: p.explicit_ivar_bindings,
        property_synthesis_default_ivar_bindings: p.default_ivar_bindings,
        ivar_binding_sites: p.ivar_binding_sites,
        ivar_binding_resolved: p.ivar_binding_resolved,
        ivar_binding_missing: p.ivar_binding_missing,
        ivar_binding_conflicts: p.ivar_binding_conflicts,
        deterministic: p.deterministic,
    };

    c.id_class_sel = IdClassSelObjectPointerContract {
        id_typecheck_sites: types.id_sites,
        class_typecheck_sites: types.class_sites,
        sel_typecheck_sites: types.sel_sites,
        object_pointer_typecheck_sites: types.object_pointer_sites,
        total_typecheck_sites: types.id_sites + types.class_sites + types.sel_sites + types.object_pointer_sites,
        deterministic: true,
    };

    sends(&mut c, facts, input.boundary);

    let qualified = types
        .ownership_qualifier_sites
        .saturating_sub(types.invalid_ownership_qualifier_sites);
    c.ownership = OwnershipQualifierContract {
        ownership_qualifier_sites: types.ownership_qualifier_sites,
        invalid_ownership_qualifier_sites: types.invalid_ownership_qualifier_sites,
        object_pointer_type_annotation_sites: types.object_pointer_sites,
        deterministic: true,
    };
    c.retain_release = RetainReleaseOperationContract {
        ownership_qualified_sites: qualified,
        retain_insertion_sites: types.strong_qualifier_sites,
        release_insertion_sites: types.strong_qualifier_sites,
        autorelease_insertion_sites: types.autoreleasing_qualifier_sites,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.autoreleasepool = AutoreleasepoolScopeContract {
        scope_sites: facts.autoreleasepool_scopes,
        scope_symbolized_sites: facts.autoreleasepool_scopes,
        max_scope_depth: facts.autoreleasepool_max_depth,
        scope_entry_transition_sites: facts.autoreleasepool_scopes,
        scope_exit_transition_sites: facts.autoreleasepool_scopes,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.weak_unowned = WeakUnownedSemanticsContract {
        ownership_candidate_sites: decl.property_sites + types.ownership_qualifier_sites,
        weak_reference_sites: decl.weak_property_sites + types.weak_qualifier_sites,
        unowned_reference_sites: decl.unowned_property_sites + types.unsafe_unretained_qualifier_sites,
        unowned_safe_reference_sites: types.unsafe_unretained_qualifier_sites,
        weak_unowned_conflict_sites: decl.weak_unowned_conflict_sites,
        contract_violation_sites: decl.weak_unowned_conflict_sites,
        deterministic: true,
    };
    let arc_candidates = types.invalid_ownership_qualifier_sites + decl.weak_unowned_conflict_sites;
    c.arc_fixit = ArcDiagnosticsFixitContract {
        ownership_arc_diagnostic_candidate_sites: arc_candidates,
        ownership_arc_fixit_available_sites: types.ownership_fixit_available_sites,
        ownership_arc_fixit_unavailable_sites: arc_candidates.saturating_sub(types.ownership_fixit_available_sites),
        ownership_arc_weak_unowned_conflict_sites: decl.weak_unowned_conflict_sites,
        ownership_arc_invalid_qualifier_sites: types.invalid_ownership_qualifier_sites,
        deterministic: true,
    };

    blocks(&mut c, facts);
    type_suffixes(&mut c, input.surface);
    modules(&mut c, input, facts);
    errors(&mut c, input);
    concurrency(&mut c, facts);

    c.unsafe_pointer = UnsafePointerExtensionContract {
        unsafe_pointer_extension_sites: types.pointer_declarator_sites,
        multi_level_pointer_sites: types.multi_level_pointer_sites,
        normalized_sites: types
            .pointer_declarator_sites
            .saturating_sub(types.invalid_pointer_declarator_sites),
        gate_blocked_sites: types.invalid_pointer_declarator_sites,
        contract_violation_sites: types.invalid_pointer_declarator_sites,
        deterministic: true,
    };
    let ungoverned = facts.intrinsic_sites.saturating_sub(facts.governed_intrinsic_sites);
    c.inline_asm = InlineAsmIntrinsicGovernanceContract {
        inline_asm_intrinsic_sites: facts.intrinsic_sites,
        governed_intrinsic_sites: facts.governed_intrinsic_sites,
        ungoverned_intrinsic_sites: ungoverned,
        normalized_sites: facts.governed_intrinsic_sites,
        gate_blocked_sites: ungoverned,
        contract_violation_sites: ungoverned,
        deterministic: true,
    };

    c.seal();
    c
}

fn sends(c: &mut LoweringContracts, facts: &BodyFacts, boundary: &LoweringBoundary) {
    let total = facts.sends.len();
    let mut selectors: Vec<&str> = facts.sends.iter().map(|s| s.selector.as_str()).collect();
    selectors.sort_unstable();
    selectors.dedup();

    let sel = &mut c.message_send_selector;
    sel.message_send_sites = total;
    sel.receiver_expression_sites = total;
    sel.selector_literal_entries = selectors.len();
    sel.selector_literal_characters = selectors.iter().map(|s| s.len()).sum();

    let abi = &mut c.dispatch_abi;
    abi.message_send_sites = total;
    abi.runtime_dispatch_arg_slots = boundary.runtime_dispatch_arg_slots;

    let nil = &mut c.nil_receiver;
    nil.message_send_sites = total;

    let sup = &mut c.super_dispatch;
    sup.message_send_sites = total;

    let shim = &mut c.runtime_shim;
    shim.message_send_sites = total;

    for send in &facts.sends {
        let sel = &mut c.message_send_selector;
        match send.form {
            SelectorForm::Unary => sel.unary_selector_sites += 1,
            SelectorForm::Keyword => sel.keyword_selector_sites += 1,
        }
        sel.selector_piece_sites += send.pieces.max(1);
        sel.argument_expression_sites += send.args;

        let abi = &mut c.dispatch_abi;
        abi.receiver_slots_marshaled += send.slots.receiver;
        abi.selector_slots_marshaled += send.slots.selector;
        abi.argument_value_slots_marshaled += send.slots.argument_values;
        abi.argument_padding_slots_marshaled += send.slots.argument_padding;
        abi.argument_total_slots_marshaled += send.slots.argument_values + send.slots.argument_padding;
        abi.total_marshaled_slots += send.slots.total;

        let literal = send.receiver_kind == ReceiverKind::NilLiteral;
        let nil = &mut c.nil_receiver;
        match send.proof {
            ReceiverProof::NilLiteral => {
                nil.receiver_nil_literal_sites += 1;
                nil.nil_receiver_foldable_sites += 1;
            }
            ReceiverProof::ProvenNil => {
                nil.receiver_proven_nil_sites += 1;
                nil.nil_receiver_foldable_sites += 1;
            }
            ReceiverProof::NilWithSideEffects => {
                if literal {
                    nil.receiver_nil_literal_sites += 1;
                } else {
                    nil.receiver_proven_nil_sites += 1;
                }
                nil.contract_violation_sites += 1;
                nil.nil_receiver_runtime_dispatch_required_sites += 1;
            }
            ReceiverProof::ProvenNonNil => {
                nil.nil_receiver_runtime_dispatch_required_sites += 1;
                nil.non_nil_receiver_sites += 1;
            }
            ReceiverProof::Unknown => nil.nil_receiver_runtime_dispatch_required_sites += 1,
        }

        let sup = &mut c.super_dispatch;
        let is_super = send.receiver_kind == ReceiverKind::Super;
        if is_super {
            sup.receiver_super_identifier_sites += 1;
            sup.super_dispatch_requires_class_context_sites += 1;
            if send.in_method {
                sup.super_dispatch_enabled_sites += 1;
            } else {
                sup.contract_violation_sites += 1;
            }
        }
        match send.family {
            MethodFamily::Init => {
                sup.method_family_init_sites += 1;
                if is_super || send.receiver_kind == ReceiverKind::SelfRef {
                    sup.method_family_returns_related_result_sites += 1;
                }
            }
            MethodFamily::Copy => sup.method_family_copy_sites += 1,
            MethodFamily::MutableCopy => sup.method_family_mutable_copy_sites += 1,
            MethodFamily::New => sup.method_family_new_sites += 1,
            MethodFamily::None => sup.method_family_none_sites += 1,
        }
        if send.family.returns_retained() {
            sup.method_family_returns_retained_result_sites += 1;
        }

        let shim = &mut c.runtime_shim;
        if send.proof.is_foldable() {
            shim.runtime_shim_elided_sites += 1;
        } else {
            shim.runtime_shim_required_sites += 1;
        }
    }

    for deterministic in [
        &mut c.message_send_selector.deterministic,
        &mut c.dispatch_abi.deterministic,
        &mut c.nil_receiver.deterministic,
        &mut c.super_dispatch.deterministic,
    ] {
        *deterministic = true;
    }

    let shim = &mut c.runtime_shim;
    shim.runtime_dispatch_arg_slots = boundary.runtime_dispatch_arg_slots;
    shim.runtime_dispatch_declaration_parameter_count = boundary.runtime_dispatch_arg_slots + 2;
    shim.runtime_dispatch_symbol = boundary.runtime_dispatch_symbol.clone();
    shim.default_runtime_dispatch_symbol_binding = boundary.runtime_dispatch_symbol == DEFAULT_RUNTIME_DISPATCH_SYMBOL;
    shim.deterministic = true;
}

fn blocks(c: &mut LoweringContracts, facts: &BodyFacts) {
    let sites = facts.blocks.len();
    let sum = |f: fn(&crate::sema::bodies::BlockFact) -> usize| facts.blocks.iter().map(f).sum::<usize>();
    let params = sum(|b| b.params);
    let captures = sum(|b| b.captures);
    let mutable = sum(|b| b.mutable_captures);
    let statements = sum(|b| b.statements);
    let unresolved = sum(|b| b.unresolved_captures);
    let with_captures = facts.blocks.iter().filter(|b| b.captures > 0).count();
    let with_mutable = facts.blocks.iter().filter(|b| b.mutable_captures > 0).count();
    let escaping = facts.blocks.iter().filter(|b| b.escapes).count();
    let heavy = facts
        .blocks
        .iter()
        .filter(|b| b.params + b.captures + b.statements > HEAVY_BLOCK_WEIGHT)
        .count();

    c.block_capture = BlockLiteralCaptureContract {
        block_literal_sites: sites,
        block_parameter_entries: params,
        block_capture_entries: captures,
        block_body_statement_entries: statements,
        block_empty_capture_sites: sites - with_captures,
        block_capture_set_normalized_sites: sites,
        contract_violation_sites: unresolved,
        deterministic: true,
    };
    c.block_abi = BlockAbiInvokeTrampolineContract {
        block_literal_sites: sites,
        invoke_argument_slots_total: params,
        capture_word_count_total: captures,
        parameter_entries_total: params,
        capture_entries_total: captures,
        descriptor_symbolized_sites: sites,
        invoke_trampoline_symbolized_sites: sites,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.block_storage = BlockStorageEscapeContract {
        block_literal_sites: sites,
        mutable_capture_count_total: mutable,
        byref_slot_count_total: mutable,
        requires_byref_cells_sites: with_mutable,
        escape_analysis_enabled_sites: sites,
        escape_to_heap_sites: escaping,
        byref_layout_symbolized_sites: sites,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.block_copy_dispose = BlockCopyDisposeContract {
        block_literal_sites: sites,
        mutable_capture_count_total: mutable,
        byref_slot_count_total: mutable,
        copy_helper_required_sites: with_captures,
        dispose_helper_required_sites: with_captures,
        copy_helper_symbolized_sites: with_captures,
        dispose_helper_symbolized_sites: with_captures,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.block_baseline = BlockDeterminismPerfBaselineContract {
        block_literal_sites: sites,
        baseline_weight_total: params + captures + statements,
        parameter_entries_total: params,
        capture_entries_total: captures,
        body_statement_entries_total: statements,
        deterministic_capture_sites: sites,
        heavy_tier_sites: heavy,
        contract_violation_sites: 0,
        deterministic: true,
    };
}

fn type_suffixes(c: &mut LoweringContracts, surface: &IntegrationSurface) {
    let t = &surface.facts.types;
    c.lightweight_generic = LightweightGenericConstraintContract {
        generic_suffix_sites: t.generic_suffix_sites,
        terminated_generic_suffix_sites: t.terminated_generic_suffix_sites,
        generic_constraint_sites: t.lightweight_generic_sites,
        normalized_constraint_sites: t.lightweight_generic_sites.saturating_sub(t.invalid_lightweight_generic_sites),
        contract_violation_sites: t.invalid_lightweight_generic_sites,
        deterministic: true,
    };
    c.nullability = NullabilityFlowContract {
        nullability_suffix_sites: t.nullability_suffix_sites,
        nullable_suffix_sites: t.nullable_suffix_sites,
        nonnull_suffix_sites: t.nonnull_suffix_sites,
        nullability_flow_sites: t.nullability_suffix_sites,
        normalized_sites: t.nullability_suffix_sites.saturating_sub(t.invalid_nullability_suffix_sites),
        contract_violation_sites: t.invalid_nullability_suffix_sites,
        deterministic: true,
    };
    c.protocol_qualified = ProtocolQualifiedObjectTypeContract {
        protocol_composition_sites: t.protocol_composition_sites,
        object_type_qualified_sites: t.protocol_composition_sites,
        terminated_protocol_composition_sites: t.terminated_protocol_composition_sites,
        normalized_sites: t.protocol_composition_sites.saturating_sub(t.invalid_protocol_composition_sites),
        contract_violation_sites: t.invalid_protocol_composition_sites,
        deterministic: true,
    };
    let variance_sites = t.protocol_composition_sites + t.ownership_qualifier_sites;
    let variance_violations = t.invalid_protocol_composition_sites + t.invalid_ownership_qualifier_sites;
    c.variance = VarianceBridgeCastContract {
        variance_bridge_cast_sites: variance_sites,
        protocol_composition_sites: t.protocol_composition_sites,
        ownership_qualifier_sites: t.ownership_qualifier_sites,
        normalized_sites: variance_sites.saturating_sub(variance_violations),
        contract_violation_sites: variance_violations,
        deterministic: true,
    };
    c.generic_metadata = GenericMetadataAbiContract {
        generic_metadata_abi_sites: t.generic_suffix_sites,
        generic_suffix_sites: t.generic_suffix_sites,
        protocol_composition_sites: t.protocol_composition_sites,
        normalized_sites: t.generic_suffix_sites.saturating_sub(t.invalid_generic_suffix_sites),
        contract_violation_sites: t.invalid_generic_suffix_sites,
        deterministic: true,
    };
}

fn modules(c: &mut LoweringContracts, input: &ContractInputs<'_>, facts: &BodyFacts) {
    let d = &input.surface.facts;
    let graph_sites = d.module_declarations + d.external_reference_sites;
    c.module_import = ModuleImportGraphContract {
        module_import_graph_sites: graph_sites,
        module_declaration_sites: d.module_declarations,
        import_edge_candidate_sites: d.external_reference_sites,
        normalized_sites: graph_sites.saturating_sub(d.duplicate_module_declarations),
        contract_violation_sites: d.duplicate_module_declarations,
        deterministic: true,
    };
    c.namespace = NamespaceCollisionShadowingContract {
        namespace_collision_shadowing_sites: facts.shadowing_sites + d.top_level_collisions,
        shadowing_sites: facts.shadowing_sites,
        collision_sites: d.top_level_collisions,
        normalized_sites: facts.shadowing_sites,
        contract_violation_sites: d.top_level_collisions,
        deterministic: true,
    };
    let api_sites = d.api_public_sites + d.api_private_sites + d.api_extern_sites + d.api_internal_sites;
    c.api_partition = PublicPrivateApiPartitionContract {
        public_private_api_partition_sites: api_sites,
        public_api_sites: d.api_public_sites,
        private_api_sites: d.api_private_sites,
        extern_api_sites: d.api_extern_sites,
        internal_api_sites: d.api_internal_sites,
        normalized_sites: api_sites.saturating_sub(d.signature_conflicts),
        contract_violation_sites: d.signature_conflicts,
        deterministic: true,
    };
    c.incremental = IncrementalModuleCacheContract {
        incremental_module_cache_invalidation_sites: d.cache_sites,
        cache_component_sites: d.cache_components,
        normalized_sites: d.cache_sites,
        contract_violation_sites: 0,
        interface_digest: interface_digest(input.handoff_replay_key),
        deterministic: true,
    };
    c.conformance = CrossModuleConformanceContract {
        cross_module_conformance_sites: d.conformance_sites,
        resolved_conformance_sites: d.conformance_resolved,
        external_conformance_sites: d.conformance_external,
        missing_requirement_sites: d.missing_requirement_sites,
        normalized_sites: d.conformance_sites.saturating_sub(d.conformance_violations),
        contract_violation_sites: d.conformance_violations,
        deterministic: true,
    };
}

fn errors(c: &mut LoweringContracts, input: &ContractInputs<'_>) {
    let f = input.facts;
    let d = &input.surface.facts;
    let throws_sites = d.throws_decl_sites + f.throws_call_sites;
    c.throws = ThrowsPropagationContract {
        throws_propagation_sites: throws_sites,
        throws_declaration_sites: d.throws_decl_sites,
        throwing_call_sites: f.throws_call_sites,
        propagated_call_sites: f.propagated_throws_calls,
        unpropagated_call_sites: f.unpropagated_throws_calls,
        normalized_sites: throws_sites.saturating_sub(f.unpropagated_throws_calls),
        contract_violation_sites: f.unpropagated_throws_calls,
        deterministic: true,
    };
    c.result_like = ResultLikeContract {
        result_like_sites: f.result_sites,
        result_success_sites: f.result_success_sites,
        result_failure_sites: f.result_failure_sites,
        result_branch_sites: f.result_branch_sites,
        normalized_sites: f.result_sites.saturating_sub(f.result_branch_sites),
        contract_violation_sites: 0,
        deterministic: true,
    };
    let out_params = f.ns_error_bridged_params + f.ns_error_violations;
    let ns_sites = out_params + f.ns_error_failable_functions;
    c.ns_error = NsErrorBridgingContract {
        ns_error_bridging_sites: ns_sites,
        ns_error_parameter_sites: d.types.ns_error_parameter_sites,
        ns_error_out_parameter_sites: out_params,
        ns_error_bridge_path_sites: f.ns_error_bridged_params,
        failable_call_sites: f.ns_error_failable_functions,
        normalized_sites: ns_sites.saturating_sub(f.ns_error_violations),
        contract_violation_sites: f.ns_error_violations,
        deterministic: true,
    };
    let unwind_sites = f.autoreleasepool_scopes + f.throws_call_sites;
    c.unwind = UnwindCleanupContract {
        unwind_cleanup_sites: unwind_sites,
        cleanup_scope_sites: f.autoreleasepool_scopes,
        cleanup_emit_sites: f.autoreleasepool_scopes,
        landing_pad_sites: f.throws_call_sites,
        cleanup_resume_sites: f.throws_call_sites,
        normalized_sites: unwind_sites.saturating_sub(f.unpropagated_throws_calls),
        contract_violation_sites: f.unpropagated_throws_calls,
        deterministic: true,
    };
    let counts = input.diagnostics;
    let recovery_sites = counts.lexer + counts.parser + counts.semantic;
    c.error_recovery = ErrorDiagnosticsRecoveryContract {
        error_diagnostics_recovery_sites: recovery_sites,
        lexer_diagnostic_sites: counts.lexer,
        parser_diagnostic_sites: counts.parser,
        semantic_diagnostic_sites: counts.semantic,
        fixit_hint_sites: counts.fixits,
        parser_recovery_anchor_sites: counts.parser,
        normalized_sites: recovery_sites,
        deterministic: input.sema_ready,
    };
}

fn concurrency(c: &mut LoweringContracts, f: &BodyFacts) {
    let continuation_sites = f.async_functions + f.await_sites;
    c.async_continuation = AsyncContinuationContract {
        async_continuation_sites: continuation_sites,
        async_function_sites: f.async_functions,
        await_expression_sites: f.await_sites,
        continuation_allocation_sites: f.valid_await_points,
        continuation_resume_sites: f.valid_await_points,
        continuation_suspend_sites: f.valid_await_points,
        normalized_sites: continuation_sites.saturating_sub(f.await_violations),
        contract_violation_sites: f.await_violations,
        deterministic: true,
    };
    c.await_suspension = AwaitSuspensionContract {
        await_suspension_sites: f.await_sites,
        suspension_point_sites: f.valid_await_points,
        resume_point_sites: f.valid_await_points,
        state_machine_sites: f.suspending_functions,
        state_machine_state_sites: f.valid_await_points + f.suspending_functions,
        normalized_sites: f.await_sites.saturating_sub(f.await_violations),
        contract_violation_sites: f.await_violations,
        deterministic: true,
    };
    c.actor = ActorIsolationSendabilityContract {
        actor_isolation_sites: f.async_functions,
        actor_isolation_boundary_sites: f.awaited_async_calls,
        actor_hop_sites: f.awaited_async_calls,
        sendability_check_sites: f.sendability_checks,
        non_sendable_capture_sites: f.non_sendable_captures,
        contract_violation_sites: f.non_sendable_captures,
        deterministic: true,
    };
    c.task = TaskRuntimeInteropContract {
        task_runtime_sites: f.async_call_sites,
        runtime_interop_call_sites: f.awaited_async_calls,
        runtime_resume_sites: f.awaited_async_calls,
        cancellation_check_sites: f.async_calls_in_throws,
        normalized_sites: f.async_call_sites,
        contract_violation_sites: 0,
        deterministic: true,
    };
    c.race_guard = ConcurrencyReplayRaceGuardContract {
        concurrency_replay_race_guard_sites: f.race_guard_sites,
        normalized_sites: f.race_guard_sites.saturating_sub(f.race_guard_blocked),
        guard_blocked_sites: f.race_guard_blocked,
        replay_proof_sites: f.race_guard_proofs,
        contract_violation_sites: 0,
        deterministic: true,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};
    use crate::lower::contract::{LoweringContract, normalize};
    use crate::sema::bodies::{BodyOptions, validate_bodies};
    use crate::sema::handoff::build_type_metadata_handoff;
    use crate::sema::surface::build_integration_surface;

    fn contracts(src: &str) -> LoweringContracts {
        let lexed = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist: false,
            },
        );
        let program = parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        )
        .program;
        let (surface, _) = build_integration_surface(&program);
        let report = validate_bodies(
            &program,
            &surface,
            BodyOptions {
                max_message_send_args: 4,
            },
        );
        let boundary = normalize(&LoweringContract::default()).expect("default contract");
        let key = build_type_metadata_handoff(&surface).replay_key();
        build_contracts(&ContractInputs {
            surface: &surface,
            facts: &report.facts,
            boundary: &boundary,
            handoff_replay_key: &key,
            diagnostics: DiagnosticCounts::default(),
            sema_ready: true,
        })
    }

    #[test]
    fn nil_literal_send_is_foldable() {
        let c = contracts("fn main() -> i32 { return [nil ping]; }");
        assert!(
            c.nil_receiver
                .replay_key()
                .starts_with("message_send_sites=1;receiver_nil_literal_sites=1;receiver_proven_nil_sites=0;nil_receiver_foldable_sites=1;")
        );
        assert!(c.nil_receiver.replay_key().contains("contract_violation_sites=0;deterministic=true;"));
        assert_eq!(c.runtime_shim.runtime_shim_elided_sites, 1);
        assert_eq!(c.dispatch_abi.total_marshaled_slots, 6);
    }

    #[test]
    fn every_contract_is_valid_for_a_mixed_program() {
        let src = "let g = 3;\n\
                   @interface Box\n- (i32) width;\n- (i32) scale:(i32)f by:(i32)k;\n@end\n\
                   @implementation Box\n- (i32) width { return 1; }\n- (i32) scale:(i32)f by:(i32)k { return [self width] * f * k; }\n@end\n\
                   fn main() -> i32 { let b = ^(x: i32) { return x + g; }; @autoreleasepool { g = 4; } return [nil scale:1 by:2]; }\n";
        let c = contracts(src);
        for entry in c.entries() {
            assert!(entry.is_valid(), "{} {}", entry.area(), entry.replay_key());
        }
        assert_eq!(c.block_capture.block_literal_sites, 1);
        assert_eq!(c.autoreleasepool.scope_sites, 1);
        assert_eq!(c.message_send_selector.selector_literal_entries, 2);
        assert_eq!(c.message_send_selector.keyword_selector_sites, 1);
    }

    #[test]
    fn digest_is_stable_and_short() {
        let a = interface_digest("module=m;");
        assert_eq!(a, interface_digest("module=m;"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, interface_digest("module=n;"));
    }

    #[test]
    fn super_outside_method_is_a_violation() {
        let c = contracts("fn f() -> i32 { return [super init]; }");
        assert_eq!(c.super_dispatch.contract_violation_sites, 1);
        assert!(c.super_dispatch.is_valid());
        assert!(!c.super_dispatch.deterministic);
        assert_eq!(c.super_dispatch.method_family_returns_related_result_sites, 1);
    }
}
