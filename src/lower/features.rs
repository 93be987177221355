use std::fmt;

use serde::Serialize;

use super::contract::{DEFAULT_RUNTIME_DISPATCH_SYMBOL, MAX_MESSAGE_SEND_ARGS_LIMIT};

/// One tracked contract field; renders bare in replay keys and typed in JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Count(usize),
    Flag(bool),
    Text(String),
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Count(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Flag(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Count(v) => write!(f, "{}", v),
            FieldValue::Flag(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

/// Shared shape of every per-area lowering contract.
pub trait FeatureContract {
    fn area(&self) -> &'static str;
    fn lane_contract(&self) -> &'static str;
    /// Tracked fields in declaration order.
    fn fields(&self) -> Vec<(&'static str, FieldValue)>;
    fn is_consistent(&self) -> bool;
    fn violations(&self) -> usize;
    fn deterministic(&self) -> bool;
    fn set_deterministic(&mut self, value: bool);

    fn replay_key(&self) -> String {
        let mut key = String::new();
        for (name, value) in self.fields() {
            key.push_str(name);
            key.push('=');
            key.push_str(&value.to_string());
            key.push(';');
        }
        key.push_str(&format!(
            "deterministic={};lane_contract={}",
            self.deterministic(),
            self.lane_contract()
        ));
        key
    }

    /// Count relationships hold. An invalid contract never reaches the emitter.
    fn is_valid(&self) -> bool {
        self.is_consistent()
    }

    fn seal(&mut self) {
        let ok = self.deterministic() && self.is_consistent() && self.violations() == 0;
        self.set_deterministic(ok);
    }
}

macro_rules! feature_contract {
    (
        $(#[$meta:meta])*
        $name:ident => $area:literal, $lane:literal {
            $($field:ident: $ty:ty),* $(,)?
        }
        consistent($c:ident) => $consistent:expr;
        violations($v:ident) => $violations:expr;
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct $name {
            $(pub $field: $ty,)*
            pub deterministic: bool,
        }

        impl FeatureContract for $name {
            fn area(&self) -> &'static str {
                $area
            }

            fn lane_contract(&self) -> &'static str {
                $lane
            }

            fn fields(&self) -> Vec<(&'static str, FieldValue)> {
                vec![$((stringify!($field), FieldValue::from(self.$field.clone())),)*]
            }

            fn is_consistent(&self) -> bool {
                let $c = self;
                $consistent
            }

            fn violations(&self) -> usize {
                let $v = self;
                $violations
            }

            fn deterministic(&self) -> bool {
                self.deterministic
            }

            fn set_deterministic(&mut self, value: bool) {
                self.deterministic = value;
            }
        }
    };
}

feature_contract! {
    MethodLookupOverrideConflictContract => "method_lookup_override_conflict", "method-lookup-override-conflict-v1" {
        method_lookup_sites: usize,
        method_lookup_hits: usize,
        method_lookup_misses: usize,
        override_lookup_sites: usize,
        override_lookup_hits: usize,
        override_lookup_misses: usize,
        override_conflicts: usize,
        unresolved_base_interfaces: usize,
    }
    consistent(c) => c.method_lookup_hits + c.method_lookup_misses == c.method_lookup_sites
        && c.override_lookup_hits + c.override_lookup_misses == c.override_lookup_sites
        && c.override_conflicts <= c.override_lookup_hits
        && c.unresolved_base_interfaces <= c.override_lookup_misses;
    violations(_c) => 0;
}

feature_contract! {
    PropertySynthesisIvarBindingContract => "property_synthesis_ivar_binding", "property-synthesis-ivar-binding-v1" {
        property_synthesis_sites: usize,
        property_synthesis_explicit_ivar_bindings: usize,
        property_synthesis_default_ivar_bindings: usize,
        ivar_binding_sites: usize,
        ivar_binding_resolved: usize,
        ivar_binding_missing: usize,
        ivar_binding_conflicts: usize,
    }
    consistent(c) => c.property_synthesis_explicit_ivar_bindings + c.property_synthesis_default_ivar_bindings
        == c.property_synthesis_sites
        && c.ivar_binding_sites == c.property_synthesis_sites
        && c.ivar_binding_resolved + c.ivar_binding_missing + c.ivar_binding_conflicts == c.ivar_binding_sites;
    violations(_c) => 0;
}

feature_contract! {
    IdClassSelObjectPointerContract => "id_class_sel_object_pointer_typecheck", "id-class-sel-object-pointer-typecheck-v1" {
        id_typecheck_sites: usize,
        class_typecheck_sites: usize,
        sel_typecheck_sites: usize,
        object_pointer_typecheck_sites: usize,
        total_typecheck_sites: usize,
    }
    consistent(c) => c.total_typecheck_sites
        == c.id_typecheck_sites + c.class_typecheck_sites + c.sel_typecheck_sites + c.object_pointer_typecheck_sites;
    violations(_c) => 0;
}

feature_contract! {
    MessageSendSelectorContract => "message_send_selector_lowering", "message-send-selector-lowering-v1" {
        message_send_sites: usize,
        unary_selector_sites: usize,
        keyword_selector_sites: usize,
        selector_piece_sites: usize,
        argument_expression_sites: usize,
        receiver_expression_sites: usize,
        selector_literal_entries: usize,
        selector_literal_characters: usize,
    }
    consistent(c) => c.unary_selector_sites + c.keyword_selector_sites == c.message_send_sites
        && c.receiver_expression_sites == c.message_send_sites
        && c.selector_piece_sites >= c.message_send_sites
        && c.argument_expression_sites >= c.keyword_selector_sites
        && c.selector_literal_entries <= c.message_send_sites
        && (c.selector_literal_entries > 0 || c.selector_literal_characters == 0);
    violations(_c) => 0;
}

feature_contract! {
    DispatchAbiMarshallingContract => "dispatch_abi_marshalling", "dispatch-abi-marshalling-v1" {
        message_send_sites: usize,
        receiver_slots_marshaled: usize,
        selector_slots_marshaled: usize,
        argument_value_slots_marshaled: usize,
        argument_padding_slots_marshaled: usize,
        argument_total_slots_marshaled: usize,
        total_marshaled_slots: usize,
        runtime_dispatch_arg_slots: usize,
    }
    consistent(c) => c.receiver_slots_marshaled == c.message_send_sites
        && c.selector_slots_marshaled == c.message_send_sites
        && c.argument_total_slots_marshaled == c.message_send_sites * c.runtime_dispatch_arg_slots
        && c.argument_value_slots_marshaled + c.argument_padding_slots_marshaled == c.argument_total_slots_marshaled
        && c.total_marshaled_slots
            == c.receiver_slots_marshaled + c.selector_slots_marshaled + c.argument_total_slots_marshaled;
    violations(_c) => 0;
}

feature_contract! {
    NilReceiverFoldabilityContract => "nil_receiver_semantics_foldability", "nil-receiver-semantics-foldability-v1" {
        message_send_sites: usize,
        receiver_nil_literal_sites: usize,
        receiver_proven_nil_sites: usize,
        nil_receiver_foldable_sites: usize,
        nil_receiver_runtime_dispatch_required_sites: usize,
        non_nil_receiver_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.nil_receiver_foldable_sites + c.contract_violation_sites
        == c.receiver_nil_literal_sites + c.receiver_proven_nil_sites
        && c.nil_receiver_foldable_sites + c.nil_receiver_runtime_dispatch_required_sites == c.message_send_sites
        && c.non_nil_receiver_sites <= c.nil_receiver_runtime_dispatch_required_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    SuperDispatchMethodFamilyContract => "super_dispatch_method_family", "super-dispatch-method-family-v1" {
        message_send_sites: usize,
        receiver_super_identifier_sites: usize,
        super_dispatch_enabled_sites: usize,
        super_dispatch_requires_class_context_sites: usize,
        method_family_init_sites: usize,
        method_family_copy_sites: usize,
        method_family_mutable_copy_sites: usize,
        method_family_new_sites: usize,
        method_family_none_sites: usize,
        method_family_returns_retained_result_sites: usize,
        method_family_returns_related_result_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.super_dispatch_enabled_sites + c.contract_violation_sites == c.receiver_super_identifier_sites
        && c.super_dispatch_requires_class_context_sites == c.receiver_super_identifier_sites
        && c.method_family_init_sites
            + c.method_family_copy_sites
            + c.method_family_mutable_copy_sites
            + c.method_family_new_sites
            + c.method_family_none_sites
            == c.message_send_sites
        && c.method_family_returns_related_result_sites <= c.method_family_init_sites
        && c.method_family_returns_retained_result_sites
            == c.method_family_init_sites
                + c.method_family_copy_sites
                + c.method_family_mutable_copy_sites
                + c.method_family_new_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    RuntimeShimHostLinkContract => "runtime_shim_host_link", "runtime-shim-host-link-v1" {
        message_send_sites: usize,
        runtime_shim_required_sites: usize,
        runtime_shim_elided_sites: usize,
        runtime_dispatch_arg_slots: usize,
        runtime_dispatch_declaration_parameter_count: usize,
        runtime_dispatch_symbol: String,
        default_runtime_dispatch_symbol_binding: bool,
    }
    consistent(c) => c.runtime_shim_required_sites + c.runtime_shim_elided_sites == c.message_send_sites
        && c.runtime_dispatch_arg_slots <= MAX_MESSAGE_SEND_ARGS_LIMIT
        && c.runtime_dispatch_declaration_parameter_count == c.runtime_dispatch_arg_slots + 2
        && c.default_runtime_dispatch_symbol_binding == (c.runtime_dispatch_symbol == DEFAULT_RUNTIME_DISPATCH_SYMBOL);
    violations(_c) => 0;
}

feature_contract! {
    OwnershipQualifierContract => "ownership_qualifier", "ownership-qualifier-lowering-v1" {
        ownership_qualifier_sites: usize,
        invalid_ownership_qualifier_sites: usize,
        object_pointer_type_annotation_sites: usize,
    }
    consistent(c) => c.invalid_ownership_qualifier_sites <= c.ownership_qualifier_sites;
    violations(c) => c.invalid_ownership_qualifier_sites;
}

feature_contract! {
    RetainReleaseOperationContract => "retain_release_operation", "retain-release-operation-lowering-v1" {
        ownership_qualified_sites: usize,
        retain_insertion_sites: usize,
        release_insertion_sites: usize,
        autorelease_insertion_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.retain_insertion_sites == c.release_insertion_sites
        && c.retain_insertion_sites <= c.ownership_qualified_sites
        && c.autorelease_insertion_sites <= c.ownership_qualified_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    AutoreleasepoolScopeContract => "autoreleasepool_scope", "autoreleasepool-scope-lowering-v1" {
        scope_sites: usize,
        scope_symbolized_sites: usize,
        max_scope_depth: usize,
        scope_entry_transition_sites: usize,
        scope_exit_transition_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.scope_symbolized_sites == c.scope_sites
        && c.scope_entry_transition_sites == c.scope_sites
        && c.scope_exit_transition_sites == c.scope_sites
        && c.max_scope_depth <= c.scope_sites
        && (c.max_scope_depth == 0) == (c.scope_sites == 0);
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    WeakUnownedSemanticsContract => "weak_unowned_semantics", "weak-unowned-semantics-lowering-v1" {
        ownership_candidate_sites: usize,
        weak_reference_sites: usize,
        unowned_reference_sites: usize,
        unowned_safe_reference_sites: usize,
        weak_unowned_conflict_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.weak_reference_sites <= c.ownership_candidate_sites
        && c.unowned_reference_sites <= c.ownership_candidate_sites
        && c.unowned_safe_reference_sites <= c.unowned_reference_sites
        && c.weak_unowned_conflict_sites <= c.ownership_candidate_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ArcDiagnosticsFixitContract => "arc_diagnostics_fixit", "arc-diagnostics-fixit-lowering-v1" {
        ownership_arc_diagnostic_candidate_sites: usize,
        ownership_arc_fixit_available_sites: usize,
        ownership_arc_fixit_unavailable_sites: usize,
        ownership_arc_weak_unowned_conflict_sites: usize,
        ownership_arc_invalid_qualifier_sites: usize,
    }
    consistent(c) => c.ownership_arc_fixit_available_sites + c.ownership_arc_fixit_unavailable_sites
        == c.ownership_arc_diagnostic_candidate_sites
        && c.ownership_arc_weak_unowned_conflict_sites + c.ownership_arc_invalid_qualifier_sites
            == c.ownership_arc_diagnostic_candidate_sites;
    violations(_c) => 0;
}

feature_contract! {
    BlockLiteralCaptureContract => "block_literal_capture", "block-literal-capture-lowering-v1" {
        block_literal_sites: usize,
        block_parameter_entries: usize,
        block_capture_entries: usize,
        block_body_statement_entries: usize,
        block_empty_capture_sites: usize,
        block_capture_set_normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.block_empty_capture_sites <= c.block_literal_sites
        && c.block_capture_set_normalized_sites == c.block_literal_sites
        && c.contract_violation_sites <= c.block_capture_entries;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    BlockAbiInvokeTrampolineContract => "block_abi_invoke_trampoline", "block-abi-invoke-trampoline-lowering-v1" {
        block_literal_sites: usize,
        invoke_argument_slots_total: usize,
        capture_word_count_total: usize,
        parameter_entries_total: usize,
        capture_entries_total: usize,
        descriptor_symbolized_sites: usize,
        invoke_trampoline_symbolized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.invoke_argument_slots_total == c.parameter_entries_total
        && c.capture_word_count_total == c.capture_entries_total
        && c.descriptor_symbolized_sites == c.block_literal_sites
        && c.invoke_trampoline_symbolized_sites == c.block_literal_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    BlockStorageEscapeContract => "block_storage_escape", "block-storage-escape-lowering-v1" {
        block_literal_sites: usize,
        mutable_capture_count_total: usize,
        byref_slot_count_total: usize,
        requires_byref_cells_sites: usize,
        escape_analysis_enabled_sites: usize,
        escape_to_heap_sites: usize,
        byref_layout_symbolized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.byref_slot_count_total == c.mutable_capture_count_total
        && c.requires_byref_cells_sites <= c.block_literal_sites
        && c.escape_to_heap_sites <= c.block_literal_sites
        && c.escape_analysis_enabled_sites == c.block_literal_sites
        && c.byref_layout_symbolized_sites == c.block_literal_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    BlockCopyDisposeContract => "block_copy_dispose", "block-copy-dispose-lowering-v1" {
        block_literal_sites: usize,
        mutable_capture_count_total: usize,
        byref_slot_count_total: usize,
        copy_helper_required_sites: usize,
        dispose_helper_required_sites: usize,
        copy_helper_symbolized_sites: usize,
        dispose_helper_symbolized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.copy_helper_required_sites == c.dispose_helper_required_sites
        && c.copy_helper_required_sites <= c.block_literal_sites
        && c.copy_helper_symbolized_sites == c.copy_helper_required_sites
        && c.dispose_helper_symbolized_sites == c.dispose_helper_required_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    BlockDeterminismPerfBaselineContract => "block_determinism_perf_baseline", "block-determinism-perf-baseline-v1" {
        block_literal_sites: usize,
        baseline_weight_total: usize,
        parameter_entries_total: usize,
        capture_entries_total: usize,
        body_statement_entries_total: usize,
        deterministic_capture_sites: usize,
        heavy_tier_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.baseline_weight_total
        == c.parameter_entries_total + c.capture_entries_total + c.body_statement_entries_total
        && c.deterministic_capture_sites == c.block_literal_sites
        && c.heavy_tier_sites <= c.block_literal_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    LightweightGenericConstraintContract => "lightweight_generic_constraint", "lightweight-generic-constraint-lowering-v1" {
        generic_suffix_sites: usize,
        terminated_generic_suffix_sites: usize,
        generic_constraint_sites: usize,
        normalized_constraint_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.normalized_constraint_sites + c.contract_violation_sites == c.generic_constraint_sites
        && c.generic_constraint_sites <= c.generic_suffix_sites
        && c.terminated_generic_suffix_sites <= c.generic_suffix_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    NullabilityFlowContract => "nullability_flow_warning_precision", "nullability-flow-warning-precision-lowering-v1" {
        nullability_suffix_sites: usize,
        nullable_suffix_sites: usize,
        nonnull_suffix_sites: usize,
        nullability_flow_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.nullable_suffix_sites + c.nonnull_suffix_sites == c.nullability_suffix_sites
        && c.nullability_flow_sites == c.nullability_suffix_sites
        && c.normalized_sites + c.contract_violation_sites == c.nullability_flow_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ProtocolQualifiedObjectTypeContract => "protocol_qualified_object_type", "protocol-qualified-object-type-lowering-v1" {
        protocol_composition_sites: usize,
        object_type_qualified_sites: usize,
        terminated_protocol_composition_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.object_type_qualified_sites == c.protocol_composition_sites
        && c.terminated_protocol_composition_sites <= c.protocol_composition_sites
        && c.normalized_sites + c.contract_violation_sites == c.protocol_composition_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    VarianceBridgeCastContract => "variance_bridge_cast", "variance-bridge-cast-lowering-v1" {
        variance_bridge_cast_sites: usize,
        protocol_composition_sites: usize,
        ownership_qualifier_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.variance_bridge_cast_sites == c.protocol_composition_sites + c.ownership_qualifier_sites
        && c.normalized_sites + c.contract_violation_sites == c.variance_bridge_cast_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    GenericMetadataAbiContract => "generic_metadata_abi", "generic-metadata-abi-lowering-v1" {
        generic_metadata_abi_sites: usize,
        generic_suffix_sites: usize,
        protocol_composition_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.generic_metadata_abi_sites == c.generic_suffix_sites
        && c.protocol_composition_sites <= c.generic_suffix_sites
        && c.normalized_sites + c.contract_violation_sites == c.generic_metadata_abi_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ModuleImportGraphContract => "module_import_graph", "module-import-graph-lowering-v1" {
        module_import_graph_sites: usize,
        module_declaration_sites: usize,
        import_edge_candidate_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.module_import_graph_sites == c.module_declaration_sites + c.import_edge_candidate_sites
        && c.normalized_sites + c.contract_violation_sites == c.module_import_graph_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    NamespaceCollisionShadowingContract => "namespace_collision_shadowing", "namespace-collision-shadowing-lowering-v1" {
        namespace_collision_shadowing_sites: usize,
        shadowing_sites: usize,
        collision_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.namespace_collision_shadowing_sites == c.shadowing_sites + c.collision_sites
        && c.normalized_sites == c.shadowing_sites
        && c.contract_violation_sites == c.collision_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    PublicPrivateApiPartitionContract => "public_private_api_partition", "public-private-api-partition-lowering-v1" {
        public_private_api_partition_sites: usize,
        public_api_sites: usize,
        private_api_sites: usize,
        extern_api_sites: usize,
        internal_api_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.public_private_api_partition_sites
        == c.public_api_sites + c.private_api_sites + c.extern_api_sites + c.internal_api_sites
        && c.normalized_sites + c.contract_violation_sites == c.public_private_api_partition_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    IncrementalModuleCacheContract => "incremental_module_cache_invalidation", "incremental-module-cache-invalidation-lowering-v1" {
        incremental_module_cache_invalidation_sites: usize,
        cache_component_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
        interface_digest: String,
    }
    consistent(c) => c.cache_component_sites <= c.incremental_module_cache_invalidation_sites
        && c.normalized_sites + c.contract_violation_sites == c.incremental_module_cache_invalidation_sites
        && c.interface_digest.len() == 16
        && c.interface_digest.bytes().all(|b| b.is_ascii_hexdigit());
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    CrossModuleConformanceContract => "cross_module_conformance", "cross-module-conformance-lowering-v1" {
        cross_module_conformance_sites: usize,
        resolved_conformance_sites: usize,
        external_conformance_sites: usize,
        missing_requirement_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.resolved_conformance_sites + c.external_conformance_sites == c.cross_module_conformance_sites
        && c.normalized_sites + c.contract_violation_sites == c.cross_module_conformance_sites
        && c.contract_violation_sites <= c.missing_requirement_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ThrowsPropagationContract => "throws_propagation", "throws-propagation-lowering-v1" {
        throws_propagation_sites: usize,
        throws_declaration_sites: usize,
        throwing_call_sites: usize,
        propagated_call_sites: usize,
        unpropagated_call_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.propagated_call_sites + c.unpropagated_call_sites == c.throwing_call_sites
        && c.throws_propagation_sites == c.throws_declaration_sites + c.throwing_call_sites
        && c.normalized_sites + c.contract_violation_sites == c.throws_propagation_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ResultLikeContract => "result_like", "result-like-lowering-v1" {
        result_like_sites: usize,
        result_success_sites: usize,
        result_failure_sites: usize,
        result_branch_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.result_success_sites + c.result_failure_sites == c.result_like_sites
        && c.normalized_sites + c.result_branch_sites == c.result_like_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    NsErrorBridgingContract => "ns_error_bridging", "ns-error-bridging-lowering-v1" {
        ns_error_bridging_sites: usize,
        ns_error_parameter_sites: usize,
        ns_error_out_parameter_sites: usize,
        ns_error_bridge_path_sites: usize,
        failable_call_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.ns_error_out_parameter_sites <= c.ns_error_parameter_sites
        && c.ns_error_bridge_path_sites + c.contract_violation_sites == c.ns_error_out_parameter_sites
        && c.ns_error_bridging_sites == c.ns_error_out_parameter_sites + c.failable_call_sites
        && c.normalized_sites + c.contract_violation_sites == c.ns_error_bridging_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    UnwindCleanupContract => "unwind_cleanup", "unwind-cleanup-lowering-v1" {
        unwind_cleanup_sites: usize,
        cleanup_scope_sites: usize,
        cleanup_emit_sites: usize,
        landing_pad_sites: usize,
        cleanup_resume_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.cleanup_emit_sites == c.cleanup_scope_sites
        && c.cleanup_resume_sites == c.landing_pad_sites
        && c.unwind_cleanup_sites == c.cleanup_scope_sites + c.landing_pad_sites
        && c.normalized_sites + c.contract_violation_sites == c.unwind_cleanup_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ErrorDiagnosticsRecoveryContract => "error_diagnostics_recovery", "error-diagnostics-recovery-lowering-v1" {
        error_diagnostics_recovery_sites: usize,
        lexer_diagnostic_sites: usize,
        parser_diagnostic_sites: usize,
        semantic_diagnostic_sites: usize,
        fixit_hint_sites: usize,
        parser_recovery_anchor_sites: usize,
        normalized_sites: usize,
    }
    consistent(c) => c.error_diagnostics_recovery_sites
        == c.lexer_diagnostic_sites + c.parser_diagnostic_sites + c.semantic_diagnostic_sites
        && c.fixit_hint_sites <= c.error_diagnostics_recovery_sites
        && c.parser_recovery_anchor_sites == c.parser_diagnostic_sites
        && c.normalized_sites == c.error_diagnostics_recovery_sites;
    violations(_c) => 0;
}

feature_contract! {
    AsyncContinuationContract => "async_continuation", "async-continuation-lowering-v1" {
        async_continuation_sites: usize,
        async_function_sites: usize,
        await_expression_sites: usize,
        continuation_allocation_sites: usize,
        continuation_resume_sites: usize,
        continuation_suspend_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.continuation_allocation_sites == c.continuation_resume_sites
        && c.continuation_resume_sites == c.continuation_suspend_sites
        && c.async_continuation_sites == c.async_function_sites + c.await_expression_sites
        && c.normalized_sites + c.contract_violation_sites == c.async_continuation_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    AwaitSuspensionContract => "await_suspension", "await-suspension-lowering-v1" {
        await_suspension_sites: usize,
        suspension_point_sites: usize,
        resume_point_sites: usize,
        state_machine_sites: usize,
        state_machine_state_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.suspension_point_sites == c.resume_point_sites
        && c.state_machine_state_sites == c.suspension_point_sites + c.state_machine_sites
        && c.normalized_sites + c.contract_violation_sites == c.await_suspension_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ActorIsolationSendabilityContract => "actor_isolation_sendability", "actor-isolation-sendability-lowering-v1" {
        actor_isolation_sites: usize,
        actor_isolation_boundary_sites: usize,
        actor_hop_sites: usize,
        sendability_check_sites: usize,
        non_sendable_capture_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.actor_isolation_boundary_sites == c.actor_hop_sites
        && c.non_sendable_capture_sites <= c.sendability_check_sites
        && c.contract_violation_sites == c.non_sendable_capture_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    TaskRuntimeInteropContract => "task_runtime_interop_cancellation", "task-runtime-interop-cancellation-lowering-v1" {
        task_runtime_sites: usize,
        runtime_interop_call_sites: usize,
        runtime_resume_sites: usize,
        cancellation_check_sites: usize,
        normalized_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.runtime_resume_sites == c.runtime_interop_call_sites
        && c.cancellation_check_sites <= c.task_runtime_sites
        && c.normalized_sites + c.contract_violation_sites == c.task_runtime_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    ConcurrencyReplayRaceGuardContract => "concurrency_replay_race_guard", "concurrency-replay-race-guard-lowering-v1" {
        concurrency_replay_race_guard_sites: usize,
        normalized_sites: usize,
        guard_blocked_sites: usize,
        replay_proof_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.normalized_sites + c.guard_blocked_sites == c.concurrency_replay_race_guard_sites
        && c.replay_proof_sites <= c.concurrency_replay_race_guard_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    UnsafePointerExtensionContract => "unsafe_pointer_extension", "unsafe-pointer-extension-gating-lowering-v1" {
        unsafe_pointer_extension_sites: usize,
        multi_level_pointer_sites: usize,
        normalized_sites: usize,
        gate_blocked_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.normalized_sites + c.gate_blocked_sites == c.unsafe_pointer_extension_sites
        && c.multi_level_pointer_sites <= c.unsafe_pointer_extension_sites
        && c.contract_violation_sites == c.gate_blocked_sites;
    violations(c) => c.contract_violation_sites;
}

feature_contract! {
    InlineAsmIntrinsicGovernanceContract => "inline_asm_intrinsic_governance", "inline-asm-intrinsic-governance-lowering-v1" {
        inline_asm_intrinsic_sites: usize,
        governed_intrinsic_sites: usize,
        ungoverned_intrinsic_sites: usize,
        normalized_sites: usize,
        gate_blocked_sites: usize,
        contract_violation_sites: usize,
    }
    consistent(c) => c.governed_intrinsic_sites + c.ungoverned_intrinsic_sites == c.inline_asm_intrinsic_sites
        && c.normalized_sites == c.governed_intrinsic_sites
        && c.gate_blocked_sites == c.ungoverned_intrinsic_sites;
    violations(c) => c.contract_violation_sites;
}

macro_rules! contract_catalog {
    ($($field:ident: $ty:ty),* $(,)?) => {
        /// All feature contracts of one compilation, in catalog order.
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct LoweringContracts {
            $(pub $field: $ty,)*
        }

        impl LoweringContracts {
            pub fn entries(&self) -> Vec<&dyn FeatureContract> {
                vec![$(&self.$field as &dyn FeatureContract),*]
            }

            pub fn seal(&mut self) {
                $(self.$field.seal();)*
            }
        }
    };
}

contract_catalog! {
    method_lookup: MethodLookupOverrideConflictContract,
    property_synthesis: PropertySynthesisIvarBindingContract,
    id_class_sel: IdClassSelObjectPointerContract,
    message_send_selector: MessageSendSelectorContract,
    dispatch_abi: DispatchAbiMarshallingContract,
    nil_receiver: NilReceiverFoldabilityContract,
    super_dispatch: SuperDispatchMethodFamilyContract,
    runtime_shim: RuntimeShimHostLinkContract,
    ownership: OwnershipQualifierContract,
    retain_release: RetainReleaseOperationContract,
    autoreleasepool: AutoreleasepoolScopeContract,
    weak_unowned: WeakUnownedSemanticsContract,
    arc_fixit: ArcDiagnosticsFixitContract,
    block_capture: BlockLiteralCaptureContract,
    block_abi: BlockAbiInvokeTrampolineContract,
    block_storage: BlockStorageEscapeContract,
    block_copy_dispose: BlockCopyDisposeContract,
    block_baseline: BlockDeterminismPerfBaselineContract,
    lightweight_generic: LightweightGenericConstraintContract,
    nullability: NullabilityFlowContract,
    protocol_qualified: ProtocolQualifiedObjectTypeContract,
    variance: VarianceBridgeCastContract,
    generic_metadata: GenericMetadataAbiContract,
    module_import: ModuleImportGraphContract,
    namespace: NamespaceCollisionShadowingContract,
    api_partition: PublicPrivateApiPartitionContract,
    incremental: IncrementalModuleCacheContract,
    conformance: CrossModuleConformanceContract,
    throws: ThrowsPropagationContract,
    result_like: ResultLikeContract,
    ns_error: NsErrorBridgingContract,
    unwind: UnwindCleanupContract,
    error_recovery: ErrorDiagnosticsRecoveryContract,
    async_continuation: AsyncContinuationContract,
    await_suspension: AwaitSuspensionContract,
    actor: ActorIsolationSendabilityContract,
    task: TaskRuntimeInteropContract,
    race_guard: ConcurrencyReplayRaceGuardContract,
    unsafe_pointer: UnsafePointerExtensionContract,
    inline_asm: InlineAsmIntrinsicGovernanceContract,
}

impl LoweringContracts {
    /// The first contract whose count relationships do not hold.
    pub fn first_invalid(&self) -> Option<&dyn FeatureContract> {
        self.entries().into_iter().find(|c| !c.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_forty_unique_areas() {
        let contracts = LoweringContracts::default();
        let areas: Vec<&str> = contracts.entries().iter().map(|c| c.area()).collect();
        assert_eq!(areas.len(), 40);
        let mut unique = areas.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 40);
        assert_eq!(areas[0], "method_lookup_override_conflict");
        assert_eq!(areas[39], "inline_asm_intrinsic_governance");
    }

    #[test]
    fn replay_key_lists_fields_then_lane() {
        let mut c = NilReceiverFoldabilityContract {
            message_send_sites: 1,
            receiver_nil_literal_sites: 1,
            nil_receiver_foldable_sites: 1,
            deterministic: true,
            ..Default::default()
        };
        c.seal();
        assert_eq!(
            c.replay_key(),
            "message_send_sites=1;receiver_nil_literal_sites=1;receiver_proven_nil_sites=0;\
nil_receiver_foldable_sites=1;nil_receiver_runtime_dispatch_required_sites=0;non_nil_receiver_sites=0;\
contract_violation_sites=0;deterministic=true;lane_contract=nil-receiver-semantics-foldability-v1"
        );
        let copy = c.clone();
        assert_eq!(copy.replay_key(), c.replay_key());
        let mut changed = c.clone();
        changed.non_nil_receiver_sites = 5;
        assert_ne!(changed.replay_key(), c.replay_key());
    }

    #[test]
    fn broken_relationships_invalidate_and_clear_determinism() {
        let mut c = CrossModuleConformanceContract {
            cross_module_conformance_sites: 1,
            resolved_conformance_sites: 2,
            normalized_sites: 1,
            deterministic: true,
            ..Default::default()
        };
        c.seal();
        assert!(!c.is_valid());
        assert!(!c.deterministic);
    }

    #[test]
    fn violations_clear_determinism_but_stay_valid() {
        let mut c = NamespaceCollisionShadowingContract {
            namespace_collision_shadowing_sites: 1,
            collision_sites: 1,
            contract_violation_sites: 1,
            deterministic: true,
            ..Default::default()
        };
        c.seal();
        assert!(c.is_valid());
        assert!(!c.deterministic);
    }

    #[test]
    fn shim_binding_tracks_default_symbol() {
        let mut c = RuntimeShimHostLinkContract {
            runtime_dispatch_arg_slots: 4,
            runtime_dispatch_declaration_parameter_count: 6,
            runtime_dispatch_symbol: "custom_send".into(),
            default_runtime_dispatch_symbol_binding: true,
            deterministic: true,
            ..Default::default()
        };
        assert!(!c.is_valid());
        c.default_runtime_dispatch_symbol_binding = false;
        c.seal();
        assert!(c.is_valid());
        assert!(c.deterministic);
    }

    #[test]
    fn incremental_digest_must_be_sixteen_hex_chars() {
        let mut c = IncrementalModuleCacheContract {
            interface_digest: "0123456789abcdef".into(),
            ..Default::default()
        };
        assert!(c.is_valid());
        c.interface_digest = "xyz".into();
        assert!(!c.is_valid());
    }
}
