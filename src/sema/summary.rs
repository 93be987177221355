use serde::Serialize;

/// Counter-only summary with a fixed field order; the order is the profile order.
macro_rules! frontend_summary {
    ($(#[$meta:meta])* $name:ident => $profile:literal { $($field:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct $name {
            $(pub $field: usize,)*
            pub deterministic: bool,
        }

        impl $name {
            pub const PROFILE: &'static str = $profile;

            pub fn entries(&self) -> Vec<(&'static str, String)> {
                vec![
                    $((stringify!($field), self.$field.to_string()),)*
                    ("deterministic", self.deterministic.to_string()),
                ]
            }
        }
    };
}

frontend_summary!(InterfaceImplementationSummary => "interface_implementation" {
    declared_interfaces,
    declared_implementations,
    resolved_interfaces,
    resolved_implementations,
    interface_method_symbols,
    implementation_method_symbols,
    linked_implementation_symbols,
});

frontend_summary!(ProtocolCategorySummary => "protocol_category" {
    declared_protocols,
    declared_categories,
    protocol_composition_sites,
    protocol_composition_symbols,
    category_composition_sites,
    category_composition_symbols,
    invalid_protocol_composition_sites,
});

frontend_summary!(SelectorNormalizationSummary => "selector_normalization" {
    method_declaration_entries,
    normalized_method_declarations,
    selector_piece_entries,
    selector_piece_parameter_links,
    selector_parameter_linkage_mismatches,
    selector_missing_keyword_pieces,
});

frontend_summary!(PropertyAttributeSummary => "property_attribute" {
    property_declaration_entries,
    property_attribute_entries,
    property_attribute_value_entries,
    property_accessor_modifier_entries,
    property_getter_selector_entries,
    property_setter_selector_entries,
    invalid_attribute_entries,
    contract_violation_sites,
});

frontend_summary!(TypeAnnotationSurfaceSummary => "type_annotation_surface" {
    annotation_sites,
    ownership_qualifier_sites,
    invalid_ownership_qualifier_sites,
    object_pointer_type_sites,
    pointer_declarator_sites,
    invalid_pointer_declarator_sites,
    nullability_suffix_sites,
    invalid_nullability_suffix_sites,
    generic_suffix_sites,
    invalid_generic_suffix_sites,
});

frontend_summary!(SymbolGraphScopeSummary => "symbol_graph_scope_resolution" {
    global_symbol_nodes,
    function_symbol_nodes,
    interface_symbol_nodes,
    implementation_symbol_nodes,
    protocol_symbol_nodes,
    interface_property_symbol_nodes,
    interface_method_symbol_nodes,
    implementation_method_symbol_nodes,
    top_level_scope_symbols,
    nested_scope_symbols,
    scope_frames,
    implementation_interface_resolution_sites,
    implementation_interface_resolution_hits,
    implementation_interface_resolution_misses,
    method_resolution_sites,
    method_resolution_hits,
    method_resolution_misses,
});

frontend_summary!(MethodLookupOverrideConflictSummary => "method_lookup_override_conflict" {
    method_lookup_sites,
    method_lookup_hits,
    method_lookup_misses,
    override_lookup_sites,
    override_lookup_hits,
    override_lookup_misses,
    override_conflicts,
    unresolved_base_interfaces,
});

frontend_summary!(PropertySynthesisIvarBindingSummary => "property_synthesis_ivar_binding" {
    property_synthesis_sites,
    explicit_ivar_bindings,
    default_ivar_bindings,
    ivar_binding_sites,
    ivar_binding_resolved,
    ivar_binding_missing,
    ivar_binding_conflicts,
});

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrontendSummaries {
    pub interface_implementation: InterfaceImplementationSummary,
    pub protocol_category: ProtocolCategorySummary,
    pub selector_normalization: SelectorNormalizationSummary,
    pub property_attribute: PropertyAttributeSummary,
    pub type_annotation_surface: TypeAnnotationSurfaceSummary,
    pub symbol_graph_scope_resolution: SymbolGraphScopeSummary,
    pub method_lookup_override_conflict: MethodLookupOverrideConflictSummary,
    pub property_synthesis_ivar_binding: PropertySynthesisIvarBindingSummary,
}

impl FrontendSummaries {
    /// `(profile name, ordered entries)` in emission order.
    pub fn profiles(&self) -> Vec<(&'static str, Vec<(&'static str, String)>)> {
        vec![
            (InterfaceImplementationSummary::PROFILE, self.interface_implementation.entries()),
            (ProtocolCategorySummary::PROFILE, self.protocol_category.entries()),
            (SelectorNormalizationSummary::PROFILE, self.selector_normalization.entries()),
            (PropertyAttributeSummary::PROFILE, self.property_attribute.entries()),
            (TypeAnnotationSurfaceSummary::PROFILE, self.type_annotation_surface.entries()),
            (SymbolGraphScopeSummary::PROFILE, self.symbol_graph_scope_resolution.entries()),
            (
                MethodLookupOverrideConflictSummary::PROFILE,
                self.method_lookup_override_conflict.entries(),
            ),
            (
                PropertySynthesisIvarBindingSummary::PROFILE,
                self.property_synthesis_ivar_binding.entries(),
            ),
        ]
    }

    /// Recomputes every summary's `deterministic` flag from its own counters.
    pub fn seal(&mut self) {
        let s = &mut self.interface_implementation;
        s.deterministic = s.resolved_interfaces <= s.declared_interfaces
            && s.resolved_implementations <= s.declared_implementations
            && s.linked_implementation_symbols <= s.implementation_method_symbols;

        let p = &mut self.protocol_category;
        p.deterministic = p.category_composition_sites <= p.protocol_composition_sites
            && p.category_composition_symbols <= p.protocol_composition_symbols
            && p.invalid_protocol_composition_sites <= p.protocol_composition_symbols;

        let sel = &mut self.selector_normalization;
        sel.deterministic = sel.normalized_method_declarations <= sel.method_declaration_entries
            && sel.selector_piece_parameter_links <= sel.selector_piece_entries
            && sel.selector_missing_keyword_pieces <= sel.selector_piece_entries
            && sel.selector_parameter_linkage_mismatches == 0;

        let prop = &mut self.property_attribute;
        prop.deterministic = prop.invalid_attribute_entries <= prop.property_attribute_entries
            && prop.property_attribute_value_entries <= prop.property_attribute_entries
            && prop.contract_violation_sites == 0;

        let t = &mut self.type_annotation_surface;
        t.deterministic = t.invalid_ownership_qualifier_sites <= t.ownership_qualifier_sites
            && t.invalid_pointer_declarator_sites <= t.pointer_declarator_sites
            && t.invalid_nullability_suffix_sites <= t.nullability_suffix_sites
            && t.invalid_generic_suffix_sites <= t.generic_suffix_sites;

        let g = &mut self.symbol_graph_scope_resolution;
        g.deterministic = g.implementation_interface_resolution_hits
            + g.implementation_interface_resolution_misses
            == g.implementation_interface_resolution_sites
            && g.method_resolution_hits + g.method_resolution_misses == g.method_resolution_sites
            && g.top_level_scope_symbols
                == g.global_symbol_nodes
                    + g.function_symbol_nodes
                    + g.interface_symbol_nodes
                    + g.implementation_symbol_nodes
                    + g.protocol_symbol_nodes;

        let m = &mut self.method_lookup_override_conflict;
        m.deterministic = m.method_lookup_hits + m.method_lookup_misses == m.method_lookup_sites
            && m.override_lookup_hits + m.override_lookup_misses == m.override_lookup_sites
            && m.override_conflicts <= m.override_lookup_hits
            && m.unresolved_base_interfaces <= m.override_lookup_misses;

        let b = &mut self.property_synthesis_ivar_binding;
        b.deterministic = b.explicit_ivar_bindings + b.default_ivar_bindings == b.property_synthesis_sites
            && b.ivar_binding_sites == b.property_synthesis_sites
            && b.ivar_binding_resolved + b.ivar_binding_missing + b.ivar_binding_conflicts
                == b.ivar_binding_sites;
    }
}
