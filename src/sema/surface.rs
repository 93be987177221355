use super::consteval::is_constant_expression;
use super::summary::FrontendSummaries;
use crate::frontend::ast::*;
use crate::frontend::diagnostic::Diagnostics;
use crate::frontend::suggest::did_you_mean;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionInfo {
    pub arity: usize,
    pub param_types: Vec<ValueType>,
    pub param_invalid: Vec<bool>,
    pub return_type: ValueType,
    pub is_pure: bool,
    pub is_extern: bool,
    pub is_async: bool,
    pub is_throws: bool,
    pub has_definition: bool,
    pub has_ns_error_out_param: bool,
}

impl FunctionInfo {
    fn from_decl(f: &FunctionDecl) -> Self {
        Self {
            arity: f.params.len(),
            param_types: f.params.iter().map(|p| p.ty.value_type()).collect(),
            param_invalid: f.params.iter().map(|p| annotation_invalid(&p.ty)).collect(),
            return_type: f.return_type.value_type(),
            is_pure: f.is_pure,
            is_extern: f.is_extern,
            is_async: f.is_async,
            is_throws: f.is_throws,
            has_definition: f.body.is_some(),
            has_ns_error_out_param: f.params.iter().any(|p| p.ty.shape.ns_error_out_parameter),
        }
    }

    fn compatible(&self, other: &Self) -> bool {
        self.arity == other.arity
            && self.param_types == other.param_types
            && self.return_type == other.return_type
            && self.is_pure == other.is_pure
            && self.is_async == other.is_async
            && self.is_throws == other.is_throws
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub selector: String,
    pub kind: MethodKind,
    pub return_type: ValueType,
    pub param_types: Vec<ValueType>,
    pub has_body: bool,
    pub conflict_symbol: String,
}

impl MethodInfo {
    fn from_decl(m: &MethodDecl) -> Self {
        Self {
            selector: m.symbols.selector.clone(),
            kind: m.kind,
            return_type: m.return_type.value_type(),
            param_types: m.params().map(|p| p.ty.value_type()).collect(),
            has_body: m.body.is_some(),
            conflict_symbol: m.symbols.conflict_symbol.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyInfo {
    pub ty: ValueType,
    pub getter: String,
    pub setter: Option<String>,
    pub default_ivar: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub category: Option<String>,
    pub super_name: Option<String>,
    pub protocols: Vec<String>,
    /// Keyed by override symbol (`instance|sel`).
    pub methods: BTreeMap<String, MethodInfo>,
    pub properties: BTreeMap<String, PropertyInfo>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImplementationInfo {
    pub name: String,
    pub category: Option<String>,
    pub methods: BTreeMap<String, MethodInfo>,
    pub interface_resolved: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolInfo {
    pub name: String,
    pub inherited: Vec<String>,
    pub methods: BTreeMap<String, MethodInfo>,
    pub properties: BTreeMap<String, PropertyInfo>,
}

/// Type-annotation counters over every declared annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeFacts {
    pub annotation_sites: usize,
    pub id_sites: usize,
    pub class_sites: usize,
    pub sel_sites: usize,
    pub object_pointer_sites: usize,
    pub ownership_qualifier_sites: usize,
    pub invalid_ownership_qualifier_sites: usize,
    pub ownership_fixit_available_sites: usize,
    pub strong_qualifier_sites: usize,
    pub weak_qualifier_sites: usize,
    pub unsafe_unretained_qualifier_sites: usize,
    pub autoreleasing_qualifier_sites: usize,
    pub pointer_declarator_sites: usize,
    pub invalid_pointer_declarator_sites: usize,
    pub multi_level_pointer_sites: usize,
    pub nullability_suffix_sites: usize,
    pub nullable_suffix_sites: usize,
    pub nonnull_suffix_sites: usize,
    pub invalid_nullability_suffix_sites: usize,
    pub generic_suffix_sites: usize,
    pub terminated_generic_suffix_sites: usize,
    pub invalid_generic_suffix_sites: usize,
    pub protocol_composition_sites: usize,
    pub terminated_protocol_composition_sites: usize,
    pub invalid_protocol_composition_sites: usize,
    pub lightweight_generic_sites: usize,
    pub invalid_lightweight_generic_sites: usize,
    pub ns_error_parameter_sites: usize,
    pub ns_error_out_parameter_sites: usize,
}

/// Declaration-level counters consumed by the lowering contract builder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeclarationFacts {
    pub types: TypeFacts,
    pub property_sites: usize,
    pub weak_property_sites: usize,
    pub unowned_property_sites: usize,
    pub weak_unowned_conflict_sites: usize,
    pub module_declarations: usize,
    pub duplicate_module_declarations: usize,
    pub external_reference_sites: usize,
    pub top_level_collisions: usize,
    pub api_public_sites: usize,
    pub api_private_sites: usize,
    pub api_extern_sites: usize,
    pub api_internal_sites: usize,
    pub signature_conflicts: usize,
    pub conformance_sites: usize,
    pub conformance_resolved: usize,
    pub conformance_external: usize,
    pub missing_requirement_sites: usize,
    pub conformance_violations: usize,
    pub throws_decl_sites: usize,
    pub cache_sites: usize,
    pub cache_components: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegrationSurface {
    pub module_name: String,
    pub globals: BTreeMap<String, ValueType>,
    pub functions: BTreeMap<String, FunctionInfo>,
    pub interfaces: BTreeMap<String, InterfaceInfo>,
    pub implementations: BTreeMap<String, ImplementationInfo>,
    pub protocols: BTreeMap<String, ProtocolInfo>,
    pub summaries: FrontendSummaries,
    pub facts: DeclarationFacts,
}

pub fn container_key(name: &str, category: Option<&str>) -> String {
    match category {
        Some(cat) => format!("{}({})", name, cat),
        None => name.to_string(),
    }
}

const KNOWN_PROPERTY_ATTRIBUTES: [&str; 17] = [
    "assign",
    "atomic",
    "class",
    "copy",
    "getter",
    "nonatomic",
    "nonnull",
    "null_resettable",
    "null_unspecified",
    "nullable",
    "readonly",
    "readwrite",
    "retain",
    "setter",
    "strong",
    "unsafe_unretained",
    "weak",
];

const OWNERSHIP_ATTRIBUTES: [&str; 6] = ["assign", "copy", "retain", "strong", "unsafe_unretained", "weak"];

fn annotation_invalid(ty: &TypeAnnotation) -> bool {
    let s = &ty.shape;
    !(s.generic_well_formed && s.pointer_well_formed && s.nullability_well_formed && s.ownership_well_formed)
}

pub fn build_integration_surface(program: &Program) -> (IntegrationSurface, Diagnostics) {
    let mut b = SurfaceBuilder::default();
    b.modules(program);
    b.globals(program);
    b.functions(program);
    b.protocols(program);
    b.interfaces(program);
    b.implementations(program);
    b.annotations(program);
    b.overrides();
    b.protocol_requirements(program);
    b.finish(program)
}

#[derive(Default)]
struct SurfaceBuilder {
    diags: Diagnostics,
    globals: BTreeMap<String, ValueType>,
    functions: BTreeMap<String, FunctionInfo>,
    interfaces: BTreeMap<String, InterfaceInfo>,
    implementations: BTreeMap<String, ImplementationInfo>,
    protocols: BTreeMap<String, ProtocolInfo>,
    summaries: FrontendSummaries,
    facts: DeclarationFacts,
}

impl SurfaceBuilder {
    fn duplicate(&mut self, message: String, span: &Span) {
        self.facts.top_level_collisions += 1;
        self.diags.push("O3S200", message, span.clone());
    }

    fn modules(&mut self, program: &Program) {
        self.facts.module_declarations = program.modules.len();
        for module in program.modules.iter().skip(1) {
            self.facts.duplicate_module_declarations += 1;
            self.duplicate(format!("duplicate module declaration '{}'", module.name), &module.span);
        }
    }

    fn globals(&mut self, program: &Program) {
        for global in &program.globals {
            let constant = {
                let known = &self.globals;
                is_constant_expression(&global.value, &|name| known.contains_key(name))
            };
            if self.globals.contains_key(&global.name) {
                self.duplicate(format!("duplicate global '{}'", global.name), &global.span);
            } else {
                self.globals.insert(global.name.clone(), ValueType::I32);
            }
            if !constant {
                self.diags.push(
                    "O3S210",
                    "global initializer must be constant expression",
                    global.span.clone(),
                );
            }
        }
    }

    fn functions(&mut self, program: &Program) {
        for f in &program.functions {
            if f.is_throws {
                self.facts.throws_decl_sites += 1;
            }
            if f.is_extern {
                self.facts.api_extern_sites += 1;
            } else {
                self.facts.api_internal_sites += 1;
            }
            if self.globals.contains_key(&f.name) {
                self.duplicate(format!("duplicate function '{}'", f.name), &f.span);
                continue;
            }
            let info = FunctionInfo::from_decl(f);
            match self.functions.get_mut(&f.name) {
                None => {
                    self.functions.insert(f.name.clone(), info);
                }
                Some(existing) => {
                    if existing.has_definition && info.has_definition {
                        self.facts.top_level_collisions += 1;
                        self.diags
                            .push("O3S200", format!("duplicate function '{}'", f.name), f.span.clone());
                    } else if !existing.compatible(&info) {
                        self.facts.signature_conflicts += 1;
                        self.diags.push(
                            "O3S206",
                            format!("type mismatch: incompatible function signature for '{}'", f.name),
                            f.span.clone(),
                        );
                    } else {
                        existing.has_definition |= info.has_definition;
                        existing.is_extern |= info.is_extern;
                    }
                }
            }
        }
        self.facts.api_internal_sites += program.globals.len();
    }

    fn protocols(&mut self, program: &Program) {
        let sum = &mut self.summaries.protocol_category;
        sum.declared_protocols = program.protocols.len();
        for proto in &program.protocols {
            self.facts.api_public_sites += 1;
            if self.protocols.contains_key(&proto.name) {
                self.duplicate(format!("duplicate protocol '{}'", proto.name), &proto.span);
                continue;
            }
            let owner = format!("protocol '{}'", proto.name);
            self.adoption_list(&proto.inherited, &owner, false);
            for parent in &proto.inherited {
                if parent.name == proto.name {
                    self.summaries.protocol_category.invalid_protocol_composition_sites += 1;
                    self.diags.push(
                        "O3S206",
                        format!("type mismatch: protocol '{}' cannot inherit from itself", proto.name),
                        parent.span.clone(),
                    );
                }
            }
            let methods = self.container_methods(&proto.methods, &proto.name, "protocol", false);
            let properties = self.container_properties(&proto.properties, &owner);
            self.protocols.insert(
                proto.name.clone(),
                ProtocolInfo {
                    name: proto.name.clone(),
                    inherited: proto.inherited.iter().map(|r| r.name.clone()).collect(),
                    methods,
                    properties,
                },
            );
        }
    }

    /// Shared by interface adoption lists and protocol inheritance lists.
    fn adoption_list(&mut self, refs: &[NamedRef], owner: &str, category: bool) {
        if refs.is_empty() {
            return;
        }
        let sum = &mut self.summaries.protocol_category;
        sum.protocol_composition_sites += 1;
        sum.protocol_composition_symbols += refs.len();
        if category {
            sum.category_composition_sites += 1;
            sum.category_composition_symbols += refs.len();
        }
        let mut seen = BTreeSet::new();
        for r in refs {
            if !seen.insert(r.name.as_str()) {
                self.summaries.protocol_category.invalid_protocol_composition_sites += 1;
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: duplicate protocol identifier '{}' in protocol list of {}",
                        r.name, owner
                    ),
                    r.span.clone(),
                );
            }
        }
    }

    fn container_methods(
        &mut self,
        methods: &[MethodDecl],
        owner: &str,
        container: &str,
        require_body: bool,
    ) -> BTreeMap<String, MethodInfo> {
        let mut out = BTreeMap::new();
        for m in methods {
            self.selector_entry(m);
            let selector = &m.symbols.selector;
            if require_body && m.body.is_none() {
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: implementation selector '{}' in '{}' must define a body",
                        selector, owner
                    ),
                    m.span.clone(),
                );
            }
            if !require_body && m.body.is_some() {
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: {} selector '{}' in '{}' must not define a body",
                        container, selector, owner
                    ),
                    m.span.clone(),
                );
            }
            if out.contains_key(&m.symbols.override_symbol) {
                self.diags.push(
                    "O3S200",
                    format!(
                        "duplicate {} selector '{}' in {} '{}'",
                        container, selector, container, owner
                    ),
                    m.span.clone(),
                );
                continue;
            }
            out.insert(m.symbols.override_symbol.clone(), MethodInfo::from_decl(m));
        }
        out
    }

    fn selector_entry(&mut self, m: &MethodDecl) {
        let sum = &mut self.summaries.selector_normalization;
        sum.method_declaration_entries += 1;
        if !m.symbols.selector.is_empty() {
            sum.normalized_method_declarations += 1;
        }
        sum.selector_piece_entries += m.pieces.len();
        sum.selector_piece_parameter_links += m.param_count();
        let keyword_form = m.pieces.iter().any(|p| p.param.is_some());
        if keyword_form {
            sum.selector_missing_keyword_pieces += m.pieces.iter().filter(|p| p.keyword.is_empty()).count();
        }
        if keyword_form && m.pieces.first().is_some_and(|p| p.keyword.is_empty()) {
            self.diags.push(
                "O3S206",
                format!(
                    "type mismatch: selector piece keyword must be non-empty for selector '{}'",
                    m.symbols.selector
                ),
                m.span.clone(),
            );
        }
        let mut names = BTreeSet::new();
        for param in m.params() {
            if !names.insert(param.name.as_str()) {
                self.summaries.selector_normalization.selector_parameter_linkage_mismatches += 1;
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: selector parameter linkage mismatch for selector '{}': duplicate parameter '{}'",
                        m.symbols.selector, param.name
                    ),
                    param.span.clone(),
                );
            }
        }
    }

    fn container_properties(&mut self, props: &[PropertyDecl], owner: &str) -> BTreeMap<String, PropertyInfo> {
        let mut out = BTreeMap::new();
        for p in props {
            self.property_attributes(p, owner);
            if out.contains_key(&p.name) {
                self.diags.push(
                    "O3S200",
                    format!("duplicate property '{}' in {}", p.name, owner),
                    p.span.clone(),
                );
                continue;
            }
            out.insert(
                p.name.clone(),
                PropertyInfo {
                    ty: p.ty.value_type(),
                    getter: p.symbols.getter.clone(),
                    setter: p.symbols.setter.clone(),
                    default_ivar: p.symbols.default_ivar.clone(),
                },
            );
        }
        out
    }

    fn property_attributes(&mut self, p: &PropertyDecl, owner: &str) {
        self.facts.property_sites += 1;
        let sum = &mut self.summaries.property_attribute;
        sum.property_declaration_entries += 1;
        sum.property_attribute_entries += p.attributes.len();
        let mut violations: Vec<(String, Span, bool)> = Vec::new();
        for attr in &p.attributes {
            let name = attr.name.as_str();
            if attr.value.is_some() {
                self.summaries.property_attribute.property_attribute_value_entries += 1;
            }
            if !KNOWN_PROPERTY_ATTRIBUTES.contains(&name) {
                let mut message = format!(
                    "type mismatch: unknown @property attribute '{}' for property '{}' in {}",
                    name, p.name, owner
                );
                if let Some(hint) = did_you_mean(name, KNOWN_PROPERTY_ATTRIBUTES) {
                    message.push_str("; ");
                    message.push_str(&hint);
                }
                violations.push((message, attr.span.clone(), true));
                continue;
            }
            match (name, &attr.value) {
                ("getter" | "setter", None) => violations.push((
                    format!(
                        "type mismatch: @property attribute '{}' requires a selector value for property '{}'",
                        name, p.name
                    ),
                    attr.span.clone(),
                    true,
                )),
                ("getter", Some(_)) => {
                    let sum = &mut self.summaries.property_attribute;
                    sum.property_accessor_modifier_entries += 1;
                    sum.property_getter_selector_entries += 1;
                }
                ("setter", Some(value)) => {
                    let sum = &mut self.summaries.property_attribute;
                    sum.property_accessor_modifier_entries += 1;
                    sum.property_setter_selector_entries += 1;
                    if !value.ends_with(':') {
                        violations.push((
                            format!(
                                "type mismatch: @property setter selector '{}' must end with ':' for property '{}'",
                                value, p.name
                            ),
                            attr.span.clone(),
                            false,
                        ));
                    }
                }
                (_, Some(_)) => violations.push((
                    format!(
                        "type mismatch: @property attribute '{}' does not take a value for property '{}'",
                        name, p.name
                    ),
                    attr.span.clone(),
                    true,
                )),
                _ => {}
            }
        }
        for (a, b) in [("readonly", "readwrite"), ("atomic", "nonatomic"), ("readonly", "setter")] {
            if p.has_attribute(a) && p.has_attribute(b) {
                violations.push((
                    format!(
                        "type mismatch: conflicting @property attributes '{}' and '{}' for property '{}'",
                        a, b, p.name
                    ),
                    p.span.clone(),
                    false,
                ));
            }
        }
        let ownership: BTreeSet<&str> = p
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .filter(|n| OWNERSHIP_ATTRIBUTES.contains(n))
            .collect();
        if ownership.len() > 1 {
            let names: Vec<&str> = ownership.iter().copied().collect();
            violations.push((
                format!(
                    "type mismatch: conflicting @property attributes '{}' and '{}' for property '{}'",
                    names[0], names[1], p.name
                ),
                p.span.clone(),
                false,
            ));
        }
        let weak = p.has_attribute("weak");
        let unowned = p.has_attribute("unsafe_unretained") || (p.has_attribute("assign") && p.ty.shape.is_object_type);
        if weak {
            self.facts.weak_property_sites += 1;
        }
        if unowned {
            self.facts.unowned_property_sites += 1;
        }
        if weak && unowned {
            self.facts.weak_unowned_conflict_sites += 1;
        }
        for attr in ["weak", "strong", "copy", "retain"] {
            if p.has_attribute(attr) && !p.ty.shape.is_object_type {
                violations.push((
                    format!(
                        "type mismatch: @property ownership attribute '{}' requires an object type for property '{}'",
                        attr, p.name
                    ),
                    p.span.clone(),
                    false,
                ));
            }
        }
        for (message, span, invalid_entry) in violations {
            let sum = &mut self.summaries.property_attribute;
            sum.contract_violation_sites += 1;
            if invalid_entry {
                sum.invalid_attribute_entries += 1;
            }
            self.diags.push("O3S206", message, span);
        }
    }

    fn interfaces(&mut self, program: &Program) {
        self.summaries.interface_implementation.declared_interfaces = program.interfaces.len();
        for iface in &program.interfaces {
            let key = container_key(&iface.name, iface.category.as_deref());
            if iface.is_category() {
                self.summaries.protocol_category.declared_categories += 1;
                self.facts.api_private_sites += 1;
            } else {
                self.facts.api_public_sites += 1;
            }
            if self.interfaces.contains_key(&key) {
                self.duplicate(format!("duplicate interface '{}'", key), &iface.span);
                continue;
            }
            let owner = format!("interface '{}'", key);
            self.adoption_list(&iface.protocols, &owner, iface.is_category());
            let methods = self.container_methods(&iface.methods, &key, "interface", false);
            let properties = self.container_properties(&iface.properties, &owner);
            self.summaries.interface_implementation.interface_method_symbols += methods.len();
            self.interfaces.insert(
                key,
                InterfaceInfo {
                    name: iface.name.clone(),
                    category: iface.category.clone(),
                    super_name: iface.super_name.as_ref().map(|s| s.name.clone()),
                    protocols: iface.protocols.iter().map(|r| r.name.clone()).collect(),
                    methods,
                    properties,
                    span: iface.span.clone(),
                },
            );
        }
    }

    fn implementations(&mut self, program: &Program) {
        self.summaries.interface_implementation.declared_implementations = program.implementations.len();
        for imp in &program.implementations {
            let key = container_key(&imp.name, imp.category.as_deref());
            self.facts.api_private_sites += 1;
            if imp.is_category() {
                self.summaries.protocol_category.declared_categories += 1;
            }
            if self.implementations.contains_key(&key) {
                self.duplicate(format!("duplicate implementation '{}'", key), &imp.span);
                continue;
            }
            let graph = &mut self.summaries.symbol_graph_scope_resolution;
            graph.implementation_interface_resolution_sites += 1;
            let interface_resolved = self.interfaces.contains_key(&key);
            if interface_resolved {
                graph.implementation_interface_resolution_hits += 1;
                self.summaries.interface_implementation.resolved_implementations += 1;
                self.summaries.interface_implementation.resolved_interfaces += 1;
            } else {
                graph.implementation_interface_resolution_misses += 1;
                self.diags.push(
                    "O3S206",
                    format!("type mismatch: missing interface declaration for implementation '{}'", key),
                    imp.span.clone(),
                );
            }
            let methods = self.container_methods(&imp.methods, &key, "implementation", true);
            self.summaries.interface_implementation.implementation_method_symbols += methods.len();
            for m in &imp.methods {
                self.method_lookup(&imp.name, &key, m);
            }
            if interface_resolved && !imp.is_category() {
                self.synthesis(imp, &key);
            }
            self.implementations.insert(
                key,
                ImplementationInfo {
                    name: imp.name.clone(),
                    category: imp.category.clone(),
                    methods,
                    interface_resolved,
                },
            );
        }
    }

    fn method_lookup(&mut self, class: &str, key: &str, m: &MethodDecl) {
        let sym = &m.symbols.override_symbol;
        let declared = [key, class]
            .iter()
            .filter_map(|k| self.interfaces.get(*k))
            .find_map(|i| i.methods.get(sym));
        let lookup = &mut self.summaries.method_lookup_override_conflict;
        let graph = &mut self.summaries.symbol_graph_scope_resolution;
        lookup.method_lookup_sites += 1;
        graph.method_resolution_sites += 1;
        match declared {
            Some(decl) => {
                lookup.method_lookup_hits += 1;
                graph.method_resolution_hits += 1;
                self.summaries.interface_implementation.linked_implementation_symbols += 1;
                if decl.conflict_symbol != m.symbols.conflict_symbol {
                    self.diags.push(
                        "O3S206",
                        format!(
                            "type mismatch: incompatible method signature for selector '{}' in implementation '{}'",
                            m.symbols.selector, key
                        ),
                        m.span.clone(),
                    );
                }
            }
            None => {
                lookup.method_lookup_misses += 1;
                graph.method_resolution_misses += 1;
            }
        }
    }

    fn synthesis(&mut self, imp: &ImplementationDecl, key: &str) {
        let Some(iface) = self.interfaces.get(key) else {
            return;
        };
        let explicit: BTreeMap<&str, &SynthesizeEntry> =
            imp.synthesizes.iter().map(|s| (s.property.as_str(), s)).collect();
        let dynamic: BTreeSet<&str> = imp.dynamics.iter().map(|d| d.name.as_str()).collect();
        let mut bound_ivars = BTreeSet::new();
        let sum = &mut self.summaries.property_synthesis_ivar_binding;
        for (name, prop) in &iface.properties {
            sum.property_synthesis_sites += 1;
            sum.ivar_binding_sites += 1;
            let ivar = match explicit.get(name.as_str()).and_then(|e| e.ivar.clone()) {
                Some(ivar) => {
                    sum.explicit_ivar_bindings += 1;
                    ivar
                }
                None => {
                    sum.default_ivar_bindings += 1;
                    if explicit.contains_key(name.as_str()) {
                        name.clone()
                    } else {
                        prop.default_ivar.clone()
                    }
                }
            };
            if dynamic.contains(name.as_str()) {
                sum.ivar_binding_missing += 1;
            } else if !bound_ivars.insert(ivar) {
                sum.ivar_binding_conflicts += 1;
            } else {
                sum.ivar_binding_resolved += 1;
            }
        }
        let mut stray = Vec::new();
        for entry in &imp.synthesizes {
            if !iface.properties.contains_key(&entry.property) {
                stray.push((entry.property.clone(), entry.span.clone()));
            }
        }
        for dynamic_ref in &imp.dynamics {
            if !iface.properties.contains_key(&dynamic_ref.name) {
                stray.push((dynamic_ref.name.clone(), dynamic_ref.span.clone()));
            }
        }
        for (name, span) in stray {
            self.diags.push(
                "O3S206",
                format!(
                    "type mismatch: property '{}' is not declared in interface '{}'",
                    name, key
                ),
                span,
            );
        }
        let mut seen = BTreeMap::new();
        for entry in imp.synthesizes.iter().filter(|e| e.ivar.is_some()) {
            let ivar = entry.ivar.clone().unwrap_or_default();
            if let Some(first) = seen.insert(ivar.clone(), entry.property.clone()) {
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: ivar '{}' is bound by both '{}' and '{}' in implementation '{}'",
                        ivar, first, entry.property, key
                    ),
                    entry.span.clone(),
                );
            }
        }
    }

    fn overrides(&mut self) {
        let keys: Vec<String> = self
            .interfaces
            .iter()
            .filter(|(_, i)| i.category.is_none() && i.super_name.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            let Some(iface) = self.interfaces.get(&key) else {
                continue;
            };
            let mut chain = Vec::new();
            let mut visited = BTreeSet::from([key.clone()]);
            let mut cursor = iface.super_name.clone();
            let mut cyclic = false;
            while let Some(name) = cursor {
                if !visited.insert(name.clone()) {
                    cyclic = true;
                    break;
                }
                match self.interfaces.get(&name) {
                    Some(parent) => {
                        chain.push(name.clone());
                        cursor = parent.super_name.clone();
                    }
                    None => break,
                }
            }
            let base_resolved = !chain.is_empty();
            let span = iface.span.clone();
            let mut conflicts = Vec::new();
            let sum = &mut self.summaries.method_lookup_override_conflict;
            for (sym, method) in &iface.methods {
                sum.override_lookup_sites += 1;
                let found = chain
                    .iter()
                    .filter_map(|c| self.interfaces.get(c).map(|i| (c, i)))
                    .find_map(|(c, i)| i.methods.get(sym).map(|m| (c, m)));
                match found {
                    Some((base, base_method)) => {
                        sum.override_lookup_hits += 1;
                        if base_method.conflict_symbol != method.conflict_symbol {
                            sum.override_conflicts += 1;
                            conflicts.push((method.selector.clone(), base.clone()));
                        }
                    }
                    None => {
                        sum.override_lookup_misses += 1;
                        if !base_resolved {
                            sum.unresolved_base_interfaces += 1;
                        }
                    }
                }
            }
            for (selector, base) in conflicts {
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: incompatible override signature for selector '{}' in interface '{}' (overrides '{}')",
                        selector, key, base
                    ),
                    span.clone(),
                );
            }
            if cyclic {
                self.diags.push(
                    "O3S206",
                    format!("type mismatch: cyclic superclass chain for interface '{}'", key),
                    span,
                );
            }
        }
    }

    fn protocol_requirements(&mut self, program: &Program) {
        for iface in &program.interfaces {
            for r in &iface.protocols {
                self.conformance_ref(&r.name);
            }
        }
        for proto in &program.protocols {
            for r in &proto.inherited {
                self.conformance_ref(&r.name);
            }
        }
        for imp in program.implementations.iter().filter(|i| !i.is_category()) {
            let Some(iface) = self.interfaces.get(&imp.name) else {
                continue;
            };
            let implemented: BTreeSet<&str> = imp
                .methods
                .iter()
                .map(|m| m.symbols.override_symbol.as_str())
                .collect();
            let mut pending: Vec<String> = iface.protocols.clone();
            let mut visited = BTreeSet::new();
            let mut missing = Vec::new();
            while let Some(name) = pending.pop() {
                if !visited.insert(name.clone()) {
                    continue;
                }
                let Some(proto) = self.protocols.get(&name) else {
                    continue;
                };
                pending.extend(proto.inherited.iter().cloned());
                let before = missing.len();
                for (sym, m) in &proto.methods {
                    if !implemented.contains(sym.as_str()) {
                        missing.push((name.clone(), m.selector.clone()));
                    }
                }
                if missing.len() > before {
                    self.facts.conformance_violations += 1;
                }
            }
            missing.sort();
            self.facts.missing_requirement_sites += missing.len();
            for (proto, selector) in missing {
                self.diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: implementation '{}' does not implement selector '{}' required by protocol '{}'",
                        imp.name, selector, proto
                    ),
                    imp.span.clone(),
                );
            }
        }
    }

    fn conformance_ref(&mut self, name: &str) {
        self.facts.conformance_sites += 1;
        if self.protocols.contains_key(name) {
            self.facts.conformance_resolved += 1;
        } else {
            self.facts.conformance_external += 1;
            self.facts.external_reference_sites += 1;
        }
    }

    fn annotations(&mut self, program: &Program) {
        for f in &program.functions {
            for p in &f.params {
                self.annotation(&p.ty, "parameter", &p.name);
            }
            if !f.return_type.implicit {
                self.annotation(&f.return_type, "function return", &f.name);
            }
        }
        let methods = program
            .interfaces
            .iter()
            .flat_map(|i| i.methods.iter())
            .chain(program.implementations.iter().flat_map(|i| i.methods.iter()))
            .chain(program.protocols.iter().flat_map(|p| p.methods.iter()));
        let mut method_sites = Vec::new();
        for m in methods {
            method_sites.push((&m.return_type, "method return", m.symbols.selector.clone()));
            for p in m.params() {
                method_sites.push((&p.ty, "parameter", p.name.clone()));
            }
        }
        for (ty, role, name) in method_sites {
            self.annotation(ty, role, &name);
        }
        let props = program
            .interfaces
            .iter()
            .flat_map(|i| i.properties.iter())
            .chain(program.protocols.iter().flat_map(|p| p.properties.iter()));
        for p in props {
            self.annotation(&p.ty, "property", &p.name);
        }
        for iface in &program.interfaces {
            if let Some(sup) = &iface.super_name {
                if !self.interfaces.contains_key(&sup.name) {
                    self.facts.external_reference_sites += 1;
                }
            }
        }
    }

    fn annotation(&mut self, ty: &TypeAnnotation, role: &str, name: &str) {
        let facts = check_annotation(ty, role, name, &mut self.diags);
        let t = &mut self.facts.types;
        t.annotation_sites += 1;
        t.id_sites += facts.id_sites;
        t.class_sites += facts.class_sites;
        t.sel_sites += facts.sel_sites;
        t.object_pointer_sites += facts.object_pointer_sites;
        t.ownership_qualifier_sites += facts.ownership_qualifier_sites;
        t.invalid_ownership_qualifier_sites += facts.invalid_ownership_qualifier_sites;
        t.ownership_fixit_available_sites += facts.ownership_fixit_available_sites;
        t.strong_qualifier_sites += facts.strong_qualifier_sites;
        t.weak_qualifier_sites += facts.weak_qualifier_sites;
        t.unsafe_unretained_qualifier_sites += facts.unsafe_unretained_qualifier_sites;
        t.autoreleasing_qualifier_sites += facts.autoreleasing_qualifier_sites;
        t.pointer_declarator_sites += facts.pointer_declarator_sites;
        t.invalid_pointer_declarator_sites += facts.invalid_pointer_declarator_sites;
        t.multi_level_pointer_sites += facts.multi_level_pointer_sites;
        t.nullability_suffix_sites += facts.nullability_suffix_sites;
        t.nullable_suffix_sites += facts.nullable_suffix_sites;
        t.nonnull_suffix_sites += facts.nonnull_suffix_sites;
        t.invalid_nullability_suffix_sites += facts.invalid_nullability_suffix_sites;
        t.generic_suffix_sites += facts.generic_suffix_sites;
        t.terminated_generic_suffix_sites += facts.terminated_generic_suffix_sites;
        t.invalid_generic_suffix_sites += facts.invalid_generic_suffix_sites;
        t.protocol_composition_sites += facts.protocol_composition_sites;
        t.terminated_protocol_composition_sites += facts.terminated_protocol_composition_sites;
        t.invalid_protocol_composition_sites += facts.invalid_protocol_composition_sites;
        t.lightweight_generic_sites += facts.lightweight_generic_sites;
        t.invalid_lightweight_generic_sites += facts.invalid_lightweight_generic_sites;
        t.ns_error_parameter_sites += facts.ns_error_parameter_sites;
        t.ns_error_out_parameter_sites += facts.ns_error_out_parameter_sites;
    }

    fn finish(mut self, program: &Program) -> (IntegrationSurface, Diagnostics) {
        let t = &self.facts.types;
        let ta = &mut self.summaries.type_annotation_surface;
        ta.annotation_sites = t.annotation_sites;
        ta.ownership_qualifier_sites = t.ownership_qualifier_sites;
        ta.invalid_ownership_qualifier_sites = t.invalid_ownership_qualifier_sites;
        ta.object_pointer_type_sites = t.object_pointer_sites;
        ta.pointer_declarator_sites = t.pointer_declarator_sites;
        ta.invalid_pointer_declarator_sites = t.invalid_pointer_declarator_sites;
        ta.nullability_suffix_sites = t.nullability_suffix_sites;
        ta.invalid_nullability_suffix_sites = t.invalid_nullability_suffix_sites;
        ta.generic_suffix_sites = t.generic_suffix_sites;
        ta.invalid_generic_suffix_sites = t.invalid_generic_suffix_sites;

        let g = &mut self.summaries.symbol_graph_scope_resolution;
        g.global_symbol_nodes = self.globals.len();
        g.function_symbol_nodes = self.functions.len();
        g.interface_symbol_nodes = self.interfaces.len();
        g.implementation_symbol_nodes = self.implementations.len();
        g.protocol_symbol_nodes = self.protocols.len();
        g.interface_property_symbol_nodes = self.interfaces.values().map(|i| i.properties.len()).sum();
        g.interface_method_symbol_nodes = self.interfaces.values().map(|i| i.methods.len()).sum();
        g.implementation_method_symbol_nodes = self.implementations.values().map(|i| i.methods.len()).sum();
        g.top_level_scope_symbols = g.global_symbol_nodes
            + g.function_symbol_nodes
            + g.interface_symbol_nodes
            + g.implementation_symbol_nodes
            + g.protocol_symbol_nodes;
        g.nested_scope_symbols = program.functions.iter().map(|f| f.params.len()).sum::<usize>()
            + program
                .implementations
                .iter()
                .flat_map(|i| i.methods.iter())
                .map(|m| m.param_count())
                .sum::<usize>();
        g.scope_frames = 1
            + program.functions.iter().filter(|f| f.body.is_some()).count()
            + program.method_bodies().count();

        self.summaries.seal();

        let mut kinds = 0;
        for present in [
            !program.globals.is_empty(),
            !program.functions.is_empty(),
            !program.interfaces.is_empty(),
            !program.implementations.is_empty(),
            !program.protocols.is_empty(),
        ] {
            kinds += present as usize;
        }
        self.facts.cache_sites = program.globals.len()
            + program.functions.len()
            + program.interfaces.len()
            + program.implementations.len()
            + program.protocols.len();
        self.facts.cache_components = kinds;

        let surface = IntegrationSurface {
            module_name: program.module_name.clone(),
            globals: self.globals,
            functions: self.functions,
            interfaces: self.interfaces,
            implementations: self.implementations,
            protocols: self.protocols,
            summaries: self.summaries,
            facts: self.facts,
        };
        (surface, self.diags)
    }
}

/// Turns an annotation's shape flags into diagnostics and per-site counters.
pub fn check_annotation(ty: &TypeAnnotation, role: &str, name: &str, diags: &mut Diagnostics) -> TypeFacts {
    let mut f = TypeFacts::default();
    let s = &ty.shape;
    match ty.base {
        TypeBase::Id | TypeBase::Instancetype => f.id_sites += 1,
        TypeBase::Class => f.class_sites += 1,
        TypeBase::Sel => f.sel_sites += 1,
        TypeBase::Named(_) if ty.pointer_depth > 0 => f.object_pointer_sites += 1,
        _ => {}
    }
    if ty.base.spelling() == "NSError" {
        f.ns_error_parameter_sites += 1;
        if s.ns_error_out_parameter {
            f.ns_error_out_parameter_sites += 1;
        }
    }

    if let Some(q) = &ty.ownership {
        f.ownership_qualifier_sites += 1;
        match q.kind {
            None => {
                f.invalid_ownership_qualifier_sites += 1;
                let mut message = format!(
                    "type mismatch: unknown ownership qualifier '{}' for {} '{}'",
                    q.spelling, role, name
                );
                if let Some(hint) = did_you_mean(&q.spelling, OwnershipKind::SPELLINGS) {
                    f.ownership_fixit_available_sites += 1;
                    message.push_str("; ");
                    message.push_str(&hint);
                }
                diags.push("O3S206", message, q.span.clone());
            }
            Some(_) if !s.is_object_type => {
                f.invalid_ownership_qualifier_sites += 1;
                diags.push(
                    "O3S206",
                    format!(
                        "type mismatch: ownership qualifier '{}' requires an object type for {} '{}'",
                        q.spelling, role, name
                    ),
                    q.span.clone(),
                );
            }
            Some(kind) => match kind {
                OwnershipKind::Strong => f.strong_qualifier_sites += 1,
                OwnershipKind::Weak => f.weak_qualifier_sites += 1,
                OwnershipKind::UnsafeUnretained => f.unsafe_unretained_qualifier_sites += 1,
                OwnershipKind::Autoreleasing => f.autoreleasing_qualifier_sites += 1,
            },
        }
    }

    if let Some(g) = &ty.generic {
        f.generic_suffix_sites += 1;
        if g.terminated {
            f.terminated_generic_suffix_sites += 1;
        }
        let printable = if g.terminated {
            format!("<{}>", g.text)
        } else {
            format!("<{}", g.text)
        };
        if s.protocol_composition {
            f.protocol_composition_sites += 1;
            if g.terminated {
                f.terminated_protocol_composition_sites += 1;
            }
        }
        if s.lightweight_generic {
            f.lightweight_generic_sites += 1;
        }
        let mut invalid = false;
        if !g.terminated {
            invalid = true;
            diags.push(
                "O3S206",
                format!(
                    "type mismatch: unterminated generic suffix '{}' for {} '{}'",
                    printable, role, name
                ),
                g.span.clone(),
            );
        } else if !s.is_object_type {
            invalid = true;
            diags.push(
                "O3S206",
                format!(
                    "type mismatch: generic {} type suffix '{}' is unsupported for non-object annotation '{}'",
                    role, printable, name
                ),
                g.span.clone(),
            );
        } else if s.protocol_composition {
            invalid |= check_protocol_composition(&g.text, &printable, &g.span, diags);
        }
        if invalid {
            f.invalid_generic_suffix_sites += 1;
            if s.protocol_composition {
                f.invalid_protocol_composition_sites += 1;
            }
            if s.lightweight_generic {
                f.invalid_lightweight_generic_sites += 1;
            }
        }
    }

    if ty.pointer_depth > 0 {
        f.pointer_declarator_sites += 1;
        if s.multi_level_pointer {
            f.multi_level_pointer_sites += 1;
        }
        if !s.pointer_well_formed {
            f.invalid_pointer_declarator_sites += 1;
            let stars = "*".repeat(ty.pointer_depth);
            let message = if s.multi_level_pointer {
                format!(
                    "type mismatch: multi-level pointer declarator '{}' for {} '{}' is unsupported",
                    stars, role, name
                )
            } else {
                format!(
                    "type mismatch: pointer {} type declarator '{}' is unsupported for non-object annotation '{}'",
                    role, stars, name
                )
            };
            diags.push("O3S206", message, ty.span.clone());
        }
    }

    for (n, span) in &ty.nullability {
        f.nullability_suffix_sites += 1;
        match n {
            Nullability::Nullable => f.nullable_suffix_sites += 1,
            Nullability::Nonnull => f.nonnull_suffix_sites += 1,
        }
        if !s.nullability_well_formed {
            f.invalid_nullability_suffix_sites += 1;
            let spelling = match n {
                Nullability::Nullable => '?',
                Nullability::Nonnull => '!',
            };
            let message = if s.is_object_type {
                format!("type mismatch: duplicate nullability suffix '{}' for {} '{}'", spelling, role, name)
            } else {
                format!(
                    "type mismatch: nullability {} type suffix '{}' is unsupported for non-object annotation '{}'",
                    role, spelling, name
                )
            };
            diags.push("O3S206", message, span.clone());
        }
    }
    f
}

/// Returns true when the composition list is malformed.
fn check_protocol_composition(text: &str, printable: &str, span: &Span, diags: &mut Diagnostics) -> bool {
    let items: Vec<&str> = text.split(',').map(str::trim).collect();
    if text.trim().is_empty() {
        diags.push(
            "O3S206",
            format!("type mismatch: empty protocol composition suffix '{}'", printable),
            span.clone(),
        );
        return true;
    }
    let mut invalid = false;
    let mut seen = BTreeSet::new();
    for item in items {
        let valid_ident = item
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && item.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_ident {
            invalid = true;
            diags.push(
                "O3S206",
                format!(
                    "type mismatch: invalid protocol identifier '{}' in protocol composition suffix '{}'",
                    item, printable
                ),
                span.clone(),
            );
        } else if !seen.insert(item) {
            invalid = true;
            diags.push(
                "O3S206",
                format!(
                    "type mismatch: duplicate protocol identifier '{}' in protocol composition suffix '{}'",
                    item, printable
                ),
                span.clone(),
            );
        }
    }
    invalid
}

#[cfg(test)]
mod tests {
    use super::build_integration_surface;
    use crate::frontend::ast::Program;
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};

    fn program(src: &str) -> Program {
        let lexed = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist: false,
            },
        );
        let out = parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        );
        assert!(out.diags.is_empty(), "{:?}", out.diags);
        out.program
    }

    fn messages(src: &str) -> Vec<String> {
        let (_, diags) = build_integration_surface(&program(src));
        diags.items.iter().map(|d| d.render()).collect()
    }

    #[test]
    fn links_interface_and_implementation() {
        let src = "@interface Counter\n@property (nonatomic) i32 value;\n- (i32) value;\n@end\n@implementation Counter\n- (i32) value { return 1; }\n@end\n";
        let (surface, diags) = build_integration_surface(&program(src));
        assert!(diags.is_empty(), "{:?}", diags);
        let link = &surface.summaries.interface_implementation;
        assert_eq!(link.resolved_implementations, 1);
        assert_eq!(link.linked_implementation_symbols, 1);
        assert!(link.deterministic);
        let synth = &surface.summaries.property_synthesis_ivar_binding;
        assert_eq!(synth.property_synthesis_sites, 1);
        assert_eq!(synth.default_ivar_bindings, 1);
        assert_eq!(synth.ivar_binding_resolved, 1);
        assert!(synth.deterministic);
    }

    #[test]
    fn unknown_property_attribute_is_one_violation() {
        let src = "@interface Box\n@property (nonatomic, shiny) i32 size;\n@end\n";
        let (surface, diags) = build_integration_surface(&program(src));
        assert_eq!(diags.len(), 1);
        assert!(
            diags.items[0]
                .message
                .starts_with("type mismatch: unknown @property attribute 'shiny' for property 'size' in interface 'Box'")
        );
        let attrs = &surface.summaries.property_attribute;
        assert_eq!(attrs.invalid_attribute_entries, 1);
        assert_eq!(attrs.contract_violation_sites, 1);
        assert!(!attrs.deterministic);
    }

    #[test]
    fn missing_interface_and_duplicates() {
        let msgs = messages("let a = 1;\nlet a = 2;\n@implementation Ghost\n@end\n");
        assert!(msgs.iter().any(|m| m.contains("duplicate global 'a' [O3S200]")));
        assert!(msgs
            .iter()
            .any(|m| m.contains("missing interface declaration for implementation 'Ghost' [O3S206]")));
    }

    #[test]
    fn non_constant_global_initializer() {
        let msgs = messages("fn f() -> i32 { return 1; }\nlet g = f();\n");
        assert_eq!(msgs, vec!["error:2:1: global initializer must be constant expression [O3S210]"]);
    }

    #[test]
    fn suffix_rules_on_parameters() {
        let msgs = messages("fn f(a: i32?, b: __strng id, c: id<P, P>) -> i32 { return 0; }");
        assert!(msgs.iter().any(|m| m.contains("nullability parameter type suffix '?'")));
        assert!(msgs.iter().any(|m| m.contains("did you mean '__strong'?")));
        assert!(msgs.iter().any(|m| m.contains("duplicate protocol identifier 'P'")));
    }

    #[test]
    fn override_conflict_counts() {
        let src = "@interface Base\n- (i32) size;\n@end\n@interface Derived : Base\n- (bool) size;\n- (i32) other;\n@end\n";
        let (surface, diags) = build_integration_surface(&program(src));
        let m = &surface.summaries.method_lookup_override_conflict;
        assert_eq!(m.override_lookup_sites, 2);
        assert_eq!(m.override_lookup_hits, 1);
        assert_eq!(m.override_conflicts, 1);
        assert_eq!(m.override_lookup_misses, 1);
        assert_eq!(m.unresolved_base_interfaces, 0);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn protocol_requirements_are_checked() {
        let src = "@protocol Shape\n- (i32) area;\n@end\n@interface Square <Shape>\n@end\n@implementation Square\n@end\n";
        let msgs = messages(src);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("does not implement selector 'area' required by protocol 'Shape'"));
    }
}
