use super::surface::IntegrationSurface;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub arity: usize,
    pub param_types: Vec<String>,
    pub return_type: String,
    pub flags: Vec<&'static str>,
    pub has_definition: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerMetadata {
    pub key: String,
    pub super_name: Option<String>,
    pub protocols: Vec<String>,
    /// `override_symbol=conflict_symbol`, sorted.
    pub methods: Vec<String>,
    pub properties: Vec<String>,
}

/// Flattened projection of the integration surface. Every vector is sorted so the
/// projection never depends on map iteration or declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeMetadataHandoff {
    pub module_name: String,
    pub globals: Vec<String>,
    pub functions: Vec<FunctionSignature>,
    pub interfaces: Vec<ContainerMetadata>,
    pub implementations: Vec<ContainerMetadata>,
    pub protocols: Vec<ContainerMetadata>,
    pub profiles: Vec<String>,
}

fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
    v.sort();
    v
}

pub fn build_type_metadata_handoff(surface: &IntegrationSurface) -> TypeMetadataHandoff {
    let globals = sorted(
        surface
            .globals
            .iter()
            .map(|(name, ty)| format!("{}:{}", name, ty.name()))
            .collect(),
    );

    let mut functions: Vec<FunctionSignature> = surface
        .functions
        .iter()
        .map(|(name, f)| {
            let mut flags = Vec::new();
            for (on, label) in [
                (f.is_async, "async"),
                (f.is_extern, "extern"),
                (f.is_pure, "pure"),
                (f.is_throws, "throws"),
            ] {
                if on {
                    flags.push(label);
                }
            }
            FunctionSignature {
                name: name.clone(),
                arity: f.arity,
                param_types: f.param_types.iter().map(|t| t.name().to_string()).collect(),
                return_type: f.return_type.name().to_string(),
                flags,
                has_definition: f.has_definition,
            }
        })
        .collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name));

    let mut interfaces: Vec<ContainerMetadata> = surface
        .interfaces
        .iter()
        .map(|(key, i)| ContainerMetadata {
            key: key.clone(),
            super_name: i.super_name.clone(),
            protocols: sorted(i.protocols.clone()),
            methods: sorted(
                i.methods
                    .iter()
                    .map(|(sym, m)| format!("{}={}", sym, m.conflict_symbol))
                    .collect(),
            ),
            properties: sorted(
                i.properties
                    .iter()
                    .map(|(name, p)| format!("{}:{}", name, p.ty.name()))
                    .collect(),
            ),
        })
        .collect();
    interfaces.sort_by(|a, b| a.key.cmp(&b.key));

    let mut implementations: Vec<ContainerMetadata> = surface
        .implementations
        .iter()
        .map(|(key, i)| ContainerMetadata {
            key: key.clone(),
            super_name: None,
            protocols: Vec::new(),
            methods: sorted(
                i.methods
                    .iter()
                    .map(|(sym, m)| format!("{}={}", sym, m.conflict_symbol))
                    .collect(),
            ),
            properties: Vec::new(),
        })
        .collect();
    implementations.sort_by(|a, b| a.key.cmp(&b.key));

    let mut protocols: Vec<ContainerMetadata> = surface
        .protocols
        .iter()
        .map(|(key, p)| ContainerMetadata {
            key: key.clone(),
            super_name: None,
            protocols: sorted(p.inherited.clone()),
            methods: sorted(
                p.methods
                    .iter()
                    .map(|(sym, m)| format!("{}={}", sym, m.conflict_symbol))
                    .collect(),
            ),
            properties: sorted(
                p.properties
                    .iter()
                    .map(|(name, prop)| format!("{}:{}", name, prop.ty.name()))
                    .collect(),
            ),
        })
        .collect();
    protocols.sort_by(|a, b| a.key.cmp(&b.key));

    let profiles = surface
        .summaries
        .profiles()
        .into_iter()
        .map(|(name, entries)| {
            let body: Vec<String> = entries.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}[{}]", name, body.join(","))
        })
        .collect();

    TypeMetadataHandoff {
        module_name: surface.module_name.clone(),
        globals,
        functions,
        interfaces,
        implementations,
        protocols,
        profiles,
    }
}

impl TypeMetadataHandoff {
    pub fn is_sorted(&self) -> bool {
        self.globals.is_sorted()
            && self.functions.is_sorted_by(|a, b| a.name <= b.name)
            && [&self.interfaces, &self.implementations, &self.protocols]
                .iter()
                .all(|v| v.is_sorted_by(|a, b| a.key <= b.key))
    }

    /// Canonical `field=value;` serialization of the whole handoff.
    pub fn replay_key(&self) -> String {
        let mut out = format!("module={};", self.module_name);
        out.push_str(&format!("globals={};", self.globals.join(",")));
        let fns: Vec<String> = self
            .functions
            .iter()
            .map(|f| {
                format!(
                    "{}({})->{}[{}]{}",
                    f.name,
                    f.param_types.join(","),
                    f.return_type,
                    f.flags.join("+"),
                    if f.has_definition { "def" } else { "decl" }
                )
            })
            .collect();
        out.push_str(&format!("functions={};", fns.join(",")));
        for (label, containers) in [
            ("interfaces", &self.interfaces),
            ("implementations", &self.implementations),
            ("protocols", &self.protocols),
        ] {
            let items: Vec<String> = containers
                .iter()
                .map(|c| {
                    format!(
                        "{}:{}<{}>{{{}}}[{}]",
                        c.key,
                        c.super_name.as_deref().unwrap_or(""),
                        c.protocols.join(","),
                        c.methods.join(","),
                        c.properties.join(",")
                    )
                })
                .collect();
            out.push_str(&format!("{}={};", label, items.join(",")));
        }
        out.push_str(&format!("profiles={}", self.profiles.join(";")));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::build_type_metadata_handoff;
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};
    use crate::sema::surface::build_integration_surface;

    fn handoff_key(src: &str) -> (bool, String) {
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
        let a = build_type_metadata_handoff(&surface);
        let b = build_type_metadata_handoff(&surface);
        assert_eq!(a, b);
        (a.is_sorted(), a.replay_key())
    }

    #[test]
    fn declaration_order_does_not_leak() {
        let (sorted_a, a) = handoff_key("let b = 1;\nlet a = 2;\nfn z() -> i32 { return 0; }\nfn y() -> i32 { return 1; }\n");
        let (sorted_b, b) = handoff_key("let a = 2;\nlet b = 1;\nfn y() -> i32 { return 1; }\nfn z() -> i32 { return 0; }\n");
        assert!(sorted_a && sorted_b);
        assert_eq!(a, b);
        assert!(a.starts_with("module=objc3_module;globals=a:i32,b:i32;functions=y()->i32[]def,z()->i32[]def;"));
    }
}
