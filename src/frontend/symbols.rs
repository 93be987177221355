// Every symbol or ordering derived from a declaration is computed here and
// nowhere else; parser, sema and emitter all read the stored results.

use super::ast::{MethodFamily, MethodKind, MethodSymbols, PropertyAttribute, PropertySymbols, TypeAnnotation};

pub const METHOD_MANGLE_PREFIX: &str = "objc3_method_";
pub const SELECTOR_POOL_PREFIX: &str = ".objc3.sel.";

pub fn stable_fnv1a64(text: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize_ident_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "anon".to_string()
    } else {
        out
    }
}

/// `foo` for a unary selector, `a:b:` for keyword pieces in source order.
pub fn normalize_selector<'a>(keywords: impl IntoIterator<Item = &'a str>, keyword_form: bool) -> String {
    let mut out = String::new();
    for kw in keywords {
        out.push_str(kw);
        if keyword_form {
            out.push(':');
        }
    }
    out
}

pub fn method_family(selector: &str) -> MethodFamily {
    let head = selector.split(':').next().unwrap_or("");
    for (prefix, family) in [
        ("mutableCopy", MethodFamily::MutableCopy),
        ("init", MethodFamily::Init),
        ("copy", MethodFamily::Copy),
        ("new", MethodFamily::New),
    ] {
        if let Some(rest) = head.strip_prefix(prefix) {
            if rest.chars().next().is_none_or(|c| !c.is_ascii_lowercase()) {
                return family;
            }
        }
    }
    MethodFamily::None
}

pub fn method_symbols<'a>(
    owner: &str,
    kind: MethodKind,
    selector: &str,
    return_type: &TypeAnnotation,
    param_types: impl IntoIterator<Item = &'a TypeAnnotation>,
) -> MethodSymbols {
    let lookup_symbol = format!("{}|{}|{}", owner, kind.label(), selector);
    let params: Vec<String> = param_types.into_iter().map(|t| t.canonical()).collect();
    MethodSymbols {
        selector: selector.to_string(),
        override_symbol: format!("{}|{}", kind.label(), selector),
        conflict_symbol: format!("{}|{}|{}", selector, return_type.canonical(), params.join(",")),
        ir_symbol: mangle_method(&lookup_symbol, owner, kind, selector),
        family: method_family(selector),
        lookup_symbol,
    }
}

fn mangle_method(lookup_symbol: &str, owner: &str, kind: MethodKind, selector: &str) -> String {
    let tag = match kind {
        MethodKind::Instance => 'i',
        MethodKind::Class => 'c',
    };
    format!(
        "{}{}_{}_{}_{:08x}",
        METHOD_MANGLE_PREFIX,
        normalize_ident_component(owner),
        tag,
        normalize_ident_component(selector),
        stable_fnv1a64(lookup_symbol) & 0xffff_ffff
    )
}

pub fn property_symbols(owner: &str, name: &str, attributes: &[PropertyAttribute]) -> PropertySymbols {
    let value_of = |attr: &str| {
        attributes
            .iter()
            .find(|a| a.name == attr)
            .and_then(|a| a.value.clone())
    };
    let readonly = attributes.iter().any(|a| a.name == "readonly");
    let getter = value_of("getter").unwrap_or_else(|| name.to_string());
    let setter = if readonly {
        None
    } else {
        Some(value_of("setter").unwrap_or_else(|| default_setter(name)))
    };
    PropertySymbols {
        synthesis_symbol: format!("{}::{}", owner, name),
        default_ivar: format!("_{}", name),
        getter,
        setter,
    }
}

fn default_setter(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("set{}{}:", first.to_ascii_uppercase(), chars.as_str()),
        None => "set:".to_string(),
    }
}

pub fn sorted_member_symbols(symbols: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = symbols.into_iter().collect();
    out.sort();
    out.dedup();
    out
}

pub fn selector_pool_symbol(index: usize) -> String {
    format!("{}{}", SELECTOR_POOL_PREFIX, index)
}

#[cfg(test)]
mod tests {
    use super::{default_setter, method_family, normalize_selector, property_symbols};
    use crate::frontend::ast::{MethodFamily, PropertyAttribute, Span};

    #[test]
    fn keyword_selectors_concatenate_pieces() {
        assert_eq!(normalize_selector(["setX", "y"], true), "setX:y:");
        assert_eq!(normalize_selector(["count"], false), "count");
    }

    #[test]
    fn family_needs_word_boundary() {
        assert_eq!(method_family("init"), MethodFamily::Init);
        assert_eq!(method_family("initWithValue:"), MethodFamily::Init);
        assert_eq!(method_family("initialize"), MethodFamily::None);
        assert_eq!(method_family("mutableCopy"), MethodFamily::MutableCopy);
        assert_eq!(method_family("newObject"), MethodFamily::New);
        assert_eq!(method_family("copyright"), MethodFamily::None);
    }

    #[test]
    fn property_accessors_follow_attributes() {
        assert_eq!(default_setter("value"), "setValue:");
        let attrs = vec![
            PropertyAttribute {
                name: "getter".to_string(),
                value: Some("isEnabled".to_string()),
                span: Span::at(1, 1),
            },
            PropertyAttribute {
                name: "readonly".to_string(),
                value: None,
                span: Span::at(1, 1),
            },
        ];
        let symbols = property_symbols("Widget", "enabled", &attrs);
        assert_eq!(symbols.getter, "isEnabled");
        assert_eq!(symbols.setter, None);
        assert_eq!(symbols.synthesis_symbol, "Widget::enabled");
        assert_eq!(symbols.default_ivar, "_enabled");
    }
}
