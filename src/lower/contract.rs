use thiserror::Error;

pub const DEFAULT_MAX_MESSAGE_SEND_ARGS: usize = 4;
pub const MAX_MESSAGE_SEND_ARGS_LIMIT: usize = 16;
pub const DEFAULT_RUNTIME_DISPATCH_SYMBOL: &str = "objc3_msgsend_i32";
pub const SELECTOR_GLOBAL_ORDERING: &str = "lexicographic";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweringContract {
    pub max_message_send_args: usize,
    pub runtime_dispatch_symbol: String,
}

impl Default for LoweringContract {
    fn default() -> Self {
        Self {
            max_message_send_args: DEFAULT_MAX_MESSAGE_SEND_ARGS,
            runtime_dispatch_symbol: DEFAULT_RUNTIME_DISPATCH_SYMBOL.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoweringContractError {
    #[error("invalid lowering contract max_message_send_args: {0} (expected <= {MAX_MESSAGE_SEND_ARGS_LIMIT})")]
    TooManyArgs(usize),
    #[error("invalid lowering contract runtime_dispatch_symbol (expected [A-Za-z_.$][A-Za-z0-9_.$]*): {0}")]
    BadSymbol(String),
}

/// The normalized contract as the emitter sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweringBoundary {
    pub runtime_dispatch_symbol: String,
    pub runtime_dispatch_arg_slots: usize,
    pub selector_global_ordering: &'static str,
}

pub fn is_valid_dispatch_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let extra = |c: char| matches!(c, '_' | '$' | '.');
    (first.is_ascii_alphabetic() || extra(first)) && chars.all(|c| c.is_ascii_alphanumeric() || extra(c))
}

pub fn normalize(contract: &LoweringContract) -> Result<LoweringBoundary, LoweringContractError> {
    if contract.max_message_send_args > MAX_MESSAGE_SEND_ARGS_LIMIT {
        return Err(LoweringContractError::TooManyArgs(contract.max_message_send_args));
    }
    if !is_valid_dispatch_symbol(&contract.runtime_dispatch_symbol) {
        return Err(LoweringContractError::BadSymbol(contract.runtime_dispatch_symbol.clone()));
    }
    Ok(LoweringBoundary {
        runtime_dispatch_symbol: contract.runtime_dispatch_symbol.clone(),
        runtime_dispatch_arg_slots: contract.max_message_send_args,
        selector_global_ordering: SELECTOR_GLOBAL_ORDERING,
    })
}

impl LoweringBoundary {
    pub fn replay_key(&self) -> String {
        format!(
            "runtime_dispatch_symbol={};runtime_dispatch_arg_slots={};selector_global_ordering={}",
            self.runtime_dispatch_symbol, self.runtime_dispatch_arg_slots, self.selector_global_ordering
        )
    }

    /// `declare i32 @sym(i32, ptr, i32 x slots)`.
    pub fn dispatch_declaration(&self) -> String {
        let mut out = format!("declare i32 @{}(i32, ptr", self.runtime_dispatch_symbol);
        for _ in 0..self.runtime_dispatch_arg_slots {
            out.push_str(", i32");
        }
        out.push(')');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contract_normalizes() {
        let b = normalize(&LoweringContract::default()).expect("default is valid");
        assert_eq!(
            b.replay_key(),
            "runtime_dispatch_symbol=objc3_msgsend_i32;runtime_dispatch_arg_slots=4;selector_global_ordering=lexicographic"
        );
        assert_eq!(b.dispatch_declaration(), "declare i32 @objc3_msgsend_i32(i32, ptr, i32, i32, i32, i32)");
    }

    #[test]
    fn rejects_out_of_range_and_bad_symbols() {
        let err = normalize(&LoweringContract {
            max_message_send_args: 17,
            ..LoweringContract::default()
        })
        .expect_err("17 exceeds the limit");
        assert_eq!(
            err.to_string(),
            "invalid lowering contract max_message_send_args: 17 (expected <= 16)"
        );
        let err = normalize(&LoweringContract {
            max_message_send_args: 0,
            runtime_dispatch_symbol: "9bad".into(),
        })
        .expect_err("leading digit");
        assert_eq!(
            err.to_string(),
            "invalid lowering contract runtime_dispatch_symbol (expected [A-Za-z_.$][A-Za-z0-9_.$]*): 9bad"
        );
    }

    #[test]
    fn symbol_grammar() {
        for ok in ["a", "_x", ".L$1", "$sym.v2"] {
            assert!(is_valid_dispatch_symbol(ok), "{}", ok);
        }
        for bad in ["", "1a", "a-b", "a b"] {
            assert!(!is_valid_dispatch_symbol(bad), "{}", bad);
        }
    }

    #[test]
    fn zero_slots_declaration() {
        let b = normalize(&LoweringContract {
            max_message_send_args: 0,
            runtime_dispatch_symbol: "rt".into(),
        })
        .expect("zero slots allowed");
        assert_eq!(b.dispatch_declaration(), "declare i32 @rt(i32, ptr)");
    }
}
