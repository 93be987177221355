// Purpose: Textual LLVM IR emission for a checked ObjC3 program plus its replay manifest.
// Inputs/Outputs: Consumes the program, integration surface, receiver proofs and sealed lowering contracts; returns IR text.
// Invariants: Output is a pure function of the inputs; every ordered section iterates a Vec or BTreeMap.
// Gotchas: Contracts are trusted as-is except for the validity gate at the top of `emit_ir`.

mod emitter;
pub mod manifest;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::frontend::ast::{ExprId, ExprKind, FunctionDecl, Program, ValueType};
use crate::frontend::lexer::MigrationHints;
use crate::frontend::symbols::selector_pool_symbol;
use crate::lower::{LoweringBoundary, LoweringContracts};
use crate::sema::CompatibilityMode;
use crate::sema::bodies::ReceiverProof;
use crate::sema::consteval::resolve_global_values;
use crate::sema::summary::FrontendSummaries;
use crate::sema::surface::IntegrationSurface;
use crate::sema::visit::each_block_expr;

use self::emitter::{FnEmitter, ModuleEnv, SelectorGlobal, escape_c_string};

pub const ENTRY_SYMBOL: &str = "objc3c_entry";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("global initializer failed const evaluation")]
    GlobalInitializer { name: String },
    #[error("lowering contract '{0}' is internally inconsistent")]
    InvalidContract(&'static str),
    #[error("manifest serialization failed: {0}")]
    Manifest(String),
}

/// Frontend options echoed into the `frontend_profile` header and `!0`.
#[derive(Clone, Copy, Debug)]
pub struct FrontendProfile {
    pub language_version: u32,
    pub compatibility_mode: CompatibilityMode,
    pub migration_assist: bool,
    pub hints: MigrationHints,
}

impl FrontendProfile {
    pub fn header(&self) -> String {
        format!(
            "language_version={}, compatibility_mode={}, migration_assist={}, migration_legacy_total={}",
            self.language_version,
            self.compatibility_mode.label(),
            self.migration_assist,
            self.hints.legacy_total()
        )
    }
}

pub struct EmitInputs<'a> {
    pub program: &'a Program,
    pub surface: &'a IntegrationSurface,
    pub proofs: &'a BTreeMap<ExprId, ReceiverProof>,
    pub boundary: &'a LoweringBoundary,
    pub contracts: &'a LoweringContracts,
    pub frontend: FrontendProfile,
}

pub fn emit_ir(input: &EmitInputs<'_>) -> Result<String, EmitError> {
    if let Some(bad) = input.contracts.first_invalid() {
        return Err(EmitError::InvalidContract(bad.area()));
    }
    let mut codegen = Codegen::new(input);
    codegen.emit_module()?;
    debug!(bytes = codegen.output.len(), "ir emitted");
    Ok(codegen.output)
}

struct Codegen<'a> {
    input: &'a EmitInputs<'a>,
    output: String,
}

impl<'a> Codegen<'a> {
    fn new(input: &'a EmitInputs<'a>) -> Self {
        Self {
            input,
            output: String::new(),
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.output.push_str(text.as_ref());
        self.output.push('\n');
    }

    fn emit_module(&mut self) -> Result<(), EmitError> {
        let input = self.input;
        let program = input.program;
        let globals = self.resolve_globals()?;
        let selectors = collect_selectors(program);

        self.emit_header();
        self.emit_metadata(&input.surface.summaries);

        let global_names: BTreeSet<String> = globals.iter().map(|(n, _)| n.clone()).collect();
        let env = ModuleEnv {
            functions: &input.surface.functions,
            globals: &global_names,
            selectors: &selectors,
            proofs: input.proofs,
            boundary: input.boundary,
        };

        let mut bodies = String::new();
        let mut dispatch_used = false;
        let mut trap_used = false;
        let mut defined = BTreeSet::new();
        for func in &program.functions {
            let Some(body) = &func.body else {
                continue;
            };
            if !defined.insert(func.name.as_str()) {
                continue;
            }
            let ret = func.return_type.value_type();
            let mut emitter = FnEmitter::new(&env, ret);
            emitter.emit_prologue(&func.params);
            emitter.emit_body(body);
            let params: Vec<String> = func
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{} %arg{}", param_llvm(p.ty.value_type()), i))
                .collect();
            dispatch_used |= emitter.dispatch_used;
            trap_used |= emitter.trap_used;
            render_function(
                &mut bodies,
                &format!("define {} @{}({}) {{", ret.llvm(), func.name, params.join(", ")),
                emitter,
            );
        }

        let mut methods_seen = BTreeSet::new();
        for (_, method, body) in program.method_bodies() {
            if !methods_seen.insert(method.symbols.ir_symbol.as_str()) {
                continue;
            }
            let mut emitter = FnEmitter::new(&env, ValueType::I32);
            emitter.emit_self_prologue();
            let params: Vec<_> = method.params().cloned().collect();
            emitter.emit_prologue_i32(&params);
            emitter.emit_body(body);
            let mut signature = format!("define i32 @{}(i32 %self, ptr %_cmd", method.symbols.ir_symbol);
            for i in 0..params.len() {
                signature.push_str(&format!(", i32 %arg{}", i));
            }
            signature.push_str(") {");
            dispatch_used |= emitter.dispatch_used;
            trap_used |= emitter.trap_used;
            render_function(&mut bodies, &signature, emitter);
        }

        let mut wrote = false;
        if dispatch_used {
            let decl = input.boundary.dispatch_declaration();
            self.line(decl);
            wrote = true;
        }
        if trap_used {
            self.line("declare void @llvm.trap()");
            wrote = true;
        }
        if wrote {
            self.line("");
        }

        if !globals.is_empty() {
            for (name, value) in &globals {
                self.line(format!("@{} = global i32 {}, align 4", name, value));
            }
            self.line("");
        }

        if !selectors.is_empty() {
            for (selector, global) in &selectors {
                self.line(format!(
                    "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\", align 1",
                    global.symbol,
                    global.len,
                    escape_c_string(selector)
                ));
            }
            self.line("");
        }

        let prototypes = self.prototypes();
        if !prototypes.is_empty() {
            for proto in prototypes {
                self.line(proto);
            }
            self.line("");
        }

        self.output.push_str(&bodies);
        self.emit_entry_point(&globals);
        Ok(())
    }

    /// Folds every initializer; a later duplicate of a name is not emitted again.
    fn resolve_globals(&self) -> Result<Vec<(String, i32)>, EmitError> {
        let decls = &self.input.program.globals;
        let values = resolve_global_values(decls).map_err(|idx| EmitError::GlobalInitializer {
            name: decls.get(idx).map(|g| g.name.clone()).unwrap_or_default(),
        })?;
        let mut seen = BTreeSet::new();
        Ok(decls
            .iter()
            .zip(values)
            .filter(|(g, _)| seen.insert(g.name.clone()))
            .map(|(g, v)| (g.name.clone(), v))
            .collect())
    }

    fn emit_header(&mut self) {
        let input = self.input;
        self.line("; objc3c native frontend IR");
        self.line(format!("; lowering_ir_boundary = {}", input.boundary.replay_key()));
        self.line(format!("; runtime_dispatch_decl = {}", input.boundary.dispatch_declaration()));
        for contract in input.contracts.entries() {
            self.line(format!("; {}_lowering = {}", contract.area(), contract.replay_key()));
        }
        self.line(format!("; frontend_profile = {}", input.frontend.header()));
        for (profile, entries) in input.surface.summaries.profiles() {
            let rendered: Vec<String> = entries.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            self.line(format!("; frontend_objc_{}_profile = {}", profile, rendered.join(", ")));
        }
        self.line(format!("source_filename = \"{}.objc3\"", input.program.module_name));
        self.line("");
    }

    fn emit_metadata(&mut self, summaries: &FrontendSummaries) {
        let profiles = summaries.profiles();
        self.line("!objc3.frontend = !{!0}");
        for (i, (profile, _)) in profiles.iter().enumerate() {
            self.line(format!("!objc3.objc_{} = !{{!{}}}", profile, i + 1));
        }
        let f = self.input.frontend;
        self.line(format!(
            "!0 = !{{i32 {}, !\"{}\", i1 {}, i64 {}, i64 {}, i64 {}, i64 {}}}",
            f.language_version,
            f.compatibility_mode.label(),
            f.migration_assist as u8,
            f.hints.legacy_yes,
            f.hints.legacy_no,
            f.hints.legacy_null,
            f.hints.legacy_total()
        ));
        for (i, (_, entries)) in profiles.iter().enumerate() {
            let operands: Vec<String> = entries
                .iter()
                .map(|(_, v)| match v.as_str() {
                    "true" => "i1 1".to_string(),
                    "false" => "i1 0".to_string(),
                    n => format!("i64 {}", n),
                })
                .collect();
            self.line(format!("!{} = !{{{}}}", i + 1, operands.join(", ")));
        }
        self.line("");
    }

    fn prototypes(&self) -> Vec<String> {
        let program = self.input.program;
        let defined: BTreeSet<&str> = program
            .functions
            .iter()
            .filter(|f| f.body.is_some())
            .map(|f| f.name.as_str())
            .collect();
        let mut seen = BTreeSet::new();
        program
            .functions
            .iter()
            .filter(|f| !defined.contains(f.name.as_str()) && seen.insert(f.name.as_str()))
            .map(prototype)
            .collect()
    }

    fn emit_entry_point(&mut self, globals: &[(String, i32)]) {
        self.line(format!("define i32 @{}() {{", ENTRY_SYMBOL));
        self.line("entry:");
        let main = self
            .input
            .program
            .functions
            .iter()
            .find(|f| f.name == "main" && f.body.is_some() && f.params.is_empty());
        match main.map(|f| f.return_type.value_type()) {
            Some(ValueType::I32) => {
                self.line("  %call_main = call i32 @main()");
                self.line("  ret i32 %call_main");
            }
            Some(ValueType::Bool) => {
                self.line("  %call_main = call i1 @main()");
                self.line("  %call_main_i32 = zext i1 %call_main to i32");
                self.line("  ret i32 %call_main_i32");
            }
            Some(ValueType::Void) => {
                self.line("  call void @main()");
                self.line("  ret i32 0");
            }
            None => {
                let mut acc = "0".to_string();
                for (i, (name, _)) in globals.iter().enumerate() {
                    self.line(format!("  %entry_load_{} = load i32, ptr @{}, align 4", i, name));
                    self.line(format!("  %entry_sum_{} = add i32 {}, %entry_load_{}", i, acc, i));
                    acc = format!("%entry_sum_{}", i);
                }
                self.line(format!("  ret i32 {}", acc));
            }
        }
        self.line("}");
    }
}

fn param_llvm(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Bool => "i1",
        _ => "i32",
    }
}

fn prototype(func: &FunctionDecl) -> String {
    let params: Vec<&str> = func.params.iter().map(|p| param_llvm(p.ty.value_type())).collect();
    format!(
        "declare {} @{}({})",
        func.return_type.value_type().llvm(),
        func.name,
        params.join(", ")
    )
}

fn render_function(out: &mut String, signature: &str, emitter: FnEmitter<'_>) {
    out.push_str(signature);
    out.push('\n');
    for block in emitter.blocks {
        out.push_str(&format!("{}:\n", block.name));
        for instr in block.instrs {
            out.push_str("  ");
            out.push_str(&instr);
            out.push('\n');
        }
    }
    out.push_str("}\n\n");
}

/// Every selector sent outside a block literal, in lexicographic order.
fn collect_selectors(program: &Program) -> BTreeMap<String, SelectorGlobal> {
    let mut names = BTreeSet::new();
    let mut visit = |e: &crate::frontend::ast::Expr| {
        if let ExprKind::MessageSend(send) = &e.kind {
            names.insert(send.selector.clone());
        }
    };
    for func in &program.functions {
        if let Some(body) = &func.body {
            each_block_expr(body, &mut visit);
        }
    }
    for (_, _, body) in program.method_bodies() {
        each_block_expr(body, &mut visit);
    }
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let global = SelectorGlobal {
                symbol: selector_pool_symbol(i),
                len: name.len() + 1,
            };
            (name, global)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::diagnostic::DiagnosticsBus;
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};
    use crate::lower::{ContractInputs, DiagnosticCounts, LoweringContract, build_contracts, normalize};
    use crate::sema::{SemaOptions, run_passes};

    fn emit(src: &str) -> Result<String, EmitError> {
        let lexed = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist: false,
            },
        );
        let hints = lexed.hints;
        let program = parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        )
        .program;
        let mut bus = DiagnosticsBus::default();
        let sema = run_passes(
            &program,
            &SemaOptions {
                max_message_send_args: 4,
                compatibility_mode: CompatibilityMode::Canonical,
                migration_assist: false,
                hints,
            },
            &mut bus,
        );
        let boundary = normalize(&LoweringContract::default()).expect("default contract");
        let contracts = build_contracts(&ContractInputs {
            surface: &sema.surface,
            facts: &sema.bodies.facts,
            boundary: &boundary,
            handoff_replay_key: &sema.handoff_replay_key,
            diagnostics: DiagnosticCounts::default(),
            sema_ready: sema.parity.ready,
        });
        emit_ir(&EmitInputs {
            program: &program,
            surface: &sema.surface,
            proofs: &sema.bodies.proofs,
            boundary: &boundary,
            contracts: &contracts,
            frontend: FrontendProfile {
                language_version: 3,
                compatibility_mode: CompatibilityMode::Canonical,
                migration_assist: false,
                hints,
            },
        })
    }

    #[test]
    fn header_lines_come_first() {
        let ir = emit("fn main() -> i32 { return 0; }").expect("emits");
        let lines: Vec<&str> = ir.lines().collect();
        assert_eq!(lines[0], "; objc3c native frontend IR");
        assert!(lines[1].starts_with("; lowering_ir_boundary = runtime_dispatch_symbol=objc3_msgsend_i32;"));
        assert_eq!(
            lines[2],
            "; runtime_dispatch_decl = declare i32 @objc3_msgsend_i32(i32, ptr, i32, i32, i32, i32)"
        );
        assert!(lines[3].starts_with("; method_lookup_override_conflict_lowering = "));
        assert!(ir.contains(
            "; frontend_profile = language_version=3, compatibility_mode=canonical, migration_assist=false, migration_legacy_total=0\n"
        ));
        assert!(ir.contains("source_filename = \"objc3_module.objc3\"\n"));
        assert!(ir.contains("!objc3.frontend = !{!0}\n"));
        assert!(ir.contains("!0 = !{i32 3, !\"canonical\", i1 0, i64 0, i64 0, i64 0, i64 0}\n"));
    }

    #[test]
    fn entry_calls_nullary_main() {
        let ir = emit("fn main() -> i32 { return 7; }").expect("emits");
        assert!(ir.contains("define i32 @main() {\nentry:\n  ret i32 7\n}\n"));
        assert!(ir.ends_with("define i32 @objc3c_entry() {\nentry:\n  %call_main = call i32 @main()\n  ret i32 %call_main\n}\n"));
        assert!(!ir.contains("declare i32 @objc3_msgsend_i32"));
    }

    #[test]
    fn entry_sums_globals_without_main() {
        let ir = emit("let a = 2;\nlet b = a * 3;\n").expect("emits");
        assert!(ir.contains("@a = global i32 2, align 4\n@b = global i32 6, align 4\n"));
        assert!(ir.contains("  %entry_sum_1 = add i32 %entry_sum_0, %entry_load_1\n  ret i32 %entry_sum_1\n"));
    }

    #[test]
    fn nil_literal_send_folds_without_dispatch() {
        let ir = emit("fn f() -> i32 { return [nil ping]; }").expect("emits");
        assert!(ir.contains("define i32 @f() {\nentry:\n  ret i32 0\n}\n"));
        assert!(!ir.contains("declare i32 @objc3_msgsend_i32"));
        assert!(ir.contains("@.objc3.sel.0 = private unnamed_addr constant [5 x i8] c\"ping\\00\", align 1\n"));
    }

    #[test]
    fn unknown_receiver_gets_nil_guard() {
        let ir = emit("fn f(x: i32) -> i32 { return [x value]; }").expect("emits");
        assert!(ir.contains("declare i32 @objc3_msgsend_i32(i32, ptr, i32, i32, i32, i32)\n"));
        assert!(ir.contains("icmp eq i32 %t0, 0"));
        assert!(ir.contains("call i32 @objc3_msgsend_i32(i32 %t0, ptr %t1, i32 0, i32 0, i32 0, i32 0)"));
        assert!(ir.contains("phi i32 [ 0, %msg_nil_0 ], [ %t3, %msg_dispatch_1 ]"));
    }

    #[test]
    fn prototypes_declare_bool_params_as_i1() {
        let ir = emit("extern fn ready(flag: bool) -> bool;\nfn main() -> i32 { return 0; }").expect("emits");
        assert!(ir.contains("declare i1 @ready(i1)\n"));
    }

    #[test]
    fn inconsistent_contract_blocks_emission() {
        let program = Program::default();
        let (surface, _) = crate::sema::surface::build_integration_surface(&program);
        let boundary = normalize(&LoweringContract::default()).expect("default contract");
        let mut contracts = LoweringContracts::default();
        contracts.nil_receiver.receiver_nil_literal_sites = 3;
        let proofs = BTreeMap::new();
        let err = emit_ir(&EmitInputs {
            program: &program,
            surface: &surface,
            proofs: &proofs,
            boundary: &boundary,
            contracts: &contracts,
            frontend: FrontendProfile {
                language_version: 3,
                compatibility_mode: CompatibilityMode::Canonical,
                migration_assist: false,
                hints: MigrationHints::default(),
            },
        })
        .expect_err("nil literal sites exceed message sends");
        assert_eq!(err, EmitError::InvalidContract("nil_receiver_semantics_foldability"));
    }
}
