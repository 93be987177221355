use super::consteval::{Bindings, block_always_returns, eval_scalar, eval_with, fold_binary, is_bool_like_literal};
use super::surface::IntegrationSurface;
use super::visit::{contains_expr, each_assignment, each_stmt, has_side_effects};
use crate::frontend::ast::*;
use crate::frontend::diagnostic::Diagnostics;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// `(name, arity, returns a value)`.
pub const INTRINSICS: [(&str, usize, bool); 4] = [
    ("__builtin_assume", 1, false),
    ("__builtin_expect", 2, true),
    ("__builtin_trap", 0, false),
    ("__builtin_unreachable", 0, false),
];

pub fn intrinsic(name: &str) -> Option<(usize, bool)> {
    INTRINSICS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, arity, value)| (*arity, *value))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ty {
    I32,
    Bool,
    Void,
    Function,
    Unknown,
}

impl Ty {
    fn of(v: ValueType) -> Self {
        match v {
            ValueType::I32 => Ty::I32,
            ValueType::Bool => Ty::Bool,
            ValueType::Void => Ty::Void,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Ty::I32 => "i32",
            Ty::Bool => "bool",
            Ty::Void => "void",
            Ty::Function => "function",
            Ty::Unknown => "unknown",
        }
    }

    /// i32 and bool both convert to a truth value or a dispatch word.
    fn scalar(self) -> bool {
        matches!(self, Ty::I32 | Ty::Bool | Ty::Unknown)
    }

    fn is_i32(self) -> bool {
        matches!(self, Ty::I32 | Ty::Unknown)
    }
}

fn accepts(expected: Ty, got: Ty, expr: Option<&Expr>) -> bool {
    if expected == Ty::Unknown || got == Ty::Unknown || expected == got {
        return true;
    }
    match (expected, got) {
        (Ty::I32, Ty::Bool) => true,
        (Ty::Bool, Ty::I32) => expr.is_some_and(is_bool_like_literal),
        _ => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverProof {
    NilLiteral,
    ProvenNil,
    ProvenNonNil,
    Unknown,
    NilWithSideEffects,
}

impl ReceiverProof {
    /// Folded sends evaluate to 0 without a runtime call.
    pub fn is_foldable(self) -> bool {
        matches!(self, ReceiverProof::NilLiteral | ReceiverProof::ProvenNil)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendFact {
    pub id: ExprId,
    pub selector: String,
    pub form: SelectorForm,
    pub pieces: usize,
    pub args: usize,
    pub receiver_kind: ReceiverKind,
    pub family: MethodFamily,
    pub slots: DispatchSlots,
    pub proof: ReceiverProof,
    pub in_method: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockFact {
    pub params: usize,
    pub captures: usize,
    pub mutable_captures: usize,
    pub statements: usize,
    pub escapes: bool,
    pub unresolved_captures: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodyFacts {
    pub sends: Vec<SendFact>,
    pub blocks: Vec<BlockFact>,
    pub super_violations: usize,
    pub nil_side_effect_violations: usize,
    pub async_functions: usize,
    pub suspending_functions: usize,
    pub await_sites: usize,
    pub valid_await_points: usize,
    pub await_violations: usize,
    pub async_call_sites: usize,
    pub awaited_async_calls: usize,
    pub async_calls_in_throws: usize,
    pub sendability_checks: usize,
    pub non_sendable_captures: usize,
    pub throws_call_sites: usize,
    pub propagated_throws_calls: usize,
    pub unpropagated_throws_calls: usize,
    pub ns_error_bridged_params: usize,
    pub ns_error_failable_functions: usize,
    pub ns_error_violations: usize,
    pub result_sites: usize,
    pub result_success_sites: usize,
    pub result_failure_sites: usize,
    pub result_branch_sites: usize,
    pub autoreleasepool_scopes: usize,
    pub autoreleasepool_max_depth: usize,
    pub intrinsic_sites: usize,
    pub governed_intrinsic_sites: usize,
    pub race_guard_sites: usize,
    pub race_guard_blocked: usize,
    pub race_guard_proofs: usize,
    pub shadowing_sites: usize,
    pub global_writes: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct BodyOptions {
    pub max_message_send_args: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BodyReport {
    pub diags: Diagnostics,
    pub facts: BodyFacts,
    /// Keyed by message-send expression id; the emitter folds exactly the foldable entries.
    pub proofs: BTreeMap<ExprId, ReceiverProof>,
}

/// Globals never assigned anywhere keep their folded initializer values.
pub fn immutable_global_values(program: &Program) -> Bindings {
    let mut assigned = BTreeSet::new();
    let bodies = program
        .functions
        .iter()
        .filter_map(|f| f.body.as_ref())
        .chain(program.method_bodies().map(|(_, _, b)| b));
    for body in bodies {
        each_assignment(&body.stmts, &mut |a| {
            assigned.insert(a.name.clone());
        });
    }
    let mut folded = Bindings::new();
    for global in &program.globals {
        if let Some(v) = eval_with(&global.value, &folded) {
            folded.entry(global.name.clone()).or_insert(v);
        }
    }
    folded.retain(|name, _| !assigned.contains(name));
    folded
}

/// Globals plus never-reassigned, singly-declared lets with constant initializers.
pub fn function_static_bindings<'a>(
    params: impl Iterator<Item = &'a str>,
    body: &Block,
    globals: &Bindings,
) -> Bindings {
    let mut bindings = globals.clone();
    for p in params {
        bindings.remove(p);
    }
    let mut assigned = BTreeSet::new();
    each_assignment(&body.stmts, &mut |a| {
        assigned.insert(a.name.clone());
    });
    let mut declared: BTreeMap<String, usize> = BTreeMap::new();
    each_stmt(&body.stmts, &mut |s| {
        if let Stmt::Let { name, .. } = s {
            *declared.entry(name.clone()).or_default() += 1;
        }
    });
    each_stmt(&body.stmts, &mut |s| {
        let Stmt::Let { name, value, .. } = s else {
            return;
        };
        let single = declared.get(name).copied() == Some(1);
        match eval_with(value, &bindings) {
            Some(v) if single && !assigned.contains(name) => {
                bindings.insert(name.clone(), v);
            }
            _ => {
                bindings.remove(name);
            }
        }
    });
    bindings
}

pub fn validate_bodies(program: &Program, surface: &IntegrationSurface, options: BodyOptions) -> BodyReport {
    let immune = immutable_global_values(program);
    let mut v = Validator {
        surface,
        options,
        immune,
        frames: Vec::new(),
        ctx: None,
        loop_depth: 0,
        switch_depth: 0,
        block_depth: 0,
        pool_depth: 0,
        branch_depth: 0,
        escape_site: false,
        report: BodyReport::default(),
    };
    for f in &program.functions {
        v.function(f);
    }
    for (_, method, body) in program.method_bodies() {
        v.method(method, body);
    }
    v.report
}

#[derive(Clone, Debug)]
struct Local {
    ty: Ty,
    value: Option<i32>,
}

type Frame = BTreeMap<String, Local>;

struct BodyContext {
    label: String,
    return_type: Ty,
    is_async: bool,
    is_throws: bool,
    is_method: bool,
    has_await: bool,
    awaited: bool,
}

struct Validator<'a> {
    surface: &'a IntegrationSurface,
    options: BodyOptions,
    immune: Bindings,
    frames: Vec<Frame>,
    ctx: Option<BodyContext>,
    loop_depth: usize,
    switch_depth: usize,
    block_depth: usize,
    pool_depth: usize,
    branch_depth: usize,
    escape_site: bool,
    report: BodyReport,
}

impl<'a> Validator<'a> {
    fn diag(&mut self, code: &'static str, message: String, span: &Span) {
        self.report.diags.push(code, message, span.clone());
    }

    fn label(&self) -> String {
        self.ctx.as_ref().map(|c| c.label.clone()).unwrap_or_default()
    }

    fn in_async(&self) -> bool {
        self.block_depth == 0 && self.ctx.as_ref().is_some_and(|c| c.is_async)
    }

    fn in_throws(&self) -> bool {
        self.block_depth == 0 && self.ctx.as_ref().is_some_and(|c| c.is_throws)
    }

    fn in_method(&self) -> bool {
        self.ctx.as_ref().is_some_and(|c| c.is_method)
    }

    fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    fn lookup_local_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.frames.iter_mut().rev().find_map(|f| f.get_mut(name))
    }

    fn value_of(&self, expr: &Expr) -> Option<i32> {
        let frames = &self.frames;
        let immune = &self.immune;
        eval_scalar(expr, &|name| {
            match frames.iter().rev().find_map(|f| f.get(name)) {
                Some(local) => local.value,
                None => immune.get(name).copied(),
            }
        })
    }

    fn invalidate_all(&mut self) {
        for frame in &mut self.frames {
            for local in frame.values_mut() {
                local.value = None;
            }
        }
    }

    fn invalidate(&mut self, names: &BTreeSet<String>) {
        for frame in &mut self.frames {
            for (name, local) in frame.iter_mut() {
                if names.contains(name) {
                    local.value = None;
                }
            }
        }
    }

    /// Drops facts a region may change: its assigned names, or everything when it calls out.
    fn invalidate_region(&mut self, stmts: &[Stmt], extra: &[&Expr]) {
        let calls = contains_expr(stmts, &|e| super::visit::is_effectful(e))
            || extra.iter().any(|e| has_side_effects(e));
        if calls {
            self.invalidate_all();
            return;
        }
        let mut assigned = BTreeSet::new();
        each_assignment(stmts, &mut |a| {
            assigned.insert(a.name.clone());
        });
        self.invalidate(&assigned);
    }

    fn declare(&mut self, name: &str, ty: Ty, value: Option<i32>, span: &Span, what: &str) {
        let shadows = self.lookup_local(name).is_some() || self.surface.globals.contains_key(name);
        if self.frames.last().is_some_and(|f| f.contains_key(name)) {
            self.diag("O3S201", format!("duplicate {} '{}'", what, name), span);
            return;
        }
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        frame.insert(name.to_string(), Local { ty, value });
        if shadows {
            self.report.facts.shadowing_sites += 1;
        }
    }

    fn function(&mut self, f: &FunctionDecl) {
        let out_params: Vec<&Param> = f.params.iter().filter(|p| p.ty.shape.ns_error_out_parameter).collect();
        if f.is_throws {
            for p in &out_params {
                self.report.facts.ns_error_violations += 1;
                self.diag(
                    "O3S206",
                    format!(
                        "type mismatch: throwing function '{}' must not declare NSError out-parameter '{}'",
                        f.name, p.name
                    ),
                    &p.span,
                );
            }
        } else {
            self.report.facts.ns_error_bridged_params += out_params.len();
            if !out_params.is_empty() && f.return_type.value_type() == ValueType::Bool {
                self.report.facts.ns_error_failable_functions += 1;
            }
        }
        if f.is_async {
            self.report.facts.async_functions += 1;
        }
        let Some(body) = &f.body else {
            return;
        };
        self.ctx = Some(BodyContext {
            label: format!("function '{}'", f.name),
            return_type: Ty::of(f.return_type.value_type()),
            is_async: f.is_async,
            is_throws: f.is_throws,
            is_method: false,
            has_await: contains_expr(&body.stmts, &|e| matches!(e.kind, ExprKind::Await(_))),
            awaited: false,
        });
        self.frames = vec![Frame::new()];
        for p in &f.params {
            self.declare(&p.name, Ty::of(p.ty.value_type()), None, &p.span, "parameter");
        }
        self.stmts(&body.stmts);
        self.finish_body(
            f.params.iter().map(|p| p.name.as_str()),
            body,
            &f.span,
        );
    }

    fn method(&mut self, m: &MethodDecl, body: &Block) {
        self.ctx = Some(BodyContext {
            label: format!("method '{}'", m.symbols.selector),
            return_type: Ty::of(m.return_type.value_type()),
            is_async: false,
            is_throws: false,
            is_method: true,
            has_await: false,
            awaited: false,
        });
        let mut receiver = Frame::new();
        for name in ["self", "_cmd"] {
            receiver.insert(name.to_string(), Local { ty: Ty::I32, value: None });
        }
        self.frames = vec![receiver, Frame::new()];
        for p in m.params() {
            self.declare(&p.name, Ty::of(p.ty.value_type()), None, &p.span, "parameter");
        }
        self.stmts(&body.stmts);
        self.finish_body(m.params().map(|p| p.name.as_str()), body, &m.span);
    }

    fn finish_body<'p>(&mut self, params: impl Iterator<Item = &'p str>, body: &Block, span: &Span) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        if ctx.is_async && ctx.awaited {
            self.report.facts.suspending_functions += 1;
        }
        if ctx.return_type != Ty::Void {
            let bindings = function_static_bindings(params, body, &self.immune);
            if !block_always_returns(&body.stmts, &bindings) {
                self.diag("O3S205", format!("missing return path in {}", ctx.label), span);
            }
        }
        self.frames.clear();
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            self.stmt(s);
        }
    }

    fn scoped(&mut self, stmts: &[Stmt]) {
        self.frames.push(Frame::new());
        self.stmts(stmts);
        self.frames.pop();
    }

    /// Walks one branch without letting its bindings leak into the fallthrough state.
    fn branch(&mut self, stmts: &[Stmt]) {
        let snapshot = self.frames.clone();
        self.branch_depth += 1;
        self.scoped(stmts);
        self.branch_depth -= 1;
        self.frames = snapshot;
    }

    fn condition(&mut self, cond: &Expr, what: &str, span: &Span) {
        let ty = self.expr(cond);
        if !ty.scalar() {
            self.diag(
                "O3S206",
                format!("type mismatch: {} condition must be bool-compatible", what),
                span,
            );
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Let { name, value, span } => self.let_stmt(name, value, span),
            Stmt::Assign(a) => self.assign(a),
            Stmt::Return { value, span } => self.ret(value.as_ref(), span),
            Stmt::Expr { expr, .. } => {
                self.expr(expr);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                span,
            } => {
                self.condition(cond, "if", span);
                self.branch(&then_body.stmts);
                if let Some(b) = else_body {
                    self.branch(&b.stmts);
                }
                self.invalidate_region(&then_body.stmts, &[]);
                if let Some(b) = else_body {
                    self.invalidate_region(&b.stmts, &[]);
                }
            }
            Stmt::While { cond, body, span } => {
                self.invalidate_region(&body.stmts, &[cond]);
                self.condition(cond, "while", span);
                self.loop_body(&body.stmts);
            }
            Stmt::DoWhile { body, cond, span } => {
                self.invalidate_region(&body.stmts, &[cond]);
                self.loop_body(&body.stmts);
                self.condition(cond, "do-while", span);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                span,
            } => {
                self.frames.push(Frame::new());
                self.for_clause(init);
                let mut region = body.stmts.clone();
                if let ForClause::Assign(a) = step {
                    region.push(Stmt::Assign(a.clone()));
                }
                let mut extra: Vec<&Expr> = cond.iter().collect();
                if let ForClause::Expr(e) = step {
                    extra.push(e);
                }
                self.invalidate_region(&region, &extra);
                let snapshot = self.frames.clone();
                if let Some(c) = cond {
                    self.condition(c, "for", span);
                }
                self.for_clause(step);
                self.loop_body(&body.stmts);
                self.frames = snapshot;
                self.frames.pop();
            }
            Stmt::Switch {
                scrutinee,
                cases,
                span,
            } => self.switch(scrutinee, cases, span),
            Stmt::Break { span } => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    self.diag("O3S212", "loop-control misuse: 'break' outside loop".to_string(), span);
                }
            }
            Stmt::Continue { span } => {
                if self.loop_depth == 0 {
                    self.diag("O3S213", "loop-control misuse: 'continue' outside loop".to_string(), span);
                }
            }
            Stmt::Empty { .. } => {}
            Stmt::Block(b) => self.scoped(&b.stmts),
            Stmt::AutoreleasePool { body, .. } => {
                self.pool_depth += 1;
                let facts = &mut self.report.facts;
                facts.autoreleasepool_scopes += 1;
                facts.autoreleasepool_max_depth = facts.autoreleasepool_max_depth.max(self.pool_depth);
                self.scoped(&body.stmts);
                self.pool_depth -= 1;
            }
        }
    }

    fn loop_body(&mut self, stmts: &[Stmt]) {
        let snapshot = self.frames.clone();
        self.loop_depth += 1;
        self.branch_depth += 1;
        self.scoped(stmts);
        self.branch_depth -= 1;
        self.loop_depth -= 1;
        self.frames = snapshot;
    }

    fn for_clause(&mut self, clause: &ForClause) {
        match clause {
            ForClause::None => {}
            ForClause::Let { name, value, span } => self.let_stmt(name, value, span),
            ForClause::Assign(a) => self.assign(a),
            ForClause::Expr(e) => {
                self.expr(e);
            }
        }
    }

    fn switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase], span: &Span) {
        let ty = self.expr(scrutinee);
        if !ty.scalar() {
            self.diag(
                "O3S206",
                "type mismatch: switch condition must be i32-compatible".to_string(),
                span,
            );
        }
        let mut seen = BTreeSet::new();
        let mut seen_default = false;
        for case in cases {
            match &case.label {
                None => {
                    if seen_default {
                        self.diag(
                            "O3S206",
                            "type mismatch: duplicate default label in switch".to_string(),
                            &case.span,
                        );
                    }
                    seen_default = true;
                }
                Some(label) => match eval_with(label, &self.immune) {
                    Some(v) => {
                        if !seen.insert(v) {
                            self.diag(
                                "O3S206",
                                format!("type mismatch: duplicate case label '{}' in switch", v),
                                &label.span,
                            );
                        }
                    }
                    None => self.diag(
                        "O3S206",
                        "type mismatch: case label must be a constant expression".to_string(),
                        &label.span,
                    ),
                },
            }
        }
        self.switch_depth += 1;
        for case in cases {
            self.branch(&case.body);
        }
        self.switch_depth -= 1;
        for case in cases {
            self.invalidate_region(&case.body, &[]);
        }
    }

    fn let_stmt(&mut self, name: &str, value: &Expr, span: &Span) {
        let ty = self.expr(value);
        let ty = match ty {
            Ty::Void => {
                self.diag(
                    "O3S206",
                    format!("type mismatch: cannot bind void value to '{}'", name),
                    span,
                );
                Ty::Unknown
            }
            Ty::Function => Ty::Unknown,
            other => other,
        };
        let folded = self.value_of(value);
        self.declare(name, ty, folded, span, "declaration");
    }

    fn assign(&mut self, a: &Assignment) {
        let value_ty = a.value.as_ref().map(|v| self.expr(v));
        let target = match self.lookup_local(&a.name) {
            Some(local) => Some((local.ty, false)),
            None => self.surface.globals.get(&a.name).map(|ty| (Ty::of(*ty), true)),
        };
        let Some((target_ty, is_global)) = target else {
            let reason = if self.surface.functions.contains_key(&a.name) {
                "functions are not assignable"
            } else {
                "identifier is not declared"
            };
            self.diag(
                "O3S214",
                format!("invalid assignment target '{}': {}", a.name, reason),
                &a.span,
            );
            return;
        };
        let op = a.op.spelling();
        match (&a.op, value_ty) {
            (AssignOp::Set, Some(got)) => {
                if !accepts(target_ty, got, a.value.as_ref()) {
                    self.diag(
                        "O3S206",
                        format!(
                            "type mismatch: assignment to '{}' expects '{}', got '{}'",
                            a.name,
                            target_ty.name(),
                            got.name()
                        ),
                        &a.span,
                    );
                }
            }
            (AssignOp::Increment | AssignOp::Decrement, _) => {
                if !target_ty.is_i32() {
                    self.diag(
                        "O3S206",
                        format!(
                            "type mismatch: update operator '{}' target '{}' must be 'i32', got '{}'",
                            op,
                            a.name,
                            target_ty.name()
                        ),
                        &a.span,
                    );
                }
            }
            (AssignOp::Compound(_), got) => {
                if !target_ty.is_i32() {
                    self.diag(
                        "O3S206",
                        format!(
                            "type mismatch: compound assignment '{}' target '{}' must be 'i32', got '{}'",
                            op,
                            a.name,
                            target_ty.name()
                        ),
                        &a.span,
                    );
                }
                if let Some(got) = got.filter(|g| !g.is_i32()) {
                    self.diag(
                        "O3S206",
                        format!(
                            "type mismatch: compound assignment '{}' value for '{}' must be 'i32', got '{}'",
                            op,
                            a.name,
                            got.name()
                        ),
                        &a.span,
                    );
                }
            }
            (AssignOp::Set, None) => {}
        }

        let rhs = a.value.as_ref().and_then(|v| self.value_of(v));
        if is_global {
            self.report.facts.global_writes += 1;
            if self.in_async() {
                let awaited = self.ctx.as_ref().is_some_and(|c| c.awaited);
                let facts = &mut self.report.facts;
                facts.race_guard_sites += 1;
                if awaited {
                    facts.race_guard_blocked += 1;
                }
                if rhs.is_some() {
                    facts.race_guard_proofs += 1;
                }
            }
            return;
        }
        let Some(local) = self.lookup_local_mut(&a.name) else {
            return;
        };
        local.value = match &a.op {
            AssignOp::Set => rhs,
            AssignOp::Increment => local.value.and_then(|v| v.checked_add(1)),
            AssignOp::Decrement => local.value.and_then(|v| v.checked_sub(1)),
            AssignOp::Compound(op) => match (local.value, rhs) {
                (Some(l), Some(r)) => fold_binary(*op, l, r),
                _ => None,
            },
        };
    }

    fn ret(&mut self, value: Option<&Expr>, span: &Span) {
        if self.block_depth > 0 {
            if let Some(v) = value {
                self.escaping(v);
            }
            return;
        }
        let Some(expected) = self.ctx.as_ref().map(|c| c.return_type) else {
            return;
        };
        let label = self.label();
        match value {
            None if expected != Ty::Void => {
                self.diag(
                    "O3S211",
                    format!("type mismatch: {} must return '{}'", label, expected.name()),
                    span,
                );
            }
            None => {}
            Some(v) => {
                let got = self.escaping(v);
                if expected == Ty::Void {
                    self.diag(
                        "O3S211",
                        format!("type mismatch: void {} must use 'return;'", label),
                        span,
                    );
                } else if !accepts(expected, got, Some(v)) {
                    self.diag(
                        "O3S211",
                        format!(
                            "type mismatch: return expression in {} must be '{}', got '{}'",
                            label,
                            expected.name(),
                            got.name()
                        ),
                        span,
                    );
                }
                if self.in_throws() {
                    let folded = self.value_of(v);
                    let facts = &mut self.report.facts;
                    facts.result_sites += 1;
                    if folded == Some(0) {
                        facts.result_failure_sites += 1;
                    } else {
                        facts.result_success_sites += 1;
                    }
                    if self.branch_depth > 0 {
                        facts.result_branch_sites += 1;
                    }
                }
            }
        }
    }

    fn escaping(&mut self, e: &Expr) -> Ty {
        let prev = std::mem::replace(&mut self.escape_site, true);
        let ty = self.expr(e);
        self.escape_site = prev;
        ty
    }

    fn expr(&mut self, e: &Expr) -> Ty {
        match &e.kind {
            ExprKind::Number(_) | ExprKind::Nil => Ty::I32,
            ExprKind::Bool(_) => Ty::Bool,
            ExprKind::Ident(name) => self.ident(name, &e.span),
            ExprKind::Unary { op, expr } => {
                let ty = self.expr(expr);
                match op {
                    UnaryOp::Not => {
                        if !ty.scalar() {
                            self.diag(
                                "O3S206",
                                format!("type mismatch: expected bool for logical operand, got '{}'", ty.name()),
                                &e.span,
                            );
                        }
                        Ty::Bool
                    }
                    _ => {
                        if !ty.is_i32() {
                            self.diag(
                                "O3S206",
                                format!("type mismatch: expected i32 for unary operand, got '{}'", ty.name()),
                                &e.span,
                            );
                        }
                        Ty::I32
                    }
                }
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, &e.span),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let c = self.expr(cond);
                if !c.scalar() {
                    self.diag(
                        "O3S206",
                        "type mismatch: conditional condition must be bool-compatible".to_string(),
                        &e.span,
                    );
                }
                let t = self.expr(then_expr);
                let f = self.expr(else_expr);
                if t == Ty::Unknown || f == Ty::Unknown {
                    return if t == f { t } else if t == Ty::Unknown { f } else { t };
                }
                if !t.scalar() || !f.scalar() {
                    self.diag(
                        "O3S206",
                        "type mismatch: conditional branches must be type-compatible".to_string(),
                        &e.span,
                    );
                    return Ty::Unknown;
                }
                if t == f { t } else { Ty::I32 }
            }
            ExprKind::Call { callee, args } => self.call(callee, args, &e.span),
            ExprKind::MessageSend(send) => self.send(e.id, send, &e.span),
            ExprKind::BlockLiteral(block) => self.block_literal(block, &e.span),
            ExprKind::Await(inner) => self.await_expr(inner, &e.span),
        }
    }

    fn ident(&mut self, name: &str, span: &Span) -> Ty {
        if let Some(local) = self.lookup_local(name) {
            return local.ty;
        }
        if let Some(ty) = self.surface.globals.get(name) {
            return Ty::of(*ty);
        }
        if name == "super" && self.in_method() {
            self.diag(
                "O3S206",
                "type mismatch: 'super' is only valid as a message receiver".to_string(),
                span,
            );
            return Ty::Unknown;
        }
        if self.surface.functions.contains_key(name) {
            self.diag(
                "O3S206",
                format!("type mismatch: function '{}' cannot be used as a value", name),
                span,
            );
            return Ty::Function;
        }
        self.diag("O3S202", format!("undefined identifier '{}'", name), span);
        Ty::Unknown
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: &Span) -> Ty {
        let l = self.expr(left);
        let r = self.expr(right);
        if op.is_logical() {
            for (side, ty) in [("lhs", l), ("rhs", r)] {
                if !ty.scalar() {
                    self.diag(
                        "O3S206",
                        format!("type mismatch: expected bool for logical {}, got '{}'", side, ty.name()),
                        span,
                    );
                }
            }
            return Ty::Bool;
        }
        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            let compatible = l == Ty::Unknown
                || r == Ty::Unknown
                || (l == r && l.scalar())
                || (l == Ty::Bool && r == Ty::I32 && is_bool_like_literal(right))
                || (r == Ty::Bool && l == Ty::I32 && is_bool_like_literal(left));
            if !compatible {
                self.diag(
                    "O3S206",
                    format!("type mismatch: equality compares '{}' with '{}'", l.name(), r.name()),
                    span,
                );
            }
            return Ty::Bool;
        }
        let family = if op.is_comparison() {
            "relational"
        } else if matches!(
            op,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        ) {
            "bitwise"
        } else {
            "arithmetic"
        };
        for (side, ty) in [("lhs", l), ("rhs", r)] {
            if !ty.is_i32() {
                self.diag(
                    "O3S206",
                    format!("type mismatch: expected i32 for {} {}, got '{}'", family, side, ty.name()),
                    span,
                );
            }
        }
        if op.is_comparison() { Ty::Bool } else { Ty::I32 }
    }

    fn call(&mut self, callee: &str, args: &[Expr], span: &Span) -> Ty {
        if callee.starts_with("__builtin_") {
            return self.intrinsic_call(callee, args, span);
        }
        let arg_tys: Vec<Ty> = args.iter().map(|a| self.escaping(a)).collect();
        self.invalidate_all();
        let surface = self.surface;
        let Some(info) = surface.functions.get(callee) else {
            self.diag("O3S203", format!("unknown function '{}'", callee), span);
            return Ty::Unknown;
        };
        if info.arity != args.len() {
            self.diag("O3S204", format!("arity mismatch for function '{}'", callee), span);
        } else {
            let mut mismatches = Vec::new();
            for (i, (arg, got)) in args.iter().zip(&arg_tys).enumerate() {
                let expected = Ty::of(info.param_types[i]);
                if !info.param_invalid[i] && !accepts(expected, *got, Some(arg)) {
                    mismatches.push(format!(
                        "type mismatch: expected '{}' argument for parameter {} of '{}', got '{}'",
                        expected.name(),
                        i,
                        callee,
                        got.name()
                    ));
                }
            }
            for message in mismatches {
                self.diag("O3S206", message, span);
            }
        }
        let (is_throws, is_async, ret) = (info.is_throws, info.is_async, info.return_type);
        if is_throws {
            self.report.facts.throws_call_sites += 1;
            if self.in_throws() {
                self.report.facts.propagated_throws_calls += 1;
            } else {
                self.report.facts.unpropagated_throws_calls += 1;
                self.diag(
                    "O3S206",
                    format!(
                        "type mismatch: call to throwing function '{}' must appear in a throwing function",
                        callee
                    ),
                    span,
                );
            }
        }
        if is_async {
            self.report.facts.async_call_sites += 1;
            if self.in_throws() {
                self.report.facts.async_calls_in_throws += 1;
            }
        }
        Ty::of(ret)
    }

    fn intrinsic_call(&mut self, name: &str, args: &[Expr], span: &Span) -> Ty {
        self.report.facts.intrinsic_sites += 1;
        for arg in args {
            let ty = self.expr(arg);
            if !ty.scalar() {
                self.diag(
                    "O3S206",
                    format!("type mismatch: intrinsic '{}' arguments must be i32-compatible", name),
                    &arg.span,
                );
            }
        }
        match intrinsic(name) {
            None => {
                self.diag("O3S203", format!("unknown intrinsic '{}'", name), span);
                Ty::Unknown
            }
            Some((arity, _)) if arity != args.len() => {
                self.diag("O3S204", format!("arity mismatch for intrinsic '{}'", name), span);
                Ty::Unknown
            }
            Some((_, returns_value)) => {
                self.report.facts.governed_intrinsic_sites += 1;
                if returns_value { Ty::I32 } else { Ty::Void }
            }
        }
    }

    fn send(&mut self, id: ExprId, send: &MessageSend, span: &Span) -> Ty {
        let selector = &send.selector;
        let in_method = self.in_method();
        let receiver_ty = if send.receiver_kind == ReceiverKind::Super {
            if !in_method {
                self.report.facts.super_violations += 1;
                self.diag(
                    "O3S206",
                    format!(
                        "type mismatch: 'super' receiver for selector '{}' requires a method body",
                        selector
                    ),
                    span,
                );
            }
            Ty::I32
        } else {
            self.expr(&send.receiver)
        };
        if !receiver_ty.scalar() {
            self.diag(
                "O3S207",
                format!(
                    "type mismatch: message receiver for selector '{}' must be i32-compatible, got '{}'",
                    selector,
                    receiver_ty.name()
                ),
                span,
            );
        }
        let receiver_value = self.value_of(&send.receiver);
        let max = self.options.max_message_send_args;
        if send.args.len() > max {
            self.diag(
                "O3S208",
                format!(
                    "arity mismatch: message '{}' has {} argument(s); native frontend supports at most {}",
                    selector,
                    send.args.len(),
                    max
                ),
                span,
            );
        }
        for (i, arg) in send.args.iter().enumerate() {
            let ty = self.escaping(arg);
            if !ty.scalar() {
                self.diag(
                    "O3S209",
                    format!(
                        "type mismatch: message argument {} for selector '{}' must be i32-compatible, got '{}'",
                        i,
                        selector,
                        ty.name()
                    ),
                    &arg.span,
                );
            }
        }
        let effects = send.args.iter().any(has_side_effects);
        let proof = match send.receiver_kind {
            ReceiverKind::NilLiteral if effects => ReceiverProof::NilWithSideEffects,
            ReceiverKind::NilLiteral => ReceiverProof::NilLiteral,
            ReceiverKind::SelfRef | ReceiverKind::Super => ReceiverProof::ProvenNonNil,
            _ => match receiver_value {
                Some(0) if effects => ReceiverProof::NilWithSideEffects,
                Some(0) => ReceiverProof::ProvenNil,
                Some(_) => ReceiverProof::ProvenNonNil,
                None => ReceiverProof::Unknown,
            },
        };
        if proof == ReceiverProof::NilWithSideEffects {
            self.report.facts.nil_side_effect_violations += 1;
            self.diag(
                "O3S206",
                format!(
                    "type mismatch: nil receiver for selector '{}' cannot be folded over side-effecting arguments; runtime dispatch required",
                    selector
                ),
                span,
            );
        }
        if !proof.is_foldable() {
            self.invalidate_all();
        }
        self.report.proofs.insert(id, proof);
        self.report.facts.sends.push(SendFact {
            id,
            selector: selector.clone(),
            form: send.form,
            pieces: send.keywords.len(),
            args: send.args.len(),
            receiver_kind: send.receiver_kind,
            family: send.family,
            slots: send.slots,
            proof,
            in_method,
        });
        Ty::I32
    }

    fn block_literal(&mut self, block: &BlockLiteral, span: &Span) -> Ty {
        let escapes = self.escape_site;
        let unresolved = block
            .captures
            .iter()
            .filter(|c| self.lookup_local(c).is_none() && !self.surface.globals.contains_key(*c))
            .count();
        let mutated: BTreeSet<String> = block.mutable_captures.iter().cloned().collect();
        self.invalidate(&mutated);

        if self.in_async() && self.ctx.as_ref().is_some_and(|c| c.has_await) {
            self.report.facts.sendability_checks += block.captures.len();
            let label = self.label();
            for name in &block.mutable_captures {
                self.report.facts.non_sendable_captures += 1;
                self.diag(
                    "O3S206",
                    format!(
                        "type mismatch: block literal in {} captures mutable '{}' across a suspension point",
                        label, name
                    ),
                    span,
                );
            }
        }

        let outer = self.frames.clone();
        self.invalidate_all();
        let saved = (self.loop_depth, self.switch_depth, self.escape_site);
        self.loop_depth = 0;
        self.switch_depth = 0;
        self.escape_site = false;
        self.block_depth += 1;
        self.frames.push(Frame::new());
        for p in &block.params {
            self.declare(&p.name, Ty::of(p.ty.value_type()), None, &p.span, "parameter");
        }
        self.stmts(&block.body.stmts);
        self.block_depth -= 1;
        (self.loop_depth, self.switch_depth, self.escape_site) = saved;
        self.frames = outer;

        self.report.facts.blocks.push(BlockFact {
            params: block.params.len(),
            captures: block.captures.len(),
            mutable_captures: block.mutable_captures.len(),
            statements: block.body_statement_count,
            escapes,
            unresolved_captures: unresolved,
        });
        Ty::I32
    }

    fn await_expr(&mut self, inner: &Expr, span: &Span) -> Ty {
        self.report.facts.await_sites += 1;
        let ty = self.expr(inner);
        let surface = self.surface;
        let callee = match &inner.kind {
            ExprKind::Call { callee, .. } => surface.functions.get(callee).map(|f| (callee, f.is_async)),
            _ => None,
        };
        let message = if !self.in_async() {
            Some("type mismatch: 'await' is only valid inside an async function".to_string())
        } else if let Some((name, false)) = callee {
            Some(format!(
                "type mismatch: 'await' operand must call an async function, '{}' is not async",
                name
            ))
        } else {
            None
        };
        match message {
            Some(message) => {
                self.report.facts.await_violations += 1;
                self.diag("O3S206", message, span);
            }
            None => {
                self.report.facts.valid_await_points += 1;
                if matches!(callee, Some((_, true))) {
                    self.report.facts.awaited_async_calls += 1;
                }
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.awaited = true;
                }
            }
        }
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::{BodyOptions, BodyReport, ReceiverProof, validate_bodies};
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};
    use crate::sema::surface::build_integration_surface;

    fn run(src: &str) -> BodyReport {
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
        let (surface, _) = build_integration_surface(&out.program);
        validate_bodies(
            &out.program,
            &surface,
            BodyOptions {
                max_message_send_args: 4,
            },
        )
    }

    fn messages(src: &str) -> Vec<String> {
        run(src).diags.items.iter().map(|d| d.render()).collect()
    }

    fn proofs(src: &str) -> Vec<ReceiverProof> {
        run(src).proofs.values().copied().collect()
    }

    #[test]
    fn reports_core_type_errors() {
        let msgs = messages("fn f(a: bool) -> i32 {\n  let x = a + 1;\n  return y;\n}\n");
        assert_eq!(
            msgs,
            vec![
                "error:2:11: type mismatch: expected i32 for arithmetic lhs, got 'bool' [O3S206]",
                "error:3:10: undefined identifier 'y' [O3S202]",
            ]
        );
    }

    #[test]
    fn calls_check_arity_and_existence() {
        let msgs = messages("fn g(a: i32) -> i32 { return a; }\nfn f() -> i32 { g(); return h(1); }\n");
        assert!(msgs.iter().any(|m| m.ends_with("arity mismatch for function 'g' [O3S204]")));
        assert!(msgs.iter().any(|m| m.ends_with("unknown function 'h' [O3S203]")));
    }

    #[test]
    fn missing_return_uses_static_bindings() {
        let ok = messages("let on = 1;\nfn f() -> i32 { if (on) { return 1; } }\n");
        assert!(ok.is_empty(), "{:?}", ok);
        let bad = messages("let on = 1;\nfn f() -> i32 { on = 0; if (on) { return 1; } }\n");
        assert_eq!(bad, vec!["error:2:1: missing return path in function 'f' [O3S205]"]);
    }

    #[test]
    fn loop_control_outside_loop() {
        let msgs = messages("fn f() -> void { break; continue; }");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].ends_with("[O3S212]"));
        assert!(msgs[1].ends_with("[O3S213]"));
    }

    #[test]
    fn literal_nil_receiver_folds() {
        assert_eq!(
            proofs("fn f() -> i32 { return [nil ping]; }"),
            vec![ReceiverProof::NilLiteral]
        );
    }

    #[test]
    fn bindings_prove_nil_until_a_call() {
        let p = proofs(
            "fn g() -> i32 { return 1; }\nfn f() -> i32 {\n  let r = 0;\n  let a = [r ping];\n  g();\n  return [r ping] + a;\n}\n",
        );
        assert_eq!(p, vec![ReceiverProof::ProvenNil, ReceiverProof::Unknown]);
    }

    #[test]
    fn reassignment_rebinds_and_branches_invalidate() {
        let p = proofs(
            "fn f(c: bool) -> i32 {\n  let r = 0;\n  r = 7;\n  let a = [r ping];\n  if (c) { r = 0; }\n  return [r ping] + a;\n}\n",
        );
        assert_eq!(p, vec![ReceiverProof::ProvenNonNil, ReceiverProof::Unknown]);
    }

    #[test]
    fn nil_receiver_with_effectful_argument_is_rejected() {
        let src = "fn g() -> i32 { return 1; }\nfn f() -> i32 { return [nil put: g()]; }\n";
        let report = run(src);
        assert_eq!(report.facts.nil_side_effect_violations, 1);
        assert!(
            report.proofs.values().all(|p| *p == ReceiverProof::NilWithSideEffects),
            "{:?}",
            report.proofs
        );
    }

    #[test]
    fn await_rules() {
        let msgs = messages(
            "async fn fetch() -> i32 { return 1; }\nfn sync() -> i32 { return 2; }\nasync fn f() -> i32 { return await sync(); }\nfn g() -> i32 { return await fetch(); }\n",
        );
        assert!(msgs.iter().any(|m| m.contains("'sync' is not async")));
        assert!(msgs.iter().any(|m| m.contains("only valid inside an async function")));
    }

    #[test]
    fn unknown_intrinsic_and_arity() {
        let msgs = messages("fn f() -> i32 { __builtin_trap(1); return __builtin_nope(); }");
        assert!(msgs.iter().any(|m| m.ends_with("arity mismatch for intrinsic '__builtin_trap' [O3S204]")));
        assert!(msgs.iter().any(|m| m.ends_with("unknown intrinsic '__builtin_nope' [O3S203]")));
    }

    #[test]
    fn method_bodies_bind_self() {
        let src = "@interface C\n- (i32) me;\n@end\n@implementation C\n- (i32) me { return [self me]; }\n@end\n";
        let report = run(src);
        assert!(report.diags.is_empty(), "{:?}", report.diags);
        assert_eq!(report.facts.sends.len(), 1);
        assert!(report.facts.sends[0].in_method);
        assert_eq!(report.facts.sends[0].proof, ReceiverProof::ProvenNonNil);
    }
}
