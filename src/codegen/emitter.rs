use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::frontend::ast::{
    AssignOp, Assignment, BinaryOp, Block, Expr, ExprId, ExprKind, ForClause, MessageSend, Param, Stmt,
    SwitchCase, UnaryOp, ValueType,
};
use crate::lower::LoweringBoundary;
use crate::sema::bodies::ReceiverProof;
use crate::sema::surface::FunctionInfo;

/// One interned selector literal.
pub(crate) struct SelectorGlobal {
    pub(crate) symbol: String,
    /// Byte length including the trailing NUL.
    pub(crate) len: usize,
}

/// Module-wide facts every function body reads.
pub(crate) struct ModuleEnv<'a> {
    pub(crate) functions: &'a BTreeMap<String, FunctionInfo>,
    pub(crate) globals: &'a BTreeSet<String>,
    pub(crate) selectors: &'a BTreeMap<String, SelectorGlobal>,
    pub(crate) proofs: &'a BTreeMap<ExprId, ReceiverProof>,
    pub(crate) boundary: &'a LoweringBoundary,
}

pub(crate) struct BlockInsts {
    pub(crate) name: String,
    pub(crate) instrs: Vec<String>,
    pub(crate) terminated: bool,
}

struct Target {
    break_label: String,
    continue_label: Option<String>,
}

pub(crate) struct FnEmitter<'a> {
    env: &'a ModuleEnv<'a>,
    ret: ValueType,
    pub(crate) blocks: Vec<BlockInsts>,
    current: usize,
    temp_counter: usize,
    block_counter: usize,
    slot_counter: usize,
    scopes: Vec<HashMap<String, String>>,
    targets: Vec<Target>,
    self_slot: Option<String>,
    pub(crate) dispatch_used: bool,
    pub(crate) trap_used: bool,
}

impl<'a> FnEmitter<'a> {
    pub(crate) fn new(env: &'a ModuleEnv<'a>, ret: ValueType) -> Self {
        Self {
            env,
            ret,
            blocks: vec![BlockInsts {
                name: "entry".to_string(),
                instrs: Vec::new(),
                terminated: false,
            }],
            current: 0,
            temp_counter: 0,
            block_counter: 0,
            slot_counter: 0,
            scopes: vec![HashMap::new()],
            targets: Vec::new(),
            self_slot: None,
            dispatch_used: false,
            trap_used: false,
        }
    }

    fn emit(&mut self, instr: impl Into<String>) {
        let instr = instr.into();
        if instr.contains(" = alloca ") {
            self.emit_in_entry(instr);
            return;
        }
        let block = &mut self.blocks[self.current];
        if !block.terminated {
            block.instrs.push(instr);
        }
    }

    // Allocas stay ahead of the entry terminator so every slot dominates its uses.
    fn emit_in_entry(&mut self, instr: String) {
        let entry = &mut self.blocks[0];
        if entry.terminated {
            let len = entry.instrs.len();
            entry.instrs.insert(len.saturating_sub(1), instr);
        } else {
            entry.instrs.push(instr);
        }
    }

    fn terminate(&mut self, instr: impl Into<String>) {
        let block = &mut self.blocks[self.current];
        if !block.terminated {
            block.instrs.push(instr.into());
            block.terminated = true;
        }
    }

    fn current_block_terminated(&self) -> bool {
        self.blocks[self.current].terminated
    }

    fn current_name(&self) -> String {
        self.blocks[self.current].name.clone()
    }

    fn new_temp(&mut self) -> String {
        let name = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    fn new_block(&mut self, prefix: &str) -> String {
        let name = format!("{}{}", prefix, self.block_counter);
        self.block_counter += 1;
        name
    }

    fn add_block(&mut self, name: String) -> usize {
        self.blocks.push(BlockInsts {
            name,
            instrs: Vec::new(),
            terminated: false,
        });
        self.blocks.len() - 1
    }

    fn switch_to(&mut self, idx: usize) {
        self.current = idx;
    }

    fn new_slot(&mut self, name: &str) -> String {
        let slot = format!("%{}.addr.{}", name, self.slot_counter);
        self.slot_counter += 1;
        self.emit(format!("{} = alloca i32, align 4", slot));
        slot
    }

    fn bind(&mut self, name: &str, slot: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(slot) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return Some(slot.clone());
        }
        if matches!(name, "self" | "super") {
            return self.self_slot.clone();
        }
        if self.env.globals.contains(name) {
            return Some(format!("@{}", name));
        }
        None
    }

    /// Stores each incoming `%argN` into its own stack slot.
    pub(crate) fn emit_prologue(&mut self, params: &[Param]) {
        for (idx, param) in params.iter().enumerate() {
            let slot = self.new_slot(&param.name);
            let value = if param.ty.value_type() == ValueType::Bool {
                let widened = self.new_temp();
                self.emit(format!("{} = zext i1 %arg{} to i32", widened, idx));
                widened
            } else {
                format!("%arg{}", idx)
            };
            self.emit(format!("store i32 {}, ptr {}, align 4", value, slot));
            self.bind(&param.name, slot);
        }
    }

    /// Method arguments come through the dispatch shim, so every one is an `i32`.
    pub(crate) fn emit_prologue_i32(&mut self, params: &[Param]) {
        for (idx, param) in params.iter().enumerate() {
            let slot = self.new_slot(&param.name);
            self.emit(format!("store i32 %arg{}, ptr {}, align 4", idx, slot));
            self.bind(&param.name, slot);
        }
    }

    /// Method receivers arrive as `%self`; `super` reads the same slot.
    pub(crate) fn emit_self_prologue(&mut self) {
        let slot = self.new_slot("self");
        self.emit(format!("store i32 %self, ptr {}, align 4", slot));
        self.self_slot = Some(slot);
    }

    pub(crate) fn emit_body(&mut self, body: &Block) {
        self.emit_stmts(&body.stmts);
        let fallback = self.default_return();
        for block in &mut self.blocks {
            if !block.terminated {
                block.instrs.push(fallback.clone());
                block.terminated = true;
            }
        }
    }

    fn default_return(&self) -> String {
        match self.ret {
            ValueType::Void => "ret void".to_string(),
            other => format!("ret {} 0", other.llvm()),
        }
    }

    fn emit_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if self.current_block_terminated() {
                break;
            }
            self.emit_stmt(stmt);
        }
    }

    fn emit_scoped(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        self.emit_stmts(&block.stmts);
        self.scopes.pop();
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => self.emit_let(name, value),
            Stmt::Assign(assign) => self.emit_assign(assign),
            Stmt::Return { value, .. } => self.emit_return(value.as_ref()),
            Stmt::Expr { expr, .. } => {
                self.emit_expr(expr);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => self.emit_if(cond, then_body, else_body.as_ref()),
            Stmt::While { cond, body, .. } => self.emit_while(cond, body),
            Stmt::DoWhile { body, cond, .. } => self.emit_do_while(body, cond),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.scopes.push(HashMap::new());
                self.emit_for(init, cond.as_ref(), step, body);
                self.scopes.pop();
            }
            Stmt::Switch { scrutinee, cases, .. } => self.emit_switch(scrutinee, cases),
            Stmt::Break { .. } => match self.targets.last().map(|t| t.break_label.clone()) {
                Some(label) => self.terminate(format!("br label %{}", label)),
                None => {
                    let ret = self.default_return();
                    self.terminate(ret);
                }
            },
            Stmt::Continue { .. } => {
                match self.targets.iter().rev().find_map(|t| t.continue_label.clone()) {
                    Some(label) => self.terminate(format!("br label %{}", label)),
                    None => {
                        let ret = self.default_return();
                        self.terminate(ret);
                    }
                }
            }
            Stmt::Empty { .. } => {}
            Stmt::Block(block) => self.emit_scoped(block),
            Stmt::AutoreleasePool { body, .. } => self.emit_scoped(body),
        }
    }

    fn emit_let(&mut self, name: &str, value: &Expr) {
        let v = self.emit_expr(value);
        let slot = self.new_slot(name);
        self.emit(format!("store i32 {}, ptr {}, align 4", v, slot));
        self.bind(name, slot);
    }

    fn emit_assign(&mut self, assign: &Assignment) {
        let target = self.lookup(&assign.name);
        let value = match &assign.op {
            AssignOp::Set => match &assign.value {
                Some(v) => self.emit_expr(v),
                None => "0".to_string(),
            },
            AssignOp::Compound(op) => {
                let rhs = match &assign.value {
                    Some(v) => self.emit_expr(v),
                    None => "0".to_string(),
                };
                let Some(slot) = &target else {
                    return;
                };
                let current = self.load(slot);
                self.emit_arith(*op, &current, &rhs)
            }
            AssignOp::Increment | AssignOp::Decrement => {
                let Some(slot) = &target else {
                    return;
                };
                let current = self.load(slot);
                let op = if assign.op == AssignOp::Increment {
                    "add"
                } else {
                    "sub"
                };
                let t = self.new_temp();
                self.emit(format!("{} = {} i32 {}, 1", t, op, current));
                t
            }
        };
        if let Some(slot) = target {
            self.emit(format!("store i32 {}, ptr {}, align 4", value, slot));
        }
    }

    fn emit_clause(&mut self, clause: &ForClause) {
        match clause {
            ForClause::None => {}
            ForClause::Let { name, value, .. } => self.emit_let(name, value),
            ForClause::Assign(assign) => self.emit_assign(assign),
            ForClause::Expr(expr) => {
                self.emit_expr(expr);
            }
        }
    }

    fn emit_return(&mut self, value: Option<&Expr>) {
        let v = value.map(|e| self.emit_expr(e));
        match self.ret {
            ValueType::Void => self.terminate("ret void"),
            ValueType::I32 => {
                let v = v.unwrap_or_else(|| "0".to_string());
                self.terminate(format!("ret i32 {}", v));
            }
            ValueType::Bool => {
                let v = v.unwrap_or_else(|| "0".to_string());
                let b = self.truth(&v);
                self.terminate(format!("ret i1 {}", b));
            }
        }
    }

    fn emit_if(&mut self, cond: &Expr, then_body: &Block, else_body: Option<&Block>) {
        let c = self.emit_expr(cond);
        let c = self.truth(&c);
        let then_name = self.new_block("if_then_");
        let then_idx = self.add_block(then_name.clone());
        let Some(else_body) = else_body else {
            let end_name = self.new_block("if_end_");
            let end_idx = self.add_block(end_name.clone());
            self.terminate(format!("br i1 {}, label %{}, label %{}", c, then_name, end_name));
            self.switch_to(then_idx);
            self.emit_scoped(then_body);
            self.terminate(format!("br label %{}", end_name));
            self.switch_to(end_idx);
            return;
        };
        let else_name = self.new_block("if_else_");
        let else_idx = self.add_block(else_name.clone());
        self.terminate(format!("br i1 {}, label %{}, label %{}", c, then_name, else_name));

        self.switch_to(then_idx);
        self.emit_scoped(then_body);
        let then_open = !self.current_block_terminated();
        let then_tail = self.current;

        self.switch_to(else_idx);
        self.emit_scoped(else_body);
        let else_open = !self.current_block_terminated();
        let else_tail = self.current;

        if !then_open && !else_open {
            return;
        }
        let end_name = self.new_block("if_end_");
        let end_idx = self.add_block(end_name.clone());
        for tail in [then_tail, else_tail] {
            self.switch_to(tail);
            self.terminate(format!("br label %{}", end_name));
        }
        self.switch_to(end_idx);
    }

    fn emit_while(&mut self, cond: &Expr, body: &Block) {
        let cond_name = self.new_block("while_cond_");
        let body_name = self.new_block("while_body_");
        let end_name = self.new_block("while_end_");
        let cond_idx = self.add_block(cond_name.clone());
        let body_idx = self.add_block(body_name.clone());
        let end_idx = self.add_block(end_name.clone());
        self.terminate(format!("br label %{}", cond_name));

        self.switch_to(cond_idx);
        let c = self.emit_expr(cond);
        let c = self.truth(&c);
        self.terminate(format!("br i1 {}, label %{}, label %{}", c, body_name, end_name));

        self.switch_to(body_idx);
        self.emit_loop_body(body, &end_name, &cond_name);
        self.terminate(format!("br label %{}", cond_name));
        self.switch_to(end_idx);
    }

    fn emit_do_while(&mut self, body: &Block, cond: &Expr) {
        let body_name = self.new_block("do_body_");
        let cond_name = self.new_block("do_cond_");
        let end_name = self.new_block("do_end_");
        let body_idx = self.add_block(body_name.clone());
        let cond_idx = self.add_block(cond_name.clone());
        let end_idx = self.add_block(end_name.clone());
        self.terminate(format!("br label %{}", body_name));

        self.switch_to(body_idx);
        self.emit_loop_body(body, &end_name, &cond_name);
        self.terminate(format!("br label %{}", cond_name));

        self.switch_to(cond_idx);
        let c = self.emit_expr(cond);
        let c = self.truth(&c);
        self.terminate(format!("br i1 {}, label %{}, label %{}", c, body_name, end_name));
        self.switch_to(end_idx);
    }

    fn emit_for(&mut self, init: &ForClause, cond: Option<&Expr>, step: &ForClause, body: &Block) {
        self.emit_clause(init);
        let cond_name = self.new_block("for_cond_");
        let body_name = self.new_block("for_body_");
        let step_name = self.new_block("for_step_");
        let end_name = self.new_block("for_end_");
        let cond_idx = self.add_block(cond_name.clone());
        let body_idx = self.add_block(body_name.clone());
        let step_idx = self.add_block(step_name.clone());
        let end_idx = self.add_block(end_name.clone());
        self.terminate(format!("br label %{}", cond_name));

        self.switch_to(cond_idx);
        match cond {
            Some(cond) => {
                let c = self.emit_expr(cond);
                let c = self.truth(&c);
                self.terminate(format!("br i1 {}, label %{}, label %{}", c, body_name, end_name));
            }
            None => self.terminate(format!("br label %{}", body_name)),
        }

        self.switch_to(body_idx);
        self.emit_loop_body(body, &end_name, &step_name);
        self.terminate(format!("br label %{}", step_name));

        self.switch_to(step_idx);
        self.emit_clause(step);
        self.terminate(format!("br label %{}", cond_name));
        self.switch_to(end_idx);
    }

    fn emit_loop_body(&mut self, body: &Block, break_label: &str, continue_label: &str) {
        self.targets.push(Target {
            break_label: break_label.to_string(),
            continue_label: Some(continue_label.to_string()),
        });
        self.emit_scoped(body);
        self.targets.pop();
    }

    // Cases are tested in source order; a case without `break` falls into the next arm.
    fn emit_switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase]) {
        let value = self.emit_expr(scrutinee);
        let end_name = self.new_block("switch_end_");
        let mut arms = Vec::with_capacity(cases.len());
        for case in cases {
            let prefix = if case.label.is_some() {
                "switch_case_"
            } else {
                "switch_default_"
            };
            let name = self.new_block(prefix);
            let idx = self.add_block(name.clone());
            arms.push((name, idx));
        }
        let end_idx = self.add_block(end_name.clone());

        let mut default_label = None;
        for (case, (name, _)) in cases.iter().zip(&arms) {
            let Some(label) = &case.label else {
                default_label.get_or_insert_with(|| name.clone());
                continue;
            };
            let label_value = self.emit_expr(label);
            let hit = self.new_temp();
            self.emit(format!("{} = icmp eq i32 {}, {}", hit, value, label_value));
            let next_name = self.new_block("switch_test_");
            let next_idx = self.add_block(next_name.clone());
            self.terminate(format!("br i1 {}, label %{}, label %{}", hit, name, next_name));
            self.switch_to(next_idx);
        }
        let fallback = default_label.unwrap_or_else(|| end_name.clone());
        self.terminate(format!("br label %{}", fallback));

        self.targets.push(Target {
            break_label: end_name.clone(),
            continue_label: None,
        });
        for (i, case) in cases.iter().enumerate() {
            self.switch_to(arms[i].1);
            self.scopes.push(HashMap::new());
            self.emit_stmts(&case.body);
            self.scopes.pop();
            let next = arms.get(i + 1).map(|(n, _)| n.clone()).unwrap_or_else(|| end_name.clone());
            self.terminate(format!("br label %{}", next));
        }
        self.targets.pop();
        self.switch_to(end_idx);
    }

    fn load(&mut self, slot: &str) -> String {
        let t = self.new_temp();
        self.emit(format!("{} = load i32, ptr {}, align 4", t, slot));
        t
    }

    /// `icmp ne i32 v, 0`, yielding an `i1`.
    fn truth(&mut self, value: &str) -> String {
        let t = self.new_temp();
        self.emit(format!("{} = icmp ne i32 {}, 0", t, value));
        t
    }

    fn widen(&mut self, value: &str) -> String {
        let t = self.new_temp();
        self.emit(format!("{} = zext i1 {} to i32", t, value));
        t
    }

    fn emit_arith(&mut self, op: BinaryOp, lhs: &str, rhs: &str) -> String {
        if op.is_comparison() {
            let c = self.new_temp();
            self.emit(format!("{} = icmp {} i32 {}, {}", c, op.opcode(), lhs, rhs));
            return self.widen(&c);
        }
        let t = self.new_temp();
        self.emit(format!("{} = {} i32 {}, {}", t, op.opcode(), lhs, rhs));
        t
    }

    pub(crate) fn emit_expr(&mut self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Number(v) => v.to_string(),
            ExprKind::Bool(b) => (*b as i32).to_string(),
            ExprKind::Nil => "0".to_string(),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(slot) => self.load(&slot),
                None => "0".to_string(),
            },
            ExprKind::Unary { op, expr } => {
                let v = self.emit_expr(expr);
                match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Not => self.emit_arith(BinaryOp::Eq, &v, "0"),
                    UnaryOp::Neg => self.emit_arith(BinaryOp::Sub, "0", &v),
                    UnaryOp::BitNot => self.emit_arith(BinaryOp::BitXor, &v, "-1"),
                }
            }
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                self.emit_short_circuit(*op, left, right)
            }
            ExprKind::Binary { op, left, right } => {
                let lhs = self.emit_expr(left);
                let rhs = self.emit_expr(right);
                self.emit_arith(*op, &lhs, &rhs)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => self.emit_conditional(cond, then_expr, else_expr),
            ExprKind::Call { callee, args } => self.emit_call(callee, args),
            ExprKind::MessageSend(send) => self.emit_message_send(expr.id, send),
            ExprKind::BlockLiteral(_) => "0".to_string(),
            ExprKind::Await(inner) => self.emit_expr(inner),
        }
    }

    fn emit_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> String {
        let prefix = if op == BinaryOp::And { "and" } else { "or" };
        let lhs = self.emit_expr(left);
        let lhs = self.truth(&lhs);
        let rhs_name = self.new_block(&format!("{}_rhs_", prefix));
        let short_name = self.new_block(&format!("{}_short_", prefix));
        let merge_name = self.new_block(&format!("{}_merge_", prefix));
        let rhs_idx = self.add_block(rhs_name.clone());
        let short_idx = self.add_block(short_name.clone());
        let merge_idx = self.add_block(merge_name.clone());
        if op == BinaryOp::And {
            self.terminate(format!("br i1 {}, label %{}, label %{}", lhs, rhs_name, short_name));
        } else {
            self.terminate(format!("br i1 {}, label %{}, label %{}", lhs, short_name, rhs_name));
        }

        self.switch_to(rhs_idx);
        let rhs = self.emit_expr(right);
        let rhs = self.truth(&rhs);
        let rhs_tail = self.current_name();
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(short_idx);
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(merge_idx);
        let short_value = if op == BinaryOp::And { "false" } else { "true" };
        let phi = self.new_temp();
        self.emit(format!(
            "{} = phi i1 [ {}, %{} ], [ {}, %{} ]",
            phi, short_value, short_name, rhs, rhs_tail
        ));
        self.widen(&phi)
    }

    fn emit_conditional(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr) -> String {
        let c = self.emit_expr(cond);
        let c = self.truth(&c);
        let true_name = self.new_block("cond_true_");
        let false_name = self.new_block("cond_false_");
        let merge_name = self.new_block("cond_merge_");
        let true_idx = self.add_block(true_name.clone());
        let false_idx = self.add_block(false_name.clone());
        let merge_idx = self.add_block(merge_name.clone());
        self.terminate(format!("br i1 {}, label %{}, label %{}", c, true_name, false_name));

        self.switch_to(true_idx);
        let tv = self.emit_expr(then_expr);
        let true_tail = self.current_name();
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(false_idx);
        let fv = self.emit_expr(else_expr);
        let false_tail = self.current_name();
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(merge_idx);
        let phi = self.new_temp();
        self.emit(format!(
            "{} = phi i32 [ {}, %{} ], [ {}, %{} ]",
            phi, tv, true_tail, fv, false_tail
        ));
        phi
    }

    fn emit_call(&mut self, callee: &str, args: &[Expr]) -> String {
        match callee {
            "__builtin_expect" => {
                let values: Vec<String> = args.iter().map(|a| self.emit_expr(a)).collect();
                return values.into_iter().next().unwrap_or_else(|| "0".to_string());
            }
            "__builtin_assume" => {
                for arg in args {
                    self.emit_expr(arg);
                }
                return "0".to_string();
            }
            "__builtin_trap" | "__builtin_unreachable" => {
                self.trap_used = true;
                self.emit("call void @llvm.trap()");
                return "0".to_string();
            }
            _ => {}
        }
        let info = self.env.functions.get(callee);
        let mut lowered = Vec::with_capacity(args.len());
        for (idx, arg) in args.iter().enumerate() {
            let v = self.emit_expr(arg);
            let param = info.and_then(|f| f.param_types.get(idx)).copied();
            if param == Some(ValueType::Bool) {
                let b = self.truth(&v);
                lowered.push(format!("i1 {}", b));
            } else {
                lowered.push(format!("i32 {}", v));
            }
        }
        let ret = info.map(|f| f.return_type).unwrap_or(ValueType::I32);
        let call = format!("call {} @{}({})", ret.llvm(), callee, lowered.join(", "));
        match ret {
            ValueType::Void => {
                self.emit(call);
                "0".to_string()
            }
            ValueType::Bool => {
                let t = self.new_temp();
                self.emit(format!("{} = {}", t, call));
                self.widen(&t)
            }
            ValueType::I32 => {
                let t = self.new_temp();
                self.emit(format!("{} = {}", t, call));
                t
            }
        }
    }

    fn emit_message_send(&mut self, id: ExprId, send: &MessageSend) -> String {
        let proof = self.env.proofs.get(&id).copied().unwrap_or(ReceiverProof::Unknown);
        if proof.is_foldable() {
            return "0".to_string();
        }
        let receiver = self.emit_expr(&send.receiver);
        let slots = self.env.boundary.runtime_dispatch_arg_slots;
        let mut values: Vec<String> = send.args.iter().map(|a| self.emit_expr(a)).collect();
        values.truncate(slots);
        values.resize(slots, "0".to_string());

        let Some(selector) = self.env.selectors.get(&send.selector) else {
            return "0".to_string();
        };
        let sel_ptr = self.new_temp();
        self.emit(format!(
            "{} = getelementptr inbounds [{} x i8], ptr @{}, i32 0, i32 0",
            sel_ptr, selector.len, selector.symbol
        ));
        let mut call = format!(
            "call i32 @{}(i32 {}, ptr {}",
            self.env.boundary.runtime_dispatch_symbol, receiver, sel_ptr
        );
        for v in &values {
            call.push_str(&format!(", i32 {}", v));
        }
        call.push(')');
        self.dispatch_used = true;

        if proof == ReceiverProof::ProvenNonNil {
            let t = self.new_temp();
            self.emit(format!("{} = {}", t, call));
            return t;
        }

        let is_nil = self.new_temp();
        self.emit(format!("{} = icmp eq i32 {}, 0", is_nil, receiver));
        let nil_name = self.new_block("msg_nil_");
        let dispatch_name = self.new_block("msg_dispatch_");
        let merge_name = self.new_block("msg_merge_");
        let nil_idx = self.add_block(nil_name.clone());
        let dispatch_idx = self.add_block(dispatch_name.clone());
        let merge_idx = self.add_block(merge_name.clone());
        self.terminate(format!("br i1 {}, label %{}, label %{}", is_nil, nil_name, dispatch_name));

        self.switch_to(nil_idx);
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(dispatch_idx);
        let dispatched = self.new_temp();
        self.emit(format!("{} = {}", dispatched, call));
        self.terminate(format!("br label %{}", merge_name));

        self.switch_to(merge_idx);
        let phi = self.new_temp();
        self.emit(format!(
            "{} = phi i32 [ 0, %{} ], [ {}, %{} ]",
            phi, nil_name, dispatched, dispatch_name
        ));
        phi
    }
}

/// `c"..."` body for a selector literal: printable ASCII verbatim, everything else as `\XX`.
pub(crate) fn escape_c_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        if (0x20..=0x7E).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{:02X}", b));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Span;
    use crate::lower::{LoweringContract, normalize};

    fn num(v: i32) -> Expr {
        Expr {
            id: 0,
            kind: ExprKind::Number(v),
            span: Span::at(1, 1),
        }
    }

    fn ident(name: &str) -> Expr {
        Expr {
            id: 0,
            kind: ExprKind::Ident(name.to_string()),
            span: Span::at(1, 1),
        }
    }

    fn with_env(f: impl FnOnce(&ModuleEnv<'_>)) {
        let functions = BTreeMap::new();
        let mut globals = BTreeSet::new();
        globals.insert("g".to_string());
        let selectors = BTreeMap::new();
        let proofs = BTreeMap::new();
        let boundary = normalize(&LoweringContract::default()).expect("default contract");
        let env = ModuleEnv {
            functions: &functions,
            globals: &globals,
            selectors: &selectors,
            proofs: &proofs,
            boundary: &boundary,
        };
        f(&env);
    }

    fn render(e: &FnEmitter<'_>) -> Vec<String> {
        e.blocks
            .iter()
            .flat_map(|b| std::iter::once(format!("{}:", b.name)).chain(b.instrs.iter().cloned()))
            .collect()
    }

    #[test]
    fn globals_load_through_their_symbol() {
        with_env(|env| {
            let mut e = FnEmitter::new(env, ValueType::I32);
            let v = e.emit_expr(&ident("g"));
            assert_eq!(v, "%t0");
            assert_eq!(render(&e), vec!["entry:", "%t0 = load i32, ptr @g, align 4"]);
        });
    }

    #[test]
    fn unary_not_desugars_to_compare() {
        with_env(|env| {
            let mut e = FnEmitter::new(env, ValueType::I32);
            let expr = Expr {
                id: 0,
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(num(3)),
                },
                span: Span::at(1, 1),
            };
            let v = e.emit_expr(&expr);
            assert_eq!(v, "%t1");
            assert_eq!(
                render(&e),
                vec!["entry:", "%t0 = icmp eq i32 3, 0", "%t1 = zext i1 %t0 to i32"]
            );
        });
    }

    #[test]
    fn statements_after_return_are_dropped() {
        with_env(|env| {
            let mut e = FnEmitter::new(env, ValueType::I32);
            let body = Block {
                stmts: vec![
                    Stmt::Return {
                        value: Some(num(1)),
                        span: Span::at(1, 1),
                    },
                    Stmt::Let {
                        name: "x".to_string(),
                        value: num(2),
                        span: Span::at(2, 1),
                    },
                ],
                span: Span::at(1, 1),
            };
            e.emit_body(&body);
            assert_eq!(render(&e), vec!["entry:", "ret i32 1"]);
        });
    }

    #[test]
    fn break_outside_loop_returns_zero() {
        with_env(|env| {
            let mut e = FnEmitter::new(env, ValueType::Bool);
            let body = Block {
                stmts: vec![Stmt::Break { span: Span::at(1, 1) }],
                span: Span::at(1, 1),
            };
            e.emit_body(&body);
            assert_eq!(render(&e), vec!["entry:", "ret i1 0"]);
        });
    }

    #[test]
    fn selector_bytes_escape() {
        assert_eq!(escape_c_string("setX:y:"), "setX:y:");
        assert_eq!(escape_c_string("a\"b\\"), "a\\22b\\5C");
    }
}
