use crate::frontend::ast::{Assignment, Block, Expr, ExprKind, ForClause, Stmt};

// Walkers stop at block-literal bodies: a literal's body never runs at the literal site.

pub fn each_expr(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Unary { expr, .. } | ExprKind::Await(expr) => each_expr(expr, f),
        ExprKind::Binary { left, right, .. } => {
            each_expr(left, f);
            each_expr(right, f);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            each_expr(cond, f);
            each_expr(then_expr, f);
            each_expr(else_expr, f);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                each_expr(arg, f);
            }
        }
        ExprKind::MessageSend(send) => {
            each_expr(&send.receiver, f);
            for arg in &send.args {
                each_expr(arg, f);
            }
        }
        ExprKind::Number(_)
        | ExprKind::Bool(_)
        | ExprKind::Nil
        | ExprKind::Ident(_)
        | ExprKind::BlockLiteral(_) => {}
    }
}

fn clause_exprs(clause: &ForClause, f: &mut dyn FnMut(&Expr)) {
    match clause {
        ForClause::None => {}
        ForClause::Let { value, .. } => each_expr(value, f),
        ForClause::Assign(a) => {
            if let Some(v) = &a.value {
                each_expr(v, f);
            }
        }
        ForClause::Expr(e) => each_expr(e, f),
    }
}

/// Every expression reachable from `stmt`, including nested statement bodies.
pub fn each_stmt_expr(stmt: &Stmt, f: &mut dyn FnMut(&Expr)) {
    match stmt {
        Stmt::Let { value, .. } => each_expr(value, f),
        Stmt::Assign(a) => {
            if let Some(v) = &a.value {
                each_expr(v, f);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(v) = value {
                each_expr(v, f);
            }
        }
        Stmt::Expr { expr, .. } => each_expr(expr, f),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            each_expr(cond, f);
            each_block_expr(then_body, f);
            if let Some(b) = else_body {
                each_block_expr(b, f);
            }
        }
        Stmt::While { cond, body, .. } | Stmt::DoWhile { body, cond, .. } => {
            each_expr(cond, f);
            each_block_expr(body, f);
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            clause_exprs(init, f);
            if let Some(c) = cond {
                each_expr(c, f);
            }
            clause_exprs(step, f);
            each_block_expr(body, f);
        }
        Stmt::Switch {
            scrutinee, cases, ..
        } => {
            each_expr(scrutinee, f);
            for case in cases {
                if let Some(label) = &case.label {
                    each_expr(label, f);
                }
                for s in &case.body {
                    each_stmt_expr(s, f);
                }
            }
        }
        Stmt::Block(b) | Stmt::AutoreleasePool { body: b, .. } => each_block_expr(b, f),
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty { .. } => {}
    }
}

pub fn each_block_expr(block: &Block, f: &mut dyn FnMut(&Expr)) {
    for s in &block.stmts {
        each_stmt_expr(s, f);
    }
}

/// Every statement in pre-order, nested bodies included.
pub fn each_stmt(stmts: &[Stmt], f: &mut dyn FnMut(&Stmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                each_stmt(&then_body.stmts, f);
                if let Some(b) = else_body {
                    each_stmt(&b.stmts, f);
                }
            }
            Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::For { body, .. }
            | Stmt::Block(body)
            | Stmt::AutoreleasePool { body, .. } => each_stmt(&body.stmts, f),
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    each_stmt(&case.body, f);
                }
            }
            _ => {}
        }
    }
}

pub fn each_assignment(stmts: &[Stmt], f: &mut dyn FnMut(&Assignment)) {
    each_stmt(stmts, &mut |stmt| match stmt {
        Stmt::Assign(a) => f(a),
        Stmt::For { init, step, .. } => {
            for clause in [init, step] {
                if let ForClause::Assign(a) = clause {
                    f(a);
                }
            }
        }
        _ => {}
    });
}

pub fn contains_expr(stmts: &[Stmt], pred: &dyn Fn(&Expr) -> bool) -> bool {
    let mut found = false;
    for stmt in stmts {
        each_stmt_expr(stmt, &mut |e| found |= pred(e));
    }
    found
}

/// Calls, sends and awaits may have effects; everything else is pure.
pub fn is_effectful(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Call { .. } | ExprKind::MessageSend(_) | ExprKind::Await(_)
    )
}

pub fn has_side_effects(expr: &Expr) -> bool {
    let mut found = false;
    each_expr(expr, &mut |e| found |= is_effectful(e));
    found
}
