use crate::frontend::ast::{BinaryOp, Expr, ExprKind, GlobalDecl, Stmt, UnaryOp};
use std::collections::BTreeMap;

/// Name → folded value. Never iterated for output, only looked up.
pub type Bindings = BTreeMap<String, i32>;

/// Folds literals, bound identifiers and pure operators. `None` when any operand is
/// unknown or the operation would overflow or divide by zero.
pub fn eval_scalar(expr: &Expr, lookup: &dyn Fn(&str) -> Option<i32>) -> Option<i32> {
    match &expr.kind {
        ExprKind::Number(v) => Some(*v),
        ExprKind::Bool(b) => Some(*b as i32),
        ExprKind::Nil => Some(0),
        ExprKind::Ident(name) => lookup(name),
        ExprKind::Unary { op, expr } => {
            let v = eval_scalar(expr, lookup)?;
            match op {
                UnaryOp::Not => Some((v == 0) as i32),
                UnaryOp::Neg => v.checked_neg(),
                UnaryOp::Plus => Some(v),
                UnaryOp::BitNot => Some(!v),
            }
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            if eval_scalar(cond, lookup)? != 0 {
                eval_scalar(then_expr, lookup)
            } else {
                eval_scalar(else_expr, lookup)
            }
        }
        ExprKind::Binary { op, left, right } => {
            let lhs = eval_scalar(left, lookup)?;
            match op {
                BinaryOp::And if lhs == 0 => return Some(0),
                BinaryOp::Or if lhs != 0 => return Some(1),
                BinaryOp::And | BinaryOp::Or => {
                    return Some((eval_scalar(right, lookup)? != 0) as i32);
                }
                _ => {}
            }
            let rhs = eval_scalar(right, lookup)?;
            fold_binary(*op, lhs, rhs)
        }
        ExprKind::Call { .. }
        | ExprKind::MessageSend(_)
        | ExprKind::BlockLiteral(_)
        | ExprKind::Await(_) => None,
    }
}

pub fn fold_binary(op: BinaryOp, lhs: i32, rhs: i32) -> Option<i32> {
    match op {
        BinaryOp::Add => lhs.checked_add(rhs),
        BinaryOp::Sub => lhs.checked_sub(rhs),
        BinaryOp::Mul => lhs.checked_mul(rhs),
        BinaryOp::Div => lhs.checked_div(rhs),
        BinaryOp::Rem => lhs.checked_rem(rhs),
        BinaryOp::BitAnd => Some(lhs & rhs),
        BinaryOp::BitOr => Some(lhs | rhs),
        BinaryOp::BitXor => Some(lhs ^ rhs),
        BinaryOp::Shl | BinaryOp::Shr => {
            if !(0..31).contains(&rhs) || lhs < 0 {
                return None;
            }
            if op == BinaryOp::Shr {
                return Some(lhs >> rhs);
            }
            let shifted = (lhs as u64) << rhs;
            i32::try_from(shifted).ok()
        }
        BinaryOp::Eq => Some((lhs == rhs) as i32),
        BinaryOp::NotEq => Some((lhs != rhs) as i32),
        BinaryOp::Lt => Some((lhs < rhs) as i32),
        BinaryOp::Lte => Some((lhs <= rhs) as i32),
        BinaryOp::Gt => Some((lhs > rhs) as i32),
        BinaryOp::Gte => Some((lhs >= rhs) as i32),
        BinaryOp::And => Some((lhs != 0 && rhs != 0) as i32),
        BinaryOp::Or => Some((lhs != 0 || rhs != 0) as i32),
    }
}

pub fn eval_with(expr: &Expr, bindings: &Bindings) -> Option<i32> {
    eval_scalar(expr, &|name| bindings.get(name).copied())
}

/// Syntactic constness of a global initializer: literals, operators and earlier globals.
pub fn is_constant_expression(expr: &Expr, known_globals: &dyn Fn(&str) -> bool) -> bool {
    match &expr.kind {
        ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Nil => true,
        ExprKind::Ident(name) => known_globals(name),
        ExprKind::Unary { expr, .. } => is_constant_expression(expr, known_globals),
        ExprKind::Binary { left, right, .. } => {
            is_constant_expression(left, known_globals) && is_constant_expression(right, known_globals)
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            is_constant_expression(cond, known_globals)
                && is_constant_expression(then_expr, known_globals)
                && is_constant_expression(else_expr, known_globals)
        }
        _ => false,
    }
}

/// Folds every global initializer in declaration order. `Err(index)` names the first
/// global whose initializer cannot be folded.
pub fn resolve_global_values(globals: &[GlobalDecl]) -> Result<Vec<i32>, usize> {
    let mut bindings = Bindings::new();
    let mut out = Vec::with_capacity(globals.len());
    for (idx, global) in globals.iter().enumerate() {
        let value = eval_with(&global.value, &bindings).ok_or(idx)?;
        bindings.entry(global.name.clone()).or_insert(value);
        out.push(value);
    }
    Ok(out)
}

/// `0`, `1` and `nil` are accepted where a bool is expected.
pub fn is_bool_like_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Nil | ExprKind::Number(0 | 1))
}

fn truthiness(expr: &Expr, bindings: &Bindings) -> Option<bool> {
    eval_with(expr, bindings).map(|v| v != 0)
}

pub fn block_always_returns(stmts: &[Stmt], bindings: &Bindings) -> bool {
    stmts.iter().any(|s| stmt_always_returns(s, bindings))
}

pub fn stmt_always_returns(stmt: &Stmt, bindings: &Bindings) -> bool {
    match stmt {
        Stmt::Return { .. } => true,
        Stmt::Block(b) | Stmt::AutoreleasePool { body: b, .. } => block_always_returns(&b.stmts, bindings),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => match truthiness(cond, bindings) {
            Some(true) => block_always_returns(&then_body.stmts, bindings),
            Some(false) => else_body
                .as_ref()
                .is_some_and(|b| block_always_returns(&b.stmts, bindings)),
            None => {
                block_always_returns(&then_body.stmts, bindings)
                    && else_body
                        .as_ref()
                        .is_some_and(|b| block_always_returns(&b.stmts, bindings))
            }
        },
        Stmt::While { cond, body, .. } => {
            truthiness(cond, bindings) == Some(true) && block_always_returns(&body.stmts, bindings)
        }
        Stmt::For { cond, body, .. } => {
            let entered = match cond {
                None => true,
                Some(c) => truthiness(c, bindings) == Some(true),
            };
            entered && block_always_returns(&body.stmts, bindings)
        }
        Stmt::DoWhile { body, .. } => block_always_returns(&body.stmts, bindings),
        Stmt::Switch {
            scrutinee, cases, ..
        } => switch_always_returns(scrutinee, cases, bindings),
        _ => false,
    }
}

fn switch_always_returns(
    scrutinee: &Expr,
    cases: &[crate::frontend::ast::SwitchCase],
    bindings: &Bindings,
) -> bool {
    if cases.is_empty() {
        return false;
    }
    // Each arm either returns, or falls through into the next arm's guarantee.
    let mut arm_returns = vec![false; cases.len()];
    let mut next = false;
    for (i, case) in cases.iter().enumerate().rev() {
        arm_returns[i] = if block_always_returns(&case.body, bindings) {
            true
        } else if returns_or_falls_through(&case.body, bindings) {
            next
        } else {
            false
        };
        next = arm_returns[i];
    }
    if let Some(value) = eval_with(scrutinee, bindings) {
        let selected = cases
            .iter()
            .position(|c| c.label.as_ref().and_then(|l| eval_with(l, bindings)) == Some(value))
            .or_else(|| cases.iter().position(|c| c.label.is_none()));
        return selected.is_some_and(|i| arm_returns[i]);
    }
    cases.iter().any(|c| c.label.is_none()) && arm_returns.iter().all(|r| *r)
}

fn returns_or_falls_through(stmts: &[Stmt], bindings: &Bindings) -> bool {
    for stmt in stmts {
        if stmt_always_returns(stmt, bindings) {
            return true;
        }
        let completes = match stmt {
            Stmt::Let { .. } | Stmt::Assign(_) | Stmt::Expr { .. } | Stmt::Empty { .. } | Stmt::Switch { .. } => true,
            Stmt::Block(b) | Stmt::AutoreleasePool { body: b, .. } => returns_or_falls_through(&b.stmts, bindings),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let then_ok = returns_or_falls_through(&then_body.stmts, bindings);
                let else_ok = else_body
                    .as_ref()
                    .is_none_or(|b| returns_or_falls_through(&b.stmts, bindings));
                match truthiness(cond, bindings) {
                    Some(true) => then_ok,
                    Some(false) => else_ok,
                    None => then_ok && else_ok,
                }
            }
            Stmt::While { cond, .. } => truthiness(cond, bindings) == Some(false),
            Stmt::For { cond, .. } => cond
                .as_ref()
                .is_some_and(|c| truthiness(c, bindings) == Some(false)),
            Stmt::DoWhile { body, cond, .. } => {
                truthiness(cond, bindings) == Some(false) && returns_or_falls_through(&body.stmts, bindings)
            }
            Stmt::Return { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => false,
        };
        if !completes {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::{Bindings, block_always_returns, eval_with, fold_binary, resolve_global_values};
    use crate::frontend::ast::{BinaryOp, Program, Stmt};
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
        parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        )
        .program
    }

    fn body(p: &Program) -> &[Stmt] {
        &p.functions[0].body.as_ref().expect("body").stmts
    }

    #[test]
    fn folds_operators_and_rejects_traps() {
        assert_eq!(fold_binary(BinaryOp::Shl, 1, 4), Some(16));
        assert_eq!(fold_binary(BinaryOp::Div, 1, 0), None);
        assert_eq!(fold_binary(BinaryOp::Add, i32::MAX, 1), None);
        assert_eq!(fold_binary(BinaryOp::Div, i32::MIN, -1), None);
    }

    #[test]
    fn globals_fold_in_order() {
        let p = program("let a = 2; let b = a * 3 + 1; let c = b > 6 ? 10 : 20;");
        assert_eq!(resolve_global_values(&p.globals), Ok(vec![2, 7, 10]));
        let bad = program("let a = 1; let b = a / 0;");
        assert_eq!(resolve_global_values(&bad.globals), Err(1));
    }

    #[test]
    fn constant_conditions_shape_return_paths() {
        let p = program("fn f() -> i32 { while (1) { return 1; } }");
        assert!(block_always_returns(body(&p), &Bindings::new()));
        let q = program("fn f(x: i32) -> i32 { if (x) { return 1; } }");
        assert!(!block_always_returns(body(&q), &Bindings::new()));
        let s = program(
            "fn f(x: i32) -> i32 { switch (x) { case 1: return 1; case 2: default: return 0; } }",
        );
        assert!(block_always_returns(body(&s), &Bindings::new()));
    }

    #[test]
    fn bindings_feed_the_evaluator() {
        let p = program("fn f() -> i32 { return k + 1; }");
        let Stmt::Return { value: Some(e), .. } = &body(&p)[0] else {
            panic!("expected return");
        };
        let mut b = Bindings::new();
        assert_eq!(eval_with(e, &b), None);
        b.insert("k".to_string(), 41);
        assert_eq!(eval_with(e, &b), Some(42));
    }
}
