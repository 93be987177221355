use super::surface::IntegrationSurface;
use crate::frontend::ast::*;
use crate::frontend::diagnostic::Diagnostics;
use std::collections::{BTreeMap, BTreeSet};

type Site = (usize, usize);

fn site(span: &Span) -> Site {
    (span.line, span.column)
}

fn record(slot: &mut Option<Site>, at: Site) {
    if slot.is_none_or(|cur| at < cur) {
        *slot = Some(at);
    }
}

#[derive(Default)]
struct Effects {
    global_write: Option<Site>,
    message_send: Option<Site>,
    autoreleasepool: Option<Site>,
    calls: BTreeMap<String, Option<Site>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Cause {
    token: String,
    site: Site,
    detail: String,
    detail_site: Site,
}

impl Cause {
    fn direct(token: &str, at: Site) -> Self {
        Self {
            token: token.to_string(),
            site: at,
            detail: token.to_string(),
            detail_site: at,
        }
    }

    fn better_than(&self, other: &Option<Cause>) -> bool {
        match other {
            None => true,
            Some(cur) => (&self.token, self.site) < (&cur.token, cur.site),
        }
    }
}

impl Effects {
    fn direct_cause(&self) -> Option<Cause> {
        [
            ("global-write", self.global_write),
            ("message-send", self.message_send),
            ("autoreleasepool-scope", self.autoreleasepool),
        ]
        .into_iter()
        .find_map(|(token, at)| at.map(|at| Cause::direct(token, at)))
    }
}

struct Collector<'a> {
    globals: &'a BTreeMap<String, ValueType>,
    scopes: Vec<BTreeSet<String>>,
    effects: Effects,
}

impl Collector<'_> {
    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn write(&mut self, a: &Assignment) {
        let bound = self.scopes.iter().any(|s| s.contains(&a.name));
        if !bound && self.globals.contains_key(&a.name) {
            record(&mut self.effects.global_write, site(&a.span));
        }
        if let Some(v) = &a.value {
            self.expr(v);
        }
    }

    fn scoped(&mut self, stmts: &[Stmt]) {
        self.scopes.push(BTreeSet::new());
        for s in stmts {
            self.stmt(s);
        }
        self.scopes.pop();
    }

    fn clause(&mut self, clause: &ForClause) {
        match clause {
            ForClause::None => {}
            ForClause::Let { name, value, .. } => {
                self.expr(value);
                self.bind(name);
            }
            ForClause::Assign(a) => self.write(a),
            ForClause::Expr(e) => self.expr(e),
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Let { name, value, .. } => {
                self.expr(value);
                self.bind(name);
            }
            Stmt::Assign(a) => self.write(a),
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Expr { expr, .. } => self.expr(expr),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.expr(cond);
                self.scoped(&then_body.stmts);
                if let Some(b) = else_body {
                    self.scoped(&b.stmts);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.expr(cond);
                self.scoped(&body.stmts);
            }
            Stmt::DoWhile { body, cond, .. } => {
                self.scoped(&body.stmts);
                self.expr(cond);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.scopes.push(BTreeSet::new());
                self.clause(init);
                if let Some(c) = cond {
                    self.expr(c);
                }
                self.scoped(&body.stmts);
                self.clause(step);
                self.scopes.pop();
            }
            Stmt::Switch { scrutinee, cases, .. } => {
                self.expr(scrutinee);
                for case in cases {
                    self.scoped(&case.body);
                }
            }
            Stmt::Block(b) => self.scoped(&b.stmts),
            Stmt::AutoreleasePool { body, span } => {
                record(&mut self.effects.autoreleasepool, site(span));
                self.scoped(&body.stmts);
            }
            Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty { .. } => {}
        }
    }

    fn expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Nil | ExprKind::Ident(_) => {}
            ExprKind::Unary { expr, .. } | ExprKind::Await(expr) => self.expr(expr),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expr(cond);
                self.expr(then_expr);
                self.expr(else_expr);
            }
            ExprKind::Call { callee, args } => {
                // Intrinsics lower to inline IR, never to a callee.
                if !callee.starts_with("__builtin_") {
                    record(self.effects.calls.entry(callee.clone()).or_default(), site(&e.span));
                }
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::MessageSend(send) => {
                record(&mut self.effects.message_send, site(&e.span));
                self.expr(&send.receiver);
                for arg in &send.args {
                    self.expr(arg);
                }
            }
            ExprKind::BlockLiteral(block) => {
                self.scopes.push(block.params.iter().map(|p| p.name.clone()).collect());
                self.scoped(&block.body.stmts);
                self.scopes.pop();
            }
        }
    }
}

fn collect(f: &FunctionDecl, body: &Block, globals: &BTreeMap<String, ValueType>) -> Effects {
    let mut c = Collector {
        globals,
        scopes: vec![f.params.iter().map(|p| p.name.clone()).collect()],
        effects: Effects::default(),
    };
    for s in &body.stmts {
        c.stmt(s);
    }
    c.effects
}

/// Propagates impurity through the call graph to a fixed point and reports every
/// `pure` function that ends up impure, with the first-ranked cause.
pub fn validate_pure_contract(program: &Program, surface: &IntegrationSurface) -> Diagnostics {
    let effects: BTreeMap<&str, Effects> = program
        .functions
        .iter()
        .filter_map(|f| f.body.as_ref().map(|b| (f.name.as_str(), collect(f, b, &surface.globals))))
        .collect();

    let mut causes: BTreeMap<&str, Cause> = effects
        .iter()
        .filter_map(|(name, e)| e.direct_cause().map(|c| (*name, c)))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (name, e) in &effects {
            if causes.contains_key(name) {
                continue;
            }
            let mut selected: Option<Cause> = None;
            for (callee, at) in &e.calls {
                let defined = effects.contains_key(callee.as_str());
                let pure = surface.functions.get(callee).is_some_and(|f| f.is_pure);
                let at = at.unwrap_or((1, 1));
                let candidate = if !defined && !pure {
                    Some(Cause::direct(&format!("unannotated-extern-call:{}", callee), at))
                } else {
                    causes.get(callee.as_str()).map(|inner| Cause {
                        token: format!("impure-callee:{}", callee),
                        site: at,
                        detail: inner.detail.clone(),
                        detail_site: inner.detail_site,
                    })
                };
                if let Some(candidate) = candidate.filter(|c| c.better_than(&selected)) {
                    selected = Some(candidate);
                }
            }
            if let Some(cause) = selected {
                causes.insert(*name, cause);
                changed = true;
            }
        }
    }

    let mut diags = Diagnostics::default();
    let mut reported = BTreeSet::new();
    for f in &program.functions {
        if !f.is_pure || f.body.is_none() || !reported.insert(f.name.as_str()) {
            continue;
        }
        let Some(cause) = causes.get(f.name.as_str()) else {
            continue;
        };
        diags.push(
            "O3S215",
            format!(
                "pure contract violation: function '{}' declared 'pure' has side effects (cause: {}; cause-site:{}:{}; detail:{}@{}:{})",
                f.name,
                cause.token,
                cause.site.0,
                cause.site.1,
                cause.detail,
                cause.detail_site.0,
                cause.detail_site.1
            ),
            f.span.clone(),
        );
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::validate_pure_contract;
    use crate::frontend::lexer::{LexOptions, tokenize};
    use crate::frontend::parser::{ParseOptions, parse};
    use crate::sema::surface::build_integration_surface;

    fn messages(src: &str) -> Vec<String> {
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
        validate_pure_contract(&program, &surface)
            .items
            .iter()
            .map(|d| d.render())
            .collect()
    }

    #[test]
    fn direct_global_write() {
        let msgs = messages("let g = 0;\npure fn f() -> i32 {\n  g = 1;\n  return g;\n}\n");
        assert_eq!(
            msgs,
            vec![
                "error:2:1: pure contract violation: function 'f' declared 'pure' has side effects (cause: global-write; cause-site:3:3; detail:global-write@3:3) [O3S215]"
            ]
        );
    }

    #[test]
    fn shadowed_global_is_not_a_write() {
        assert!(messages("let g = 0;\npure fn f() -> i32 {\n  let g = 2;\n  g = 1;\n  return g;\n}\n").is_empty());
    }

    #[test]
    fn impurity_propagates_through_callees() {
        let msgs = messages(
            "fn leaf() -> i32 { return [nil ping]; }\nfn mid() -> i32 { return leaf(); }\npure fn top() -> i32 { return mid(); }\n",
        );
        assert_eq!(msgs.len(), 1);
        assert!(
            msgs[0].contains("(cause: impure-callee:mid; cause-site:3:31; detail:message-send@1:27)"),
            "{}",
            msgs[0]
        );
    }

    #[test]
    fn extern_calls_need_pure_annotation() {
        let msgs = messages("extern fn ext() -> i32;\npure extern fn ok() -> i32;\npure fn f() -> i32 { return ok() + ext(); }\n");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("cause: unannotated-extern-call:ext;"), "{}", msgs[0]);
    }
}
