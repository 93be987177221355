use super::ast::Span;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Most severe sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Fatal => 0,
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Note => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            span,
        }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn column(&self) -> usize {
        self.span.column
    }

    /// Single-line rendering: `error:<line>:<column>: <message> [<code>]`.
    pub fn render(&self) -> String {
        format!(
            "{}:{}:{}: {} [{}]",
            self.severity.label(),
            self.span.line,
            self.span.column,
            self.message,
            self.code
        )
    }
}

/// One stage's or one pass's batch, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, code: &'static str, message: impl Into<String>, span: Span) {
        self.items.push(Diagnostic::error(code, message, span));
    }

    pub fn push_diag(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_canonical(mut self) -> Vec<Diagnostic> {
        canonicalize(&mut self.items);
        self.items
    }
}

pub fn canonicalize(items: &mut [Diagnostic]) {
    items.sort_by(|a, b| {
        a.span
            .line
            .cmp(&b.span.line)
            .then(a.span.column.cmp(&b.span.column))
            .then(a.severity.rank().cmp(&b.severity.rank()))
            .then(a.code.cmp(b.code))
            .then(a.message.cmp(&b.message))
    });
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub notes: usize,
    pub warnings: usize,
    pub errors: usize,
    pub fatals: usize,
}

impl SeverityCounts {
    pub fn of(items: &[Diagnostic]) -> Self {
        let mut counts = Self::default();
        for diag in items {
            match diag.severity {
                Severity::Note => counts.notes += 1,
                Severity::Warning => counts.warnings += 1,
                Severity::Error => counts.errors += 1,
                Severity::Fatal => counts.fatals += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.notes + self.warnings + self.errors + self.fatals
    }
}

/// Append-only sink owned by one compilation.
#[derive(Debug, Default)]
pub struct DiagnosticsBus {
    items: Vec<Diagnostic>,
}

impl DiagnosticsBus {
    pub fn publish(&mut self, batch: Vec<Diagnostic>) {
        self.items.extend(batch);
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Diagnostic> {
        self.items
    }
}

pub fn render_all(items: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diag in items {
        out.push_str(&diag.render());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{Diagnostic, Diagnostics, DiagnosticsBus, Span, canonicalize};

    #[test]
    fn renders_single_line_format() {
        let diag = Diagnostic::error("O3S202", "undefined identifier 'x'", Span::at(3, 7));
        assert_eq!(diag.render(), "error:3:7: undefined identifier 'x' [O3S202]");
    }

    #[test]
    fn canonical_order_is_position_then_code() {
        let mut items = vec![
            Diagnostic::error("O3S204", "b", Span::at(2, 1)),
            Diagnostic::error("O3S203", "a", Span::at(2, 1)),
            Diagnostic::error("O3S200", "c", Span::at(1, 9)),
        ];
        canonicalize(&mut items);
        let codes: Vec<_> = items.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["O3S200", "O3S203", "O3S204"]);
    }

    #[test]
    fn bus_count_only_grows() {
        let mut bus = DiagnosticsBus::default();
        let mut batch = Diagnostics::default();
        batch.push("O3S201", "duplicate", Span::at(1, 1));
        bus.publish(batch.into_canonical());
        let before = bus.count();
        bus.publish(Vec::new());
        assert_eq!(bus.count(), before);
    }
}
