#![allow(dead_code)]

use objc3c::compile::{CompileOptions, CompileResult, compile_source};

/// Fifty lines touching globals, an interface pair, loops, a switch and message sends.
pub const INVENTORY: &str = "module inventory;
let base = 10;
let scale = base * 2 + 1;

@interface Counter
@property (nonatomic) i32 value;
- (i32) value;
- (i32) sum:(i32)x with:(i32)y;
@end

@implementation Counter
- (i32) value { return 3; }
- (i32) sum:(i32)x with:(i32)y { return x + y + [self value]; }
@end

pure fn add(a: i32, b: i32) -> i32 {
  return a + b;
}

fn classify(n: i32) -> i32 {
  let r = 0;
  switch (n) {
    case 1: r = 10; break;
    case 2: r = 20; break;
    default: r = -1;
  }
  return r;
}

fn accumulate(limit: i32) -> i32 {
  let total = 0;
  for (let i = 0; i < limit; i++) {
    if (i % 2 == 0) {
      total += i;
    } else {
      total -= 1;
    }
  }
  let k = 3;
  while (k > 0) {
    k--;
    total = total + k;
  }
  return total;
}

fn main() -> i32 {
  let c = 1;
  let both = add(base, scale);
  let counted = [c sum:both with:2];
  let folded = [nil value];
  return classify(2) + accumulate(5) + counted + folded;
}
";

pub fn compile(src: &str) -> CompileResult {
    compile_source(&CompileOptions::default(), src)
}

pub fn lenient() -> CompileOptions {
    CompileOptions {
        fail_on_diagnostics: false,
        ..CompileOptions::default()
    }
}

pub fn manifest_json(result: &CompileResult) -> serde_json::Value {
    serde_json::from_str(result.manifest.as_deref().expect("manifest emitted")).expect("manifest is json")
}

pub fn codes(result: &CompileResult) -> Vec<&str> {
    result.diagnostics.iter().map(|d| d.code).collect()
}

/// Runs lex, parse and the sema passes without the facade.
pub fn analyze(src: &str) -> (objc3c::sema::SemaOutput, Vec<objc3c::frontend::diagnostic::Diagnostic>) {
    use objc3c::frontend::diagnostic::DiagnosticsBus;
    use objc3c::frontend::lexer::{LexOptions, tokenize};
    use objc3c::frontend::parser::{ParseOptions, parse};
    use objc3c::sema::{CompatibilityMode, SemaOptions, run_passes};

    let lexed = tokenize(
        src,
        LexOptions {
            language_version: 3,
            migration_assist: false,
        },
    );
    assert_eq!(lexed.diags.len(), 0, "lexer diagnostics in fixture");
    let parsed = parse(lexed.tokens, ParseOptions { runtime_dispatch_arg_slots: 4 });
    assert_eq!(parsed.diags.len(), 0, "parser diagnostics in fixture");
    let mut bus = DiagnosticsBus::default();
    let out = run_passes(
        &parsed.program,
        &SemaOptions {
            max_message_send_args: 4,
            compatibility_mode: CompatibilityMode::Canonical,
            migration_assist: false,
            hints: lexed.hints,
        },
        &mut bus,
    );
    (out, bus.into_items())
}
