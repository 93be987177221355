// Purpose: Command-line front end over the library API.
// Inputs/Outputs: Process args in; artifacts under --out-dir, diagnostics on stderr, and an exit code out.
// Invariants: Flags map onto CompileOptions only, so the CLI and a library call with equal options emit identical bytes.
// Gotchas: Contract-file values are applied first and explicit flags win over them.

use std::path::PathBuf;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use crate::api;
use crate::compile::{self, CompileOptions, CompileStatus};
use crate::config::ContractFile;
use crate::sema::CompatibilityMode;

pub const DEFAULT_OUT_DIR: &str = "tmp/artifacts/objc3c";

#[derive(Parser, Debug)]
#[command(name = "objc3c", version = env!("OBJC3C_VERSION_LABEL"), about = "ObjC3 native frontend: source to LLVM IR text and a replay manifest")]
pub struct Cli {
    /// Source file to compile.
    pub input: PathBuf,

    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUT_DIR)]
    pub out_dir: PathBuf,

    /// Artifact file stem; defaults to the input's stem.
    #[arg(long, value_name = "NAME")]
    pub emit_prefix: Option<String>,

    #[arg(long = "objc3-runtime-dispatch-symbol", value_name = "SYMBOL")]
    pub runtime_dispatch_symbol: Option<String>,

    #[arg(long = "objc3-max-message-args", value_name = "N")]
    pub max_message_args: Option<usize>,

    #[arg(long = "objc3-language-version", value_name = "V")]
    pub language_version: Option<u32>,

    #[arg(long = "objc3-compat-mode", value_name = "canonical|legacy")]
    pub compat_mode: Option<String>,

    #[arg(long = "objc3-migration-assist")]
    pub migration_assist: bool,

    /// TOML file with [lowering] and [frontend] tables.
    #[arg(long, value_name = "FILE")]
    pub contract: Option<PathBuf>,

    /// Emit artifacts even when semantic diagnostics were reported.
    #[arg(long)]
    pub emit_with_diagnostics: bool,

    #[arg(long)]
    pub no_emit_ir: bool,

    #[arg(long)]
    pub no_emit_manifest: bool,
}

/// Logs go to stderr; `RUST_LOG` overrides the `warn` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Cli {
    /// Builds the options a library host would pass for the same invocation.
    pub fn compile_options(&self) -> Result<CompileOptions, String> {
        let mut options = CompileOptions::default();
        if let Some(path) = &self.contract {
            ContractFile::load(path).map_err(|e| e.to_string())?.apply(&mut options);
        }
        if let Some(symbol) = &self.runtime_dispatch_symbol {
            options.lowering.runtime_dispatch_symbol = symbol.clone();
        }
        if let Some(n) = self.max_message_args {
            options.lowering.max_message_send_args = n;
        }
        if let Some(v) = self.language_version {
            options.language_version = v;
        }
        if let Some(mode) = &self.compat_mode {
            options.compatibility_mode =
                CompatibilityMode::parse(mode).ok_or_else(|| format!("unknown compatibility mode: {}", mode))?;
        }
        if self.migration_assist {
            options.migration_assist = true;
        }
        options.fail_on_diagnostics = !self.emit_with_diagnostics;
        options.emit_ir = !self.no_emit_ir;
        options.emit_manifest = !self.no_emit_manifest;
        Ok(options)
    }
}

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let argv = std::iter::once("objc3c".to_string()).chain(args);
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return err.exit_code();
        }
    };
    init_logging();
    run(&cli)
}

pub fn run(cli: &Cli) -> i32 {
    let options = match cli.compile_options() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("objc3c: {}", message);
            return CompileStatus::UsageError.exit_code();
        }
    };
    debug!(input = %cli.input.display(), out_dir = %cli.out_dir.display(), "compiling");

    let mut ctx = api::create_context();
    let result = ctx.compile_file(&options, &cli.input);
    if let Some(message) = &result.usage_error {
        eprintln!("objc3c: {}", message);
        return result.exit_code();
    }
    for diag in &result.diagnostics {
        eprintln!("{}", diag.render());
    }

    let prefix = cli
        .emit_prefix
        .clone()
        .unwrap_or_else(|| compile::default_emit_prefix(Some(&cli.input)));
    if let Err(err) = compile::write_artifacts(&result, &cli.out_dir, &prefix) {
        eprintln!("objc3c: {:#}", err);
        return CompileStatus::InternalError.exit_code();
    }
    api::destroy_context(ctx);
    result.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("objc3c").chain(args.iter().copied())).expect("parses")
    }

    #[test]
    fn flags_override_contract_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let contract = dir.path().join("c.toml");
        std::fs::write(
            &contract,
            "[lowering]\nmax_message_send_args = 6\nruntime_dispatch_symbol = \"from_file\"\n",
        )
        .expect("write contract");
        let cli = parse(&[
            "a.objc3",
            "--contract",
            contract.to_str().expect("utf8 path"),
            "--objc3-max-message-args",
            "2",
        ]);
        let options = cli.compile_options().expect("options");
        assert_eq!(options.lowering.max_message_send_args, 2);
        assert_eq!(options.lowering.runtime_dispatch_symbol, "from_file");
    }

    #[test]
    fn emission_toggles_map_to_options() {
        let cli = parse(&["a.objc3", "--emit-with-diagnostics", "--no-emit-ir", "--objc3-compat-mode", "legacy"]);
        let options = cli.compile_options().expect("options");
        assert!(!options.fail_on_diagnostics);
        assert!(!options.emit_ir);
        assert!(options.emit_manifest);
        assert_eq!(options.compatibility_mode, CompatibilityMode::Legacy);
    }

    #[test]
    fn unknown_compat_mode_is_usage_error() {
        let cli = parse(&["a.objc3", "--objc3-compat-mode", "strict"]);
        assert_eq!(
            cli.compile_options().expect_err("rejected"),
            "unknown compatibility mode: strict"
        );
        assert_eq!(run(&cli), 2);
    }

    #[test]
    fn missing_input_argument_is_usage_error() {
        assert_eq!(run_cli(Vec::<String>::new()), 2);
    }
}
