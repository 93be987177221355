// Purpose: Binary entry point for the objc3c command line.
// Inputs/Outputs: Reads process args and exits with the CLI's status code.
// Invariants: Main must not bypass the CLI, which itself only calls the library API.
// Gotchas: Exit codes are the CompileStatus codes, so scripts can tell usage errors from diagnostics.

fn main() {
    let code = objc3c::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
