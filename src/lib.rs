// Purpose: Define the crate-level module surface for the ObjC3 frontend.
// Inputs/Outputs: Exposes the pipeline stages plus the three host surfaces (api, ffi, cli).
// Invariants: Hosts go through compile (directly or via api/ffi/cli); stage modules stay internal plumbing.
// Gotchas: Keep module wiring consistent with src/main.rs and the staticlib/cdylib exports in ffi.

pub mod api;
pub mod cli;
pub mod codegen;
pub mod compile;
pub mod config;
pub mod ffi;
pub mod frontend;
pub mod lower;
pub mod sema;
