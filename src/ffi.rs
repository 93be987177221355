// Purpose: C-linkage shim over the library API with a stable ABI version.
// Inputs/Outputs: Caller-owned option/result structs; artifacts land in out_dir and the result points at context-owned paths.
// Invariants: Every entry point routes through api::Context, so C hosts see exactly what Rust hosts see.
// Gotchas: Path pointers stay valid only until the next compile call on the same context or its destruction.

use std::ffi::{CStr, CString, c_char};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::api::{self, Context};
use crate::compile::{self, CompileOptions, CompileResult, CompileStatus, IN_MEMORY_SOURCE, Stage, StageSummary};
use crate::sema::CompatibilityMode;

pub const OBJC3C_FRONTEND_ABI_VERSION: u32 = 1;
pub const OBJC3C_FRONTEND_MIN_COMPATIBILITY_ABI_VERSION: u32 = 1;
pub const OBJC3C_FRONTEND_MAX_COMPATIBILITY_ABI_VERSION: u32 = OBJC3C_FRONTEND_ABI_VERSION;

pub const OBJC3C_FRONTEND_STATUS_OK: u32 = 0;
pub const OBJC3C_FRONTEND_STATUS_DIAGNOSTICS: u32 = 1;
pub const OBJC3C_FRONTEND_STATUS_USAGE_ERROR: u32 = 2;
pub const OBJC3C_FRONTEND_STATUS_EMIT_ERROR: u32 = 3;
pub const OBJC3C_FRONTEND_STATUS_INTERNAL_ERROR: u32 = 4;

pub const OBJC3C_FRONTEND_STAGE_LEX: u32 = 0;
pub const OBJC3C_FRONTEND_STAGE_PARSE: u32 = 1;
pub const OBJC3C_FRONTEND_STAGE_SEMA: u32 = 2;
pub const OBJC3C_FRONTEND_STAGE_LOWER: u32 = 3;
pub const OBJC3C_FRONTEND_STAGE_EMIT: u32 = 4;

pub const OBJC3C_FRONTEND_SEVERITY_NOTE: u32 = 0;
pub const OBJC3C_FRONTEND_SEVERITY_WARNING: u32 = 1;
pub const OBJC3C_FRONTEND_SEVERITY_ERROR: u32 = 2;
pub const OBJC3C_FRONTEND_SEVERITY_FATAL: u32 = 3;

const VERSION_STRING: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Zero or null fields fall back to `CompileOptions::default()`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Objc3cCompileOptions {
    pub input_path: *const c_char,
    pub source_text: *const c_char,
    pub out_dir: *const c_char,
    pub emit_prefix: *const c_char,
    pub runtime_dispatch_symbol: *const c_char,
    pub max_message_send_args: u32,
    pub language_version: u32,
    /// 0 canonical, 1 legacy.
    pub compatibility_mode: u8,
    pub migration_assist: u8,
    pub emit_manifest: u8,
    pub emit_ir: u8,
    pub emit_with_diagnostics: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Objc3cStageSummary {
    pub stage: u32,
    pub attempted: u8,
    pub skipped: u8,
    pub reserved: u16,
    pub diagnostics_total: u32,
    pub diagnostics_notes: u32,
    pub diagnostics_warnings: u32,
    pub diagnostics_errors: u32,
    pub diagnostics_fatals: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Objc3cCompileResult {
    pub status: u32,
    pub process_exit_code: i32,
    pub success: u8,
    pub semantic_skipped: u8,
    pub reserved: u16,
    pub lex: Objc3cStageSummary,
    pub parse: Objc3cStageSummary,
    pub sema: Objc3cStageSummary,
    pub lower: Objc3cStageSummary,
    pub emit: Objc3cStageSummary,
    pub diagnostics_path: *const c_char,
    pub manifest_path: *const c_char,
    pub ir_path: *const c_char,
}

impl Objc3cCompileResult {
    fn with_status(status: CompileStatus) -> Self {
        Self {
            status: status.code(),
            process_exit_code: status.exit_code(),
            success: u8::from(status == CompileStatus::Ok),
            semantic_skipped: 1,
            reserved: 0,
            lex: Objc3cStageSummary::default(),
            parse: Objc3cStageSummary::default(),
            sema: Objc3cStageSummary::default(),
            lower: Objc3cStageSummary::default(),
            emit: Objc3cStageSummary::default(),
            diagnostics_path: ptr::null(),
            manifest_path: ptr::null(),
            ir_path: ptr::null(),
        }
    }
}

fn stage_summary(summary: &StageSummary) -> Objc3cStageSummary {
    let clamp = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
    Objc3cStageSummary {
        stage: summary.stage.id(),
        attempted: u8::from(summary.attempted),
        skipped: u8::from(summary.skipped),
        reserved: 0,
        diagnostics_total: clamp(summary.diagnostics),
        diagnostics_notes: clamp(summary.severities.notes),
        diagnostics_warnings: clamp(summary.severities.warnings),
        diagnostics_errors: clamp(summary.severities.errors),
        diagnostics_fatals: clamp(summary.severities.fatals),
    }
}

/// Opaque to C; owns the path strings handed out through results.
pub struct Objc3cContext {
    inner: Context,
    owned_paths: Vec<CString>,
    error_override: Option<String>,
}

impl Objc3cContext {
    fn last_error(&self) -> &str {
        self.error_override.as_deref().unwrap_or_else(|| self.inner.last_error())
    }

    fn fail_usage(&mut self, message: impl Into<String>) -> Objc3cCompileResult {
        self.error_override = Some(message.into());
        Objc3cCompileResult::with_status(CompileStatus::UsageError)
    }

    fn hold(&mut self, path: &Path) -> *const c_char {
        match CString::new(path.display().to_string()) {
            Ok(owned) => {
                self.owned_paths.push(owned);
                self.owned_paths.last().map_or(ptr::null(), |s| s.as_ptr())
            }
            Err(_) => ptr::null(),
        }
    }
}

/// The C options after string decoding.
struct Request {
    options: CompileOptions,
    input_path: Option<String>,
    source_text: Option<String>,
    out_dir: Option<PathBuf>,
    emit_prefix: Option<String>,
}

/// # Safety
/// Every non-null pointer must be a valid NUL-terminated string.
unsafe fn read_str(p: *const c_char, field: &str) -> Result<Option<String>, String> {
    if p.is_null() {
        return Ok(None);
    }
    // SAFETY: the caller guarantees a NUL-terminated string.
    let raw = unsafe { CStr::from_ptr(p) };
    let text = raw
        .to_str()
        .map_err(|_| format!("compile_options.{} is not valid UTF-8", field))?;
    Ok(if text.is_empty() { None } else { Some(text.to_string()) })
}

/// # Safety
/// See `read_str`.
unsafe fn decode(raw: &Objc3cCompileOptions) -> Result<Request, String> {
    let mut options = CompileOptions::default();
    // SAFETY: forwarded from the caller.
    let (input_path, source_text, out_dir, emit_prefix, symbol) = unsafe {
        (
            read_str(raw.input_path, "input_path")?,
            read_str(raw.source_text, "source_text")?,
            read_str(raw.out_dir, "out_dir")?,
            read_str(raw.emit_prefix, "emit_prefix")?,
            read_str(raw.runtime_dispatch_symbol, "runtime_dispatch_symbol")?,
        )
    };
    if let Some(symbol) = symbol {
        options.lowering.runtime_dispatch_symbol = symbol;
    }
    if raw.max_message_send_args > 0 {
        options.lowering.max_message_send_args = raw.max_message_send_args as usize;
    }
    if raw.language_version > 0 {
        options.language_version = raw.language_version;
    }
    options.compatibility_mode = match raw.compatibility_mode {
        0 => CompatibilityMode::Canonical,
        1 => CompatibilityMode::Legacy,
        other => return Err(format!("unknown compatibility mode: {}", other)),
    };
    options.migration_assist = raw.migration_assist != 0;
    options.emit_ir = raw.emit_ir != 0;
    options.emit_manifest = raw.emit_manifest != 0;
    options.fail_on_diagnostics = raw.emit_with_diagnostics == 0;
    Ok(Request {
        options,
        input_path,
        source_text,
        out_dir: out_dir.map(PathBuf::from),
        emit_prefix,
    })
}

fn emit_prefix_for(request: &Request) -> String {
    match &request.emit_prefix {
        Some(prefix) => prefix.clone(),
        None => compile::default_emit_prefix(request.input_path.as_deref().map(Path::new)),
    }
}

fn finish(ctx: &mut Objc3cContext, request: &Request, compiled: CompileResult) -> Objc3cCompileResult {
    let mut out = Objc3cCompileResult::with_status(compiled.status);
    out.semantic_skipped = u8::from(compiled.semantic_skipped);
    out.lex = stage_summary(compiled.stage(Stage::Lex));
    out.parse = stage_summary(compiled.stage(Stage::Parse));
    out.sema = stage_summary(compiled.stage(Stage::Sema));
    out.lower = stage_summary(compiled.stage(Stage::Lower));
    out.emit = stage_summary(compiled.stage(Stage::Emit));

    let Some(out_dir) = &request.out_dir else {
        return out;
    };
    if compiled.status == CompileStatus::UsageError {
        return out;
    }
    match compile::write_artifacts(&compiled, out_dir, &emit_prefix_for(request)) {
        Ok(paths) => {
            if let Some(p) = &paths.diagnostics {
                out.diagnostics_path = ctx.hold(p);
            }
            if let Some(p) = &paths.manifest {
                out.manifest_path = ctx.hold(p);
            }
            if let Some(p) = &paths.ir {
                out.ir_path = ctx.hold(p);
            }
        }
        Err(err) => {
            ctx.error_override = Some(format!("{:#}", err));
            out = Objc3cCompileResult {
                status: OBJC3C_FRONTEND_STATUS_INTERNAL_ERROR,
                process_exit_code: CompileStatus::InternalError.exit_code(),
                success: 0,
                ..out
            };
        }
    }
    out
}

enum Input {
    Source,
    File,
}

/// # Safety
/// Pointers must be null or valid for the access the C header documents.
unsafe fn compile_entry(
    ctx: *mut Objc3cContext,
    options: *const Objc3cCompileOptions,
    result: *mut Objc3cCompileResult,
    input: Input,
) -> u32 {
    if ctx.is_null() || options.is_null() || result.is_null() {
        return OBJC3C_FRONTEND_STATUS_USAGE_ERROR;
    }
    // SAFETY: checked non-null above; the host owns the pointees for the call.
    let (ctx, raw, result) = unsafe { (&mut *ctx, &*options, &mut *result) };
    ctx.owned_paths.clear();
    ctx.error_override = None;

    // SAFETY: string fields follow the same contract as the struct pointer.
    let request = match unsafe { decode(raw) } {
        Ok(request) => request,
        Err(message) => {
            *result = ctx.fail_usage(message);
            return result.status;
        }
    };

    let compiled = match input {
        Input::Source => {
            let Some(source) = request.source_text.as_deref() else {
                *result = ctx.fail_usage("compile_source requires compile_options.source_text");
                return result.status;
            };
            let mut options = request.options.clone();
            options.source_name = Some(request.input_path.clone().unwrap_or_else(|| IN_MEMORY_SOURCE.to_string()));
            ctx.inner.compile_source(&options, source)
        }
        Input::File => {
            let Some(path) = request.input_path.as_deref() else {
                *result = ctx.fail_usage("compile_file requires compile_options.input_path");
                return result.status;
            };
            ctx.inner.compile_file(&request.options, Path::new(path))
        }
    };
    *result = finish(ctx, &request, compiled);
    result.status
}

#[unsafe(no_mangle)]
pub extern "C" fn objc3c_frontend_abi_version() -> u32 {
    OBJC3C_FRONTEND_ABI_VERSION
}

#[unsafe(no_mangle)]
pub extern "C" fn objc3c_frontend_is_abi_compatible(requested_abi_version: u32) -> u8 {
    u8::from(
        (OBJC3C_FRONTEND_MIN_COMPATIBILITY_ABI_VERSION..=OBJC3C_FRONTEND_MAX_COMPATIBILITY_ABI_VERSION)
            .contains(&requested_abi_version),
    )
}

/// Static for the life of the process.
#[unsafe(no_mangle)]
pub extern "C" fn objc3c_frontend_version_string() -> *const c_char {
    VERSION_STRING.as_ptr().cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn objc3c_frontend_context_create() -> *mut Objc3cContext {
    Box::into_raw(Box::new(Objc3cContext {
        inner: api::create_context(),
        owned_paths: Vec::new(),
        error_override: None,
    }))
}

/// # Safety
/// `context` must come from `objc3c_frontend_context_create` and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objc3c_frontend_context_destroy(context: *mut Objc3cContext) {
    if context.is_null() {
        return;
    }
    // SAFETY: ownership returns to Rust exactly once.
    let boxed = unsafe { Box::from_raw(context) };
    api::destroy_context(boxed.inner);
}

/// # Safety
/// `context`, `options` and `result` must be valid; string fields must be NUL-terminated or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objc3c_frontend_compile_source(
    context: *mut Objc3cContext,
    options: *const Objc3cCompileOptions,
    result: *mut Objc3cCompileResult,
) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { compile_entry(context, options, result, Input::Source) }
}

/// # Safety
/// Same contract as `objc3c_frontend_compile_source`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objc3c_frontend_compile_file(
    context: *mut Objc3cContext,
    options: *const Objc3cCompileOptions,
    result: *mut Objc3cCompileResult,
) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { compile_entry(context, options, result, Input::File) }
}

/// Returns the bytes needed including the NUL; a null buffer or zero size only reports the size.
///
/// # Safety
/// `buffer` must be writable for `buffer_size` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objc3c_frontend_copy_last_error(
    context: *const Objc3cContext,
    buffer: *mut c_char,
    buffer_size: usize,
) -> usize {
    // SAFETY: null or a live context per the contract.
    let message = unsafe { context.as_ref() }.map_or("", |ctx| ctx.last_error());
    let required = message.len() + 1;
    if buffer.is_null() || buffer_size == 0 {
        return required;
    }
    let n = message.len().min(buffer_size - 1);
    // SAFETY: n + 1 <= buffer_size and the regions cannot overlap.
    unsafe {
        ptr::copy_nonoverlapping(message.as_ptr().cast::<c_char>(), buffer, n);
        *buffer.add(n) = 0;
    }
    required
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_options() -> Objc3cCompileOptions {
        Objc3cCompileOptions {
            input_path: ptr::null(),
            source_text: ptr::null(),
            out_dir: ptr::null(),
            emit_prefix: ptr::null(),
            runtime_dispatch_symbol: ptr::null(),
            max_message_send_args: 0,
            language_version: 0,
            compatibility_mode: 0,
            migration_assist: 0,
            emit_manifest: 1,
            emit_ir: 1,
            emit_with_diagnostics: 0,
            reserved: [0; 3],
        }
    }

    fn last_error(ctx: *const Objc3cContext) -> String {
        let needed = unsafe { objc3c_frontend_copy_last_error(ctx, ptr::null_mut(), 0) };
        let mut buf = vec![0 as c_char; needed];
        unsafe { objc3c_frontend_copy_last_error(ctx, buf.as_mut_ptr(), buf.len()) };
        unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
    }

    #[test]
    fn abi_window_is_exact() {
        assert_eq!(objc3c_frontend_abi_version(), 1);
        assert_eq!(objc3c_frontend_is_abi_compatible(1), 1);
        assert_eq!(objc3c_frontend_is_abi_compatible(0), 0);
        assert_eq!(objc3c_frontend_is_abi_compatible(2), 0);
        let version = unsafe { CStr::from_ptr(objc3c_frontend_version_string()) };
        assert_eq!(version.to_str().expect("utf8"), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn source_compile_writes_artifacts_matching_library() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = CString::new("fn main() -> i32 { return 7; }").expect("cstring");
        let out_dir = CString::new(dir.path().display().to_string()).expect("cstring");
        let prefix = CString::new("demo").expect("cstring");
        let mut options = blank_options();
        options.source_text = source.as_ptr();
        options.out_dir = out_dir.as_ptr();
        options.emit_prefix = prefix.as_ptr();

        let ctx = objc3c_frontend_context_create();
        let mut result = Objc3cCompileResult::with_status(CompileStatus::InternalError);
        let status = unsafe { objc3c_frontend_compile_source(ctx, &options, &mut result) };
        assert_eq!(status, OBJC3C_FRONTEND_STATUS_OK);
        assert_eq!(result.success, 1);
        assert_eq!(result.emit.stage, OBJC3C_FRONTEND_STAGE_EMIT);
        assert_eq!(result.emit.attempted, 1);
        assert!(!result.ir_path.is_null());

        let ir_path = unsafe { CStr::from_ptr(result.ir_path) }.to_string_lossy().into_owned();
        let written = std::fs::read_to_string(&ir_path).expect("ir written");
        let direct = compile::compile_source(&CompileOptions::default(), "fn main() -> i32 { return 7; }");
        assert_eq!(Some(written), direct.ir);
        assert!(ir_path.ends_with("demo.ll"));
        unsafe { objc3c_frontend_context_destroy(ctx) };
    }

    #[test]
    fn missing_inputs_are_usage_errors() {
        let ctx = objc3c_frontend_context_create();
        let options = blank_options();
        let mut result = Objc3cCompileResult::with_status(CompileStatus::Ok);
        let status = unsafe { objc3c_frontend_compile_source(ctx, &options, &mut result) };
        assert_eq!(status, OBJC3C_FRONTEND_STATUS_USAGE_ERROR);
        assert_eq!(result.process_exit_code, 2);
        assert_eq!(last_error(ctx), "compile_source requires compile_options.source_text");

        let status = unsafe { objc3c_frontend_compile_file(ctx, &options, &mut result) };
        assert_eq!(status, OBJC3C_FRONTEND_STATUS_USAGE_ERROR);
        assert_eq!(
            unsafe { objc3c_frontend_compile_file(ptr::null_mut(), &options, &mut result) },
            OBJC3C_FRONTEND_STATUS_USAGE_ERROR
        );
        unsafe { objc3c_frontend_context_destroy(ctx) };
    }

    #[test]
    fn oversized_slot_count_is_rejected() {
        let ctx = objc3c_frontend_context_create();
        let source = CString::new("fn main() -> i32 { return 0; }").expect("cstring");
        let mut options = blank_options();
        options.source_text = source.as_ptr();
        options.max_message_send_args = 17;
        let mut result = Objc3cCompileResult::with_status(CompileStatus::Ok);
        let status = unsafe { objc3c_frontend_compile_source(ctx, &options, &mut result) };
        assert_eq!(status, OBJC3C_FRONTEND_STATUS_USAGE_ERROR);
        assert_eq!(result.lex.attempted, 0);
        assert!(last_error(ctx).contains("max_message_send_args"));
        unsafe { objc3c_frontend_context_destroy(ctx) };
    }

    #[test]
    fn copy_last_error_truncates_and_terminates() {
        let ctx = objc3c_frontend_context_create();
        assert_eq!(unsafe { objc3c_frontend_copy_last_error(ctx, ptr::null_mut(), 0) }, 1);
        let options = blank_options();
        let mut result = Objc3cCompileResult::with_status(CompileStatus::Ok);
        unsafe { objc3c_frontend_compile_source(ctx, &options, &mut result) };

        let mut small = [0x7f as c_char; 8];
        let needed = unsafe { objc3c_frontend_copy_last_error(ctx, small.as_mut_ptr(), small.len()) };
        assert!(needed > small.len());
        assert_eq!(small[7], 0);
        let text = unsafe { CStr::from_ptr(small.as_ptr()) }.to_string_lossy().into_owned();
        assert_eq!(text, "compile");
        assert_eq!(unsafe { objc3c_frontend_copy_last_error(ptr::null(), ptr::null_mut(), 0) }, 1);
        unsafe { objc3c_frontend_context_destroy(ctx) };
    }
}
