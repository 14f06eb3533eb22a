//! Source evaluation and compiled programs
//!
//! These are the only places that talk to the raw engine API: `rquickjs`
//! offers no compile-only mode and no object serialization, so compilation,
//! serialization and bytecode loading go through `qjs` directly.

use crate::error::{take_exception, Error, Exception, Result};
use rquickjs::{qjs, Ctx, Value};
use std::ffi::CString;
use std::fmt;

const INPUT_NAME: &[u8] = b"<input>\0";

/// An opaque compiled program.
///
/// The byte format belongs to the engine build that produced it; loading it
/// into a different engine version is not supported.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bytecode(Vec<u8>);

impl Bytecode {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Bytecode {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Bytecode {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytecode({} bytes)", self.0.len())
    }
}

/// How a piece of source is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Script,
    Module,
}

impl SourceKind {
    /// Classifies `source` by its leading syntax (`import` / `export`).
    pub fn detect(source: &str) -> Result<SourceKind> {
        let input = source_string(source)?;
        // SAFETY: `input` is NUL-terminated and outlives the call.
        let detected = unsafe { qjs::JS_DetectModule(input.as_ptr(), source.len() as _) };
        Ok(if detected as i32 != 0 {
            SourceKind::Module
        } else {
            SourceKind::Script
        })
    }

    fn eval_flags(self) -> i32 {
        match self {
            SourceKind::Script => qjs::JS_EVAL_TYPE_GLOBAL as i32,
            SourceKind::Module => qjs::JS_EVAL_TYPE_MODULE as i32,
        }
    }
}

fn source_string(source: &str) -> Result<CString> {
    CString::new(source).map_err(|err| Error::InvalidSource(err.nul_position()))
}

fn raw_eval<'js>(ctx: &Ctx<'js>, source: &str, compile_only: bool) -> Result<Value<'js>> {
    let kind = SourceKind::detect(source)?;
    let input = source_string(source)?;
    let mut flags = kind.eval_flags();
    if compile_only {
        flags |= qjs::JS_EVAL_FLAG_COMPILE_ONLY as i32;
    }
    tracing::debug!(?kind, len = source.len(), compile_only, "evaluating source");
    // SAFETY: both strings are NUL-terminated.
    let raw = unsafe {
        qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            input.as_ptr(),
            source.len() as _,
            INPUT_NAME.as_ptr().cast(),
            flags as _,
        )
    };
    owned(ctx, raw)
}

/// Takes ownership of an engine return value, or of the pending exception
/// when the engine signalled one.
fn owned<'js>(ctx: &Ctx<'js>, raw: qjs::JSValue) -> Result<Value<'js>> {
    if is_exception(raw) {
        return Err(Error::Eval(take_exception(ctx)));
    }
    // SAFETY: `raw` is a live value whose reference now belongs to the wrapper.
    Ok(unsafe { Value::from_raw(ctx.clone(), raw) })
}

/// True for the engine's exception sentinel. Error objects returned as
/// ordinary values do not count.
fn is_exception(raw: qjs::JSValue) -> bool {
    // SAFETY: reads the tag only.
    unsafe { qjs::JS_VALUE_GET_NORM_TAG(raw) as i32 == qjs::JS_TAG_EXCEPTION as i32 }
}

/// Evaluates `source` as a script or module, whichever its syntax says.
pub(crate) fn eval<'js>(ctx: &Ctx<'js>, source: &str) -> Result<Value<'js>> {
    raw_eval(ctx, source, false)
}

/// Parses `source` without running it and serializes the program.
pub(crate) fn compile(ctx: &Ctx<'_>, source: &str) -> Result<Bytecode> {
    let program = raw_eval(ctx, source, true).map_err(|err| match err {
        Error::Eval(exception) => Error::Compile(exception),
        other => other,
    })?;
    let raw_ctx = ctx.as_raw().as_ptr();
    let mut size = 0;
    // SAFETY: `program` stays alive across the call; the returned buffer is
    // engine-allocated and released with `js_free` after copying.
    let bytes = unsafe {
        let buffer = qjs::JS_WriteObject(
            raw_ctx,
            &mut size,
            program.as_raw(),
            qjs::JS_WRITE_OBJ_BYTECODE as _,
        );
        if buffer.is_null() {
            return Err(Error::Compile(take_exception(ctx)));
        }
        let bytes = std::slice::from_raw_parts(buffer, size as usize).to_vec();
        qjs::js_free(raw_ctx, buffer.cast());
        bytes
    };
    if bytes.is_empty() {
        return Err(Error::Compile(Exception {
            cause: "serialization produced no bytecode".to_string(),
            stack: None,
        }));
    }
    tracing::debug!(len = bytes.len(), "compiled program");
    Ok(Bytecode(bytes))
}

/// Loads a serialized program and runs it.
///
/// Malformed input is reported by the engine as an exception and surfaces as
/// [`Error::Eval`].
pub(crate) fn eval_binary<'js>(ctx: &Ctx<'js>, bytecode: &[u8]) -> Result<Value<'js>> {
    let raw_ctx = ctx.as_raw().as_ptr();
    // SAFETY: the slice is valid for the call; the engine copies what it keeps.
    let program = unsafe {
        qjs::JS_ReadObject(
            raw_ctx,
            bytecode.as_ptr(),
            bytecode.len() as _,
            qjs::JS_READ_OBJ_BYTECODE as _,
        )
    };
    let program = owned(ctx, program)?;
    // SAFETY: JS_EvalFunction consumes its argument, so it gets its own reference.
    let result = unsafe {
        let program = qjs::JS_DupValue(program.as_raw());
        qjs::JS_EvalFunction(raw_ctx, program)
    };
    drop(program);
    owned(ctx, result)
}
