//! Error types for the embedding layer

use rquickjs::convert::Coerced;
use rquickjs::Ctx;
use std::fmt;
use thiserror::Error;

/// A guest exception after it has been pulled out of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// String form of the thrown value.
    pub cause: String,
    /// The thrown value's `stack` property, when it has one.
    pub stack: Option<String>,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cause)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack.trim_end())?;
        }
        Ok(())
    }
}

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(Exception),

    #[error("uncaught exception: {0}")]
    Eval(Exception),

    #[error("cannot convert {from} to {to}")]
    Conversion { from: String, to: String },

    #[error("{0} has already been freed")]
    Freed(&'static str),

    #[error("engine is already running; host callbacks cannot re-enter it")]
    Reentrant,

    #[error("callback registry is full ({limit} live entries)")]
    RegistryFull { limit: usize },

    #[error("source contains an interior NUL byte at offset {0}")]
    InvalidSource(usize),

    #[error("engine error: {0}")]
    Engine(#[source] rquickjs::Error),
}

impl Error {
    pub(crate) fn conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Error::Conversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The guest exception carried by this error, if any.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Error::Compile(exception) | Error::Eval(exception) => Some(exception),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pulls the pending exception out of `ctx`.
///
/// The exception value is released once cause and stack have been copied out.
pub(crate) fn take_exception(ctx: &Ctx<'_>) -> Exception {
    let thrown = ctx.catch();
    let cause = thrown
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| "<unprintable exception>".to_string());
    let stack = thrown
        .as_object()
        .and_then(|object| object.get::<_, rquickjs::Value>("stack").ok())
        .filter(|stack| !stack.is_undefined())
        .and_then(|stack| stack.get::<Coerced<String>>().ok())
        .map(|coerced| coerced.0);
    Exception { cause, stack }
}

/// Maps an engine result, turning a raised guest exception into [`Error::Eval`].
pub(crate) fn check<T>(ctx: &Ctx<'_>, result: rquickjs::Result<T>) -> Result<T> {
    result.map_err(|err| match err {
        rquickjs::Error::Exception => Error::Eval(take_exception(ctx)),
        other => Error::Engine(other),
    })
}
