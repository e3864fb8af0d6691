//! Runtime error types.

use moonlet_compiler::CompileError;
use moonlet_core::value::TValue;
use thiserror::Error;

/// Why a runtime error was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// `error()`, a failed operation or a native argument check.
    Raised,
    /// An `__index`/`__newindex` chain or native re-entry went too deep.
    RecursionLimit,
    /// Too many call frames or stack slots.
    StackOverflow,
}

/// A catchable error carrying the raised value.
#[derive(Clone, Debug)]
pub struct RuntimeError {
    /// The value seen by `pcall`: position-prefixed when it is a string.
    pub value: TValue,
    /// The value before any position prefix was added.
    pub raw: TValue,
    /// Human readable rendering of `value`.
    pub message: String,
    /// Stack traceback captured where the error was raised.
    pub traceback: Option<String>,
    pub kind: RuntimeErrorKind,
}

/// Errors surfaced by the VM.
#[derive(Clone, Debug, Error)]
pub enum LuaError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("{}", .0.message)]
    Runtime(Box<RuntimeError>),
    /// A broken interpreter invariant. Never caught by `pcall`.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LuaError {
    pub fn runtime(value: TValue, raw: TValue, message: String, kind: RuntimeErrorKind) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            raw,
            message,
            traceback: None,
            kind,
        }))
    }

    pub fn kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            LuaError::Runtime(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime(e) => e.traceback.as_deref(),
            _ => None,
        }
    }

    /// The rendered message without traceback.
    pub fn message(&self) -> String {
        match self {
            LuaError::Runtime(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}
