// Error types. Compile-time failures are returned by value; runtime errors
// travel through the dispatch loop as an explicit control signal carrying the
// Lua error value, and are converted to `LuaError::Runtime` only when they
// reach the embedding boundary.

use crate::value::Value;

pub type LuaResult<T> = Result<T, LuaError>;

/// Internal control signal propagated through dispatch. Not part of the
/// public API surface.
#[derive(Debug, Clone)]
pub enum Control {
    /// A runtime error carrying the Lua error object.
    Error(Value),
    /// A coroutine yield carrying the yielded values.
    Yield(Vec<Value>),
}

/// Errors surfaced to the embedding caller.
#[derive(Debug, Clone)]
pub enum LuaError {
    Compile(CompileError),
    Runtime(RuntimeError),
    Memory(String),
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Compile(e) => write!(f, "{e}"),
            LuaError::Runtime(e) => write!(f, "{e}"),
            LuaError::Memory(msg) => write!(f, "not enough memory: {msg}"),
        }
    }
}

impl std::error::Error for LuaError {}

/// A code-generation or syntax failure, reported with its source location.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub source: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, source: impl Into<String>, line: u32) -> Self {
        CompileError {
            message: message.into(),
            source: source.into(),
            line,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.source, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// An uncaught runtime error: the rendered error value plus a traceback.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub traceback: String,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.traceback.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}\nstack traceback:\n{}", self.message, self.traceback)
        }
    }
}

impl std::error::Error for RuntimeError {}
