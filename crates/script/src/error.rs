//! Errors surfaced by compiling or running a script.
//!
//! Every failure a user script can cause ends up here as a message; nothing
//! panics on user input.

use thiserror::Error;

use crate::span::Span;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptErrorKind {
    /// Lexing or parsing failed.
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax { message: String, line: u32, column: u32 },

    /// Uncaught TypeError (calling a non-function, reading from `undefined`).
    #[error("TypeError: {0}")]
    Type(String),

    /// Uncaught ReferenceError (unknown identifier).
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// Any other uncaught `throw`.
    #[error("{0}")]
    Thrown(String),

    /// Step budget or call depth exhausted.
    #[error("{0}")]
    LimitExceeded(String),

    /// Host-side failure (query execution, bad binding).
    #[error("{0}")]
    Host(String),
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self { kind: ScriptErrorKind::Syntax { message: message.into(), line: span.line, column: span.column } }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self { kind: ScriptErrorKind::Type(message.into()) }
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self { kind: ScriptErrorKind::Reference(message.into()) }
    }

    pub fn thrown(message: impl Into<String>) -> Self {
        Self { kind: ScriptErrorKind::Thrown(message.into()) }
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self { kind: ScriptErrorKind::LimitExceeded(message.into()) }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self { kind: ScriptErrorKind::Host(message.into()) }
    }

    /// Human-readable message, as shown in rule reports.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self.kind, ScriptErrorKind::Syntax { .. })
    }

    pub fn is_limit(&self) -> bool {
        matches!(self.kind, ScriptErrorKind::LimitExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
