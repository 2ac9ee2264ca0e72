//! Error types for configuration-script processing.

use thiserror::Error;

/// Errors produced while lexing, parsing, or evaluating a configuration
/// script.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("line {line}: unexpected character '{ch}'")]
    UnexpectedChar { ch: char, line: usize },

    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: invalid number '{text}'")]
    InvalidNumber { text: String, line: usize },

    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("line {line}: unknown function '{name}'")]
    UnknownFunction { name: String, line: usize },

    #[error("undefined name '{0}'")]
    UndefinedName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("{0}")]
    Host(String),
}

/// Errors a [`Host`](crate::Host) implementation may return from a call.
///
/// `Unknown` means the host does not provide the function at all; the
/// evaluator turns it into [`ScriptError::UnknownFunction`] with the call
/// site's line number.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown function")]
    Unknown,

    #[error("{0}")]
    Failed(String),
}
