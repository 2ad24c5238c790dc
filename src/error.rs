//! Error hierarchy for the interpreter.
//!
//! Static diagnostics (scanner, parser, resolver) are values of [`LoxError`]
//! and accumulate; a [`RuntimeError`] halts execution of the current run.
//! Nothing in this module prints; the session decides where diagnostics go.

use thiserror::Error;

use log::debug;

use crate::token::{Token, TokenType};

/// Static (pre‑execution) error, rendered as `[line N] Error <where>: <message>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoxError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] Error {location}: {message}")]
    Lex {
        /// Human‑readable description.
        message: String,

        /// 1‑based line where the error occurred.
        line: usize,

        /// Always empty for lexical errors.
        location: String,
    },

    /// Syntactic (parser) error.
    #[error("[line {line}] Error {location}: {message}")]
    Parse {
        message: String,
        line: usize,
        location: String,
    },

    /// Scope‑resolution error, e.g. a local read in its own initializer.
    #[error("[line {line}] Error {location}: {message}")]
    Resolve {
        message: String,
        line: usize,
        location: String,
    },
}

/// `" at end"` for EOF, `" at 'lexeme'"` otherwise.
fn location_of(token: &Token) -> String {
    if token.token_type == TokenType::EOF {
        " at end".to_string()
    } else {
        format!(" at '{}'", token.lexeme)
    }
}

impl LoxError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Lex error: line={}, msg={}", line, message);

        LoxError::Lex {
            message,
            line,
            location: String::new(),
        }
    }

    /// Helper constructor for the **parser**, located at `token`.
    pub fn parse<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Parse error: line={}, msg={}", token.line, message);

        LoxError::Parse {
            message,
            line: token.line,
            location: location_of(token),
        }
    }

    /// Helper constructor for the **resolver**, located at `token`.
    pub fn resolve<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Resolve error: line={}, msg={}", token.line, message);

        LoxError::Resolve {
            message,
            line: token.line,
            location: location_of(token),
        }
    }
}

/// Crate‑wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoxError>;

/// Fault raised while executing a program. The first one ends the run.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}\n[line {line}]")]
pub struct RuntimeError {
    pub message: String,

    /// Line of the token that triggered the fault.
    pub line: usize,
}

impl RuntimeError {
    pub fn new<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Runtime error: line={}, msg={}", token.line, message);

        RuntimeError {
            message,
            line: token.line,
        }
    }
}
