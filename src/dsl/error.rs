//! Error types for the solfa compiler.
//!
//! A single [`CompileError`] type is used both for fatal errors (lexing,
//! internal invariants) and for the diagnostics accumulated while parsing
//! and resolving.

use std::fmt;

use serde::Serialize;

use super::token::Token;

/// An error or diagnostic produced during compilation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub line: usize,
    pub col: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    LexError,
    SyntaxError,
    IdentifierError,
    ResolutionError,
    InstrumentError,
    /// Parser bookkeeping went wrong. Never caused by user input.
    InternalError,
}

impl CompileError {
    fn new(kind: ErrorKind, message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            line,
            col,
            message: message.into(),
            tip: None,
        }
    }

    pub fn lex(ch: char, line: usize, col: usize) -> Self {
        Self::new(
            ErrorKind::LexError,
            format!("unrecognized character '{ch}'"),
            line,
            col,
        )
    }

    pub fn syntax(message: impl Into<String>, at: &Token) -> Self {
        Self::new(ErrorKind::SyntaxError, message, at.line, at.col)
    }

    pub fn identifier(message: impl Into<String>, at: &Token) -> Self {
        Self::new(ErrorKind::IdentifierError, message, at.line, at.col)
    }

    pub fn resolution(message: impl Into<String>, at: &Token) -> Self {
        Self::new(ErrorKind::ResolutionError, message, at.line, at.col)
    }

    pub fn instrument(message: impl Into<String>, at: &Token) -> Self {
        Self::new(ErrorKind::InstrumentError, message, at.line, at.col)
    }

    pub fn internal(message: impl Into<String>, at: &Token) -> Self {
        Self::new(ErrorKind::InternalError, message, at.line, at.col)
    }

    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    pub fn is_internal(&self) -> bool {
        self.kind == ErrorKind::InternalError
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {}: {}",
            self.line, self.col, self.kind, self.message
        )?;
        if let Some(tip) = &self.tip {
            write!(f, "\n| Tip: {tip}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::token::TokenKind;

    #[test]
    fn display_includes_position_and_kind() {
        let err = CompileError::lex('@', 3, 7);
        assert_eq!(
            err.to_string(),
            "[3:7] LexError: unrecognized character '@'"
        );
    }

    #[test]
    fn display_appends_tip() {
        let token = Token::new("harp", TokenKind::Alphanum, 2, 1);
        let err = CompileError::instrument("instrument \"harp\" is not supported", &token)
            .with_tip("instruments like piano, guitar etc. are available");
        let text = err.to_string();
        assert!(text.starts_with("[2:1] InstrumentError:"));
        assert!(text.ends_with("| Tip: instruments like piano, guitar etc. are available"));
    }

    #[test]
    fn internal_errors_are_flagged() {
        let token = Token::new("", TokenKind::Eof, 1, 1);
        assert!(CompileError::internal("stack", &token).is_internal());
        assert!(!CompileError::syntax("oops", &token).is_internal());
    }
}
