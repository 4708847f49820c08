use thiserror::Error;

use crate::token::{Span, Token};

#[derive(Debug, Error)]
pub enum EmberError {
    #[error("Could not read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("[line {line}] Error: {message}")]
    Scan {
        message: String,
        line: usize,
        span: Span,
    },

    #[error("[line {line}] Error{location}: {message}")]
    Parse {
        message: String,
        location: String,
        line: usize,
        span: Span,
    },

    #[error("[line {line}] Error{location}: {message}")]
    Resolution {
        message: String,
        location: String,
        line: usize,
        span: Span,
    },

    #[error("[line {line}] Warning{location}: {message}")]
    Warning {
        message: String,
        location: String,
        line: usize,
        span: Span,
    },

    #[error("{message}\n[line {line}]")]
    Runtime {
        message: String,
        line: usize,
        span: Span,
    },
}

impl EmberError {
    pub fn parse(token: &Token, message: impl Into<String>) -> Self {
        EmberError::Parse {
            message: message.into(),
            location: token.location(),
            line: token.line,
            span: token.span.clone(),
        }
    }

    pub fn resolution(token: &Token, message: impl Into<String>) -> Self {
        EmberError::Resolution {
            message: message.into(),
            location: token.location(),
            line: token.line,
            span: token.span.clone(),
        }
    }

    pub fn warning(token: &Token, message: impl Into<String>) -> Self {
        EmberError::Warning {
            message: message.into(),
            location: token.location(),
            line: token.line,
            span: token.span.clone(),
        }
    }

    pub fn runtime(token: &Token, message: impl Into<String>) -> Self {
        EmberError::Runtime {
            message: message.into(),
            line: token.line,
            span: token.span.clone(),
        }
    }

    /// Warnings are reported but never stop a run.
    pub fn is_warning(&self) -> bool {
        matches!(self, EmberError::Warning { .. })
    }

    /// Scan, parse and resolution errors: the program was never executed.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            EmberError::Scan { .. } | EmberError::Parse { .. } | EmberError::Resolution { .. }
        )
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, EmberError::Runtime { .. })
    }

    /// Message without the line prefix, used by the rich renderer.
    pub fn message(&self) -> String {
        match self {
            EmberError::Io(e) => e.to_string(),
            EmberError::Scan { message, .. }
            | EmberError::Parse { message, .. }
            | EmberError::Resolution { message, .. }
            | EmberError::Warning { message, .. }
            | EmberError::Runtime { message, .. } => message.clone(),
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            EmberError::Io(_) => None,
            EmberError::Scan { span, .. }
            | EmberError::Parse { span, .. }
            | EmberError::Resolution { span, .. }
            | EmberError::Warning { span, .. }
            | EmberError::Runtime { span, .. } => Some(span),
        }
    }
}
