use crate::position::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: Option<String>,
}

impl Label {
    pub fn new(span: Span, message: impl Into<Option<String>>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub primary: Option<Label>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            primary: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// A parse failure. The code doubles as the exception type name reported
    /// to annotation consumers.
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::error(message)
            .with_code("SyntaxError")
            .with_primary(span, None)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_primary(mut self, span: Span, message: impl Into<Option<String>>) -> Self {
        self.primary = Some(Label::new(span, message));
        self
    }

    /// Line of the primary label, if the diagnostic points somewhere.
    pub fn line(&self) -> Option<u32> {
        self.primary.as_ref().map(|label| label.span.line())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(primary) = &self.primary {
            write!(f, "\n --> line {}", primary.span)?;
            if let Some(msg) = &primary.message {
                write!(f, "\n  | {msg}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[derive(Debug, Error)]
pub enum HowlError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("{} doesn't exist", .0.display())]
    MissingTarget(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HowlError {
    /// The diagnostic behind a parse failure, if this error is one.
    pub fn as_syntax_error(&self) -> Option<&Diagnostic> {
        match self {
            HowlError::Diagnostic(diag) if diag.code.as_deref() == Some("SyntaxError") => Some(diag),
            _ => None,
        }
    }
}

pub type HowlResult<T, E = HowlError> = std::result::Result<T, E>;
