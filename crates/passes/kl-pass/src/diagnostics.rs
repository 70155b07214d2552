//! Recoverable errors and warnings collected while lowering

use derive_more::Display;
use kl_span::FileSpan;
use tracing::{debug, warn};

/// How bad a collected diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Severity {
    /// Fails the build once lowering finishes
    #[display("error")]
    Error,
    /// Lowering degraded for one site only
    #[display("warning")]
    Warning,
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{severity}: {message} at {span}")]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Message shown to the user
    pub message: String,
    /// Source location
    pub span: FileSpan,
}

/// Diagnostics in report order
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Report a recoverable compile error
    pub fn error(&mut self, message: impl Into<String>, span: FileSpan) {
        let message = message.into();
        debug!(%span, %message, "lowering error reported");
        self.items.push(Diagnostic {
            severity: Severity::Error,
            message,
            span,
        });
    }

    /// Report a warning
    pub fn warning(&mut self, message: impl Into<String>, span: FileSpan) {
        let message = message.into();
        warn!(%span, "{message}");
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            message,
            span,
        });
    }

    /// Whether any error was reported
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| item.severity == Severity::Error)
    }

    /// Number of errors
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Errors only
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.items.iter().filter(|item| item.severity == Severity::Error)
    }

    /// Warnings only
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.items.iter().filter(|item| item.severity == Severity::Warning)
    }

    /// Everything, in report order
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.items.iter()
    }

    /// Number of diagnostics
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was reported
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
