//! The diagnostic sink.
//!
//! Semantic problems never abort compilation: the offending construct
//! lowers to an `unreachable` placeholder and a diagnostic is recorded
//! here. Severities are mirrored to the `log` facade so embedders see
//! compiler output without draining the sink.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Where the problem was found: a function, element, or source name.
    pub context: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {} (in {})", self.severity, self.message, context),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> DiagnosticSink {
        DiagnosticSink::default()
    }

    pub fn error(&mut self, message: impl Into<String>, context: Option<&str>) {
        self.push(Severity::Error, message.into(), context);
    }

    pub fn warning(&mut self, message: impl Into<String>, context: Option<&str>) {
        self.push(Severity::Warning, message.into(), context);
    }

    pub fn info(&mut self, message: impl Into<String>, context: Option<&str>) {
        self.push(Severity::Info, message.into(), context);
    }

    fn push(&mut self, severity: Severity, message: String, context: Option<&str>) {
        let diagnostic = Diagnostic {
            severity,
            message,
            context: context.map(str::to_string),
        };
        match severity {
            Severity::Error => log::error!("{diagnostic}"),
            Severity::Warning => log::warn!("{diagnostic}"),
            Severity::Info => log::info!("{diagnostic}"),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
