//! Diagnostic sink for compile and execution messages.
//!
//! Kernel validation, island compilation and the execution state machine all
//! report through [`DiagnosticSink`] so the owning graph can surface messages
//! next to the node that produced them. Engineering logs go through `tracing`
//! instead and never reach the sink.

use crate::graph::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub text: String,
    /// 1-based line in the kernel source this message points at, if any.
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub task: Option<TaskId>,
}

impl Diagnostic {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            line: None,
            column: None,
            task: None,
        }
    }

    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Whether this message should abort the run it belongs to. Error-classed
    /// messages always do; so does any message containing "failed", because
    /// some shader backends swallow the actual error and only emit a final
    /// failure line.
    pub fn aborts_run(&self) -> bool {
        self.severity == Severity::Error || self.text.to_ascii_lowercase().contains("failed")
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "[{line},{column}] {}", self.text),
            (Some(line), None) => write!(f, "[{line}] {}", self.text),
            _ => write!(f, "{}", self.text),
        }
    }
}

/// Ordered collection of diagnostics produced by one compile or one run.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    messages: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(target: "compute", "{diagnostic}"),
            Severity::Warning => tracing::warn!(target: "compute", "{diagnostic}"),
            Severity::Info => tracing::debug!(target: "compute", "{diagnostic}"),
        }
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Error, text));
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Warning, text));
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Info, text));
    }

    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == Severity::Error)
    }
}
