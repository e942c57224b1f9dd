//! Diagnostics collected while parsing.
//!
//! The parser never gives up on a tune: unknown symbols are skipped and
//! missing header fields get defaults. What it had to assume is reported here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// The construct was dropped.
    Error,
    /// Parsed with an assumption.
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// 1-based line within the input.
    pub line: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    items: Vec<Diagnostic>,
    line: usize,
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Diagnostics {
            items: Vec::new(),
            line: 1,
        }
    }

    pub(crate) fn at_line(&mut self, line: usize) {
        self.line = line;
    }

    pub(crate) fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.items.push(Diagnostic {
            severity,
            message: message.into(),
            line: self.line,
        });
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub(crate) fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub(crate) fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

/// A value together with everything the parser had to say about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parsed<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Parsed<T> {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_carry_current_line() {
        let mut diags = Diagnostics::new();
        diags.warn("first");
        diags.at_line(4);
        diags.push(Severity::Error, "second");

        let parsed = Parsed {
            value: (),
            diagnostics: diags.into_vec(),
        };
        assert!(parsed.has_errors());
        assert_eq!(parsed.warnings().count(), 1);
        assert_eq!(parsed.diagnostics[0].line, 1);
        assert_eq!(parsed.diagnostics[1].line, 4);
    }
}
