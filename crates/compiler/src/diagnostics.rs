//! Structured compiler and renderer diagnostics
//!
//! Every decision the compiler or renderer makes that a host might want to explain
//! (a stripped branch, an unmapped parameter, a rejected pass) is recorded here as a
//! [`Diagnostic`] with enough source context to reproduce it without re-running anything.

use serde::Serialize;
use std::fmt;

/// Category of a diagnostic report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DiagnosticKind {
    /// Non-fatal preset problem (unknown key, overridden duplicate)
    ParseWarning,
    /// Fatal preset syntax or reference error
    ParseError,
    /// A conditional branch or `#define` removed during transpilation
    StrippedDefine,
    /// A preset parameter override that no pass declares
    UnmappedParameter,
    /// Fatal transpilation error
    TranspileError,
    /// Fatal pass graph error
    BuildError,
    /// The graphics API rejected a generated stage
    CompileError,
    /// Vertex and fragment stages do not agree on their interface
    LinkError,
    /// A lookup texture the preset declares was not supplied by the host
    MissingTexture,
    /// A resource could not be bound at draw time
    RuntimeBinding,
    /// The renderer gave up on the preset and presents the primary input
    Bypass,
}

impl DiagnosticKind {
    /// Returns true for kinds that prevent or terminate shading
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ParseWarning | Self::StrippedDefine | Self::UnmappedParameter)
    }
}

/// One numbered line of source shown alongside a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    /// 1-based line number in the file the pass was loaded from
    pub number: usize,
    pub text: String,
}

/// A single structured report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Pass the report concerns, if any
    pub pass_index: Option<usize>,
    /// The offending symbol, key or resource name
    pub symbol: Option<String>,
    pub detail: String,
    /// A few lines of surrounding source
    pub context: Vec<SourceLine>,
}

impl Diagnostic {
    /// Creates a diagnostic without symbol or source context
    pub fn new(kind: DiagnosticKind, pass_index: Option<usize>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            pass_index,
            symbol: None,
            detail: detail.into(),
            context: Vec::new(),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_context(mut self, context: Vec<SourceLine>) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.kind)?;
        if let Some(pass) = self.pass_index {
            write!(f, " pass {pass}")?;
        }
        if let Some(symbol) = &self.symbol {
            write!(f, " `{symbol}`")?;
        }
        write!(f, ": {}", self.detail)?;
        for line in &self.context {
            write!(f, "\n  {:>4} | {}", line.number, line.text)?;
        }
        Ok(())
    }
}

/// Accumulated reports for one activation attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report and mirrors it to the log
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.kind.is_fatal() {
            tracing::warn!(kind = ?diagnostic.kind, pass = ?diagnostic.pass_index, symbol = ?diagnostic.symbol, "{}", diagnostic.detail);
        } else {
            tracing::debug!(kind = ?diagnostic.kind, pass = ?diagnostic.pass_index, symbol = ?diagnostic.symbol, "{}", diagnostic.detail);
        }
        self.entries.push(diagnostic);
    }

    /// Shorthand for `push(Diagnostic::new(..))`
    pub fn report(&mut self, kind: DiagnosticKind, pass_index: Option<usize>, detail: impl Into<String>) {
        self.push(Diagnostic::new(kind, pass_index, detail));
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn for_pass(&self, pass_index: usize) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.pass_index == Some(pass_index))
    }

    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Extracts up to `radius` lines on each side of `line` (1-based) from `source`
pub fn context_window(source: &str, line: usize, radius: usize) -> Vec<SourceLine> {
    let first = line.saturating_sub(radius).max(1);
    let last = line + radius;
    source
        .lines()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .filter(|(number, _)| *number >= first && *number <= last)
        .map(|(number, text)| SourceLine { number, text: text.to_string() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_by_kind_and_pass() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.report(DiagnosticKind::StrippedDefine, Some(0), "branch stripped");
        diagnostics.report(DiagnosticKind::UnmappedParameter, None, "no pass declares FOO");
        diagnostics.report(DiagnosticKind::StrippedDefine, Some(1), "branch stripped");

        assert_eq!(diagnostics.of_kind(DiagnosticKind::StrippedDefine).count(), 2);
        assert_eq!(diagnostics.for_pass(1).count(), 1);
        assert!(diagnostics.has(DiagnosticKind::UnmappedParameter));
        assert!(!diagnostics.has(DiagnosticKind::Bypass));
    }

    #[test]
    fn test_context_window_clamps_at_file_start() {
        let source = "a\nb\nc\nd\ne";
        let window = context_window(source, 1, 2);
        let numbers: Vec<_> = window.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let window = context_window(source, 4, 1);
        let texts: Vec<_> = window.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "d", "e"]);
    }

    #[test]
    fn test_display_includes_context() {
        let diagnostic = Diagnostic::new(DiagnosticKind::TranspileError, Some(2), "unknown symbol")
            .with_symbol("Foo")
            .with_context(vec![SourceLine { number: 7, text: "x = Foo;".into() }]);
        let text = diagnostic.to_string();
        assert!(text.starts_with("[TranspileError] pass 2 `Foo`: unknown symbol"));
        assert!(text.contains("7 | x = Foo;"));
    }
}
