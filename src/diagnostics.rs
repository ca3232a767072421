//! Diagnostics collected while decompiling a function.
//!
//! Most problems a decompiler meets do not justify aborting: an instruction without
//! a lowering, an indirect jump nobody can resolve, two uses that disagree about a
//! value's type, a region that does not fit any control structure. Each of those is
//! reported here and the pipeline continues with a conservative result.
//!
//! The [`Diagnostics`] container uses `boxcar::Vec`, so every stage appends through
//! a shared reference and the finished function carries the full list.
//!
//! # Usage Examples
//!
//! ```rust
//! use irscope::{DiagnosticCategory, Diagnostics};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.warning_at(
//!     DiagnosticCategory::UnresolvedControlFlow,
//!     "indirect jump through rax",
//!     0x1010,
//! );
//!
//! assert_eq!(diagnostics.count(), 1);
//! assert_eq!(
//!     diagnostics.by_category(DiagnosticCategory::UnresolvedControlFlow).len(),
//!     1
//! );
//! ```

use std::fmt::{self, Write};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    /// Informational; output is unaffected.
    Info,

    /// Output is degraded but still sound (a placeholder, an `Unknown` type, a
    /// goto where a structure was expected).
    Warning,

    /// A stage produced no result for part of the function.
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "INFO"),
            DiagnosticSeverity::Warning => write!(f, "WARN"),
            DiagnosticSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// Which pipeline concern raised the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// The front end skipped an instruction or emitted a placeholder for it.
    UnsupportedInstruction,

    /// A branch target could not be determined statically.
    UnresolvedControlFlow,

    /// Type constraints on a value disagree.
    TypeConflict,

    /// A region fell back to explicit gotos.
    Unstructured,

    /// Translation stopped at the instruction limit.
    Truncated,

    /// Anything else.
    General,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::UnsupportedInstruction => write!(f, "UnsupportedInstruction"),
            DiagnosticCategory::UnresolvedControlFlow => write!(f, "UnresolvedControlFlow"),
            DiagnosticCategory::TypeConflict => write!(f, "TypeConflict"),
            DiagnosticCategory::Unstructured => write!(f, "Unstructured"),
            DiagnosticCategory::Truncated => write!(f, "Truncated"),
            DiagnosticCategory::General => write!(f, "General"),
        }
    }
}

/// A single diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: DiagnosticSeverity,

    /// Source concern.
    pub category: DiagnosticCategory,

    /// Human readable description.
    pub message: String,

    /// Instruction address the diagnostic refers to, if any.
    pub address: Option<u64>,
}

impl Diagnostic {
    /// Creates a new diagnostic without an address.
    pub fn new(
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            address: None,
        }
    }

    /// Attaches an instruction address.
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)?;

        if let Some(address) = self.address {
            write!(f, " (address: 0x{address:x})")?;
        }

        Ok(())
    }
}

/// Append-only diagnostic container.
///
/// Appends take `&self`, so analysis stages that only borrow their inputs can
/// still report problems.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Adds an info-level diagnostic.
    pub fn info(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Info, category, message));
    }

    /// Adds a warning-level diagnostic.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(
            DiagnosticSeverity::Warning,
            category,
            message,
        ));
    }

    /// Adds a warning-level diagnostic tied to an instruction address.
    pub fn warning_at(
        &self,
        category: DiagnosticCategory,
        message: impl Into<String>,
        address: u64,
    ) {
        self.push(
            Diagnostic::new(DiagnosticSeverity::Warning, category, message).with_address(address),
        );
    }

    /// Adds an error-level diagnostic.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(
            DiagnosticSeverity::Error,
            category,
            message,
        ));
    }

    /// Adds a pre-built diagnostic.
    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Appends every entry of `other`.
    pub fn extend_from(&self, other: &Diagnostics) {
        for diagnostic in other.iter() {
            self.push(diagnostic.clone());
        }
    }

    /// Returns `true` if any diagnostic was recorded.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns `true` if any error-level diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, d)| d.severity == DiagnosticSeverity::Error)
    }

    /// Total number of diagnostics.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.count_severity(DiagnosticSeverity::Error)
    }

    /// Number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.count_severity(DiagnosticSeverity::Warning)
    }

    fn count_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == severity)
            .count()
    }

    /// Iterates all diagnostics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Diagnostics of one category.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// One line per diagnostic, preceded by a count header.
    pub fn summary(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "Diagnostics: {} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        );
        for diag in self.iter() {
            let _ = writeln!(output, "  {diag}");
        }
        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
