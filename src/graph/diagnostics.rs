//! Diagnostics
//!
//! Collects warnings and errors during parsing and validation.
//! Nothing here aborts: every pass keeps going so one run reports every
//! problem in the schema.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceLocation;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing schema problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Structure ===
    /// Two members or aggregates share a physical name in one scope
    DuplicateName,
    /// Reference path does not resolve to an aggregate
    DanglingReference,
    /// Root or Children-element aggregate declares no key
    MissingKey,
    /// Variation with no variants
    EmptyVariantSet,
    /// Key references form a cycle
    CyclicKeyReference,

    // === Parsing ===
    /// Type tag is not a known kind, primitive or enum
    UnknownTypeTag,
    /// Attribute value is malformed or not allowed here
    InvalidAttribute,
    /// Physical name is not an identifier
    InvalidName,
    /// Variant discriminator is not an integer
    InvalidDiscriminator,
    /// Two variants of one variation share a discriminator
    DuplicateDiscriminator,
    /// Node appears where its kind is not allowed
    MisplacedNode,
    /// Reference points at a Child or Variant aggregate
    InvalidReferenceTarget,
    /// Key reference chain is deeper than the configured bound
    KeyChainTooDeep,

    // === Hints ===
    /// Enum declared but never used by a scalar
    UnusedEnum,
    /// Key declared on a Child or Variant aggregate
    KeyOnOwnedOneToOne,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateName => "E001",
            Self::DanglingReference => "E002",
            Self::MissingKey => "E003",
            Self::EmptyVariantSet => "E004",
            Self::CyclicKeyReference => "E005",
            Self::UnknownTypeTag => "E006",
            Self::InvalidAttribute => "E007",
            Self::InvalidName => "E008",
            Self::InvalidDiscriminator => "E009",
            Self::DuplicateDiscriminator => "E010",
            Self::MisplacedNode => "E011",
            Self::InvalidReferenceTarget => "E012",
            Self::KeyChainTooDeep => "E013",
            Self::UnusedEnum => "W001",
            Self::KeyOnOwnedOneToOne => "W002",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::UnusedEnum | Self::KeyOnOwnedOneToOne => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Aggregate path the problem belongs to (`Order/Lines`), or the node path
    /// when no aggregate exists yet
    pub path: String,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Additional context (suggestions, cycle members, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    /// Set when `warnings_as_errors` promoted this item
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub promoted: bool,
}

impl DiagnosticItem {
    pub fn new(path: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
            location: None,
            context: Vec::new(),
            promoted: false,
        }
    }

    pub fn at(mut self, location: &SourceLocation) -> Self {
        self.location = Some(location.clone());
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        if self.promoted {
            Severity::Error
        } else {
            self.code.severity()
        }
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.severity(),
            self.message,
            self.path
        )?;

        if let Some(location) = &self.location {
            write!(f, "\n  at {}", location)?;
        }

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from parsing and validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item
    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    /// Add a located diagnostic
    pub fn report(
        &mut self,
        path: impl Into<String>,
        code: DiagnosticCode,
        location: &SourceLocation,
        message: impl Into<String>,
    ) {
        self.push(DiagnosticItem::new(path, code, message).at(location));
    }

    /// Add diagnostic for a reference path that resolves to nothing
    pub fn dangling_reference(
        &mut self,
        path: impl Into<String>,
        location: &SourceLocation,
        target: &str,
        suggestion: Option<&str>,
    ) {
        let mut item = DiagnosticItem::new(
            path,
            DiagnosticCode::DanglingReference,
            format!("Reference target '{}' not found", target),
        )
        .at(location);
        if let Some(suggestion) = suggestion {
            item = item.with_context(format!("did you mean '{}'?", suggestion));
        }
        self.push(item);
    }

    /// Add diagnostic for a cycle of key references
    pub fn cyclic_key_reference(
        &mut self,
        path: impl Into<String>,
        location: &SourceLocation,
        cycle: &[String],
    ) {
        self.push(
            DiagnosticItem::new(
                path,
                DiagnosticCode::CyclicKeyReference,
                "Key references form a cycle",
            )
            .at(location)
            .with_context(format!("Cycle: {}", cycle.join(" -> "))),
        );
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    /// Get all errors
    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    /// Get all warnings
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Get all items
    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    /// Items with the given code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Treat every warning as an error
    pub fn promote_warnings(&mut self) {
        for item in &mut self.items {
            if item.code.severity() == Severity::Warning {
                item.promoted = true;
            }
        }
    }

    /// Stable order: by path, then code, then message.
    ///
    /// Passes run in a fixed order already; sorting makes the report
    /// independent of which pass found a problem first.
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            (&a.path, a.code, &a.message).cmp(&(&b.path, b.code, &b.message))
        });
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if self.has_errors() {
            output.push_str(&format!(
                "\n{} error(s), {} warning(s)\n",
                self.error_count(),
                self.warning_count()
            ));
        } else if !self.is_empty() {
            output.push_str(&format!("\n{} warning(s)\n", self.warning_count()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_severity() {
        assert_eq!(DiagnosticCode::DanglingReference.severity(), Severity::Error);
        assert_eq!(DiagnosticCode::UnusedEnum.severity(), Severity::Warning);
    }

    #[test]
    fn test_diagnostics_collection() {
        let loc = SourceLocation::default();
        let mut diags = Diagnostics::new();
        diags.dangling_reference("Order", &loc, "Prodcut", Some("Product"));
        diags.report("Status", DiagnosticCode::UnusedEnum, &loc, "enum never used");

        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert!(diags.has_errors());

        let text = diags.format_all();
        assert!(text.contains("[E002] error"));
        assert!(text.contains("did you mean 'Product'?"));
    }

    #[test]
    fn test_promote_warnings() {
        let mut diags = Diagnostics::new();
        diags.report(
            "Status",
            DiagnosticCode::UnusedEnum,
            &SourceLocation::default(),
            "enum never used",
        );
        assert!(!diags.has_errors());

        diags.promote_warnings();
        assert!(diags.has_errors());
        assert_eq!(diags.warning_count(), 0);
    }
}
