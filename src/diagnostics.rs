//! Severity-tagged validation messages.
//!
//! Validators do not fail fast: they push every problem they find into a
//! [`Diagnostics`] accumulator, and the token is rejected iff at least one
//! entry is [`Severity::Fatal`].

use std::fmt;

/// How much a diagnostic matters for the validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Renders the token invalid.
    Fatal,
    /// Logged, does not block.
    Warning,
    /// Informational, does not block.
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Fatal => "fatal",
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        })
    }
}

/// One validation message with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Component that produced the message, e.g. `"jwk"` or `"claims"`.
    pub source: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.source, self.message)
    }
}

/// Ordered collection of [`Diagnostic`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, source: &'static str, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity,
            source,
            message: message.into(),
        });
    }

    pub fn fatal(&mut self, source: &'static str, message: impl Into<String>) {
        self.push(Severity::Fatal, source, message);
    }

    pub fn warn(&mut self, source: &'static str, message: impl Into<String>) {
        self.push(Severity::Warning, source, message);
    }

    pub fn hint(&mut self, source: &'static str, message: impl Into<String>) {
        self.push(Severity::Hint, source, message);
    }

    /// `true` when no entry is fatal.
    pub fn is_valid(&self) -> bool {
        !self.entries.iter().any(|d| d.severity == Severity::Fatal)
    }

    /// Fatal entries only.
    pub fn fatal_entries(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Fatal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append all entries of `other`, keeping order.
    pub fn merge(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    /// Emit every entry through `tracing`.
    pub fn log(&self) {
        for d in &self.entries {
            match d.severity {
                Severity::Fatal => {
                    tracing::debug!(source = d.source, message = %d.message, "token validation failed")
                }
                Severity::Warning => {
                    tracing::debug!(source = d.source, message = %d.message, "token validation warning")
                }
                Severity::Hint => {
                    tracing::trace!(source = d.source, message = %d.message, "token validation hint")
                }
            }
        }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_valid() {
        assert!(Diagnostics::new().is_valid());
    }

    #[test]
    fn test_warnings_and_hints_do_not_invalidate() {
        let mut d = Diagnostics::new();
        d.warn("jwk", "no kid");
        d.hint("jwk", "unusual typ");
        assert!(d.is_valid());
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_single_fatal_invalidates() {
        let mut d = Diagnostics::new();
        d.hint("jwk", "unusual typ");
        d.fatal("claims", "expired");
        assert!(!d.is_valid());
        assert_eq!(d.fatal_entries().count(), 1);
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut a = Diagnostics::new();
        a.warn("jwk", "first");
        let mut b = Diagnostics::new();
        b.fatal("claims", "second");
        a.merge(b);

        let messages: Vec<_> = a.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert!(!a.is_valid());
    }

    #[test]
    fn test_display() {
        let mut d = Diagnostics::new();
        d.fatal("introspection", "Token is not active");
        let first = d.into_iter().next().unwrap();
        assert_eq!(first.to_string(), "fatal [introspection]: Token is not active");
    }
}
