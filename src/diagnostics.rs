// ABOUTME: Diagnostics accumulator for non-fatal warnings during cleanup.
// ABOUTME: Collects warnings that shouldn't fail an operation but should be shown to users.

use serde::Serialize;

/// Collects non-fatal warnings during cleanup operations.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: impl Into<Warning>) {
        let warning = warning.into();
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }
}

/// A non-fatal warning collected during cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// The cluster refused to remove a service.
    pub fn service_removal(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ServiceRemoval,
            message: message.into(),
        }
    }

    /// A record, domain, or log could not be deleted.
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Cleanup,
            message: message.into(),
        }
    }
}

impl From<String> for Warning {
    fn from(message: String) -> Self {
        Warning::cleanup(message)
    }
}

/// Categories of warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Failed to delete a workload from its cluster.
    ServiceRemoval,
    /// Failed to delete stored state.
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::service_removal("service preview-web-x1 not removed"));
        diag.warn(format!("cannot delete domain {}", "d1"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
        assert_eq!(diag.warnings()[1].kind, WarningKind::Cleanup);
    }

    #[test]
    fn extend_merges_warnings() {
        let mut first = Diagnostics::new();
        first.warn(Warning::cleanup("a"));
        let mut second = Diagnostics::new();
        second.warn(Warning::cleanup("b"));
        first.extend(second);
        assert_eq!(first.warnings().len(), 2);
    }
}
