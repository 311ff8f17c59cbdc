use serde::{Deserialize, Serialize};

/// The outcome of validating an instruction set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Errors joined for single-line log and audit fields. Warnings never
    /// fail an attempt, so they are left out.
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Collects rule outcomes without short-circuiting, so a single submission
/// reports every correctable problem at once.
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) -> &mut Self {
        self.errors.push(message.into());
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &mut Self {
        self.warnings.push(message.into());
        self
    }

    /// Records `message` as an error when `violated` holds.
    pub fn check(&mut self, violated: bool, message: impl FnOnce() -> String) -> &mut Self {
        if violated {
            self.errors.push(message());
        }
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn finish(self) -> ValidationResult {
        ValidationResult {
            is_valid: !self.has_errors(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_keeps_every_error_in_order() {
        let mut report = ValidationReport::new();
        report
            .error("first")
            .check(false, || "skipped".to_string())
            .check(true, || "second".to_string())
            .warn("heads up");
        let result = report.finish();

        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["first", "second"]);
        assert_eq!(result.warnings, vec!["heads up"]);
        assert_eq!(result.summary(), "first; second");
    }

    #[test]
    fn warnings_alone_do_not_invalidate() {
        let mut report = ValidationReport::new();
        report.warn("market value unknown");
        assert!(!report.has_errors());

        let result = report.finish();
        assert!(result.is_valid);
        assert_eq!(result.summary(), "");
    }
}
