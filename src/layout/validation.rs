//! Layout validation result

use serde::{Deserialize, Serialize};

/// Outcome of validating the `.deck` layout.
///
/// Errors (structural absence) invalidate the result; warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryValidationResult {
    pub is_valid: bool,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Imperative next steps
    #[serde(default)]
    pub repair_suggestions: Vec<String>,
}

impl DirectoryValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Add a repair step once, keeping first-seen order.
    pub fn suggest(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        if !self.repair_suggestions.contains(&suggestion) {
            self.repair_suggestions.push(suggestion);
        }
    }
}
