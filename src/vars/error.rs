// ABOUTME: Error types for variable resolution.
// ABOUTME: Covers missing required values, constraint failures, and unresolved placeholders.

use thiserror::Error;

/// A single resolution failure for one variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// A variable marked required has no non-blank effective value.
    #[error("required variable '{name}' has no value")]
    RequiredVariableMissing { name: String },

    /// A provided value violated the variable's type or constraint.
    #[error("variable '{name}' failed validation: {reason}")]
    ValidationFailed { name: String, reason: String },

    /// A placeholder without an inline default had no resolvable value.
    #[error("unresolved placeholder '${{{name}}}' in template")]
    UnresolvedVariable { name: String },
}

impl ResolutionError {
    /// Name of the variable this error is about.
    pub fn variable(&self) -> &str {
        match self {
            ResolutionError::RequiredVariableMissing { name }
            | ResolutionError::ValidationFailed { name, .. }
            | ResolutionError::UnresolvedVariable { name } => name,
        }
    }
}

/// All failures from one resolution attempt. Resolution never returns
/// partially-substituted content alongside errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable resolution failed: {}", self.summary())]
pub struct ResolutionErrors {
    pub errors: Vec<ResolutionError>,
}

impl ResolutionErrors {
    pub fn new(errors: Vec<ResolutionError>) -> Self {
        Self { errors }
    }

    fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
