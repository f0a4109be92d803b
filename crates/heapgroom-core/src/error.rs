//! Engine error taxonomy.

use thiserror::Error;

/// Errors surfaced by the grooming engine.
///
/// Every error aborts only the request it was raised in; no engine state is
/// shared between requests.
#[derive(Debug, Error)]
pub enum GroomError {
    /// A size, alignment, offset or table was zero or otherwise malformed.
    #[error("invalid input: {what} = {value}")]
    InvalidInput { what: &'static str, value: String },
    /// A trace or simulator operation was malformed.
    #[error("invalid operation at index {index}: {reason}")]
    InvalidOperation { index: usize, reason: String },
    /// The bug descriptor named a kind outside overflow/underflow/use-after-free.
    #[error("unsupported bug kind: '{0}'")]
    UnsupportedBugKind(String),
    /// Injected configuration (layouts, eligibility, engine config) failed to parse.
    #[error("configuration json: {0}")]
    Layout(#[from] serde_json::Error),
}

impl GroomError {
    /// Stable snake_case label for the error class.
    pub fn class(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::InvalidOperation { .. } => "invalid_operation",
            Self::UnsupportedBugKind(_) => "unsupported_bug_kind",
            Self::Layout(_) => "layout",
        }
    }

    pub(crate) fn invalid_input(what: &'static str, value: impl ToString) -> Self {
        Self::InvalidInput {
            what,
            value: value.to_string(),
        }
    }

    pub(crate) fn invalid_operation(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            index,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GroomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = GroomError::invalid_input("alignment", 0);
        assert_eq!(err.to_string(), "invalid input: alignment = 0");

        let err = GroomError::invalid_operation(7, "unknown action 'realloc'");
        assert_eq!(
            err.to_string(),
            "invalid operation at index 7: unknown action 'realloc'"
        );

        let err = GroomError::UnsupportedBugKind("double_free".to_string());
        assert_eq!(err.to_string(), "unsupported bug kind: 'double_free'");
        assert_eq!(err.class(), "unsupported_bug_kind");
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: GroomError = parse.into();
        assert!(matches!(err, GroomError::Layout(_)));
    }
}
