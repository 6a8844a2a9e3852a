//! Error types for state store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur against the shared state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A key holds a value of a different type than the operation expects.
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType {
        /// Key that was accessed.
        key: String,
        /// Type the operation required.
        expected: &'static str,
    },

    /// A hash field that should hold an integer does not parse as one.
    #[error("field '{field}' of '{key}' is not an integer")]
    NotAnInteger {
        /// Key that was accessed.
        key: String,
        /// Offending field.
        field: String,
    },
}

impl StoreError {
    /// Whether retrying the operation later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_key() {
        let err = StoreError::WrongType {
            key: "traffic_logs".to_string(),
            expected: "list",
        };
        assert_eq!(err.to_string(), "wrong type for key 'traffic_logs': expected list");
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("timeout".to_string()).is_transient());
        assert!(!StoreError::NotAnInteger {
            key: "k".to_string(),
            field: "f".to_string(),
        }
        .is_transient());
    }
}
