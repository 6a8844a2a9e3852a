//! Error types for the rate limiting pipeline.

use thiserror::Error;

/// Result type for limiter operations.
pub type LimiterResult<T> = Result<T, LimiterError>;

/// Errors that can occur while loading rules or accounting requests.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// A stored rule did not deserialize.
    #[error("malformed rule '{rule_id}': {message}")]
    MalformedRule {
        /// Hash field the rule was stored under.
        rule_id: String,
        /// Parser message.
        message: String,
    },

    /// A rule's path pattern did not compile.
    #[error("invalid path pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// The state store failed underneath the limiter.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}
