//! Error types for the public data plane.

use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur serving public traffic.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The listener could not be bound.
    #[error("failed to bind {0}")]
    BindError(String),

    /// The server is already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The server is not running.
    #[error("server not running")]
    NotRunning,

    /// The buffered request body exceeded the configured cap.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured cap.
        limit: usize,
    },

    /// The request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// No upstream is configured for the request.
    #[error("no upstream target for '{path}'")]
    NoUpstream {
        /// Request path.
        path: String,
    },

    /// The upstream did not produce a response.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The upstream took longer than the configured timeout.
    #[error("upstream timed out after {timeout_ms} ms")]
    UpstreamTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            GatewayError::BodyTooLarge { limit: 1024 }.to_string(),
            "request body exceeds 1024 bytes"
        );
        assert_eq!(
            GatewayError::NoUpstream {
                path: "/x".to_string()
            }
            .to_string(),
            "no upstream target for '/x'"
        );
    }
}
