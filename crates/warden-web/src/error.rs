//! Stage-level errors
//!
//! Authentication failures never surface here; the processing stage turns
//! them into handler responses. A [`WebError`] aborts the current request.

use warden_core::ConfigurationError;

/// Fatal error raised by a pipeline stage
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// The firewall refused the request
    #[error(transparent)]
    RequestRejected(#[from] RequestRejected),

    /// A stage could not complete (handler, repository or codec failure)
    #[error("Internal pipeline error: {0}")]
    Internal(String),

    /// A stage was assembled incorrectly
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl WebError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Firewall rejection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("The request was rejected because {reason}")]
pub struct RequestRejected {
    /// Why the request was rejected
    pub reason: String,
}

impl RequestRejected {
    /// Create a rejection
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message() {
        let err: WebError = RequestRejected::new("the URL contained a potentially malicious String \"//\"").into();
        assert!(err.to_string().starts_with("The request was rejected because"));
    }
}
