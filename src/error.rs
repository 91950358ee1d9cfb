//! Burrow error types

use thiserror::Error;

/// Burrow error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation registry error
    #[error("Registry error: {0}")]
    Registry(String),

    /// Worker did not reach ready within the probe budget
    #[error("Launch failure: {0}")]
    LaunchFailure(String),

    /// Container-runtime control surface returned malformed or
    /// non-structured output; never treated as "no workers"
    #[error("Runtime query error: {0}")]
    RuntimeQuery(String),

    /// IPC request envelope could not be written
    #[error("Channel write error: {0}")]
    ChannelWrite(String),

    /// IPC response envelope could not be read
    #[error("Channel read error: {0}")]
    ChannelRead(String),

    /// No response within the dispatch budget; the worker is not
    /// assumed dead
    #[error("Dispatch timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// A newer worker generation owns the channel; the in-flight
    /// dispatch can no longer be answered
    #[error("Generation mismatch: expected {expected}, observed {observed}")]
    GenerationMismatch { expected: u64, observed: u64 },

    /// Worker process terminated unexpectedly
    #[error("Worker crashed: {0}")]
    CrashExit(String),

    /// Dispatch cancelled by deregistration or shutdown
    #[error("Dispatch cancelled")]
    Cancelled,

    /// Persistent message store unavailable
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short, user-visible reason for a failure notice.
    pub fn notice_reason(&self) -> String {
        match self {
            Error::LaunchFailure(_) => "the agent worker could not be started".to_string(),
            Error::Timeout { .. } => "the agent did not answer in time".to_string(),
            Error::CrashExit(_) => "the agent worker stopped unexpectedly".to_string(),
            Error::Cancelled => "the conversation was deregistered".to_string(),
            Error::Store(_) => "the message store is unavailable".to_string(),
            _ => "an internal error occurred".to_string(),
        }
    }
}

/// Result type alias for Burrow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout { waited_ms: 1500 };
        assert_eq!(err.to_string(), "Dispatch timed out after 1500ms");

        let err = Error::GenerationMismatch {
            expected: 1,
            observed: 2,
        };
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn test_notice_reason_is_user_facing() {
        let err = Error::LaunchFailure("docker run failed".to_string());
        assert!(!err.notice_reason().contains("docker"));
    }
}
