//! Error types for parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    // Input errors
    #[error("Input rejected: {reason}")]
    InputRejected { reason: String },

    // Session lifecycle errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Output channel for session {id} is already attached")]
    OutputAlreadyAttached { id: String },

    // Provider errors
    #[error("Recognition stream closed: {message}")]
    RecognitionStreamClosed { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ParleyError {
    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        ParleyError::SessionNotFound { id: id.to_string() }
    }

    /// Provider failures are turn-scoped: the session stays usable afterwards.
    pub fn is_turn_scoped(&self) -> bool {
        matches!(
            self,
            ParleyError::Generation { .. }
                | ParleyError::Synthesis { .. }
                | ParleyError::Retrieval { .. }
                | ParleyError::Timeout { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_session_not_found_display() {
        let error = ParleyError::session_not_found("abc123");
        assert_eq!(error.to_string(), "Session not found: abc123");
    }

    #[test]
    fn test_timeout_display() {
        let error = ParleyError::Timeout {
            operation: "synthesis".to_string(),
            millis: 1500,
        };
        assert_eq!(error.to_string(), "synthesis timed out after 1500ms");
    }

    #[test]
    fn test_generation_display() {
        let error = ParleyError::Generation {
            message: "quota exceeded".to_string(),
        };
        assert_eq!(error.to_string(), "Generation failed: quota exceeded");
    }

    #[test]
    fn test_recognition_stream_closed_display() {
        let error = ParleyError::RecognitionStreamClosed {
            message: "utterance finalized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Recognition stream closed: utterance finalized"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = ParleyError::ConfigInvalidValue {
            key: "context.budget_bytes".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for context.budget_bytes: must be positive"
        );
    }

    #[test]
    fn test_turn_scoped_classification() {
        assert!(
            ParleyError::Synthesis {
                message: "x".to_string()
            }
            .is_turn_scoped()
        );
        assert!(
            ParleyError::Timeout {
                operation: "generation".to_string(),
                millis: 10
            }
            .is_turn_scoped()
        );
        assert!(!ParleyError::session_not_found("x").is_turn_scoped());
        assert!(
            !ParleyError::InputRejected {
                reason: "empty".to_string()
            }
            .is_turn_scoped()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ParleyError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: ParleyError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ParleyError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ParleyError>();
        assert_sync::<ParleyError>();
    }
}
