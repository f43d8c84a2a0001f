//! Error types for the session crate.

use thiserror::Error;

/// Errors that can occur in the session layer.
///
/// Cache misses are never errors; reads return empty defaults instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was never created or has been torn down.
    #[error("session record not found: {session_id}")]
    MissingSession { session_id: String },

    /// A session with this id is already registered.
    #[error("session already exists: {session_id}")]
    SessionExists { session_id: String },

    /// The registry is at its configured capacity.
    #[error("session limit reached ({limit})")]
    SessionLimitReached { limit: usize },

    /// The engine refused to perform an action.
    #[error("action {action_id} rejected: {reason}")]
    ActionRejected { action_id: String, reason: String },

    /// Engine collaborator failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Metadata source (network client) failure.
    #[error("metadata source error: {0}")]
    Source(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    /// Build a [`SessionError::MissingSession`] for `session_id`.
    pub fn missing(session_id: impl Into<String>) -> Self {
        Self::MissingSession {
            session_id: session_id.into(),
        }
    }

    /// True when the session has expired or was never initialized.
    pub fn is_missing_session(&self) -> bool {
        matches!(self, Self::MissingSession { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_session_is_recognizable() {
        let err = SessionError::missing("s-1");
        assert!(err.is_missing_session());
        assert_eq!(err.to_string(), "session record not found: s-1");

        let other = SessionError::Engine("boom".to_string());
        assert!(!other.is_missing_session());
    }
}
