//! Error types for Aphrodite Core

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized: only the host may issue playback commands")]
    NotAuthorized,

    #[error("Session is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("Session {0} is closed")]
    SessionClosed(Uuid),

    #[error("Participant {0} is not in this session")]
    UnknownParticipant(Uuid),

    #[error("Participant {0} already joined")]
    AlreadyJoined(Uuid),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Password hashing failed: {0}")]
    Password(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a join attempt can fail, as surfaced to callers of the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    NotFound,
    CapacityExceeded,
    AuthenticationRequired,
    Timeout,
}

impl Error {
    /// Narrow a core error to the join error surface, if it belongs there
    pub fn join_error(&self) -> Option<JoinError> {
        match self {
            Error::NotFound(_) | Error::SessionClosed(_) => Some(JoinError::NotFound),
            Error::CapacityExceeded { .. } => Some(JoinError::CapacityExceeded),
            Error::AuthenticationRequired => Some(JoinError::AuthenticationRequired),
            Error::Timeout(_) => Some(JoinError::Timeout),
            _ => None,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_error_mapping() {
        assert_eq!(
            Error::CapacityExceeded { capacity: 2 }.join_error(),
            Some(JoinError::CapacityExceeded)
        );
        assert_eq!(
            Error::SessionClosed(Uuid::nil()).join_error(),
            Some(JoinError::NotFound)
        );
        assert_eq!(Error::NotAuthorized.join_error(), None);
    }
}
