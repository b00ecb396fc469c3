//! Network error types

use std::io;

use aphrodite_core::{JoinError, LoadError};

use crate::protocol::RejectReason;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Rejected by server ({reason:?}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Player failed to load media: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    Core(#[from] aphrodite_core::Error),
}

impl Error {
    /// Narrow to the join error surface, if this failure belongs there
    pub fn join_error(&self) -> Option<JoinError> {
        match self {
            Error::Rejected { reason, .. } => reason.join_error(),
            Error::Timeout(_) => Some(JoinError::Timeout),
            Error::Core(e) => e.join_error(),
            _ => None,
        }
    }
}
