//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. A
//! connection starts with any number of `ListSessions` requests, then one
//! `CreateSession` or `JoinSession`. The server answers with `Joined` (a full
//! snapshot) before any incremental update for that session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aphrodite_core::{
    ChatEntry, Command, Error as CoreError, Identity, JoinError, Participant, Reaction,
    SessionFilter, SessionSummary, SessionView, SyncPoint, Timestamp,
};

/// Parameters for opening a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Reuse a known id (starting a new epoch); a fresh id is minted when absent
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub name: String,
    pub media_ref: String,
    /// Falls back to the directory default
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Makes the session private
    #[serde(default)]
    pub password: Option<String>,
    pub creator: Identity,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the open-session listing. Private sessions only show up for
    /// their own members, so only once this connection has joined.
    ListSessions {
        #[serde(default)]
        filter: SessionFilter,
    },

    CreateSession(CreateSessionRequest),

    JoinSession {
        session_id: Uuid,
        identity: Identity,
        #[serde(default)]
        password: Option<String>,
    },

    /// A command from the joined participant
    Command { command: Command },

    /// Liveness signal
    Heartbeat,

    /// Explicit leave; the server closes the connection afterwards
    Leave,
}

/// Why a request was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    CapacityExceeded,
    AuthenticationRequired,
    Timeout,
    NotAuthorized,
    Invalid,
    AlreadyJoined,
    NotJoined,
    Protocol,
    Internal,
}

impl RejectReason {
    pub fn join_error(self) -> Option<JoinError> {
        match self {
            RejectReason::NotFound => Some(JoinError::NotFound),
            RejectReason::CapacityExceeded => Some(JoinError::CapacityExceeded),
            RejectReason::AuthenticationRequired => Some(JoinError::AuthenticationRequired),
            RejectReason::Timeout => Some(JoinError::Timeout),
            _ => None,
        }
    }
}

impl From<&CoreError> for RejectReason {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::NotFound(_) | CoreError::SessionClosed(_) => RejectReason::NotFound,
            CoreError::CapacityExceeded { .. } => RejectReason::CapacityExceeded,
            CoreError::AuthenticationRequired => RejectReason::AuthenticationRequired,
            CoreError::Timeout(_) => RejectReason::Timeout,
            CoreError::NotAuthorized => RejectReason::NotAuthorized,
            CoreError::Validation(_) | CoreError::Password(_) => RejectReason::Invalid,
            CoreError::AlreadyJoined(_) => RejectReason::AlreadyJoined,
            CoreError::UnknownParticipant(_) => RejectReason::NotJoined,
            _ => RejectReason::Internal,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionList {
        sessions: Vec<SessionSummary>,
    },

    /// Full-state snapshot; always the first message after a successful join
    Joined {
        participant_id: Uuid,
        view: SessionView,
        server_time: Timestamp,
    },

    /// Create or join failed; the connection is closed afterwards
    Rejected {
        reason: RejectReason,
        message: String,
    },

    /// Authoritative playback after an accepted playback command
    Sync {
        session_id: Uuid,
        epoch: u64,
        sequence: u64,
        point: SyncPoint,
        issued_by: Uuid,
    },

    Chat {
        entry: ChatEntry,
    },

    Reaction {
        reaction: Reaction,
    },

    /// Roster after a join or leave
    Roster {
        participants: Vec<Participant>,
        host_id: Option<Uuid>,
    },

    HostChanged {
        host_id: Uuid,
    },

    /// A command from this participant was not applied
    CommandRejected {
        command: String,
        reason: RejectReason,
        message: String,
    },

    HeartbeatAck {
        server_time: Timestamp,
    },

    ServerShutdown,
}

impl ServerMessage {
    pub fn rejected(err: &CoreError) -> Self {
        ServerMessage::Rejected {
            reason: err.into(),
            message: err.to_string(),
        }
    }

    pub fn command_rejected(command: &Command, err: &CoreError) -> Self {
        ServerMessage::CommandRejected {
            command: command.name().to_string(),
            reason: err.into(),
            message: err.to_string(),
        }
    }
}
