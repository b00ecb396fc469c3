//! Session participants

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timestamp;

/// Who is connecting, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A participant's canonical record, owned by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub joined_at: Timestamp,
    pub is_host: bool,
}

impl Participant {
    pub fn new(identity: Identity, joined_at: Timestamp) -> Self {
        Self {
            id: identity.id,
            display_name: identity.display_name,
            joined_at,
            is_host: false,
        }
    }
}
