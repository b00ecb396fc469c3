//! Chat log entries and reactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message in a session's append-only log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: Uuid,
    /// Position in the session's total event order
    pub sequence: u64,
    pub author_id: Uuid,
    pub author_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn format_timestamp(&self) -> String {
        self.sent_at.format("%H:%M").to_string()
    }
}

/// An ephemeral emoji reaction; broadcast but not kept in the chat log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub sequence: u64,
    pub author_id: Uuid,
    pub author_name: String,
    pub emoji: String,
    pub sent_at: DateTime<Utc>,
}
