//! Commands participants issue against a session

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timestamp;

/// Everything a participant can ask a session to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Play,
    Pause,
    SeekTo { position: f64 },
    ChangeRate { multiplier: f64 },
    SendChat { text: String },
    SendReaction { emoji: String },
}

impl Command {
    /// Playback commands are host-only
    pub fn is_playback(&self) -> bool {
        matches!(
            self,
            Command::Play | Command::Pause | Command::SeekTo { .. } | Command::ChangeRate { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::SeekTo { .. } => "seek_to",
            Command::ChangeRate { .. } => "change_rate",
            Command::SendChat { .. } => "send_chat",
            Command::SendReaction { .. } => "send_reaction",
        }
    }
}

/// A command attributed to its issuer and stamped at receipt
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCommand {
    pub session_id: Uuid,
    pub issuer: Uuid,
    pub command: Command,
    pub received_at: Timestamp,
}
