//! Read-only projections of a session for listing and for joiners

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Session;
use crate::media::MediaInfo;
use crate::models::{ChatEntry, Participant, PlaybackState};

/// One row of the open-session listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: String,
    pub participant_count: usize,
    pub capacity: usize,
    pub host_name: Option<String>,
    pub media_ref: String,
    pub is_private: bool,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            name: session.name().to_string(),
            participant_count: session.participants().len(),
            capacity: session.capacity(),
            host_name: session.host().map(|h| h.display_name.clone()),
            media_ref: session.media().media_ref.clone(),
            is_private: session.is_private(),
        }
    }
}

/// Listing filter; all fields optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Case-insensitive substring of the session name
    #[serde(default)]
    pub name_contains: Option<String>,
    /// Only sessions watching this media reference
    #[serde(default)]
    pub media_ref: Option<String>,
    /// Hide sessions that are already full
    #[serde(default)]
    pub only_joinable: bool,
}

impl SessionFilter {
    /// Whether `caller` may see `session` and it passes the filter
    ///
    /// Private sessions are only listed to their own participants.
    pub fn matches(&self, session: &Session, caller: Option<Uuid>) -> bool {
        if session.is_private() && !caller.is_some_and(|id| session.participant(id).is_some()) {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            if !session
                .name()
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(media_ref) = &self.media_ref {
            if &session.media().media_ref != media_ref {
                return false;
            }
        }
        if self.only_joinable && session.participants().len() >= session.capacity() {
            return false;
        }
        true
    }
}

/// Full-state snapshot handed to a participant when it joins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    pub epoch: u64,
    pub name: String,
    pub media: MediaInfo,
    pub host_id: Option<Uuid>,
    pub participants: Vec<Participant>,
    pub capacity: usize,
    pub is_private: bool,
    pub playback: PlaybackState,
    pub chat_backlog: Vec<ChatEntry>,
    /// Sequence of the most recent event included in this snapshot
    pub last_sequence: u64,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            epoch: session.epoch(),
            name: session.name().to_string(),
            media: session.media().clone(),
            host_id: session.host_id(),
            participants: session.participants().to_vec(),
            capacity: session.capacity(),
            is_private: session.is_private(),
            playback: *session.playback(),
            chat_backlog: session.chat_log().cloned().collect(),
            last_sequence: session.next_sequence().saturating_sub(1),
        }
    }
}
