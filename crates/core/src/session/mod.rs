//! Session state machine
//!
//! A [`Session`] is the single authoritative copy of a watch party: roster,
//! host, playback cursor and chat log. Every mutation goes through one of
//! four transitions ([`Session::create`], [`Session::join`],
//! [`Session::leave`], [`Session::apply`]). Each transition validates
//! everything up front and only then mutates, so a rejected call leaves
//! the session exactly as it was.
//!
//! Time is passed in explicitly; the state machine never reads a clock.

mod access;
mod view;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::hosting;
use crate::invariants::assert_session_invariants;
use crate::media::MediaInfo;
use crate::models::{
    clamp_position, ChatEntry, Command, Identity, IssuedCommand, Participant, PlaybackState,
    Reaction, MAX_RATE, MIN_RATE,
};

pub use access::Access;
pub use view::{SessionFilter, SessionSummary, SessionView};

/// Longest session name accepted
const MAX_NAME_LEN: usize = 100;

/// Longest display name accepted
const MAX_DISPLAY_NAME_LEN: usize = 40;

/// Longest reaction accepted, in chars
const MAX_REACTION_LEN: usize = 8;

/// Per-session bounds on chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Chat entries retained for scrollback
    pub chat_history_limit: usize,
    /// Longest chat message accepted, in chars
    pub max_chat_len: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            chat_history_limit: 500,
            max_chat_len: 2000,
        }
    }
}

/// Everything needed to open a session, already validated by the directory
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub epoch: u64,
    pub name: String,
    pub media: MediaInfo,
    pub capacity: usize,
    pub access: Access,
    pub limits: SessionLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Empty,
    Active,
}

/// Something observable that an accepted command produced
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Playback {
        sequence: u64,
        state: PlaybackState,
        issued_by: Uuid,
    },
    Chat(ChatEntry),
    Reaction(Reaction),
}

impl SessionEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            SessionEvent::Playback { sequence, .. } => *sequence,
            SessionEvent::Chat(entry) => entry.sequence,
            SessionEvent::Reaction(reaction) => reaction.sequence,
        }
    }
}

/// Result of an accepted command
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Changed(SessionEvent),
    /// Accepted, but the session already was in the requested state
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub removed: Participant,
    /// Set when the leaver was host and someone else took over
    pub new_host: Option<Uuid>,
    /// The session has no participants left
    pub emptied: bool,
}

/// A synchronized viewing room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: Uuid,
    epoch: u64,
    name: String,
    media: MediaInfo,
    host_id: Option<Uuid>,
    playback: PlaybackState,
    participants: Vec<Participant>,
    capacity: usize,
    access: Access,
    chat_log: VecDeque<ChatEntry>,
    next_sequence: u64,
    limits: SessionLimits,
    created_at: DateTime<Utc>,
}

impl Session {
    /// `Empty -> Active`: open the session with `creator` as host
    pub fn create(params: NewSession, creator: Identity, now: Timestamp) -> Result<Self> {
        let name = params.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("session name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::validation(format!(
                "session name longer than {} characters",
                MAX_NAME_LEN
            )));
        }
        if params.capacity == 0 {
            return Err(Error::validation("capacity must be greater than zero"));
        }
        let creator = validate_identity(creator)?;

        let mut host = Participant::new(creator, now);
        host.is_host = true;

        let session = Self {
            id: params.id,
            epoch: params.epoch.max(1),
            name,
            media: params.media,
            host_id: Some(host.id),
            playback: PlaybackState::initial(now),
            participants: vec![host],
            capacity: params.capacity,
            access: params.access,
            chat_log: VecDeque::new(),
            next_sequence: 1,
            limits: params.limits,
            created_at: Utc::now(),
        };

        assert_session_invariants(&session, now);
        Ok(session)
    }

    /// Add a participant to an active session
    pub fn join(
        &mut self,
        identity: Identity,
        credentials: Option<&str>,
        now: Timestamp,
    ) -> Result<Participant> {
        if self.phase() == SessionPhase::Empty {
            return Err(Error::SessionClosed(self.id));
        }
        let identity = validate_identity(identity)?;
        if self.participant(identity.id).is_some() {
            return Err(Error::AlreadyJoined(identity.id));
        }
        if self.participants.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        if !self.access.permits(credentials) {
            return Err(Error::AuthenticationRequired);
        }

        let participant = Participant::new(identity, now);
        self.participants.push(participant.clone());
        debug!(session_id = %self.id, participant_id = %participant.id, "Participant joined");

        assert_session_invariants(self, now);
        Ok(participant)
    }

    /// Remove a participant, handing host to the longest-tenured remaining one
    pub fn leave(&mut self, participant_id: Uuid, now: Timestamp) -> Result<LeaveOutcome> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.id == participant_id)
            .ok_or(Error::UnknownParticipant(participant_id))?;

        let was_host = self.host_id == Some(participant_id);
        let next_host = if was_host {
            hosting::successor(&self.participants, participant_id)
        } else {
            None
        };

        let removed = self.participants.remove(idx);
        let mut new_host = None;
        if was_host {
            self.host_id = next_host;
            if let Some(host_id) = next_host {
                hosting::assign_host(&mut self.participants, host_id);
                new_host = Some(host_id);
                debug!(session_id = %self.id, new_host = %host_id, "Host transferred");
            }
        }

        let emptied = self.participants.is_empty();
        if emptied {
            self.host_id = None;
            // Freeze the cursor where it was when the room emptied
            let position = self.effective_position(now);
            self.playback = PlaybackState {
                position_seconds: position,
                is_playing: false,
                last_updated_at: now,
                rate_multiplier: self.playback.rate_multiplier,
            };
        }

        assert_session_invariants(self, now);
        Ok(LeaveOutcome {
            removed,
            new_host,
            emptied,
        })
    }

    /// Apply a command, or reject it without touching any state
    pub fn apply(&mut self, cmd: &IssuedCommand) -> Result<Applied> {
        if self.phase() == SessionPhase::Empty {
            return Err(Error::SessionClosed(self.id));
        }
        if cmd.session_id != self.id {
            return Err(Error::NotFound(cmd.session_id));
        }
        let issuer = self
            .participant(cmd.issuer)
            .ok_or(Error::UnknownParticipant(cmd.issuer))?
            .clone();
        if cmd.command.is_playback() && self.host_id != Some(cmd.issuer) {
            return Err(Error::NotAuthorized);
        }

        let now = cmd.received_at;
        let applied = match &cmd.command {
            Command::Play => self.set_playing(true, cmd.issuer, now),
            Command::Pause => self.set_playing(false, cmd.issuer, now),
            Command::SeekTo { position } => {
                if !position.is_finite() {
                    return Err(Error::validation("seek position must be a finite number"));
                }
                let state = PlaybackState {
                    position_seconds: clamp_position(*position, self.media.duration_seconds),
                    is_playing: self.playback.is_playing,
                    last_updated_at: now,
                    rate_multiplier: self.playback.rate_multiplier,
                };
                self.replace_playback(state, cmd.issuer)
            }
            Command::ChangeRate { multiplier } => {
                if !multiplier.is_finite() || *multiplier < MIN_RATE || *multiplier > MAX_RATE {
                    return Err(Error::validation(format!(
                        "rate must be between {} and {}",
                        MIN_RATE, MAX_RATE
                    )));
                }
                if *multiplier == self.playback.rate_multiplier {
                    Applied::Unchanged
                } else {
                    let state = PlaybackState {
                        position_seconds: self.effective_position(now),
                        is_playing: self.playback.is_playing,
                        last_updated_at: now,
                        rate_multiplier: *multiplier,
                    };
                    self.replace_playback(state, cmd.issuer)
                }
            }
            Command::SendChat { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(Error::validation("chat message must not be empty"));
                }
                if text.chars().count() > self.limits.max_chat_len {
                    return Err(Error::validation(format!(
                        "chat message longer than {} characters",
                        self.limits.max_chat_len
                    )));
                }
                let entry = ChatEntry {
                    id: Uuid::new_v4(),
                    sequence: self.take_sequence(),
                    author_id: issuer.id,
                    author_name: issuer.display_name,
                    text: text.to_string(),
                    sent_at: Utc::now(),
                };
                if self.chat_log.len() >= self.limits.chat_history_limit {
                    self.chat_log.pop_front();
                }
                if self.limits.chat_history_limit > 0 {
                    self.chat_log.push_back(entry.clone());
                }
                Applied::Changed(SessionEvent::Chat(entry))
            }
            Command::SendReaction { emoji } => {
                let emoji = emoji.trim();
                let len = emoji.chars().count();
                if len == 0 || len > MAX_REACTION_LEN {
                    return Err(Error::validation("reaction must be a short emoji"));
                }
                Applied::Changed(SessionEvent::Reaction(Reaction {
                    id: Uuid::new_v4(),
                    sequence: self.take_sequence(),
                    author_id: issuer.id,
                    author_name: issuer.display_name,
                    emoji: emoji.to_string(),
                    sent_at: Utc::now(),
                }))
            }
        };

        assert_session_invariants(self, now);
        Ok(applied)
    }

    fn set_playing(&mut self, playing: bool, issuer: Uuid, now: Timestamp) -> Applied {
        if self.playback.is_playing == playing {
            return Applied::Unchanged;
        }
        let state = PlaybackState {
            position_seconds: self.effective_position(now),
            is_playing: playing,
            last_updated_at: now,
            rate_multiplier: self.playback.rate_multiplier,
        };
        self.replace_playback(state, issuer)
    }

    fn replace_playback(&mut self, state: PlaybackState, issuer: Uuid) -> Applied {
        self.playback = state;
        Applied::Changed(SessionEvent::Playback {
            sequence: self.take_sequence(),
            state,
            issued_by: issuer,
        })
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.host_id
    }

    pub fn host(&self) -> Option<&Participant> {
        self.host_id.and_then(|id| self.participant(id))
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    /// Authoritative position at `now`, clamped to the media bounds
    pub fn effective_position(&self, now: Timestamp) -> f64 {
        self.playback
            .effective_position_within(now, self.media.duration_seconds)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn is_host(&self, id: Uuid) -> bool {
        self.host_id == Some(id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn is_private(&self) -> bool {
        self.access.is_private()
    }

    pub fn chat_log(&self) -> impl Iterator<Item = &ChatEntry> {
        self.chat_log.iter()
    }

    /// Sequence number the next accepted event will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> SessionPhase {
        if self.participants.is_empty() {
            SessionPhase::Empty
        } else {
            SessionPhase::Active
        }
    }
}

fn validate_identity(identity: Identity) -> Result<Identity> {
    let display_name = identity.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(Error::validation("display name must not be empty"));
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(Error::validation(format!(
            "display name longer than {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    if identity.id.is_nil() {
        return Err(Error::validation("participant id must not be nil"));
    }
    Ok(Identity {
        id: identity.id,
        display_name,
    })
}
