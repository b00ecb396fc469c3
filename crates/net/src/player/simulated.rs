//! Headless player driven by a clock
//!
//! Behaves like an embedded player as far as the sync protocol can tell:
//! position advances with time while playing and stops at the end of the
//! media. The `user_*` methods stand in for someone clicking on the player.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use aphrodite_core::models::{clamp_position, MAX_RATE, MIN_RATE};
use aphrodite_core::{Clock, LoadError, MediaInfo, SharedClock, Timestamp};

use super::{Ack, EventHub, PlaybackAdapter, PlaybackError, PlayerEvent, Ready, Subscription};

#[derive(Debug, Clone)]
struct Cursor {
    media: Option<MediaInfo>,
    position: f64,
    playing: bool,
    rate: f64,
    anchored_at: Timestamp,
}

impl Cursor {
    fn duration(&self) -> Option<f64> {
        self.media.as_ref().and_then(|m| m.duration_seconds)
    }

    fn position_at(&self, now: Timestamp) -> f64 {
        let mut position = self.position;
        if self.playing {
            position += now.saturating_duration_since(self.anchored_at).as_secs_f64() * self.rate;
        }
        clamp_position(position, self.duration())
    }
}

pub struct SimulatedPlayer {
    clock: SharedClock,
    cursor: Mutex<Cursor>,
    events: EventHub,
    available: AtomicBool,
    pending_failures: AtomicU32,
}

impl SimulatedPlayer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            cursor: Mutex::new(Cursor {
                media: None,
                position: 0.0,
                playing: false,
                rate: 1.0,
                anchored_at: Timestamp::ZERO,
            }),
            events: EventHub::new(),
            available: AtomicBool::new(true),
            pending_failures: AtomicU32::new(0),
        }
    }

    /// Make subsequent loads fail with `PlayerUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn user_play(&self) {
        let _ = self.update(true, |c| c.playing = true);
    }

    pub fn user_pause(&self) {
        let _ = self.update(true, |c| c.playing = false);
    }

    pub fn user_seek(&self, position: f64) {
        let _ = self.update(true, |c| c.position = clamp_position(position, c.duration()));
    }

    pub fn user_set_rate(&self, rate: f64) {
        let _ = self.update(true, |c| c.rate = rate.clamp(MIN_RATE, MAX_RATE));
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(&self) -> Result<(), PlaybackError> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(PlaybackError::TransientFailure("simulated hiccup".into()))
        } else {
            Ok(())
        }
    }

    /// Re-anchor at now, apply `change`, and emit the resulting state
    fn update(&self, local: bool, change: impl FnOnce(&mut Cursor)) -> Result<Ack, PlaybackError> {
        let now = self.clock.now();
        let event = {
            let mut cursor = self.cursor();
            if cursor.media.is_none() {
                return Err(PlaybackError::NotReady);
            }
            cursor.position = cursor.position_at(now);
            cursor.anchored_at = now;
            change(&mut cursor);
            PlayerEvent::StateChanged {
                position: cursor.position,
                is_playing: cursor.playing,
                rate: cursor.rate,
                local,
            }
        };
        self.events.emit(event);
        Ok(Ack)
    }
}

#[async_trait]
impl PlaybackAdapter for SimulatedPlayer {
    async fn load(&self, media: &MediaInfo) -> Result<Ready, LoadError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LoadError::PlayerUnavailable("simulated player offline".into()));
        }
        if media.media_ref.trim().is_empty() {
            return Err(LoadError::InvalidReference(media.media_ref.clone()));
        }
        {
            let mut cursor = self.cursor();
            *cursor = Cursor {
                media: Some(media.clone()),
                position: 0.0,
                playing: false,
                rate: 1.0,
                anchored_at: self.clock.now(),
            };
        }
        debug!(media_ref = %media.media_ref, "Simulated player loaded media");
        self.events.emit(PlayerEvent::Ready);
        Ok(Ready {
            media_ref: media.media_ref.clone(),
            duration_seconds: media.duration_seconds,
        })
    }

    async fn play(&self) -> Result<Ack, PlaybackError> {
        self.take_failure()?;
        self.update(false, |c| c.playing = true)
    }

    async fn pause(&self) -> Result<Ack, PlaybackError> {
        self.take_failure()?;
        self.update(false, |c| c.playing = false)
    }

    async fn seek_to(&self, position: f64) -> Result<Ack, PlaybackError> {
        self.take_failure()?;
        let duration = self.cursor().duration();
        let in_range = position.is_finite()
            && position >= 0.0
            && duration.map_or(true, |d| position <= d);
        if !in_range {
            return Err(PlaybackError::OutOfRange(position.to_string()));
        }
        self.update(false, |c| c.position = position)
    }

    async fn set_rate(&self, rate: f64) -> Result<Ack, PlaybackError> {
        self.take_failure()?;
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(PlaybackError::OutOfRange(rate.to_string()));
        }
        self.update(false, |c| c.rate = rate)
    }

    fn current_position(&self) -> f64 {
        self.cursor().position_at(self.clock.now())
    }

    fn is_playing(&self) -> bool {
        self.cursor().playing
    }

    fn current_rate(&self) -> f64 {
        self.cursor().rate
    }

    fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }
}
