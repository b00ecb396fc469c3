//! Authoritative playback cursor

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Slowest playback rate a session accepts
pub const MIN_RATE: f64 = 0.25;

/// Fastest playback rate a session accepts
pub const MAX_RATE: f64 = 2.0;

/// Where playback should be, as of `last_updated_at`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub position_seconds: f64,
    pub is_playing: bool,
    pub last_updated_at: Timestamp,
    pub rate_multiplier: f64,
}

impl PlaybackState {
    /// Paused at zero, normal speed
    pub fn initial(now: Timestamp) -> Self {
        Self {
            position_seconds: 0.0,
            is_playing: false,
            last_updated_at: now,
            rate_multiplier: 1.0,
        }
    }

    /// Position at `now`, extrapolated from the last update while playing
    ///
    /// `now` earlier than `last_updated_at` counts as no elapsed time.
    pub fn effective_position(&self, now: Timestamp) -> f64 {
        if !self.is_playing {
            return self.position_seconds;
        }
        let elapsed = now
            .saturating_duration_since(self.last_updated_at)
            .as_secs_f64();
        self.position_seconds + elapsed * self.rate_multiplier
    }

    /// Like [`effective_position`](Self::effective_position) but bounded by
    /// zero and, when known, the media duration
    pub fn effective_position_within(&self, now: Timestamp, duration: Option<f64>) -> f64 {
        clamp_position(self.effective_position(now), duration)
    }
}

/// Bound a position to `[0, duration]`
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
    match duration {
        Some(d) => position.min(d),
        None => position,
    }
}
