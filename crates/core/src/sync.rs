//! Drift reconciliation
//!
//! The server announces playback as a [`SyncPoint`]: the authoritative
//! state plus the server's clock reading when it was sent. A client anchors
//! that point to its own clock on receipt and from then on can compute the
//! target position locally, without comparing clocks across machines.
//! Network latency between send and receipt is not compensated; it stays
//! well under the drift threshold.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::models::PlaybackState;

/// Drift (seconds) tolerated before a corrective seek
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 1.5;

/// Authoritative playback at a server instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub playback: PlaybackState,
    pub server_time: Timestamp,
}

/// A sync point pinned to the local clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncAnchor {
    point: SyncPoint,
    received_at: Timestamp,
    duration: Option<f64>,
}

impl SyncAnchor {
    pub fn new(point: SyncPoint, received_at: Timestamp, duration: Option<f64>) -> Self {
        Self {
            point,
            received_at,
            duration,
        }
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.point.playback
    }

    /// Server time corresponding to `local_now`
    pub fn server_now(&self, local_now: Timestamp) -> Timestamp {
        self.point
            .server_time
            .saturating_add(local_now.saturating_duration_since(self.received_at))
    }

    /// Where the player should be at `local_now`
    pub fn target_position(&self, local_now: Timestamp) -> f64 {
        self.point
            .playback
            .effective_position_within(self.server_now(local_now), self.duration)
    }
}

/// What the local player reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPlayback {
    pub position: f64,
    pub is_playing: bool,
}

/// Calls a follower should make to get back in line
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Correction {
    pub seek_to: Option<f64>,
    pub set_playing: Option<bool>,
    /// Local minus target, in seconds; positive means ahead
    pub drift: f64,
}

impl Correction {
    pub fn is_noop(&self) -> bool {
        self.seek_to.is_none() && self.set_playing.is_none()
    }
}

/// Compare local playback against the anchor
///
/// Play/pause mismatches are always corrected; position is only corrected
/// when drift exceeds `threshold`, so jitter does not cause seek thrashing.
pub fn reconcile(
    anchor: &SyncAnchor,
    local: LocalPlayback,
    local_now: Timestamp,
    threshold: f64,
) -> Correction {
    let target = anchor.target_position(local_now);
    let drift = local.position - target;

    let seek_to = (drift.abs() > threshold).then_some(target);
    let wanted = anchor.playback().is_playing;
    let set_playing = (local.is_playing != wanted).then_some(wanted);

    Correction {
        seek_to,
        set_playing,
        drift,
    }
}
