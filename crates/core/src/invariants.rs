//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible session states during
//! development. These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::clock::Timestamp;
use crate::hosting::host_count;
use crate::models::{MAX_RATE, MIN_RATE};
use crate::session::{Session, SessionPhase};

/// Validate that a session's state is internally consistent at `now`
pub fn assert_session_invariants(session: &Session, now: Timestamp) {
    let participants = session.participants();

    // Exactly one host while anyone is present, none otherwise
    match session.phase() {
        SessionPhase::Active => {
            debug_assert_eq!(
                host_count(participants),
                1,
                "Session {} must have exactly one host",
                session.id()
            );
            debug_assert!(
                session
                    .host_id()
                    .is_some_and(|id| participants.iter().any(|p| p.id == id && p.is_host)),
                "Session {} host_id {:?} does not match the flagged host",
                session.id(),
                session.host_id()
            );
        }
        SessionPhase::Empty => {
            debug_assert!(
                session.host_id().is_none(),
                "Empty session {} still has host {:?}",
                session.id(),
                session.host_id()
            );
        }
    }

    // Participant ids are unique
    let unique: HashSet<_> = participants.iter().map(|p| p.id).collect();
    debug_assert_eq!(
        unique.len(),
        participants.len(),
        "Session {} has duplicate participants",
        session.id()
    );

    debug_assert!(
        participants.len() <= session.capacity(),
        "Session {} holds {} participants over capacity {}",
        session.id(),
        participants.len(),
        session.capacity()
    );

    assert_playback_invariants(session, now);
}

/// Validate the playback cursor is within bounds
pub fn assert_playback_invariants(session: &Session, now: Timestamp) {
    let playback = session.playback();
    let position = session.effective_position(now);

    debug_assert!(
        playback.position_seconds >= 0.0 && position >= 0.0,
        "Session {} has negative position {}",
        session.id(),
        playback.position_seconds
    );

    if let Some(duration) = session.media().duration_seconds {
        debug_assert!(
            playback.position_seconds <= duration,
            "Session {} anchored at {} beyond duration {}",
            session.id(),
            playback.position_seconds,
            duration
        );
    }

    debug_assert!(
        (MIN_RATE..=MAX_RATE).contains(&playback.rate_multiplier),
        "Session {} has out-of-range rate {}",
        session.id(),
        playback.rate_multiplier
    );
}
