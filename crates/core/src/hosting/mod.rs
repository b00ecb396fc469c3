//! Host succession for sessions
//!
//! Exactly one participant of a non-empty session is host. When the host
//! leaves, the role passes to the longest-tenured remaining participant.
//! No vote is held: every replica computing the successor from the same
//! roster reaches the same answer.

use uuid::Uuid;

use crate::models::Participant;

/// Pick the next host from a roster, ignoring `leaving`
///
/// Earliest `joined_at` wins; ties fall back to roster (insertion) order.
pub fn successor(participants: &[Participant], leaving: Uuid) -> Option<Uuid> {
    participants
        .iter()
        .filter(|p| p.id != leaving)
        .min_by_key(|p| p.joined_at)
        .map(|p| p.id)
}

/// Mark `host_id` as the only host in the roster
pub fn assign_host(participants: &mut [Participant], host_id: Uuid) {
    for p in participants.iter_mut() {
        p.is_host = p.id == host_id;
    }
}

/// Number of participants flagged as host
pub fn host_count(participants: &[Participant]) -> usize {
    participants.iter().filter(|p| p.is_host).count()
}
