//! Storage traits
//!
//! The directory only talks to [`SessionArchive`], so tests and deployments
//! without a database can plug in something else.

use uuid::Uuid;

use crate::error::Result;
use crate::session::Session;

use super::snapshots::{SnapshotRecord, SnapshotSummary};

/// Durable record of sessions, one row per (id, epoch)
///
/// Every write replaces the whole snapshot, so a reader always sees one
/// consistent version of a session.
pub trait SessionArchive: Send + Sync {
    /// Insert or replace the snapshot for the session's current epoch
    fn save(&self, session: &Session) -> Result<()>;

    /// Store the final snapshot and mark the epoch as archived
    fn archive(&self, session: &Session) -> Result<()>;

    /// Highest epoch ever stored for `id`
    fn latest_epoch(&self, id: Uuid) -> Result<Option<u64>>;

    /// Latest snapshot for `id`
    fn load(&self, id: Uuid) -> Result<Option<SnapshotRecord>>;

    /// Most recently updated snapshots, newest first
    fn recent(&self, limit: usize) -> Result<Vec<SnapshotSummary>>;
}
