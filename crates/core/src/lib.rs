//! Aphrodite Core Library
//!
//! Clock, session state machine, drift reconciliation, media resolution,
//! configuration and storage for Aphrodite watch parties.

pub mod clock;
pub mod config;
pub mod error;
pub mod hosting;
pub mod invariants;
pub mod media;
pub mod models;
pub mod session;
pub mod storage;
pub mod sync;

pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock, Timestamp};
pub use config::Config;
pub use error::{Error, JoinError, Result};
pub use media::{CatalogEntry, CatalogResolver, LoadError, MediaInfo, MediaResolver};
pub use models::*;
pub use session::{
    Access, Applied, LeaveOutcome, NewSession, Session, SessionEvent, SessionFilter,
    SessionLimits, SessionPhase, SessionSummary, SessionView,
};
pub use storage::{Database, SessionArchive, SnapshotRecord, SnapshotSummary, SqliteArchive};
pub use sync::{reconcile, Correction, LocalPlayback, SyncAnchor, SyncPoint};
