//! SQLite storage layer for Aphrodite

mod migrations;
mod parse;
mod snapshots;
mod traits;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::Session;

pub use snapshots::{SnapshotRecord, SnapshotStore, SnapshotSummary};
pub use traits::SessionArchive;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Self::init(conn)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::current_version(&self.conn).unwrap_or(0)
    }

    pub fn snapshots(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(&self.conn)
    }
}

/// [`SessionArchive`] backed by a SQLite file
///
/// The connection sits behind a mutex; each call is one statement, so
/// holding the lock for its duration is enough to keep writes atomic.
pub struct SqliteArchive {
    db: Mutex<Database>,
}

impl SqliteArchive {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::open(path)?;
        debug!(schema_version = db.schema_version(), "Session archive opened");
        Ok(Self::new(db))
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Storage("session archive lock poisoned".into()))
    }
}

impl SessionArchive for SqliteArchive {
    #[instrument(skip(self, session), fields(session_id = %session.id(), epoch = session.epoch()))]
    fn save(&self, session: &Session) -> Result<()> {
        self.db()?.snapshots().upsert(session, false)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id(), epoch = session.epoch()))]
    fn archive(&self, session: &Session) -> Result<()> {
        self.db()?.snapshots().upsert(session, true)?;
        debug!("Session archived");
        Ok(())
    }

    fn latest_epoch(&self, id: Uuid) -> Result<Option<u64>> {
        self.db()?.snapshots().latest_epoch(id)
    }

    fn load(&self, id: Uuid) -> Result<Option<SnapshotRecord>> {
        self.db()?.snapshots().load(id)
    }

    fn recent(&self, limit: usize) -> Result<Vec<SnapshotSummary>> {
        self.db()?.snapshots().recent(limit)
    }
}
