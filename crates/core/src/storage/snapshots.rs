//! Session snapshot storage

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::session::Session;
use crate::storage::parse::{parse_datetime, parse_json, parse_u64};

/// A stored session together with its bookkeeping
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub session: Session,
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
}

/// Listing row that does not need the full snapshot decoded
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub session_id: Uuid,
    pub epoch: u64,
    pub name: String,
    pub media_ref: String,
    pub host_name: Option<String>,
    pub participant_count: usize,
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot storage operations
pub struct SnapshotStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Write the whole session in a single upsert
    pub fn upsert(&self, session: &Session, archived: bool) -> Result<()> {
        let snapshot = serde_json::to_string(session)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO session_snapshots
                (session_id, epoch, name, media_ref, host_name, participant_count,
                 snapshot, archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(session_id, epoch) DO UPDATE SET
                name = excluded.name,
                media_ref = excluded.media_ref,
                host_name = excluded.host_name,
                participant_count = excluded.participant_count,
                snapshot = excluded.snapshot,
                archived = excluded.archived,
                updated_at = excluded.updated_at",
            params![
                session.id().to_string(),
                session.epoch() as i64,
                session.name(),
                session.media().media_ref,
                session.host().map(|h| h.display_name.clone()),
                session.participants().len() as i64,
                snapshot,
                archived,
                session.created_at().to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn latest_epoch(&self, id: Uuid) -> Result<Option<u64>> {
        let epoch: Option<i64> = self.conn.query_row(
            "SELECT MAX(epoch) FROM session_snapshots WHERE session_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        match epoch {
            Some(v) => Ok(Some(parse_u64(v, 0)?)),
            None => Ok(None),
        }
    }

    pub fn load(&self, id: Uuid) -> Result<Option<SnapshotRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT snapshot, archived, updated_at FROM session_snapshots
                 WHERE session_id = ?1 ORDER BY epoch DESC LIMIT 1",
                params![id.to_string()],
                |row| {
                    let snapshot: String = row.get(0)?;
                    let updated_at: String = row.get(2)?;
                    Ok(SnapshotRecord {
                        session: parse_json(&snapshot, 0)?,
                        archived: row.get(1)?,
                        updated_at: parse_datetime(&updated_at, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<SnapshotSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, epoch, name, media_ref, host_name, participant_count,
                    archived, updated_at
             FROM session_snapshots ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], summary_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotSummary> {
    let id: String = row.get(0)?;
    let session_id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let count: i64 = row.get(5)?;
    let updated_at: String = row.get(7)?;
    Ok(SnapshotSummary {
        session_id,
        epoch: parse_u64(row.get(1)?, 1)?,
        name: row.get(2)?,
        media_ref: row.get(3)?,
        host_name: row.get(4)?,
        participant_count: parse_u64(count, 5)? as usize,
        archived: row.get(6)?,
        updated_at: parse_datetime(&updated_at, 7)?,
    })
}
