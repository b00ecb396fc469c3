//! Background archive writer
//!
//! Snapshots are queued here instead of being written while a session is
//! locked. A single task drains the queue in order and runs each archive
//! call on the blocking pool. Epoch lookups go through the same queue, so
//! they observe every snapshot queued before them.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use aphrodite_core::{Error, Result, Session, SessionArchive, SessionPhase};

enum Job {
    Persist(Box<Session>),
    LatestEpoch {
        id: Uuid,
        reply: oneshot::Sender<Result<Option<u64>>>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub(crate) struct ArchiveWriter {
    tx: mpsc::UnboundedSender<Job>,
}

impl ArchiveWriter {
    /// Start the writer task; it stops once every handle is dropped
    pub(crate) fn spawn(archive: Arc<dyn SessionArchive>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let archive = archive.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || run(archive.as_ref(), job)).await {
                    warn!(error = %e, "Archive job panicked");
                }
            }
            debug!("Archive writer stopped");
        });
        Self { tx }
    }

    /// Queue a snapshot; emptied sessions are marked archived
    pub(crate) fn persist(&self, session: &Session) {
        if self.tx.send(Job::Persist(Box::new(session.clone()))).is_err() {
            warn!(session_id = %session.id(), "Archive writer gone; snapshot dropped");
        }
    }

    pub(crate) async fn latest_epoch(&self, id: Uuid) -> Result<Option<u64>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::LatestEpoch { id, reply })
            .map_err(|_| Error::Storage("archive writer stopped".into()))?;
        rx.await
            .map_err(|_| Error::Storage("archive writer dropped a lookup".into()))?
    }

    /// Wait until everything queued so far has been written
    pub(crate) async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }
}

fn run(archive: &dyn SessionArchive, job: Job) {
    match job {
        Job::Persist(session) => {
            let result = match session.phase() {
                SessionPhase::Active => archive.save(&session),
                SessionPhase::Empty => archive.archive(&session),
            };
            if let Err(e) = result {
                warn!(session_id = %session.id(), error = %e, "Failed to persist session snapshot");
            }
        }
        Job::LatestEpoch { id, reply } => {
            let _ = reply.send(archive.latest_epoch(id));
        }
        Job::Flush(done) => {
            let _ = done.send(());
        }
    }
}
