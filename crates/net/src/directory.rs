//! Session directory
//!
//! Owns every open session. Each session sits in its own slot behind a
//! mutex, so commands for one session are applied one at a time while
//! different sessions proceed independently. Outgoing messages are queued
//! while the slot is locked, which gives every participant the same total
//! order of events.
//!
//! A participant's outbox is bounded. Anyone who cannot keep up is removed
//! rather than allowed to stall the session.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aphrodite_core::config::Config;
use aphrodite_core::{
    Access, Applied, Clock, Command, Error, Identity, IssuedCommand, MediaResolver, NewSession, Result,
    Session, SessionArchive, SessionEvent, SessionFilter, SessionLimits, SessionPhase,
    SessionSummary, SessionView, SharedClock, SyncPoint, Timestamp,
};

use crate::archive_writer::ArchiveWriter;
use crate::protocol::{CreateSessionRequest, ServerMessage};

/// Messages queued per participant before it counts as stalled
const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Directory events buffered for slow subscribers
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryOptions {
    pub default_capacity: usize,
    pub max_capacity: usize,
    pub max_sessions: usize,
    pub limits: SessionLimits,
    /// Send `Sync` back to the host that issued the command
    pub echo_to_origin: bool,
    pub outbox_capacity: usize,
    pub join_timeout: Duration,
    pub liveness_timeout: Duration,
}

impl DirectoryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_capacity: config.directory.default_capacity,
            max_capacity: config.directory.max_capacity,
            max_sessions: config.directory.max_sessions,
            limits: config.directory.session_limits(),
            echo_to_origin: config.sync.echo_to_origin,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            join_timeout: config.sync.join_timeout(),
            liveness_timeout: config.sync.liveness_timeout(),
        }
    }
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Lifecycle notifications for observers such as the webhook notifier
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    SessionCreated {
        session_id: Uuid,
        name: String,
        host_name: String,
    },
    SessionClosed {
        session_id: Uuid,
        epoch: u64,
    },
}

/// Why a participant was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Explicit,
    Disconnected,
    TimedOut,
    Backpressure,
    Shutdown,
}

struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
    last_seen: Timestamp,
}

struct SlotState {
    session: Session,
    outboxes: HashMap<Uuid, Outbox>,
}

impl SlotState {
    /// Queue `msg` for everyone but `except`; returns whoever could not take it
    fn broadcast(&self, msg: &ServerMessage, except: Option<Uuid>) -> Vec<Uuid> {
        self.outboxes
            .iter()
            .filter(|(id, _)| except != Some(**id))
            .filter(|(_, outbox)| outbox.tx.try_send(msg.clone()).is_err())
            .map(|(id, _)| *id)
            .collect()
    }

    fn send_to(&self, participant_id: Uuid, msg: ServerMessage) -> bool {
        self.outboxes
            .get(&participant_id)
            .is_some_and(|outbox| outbox.tx.try_send(msg).is_ok())
    }

    fn roster(&self) -> ServerMessage {
        ServerMessage::Roster {
            participants: self.session.participants().to_vec(),
            host_id: self.session.host_id(),
        }
    }
}

struct SessionSlot {
    id: Uuid,
    state: Mutex<SlotState>,
}

struct Shared {
    sessions: RwLock<HashMap<Uuid, Arc<SessionSlot>>>,
    clock: SharedClock,
    resolver: Arc<dyn MediaResolver>,
    archive: Option<ArchiveWriter>,
    options: DirectoryOptions,
    events: broadcast::Sender<DirectoryEvent>,
}

impl Shared {
    fn persist(&self, session: &Session) {
        if let Some(archive) = &self.archive {
            archive.persist(session);
        }
    }

    /// Remove participants with the slot locked, cascading to anyone who
    /// stalls on the resulting roster updates. Returns whether the session
    /// emptied.
    fn evict(&self, state: &mut SlotState, mut pending: Vec<(Uuid, LeaveReason)>) -> bool {
        if pending.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let session_id = state.session.id();

        while let Some((participant_id, reason)) = pending.pop() {
            let Ok(outcome) = state.session.leave(participant_id, now) else {
                continue;
            };
            state.outboxes.remove(&participant_id);
            info!(session_id = %session_id, participant_id = %participant_id, ?reason, "Participant removed");

            if outcome.emptied {
                break;
            }
            let stalled = |ids: Vec<Uuid>| ids.into_iter().map(|id| (id, LeaveReason::Backpressure));
            if let Some(host_id) = outcome.new_host {
                info!(session_id = %session_id, host_id = %host_id, "Host handed over");
                pending.extend(stalled(
                    state.broadcast(&ServerMessage::HostChanged { host_id }, None),
                ));
            }
            let roster = state.roster();
            pending.extend(stalled(state.broadcast(&roster, None)));
        }

        self.persist(&state.session);
        let emptied = state.session.phase() == SessionPhase::Empty;
        if emptied {
            info!(session_id = %session_id, epoch = state.session.epoch(), "Session emptied");
            let _ = self.events.send(DirectoryEvent::SessionClosed {
                session_id,
                epoch: state.session.epoch(),
            });
        }
        emptied
    }

    /// Forget an emptied slot, unless the id has already been reused
    async fn drop_slot(&self, slot: &Arc<SessionSlot>) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(&slot.id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(&slot.id);
            debug!(session_id = %slot.id, "Session slot released");
        }
    }

    async fn snapshot(&self) -> Vec<Arc<SessionSlot>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

/// A participant's live membership: its handle plus the queue of messages
/// addressed to it. The first queued message is always `Joined`.
pub struct Membership {
    pub handle: SessionHandle,
    pub outbox: mpsc::Receiver<ServerMessage>,
}

/// Lookup and bookkeeping for all open sessions
#[derive(Clone)]
pub struct SessionDirectory {
    shared: Arc<Shared>,
}

impl SessionDirectory {
    pub fn new(
        clock: SharedClock,
        resolver: Arc<dyn MediaResolver>,
        options: DirectoryOptions,
        archive: Option<Arc<dyn SessionArchive>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                sessions: RwLock::new(HashMap::new()),
                clock,
                resolver,
                archive: archive.map(ArchiveWriter::spawn),
                options,
                events,
            }),
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.shared.clock
    }

    pub fn options(&self) -> &DirectoryOptions {
        &self.shared.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.shared.events.subscribe()
    }

    pub async fn session_count(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    /// Open sessions visible to `caller`, recomputed on every call
    pub async fn list_open_sessions(
        &self,
        filter: &SessionFilter,
        caller: Option<Uuid>,
    ) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for slot in self.shared.snapshot().await {
            let state = slot.state.lock().await;
            if state.session.phase() == SessionPhase::Active
                && filter.matches(&state.session, caller)
            {
                summaries.push(SessionSummary::from(&state.session));
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Open a session with the creator as host
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<Membership> {
        let shared = &self.shared;
        let options = &shared.options;

        let capacity = request.capacity.unwrap_or(options.default_capacity);
        if capacity == 0 {
            return Err(Error::validation("capacity must be greater than zero"));
        }
        if capacity > options.max_capacity {
            return Err(Error::validation(format!(
                "capacity {} exceeds the maximum of {}",
                capacity, options.max_capacity
            )));
        }
        let media = shared
            .resolver
            .resolve(&request.media_ref)
            .map_err(|e| Error::validation(e.to_string()))?;
        let access = Access::from_password(request.password.as_deref())?;
        let id = request.session_id.unwrap_or_else(Uuid::new_v4);
        let archived_epoch = match (&shared.archive, request.session_id) {
            (Some(archive), Some(_)) => archive.latest_epoch(id).await?,
            _ => None,
        };

        let mut sessions = shared.sessions.write().await;

        let mut epoch = 1;
        if let Some(existing) = sessions.get(&id) {
            let existing = existing.state.lock().await;
            if existing.session.phase() == SessionPhase::Active {
                return Err(Error::validation(format!("session {} is already open", id)));
            }
            epoch = existing.session.epoch() + 1;
        } else if sessions.len() >= options.max_sessions {
            return Err(Error::validation("too many open sessions"));
        }
        if let Some(latest) = archived_epoch {
            epoch = epoch.max(latest + 1);
        }

        let now = shared.clock.now();
        let host_name = request.creator.display_name.trim().to_string();
        let session = Session::create(
            NewSession {
                id,
                epoch,
                name: request.name,
                media,
                capacity,
                access,
                limits: options.limits,
            },
            request.creator,
            now,
        )?;
        let host_id = session
            .host_id()
            .ok_or_else(|| Error::validation("session created without a host"))?;

        let (tx, rx) = mpsc::channel(options.outbox_capacity.max(1));
        let _ = tx.try_send(ServerMessage::Joined {
            participant_id: host_id,
            view: SessionView::from(&session),
            server_time: now,
        });

        shared.persist(&session);
        let name = session.name().to_string();
        let mut outboxes = HashMap::new();
        outboxes.insert(host_id, Outbox { tx, last_seen: now });
        let slot = Arc::new(SessionSlot {
            id,
            state: Mutex::new(SlotState { session, outboxes }),
        });
        sessions.insert(id, slot.clone());
        drop(sessions);

        info!(session_id = %id, epoch, host_id = %host_id, "Session created");
        let _ = shared.events.send(DirectoryEvent::SessionCreated {
            session_id: id,
            name,
            host_name,
        });

        Ok(Membership {
            handle: SessionHandle {
                session_id: id,
                participant_id: host_id,
                slot: Arc::downgrade(&slot),
                directory: Arc::downgrade(&self.shared),
            },
            outbox: rx,
        })
    }

    /// Join an open session, bounded by the configured join timeout
    pub async fn join_session(
        &self,
        session_id: Uuid,
        identity: Identity,
        credentials: Option<&str>,
    ) -> Result<Membership> {
        let timeout = self.shared.options.join_timeout;
        match tokio::time::timeout(timeout, self.join_inner(session_id, identity, credentials)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session_id, ?timeout, "Join timed out");
                Err(Error::Timeout(format!(
                    "join of session {} did not complete within {:?}",
                    session_id, timeout
                )))
            }
        }
    }

    async fn join_inner(
        &self,
        session_id: Uuid,
        identity: Identity,
        credentials: Option<&str>,
    ) -> Result<Membership> {
        let shared = &self.shared;
        let slot = shared
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(Error::NotFound(session_id))?;

        let mut state = slot.state.lock().await;
        let now = shared.clock.now();
        let participant = state.session.join(identity, credentials, now)?;

        let (tx, rx) = mpsc::channel(shared.options.outbox_capacity.max(1));
        let _ = tx.try_send(ServerMessage::Joined {
            participant_id: participant.id,
            view: SessionView::from(&state.session),
            server_time: now,
        });
        state
            .outboxes
            .insert(participant.id, Outbox { tx, last_seen: now });
        info!(session_id = %session_id, participant_id = %participant.id, "Participant joined");

        let roster = state.roster();
        let stalled: Vec<_> = state
            .broadcast(&roster, Some(participant.id))
            .into_iter()
            .map(|id| (id, LeaveReason::Backpressure))
            .collect();
        if stalled.is_empty() {
            shared.persist(&state.session);
        } else {
            shared.evict(&mut state, stalled);
        }

        Ok(Membership {
            handle: SessionHandle {
                session_id,
                participant_id: participant.id,
                slot: Arc::downgrade(&slot),
                directory: Arc::downgrade(shared),
            },
            outbox: rx,
        })
    }

    /// Remove participants not heard from within the liveness window
    pub async fn reap_idle(&self) -> usize {
        let shared = &self.shared;
        let limit = shared.options.liveness_timeout;
        let mut reaped = 0;

        for slot in shared.snapshot().await {
            let mut state = slot.state.lock().await;
            let now = shared.clock.now();
            let idle: Vec<_> = state
                .outboxes
                .iter()
                .filter_map(|(id, outbox)| {
                    if outbox.tx.is_closed() {
                        Some((*id, LeaveReason::Disconnected))
                    } else if now.saturating_duration_since(outbox.last_seen) > limit {
                        Some((*id, LeaveReason::TimedOut))
                    } else {
                        None
                    }
                })
                .collect();
            if idle.is_empty() {
                continue;
            }
            reaped += idle.len();
            let emptied = shared.evict(&mut state, idle);
            drop(state);
            if emptied {
                shared.drop_slot(&slot).await;
            }
        }

        if reaped > 0 {
            info!(reaped, "Reaped idle participants");
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until shutdown
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        directory.reap_idle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Reaper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Tell everyone the server is going away and close every session
    pub async fn close_all(&self) {
        let shared = &self.shared;
        for slot in shared.snapshot().await {
            let mut state = slot.state.lock().await;
            state.broadcast(&ServerMessage::ServerShutdown, None);
            let everyone: Vec<_> = state
                .outboxes
                .drain()
                .map(|(id, _)| (id, LeaveReason::Shutdown))
                .collect();
            let emptied = shared.evict(&mut state, everyone);
            drop(state);
            if emptied {
                shared.drop_slot(&slot).await;
            }
        }
        self.flush_archive().await;
    }

    /// Wait for queued snapshots to reach the archive
    pub async fn flush_archive(&self) {
        if let Some(archive) = &self.shared.archive {
            archive.flush().await;
        }
    }
}

/// One participant's capability to act on its session
///
/// Holds only weak references: once the session is closed every call fails
/// with `SessionClosed`.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    participant_id: Uuid,
    slot: Weak<SessionSlot>,
    directory: Weak<Shared>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn participant_id(&self) -> Uuid {
        self.participant_id
    }

    fn upgrade(&self) -> Result<(Arc<Shared>, Arc<SessionSlot>)> {
        match (self.directory.upgrade(), self.slot.upgrade()) {
            (Some(shared), Some(slot)) => Ok((shared, slot)),
            _ => Err(Error::SessionClosed(self.session_id)),
        }
    }

    /// Apply a command from this participant and fan out the result
    pub async fn apply(&self, command: Command) -> Result<Applied> {
        let (shared, slot) = self.upgrade()?;
        let mut state = slot.state.lock().await;
        let now = shared.clock.now();
        if let Some(outbox) = state.outboxes.get_mut(&self.participant_id) {
            outbox.last_seen = now;
        }

        let kind = command.name();
        let applied = state.session.apply(&IssuedCommand {
            session_id: self.session_id,
            issuer: self.participant_id,
            command,
            received_at: now,
        })?;

        let event = match &applied {
            Applied::Changed(event) => event,
            Applied::Unchanged => {
                debug!(session_id = %self.session_id, command = kind, "Command changed nothing");
                return Ok(Applied::Unchanged);
            }
        };

        let (msg, except) = match event {
            SessionEvent::Playback {
                sequence,
                state: playback,
                issued_by,
            } => (
                ServerMessage::Sync {
                    session_id: self.session_id,
                    epoch: state.session.epoch(),
                    sequence: *sequence,
                    point: SyncPoint {
                        playback: *playback,
                        server_time: now,
                    },
                    issued_by: *issued_by,
                },
                (!shared.options.echo_to_origin).then_some(self.participant_id),
            ),
            SessionEvent::Chat(entry) => (
                ServerMessage::Chat {
                    entry: entry.clone(),
                },
                None,
            ),
            SessionEvent::Reaction(reaction) => (
                ServerMessage::Reaction {
                    reaction: reaction.clone(),
                },
                None,
            ),
        };
        debug!(
            session_id = %self.session_id,
            command = kind,
            sequence = event.sequence(),
            "Command applied"
        );

        let stalled: Vec<_> = state
            .broadcast(&msg, except)
            .into_iter()
            .map(|id| (id, LeaveReason::Backpressure))
            .collect();
        let emptied = if stalled.is_empty() {
            if matches!(event, SessionEvent::Playback { .. }) {
                shared.persist(&state.session);
            }
            false
        } else {
            shared.evict(&mut state, stalled)
        };
        drop(state);
        if emptied {
            shared.drop_slot(&slot).await;
        }
        Ok(applied)
    }

    /// Record liveness and queue a `HeartbeatAck`
    pub async fn heartbeat(&self) -> Result<Timestamp> {
        let (shared, slot) = self.upgrade()?;
        let mut state = slot.state.lock().await;
        let now = shared.clock.now();
        let outbox = state
            .outboxes
            .get_mut(&self.participant_id)
            .ok_or(Error::UnknownParticipant(self.participant_id))?;
        outbox.last_seen = now;

        if !state.send_to(self.participant_id, ServerMessage::HeartbeatAck { server_time: now }) {
            let emptied = shared.evict(
                &mut state,
                vec![(self.participant_id, LeaveReason::Backpressure)],
            );
            drop(state);
            if emptied {
                shared.drop_slot(&slot).await;
            }
        }
        Ok(now)
    }

    /// Queue a message for this participant only
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        let (_, slot) = self.upgrade()?;
        let state = slot.state.lock().await;
        if state.send_to(self.participant_id, msg) {
            Ok(())
        } else {
            Err(Error::UnknownParticipant(self.participant_id))
        }
    }

    pub async fn leave(&self, reason: LeaveReason) -> Result<()> {
        let (shared, slot) = self.upgrade()?;
        let mut state = slot.state.lock().await;
        if state.session.participant(self.participant_id).is_none() {
            return Err(Error::UnknownParticipant(self.participant_id));
        }
        let emptied = shared.evict(&mut state, vec![(self.participant_id, reason)]);
        drop(state);
        if emptied {
            shared.drop_slot(&slot).await;
        }
        Ok(())
    }

    /// Current full-state view of the session
    pub async fn view(&self) -> Result<SessionView> {
        let (_, slot) = self.upgrade()?;
        let state = slot.state.lock().await;
        Ok(SessionView::from(&state.session))
    }

    pub async fn is_host(&self) -> bool {
        match self.upgrade() {
            Ok((_, slot)) => slot.state.lock().await.session.is_host(self.participant_id),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aphrodite_core::{CatalogEntry, CatalogResolver, ManualClock, SqliteArchive};

    const MEDIA: &str = "dQw4w9WgXcQ";

    struct Fixture {
        clock: ManualClock,
        directory: SessionDirectory,
    }

    fn fixture_with(options: DirectoryOptions, archive: Option<Arc<dyn SessionArchive>>) -> Fixture {
        let clock = ManualClock::new();
        let resolver = CatalogResolver::new(
            [CatalogEntry {
                media_ref: MEDIA.into(),
                title: Some("Never Gonna Give You Up".into()),
                duration_seconds: Some(212.0),
            }],
            false,
        );
        let directory =
            SessionDirectory::new(Arc::new(clock.clone()), Arc::new(resolver), options, archive);
        Fixture { clock, directory }
    }

    fn fixture() -> Fixture {
        fixture_with(DirectoryOptions::default(), None)
    }

    fn create_request(name: &str, host: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            session_id: None,
            name: name.into(),
            media_ref: MEDIA.into(),
            capacity: Some(4),
            password: None,
            creator: Identity::new(Uuid::new_v4(), host),
        }
    }

    fn drain(outbox: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = outbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    async fn join(f: &Fixture, session_id: Uuid, name: &str) -> Membership {
        f.directory
            .join_session(session_id, Identity::new(Uuid::new_v4(), name), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let f = fixture();
        let mut host = f
            .directory
            .create_session(create_request("Finals", "mara"))
            .await
            .unwrap();

        let sessions = f
            .directory
            .list_open_sessions(&SessionFilter::default(), None)
            .await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "Finals");
        assert_eq!(sessions[0].host_name.as_deref(), Some("mara"));
        assert_eq!(sessions[0].participant_count, 1);

        let first = drain(&mut host.outbox);
        assert!(matches!(first.as_slice(), [ServerMessage::Joined { .. }]));
    }

    #[tokio::test]
    async fn test_unusable_catalog_duration_is_ignored() {
        let clock = ManualClock::new();
        let resolver = CatalogResolver::new(
            [CatalogEntry {
                media_ref: "broken".into(),
                title: None,
                duration_seconds: Some(-10.0),
            }],
            false,
        );
        let directory = SessionDirectory::new(
            Arc::new(clock.clone()),
            Arc::new(resolver),
            DirectoryOptions::default(),
            None,
        );
        let mut request = create_request("Broken catalog", "host");
        request.media_ref = "broken".into();

        let host = directory.create_session(request).await.unwrap();
        host.handle
            .apply(Command::SeekTo { position: 50.0 })
            .await
            .unwrap();

        let view = host.handle.view().await.unwrap();
        assert_eq!(view.media.duration_seconds, None);
        assert_eq!(view.playback.position_seconds, 50.0);
    }

    #[tokio::test]
    async fn test_create_validates_capacity_and_media() {
        let f = fixture();

        let mut zero = create_request("x", "a");
        zero.capacity = Some(0);
        assert!(matches!(
            f.directory.create_session(zero).await,
            Err(Error::Validation(_))
        ));

        let mut unknown = create_request("x", "a");
        unknown.media_ref = "not a video".into();
        assert!(matches!(
            f.directory.create_session(unknown).await,
            Err(Error::Validation(_))
        ));

        assert_eq!(f.directory.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_private_sessions_listed_to_members_only() {
        let f = fixture();
        let mut request = create_request("Secret", "host");
        request.password = Some("hunter22".into());
        let creator = request.creator.id;
        f.directory.create_session(request).await.unwrap();

        let filter = SessionFilter::default();
        assert!(f.directory.list_open_sessions(&filter, None).await.is_empty());
        assert_eq!(
            f.directory
                .list_open_sessions(&filter, Some(creator))
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_join_errors() {
        let f = fixture();
        let mut request = create_request("Tiny", "host");
        request.capacity = Some(1);
        let host = f.directory.create_session(request).await.unwrap();
        let id = host.handle.session_id();

        let err = f
            .directory
            .join_session(id, Identity::new(Uuid::new_v4(), "b"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.join_error(), Some(aphrodite_core::JoinError::CapacityExceeded));

        let err = f
            .directory
            .join_session(Uuid::new_v4(), Identity::new(Uuid::new_v4(), "b"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.join_error(), Some(aphrodite_core::JoinError::NotFound));

        let mut private = create_request("Locked", "host");
        private.password = Some("open sesame".into());
        let locked = f.directory.create_session(private).await.unwrap();
        let err = f
            .directory
            .join_session(
                locked.handle.session_id(),
                Identity::new(Uuid::new_v4(), "b"),
                Some("guess"),
            )
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.join_error(),
            Some(aphrodite_core::JoinError::AuthenticationRequired)
        );
    }

    #[tokio::test]
    async fn test_join_times_out_while_session_busy() {
        let mut options = DirectoryOptions::default();
        options.join_timeout = Duration::from_millis(20);
        let f = fixture_with(options, None);
        let host = f
            .directory
            .create_session(create_request("Busy", "host"))
            .await
            .unwrap();
        let id = host.handle.session_id();

        let slot = f.directory.shared.sessions.read().await.get(&id).cloned().unwrap();
        let _guard = slot.state.lock().await;

        let err = f
            .directory
            .join_session(id, Identity::new(Uuid::new_v4(), "late"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.join_error(), Some(aphrodite_core::JoinError::Timeout));
    }

    #[tokio::test]
    async fn test_playback_sync_skips_origin() {
        let f = fixture();
        let mut host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let mut viewer = join(&f, host.handle.session_id(), "viewer").await;
        drain(&mut host.outbox);
        drain(&mut viewer.outbox);

        f.clock.advance_secs(2.0);
        host.handle.apply(Command::Play).await.unwrap();

        assert!(drain(&mut host.outbox).is_empty());
        match drain(&mut viewer.outbox).as_slice() {
            [ServerMessage::Sync {
                sequence, point, ..
            }] => {
                assert_eq!(*sequence, 1);
                assert!(point.playback.is_playing);
                assert_eq!(point.server_time, f.clock.now());
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_viewer_playback_rejected() {
        let f = fixture();
        let mut host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let viewer = join(&f, host.handle.session_id(), "viewer").await;
        drain(&mut host.outbox);

        let err = viewer.handle.apply(Command::Pause).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorized));
        assert!(drain(&mut host.outbox).is_empty());
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_in_order() {
        let f = fixture();
        let mut host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let mut viewer = join(&f, host.handle.session_id(), "viewer").await;
        drain(&mut host.outbox);
        drain(&mut viewer.outbox);

        viewer
            .handle
            .apply(Command::SendChat { text: "hi".into() })
            .await
            .unwrap();
        host.handle.apply(Command::Play).await.unwrap();
        host.handle
            .apply(Command::SendReaction { emoji: "🎉".into() })
            .await
            .unwrap();

        let sequences = |messages: Vec<ServerMessage>| -> Vec<u64> {
            messages
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::Chat { entry } => Some(entry.sequence),
                    ServerMessage::Reaction { reaction } => Some(reaction.sequence),
                    ServerMessage::Sync { sequence, .. } => Some(sequence),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(sequences(drain(&mut viewer.outbox)), vec![1, 2, 3]);
        assert_eq!(sequences(drain(&mut host.outbox)), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_host_handover_on_leave() {
        let f = fixture();
        let host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let id = host.handle.session_id();
        f.clock.advance_secs(5.0);
        let mut a = join(&f, id, "a").await;
        f.clock.advance_secs(5.0);
        let mut b = join(&f, id, "b").await;
        drain(&mut a.outbox);
        drain(&mut b.outbox);

        host.handle.leave(LeaveReason::Explicit).await.unwrap();

        let messages = drain(&mut b.outbox);
        assert!(messages.contains(&ServerMessage::HostChanged {
            host_id: a.handle.participant_id()
        }));
        assert!(a.handle.is_host().await);
        a.handle.apply(Command::Play).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_leave_closes_session() {
        let f = fixture();
        let mut events = f.directory.subscribe();
        let host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();

        host.handle.leave(LeaveReason::Explicit).await.unwrap();

        assert_eq!(f.directory.session_count().await, 0);
        assert!(matches!(
            events.recv().await.unwrap(),
            DirectoryEvent::SessionCreated { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            DirectoryEvent::SessionClosed { epoch: 1, .. }
        ));
        assert!(matches!(
            host.handle.apply(Command::Play).await,
            Err(Error::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_reaper_removes_silent_participants() {
        let f = fixture();
        let host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let viewer = join(&f, host.handle.session_id(), "viewer").await;

        f.clock.advance_secs(20.0);
        host.handle.heartbeat().await.unwrap();
        f.clock.advance_secs(15.0);

        assert_eq!(f.directory.reap_idle().await, 1);
        let view = host.handle.view().await.unwrap();
        assert_eq!(view.participants.len(), 1);
        assert!(matches!(
            viewer.handle.heartbeat().await,
            Err(Error::UnknownParticipant(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_participant_is_disconnected() {
        let mut options = DirectoryOptions::default();
        options.outbox_capacity = 3;
        let f = fixture_with(options, None);
        let mut host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        let mut viewer = join(&f, host.handle.session_id(), "viewer").await;

        for i in 0..3 {
            drain(&mut host.outbox);
            host.handle
                .apply(Command::SendChat {
                    text: format!("message {}", i),
                })
                .await
                .unwrap();
        }

        let view = host.handle.view().await.unwrap();
        assert_eq!(view.participants.len(), 1);
        let host_messages = drain(&mut host.outbox);
        assert!(host_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::Roster { participants, .. } if participants.len() == 1)));

        // The stalled viewer's queue ends once its outbox is dropped
        let delivered = drain(&mut viewer.outbox);
        assert_eq!(delivered.len(), 3);
        assert!(viewer.outbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recreated_session_gets_next_epoch() {
        let archive: Arc<dyn SessionArchive> = Arc::new(SqliteArchive::open_in_memory().unwrap());
        let f = fixture_with(DirectoryOptions::default(), Some(archive.clone()));
        let id = Uuid::new_v4();

        let mut request = create_request("Weekly", "host");
        request.session_id = Some(id);
        let first = f.directory.create_session(request.clone()).await.unwrap();
        first.handle.leave(LeaveReason::Explicit).await.unwrap();
        f.directory.flush_archive().await;
        assert!(archive.load(id).unwrap().unwrap().archived);

        let second = f.directory.create_session(request).await.unwrap();
        let view = second.handle.view().await.unwrap();
        assert_eq!(view.epoch, 2);
        f.directory.flush_archive().await;
        assert_eq!(archive.latest_epoch(id).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_close_all_notifies_and_archives() {
        let f = fixture();
        let mut host = f
            .directory
            .create_session(create_request("Finals", "host"))
            .await
            .unwrap();
        drain(&mut host.outbox);

        f.directory.close_all().await;

        assert_eq!(host.outbox.recv().await, Some(ServerMessage::ServerShutdown));
        assert_eq!(host.outbox.recv().await, None);
        assert_eq!(f.directory.session_count().await, 0);
    }
}
