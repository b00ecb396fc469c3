//! Participant sync driver
//!
//! Ties one client connection to one local player. Viewers follow the
//! authoritative playback: every `Sync` re-anchors the target and a periodic
//! drift check reconciles the player against it. The host's own player is
//! the source of commands instead; local changes are forwarded to the server
//! and applied to the host's anchor right away rather than waiting for the
//! round trip.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aphrodite_core::config::SyncConfig;
use aphrodite_core::sync::DEFAULT_DRIFT_THRESHOLD;
use aphrodite_core::{
    reconcile, Clock, Command, LocalPlayback, PlaybackState, SharedClock, SyncAnchor, SyncPoint,
};

use crate::client::{Client, CommandSender, Inbound};
use crate::error::Result;
use crate::player::{
    call_with_retry, Ack, PlaybackAdapter, PlaybackError, PlayerEvent, RetryPolicy, Subscription,
};
use crate::protocol::ServerMessage;

/// Smallest jump in a host's player that counts as a seek
const HOST_SEEK_EPSILON: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverOptions {
    /// Drift in seconds tolerated before a corrective seek
    pub drift_threshold: f64,
    pub drift_check_interval: Duration,
    pub retry: RetryPolicy,
}

impl DriverOptions {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            drift_threshold: sync.drift_threshold_secs,
            drift_check_interval: sync.drift_check_interval(),
            retry: RetryPolicy::from_config(sync),
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            drift_check_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// How a driver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Left,
    ServerShutdown,
    Disconnected,
}

pub struct ParticipantDriver {
    client: Client,
    player: Arc<dyn PlaybackAdapter>,
    clock: SharedClock,
    options: DriverOptions,
    events: Subscription,
    epoch: u64,
    last_sequence: u64,
    anchor: SyncAnchor,
    host_id: Option<Uuid>,
}

impl ParticipantDriver {
    /// Load the session's media and line the player up with the snapshot
    pub async fn start(
        client: Client,
        player: Arc<dyn PlaybackAdapter>,
        clock: SharedClock,
        options: DriverOptions,
    ) -> Result<Self> {
        let joined = client.joined().clone();
        let events = player.subscribe();
        let ready = player.load(&joined.view.media).await?;
        debug!(media_ref = %ready.media_ref, duration = ?ready.duration_seconds, "Player ready");

        let driver = Self {
            anchor: joined.anchor(),
            epoch: joined.view.epoch,
            last_sequence: joined.view.last_sequence,
            host_id: joined.view.host_id,
            client,
            player,
            clock,
            options,
            events,
        };
        driver.align_player().await;
        Ok(driver)
    }

    pub fn participant_id(&self) -> Uuid {
        self.client.participant_id()
    }

    pub fn is_host(&self) -> bool {
        self.host_id == Some(self.participant_id())
    }

    pub fn anchor(&self) -> &SyncAnchor {
        &self.anchor
    }

    /// For chat and reactions while the driver runs
    pub fn sender(&self) -> CommandSender {
        self.client.sender()
    }

    /// Drive the player until the session ends for this participant
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<Exit> {
        let mut drift_check = tokio::time::interval(self.options.drift_check_interval);
        drift_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = self.client.next_event() => {
                    match inbound {
                        Some(inbound) => {
                            if let Some(exit) = self.on_message(inbound).await {
                                return Ok(exit);
                            }
                        }
                        None => {
                            info!("Connection to session lost");
                            return Ok(Exit::Disconnected);
                        }
                    }
                }
                event = self.events.next() => {
                    match event {
                        Some(event) => self.on_player_event(event).await,
                        None => {
                            warn!("Player went away; leaving session");
                            let _ = self.client.leave().await;
                            return Ok(Exit::Left);
                        }
                    }
                }
                _ = drift_check.tick() => {
                    if !self.is_host() {
                        self.align_player().await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = self.client.leave().await;
                    return Ok(Exit::Left);
                }
            }
        }
    }

    async fn on_message(&mut self, inbound: Inbound) -> Option<Exit> {
        let me = self.participant_id();
        match inbound.message {
            ServerMessage::Sync {
                session_id,
                epoch,
                sequence,
                point,
                issued_by,
            } => {
                if session_id != self.client.session_id()
                    || epoch != self.epoch
                    || sequence <= self.last_sequence
                {
                    debug!(sequence, epoch, last = self.last_sequence, "Dropping stale sync");
                    return None;
                }
                self.last_sequence = sequence;
                self.anchor = SyncAnchor::new(point, inbound.received_at, self.anchor_duration());
                if issued_by != me {
                    self.align_player().await;
                }
            }
            ServerMessage::Chat { entry } => {
                self.last_sequence = self.last_sequence.max(entry.sequence);
                info!(author = %entry.author_name, at = %entry.format_timestamp(), "{}", entry.text);
            }
            ServerMessage::Reaction { reaction } => {
                self.last_sequence = self.last_sequence.max(reaction.sequence);
                info!(author = %reaction.author_name, emoji = %reaction.emoji, "Reaction");
            }
            ServerMessage::Roster {
                participants,
                host_id,
            } => {
                debug!(count = participants.len(), "Roster updated");
                self.host_id = host_id;
            }
            ServerMessage::HostChanged { host_id } => {
                self.host_id = Some(host_id);
                if host_id == me {
                    info!("Now hosting this session");
                }
            }
            ServerMessage::CommandRejected {
                command,
                reason,
                message,
            } => {
                warn!(command = %command, ?reason, message = %message, "Command rejected");
                // The local player may have run ahead of what the server accepted
                self.align_player().await;
            }
            ServerMessage::ServerShutdown => {
                info!("Server is shutting down");
                return Some(Exit::ServerShutdown);
            }
            ServerMessage::SessionList { sessions } => {
                info!(count = sessions.len(), "Open sessions");
                for session in sessions {
                    info!(
                        session_id = %session.id,
                        name = %session.name,
                        participants = session.participant_count,
                        capacity = session.capacity,
                        private = session.is_private,
                        "Open session"
                    );
                }
            }
            ServerMessage::Joined { .. }
            | ServerMessage::Rejected { .. }
            | ServerMessage::HeartbeatAck { .. } => {
                debug!("Ignoring unexpected message");
            }
        }
        None
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::StateChanged {
                position,
                is_playing,
                rate,
                local: true,
            } if self.is_host() => self.forward_host_change(position, is_playing, rate).await,
            PlayerEvent::StateChanged { local: true, .. } => {
                debug!("Viewer changed the player locally; drift check will correct it");
            }
            PlayerEvent::StateChanged { local: false, .. } | PlayerEvent::Ready => {}
            PlayerEvent::Error { reason } => {
                warn!(reason = %reason, "Player reported an error");
            }
        }
    }

    /// Turn a host's local player change into commands
    async fn forward_host_change(&mut self, position: f64, is_playing: bool, rate: f64) {
        let now = self.clock.now();
        let current = *self.anchor.playback();
        let expected = self.anchor.target_position(now);

        let mut commands = Vec::new();
        if (position - expected).abs() > HOST_SEEK_EPSILON {
            commands.push(Command::SeekTo { position });
        }
        if (rate - current.rate_multiplier).abs() > f64::EPSILON {
            commands.push(Command::ChangeRate { multiplier: rate });
        }
        if is_playing != current.is_playing {
            commands.push(if is_playing { Command::Play } else { Command::Pause });
        }
        if commands.is_empty() {
            return;
        }

        // Optimistic local echo: the host's player already shows the change
        let server_time = self.anchor.server_now(now);
        self.anchor = SyncAnchor::new(
            SyncPoint {
                playback: PlaybackState {
                    position_seconds: position,
                    is_playing,
                    last_updated_at: server_time,
                    rate_multiplier: rate,
                },
                server_time,
            },
            now,
            self.anchor_duration(),
        );

        for command in commands {
            debug!(command = command.name(), "Forwarding host action");
            if let Err(e) = self.client.send_command(command).await {
                warn!(error = %e, "Failed to forward host action");
                return;
            }
        }
    }

    /// Bring the player in line with the anchor
    ///
    /// Failures are logged and left for the next drift check.
    async fn align_player(&self) {
        let now = self.clock.now();
        let local = LocalPlayback {
            position: self.player.current_position(),
            is_playing: self.player.is_playing(),
        };
        let correction = reconcile(&self.anchor, local, now, self.options.drift_threshold);

        if let Some(target) = correction.seek_to {
            info!(drift = correction.drift, target, "Correcting drift");
            self.call("seek_to", || self.player.seek_to(target)).await;
        }

        let rate = self.anchor.playback().rate_multiplier;
        if (self.player.current_rate() - rate).abs() > f64::EPSILON {
            self.call("set_rate", || self.player.set_rate(rate)).await;
        }

        match correction.set_playing {
            Some(true) => self.call("play", || self.player.play()).await,
            Some(false) => self.call("pause", || self.player.pause()).await,
            None => {}
        }
    }

    async fn call<F, Fut>(&self, operation: &str, call: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Ack, PlaybackError>>,
    {
        if let Err(e) = call_with_retry(&self.options.retry, operation, call).await {
            warn!(operation, error = %e, "Player call failed");
        }
    }

    fn anchor_duration(&self) -> Option<f64> {
        self.client.joined().view.media.duration_seconds
    }
}
