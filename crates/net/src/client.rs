//! TCP client for a session server
//!
//! Connecting is bounded by the join timeout and only succeeds once the
//! server's `Joined` snapshot has arrived. After that a reader task turns
//! frames into [`Inbound`] events stamped with the local clock, and a writer
//! task sends commands and periodic heartbeats.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aphrodite_core::config::Config;
use aphrodite_core::{
    Clock, Command, Identity, SessionFilter, SessionSummary, SessionView, SharedClock, SyncAnchor,
    SyncPoint, Timestamp,
};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, CreateSessionRequest, ServerMessage};

/// Events buffered between the reader task and the consumer
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientOptions {
    /// Upper bound on connect plus create/join
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            join_timeout: config.sync.join_timeout(),
            heartbeat_interval: config.sync.heartbeat_interval(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The snapshot a client received on joining
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedSession {
    pub participant_id: Uuid,
    pub view: SessionView,
    pub server_time: Timestamp,
    /// Local clock reading when the snapshot arrived
    pub received_at: Timestamp,
}

impl JoinedSession {
    /// The snapshot's playback pinned to the local clock
    pub fn anchor(&self) -> SyncAnchor {
        SyncAnchor::new(
            SyncPoint {
                playback: self.view.playback,
                server_time: self.server_time,
            },
            self.received_at,
            self.view.media.duration_seconds,
        )
    }
}

/// A server message and when it arrived locally
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message: ServerMessage,
    pub received_at: Timestamp,
}

enum Outgoing {
    Send(ClientMessage),
    Leave,
}

/// Cloneable handle for sending commands over a client's connection
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Outgoing>,
}

impl CommandSender {
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.tx
            .send(Outgoing::Send(ClientMessage::Command { command }))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Ask the server for a fresh listing; the answer arrives as an event
    pub async fn request_listing(&self, filter: SessionFilter) -> Result<()> {
        self.tx
            .send(Outgoing::Send(ClientMessage::ListSessions { filter }))
            .await
            .map_err(|_| Error::NotConnected)
    }
}

/// A joined participant's connection
///
/// Dropping it leaves the session, same as [`leave`](Client::leave).
pub struct Client {
    joined: JoinedSession,
    event_rx: mpsc::Receiver<Inbound>,
    cmd_tx: mpsc::Sender<Outgoing>,
}

impl Client {
    /// Join an existing session
    pub async fn join(
        addr: SocketAddr,
        session_id: Uuid,
        identity: Identity,
        password: Option<String>,
        clock: SharedClock,
        options: ClientOptions,
    ) -> Result<Self> {
        info!(addr = %addr, session_id = %session_id, "Joining session");
        let request = ClientMessage::JoinSession {
            session_id,
            identity,
            password,
        };
        Self::establish(addr, request, clock, options).await
    }

    /// Create a session and join it as host
    pub async fn create(
        addr: SocketAddr,
        request: CreateSessionRequest,
        clock: SharedClock,
        options: ClientOptions,
    ) -> Result<Self> {
        info!(addr = %addr, name = %request.name, "Creating session");
        Self::establish(addr, ClientMessage::CreateSession(request), clock, options).await
    }

    /// One-shot listing of open sessions
    pub async fn list_sessions(
        addr: SocketAddr,
        filter: SessionFilter,
        timeout: Duration,
    ) -> Result<Vec<SessionSummary>> {
        let request = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &ClientMessage::ListSessions { filter }).await?;
            match read_frame::<ServerMessage, _>(&mut stream).await? {
                ServerMessage::SessionList { sessions } => Ok::<_, Error>(sessions),
                other => Err(Error::Protocol(format!(
                    "Expected session list, got {:?}",
                    other
                ))),
            }
        };
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Error::Timeout(format!("listing sessions at {}", addr)))?
    }

    async fn establish(
        addr: SocketAddr,
        request: ClientMessage,
        clock: SharedClock,
        options: ClientOptions,
    ) -> Result<Self> {
        let handshake = async {
            let stream = TcpStream::connect(addr).await?;
            let (mut reader, mut writer) = tokio::io::split(stream);
            write_frame(&mut writer, &request).await?;

            let joined = match read_frame::<ServerMessage, _>(&mut reader).await? {
                ServerMessage::Joined {
                    participant_id,
                    view,
                    server_time,
                } => JoinedSession {
                    participant_id,
                    view,
                    server_time,
                    received_at: clock.now(),
                },
                ServerMessage::Rejected { reason, message } => {
                    warn!(?reason, message = %message, "Join rejected");
                    return Err(Error::Rejected { reason, message });
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "Expected joined snapshot, got {:?}",
                        other
                    )))
                }
            };
            Ok::<_, Error>((reader, writer, joined))
        };

        let (reader, writer, joined) = tokio::time::timeout(options.join_timeout, handshake)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "joining via {} took longer than {:?}",
                    addr, options.join_timeout
                ))
            })??;

        info!(
            session_id = %joined.view.id,
            participant_id = %joined.participant_id,
            epoch = joined.view.epoch,
            "Joined session"
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(read_loop(reader, clock, event_tx));
        tokio::spawn(write_loop(writer, cmd_rx, options.heartbeat_interval));

        Ok(Client {
            joined,
            event_rx,
            cmd_tx,
        })
    }

    pub fn participant_id(&self) -> Uuid {
        self.joined.participant_id
    }

    pub fn session_id(&self) -> Uuid {
        self.joined.view.id
    }

    pub fn joined(&self) -> &JoinedSession {
        &self.joined
    }

    /// Next message from the server; `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<Inbound> {
        self.event_rx.recv().await
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.sender().send_command(command).await
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Leave the session; the server then closes the connection
    pub async fn leave(&self) -> Result<()> {
        self.cmd_tx
            .send(Outgoing::Leave)
            .await
            .map_err(|_| Error::NotConnected)
    }
}

async fn read_loop(
    mut reader: ReadHalf<TcpStream>,
    clock: SharedClock,
    event_tx: mpsc::Sender<Inbound>,
) {
    loop {
        match read_frame::<ServerMessage, _>(&mut reader).await {
            Ok(ServerMessage::HeartbeatAck { server_time }) => {
                debug!(server_time = server_time.as_micros(), "Heartbeat acknowledged");
            }
            Ok(message) => {
                let shutdown = message == ServerMessage::ServerShutdown;
                let inbound = Inbound {
                    message,
                    received_at: clock.now(),
                };
                if event_tx.send(inbound).await.is_err() || shutdown {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
    info!("Disconnected from server");
}

async fn write_loop(
    mut writer: WriteHalf<TcpStream>,
    mut cmd_rx: mpsc::Receiver<Outgoing>,
    heartbeat_interval: Duration,
) {
    let start = tokio::time::Instant::now() + heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(start, heartbeat_interval);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Outgoing::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(Outgoing::Leave) | None => {
                        debug!("Leaving session");
                        let _ = write_frame(&mut writer, &ClientMessage::Leave).await;
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write_frame(&mut writer, &ClientMessage::Heartbeat).await {
                    warn!(error = %e, "Heartbeat failed");
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
