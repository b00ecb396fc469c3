//! TCP server for the session directory
//!
//! A connection starts in a handshake: it may list sessions any number of
//! times, then creates or joins exactly one session. From then on a writer
//! task drains the participant's outbox while the read loop applies its
//! commands.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use aphrodite_core::config::Config;
use aphrodite_core::Clock;

use crate::directory::{LeaveReason, Membership, SessionDirectory, SessionHandle};
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, RejectReason, ServerMessage};

/// How long a closing connection may spend flushing its outbox
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerOptions {
    /// How often silent participants are swept
    pub reaper_interval: Duration,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reaper_interval: config.sync.heartbeat_interval(),
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Running server handle
pub struct Server {
    addr: SocketAddr,
    directory: SessionDirectory,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind `bind` and start accepting connections
    pub async fn start(
        bind: SocketAddr,
        directory: SessionDirectory,
        options: ServerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let accept = tokio::spawn(accept_loop(listener, directory.clone(), shutdown_tx.clone()));
        let reaper = directory.spawn_reaper(options.reaper_interval, shutdown_tx.subscribe());

        Ok(Server {
            addr,
            directory,
            shutdown_tx,
            tasks: vec![accept, reaper],
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// Notify every participant, close all sessions, and stop accepting
    pub async fn shutdown(self) {
        info!("Server shutdown initiated");
        self.directory.close_all().await;
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Server task ended abnormally");
            }
        }
        info!("Server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    directory: SessionDirectory,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            directory.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    directory: SessionDirectory,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let handshake_result = tokio::select! {
        result = handshake(&mut reader, &mut writer, &directory) => result,
        _ = shutdown_rx.recv() => {
            let _ = write_frame(&mut writer, &ServerMessage::ServerShutdown).await;
            return;
        }
    };
    let Membership { handle, outbox } = match handshake_result {
        Ok(Some(membership)) => membership,
        Ok(None) => {
            debug!(addr = %addr, "Connection closed before joining");
            return;
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            return;
        }
    };

    let session_id = handle.session_id();
    let participant_id = handle.participant_id();
    info!(addr = %addr, session_id = %session_id, participant_id = %participant_id, "Participant connected");

    let mut writer_task = tokio::spawn(write_loop(writer, outbox));
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            result = read_frame::<ClientMessage, _>(&mut reader) => {
                match result {
                    Ok(ClientMessage::Leave) => break LeaveReason::Explicit,
                    Ok(msg) => handle_message(msg, &handle, &directory).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(participant_id = %participant_id, "Connection closed");
                        break LeaveReason::Disconnected;
                    }
                    Err(e) => {
                        warn!(participant_id = %participant_id, error = %e, "Read error");
                        break LeaveReason::Disconnected;
                    }
                }
            }
            _ = &mut writer_task => {
                // Outbox closed: removed by the directory or the socket died
                writer_done = true;
                break LeaveReason::Disconnected;
            }
            _ = shutdown_rx.recv() => break LeaveReason::Shutdown,
        }
    };

    if let Err(e) = handle.leave(reason).await {
        debug!(participant_id = %participant_id, error = %e, "Participant already removed");
    }
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        writer_task.abort();
    }

    info!(session_id = %session_id, participant_id = %participant_id, ?reason, "Participant disconnected");
}

/// Serve requests until the connection creates or joins a session
///
/// Returns `None` when the client goes away or is turned down.
async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    directory: &SessionDirectory,
) -> Result<Option<Membership>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = match read_frame::<ClientMessage, _>(reader).await {
            Ok(msg) => msg,
            Err(Error::ConnectionClosed) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = match msg {
            ClientMessage::ListSessions { filter } => {
                let sessions = directory.list_open_sessions(&filter, None).await;
                write_frame(writer, &ServerMessage::SessionList { sessions }).await?;
                continue;
            }
            ClientMessage::Heartbeat => {
                let server_time = directory.clock().now();
                write_frame(writer, &ServerMessage::HeartbeatAck { server_time }).await?;
                continue;
            }
            ClientMessage::CreateSession(request) => directory.create_session(request).await,
            ClientMessage::JoinSession {
                session_id,
                identity,
                password,
            } => {
                directory
                    .join_session(session_id, identity, password.as_deref())
                    .await
            }
            ClientMessage::Leave => return Ok(None),
            ClientMessage::Command { .. } => {
                let rejected = ServerMessage::Rejected {
                    reason: RejectReason::NotJoined,
                    message: "join a session before sending commands".into(),
                };
                write_frame(writer, &rejected).await?;
                return Ok(None);
            }
        };

        match result {
            Ok(membership) => return Ok(Some(membership)),
            Err(e) => {
                debug!(error = %e, "Create or join rejected");
                write_frame(writer, &ServerMessage::rejected(&e)).await?;
                return Ok(None);
            }
        }
    }
}

/// Drain the outbox onto the socket until either side closes
async fn write_loop<W>(mut writer: W, mut outbox: mpsc::Receiver<ServerMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn handle_message(msg: ClientMessage, handle: &SessionHandle, directory: &SessionDirectory) {
    match msg {
        ClientMessage::Command { command } => {
            if let Err(e) = handle.apply(command.clone()).await {
                debug!(
                    participant_id = %handle.participant_id(),
                    command = command.name(),
                    error = %e,
                    "Command rejected"
                );
                let _ = handle
                    .send(ServerMessage::command_rejected(&command, &e))
                    .await;
            }
        }
        ClientMessage::Heartbeat => {
            if let Err(e) = handle.heartbeat().await {
                debug!(participant_id = %handle.participant_id(), error = %e, "Heartbeat failed");
            }
        }
        ClientMessage::ListSessions { filter } => {
            let sessions = directory
                .list_open_sessions(&filter, Some(handle.participant_id()))
                .await;
            let _ = handle.send(ServerMessage::SessionList { sessions }).await;
        }
        ClientMessage::CreateSession(_) | ClientMessage::JoinSession { .. } => {
            let _ = handle
                .send(ServerMessage::CommandRejected {
                    command: "join_session".into(),
                    reason: RejectReason::AlreadyJoined,
                    message: "this connection already belongs to a session".into(),
                })
                .await;
        }
        ClientMessage::Leave => {}
    }
}
