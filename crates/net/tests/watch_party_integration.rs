//! End-to-end watch party over TCP
//!
//! A host and a viewer run full participant drivers against simulated
//! players; a third participant watches the raw message stream. Time is
//! driven by one shared manual clock, so positions are exact.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aphrodite_core::{
    CatalogEntry, CatalogResolver, Command, Identity, ManualClock, SessionFilter, SharedClock,
};
use aphrodite_net::{
    Client, ClientOptions, CreateSessionRequest, DirectoryOptions, DriverOptions, Exit,
    ParticipantDriver, PlaybackAdapter, ServerMessage, Server, ServerOptions, SessionDirectory,
    SimulatedPlayer,
};
use tokio::sync::broadcast;
use uuid::Uuid;

const MEDIA: &str = "feature-presentation";

async fn start_server(clock: &ManualClock) -> Server {
    let resolver = CatalogResolver::new(
        vec![CatalogEntry {
            media_ref: MEDIA.into(),
            title: Some("Feature Presentation".into()),
            duration_seconds: Some(600.0),
        }],
        false,
    );
    let directory = SessionDirectory::new(
        Arc::new(clock.clone()),
        Arc::new(resolver),
        DirectoryOptions::default(),
        None,
    );
    Server::start(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        directory,
        ServerOptions::default(),
    )
    .await
    .unwrap()
}

fn driver_options() -> DriverOptions {
    DriverOptions {
        drift_check_interval: Duration::from_millis(20),
        ..DriverOptions::default()
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Next message from `client` matching `pred`, skipping the rest
async fn expect_message(
    client: &mut Client,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    let wait = async {
        loop {
            let inbound = client.next_event().await.expect("connection closed");
            if pred(&inbound.message) {
                return inbound.message;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("message did not arrive")
}

#[tokio::test]
async fn test_watch_party() {
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let server = start_server(&clock).await;
    let addr = server.addr();

    // Host creates the session and starts driving its player
    let host_client = Client::create(
        addr,
        CreateSessionRequest {
            session_id: None,
            name: "Movie night".into(),
            media_ref: MEDIA.into(),
            capacity: Some(4),
            password: None,
            creator: Identity::new(Uuid::new_v4(), "host"),
        },
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();
    let session_id = host_client.session_id();
    let host_player = Arc::new(SimulatedPlayer::new(shared.clone()));
    let host = ParticipantDriver::start(
        host_client,
        host_player.clone(),
        shared.clone(),
        driver_options(),
    )
    .await
    .unwrap();
    assert!(host.is_host());
    let (host_stop, host_stop_rx) = broadcast::channel(1);
    let host_task = tokio::spawn(host.run(host_stop_rx));

    // A viewer joins with its own player
    let viewer_client = Client::join(
        addr,
        session_id,
        Identity::new(Uuid::new_v4(), "viewer"),
        None,
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();
    let viewer_id = viewer_client.participant_id();
    let viewer_player = Arc::new(SimulatedPlayer::new(shared.clone()));
    let viewer = ParticipantDriver::start(
        viewer_client,
        viewer_player.clone(),
        shared.clone(),
        driver_options(),
    )
    .await
    .unwrap();
    assert!(!viewer.is_host());
    let (_viewer_stop, viewer_stop_rx) = broadcast::channel(1);
    let viewer_task = tokio::spawn(viewer.run(viewer_stop_rx));

    // An observer joins later and reads raw messages
    clock.advance_secs(1.0);
    let mut observer = Client::join(
        addr,
        session_id,
        Identity::new(Uuid::new_v4(), "observer"),
        None,
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(observer.joined().view.participants.len(), 3);

    // Host seeks and plays on its own player; the viewer follows
    host_player.user_seek(120.0);
    host_player.user_play();
    eventually("viewer to start playing at 120", || {
        viewer_player.is_playing() && (viewer_player.current_position() - 120.0).abs() < 1e-6
    })
    .await;
    let play = expect_message(&mut observer, |m| {
        matches!(m, ServerMessage::Sync { point, .. } if point.playback.is_playing)
    })
    .await;
    let play_sequence = match play {
        ServerMessage::Sync { sequence, .. } => sequence,
        _ => unreachable!(),
    };

    // Three seconds later everyone computes the same position
    clock.advance_secs(3.0);
    assert!((viewer_player.current_position() - 123.0).abs() < 1e-6);
    assert!((host_player.current_position() - 123.0).abs() < 1e-6);

    // A viewer that wanders off is pulled back by the drift check
    viewer_player.user_seek(60.0);
    eventually("viewer to be corrected", || {
        (viewer_player.current_position() - 123.0).abs() < 1e-6
    })
    .await;

    // Chat is ordered after the playback it follows
    observer
        .send_command(Command::SendChat {
            text: "this part is great".into(),
        })
        .await
        .unwrap();
    let chat = expect_message(&mut observer, |m| matches!(m, ServerMessage::Chat { .. })).await;
    match chat {
        ServerMessage::Chat { entry } => {
            assert_eq!(entry.text, "this part is great");
            assert!(entry.sequence > play_sequence);
        }
        _ => unreachable!(),
    }

    // Viewers cannot drive playback
    observer.send_command(Command::Pause).await.unwrap();
    expect_message(&mut observer, |m| {
        matches!(m, ServerMessage::CommandRejected { command, .. } if command == "pause")
    })
    .await;

    // The host leaves; the longest-tenured participant takes over
    host_stop.send(()).unwrap();
    assert_eq!(host_task.await.unwrap().unwrap(), Exit::Left);
    let handover = expect_message(&mut observer, |m| {
        matches!(m, ServerMessage::HostChanged { .. })
    })
    .await;
    assert_eq!(handover, ServerMessage::HostChanged { host_id: viewer_id });

    // Give the new host's driver a moment to see the handover
    tokio::time::sleep(Duration::from_millis(200)).await;
    viewer_player.user_pause();
    let pause = expect_message(&mut observer, |m| {
        matches!(m, ServerMessage::Sync { point, .. } if !point.playback.is_playing)
    })
    .await;
    match pause {
        ServerMessage::Sync {
            issued_by, point, ..
        } => {
            assert_eq!(issued_by, viewer_id);
            assert!((point.playback.position_seconds - 123.0).abs() < 1e-6);
        }
        _ => unreachable!(),
    }

    // Listing reflects the smaller roster
    let sessions = Client::list_sessions(addr, SessionFilter::default(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].participant_count, 2);

    server.shutdown().await;
    assert_eq!(viewer_task.await.unwrap().unwrap(), Exit::ServerShutdown);
}

#[tokio::test]
async fn test_password_protected_session() {
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let server = start_server(&clock).await;

    let host = Client::create(
        server.addr(),
        CreateSessionRequest {
            session_id: None,
            name: "Invite only".into(),
            media_ref: MEDIA.into(),
            capacity: None,
            password: Some("correct horse".into()),
            creator: Identity::new(Uuid::new_v4(), "host"),
        },
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();

    let listed = Client::list_sessions(
        server.addr(),
        SessionFilter::default(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(listed.is_empty());

    let denied = Client::join(
        server.addr(),
        host.session_id(),
        Identity::new(Uuid::new_v4(), "guest"),
        Some("wrong".into()),
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(
        denied.join_error(),
        Some(aphrodite_core::JoinError::AuthenticationRequired)
    );

    let guest = Client::join(
        server.addr(),
        host.session_id(),
        Identity::new(Uuid::new_v4(), "guest"),
        Some("correct horse".into()),
        shared,
        ClientOptions::default(),
    )
    .await
    .unwrap();
    assert!(guest.joined().view.is_private);

    server.shutdown().await;
}

#[tokio::test]
async fn test_play_at_end_keeps_host_and_viewer_together() {
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let server = start_server(&clock).await;

    let host_client = Client::create(
        server.addr(),
        CreateSessionRequest {
            session_id: None,
            name: "Credits".into(),
            media_ref: MEDIA.into(),
            capacity: None,
            password: None,
            creator: Identity::new(Uuid::new_v4(), "host"),
        },
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();
    let session_id = host_client.session_id();
    let host_player = Arc::new(SimulatedPlayer::new(shared.clone()));
    let host = ParticipantDriver::start(
        host_client,
        host_player.clone(),
        shared.clone(),
        driver_options(),
    )
    .await
    .unwrap();
    let (_host_stop, host_stop_rx) = broadcast::channel(1);
    let host_task = tokio::spawn(host.run(host_stop_rx));

    let viewer_client = Client::join(
        server.addr(),
        session_id,
        Identity::new(Uuid::new_v4(), "viewer"),
        None,
        shared.clone(),
        ClientOptions::default(),
    )
    .await
    .unwrap();
    let viewer_player = Arc::new(SimulatedPlayer::new(shared.clone()));
    let viewer = ParticipantDriver::start(
        viewer_client,
        viewer_player.clone(),
        shared.clone(),
        driver_options(),
    )
    .await
    .unwrap();
    let (_viewer_stop, viewer_stop_rx) = broadcast::channel(1);
    let viewer_task = tokio::spawn(viewer.run(viewer_stop_rx));

    // Pressing play at the very end keeps the position where it is
    host_player.user_seek(600.0);
    host_player.user_play();
    eventually("viewer to start playing", || viewer_player.is_playing()).await;
    assert!((viewer_player.current_position() - 600.0).abs() < 1e-6);
    assert!(host_player.is_playing());
    assert!((host_player.current_position() - 600.0).abs() < 1e-6);

    server.shutdown().await;
    let _ = host_task.await;
    let _ = viewer_task.await;
}
