//! CLI subcommands

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use aphrodite_core::{
    Command, Config, Identity, MonotonicClock, SessionArchive, SessionFilter, SharedClock,
    SqliteArchive,
};
use aphrodite_net::{
    Client, ClientOptions, CommandSender, CreateSessionRequest, DirectoryOptions, DriverOptions,
    ParticipantDriver, PlaybackAdapter, Server, ServerOptions, SessionDirectory, SessionLink,
    SimulatedPlayer,
};
use clap::Subcommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::notifier::WebhookNotifier;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the session server
    Serve {
        /// Address to listen on (overrides the config)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// List open sessions on a server
    List {
        #[arg(long, default_value = "127.0.0.1:7431")]
        server: SocketAddr,
        /// Only sessions whose name contains this text
        #[arg(long)]
        name: Option<String>,
        /// Hide full sessions
        #[arg(long)]
        joinable: bool,
    },
    /// Create a session and host it
    Host {
        #[arg(long, default_value = "127.0.0.1:7431")]
        server: SocketAddr,
        #[arg(long)]
        name: String,
        /// Video id or catalog reference
        #[arg(long)]
        media: String,
        #[arg(long)]
        capacity: Option<usize>,
        /// Makes the session private
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "host")]
        display_name: String,
    },
    /// Show sessions recorded in the local archive
    History {
        /// Show the latest snapshot of one session
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Join a session from its link
    Watch {
        /// aphrodite://<host>:<port>/<session-id>
        link: SessionLink,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "viewer")]
        display_name: String,
    },
}

pub async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Serve { bind } => serve(&config, bind).await,
        Commands::List {
            server,
            name,
            joinable,
        } => {
            let filter = SessionFilter {
                name_contains: name,
                only_joinable: joinable,
                ..SessionFilter::default()
            };
            list(&config, server, filter).await
        }
        Commands::History { session, limit } => history(&config, session, limit),
        Commands::Host {
            server,
            name,
            media,
            capacity,
            password,
            display_name,
        } => {
            let clock = MonotonicClock::shared();
            let request = CreateSessionRequest {
                session_id: None,
                name,
                media_ref: media,
                capacity,
                password,
                creator: Identity::new(Uuid::new_v4(), display_name),
            };
            let client = Client::create(
                server,
                request,
                clock.clone(),
                ClientOptions::from_config(&config),
            )
            .await
            .context("creating session")?;
            println!("Hosting {}", SessionLink::new(server, client.session_id()));
            participate(client, clock, &config).await
        }
        Commands::Watch {
            link,
            password,
            display_name,
        } => {
            let clock = MonotonicClock::shared();
            let client = Client::join(
                link.addr,
                link.session_id,
                Identity::new(Uuid::new_v4(), display_name),
                password,
                clock.clone(),
                ClientOptions::from_config(&config),
            )
            .await
            .with_context(|| format!("joining {}", link))?;
            println!("Watching \"{}\"", client.joined().view.name);
            participate(client, clock, &config).await
        }
    }
}

async fn serve(config: &Config, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let bind = bind.unwrap_or(config.server.bind);

    let archive: Option<Arc<dyn SessionArchive>> = match &config.storage.archive_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let archive: Arc<dyn SessionArchive> = Arc::new(
                SqliteArchive::open(path)
                    .with_context(|| format!("opening archive {}", path.display()))?,
            );
            info!(path = %path.display(), "Session archive enabled");
            Some(archive)
        }
        None => None,
    };

    let directory = SessionDirectory::new(
        MonotonicClock::shared(),
        Arc::new(config.media.resolver()),
        DirectoryOptions::from_config(config),
        archive,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let notifier = match &config.webhook.url {
        Some(url) => Some(
            WebhookNotifier::new(url.clone())?.spawn(directory.subscribe(), shutdown_tx.subscribe()),
        ),
        None => None,
    };

    let server = Server::start(bind, directory, ServerOptions::from_config(config))
        .await
        .with_context(|| format!("listening on {}", bind))?;
    println!("Serving watch parties on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Interrupted; shutting down");
    server.shutdown().await;
    let _ = shutdown_tx.send(());
    if let Some(task) = notifier {
        task.await?;
    }
    Ok(())
}

async fn list(config: &Config, server: SocketAddr, filter: SessionFilter) -> anyhow::Result<()> {
    let sessions = Client::list_sessions(server, filter, config.sync.join_timeout())
        .await
        .with_context(|| format!("listing sessions on {}", server))?;

    if sessions.is_empty() {
        println!("No open sessions");
    }
    for session in sessions {
        println!(
            "{}  {}  {}/{}  host: {}  media: {}{}",
            SessionLink::new(server, session.id),
            session.name,
            session.participant_count,
            session.capacity,
            session.host_name.as_deref().unwrap_or("-"),
            session.media_ref,
            if session.is_private { "  (private)" } else { "" },
        );
    }
    Ok(())
}

fn history(config: &Config, session: Option<Uuid>, limit: usize) -> anyhow::Result<()> {
    let path = config
        .storage
        .archive_path
        .as_ref()
        .context("no archive configured; set storage.archive_path")?;
    let archive = SqliteArchive::open(path)
        .with_context(|| format!("opening archive {}", path.display()))?;

    if let Some(id) = session {
        let record = archive
            .load(id)?
            .with_context(|| format!("session {} is not in the archive", id))?;
        let session = &record.session;
        let playback = session.playback();
        println!(
            "{} (epoch {}){}",
            session.name(),
            session.epoch(),
            if record.archived { ", closed" } else { "" }
        );
        println!("  media: {}", session.media().media_ref);
        println!(
            "  stopped at {:.1}s, {}",
            playback.position_seconds,
            if playback.is_playing { "playing" } else { "paused" }
        );
        println!("  updated {}", record.updated_at.to_rfc3339());
        for entry in session.chat_log() {
            println!("  [{}] {}: {}", entry.format_timestamp(), entry.author_name, entry.text);
        }
        return Ok(());
    }

    let summaries = archive.recent(limit)?;
    if summaries.is_empty() {
        println!("Archive is empty");
    }
    for summary in summaries {
        println!(
            "{}  {}  epoch {}  {} watching  host: {}  media: {}{}",
            summary.session_id,
            summary.name,
            summary.epoch,
            summary.participant_count,
            summary.host_name.as_deref().unwrap_or("-"),
            summary.media_ref,
            if summary.archived { "  (closed)" } else { "" },
        );
    }
    Ok(())
}

/// What someone typed at the session prompt
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Play,
    Pause,
    Seek(f64),
    Rate(f64),
    Chat(String),
    React(String),
    Sessions,
    Status,
    Help,
    Quit,
}

const HELP: &str = "commands: play | pause | seek <secs> | rate <x> | chat <text> | react <emoji> | sessions | status | quit";

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let number = |what: &str| {
        rest.parse::<f64>()
            .map_err(|_| format!("{} needs a number", what))
    };

    match word {
        "play" => Ok(Input::Play),
        "pause" => Ok(Input::Pause),
        "seek" => number("seek").map(Input::Seek),
        "rate" => number("rate").map(Input::Rate),
        "chat" | "say" if !rest.is_empty() => Ok(Input::Chat(rest.to_string())),
        "react" if !rest.is_empty() => Ok(Input::React(rest.to_string())),
        "sessions" => Ok(Input::Sessions),
        "status" => Ok(Input::Status),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        "" => Err(String::new()),
        other => Err(format!("unknown command '{}'; {}", other, HELP)),
    }
}

/// Drive a simulated player in the session, taking controls from stdin
async fn participate(client: Client, clock: SharedClock, config: &Config) -> anyhow::Result<()> {
    let player = Arc::new(SimulatedPlayer::new(clock.clone()));
    let driver = ParticipantDriver::start(
        client,
        player.clone(),
        clock,
        DriverOptions::from_config(&config.sync),
    )
    .await
    .context("loading media")?;
    let sender = driver.sender();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut task = tokio::spawn(driver.run(shutdown_rx));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            exit = &mut task => {
                println!("Session ended: {:?}", exit??);
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => apply_input(input, &player, &sender).await?,
                    Err(msg) if msg.is_empty() => {}
                    Err(msg) => eprintln!("{}", msg),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = shutdown_tx.send(());
    println!("Session ended: {:?}", task.await??);
    Ok(())
}

async fn apply_input(
    input: Input,
    player: &SimulatedPlayer,
    sender: &CommandSender,
) -> anyhow::Result<()> {
    match input {
        Input::Play => player.user_play(),
        Input::Pause => player.user_pause(),
        Input::Seek(position) => player.user_seek(position),
        Input::Rate(rate) => player.user_set_rate(rate),
        Input::Chat(text) => sender.send_command(Command::SendChat { text }).await?,
        Input::React(emoji) => sender.send_command(Command::SendReaction { emoji }).await?,
        Input::Sessions => sender.request_listing(SessionFilter::default()).await?,
        Input::Status => println!(
            "{:.1}s {} at {}x",
            player.current_position(),
            if player.is_playing() { "playing" } else { "paused" },
            player.current_rate()
        ),
        Input::Help => println!("{}", HELP),
        Input::Quit => {}
    }
    Ok(())
}
