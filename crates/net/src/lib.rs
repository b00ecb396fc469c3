//! Aphrodite Network Library
//!
//! Coordinates watch-party sessions over TCP.
//!
//! # Architecture
//!
//! - **Directory**: owns every open session; one lock per session serializes commands
//! - **Server**: accepts connections and hands them to the directory
//! - **Client**: a participant's connection to a server
//! - **Participant driver**: keeps a local player in step with its session
//! - **Protocol**: length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let directory = SessionDirectory::new(clock.clone(), resolver, DirectoryOptions::default(), None);
//! let server = Server::start(bind, directory, ServerOptions::default()).await?;
//!
//! let client = Client::join(addr, session_id, identity, None, clock.clone(), ClientOptions::default()).await?;
//! let driver = ParticipantDriver::start(client, player, clock, DriverOptions::default()).await?;
//! let exit = driver.run(shutdown_rx).await?;
//! ```

mod archive_writer;
pub mod client;
pub mod directory;
pub mod error;
mod frame;
pub mod link;
pub mod participant;
pub mod player;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientOptions, CommandSender, Inbound, JoinedSession};
pub use directory::{
    DirectoryEvent, DirectoryOptions, LeaveReason, Membership, SessionDirectory, SessionHandle,
};
pub use error::{Error, Result};
pub use link::SessionLink;
pub use participant::{DriverOptions, Exit, ParticipantDriver};
pub use player::{
    call_with_retry, Ack, EventHub, PlaybackAdapter, PlaybackError, PlayerEvent, Ready,
    RetryPolicy, SimulatedPlayer, Subscription,
};
pub use protocol::{ClientMessage, CreateSessionRequest, RejectReason, ServerMessage};
pub use server::{Server, ServerOptions};

pub use aphrodite_core::config::DEFAULT_PORT;
