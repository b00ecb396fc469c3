//! Data models for Aphrodite

mod chat;
mod command;
mod participant;
mod playback;

pub use chat::*;
pub use command::*;
pub use participant::*;
pub use playback::*;
