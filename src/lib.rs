//! Doorbell relay
//!
//! Polls a Ring account for new recordings and posts them to a chat channel.

pub mod bot;
pub mod chat;
pub mod config;
pub mod http;
pub mod logging;
pub mod notifier;
pub mod poller;
pub mod ring;

pub use bot::{Bot, BotError};
pub use config::Settings;
pub use notifier::Notifier;
pub use poller::{EventPoller, RecordingState};
