pub mod backend;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod game;
pub mod handlers;
pub mod message_log;
pub mod poll;
pub mod queued;
pub mod wire;

#[cfg(test)]
mod tests;

// Re-export core components
pub use crate::bridge::{Bridge, BridgeDeps};
pub use crate::config::Config;
pub use crate::connection::{ConnectionManager, ConnectionState};
pub use crate::dispatch::{HandlerRegistry, MessageHandler};
pub use crate::error::{PollcastError, PollcastResult};
pub use crate::events::{PollEvent, PollEventBus};
pub use crate::message_log::MessageLog;
pub use crate::poll::{Poll, PollManager, PollOption};
pub use crate::queued::QueuedPollPipeline;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
