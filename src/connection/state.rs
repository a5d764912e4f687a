use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Subscribed,
    Reconnecting,
    Disconnecting,
}

impl ConnectionState {
    /// Whether the transport is open and frames can be sent
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribing | Self::Subscribed)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Disconnecting => "disconnecting",
        };
        write!(f, "{}", name)
    }
}
