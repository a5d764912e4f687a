//! Realtime connection to the broadcasting backend

mod backoff;
mod manager;
mod state;

pub use backoff::ReconnectPolicy;
pub use manager::{
    ConnectionManager, ConnectionSettings, Connector, TungsteniteConnector, WsStream,
    DEFAULT_ACTIVITY_TIMEOUT,
};
pub use state::ConnectionState;
