//! fog-client - container-side client for the fog node local API
//!
//! Issues one-shot REST calls (config, next messages, publish, query) and
//! keeps two long-lived WebSocket streams open, control and message, that
//! reconnect with exponential backoff whenever they fail or are closed by
//! the fog node.

#![forbid(unsafe_code)]

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod poll;
pub mod rest;
pub mod transport;

pub use channel::{ChannelExit, ChannelState, ReconnectPolicy};
pub use client::{ChannelStats, FogClient};
pub use config::ClientConfig;
pub use dispatch::{SendStatus, SessionRegistry};
pub use endpoint::Endpoint;
pub use error::{ClientError, ConnectError};
pub use listener::{FogApiListener, LocalConfigListener};
pub use poll::{ConfigPoller, LatestConfigStore, PollHandle};
pub use rest::RestClient;
pub use transport::{PendingConnect, TransportConnector};

pub use fog_proto::{ChannelKind, Message};
