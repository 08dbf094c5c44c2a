//! # fog-proto
//!
//! Wire definitions for the fog node local API: the message shape, REST
//! request/response bodies, streaming frame codec and route table.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod error;
pub mod frame;
pub mod local_config;
pub mod message;
pub mod payload;

pub use api::{
    ChannelKind, ConfigResponse, IdRequest, LocalApiRoute, MessageReceipt, MessagesResponse,
    QueryRequest, QueryResponse,
};
pub use error::ProtoError;
pub use frame::Frame;
pub use local_config::LocalConfig;
pub use message::Message;
