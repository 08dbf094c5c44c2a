//! Local API routes and REST bodies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::message::Message;

/// Which of the two long-lived streams a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Command/control signals from the fog node.
    Control,
    /// Application data messages.
    Message,
}

impl ChannelKind {
    /// Both kinds, in a fixed order.
    pub const ALL: [Self; 2] = [Self::Control, Self::Message];

    /// The streaming route serving this kind.
    #[must_use]
    pub const fn route(self) -> LocalApiRoute {
        match self {
            Self::Control => LocalApiRoute::ControlWebSocket,
            Self::Message => LocalApiRoute::MessageWebSocket,
        }
    }

    /// Stable index, used for per-kind slots.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Control => 0,
            Self::Message => 1,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Message => f.write_str("message"),
        }
    }
}

/// Operations exposed by the fog node local API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalApiRoute {
    /// Fetch the container's configuration.
    GetConfig,
    /// Fetch all unread messages.
    GetNextMessage,
    /// Publish a new message.
    PostMessage,
    /// Fetch messages for a time frame and publisher set.
    GetMessagesQuery,
    /// Control channel WebSocket.
    ControlWebSocket,
    /// Message channel WebSocket.
    MessageWebSocket,
}

impl LocalApiRoute {
    /// Path component of the route. Streaming paths end with `/` so the
    /// element id can be appended as the final segment.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::GetConfig => "/v2/config/get",
            Self::GetNextMessage => "/v2/messages/next",
            Self::PostMessage => "/v2/messages/new",
            Self::GetMessagesQuery => "/v2/messages/query",
            Self::ControlWebSocket => "/v2/control/socket/id/",
            Self::MessageWebSocket => "/v2/message/socket/id/",
        }
    }

    /// Whether this route is a WebSocket stream.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::ControlWebSocket | Self::MessageWebSocket)
    }
}

impl fmt::Display for LocalApiRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Request body carrying only the element id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRequest {
    /// Element id of the requesting container.
    pub id: String,
}

/// Request body for `GET_MSGS_QUERY`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    /// Element id of the requesting container.
    pub id: String,
    /// Start of the time frame, milliseconds since the epoch.
    pub timeframestart: i64,
    /// End of the time frame, milliseconds since the epoch.
    pub timeframeend: i64,
    /// Publishers whose messages are wanted.
    pub publishers: Vec<String>,
}

/// Response to `GET_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigResponse {
    /// Status reported by the fog node.
    #[serde(default)]
    pub status: Option<String>,
    /// Configuration; either a JSON object or a string containing one.
    #[serde(default)]
    pub config: Option<Value>,
    /// Optional update timestamp.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ConfigResponse {
    /// Extract the configuration object.
    ///
    /// # Errors
    ///
    /// Fails when the config is missing, is not an object (or a string
    /// holding one), or when a carried timestamp is not positive.
    pub fn into_config(self) -> Result<Value, ProtoError> {
        if let Some(ts) = self.timestamp {
            if ts <= 0 {
                return Err(ProtoError::Validation(format!(
                    "config timestamp must be positive, got {ts}"
                )));
            }
        }

        let config = match self.config {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(&raw)?,
            Some(value) => value,
            None => return Err(ProtoError::MissingField("config")),
        };

        if config.is_object() {
            Ok(config)
        } else {
            Err(ProtoError::Validation(
                "config is not a JSON object".to_string(),
            ))
        }
    }
}

/// Response to `GET_NEXT_MSG`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    /// Status reported by the fog node.
    #[serde(default)]
    pub status: Option<String>,
    /// Number of messages reported.
    #[serde(default)]
    pub count: Option<u64>,
    /// The messages.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Response to `GET_MSGS_QUERY`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    /// Status reported by the fog node.
    #[serde(default)]
    pub status: Option<String>,
    /// Number of messages reported.
    #[serde(default)]
    pub count: Option<u64>,
    /// Effective start of the time frame.
    pub timeframestart: i64,
    /// Effective end of the time frame.
    pub timeframeend: i64,
    /// The messages.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Receipt for a published message, returned by `POST_MSG` and carried by
/// receipt frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReceipt {
    /// Fog-node-assigned message id.
    pub id: String,
    /// Fog node timestamp, milliseconds since the epoch.
    pub timestamp: i64,
}
