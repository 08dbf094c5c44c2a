//! The message shape exchanged with the fog node.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::payload::serde_base64;

/// A data message published by or delivered to a container.
///
/// Outbound messages are built by the caller; the client stamps
/// `publisher` with its own element id before transmission, overwriting
/// whatever the caller put there. Inbound messages additionally carry the
/// fog-node-assigned `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Fog-node-assigned identifier; absent on messages not yet published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Element id of the publishing container.
    #[serde(default)]
    pub publisher: String,
    /// Opaque payload, base64 on the wire.
    #[serde(rename = "contentdata", with = "serde_base64", default)]
    pub payload: Vec<u8>,
    /// Free-form string attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a message carrying `payload`, timestamped now.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            publisher: String::new(),
            payload: payload.into(),
            attributes: BTreeMap::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp = timestamp_millis;
        self
    }

    /// Set the publisher, replacing any previous value.
    pub fn stamp_publisher(&mut self, element_id: &str) {
        element_id.clone_into(&mut self.publisher);
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Serialize to a JSON value, as used for REST bodies.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value, ProtoError> {
        serde_json::to_value(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Parse from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
