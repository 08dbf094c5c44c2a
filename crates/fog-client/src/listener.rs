//! Callbacks through which results and pushed data reach the application.

use fog_proto::Message;
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Receives REST results and stream deliveries.
///
/// Callbacks run on the client's tasks and must not block. Every method
/// has an empty default so implementors pick what they need.
pub trait FogApiListener: Send + Sync {
    /// Messages delivered by `fetch_next_message` or the message stream.
    fn on_messages(&self, messages: Vec<Message>) {
        let _ = messages;
    }

    /// Result of `fetch_messages_by_query`.
    fn on_messages_query(&self, timeframe_start: i64, timeframe_end: i64, messages: Vec<Message>) {
        let _ = (timeframe_start, timeframe_end, messages);
    }

    /// A published message was accepted by the fog node.
    fn on_message_receipt(&self, message_id: &str, timestamp: i64) {
        let _ = (message_id, timestamp);
    }

    /// Result of `fetch_config`.
    fn on_new_config(&self, config: Value) {
        let _ = config;
    }

    /// The control stream announced new configuration.
    fn on_new_config_signal(&self) {}

    /// The fog node rejected a REST request.
    fn on_bad_request(&self, reason: &str) {
        let _ = reason;
    }

    /// A REST call failed, or a stream hit a protocol error.
    fn on_error(&self, error: &ClientError) {
        let _ = error;
    }
}

/// Receives strictly newer local configuration documents.
pub trait LocalConfigListener: Send + Sync {
    /// Called once per newer document.
    fn on_new_local_config(&self, config: &Map<String, Value>);
}
