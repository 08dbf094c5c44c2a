//! Locally served configuration documents.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// A configuration document with its update time.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalConfig {
    /// The configuration object.
    pub config: Map<String, Value>,
    /// When the document was last updated, milliseconds since the epoch.
    pub updated_at_millis: i64,
}

#[derive(Deserialize)]
struct RawLocalConfig {
    config: Option<Value>,
    timestamp: Option<i64>,
}

impl LocalConfig {
    /// Parse a `{"config": {..}, "timestamp": n}` document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a missing or non-object `config`, and a
    /// missing or non-positive `timestamp`.
    pub fn from_json(body: &str) -> Result<Self, ProtoError> {
        let raw: RawLocalConfig = serde_json::from_str(body)?;

        let Some(Value::Object(config)) = raw.config else {
            return Err(ProtoError::MissingField("config"));
        };
        let updated_at_millis = raw.timestamp.ok_or(ProtoError::MissingField("timestamp"))?;
        if updated_at_millis <= 0 {
            return Err(ProtoError::Validation(format!(
                "timestamp must be positive, got {updated_at_millis}"
            )));
        }

        Ok(Self {
            config,
            updated_at_millis,
        })
    }
}
