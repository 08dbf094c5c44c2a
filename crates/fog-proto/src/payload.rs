//! Base64 helpers for message payloads.
//!
//! The local API carries binary payloads as standard base64 strings inside
//! the message JSON.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::ProtoError;

/// Encode raw bytes as standard base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a standard base64 string.
///
/// # Errors
///
/// Returns [`ProtoError::Decoding`] if the input is not valid base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, ProtoError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| ProtoError::Decoding(format!("invalid base64 payload: {e}")))
}

/// Serde adapter serializing `Vec<u8>` as a base64 string.
pub(crate) mod serde_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_base64(&encoded).map_err(serde::de::Error::custom)
    }
}
