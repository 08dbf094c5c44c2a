//! Error types for fog-client.

use std::time::Duration;

use thiserror::Error;

/// Why a transport connection could not be established.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// Nothing is listening, or the address could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The connection did not complete in time.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The waiting caller was cancelled before an outcome was known.
    #[error("connection attempt interrupted")]
    Interrupted,

    /// TLS setup or negotiation failed.
    #[error("tls error: {0}")]
    Tls(String),
}

/// Errors that can occur in client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// WebSocket upgrade failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame or body could not be decoded.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(#[from] fog_proto::ProtoError),

    /// Host/port could not form a valid URI.
    #[error("invalid uri: {0}")]
    Uri(String),

    /// The fog node answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    BadStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A REST call got no complete response within the request timeout.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The peer closed the connection before the channel opened.
    #[error("connection closed by peer: {0}")]
    PeerClosed(String),

    /// Transport failure after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("timed out: {err}"))
        } else if err.is_connect() {
            Self::Connect(ConnectError::Refused(err.to_string()))
        } else if err.is_decode() {
            Self::Transport(format!("malformed response: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}
