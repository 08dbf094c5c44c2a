//! Per-connection protocol handling for one channel kind.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use fog_proto::{ChannelKind, Frame, ProtoError};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tracing::{debug, info};
use url::Url;

use super::reconnect::ReconnectCounter;
use crate::dispatch::{FrameDispatcher, SessionRegistry};
use crate::error::ClientError;
use crate::listener::FogApiListener;
use crate::transport::ChannelStream;

/// Upgraded stream of an open channel.
pub type ChannelSocket = WebSocketStream<ChannelStream>;

/// Handles one reconnect epoch of a channel: the upgrade, the open/close
/// bookkeeping and inbound frames.
pub(crate) struct ChannelHandler {
    kind: ChannelKind,
    element_id: String,
    dispatcher: FrameDispatcher,
    listener: Arc<dyn FogApiListener>,
    registry: Arc<SessionRegistry>,
    counter: Arc<ReconnectCounter>,
}

impl ChannelHandler {
    pub(crate) fn new(
        kind: ChannelKind,
        element_id: impl Into<String>,
        listener: Arc<dyn FogApiListener>,
        registry: Arc<SessionRegistry>,
        counter: Arc<ReconnectCounter>,
    ) -> Self {
        Self {
            kind,
            element_id: element_id.into(),
            dispatcher: FrameDispatcher::new(kind, Arc::clone(&listener)),
            listener,
            registry,
            counter,
        }
    }

    pub(crate) const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Send the WebSocket upgrade over `stream` and wait for the response.
    pub(crate) async fn handshake(
        &self,
        stream: ChannelStream,
        uri: &Url,
        limit: Duration,
    ) -> Result<ChannelSocket, ClientError> {
        debug!(kind = %self.kind, %uri, "sending upgrade request");
        match timeout(limit, tokio_tungstenite::client_async(uri.as_str(), stream)).await {
            Ok(Ok((socket, response))) => {
                debug!(kind = %self.kind, status = %response.status(), "upgrade accepted");
                Ok(socket)
            }
            Ok(Err(e)) if is_peer_close(&e) => Err(ClientError::PeerClosed(e.to_string())),
            Ok(Err(e)) => Err(ClientError::Handshake(e.to_string())),
            Err(_) => Err(ClientError::Handshake(format!(
                "no upgrade response within {limit:?}"
            ))),
        }
    }

    /// Record a completed handshake: clear the attempt counter and make the
    /// outbound queue reachable through the registry.
    pub(crate) fn opened(&self, outbound: mpsc::Sender<Frame>) {
        self.counter.reset();
        self.registry.register(self.kind, &self.element_id, outbound);
        info!(kind = %self.kind, element_id = %self.element_id, "channel open");
    }

    pub(crate) fn closed(&self, outbound: &mpsc::Sender<Frame>) {
        self.registry.unregister(self.kind, &self.element_id, outbound);
    }

    /// Decode and dispatch one inbound binary frame.
    pub(crate) fn on_frame(&self, bytes: &[u8]) -> Result<Option<Frame>, ProtoError> {
        self.dispatcher.handle(bytes)
    }

    pub(crate) fn report(&self, err: &ClientError) {
        self.listener.on_error(err);
    }
}

/// Whether a stream error means the peer went away rather than broke the
/// protocol.
pub(crate) fn is_peer_close(err: &WsError) -> bool {
    match err {
        WsError::Io(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
        ),
        other => matches!(
            other,
            WsError::ConnectionClosed
                | WsError::AlreadyClosed
                | WsError::Protocol(
                    ProtocolError::ResetWithoutClosingHandshake
                        | ProtocolError::HandshakeIncomplete
                )
        ),
    }
}
