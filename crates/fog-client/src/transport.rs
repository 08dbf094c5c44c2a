//! Outbound connections to the fog node.
//!
//! [`TransportConnector`] opens the byte stream a WebSocket is upgraded
//! over. The network side runs on its own task; the caller learns the
//! outcome through a [`PendingConnect`], a write-once cell that can be
//! waited on with a bound.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ConnectError};

/// Stream handed to the WebSocket handshake.
pub type ChannelStream = MaybeTlsStream<TcpStream>;

/// Opens TCP (and optionally TLS) connections to an endpoint.
#[derive(Clone)]
pub struct TransportConnector {
    connect_timeout: Duration,
    tls: Option<tokio_native_tls::TlsConnector>,
}

impl std::fmt::Debug for TransportConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnector")
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl TransportConnector {
    /// Plain-TCP connector.
    #[must_use]
    pub const fn plain(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            tls: None,
        }
    }

    /// Build a connector from client configuration.
    ///
    /// Certificates are verified unless `insecure_tls` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut connector = Self::plain(config.connect_timeout());
        if config.tls {
            if config.insecure_tls {
                warn!("certificate verification disabled for fog node connections");
            }
            let native = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(config.insecure_tls)
                .danger_accept_invalid_hostnames(config.insecure_tls)
                .build()
                .map_err(|e| ConnectError::Tls(e.to_string()))?;
            connector.tls = Some(tokio_native_tls::TlsConnector::from(native));
        }
        Ok(connector)
    }

    /// Connect timeout in effect.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a connection to `endpoint`, wrapping it in TLS when the
    /// endpoint asks for it.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<ChannelStream, ConnectError> {
        let (host, port) = (endpoint.host(), endpoint.port());

        let tcp = match timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectError::Refused(format!("{host}:{port}: {e}"))),
            Err(_) => return Err(ConnectError::Timeout(self.connect_timeout)),
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        if !endpoint.tls() {
            return Ok(MaybeTlsStream::Plain(tcp));
        }

        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| ConnectError::Tls("endpoint requires TLS but none is configured".into()))?;
        match timeout(self.connect_timeout, tls.connect(host, tcp)).await {
            Ok(Ok(stream)) => Ok(MaybeTlsStream::NativeTls(stream)),
            Ok(Err(e)) => Err(ConnectError::Tls(e.to_string())),
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        }
    }
}

/// Create a linked outcome writer and waiter.
pub(crate) fn pending_connect() -> (OutcomeSender, PendingConnect) {
    let (tx, rx) = oneshot::channel();
    (OutcomeSender(Some(tx)), PendingConnect(rx))
}

/// Write side of the outcome cell. Only the first write is delivered;
/// dropping it unwritten wakes the waiter with
/// [`ConnectError::Interrupted`].
#[derive(Debug)]
pub(crate) struct OutcomeSender(Option<oneshot::Sender<Result<(), ClientError>>>);

impl OutcomeSender {
    /// Report success.
    pub(crate) fn succeed(&mut self) {
        self.set(Ok(()));
    }

    /// Report failure.
    pub(crate) fn fail(&mut self, err: ClientError) {
        self.set(Err(err));
    }

    fn set(&mut self, outcome: Result<(), ClientError>) {
        if let Some(tx) = self.0.take() {
            // waiter may already have given up
            let _ = tx.send(outcome);
        }
    }
}

/// Waiting side of the outcome cell.
#[derive(Debug)]
pub struct PendingConnect(oneshot::Receiver<Result<(), ClientError>>);

impl PendingConnect {
    /// Wait up to `limit` for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the reported failure, [`ConnectError::Timeout`] if nothing
    /// was reported in time, or [`ConnectError::Interrupted`] if the writer
    /// went away without reporting.
    pub async fn wait(self, limit: Duration) -> Result<(), ClientError> {
        match timeout(limit, self.0).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectError::Interrupted.into()),
            Err(_) => Err(ConnectError::Timeout(limit).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, false, "e");

        let connector = TransportConnector::plain(Duration::from_secs(1));
        let stream = connector.connect(&endpoint).await.unwrap();
        assert!(matches!(stream, MaybeTlsStream::Plain(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = Endpoint::new("127.0.0.1", port, false, "e");

        let connector = TransportConnector::plain(Duration::from_secs(1));
        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, ConnectError::Refused(_)));
    }

    #[tokio::test]
    async fn test_tls_endpoint_without_tls_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, true, "e");

        let connector = TransportConnector::plain(Duration::from_secs(1));
        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, ConnectError::Tls(_)));
    }

    #[tokio::test]
    async fn test_outcome_success() {
        let (mut tx, rx) = pending_connect();
        tx.succeed();
        assert!(rx.wait(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_outcome_is_write_once() {
        let (mut tx, rx) = pending_connect();
        tx.fail(ConnectError::Refused("first".into()).into());
        tx.succeed();
        let err = rx.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[tokio::test]
    async fn test_dropped_writer_interrupts_waiter() {
        let (tx, rx) = pending_connect();
        drop(tx);
        let err = rx.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect(ConnectError::Interrupted)));
    }

    #[tokio::test]
    async fn test_wait_is_bounded() {
        let (_tx, rx) = pending_connect();
        let err = rx.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect(ConnectError::Timeout(_))));
    }
}
