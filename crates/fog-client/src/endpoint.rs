//! Fog node endpoint resolution and URI construction.

use std::time::Duration;

use fog_proto::LocalApiRoute;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Host name the fog node is published under inside the container network.
pub const DEFAULT_HOST: &str = "iofog";
/// Fallback when [`DEFAULT_HOST`] does not answer.
pub const LOOPBACK_HOST: &str = "127.0.0.1";
/// Local API port.
pub const DEFAULT_PORT: u16 = 54321;
/// Element id used when neither configuration nor environment names one.
pub const DEFAULT_ELEMENT_ID: &str = "NOT_DEFINED";
/// How long the default host gets to accept a probe connection.
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(1);

/// Address and identity used for every request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    tls: bool,
    element_id: String,
}

impl Endpoint {
    /// Build an endpoint without probing. Empty values fall back to
    /// [`LOOPBACK_HOST`], [`DEFAULT_PORT`] and [`DEFAULT_ELEMENT_ID`].
    #[must_use]
    pub fn new(host: &str, port: u16, tls: bool, element_id: &str) -> Self {
        let host = if host.is_empty() { LOOPBACK_HOST } else { host };
        Self {
            host: host.to_string(),
            port: if port == 0 { DEFAULT_PORT } else { port },
            tls,
            element_id: if element_id.is_empty() {
                DEFAULT_ELEMENT_ID.to_string()
            } else {
                element_id.to_string()
            },
        }
    }

    /// Resolve an endpoint, degrading toward loopback.
    ///
    /// A missing host becomes [`DEFAULT_HOST`]; if that name does not accept
    /// a connection within [`REACHABILITY_TIMEOUT`], [`LOOPBACK_HOST`] is
    /// used instead. Never fails.
    pub async fn resolve(host: Option<&str>, port: u16, tls: bool, element_id: Option<&str>) -> Self {
        let port = if port == 0 { DEFAULT_PORT } else { port };
        let host = match host.filter(|h| !h.is_empty()) {
            Some(h) => h.to_string(),
            None if is_reachable(DEFAULT_HOST, port, REACHABILITY_TIMEOUT).await => {
                DEFAULT_HOST.to_string()
            }
            None => {
                warn!(
                    host = DEFAULT_HOST,
                    fallback = LOOPBACK_HOST,
                    "default host is not reachable, falling back to loopback"
                );
                LOOPBACK_HOST.to_string()
            }
        };

        Self::new(&host, port, tls, element_id.unwrap_or_default())
    }

    /// Resolve the endpoint described by `config`.
    pub async fn from_config(config: &ClientConfig) -> Self {
        Self::resolve(
            config.host.as_deref(),
            config.port,
            config.tls,
            config.element_id.as_deref(),
        )
        .await
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether TLS is used.
    #[must_use]
    pub const fn tls(&self) -> bool {
        self.tls
    }

    /// Element id of this container.
    #[must_use]
    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    /// Build the URI for `route`.
    ///
    /// REST routes use `http`/`https`; streaming routes use `ws`/`wss` and
    /// get the element id appended as the final path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Uri`] if host and port cannot form a URI.
    pub fn build_uri(&self, route: LocalApiRoute) -> Result<Url, ClientError> {
        let is_stream = route.is_stream();
        let scheme = match (is_stream, self.tls) {
            (false, false) => "http",
            (false, true) => "https",
            (true, false) => "ws",
            (true, true) => "wss",
        };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut raw = format!("{scheme}://{host}:{}{}", self.port, route.path());
        if is_stream {
            raw.push_str(&self.element_id);
        }

        Url::parse(&raw).map_err(|e| ClientError::Uri(format!("{raw}: {e}")))
    }
}

async fn is_reachable(host: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "reachability probe failed");
            false
        }
        Err(_) => {
            debug!(host, port, "reachability probe timed out");
            false
        }
    }
}
