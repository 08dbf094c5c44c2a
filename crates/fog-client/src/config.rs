//! Client configuration.
//!
//! Configuration for the fog node client, including:
//! - Fog node address and element identity
//! - TLS settings
//! - Reconnection backoff for the control and message streams
//! - Connect/handshake/request timeouts
//! - Optional local configuration polling

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Environment variable naming this container.
pub const SELFNAME_ENV: &str = "SELFNAME";
/// Environment variable enabling TLS when present.
pub const SSL_ENV: &str = "SSL";

/// Backoff settings shared by both streaming channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect, in milliseconds.
    pub base_delay_ms: u64,
    /// Attempt count after which the delay stops growing.
    pub attempt_limit: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            attempt_limit: 5,
        }
    }
}

/// Polling of a locally served configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalConfigSettings {
    /// URL answering `GET` with `{"config": {..}, "timestamp": n}`.
    pub url: String,
    /// Seconds between polls.
    pub poll_interval_secs: u64,
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Fog node host; empty means resolve the default name.
    pub host: Option<String>,
    /// Fog node port; 0 means the default port.
    pub port: u16,
    /// Element id of this container; falls back to `SELFNAME`.
    pub element_id: Option<String>,
    /// Use `https`/`wss`.
    pub tls: bool,
    /// Accept any server certificate. Only honoured together with `tls`.
    pub insecure_tls: bool,
    /// Stream reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// WebSocket handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Whole-request timeout for REST calls in seconds.
    pub request_timeout_secs: u64,
    /// Optional local configuration polling.
    pub local_config: Option<LocalConfigSettings>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            element_id: None,
            tls: false,
            insecure_tls: false,
            reconnect: ReconnectSettings::default(),
            connect_timeout_secs: 10,
            handshake_timeout_secs: 10,
            request_timeout_secs: 30,
            local_config: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ClientError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Overlay settings from the process environment.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay settings from `lookup`: `SELFNAME` fills a missing element
    /// id, and any `SSL` value turns TLS on.
    #[must_use]
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let configured = self.element_id.as_deref().is_some_and(|id| !id.is_empty());
        if !configured {
            if let Some(selfname) = lookup(SELFNAME_ENV).filter(|s| !s.is_empty()) {
                self.element_id = Some(selfname);
            }
        }
        if lookup(SSL_ENV).is_some() {
            self.tls = true;
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.attempt_limit == 0 {
            return Err(ClientError::Config(
                "reconnect.attempt_limit must be greater than 0".to_string(),
            ));
        }

        // 2^(limit-1) must stay representable in milliseconds
        if self.reconnect.attempt_limit > 32 {
            return Err(ClientError::Config(
                "reconnect.attempt_limit cannot exceed 32".to_string(),
            ));
        }

        for (name, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ClientError::Config(format!("{name} must be greater than 0")));
            }
        }

        if let Some(local) = &self.local_config {
            if !local.url.starts_with("http://") && !local.url.starts_with("https://") {
                return Err(ClientError::Config(
                    "local_config.url must start with http:// or https://".to_string(),
                ));
            }
            if local.poll_interval_secs == 0 {
                return Err(ClientError::Config(
                    "local_config.poll_interval_secs must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// TCP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// WebSocket handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// REST request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
