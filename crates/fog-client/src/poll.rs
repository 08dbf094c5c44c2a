//! Polling of a locally served configuration document.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fog_proto::LocalConfig;
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::listener::LocalConfigListener;

/// Holds the newest configuration seen so far.
#[derive(Debug, Default)]
pub struct LatestConfigStore {
    latest: RwLock<Option<LocalConfig>>,
}

impl LatestConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `config` if it is strictly newer than the stored one.
    ///
    /// Returns `true` when the store changed.
    pub fn offer(&self, config: LocalConfig) -> bool {
        let mut latest = self.latest.write();
        let newer = latest
            .as_ref()
            .is_none_or(|current| config.updated_at_millis > current.updated_at_millis);
        if newer {
            *latest = Some(config);
        }
        newer
    }

    /// The stored configuration, if any.
    #[must_use]
    pub fn latest(&self) -> Option<LocalConfig> {
        self.latest.read().clone()
    }

    /// Timestamp of the stored configuration.
    #[must_use]
    pub fn updated_at(&self) -> Option<i64> {
        self.latest.read().as_ref().map(|c| c.updated_at_millis)
    }
}

/// Fetches a configuration document over HTTP and reports newer versions.
#[derive(Debug, Clone)]
pub struct ConfigPoller {
    http: reqwest::Client,
    url: String,
    store: Arc<LatestConfigStore>,
}

impl ConfigPoller {
    /// Create a poller for `url` with its own store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            store: Arc::new(LatestConfigStore::new()),
        })
    }

    /// Share an existing store instead of the poller's own.
    #[must_use]
    pub fn with_store(mut self, store: Arc<LatestConfigStore>) -> Self {
        self.store = store;
        self
    }

    /// The store updated by this poller.
    #[must_use]
    pub const fn store(&self) -> &Arc<LatestConfigStore> {
        &self.store
    }

    /// Fetch the document once.
    ///
    /// Returns `None` on any failure, including a missing config or a
    /// non-positive timestamp.
    pub async fn fetch_latest(&self) -> Option<LocalConfig> {
        let response = match self.http.get(&self.url).header(ACCEPT, "application/json").send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.url, error = %e, "local config fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "local config fetch rejected");
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %self.url, error = %e, "failed to read local config body");
                return None;
            }
        };

        match LocalConfig::from_json(&body) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(url = %self.url, error = %e, "ignoring invalid local config");
                None
            }
        }
    }

    /// Fetch once and notify `listener` if the result is newer than the
    /// stored configuration.
    pub async fn poll_once(&self, listener: &dyn LocalConfigListener) -> bool {
        let Some(config) = self.fetch_latest().await else {
            return false;
        };

        let updated_at = config.updated_at_millis;
        let payload = config.config.clone();
        if self.store.offer(config) {
            info!(updated_at, "new local config");
            listener.on_new_local_config(&payload);
            true
        } else {
            debug!(updated_at, "local config unchanged");
            false
        }
    }

    /// Poll immediately and then every `interval` until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `interval` is zero.
    pub fn start(
        self,
        listener: Arc<dyn LocalConfigListener>,
        interval: Duration,
    ) -> Result<PollHandle, ClientError> {
        if interval.is_zero() {
            return Err(ClientError::Config(
                "local config poll interval must be greater than 0".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let token = cancel.clone();
        let guard = RunningGuard(Arc::clone(&running));
        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll_once(listener.as_ref()).await;
                    }
                }
            }
            debug!(url = %self.url, "local config polling stopped");
        });

        Ok(PollHandle {
            cancel,
            running,
            interval,
            task,
        })
    }
}

/// Clears the running flag however the polling task ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle for controlling a polling task.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    interval: Duration,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Check if the polling task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Time between polls.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop polling after the current fetch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop polling and wait for the task to exit.
    pub async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "local config poller did not finish cleanly");
        }
    }
}
