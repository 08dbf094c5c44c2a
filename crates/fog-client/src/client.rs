//! The local API client.
//!
//! [`FogClient`] issues one-shot REST calls and keeps the control and
//! message streams alive. Each stream kind owns a slot with its own attempt
//! counter, runner and pending retry, so the two reconnect independently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fog_proto::{ChannelKind, Frame, LocalApiRoute, LocalConfig, Message};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::channel::handler::ChannelHandler;
use crate::channel::reconnect::{ReconnectCounter, ReconnectPolicy};
use crate::channel::runner::{ChannelRunner, CloseHook, RunnerContext};
use crate::channel::state::{AtomicChannelState, ChannelState};
use crate::config::{ClientConfig, LocalConfigSettings};
use crate::dispatch::{SendStatus, SessionRegistry};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::listener::{FogApiListener, LocalConfigListener};
use crate::poll::{ConfigPoller, LatestConfigStore, PollHandle};
use crate::rest::{RestClient, notify_failure};
use crate::transport::TransportConnector;

/// Point-in-time view of one stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Which stream.
    pub kind: ChannelKind,
    /// State of the most recent channel instance.
    pub state: ChannelState,
    /// Reconnect attempts since the channel was last open.
    pub attempts: u32,
    /// Reconnects scheduled over the client's lifetime.
    pub reconnects_scheduled: u64,
}

/// Client for the fog node local API. Cheap to clone; clones share the
/// same streams.
#[derive(Clone)]
pub struct FogClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: Endpoint,
    rest: RestClient,
    connector: TransportConnector,
    handshake_timeout: Duration,
    request_timeout: Duration,
    policy: ReconnectPolicy,
    registry: Arc<SessionRegistry>,
    slots: [ChannelSlot; 2],
    local_config: Option<LocalConfigSettings>,
    config_store: Arc<LatestConfigStore>,
}

struct ChannelSlot {
    counter: Arc<ReconnectCounter>,
    inner: Mutex<SlotInner>,
}

struct SlotInner {
    listener: Option<Arc<dyn FogApiListener>>,
    runner: Option<ChannelRunner>,
    retry: Option<JoinHandle<()>>,
    state: Arc<AtomicChannelState>,
    // bumped whenever the slot's runner is replaced or abandoned
    epoch: u64,
    stopped: bool,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            counter: Arc::new(ReconnectCounter::new()),
            inner: Mutex::new(SlotInner {
                listener: None,
                runner: None,
                retry: None,
                state: Arc::new(AtomicChannelState::new(ChannelState::Idle)),
                epoch: 0,
                stopped: false,
            }),
        }
    }
}

impl ClientInner {
    fn slot(&self, kind: ChannelKind) -> &ChannelSlot {
        &self.slots[kind.index()]
    }
}

impl fmt::Debug for FogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FogClient")
            .field("endpoint", &self.inner.endpoint)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl FogClient {
    /// Validate `config`, resolve the fog node address and build a client.
    ///
    /// `SELFNAME` and `SSL` from the process environment fill in what the
    /// configuration leaves unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP/TLS
    /// clients cannot be built.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        Self::connect_with_env(config, |key| std::env::var(key).ok()).await
    }

    /// [`connect`](Self::connect) with environment values taken from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP/TLS
    /// clients cannot be built.
    pub async fn connect_with_env(
        config: ClientConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientError> {
        let config = config.apply_env_from(lookup);
        config.validate()?;
        let endpoint = Endpoint::from_config(&config).await;
        info!(
            host = endpoint.host(),
            port = endpoint.port(),
            tls = endpoint.tls(),
            element_id = endpoint.element_id(),
            "fog node endpoint resolved"
        );
        Self::new(endpoint, &config)
    }

    /// Build a client for an already resolved endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP/TLS clients cannot be built.
    pub fn new(endpoint: Endpoint, config: &ClientConfig) -> Result<Self, ClientError> {
        let rest = RestClient::new(endpoint.clone(), config)?;
        let connector = TransportConnector::from_config(config)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                rest,
                connector,
                handshake_timeout: config.handshake_timeout(),
                request_timeout: config.request_timeout(),
                policy: ReconnectPolicy::from(&config.reconnect),
                registry: Arc::new(SessionRegistry::new()),
                slots: [ChannelSlot::new(), ChannelSlot::new()],
                local_config: config.local_config.clone(),
                config_store: Arc::new(LatestConfigStore::new()),
            }),
        })
    }

    /// Endpoint every request goes to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Element id stamped on requests and published messages.
    #[must_use]
    pub fn element_id(&self) -> &str {
        self.inner.endpoint.element_id()
    }

    /// Reconnection policy shared by both streams.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Fetch the container configuration; delivers `on_new_config`.
    pub fn fetch_config(&self, listener: Arc<dyn FogApiListener>) -> JoinHandle<()> {
        let rest = self.inner.rest.clone();
        tokio::spawn(async move {
            match rest.get_config().await {
                Ok(config) => listener.on_new_config(config),
                Err(e) => notify_failure(listener.as_ref(), LocalApiRoute::GetConfig, &e),
            }
        })
    }

    /// Fetch queued messages; delivers `on_messages`.
    pub fn fetch_next_message(&self, listener: Arc<dyn FogApiListener>) -> JoinHandle<()> {
        let rest = self.inner.rest.clone();
        tokio::spawn(async move {
            match rest.next_messages().await {
                Ok(messages) => listener.on_messages(messages),
                Err(e) => notify_failure(listener.as_ref(), LocalApiRoute::GetNextMessage, &e),
            }
        })
    }

    /// Publish `message` over REST; delivers `on_message_receipt`.
    pub fn push_message(&self, mut message: Message, listener: Arc<dyn FogApiListener>) -> JoinHandle<()> {
        message.stamp_publisher(self.element_id());
        let rest = self.inner.rest.clone();
        tokio::spawn(async move {
            match rest.post_message(&message).await {
                Ok(receipt) => listener.on_message_receipt(&receipt.id, receipt.timestamp),
                Err(e) => notify_failure(listener.as_ref(), LocalApiRoute::PostMessage, &e),
            }
        })
    }

    /// Query messages from `publishers` within a time frame; delivers
    /// `on_messages_query`.
    pub fn fetch_messages_by_query(
        &self,
        timeframe_start: i64,
        timeframe_end: i64,
        publishers: Vec<String>,
        listener: Arc<dyn FogApiListener>,
    ) -> JoinHandle<()> {
        let rest = self.inner.rest.clone();
        tokio::spawn(async move {
            match rest
                .query_messages(timeframe_start, timeframe_end, publishers)
                .await
            {
                Ok(response) => listener.on_messages_query(
                    response.timeframestart,
                    response.timeframeend,
                    response.messages,
                ),
                Err(e) => notify_failure(listener.as_ref(), LocalApiRoute::GetMessagesQuery, &e),
            }
        })
    }

    /// Open the control stream and keep it open.
    pub async fn open_control_channel(&self, listener: Arc<dyn FogApiListener>) {
        self.open_channel(ChannelKind::Control, listener).await;
    }

    /// Open the message stream and keep it open.
    pub async fn open_message_channel(&self, listener: Arc<dyn FogApiListener>) {
        self.open_channel(ChannelKind::Message, listener).await;
    }

    /// Open the stream of `kind` and keep it open.
    ///
    /// Returns once the first attempt has opened or failed; a failed
    /// attempt leaves a reconnect scheduled. Does nothing while the stream
    /// is already running or waiting to retry.
    pub async fn open_channel(&self, kind: ChannelKind, listener: Arc<dyn FogApiListener>) {
        {
            let mut slot = self.inner.slot(kind).inner.lock();
            slot.listener = Some(listener);
            slot.stopped = false;

            let retry_pending = slot.retry.as_ref().is_some_and(|t| !t.is_finished());
            let running = slot.runner.as_ref().is_some_and(ChannelRunner::is_live);
            if retry_pending || running {
                debug!(%kind, "channel already active");
                return;
            }
        }
        start_channel(&self.inner, kind).await;
    }

    /// Publish `message` over the open message stream.
    pub fn send_message(&self, mut message: Message) -> SendStatus {
        message.stamp_publisher(self.element_id());
        self.inner
            .registry
            .send(ChannelKind::Message, self.element_id(), Frame::Message(message))
    }

    /// Whether the stream of `kind` is currently open.
    #[must_use]
    pub fn is_channel_open(&self, kind: ChannelKind) -> bool {
        self.inner.registry.is_open(kind, self.element_id())
    }

    /// Counters and state for the stream of `kind`.
    #[must_use]
    pub fn channel_stats(&self, kind: ChannelKind) -> ChannelStats {
        let slot = self.inner.slot(kind);
        let state = slot.inner.lock().state.load();
        ChannelStats {
            kind,
            state,
            attempts: slot.counter.attempts(),
            reconnects_scheduled: slot.counter.scheduled(),
        }
    }

    /// Close the stream of `kind` and cancel any pending retry. The
    /// attempt counter is kept; a later open starts from it.
    pub async fn terminate_channel(&self, kind: ChannelKind) {
        let (runner, retry) = {
            let mut slot = self.inner.slot(kind).inner.lock();
            slot.stopped = true;
            slot.epoch += 1;
            (slot.runner.take(), slot.retry.take())
        };

        if let Some(retry) = retry {
            retry.abort();
        }
        if let Some(runner) = runner {
            let exit = runner.terminate().await;
            info!(%kind, %exit, "channel terminated");
        }
    }

    /// Terminate both streams.
    pub async fn shutdown(&self) {
        tokio::join!(
            self.terminate_channel(ChannelKind::Control),
            self.terminate_channel(ChannelKind::Message),
        );
        info!("fog client shut down");
    }

    /// Poll the configured local config URL, reporting strictly newer
    /// documents to `listener`. Without an `interval` the configured
    /// `poll_interval_secs` is used.
    ///
    /// # Errors
    ///
    /// Returns an error if no `local_config` section is configured or the
    /// interval is zero.
    pub fn fetch_local_config(
        &self,
        listener: Arc<dyn LocalConfigListener>,
        interval: Option<Duration>,
    ) -> Result<PollHandle, ClientError> {
        let settings = self
            .inner
            .local_config
            .as_ref()
            .ok_or_else(|| ClientError::Config("local_config is not configured".to_string()))?;
        let interval = interval.unwrap_or(Duration::from_secs(settings.poll_interval_secs));

        let poller = ConfigPoller::new(settings.url.clone(), self.inner.request_timeout)?
            .with_store(Arc::clone(&self.inner.config_store));
        let handle = poller.start(listener, interval)?;
        info!(url = %settings.url, interval_ms = interval.as_millis(), "polling local config");
        Ok(handle)
    }

    /// Newest local config seen by [`fetch_local_config`](Self::fetch_local_config).
    #[must_use]
    pub fn latest_local_config(&self) -> Option<LocalConfig> {
        self.inner.config_store.latest()
    }
}

/// Start one channel instance of `kind` and wait for it to open. On
/// failure a reconnect is scheduled.
fn start_channel(inner: &Arc<ClientInner>, kind: ChannelKind) -> BoxFuture<'static, ()> {
    let inner = Arc::clone(inner);
    async move {
        let Some((epoch, pending)) = spawn_runner(&inner, kind) else {
            return;
        };

        let limit = inner.connector.connect_timeout() + inner.handshake_timeout;
        match pending.wait(limit).await {
            Ok(()) => debug!(%kind, epoch, "channel opened"),
            Err(e) => {
                warn!(%kind, error = %e, "channel failed to open");
                reconnect(&inner, kind, epoch);
            }
        }
    }
    .boxed()
}

fn spawn_runner(
    inner: &Arc<ClientInner>,
    kind: ChannelKind,
) -> Option<(u64, crate::transport::PendingConnect)> {
    let slot = inner.slot(kind);
    let mut guard = slot.inner.lock();

    if guard.stopped {
        debug!(%kind, "channel terminated, not starting");
        return None;
    }
    if guard.runner.as_ref().is_some_and(ChannelRunner::is_live) {
        debug!(%kind, "channel already running");
        return None;
    }
    let listener = guard.listener.clone()?;
    let uri = match inner.endpoint.build_uri(kind.route()) {
        Ok(uri) => uri,
        Err(e) => {
            error!(%kind, error = %e, "cannot build stream uri");
            return None;
        }
    };

    guard.epoch += 1;
    let epoch = guard.epoch;

    let weak = Arc::downgrade(inner);
    let on_close: CloseHook = Box::new(move |exit| {
        if let Some(inner) = weak.upgrade() {
            info!(%kind, %exit, "channel closed, reconnecting");
            reconnect(&inner, kind, epoch);
        }
    });

    let state = Arc::new(AtomicChannelState::new(ChannelState::Idle));
    let ctx = RunnerContext {
        endpoint: inner.endpoint.clone(),
        uri,
        connector: inner.connector.clone(),
        handshake_timeout: inner.handshake_timeout,
        handler: ChannelHandler::new(
            kind,
            inner.endpoint.element_id(),
            listener,
            Arc::clone(&inner.registry),
            Arc::clone(&slot.counter),
        ),
        state: Arc::clone(&state),
        on_close,
    };

    let (runner, pending) = ChannelRunner::spawn(ctx);
    guard.runner = Some(runner);
    guard.state = state;
    Some((epoch, pending))
}

/// Replace the runner of `kind` with a delayed fresh attempt.
///
/// Requests from an epoch that has already been replaced or terminated are
/// ignored, so each epoch schedules at most one retry.
fn reconnect(inner: &Arc<ClientInner>, kind: ChannelKind, epoch: u64) {
    let slot = inner.slot(kind);
    let mut guard = slot.inner.lock();

    if guard.stopped {
        debug!(%kind, "channel terminated, not reconnecting");
        return;
    }
    if guard.epoch != epoch {
        debug!(%kind, epoch, current = guard.epoch, "ignoring stale reconnect");
        return;
    }
    guard.epoch += 1;

    let previous = guard.runner.take();
    let attempts = slot.counter.record_reschedule();
    let delay = inner.policy.delay_for_attempts(attempts);
    info!(
        %kind,
        attempt = attempts + 1,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "scheduling reconnect"
    );

    let weak = Arc::downgrade(inner);
    guard.retry = Some(tokio::spawn(async move {
        if let Some(runner) = previous {
            runner.terminate().await;
        }
        sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            start_channel(&inner, kind).await;
        }
    }));
}
