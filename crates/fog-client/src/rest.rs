//! One-shot REST exchanges with the fog node's local API.

use std::time::Duration;

use fog_proto::{
    ConfigResponse, IdRequest, LocalApiRoute, Message, MessageReceipt, MessagesResponse,
    ProtoError, QueryRequest, QueryResponse,
};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ConnectError};
use crate::listener::FogApiListener;

/// HTTP client bound to one endpoint.
///
/// Every call is a single buffered POST with a JSON body; idle connections
/// are not kept between calls.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RestClient {
    /// Build a client for `endpoint` using the timeouts and TLS settings of
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Endpoint, config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.tls && config.insecure_tls)
            .user_agent(concat!("fog-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `GET_CONFIG`: the container's current configuration object.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-200 statuses, a missing config and a
    /// non-positive timestamp.
    pub async fn get_config(&self) -> Result<Value, ClientError> {
        let response: ConfigResponse = self.post(LocalApiRoute::GetConfig, &self.id_request()).await?;
        Ok(response.into_config()?)
    }

    /// `GET_NEXT_MSG`: messages queued for this container.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-200 statuses and malformed bodies.
    pub async fn next_messages(&self) -> Result<Vec<Message>, ClientError> {
        let response: MessagesResponse = self
            .post(LocalApiRoute::GetNextMessage, &self.id_request())
            .await?;
        Ok(response.messages)
    }

    /// `POST_MSG`: publish `message`, returning the fog node's receipt.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-200 statuses and malformed bodies.
    pub async fn post_message(&self, message: &Message) -> Result<MessageReceipt, ClientError> {
        self.post(LocalApiRoute::PostMessage, message).await
    }

    /// `GET_MSGS_QUERY`: messages from `publishers` within a time frame.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-200 statuses and malformed bodies.
    pub async fn query_messages(
        &self,
        timeframe_start: i64,
        timeframe_end: i64,
        publishers: Vec<String>,
    ) -> Result<QueryResponse, ClientError> {
        let request = QueryRequest {
            id: self.endpoint.element_id().to_string(),
            timeframestart: timeframe_start,
            timeframeend: timeframe_end,
            publishers,
        };
        self.post(LocalApiRoute::GetMessagesQuery, &request).await
    }

    fn id_request(&self) -> IdRequest {
        IdRequest {
            id: self.endpoint.element_id().to_string(),
        }
    }

    async fn post<B, R>(&self, route: LocalApiRoute, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let uri = self.endpoint.build_uri(route)?;
        debug!(%uri, "local api request");

        let response = self
            .http
            .post(uri)
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.request_failed(e))?;

        if status != StatusCode::OK {
            return Err(ClientError::BadStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ProtoError::Decoding(format!("malformed {} response: {e}", route.path())).into())
    }

    fn request_failed(&self, err: reqwest::Error) -> ClientError {
        match (err.is_timeout(), err.is_connect()) {
            (true, true) => ConnectError::Timeout(self.connect_timeout).into(),
            (true, false) => ClientError::RequestTimeout(self.request_timeout),
            _ => err.into(),
        }
    }
}

/// Route a failed REST call to the listener: rejected requests go to
/// `on_bad_request`, everything else to `on_error`.
pub(crate) fn notify_failure(listener: &dyn FogApiListener, route: LocalApiRoute, err: &ClientError) {
    match err {
        ClientError::BadStatus { status, body } => {
            warn!(route = route.path(), status, "local api rejected request");
            let reason = if body.is_empty() {
                format!("status {status}")
            } else {
                format!("status {status}: {body}")
            };
            listener.on_bad_request(&reason);
        }
        other => {
            warn!(route = route.path(), error = %other, "local api request failed");
            listener.on_error(other);
        }
    }
}
