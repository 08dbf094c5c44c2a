//! Stream channel integration tests.
//!
//! Runs the client against a mock fog node that speaks the local API
//! WebSocket routes and frame format.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fog_client::config::ReconnectSettings;
use fog_client::{
    ChannelKind, ChannelState, ClientConfig, ClientError, FogApiListener, FogClient, Message,
    SendStatus,
};
use fog_proto::Frame;
use fog_proto::frame::{OPCODE_ACK, OPCODE_CONTROL_SIGNAL};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

const ELEMENT_ID: &str = "elem-1";

// ============================================================================
// Test Helpers - Mock Fog Node
// ============================================================================

/// A mock fog node accepting stream upgrades.
struct MockFogNode {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockFogNode {
    async fn new() -> Result<Self, std::io::Error> {
        Self::bind(0).await
    }

    async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Accept one upgrade, returning the stream and the requested path.
    async fn accept(&self) -> (WebSocketStream<TcpStream>, String) {
        let (tcp, _) = self.listener.accept().await.expect("accept failed");
        let mut path = String::new();
        let ws = accept_hdr_async(tcp, |req: &Request, resp: Response| {
            path = req.uri().path().to_string();
            Ok(resp)
        })
        .await
        .expect("upgrade failed");
        (ws, path)
    }

    /// Accept upgrades forever, rejecting the control route and handing
    /// message streams to `sessions`.
    fn serve_message_only(self, sessions: mpsc::UnboundedSender<WebSocketStream<TcpStream>>) {
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = self.listener.accept().await else {
                    return;
                };
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    if req.uri().path().starts_with("/v2/control/") {
                        let mut reject = http::Response::new(Some("control disabled".to_string()));
                        *reject.status_mut() = http::StatusCode::NOT_FOUND;
                        Err(reject)
                    } else {
                        Ok(resp)
                    }
                };
                if let Ok(ws) = accept_hdr_async(tcp, callback).await {
                    let _ = sessions.send(ws);
                }
            }
        });
    }
}

// ============================================================================
// Test Helpers - Client
// ============================================================================

#[derive(Default)]
struct Recorder {
    signals: Mutex<u32>,
    messages: Mutex<Vec<Message>>,
    receipts: Mutex<Vec<(String, i64)>>,
    errors: Mutex<Vec<String>>,
}

impl FogApiListener for Recorder {
    fn on_messages(&self, messages: Vec<Message>) {
        self.messages.lock().extend(messages);
    }

    fn on_message_receipt(&self, message_id: &str, timestamp: i64) {
        self.receipts.lock().push((message_id.to_string(), timestamp));
    }

    fn on_new_config_signal(&self) {
        *self.signals.lock() += 1;
    }

    fn on_error(&self, error: &ClientError) {
        self.errors.lock().push(error.to_string());
    }
}

fn test_config(port: u16) -> ClientConfig {
    ClientConfig {
        host: Some("127.0.0.1".to_string()),
        port,
        element_id: Some(ELEMENT_ID.to_string()),
        reconnect: ReconnectSettings {
            base_delay_ms: 50,
            attempt_limit: 3,
        },
        connect_timeout_secs: 1,
        handshake_timeout_secs: 1,
        ..ClientConfig::default()
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_binary(ws: &mut WebSocketStream<TcpStream>) -> Vec<u8> {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if let WsMessage::Binary(bytes) = msg {
            return bytes.to_vec();
        }
    }
}

// ============================================================================
// Open / Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_open_uses_element_route_and_resets_counter() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();

    let (accepted, ()) = tokio::join!(
        node.accept(),
        client.open_message_channel(Arc::new(Recorder::default()))
    );
    let (_ws, path) = accepted;

    assert_eq!(path, "/v2/message/socket/id/elem-1");
    assert!(client.is_channel_open(ChannelKind::Message));

    let stats = client.channel_stats(ChannelKind::Message);
    assert_eq!(stats.state, ChannelState::Open);
    assert_eq!(stats.attempts, 0);
    assert_eq!(stats.reconnects_scheduled, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_open_is_idempotent_while_live() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let listener = Arc::new(Recorder::default());

    let (accepted, ()) = tokio::join!(node.accept(), client.open_control_channel(listener.clone()));
    let (_ws, path) = accepted;
    assert_eq!(path, "/v2/control/socket/id/elem-1");

    client.open_control_channel(listener).await;
    let second = timeout(Duration::from_millis(300), node.listener.accept()).await;
    assert!(second.is_err(), "second open must not connect again");

    client.shutdown().await;
}

// ============================================================================
// Frame Flow Tests
// ============================================================================

#[tokio::test]
async fn test_control_signal_is_reported_and_acked() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let listener = Arc::new(Recorder::default());

    let (accepted, ()) = tokio::join!(node.accept(), client.open_control_channel(listener.clone()));
    let (mut ws, _) = accepted;

    ws.send(WsMessage::Binary(vec![OPCODE_CONTROL_SIGNAL].into()))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws).await, vec![OPCODE_ACK]);
    assert_eq!(*listener.signals.lock(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_message_delivery_receipt_and_send() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let listener = Arc::new(Recorder::default());

    let (accepted, ()) = tokio::join!(node.accept(), client.open_message_channel(listener.clone()));
    let (mut ws, _) = accepted;

    // inbound message is delivered and acknowledged
    let inbound = Message::new(b"21.5".to_vec())
        .with_attribute("unit", "celsius")
        .with_timestamp(1_700_000_000_000);
    let wire = Frame::Message(inbound).encode().unwrap();
    ws.send(WsMessage::Binary(wire.into())).await.unwrap();
    assert_eq!(next_binary(&mut ws).await, vec![OPCODE_ACK]);
    {
        let messages = listener.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"21.5");
        assert_eq!(messages[0].attributes.get("unit").map(String::as_str), Some("celsius"));
    }

    // outbound message carries this element as publisher
    let status = client.send_message(Message::new(b"hello".to_vec()));
    assert_eq!(status, SendStatus::Sent);
    match Frame::decode(&next_binary(&mut ws).await).unwrap() {
        Frame::Message(sent) => {
            assert_eq!(sent.publisher, ELEMENT_ID);
            assert_eq!(sent.payload, b"hello");
        }
        other => panic!("expected message frame, got {other:?}"),
    }

    // receipts reach the listener without a reply
    let receipt = Frame::Receipt(fog_proto::MessageReceipt {
        id: "msg-42".to_string(),
        timestamp: 1_700_000_000_500,
    });
    ws.send(WsMessage::Binary(receipt.encode().unwrap().into()))
        .await
        .unwrap();
    wait_until("receipt", || !listener.receipts.lock().is_empty()).await;
    assert_eq!(
        listener.receipts.lock()[0],
        ("msg-42".to_string(), 1_700_000_000_500)
    );

    client.shutdown().await;
}

#[tokio::test]
async fn test_send_without_open_channel_is_not_connected() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();

    assert_eq!(
        client.send_message(Message::new(b"dropped".to_vec())),
        SendStatus::NotConnected
    );
}

// ============================================================================
// Reconnection Tests
// ============================================================================

#[tokio::test]
async fn test_peer_close_reconnects_exactly_once() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();

    let (accepted, ()) = tokio::join!(
        node.accept(),
        client.open_message_channel(Arc::new(Recorder::default()))
    );
    let (mut ws, _) = accepted;
    ws.close(None).await.unwrap();

    let (_ws, path) = timeout(Duration::from_secs(5), node.accept())
        .await
        .expect("no reconnect");
    assert_eq!(path, "/v2/message/socket/id/elem-1");

    wait_until("reopen", || client.is_channel_open(ChannelKind::Message)).await;
    let stats = client.channel_stats(ChannelKind::Message);
    assert_eq!(stats.reconnects_scheduled, 1);
    assert_eq!(stats.attempts, 0);

    let third = timeout(Duration::from_millis(300), node.listener.accept()).await;
    assert!(third.is_err(), "only one reconnect per close");

    client.shutdown().await;
}

#[tokio::test]
async fn test_decode_error_reports_and_reconnects() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let listener = Arc::new(Recorder::default());

    let (accepted, ()) = tokio::join!(node.accept(), client.open_message_channel(listener.clone()));
    let (mut ws, _) = accepted;

    ws.send(WsMessage::Binary(vec![0x7F, 0x00].into())).await.unwrap();

    let (_ws, _) = timeout(Duration::from_secs(5), node.accept())
        .await
        .expect("no reconnect after decode error");
    assert_eq!(listener.errors.lock().len(), 1);
    assert!(listener.errors.lock()[0].contains("protocol decode error"));

    wait_until("reopen", || client.is_channel_open(ChannelKind::Message)).await;
    assert_eq!(client.channel_stats(ChannelKind::Message).reconnects_scheduled, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_stream_protocol_violation_reports_and_reconnects() {
    use tokio::io::AsyncWriteExt;

    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let listener = Arc::new(Recorder::default());

    let (accepted, ()) = tokio::join!(node.accept(), client.open_message_channel(listener.clone()));
    let (mut ws, _) = accepted;

    // unmasked frame with reserved data opcode 0x3
    ws.get_mut().write_all(&[0x83, 0x00]).await.unwrap();

    let (_ws, _) = timeout(Duration::from_secs(5), node.accept())
        .await
        .expect("no reconnect after protocol violation");
    assert_eq!(listener.errors.lock().len(), 1);
    assert!(listener.errors.lock()[0].contains("stream protocol error"));

    wait_until("reopen", || client.is_channel_open(ChannelKind::Message)).await;
    assert_eq!(client.channel_stats(ChannelKind::Message).reconnects_scheduled, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_terminate_schedules_no_reconnect() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();

    let (accepted, ()) = tokio::join!(
        node.accept(),
        client.open_control_channel(Arc::new(Recorder::default()))
    );
    let (mut ws, _) = accepted;

    client.terminate_channel(ChannelKind::Control).await;
    assert!(!client.is_channel_open(ChannelKind::Control));
    assert_eq!(client.channel_stats(ChannelKind::Control).state, ChannelState::Closed);

    // the fog node sees the connection go away
    let ended = timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    let retry = timeout(Duration::from_millis(400), node.listener.accept()).await;
    assert!(retry.is_err(), "terminate must not reconnect");
    assert_eq!(client.channel_stats(ChannelKind::Control).reconnects_scheduled, 0);
}

#[tokio::test]
async fn test_failures_grow_counter_until_cap() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let client = FogClient::connect(test_config(port)).await.unwrap();
    client
        .open_control_channel(Arc::new(Recorder::default()))
        .await;

    // 50 + 100 + 200 + 200 ms of backoff
    wait_until("four reconnects", || {
        client.channel_stats(ChannelKind::Control).reconnects_scheduled >= 4
    })
    .await;
    let stats = client.channel_stats(ChannelKind::Control);
    assert!(stats.attempts >= 4);
    assert_eq!(client.reconnect_policy().max_delay(), Duration::from_millis(200));

    // the other kind is untouched
    assert_eq!(client.channel_stats(ChannelKind::Message).attempts, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_node_coming_up_after_capped_failures_resets_counter() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let client = FogClient::connect(test_config(port)).await.unwrap();
    client
        .open_control_channel(Arc::new(Recorder::default()))
        .await;

    // attempt limit is 3; go past it
    wait_until("capped failures", || {
        client.channel_stats(ChannelKind::Control).attempts >= 4
    })
    .await;

    let node = MockFogNode::bind(port).await.expect("port no longer free");
    let (_ws, path) = timeout(Duration::from_secs(5), node.accept())
        .await
        .expect("no reconnect once the node is up");
    assert_eq!(path, "/v2/control/socket/id/elem-1");

    wait_until("open", || client.is_channel_open(ChannelKind::Control)).await;
    let stats = client.channel_stats(ChannelKind::Control);
    assert_eq!(stats.state, ChannelState::Open);
    assert_eq!(stats.attempts, 0);
    assert!(stats.reconnects_scheduled >= 4);

    client.shutdown().await;
}

#[tokio::test]
async fn test_control_failures_leave_message_channel_open() {
    let node = MockFogNode::new().await.expect("failed to create mock node");
    let client = FogClient::connect(test_config(node.port())).await.unwrap();
    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    node.serve_message_only(sessions_tx);

    let listener = Arc::new(Recorder::default());
    client.open_message_channel(listener.clone()).await;
    client.open_control_channel(listener).await;
    let _message_ws = timeout(Duration::from_secs(5), sessions.recv())
        .await
        .expect("no message session")
        .expect("server stopped");

    wait_until("control retries", || {
        client.channel_stats(ChannelKind::Control).attempts >= 2
    })
    .await;

    assert!(client.is_channel_open(ChannelKind::Message));
    let message = client.channel_stats(ChannelKind::Message);
    assert_eq!(message.state, ChannelState::Open);
    assert_eq!(message.attempts, 0);
    assert_eq!(message.reconnects_scheduled, 0);
    assert_ne!(client.channel_stats(ChannelKind::Control).state, ChannelState::Open);

    client.shutdown().await;
}

#[tokio::test]
async fn test_reopen_after_terminate_keeps_counter() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let client = FogClient::connect(test_config(port)).await.unwrap();
    let listener = Arc::new(Recorder::default());

    client.open_message_channel(listener.clone()).await;
    client.terminate_channel(ChannelKind::Message).await;
    let before = client.channel_stats(ChannelKind::Message).attempts;
    assert!(before >= 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(client.channel_stats(ChannelKind::Message).attempts, before);

    client.open_message_channel(listener).await;
    assert!(client.channel_stats(ChannelKind::Message).attempts > before);

    client.shutdown().await;
}
