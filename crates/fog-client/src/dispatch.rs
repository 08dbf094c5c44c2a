//! Frame dispatch and the registry of open stream sessions.

use std::collections::HashMap;
use std::sync::Arc;

use fog_proto::{ChannelKind, Frame, ProtoError};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::listener::FogApiListener;

/// Result of handing a message to the stream layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued on an open channel.
    Sent,
    /// No channel of that kind is open; the message was dropped.
    NotConnected,
    /// The channel's outbound queue is full; the message was dropped.
    QueueFull,
}

/// Decodes inbound frames for one channel and notifies the listener.
pub(crate) struct FrameDispatcher {
    kind: ChannelKind,
    listener: Arc<dyn FogApiListener>,
}

impl FrameDispatcher {
    pub(crate) fn new(kind: ChannelKind, listener: Arc<dyn FogApiListener>) -> Self {
        Self { kind, listener }
    }

    /// Handle one binary frame, returning the reply to write back, if any.
    pub(crate) fn handle(&self, bytes: &[u8]) -> Result<Option<Frame>, ProtoError> {
        match (self.kind, Frame::decode(bytes)?) {
            (ChannelKind::Control, Frame::ControlSignal) => {
                debug!("control signal received");
                self.listener.on_new_config_signal();
                Ok(Some(Frame::Ack))
            }
            (ChannelKind::Message, Frame::Message(msg)) => {
                debug!(publisher = %msg.publisher, "message received");
                self.listener.on_messages(vec![msg]);
                Ok(Some(Frame::Ack))
            }
            (ChannelKind::Message, Frame::Receipt(receipt)) => {
                self.listener
                    .on_message_receipt(&receipt.id, receipt.timestamp);
                Ok(None)
            }
            (_, Frame::Ack) => Ok(None),
            (kind, other) => Err(ProtoError::Validation(format!(
                "unexpected frame {:#04x} on {kind} channel",
                other.opcode()
            ))),
        }
    }
}

/// Open stream sessions, keyed by channel kind and element id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<(ChannelKind, String), mpsc::Sender<Frame>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, kind: ChannelKind, element_id: &str, tx: mpsc::Sender<Frame>) {
        self.sessions
            .write()
            .insert((kind, element_id.to_string()), tx);
    }

    /// Remove a session, unless it has already been replaced by a newer one.
    pub(crate) fn unregister(&self, kind: ChannelKind, element_id: &str, tx: &mpsc::Sender<Frame>) {
        let mut sessions = self.sessions.write();
        let key = (kind, element_id.to_string());
        if sessions.get(&key).is_some_and(|current| current.same_channel(tx)) {
            sessions.remove(&key);
        }
    }

    /// Whether a session of `kind` is open for `element_id`.
    #[must_use]
    pub fn is_open(&self, kind: ChannelKind, element_id: &str) -> bool {
        self.sessions
            .read()
            .get(&(kind, element_id.to_string()))
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `frame` on the open session; never blocks, never fails.
    pub(crate) fn send(&self, kind: ChannelKind, element_id: &str, frame: Frame) -> SendStatus {
        let sessions = self.sessions.read();
        let Some(tx) = sessions.get(&(kind, element_id.to_string())) else {
            warn!(%kind, element_id, "no open {kind} channel, dropping outbound frame");
            return SendStatus::NotConnected;
        };

        match tx.try_send(frame) {
            Ok(()) => SendStatus::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%kind, element_id, "{kind} channel queue full, dropping outbound frame");
                SendStatus::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%kind, element_id, "{kind} channel closed, dropping outbound frame");
                SendStatus::NotConnected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fog_proto::Message;
    use fog_proto::frame::{OPCODE_CONTROL_SIGNAL, OPCODE_MESSAGE};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        signals: Mutex<u32>,
        messages: Mutex<Vec<Message>>,
        receipts: Mutex<Vec<(String, i64)>>,
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
    }

    #[test]
    fn test_control_signal_is_acked() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = FrameDispatcher::new(ChannelKind::Control, recorder.clone());

        let reply = dispatcher.handle(&[OPCODE_CONTROL_SIGNAL]).unwrap();
        assert_eq!(reply, Some(Frame::Ack));
        assert_eq!(*recorder.signals.lock(), 1);
    }

    #[test]
    fn test_message_delivered_and_acked() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = FrameDispatcher::new(ChannelKind::Message, recorder.clone());
        let wire = Frame::Message(Message::new(b"data".to_vec())).encode().unwrap();

        let reply = dispatcher.handle(&wire).unwrap();
        assert_eq!(reply, Some(Frame::Ack));
        assert_eq!(recorder.messages.lock()[0].payload, b"data");
    }

    #[test]
    fn test_receipt_forwarded_without_reply() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = FrameDispatcher::new(ChannelKind::Message, recorder.clone());
        let wire = Frame::Receipt(fog_proto::MessageReceipt {
            id: "r-1".to_string(),
            timestamp: 5,
        })
        .encode()
        .unwrap();

        assert_eq!(dispatcher.handle(&wire).unwrap(), None);
        assert_eq!(recorder.receipts.lock()[0], ("r-1".to_string(), 5));
    }

    #[test]
    fn test_message_on_control_channel_rejected() {
        let dispatcher = FrameDispatcher::new(ChannelKind::Control, Arc::new(Recorder::default()));
        let wire = Frame::Message(Message::new(Vec::new())).encode().unwrap();
        assert!(matches!(dispatcher.handle(&wire), Err(ProtoError::Validation(_))));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let dispatcher = FrameDispatcher::new(ChannelKind::Message, Arc::new(Recorder::default()));
        assert!(dispatcher.handle(&[OPCODE_MESSAGE, 0xff]).is_err());
    }

    #[test]
    fn test_send_without_session_is_not_connected() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.send(ChannelKind::Message, "e", Frame::Ack),
            SendStatus::NotConnected
        );
    }

    #[tokio::test]
    async fn test_send_queues_on_open_session() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(ChannelKind::Message, "e", tx);

        assert!(registry.is_open(ChannelKind::Message, "e"));
        assert!(!registry.is_open(ChannelKind::Control, "e"));
        assert_eq!(registry.send(ChannelKind::Message, "e", Frame::Ack), SendStatus::Sent);
        assert_eq!(
            registry.send(ChannelKind::Message, "e", Frame::Ack),
            SendStatus::QueueFull
        );
        assert_eq!(rx.recv().await, Some(Frame::Ack));
    }

    #[test]
    fn test_unregister_ignores_replaced_session() {
        let registry = SessionRegistry::new();
        let (old_tx, _old_rx) = mpsc::channel(1);
        let (new_tx, _new_rx) = mpsc::channel(1);
        registry.register(ChannelKind::Message, "e", old_tx.clone());
        registry.register(ChannelKind::Message, "e", new_tx.clone());

        registry.unregister(ChannelKind::Message, "e", &old_tx);
        assert!(registry.is_open(ChannelKind::Message, "e"));

        registry.unregister(ChannelKind::Message, "e", &new_tx);
        assert!(!registry.is_open(ChannelKind::Message, "e"));
    }
}
