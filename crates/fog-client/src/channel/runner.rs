//! The task that drives one channel instance from connect to close.

use std::sync::Arc;
use std::time::Duration;

use fog_proto::{Frame, ProtoError};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::events::ChannelExit;
use super::handler::{ChannelHandler, ChannelSocket, is_peer_close};
use super::state::{AtomicChannelState, ChannelState};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::transport::{OutcomeSender, PendingConnect, TransportConnector, pending_connect};

/// Outbound frames buffered per open channel.
pub(crate) const OUTBOUND_QUEUE: usize = 64;

/// Called once when an open channel closes without being terminated.
pub(crate) type CloseHook = Box<dyn FnOnce(ChannelExit) + Send>;

/// Everything a runner needs for one reconnect epoch.
pub(crate) struct RunnerContext {
    pub(crate) endpoint: Endpoint,
    pub(crate) uri: Url,
    pub(crate) connector: TransportConnector,
    pub(crate) handshake_timeout: Duration,
    pub(crate) handler: ChannelHandler,
    pub(crate) state: Arc<AtomicChannelState>,
    pub(crate) on_close: CloseHook,
}

/// Owner of a running channel task.
#[derive(Debug)]
pub(crate) struct ChannelRunner {
    cancel: CancellationToken,
    task: JoinHandle<ChannelExit>,
}

impl ChannelRunner {
    /// Start the channel on its own task. The returned waiter resolves once
    /// the channel is open or has failed to open.
    pub(crate) fn spawn(ctx: RunnerContext) -> (Self, PendingConnect) {
        let (outcome, pending) = pending_connect();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(ctx, outcome, cancel.clone()));
        (Self { cancel, task }, pending)
    }

    /// Whether the task is still running.
    pub(crate) fn is_live(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the task and wait for it to release its connection.
    pub(crate) async fn terminate(mut self) -> ChannelExit {
        self.cancel.cancel();
        match (&mut self.task).await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "channel task did not finish cleanly");
                ChannelExit::Terminated
            }
        }
    }
}

impl Drop for ChannelRunner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(ctx: RunnerContext, mut outcome: OutcomeSender, cancel: CancellationToken) -> ChannelExit {
    let RunnerContext {
        endpoint,
        uri,
        connector,
        handshake_timeout,
        handler,
        state,
        on_close,
    } = ctx;
    let kind = handler.kind();

    state.store(ChannelState::Connecting);
    let stream = tokio::select! {
        () = cancel.cancelled() => return finish(&state, ChannelExit::Terminated),
        result = connector.connect(&endpoint) => result,
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%kind, error = %e, "connect failed");
            outcome.fail(e.into());
            return finish(&state, ChannelExit::OpenFailed);
        }
    };

    state.store(ChannelState::Handshaking);
    let socket = tokio::select! {
        () = cancel.cancelled() => return finish(&state, ChannelExit::Terminated),
        result = handler.handshake(stream, &uri, handshake_timeout) => result,
    };
    let socket = match socket {
        Ok(socket) => socket,
        Err(e) => {
            debug!(%kind, error = %e, "handshake failed");
            let exit = if matches!(e, ClientError::PeerClosed(_)) {
                ChannelExit::ClosedWhileOpening
            } else {
                ChannelExit::OpenFailed
            };
            outcome.fail(e);
            return finish(&state, exit);
        }
    };

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    handler.opened(tx.clone());
    state.store(ChannelState::Open);
    outcome.succeed();

    let exit = pump(socket, rx, &handler, &cancel).await;
    handler.closed(&tx);
    finish(&state, exit);

    if exit.closed_after_open() {
        debug!(%kind, %exit, "open channel ended");
        on_close(exit);
    }
    exit
}

fn finish(state: &AtomicChannelState, exit: ChannelExit) -> ChannelExit {
    state.store(exit.final_state());
    exit
}

async fn pump(
    mut socket: ChannelSocket,
    mut outbound: mpsc::Receiver<Frame>,
    handler: &ChannelHandler,
    cancel: &CancellationToken,
) -> ChannelExit {
    let kind = handler.kind();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = socket.close(None).await;
                return ChannelExit::Terminated;
            }

            inbound = socket.next() => {
                let bytes = match inbound {
                    Some(Ok(WsMessage::Binary(bytes))) => bytes,
                    Some(Ok(WsMessage::Text(_))) => {
                        let err = ProtoError::Decoding("unexpected text frame".to_string());
                        return fault(&mut socket, handler, err.into()).await;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(%kind, ?frame, "peer sent close");
                        return ChannelExit::PeerClosed;
                    }
                    // tungstenite answers pings itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) if is_peer_close(&e) => {
                        debug!(%kind, error = %e, "stream reset by peer");
                        return ChannelExit::PeerClosed;
                    }
                    Some(Err(e)) => {
                        let err = ClientError::Transport(format!("stream protocol error: {e}"));
                        return fault(&mut socket, handler, err).await;
                    }
                    None => return ChannelExit::PeerClosed,
                };

                match handler.on_frame(&bytes) {
                    Ok(Some(reply)) => {
                        if let Err(e) = write_frame(&mut socket, &reply).await {
                            return fault(&mut socket, handler, e).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => return fault(&mut socket, handler, e.into()).await,
                }
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = write_frame(&mut socket, &frame).await {
                    return fault(&mut socket, handler, e).await;
                }
            }
        }
    }
}

async fn write_frame(socket: &mut ChannelSocket, frame: &Frame) -> Result<(), ClientError> {
    let bytes = frame.encode()?;
    socket
        .send(WsMessage::Binary(bytes.into()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

async fn fault(socket: &mut ChannelSocket, handler: &ChannelHandler, err: ClientError) -> ChannelExit {
    warn!(kind = %handler.kind(), error = %err, "closing channel after error");
    handler.report(&err);
    let _ = socket.close(None).await;
    ChannelExit::Faulted
}
