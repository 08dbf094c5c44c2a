//! Channel state types.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one channel instance.
///
/// `Closed` and `Failed` are terminal; the next attempt gets a fresh
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, nothing started.
    Idle,
    /// Opening the transport connection.
    Connecting,
    /// Transport up, WebSocket upgrade in flight.
    Handshaking,
    /// Handshake acknowledged; frames flow.
    Open,
    /// Peer closed the stream, or the channel was terminated.
    Closed,
    /// Connect error, handshake error or interrupted wait.
    Failed,
}

impl ChannelState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomic wrapper for channel state.
#[derive(Debug)]
pub struct AtomicChannelState(AtomicU8);

impl AtomicChannelState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ChannelState {
        match self.0.load(Ordering::SeqCst) {
            0 => ChannelState::Idle,
            1 => ChannelState::Connecting,
            2 => ChannelState::Handshaking,
            3 => ChannelState::Open,
            4 => ChannelState::Closed,
            _ => ChannelState::Failed,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
