//! How a channel runner ended.

use std::fmt;

use super::state::ChannelState;

/// Why a runner's task returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelExit {
    /// Cancelled through `terminate()`.
    Terminated,
    /// Never reached `Open`: connect or handshake failed.
    OpenFailed,
    /// The peer closed the connection during the upgrade.
    ClosedWhileOpening,
    /// The peer closed the stream after `Open`.
    PeerClosed,
    /// A decode or transport error after `Open`; the connection was closed.
    Faulted,
}

impl ChannelExit {
    /// Final state of the channel instance.
    #[must_use]
    pub const fn final_state(self) -> ChannelState {
        match self {
            Self::Terminated | Self::PeerClosed | Self::ClosedWhileOpening => {
                ChannelState::Closed
            }
            Self::OpenFailed | Self::Faulted => ChannelState::Failed,
        }
    }

    /// Whether the runner itself must ask for a reconnect.
    ///
    /// Failures before `Open` are reported to the waiter instead, which
    /// reconnects on its side.
    #[must_use]
    pub const fn closed_after_open(self) -> bool {
        matches!(self, Self::PeerClosed | Self::Faulted)
    }
}

impl fmt::Display for ChannelExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Terminated => "terminated",
            Self::OpenFailed => "failed to open",
            Self::ClosedWhileOpening => "closed by peer while opening",
            Self::PeerClosed => "closed by peer",
            Self::Faulted => "closed after error",
        };
        f.write_str(reason)
    }
}
