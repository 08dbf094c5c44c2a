//! Self-healing control and message streams.
//!
//! Each stream is driven by a [`runner`] task that connects, upgrades and
//! pumps frames until the connection ends. Reconnection is scheduled by the
//! client using the [`reconnect`] policy.

pub mod events;
pub(crate) mod handler;
pub mod reconnect;
pub(crate) mod runner;
pub mod state;

pub use events::ChannelExit;
pub use reconnect::{ReconnectCounter, ReconnectPolicy, calculate_backoff};
pub use state::{AtomicChannelState, ChannelState};
