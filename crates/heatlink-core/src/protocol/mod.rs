//! Serial protocol communication
//!
//! Implements the heat pump controller's binary serial protocol: the
//! frame codec, the half-duplex transport with resynchronization, and the
//! single-in-flight command queue.

pub mod channel;
mod error;
pub mod message;
pub mod queue;
pub mod transport;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

pub use channel::{list_ports, open_channel, Channel, MemoryChannel, SerialChannel, TcpChannel};
pub use error::ProtocolError;
pub use message::{GetType, Message, MsgType, SetType};
pub use queue::CommandQueue;
pub use transport::{Sender, Transport};

/// Serial line speed used by the controller.
pub const DEFAULT_BAUD_RATE: u32 = 2400;

/// Connection life-cycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link to the heat pump.
    Disconnected,
    /// Handshake sent, awaiting the connect reply.
    Connecting,
    /// Handshake acknowledged; status polling is active.
    Connected,
}

/// Lock-free cell holding the current [`ConnectionState`]. Written by the
/// dispatcher and the receive loop, read by any caller.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell starting from the given state.
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Replace the state.
    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Frame counters shared between the transport halves and the public API.
#[derive(Debug, Default)]
pub struct LinkCounters {
    rx_frames: AtomicU64,
    tx_frames: AtomicU64,
}

impl LinkCounters {
    pub(crate) fn note_rx(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_tx(&self) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Valid frames received since the link was created.
    pub fn rx_frames(&self) -> u64 {
        self.rx_frames.load(Ordering::Relaxed)
    }

    /// Frames transmitted since the link was created.
    pub fn tx_frames(&self) -> u64 {
        self.tx_frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_transitions() {
        let cell = StateCell::new(ConnectionState::Disconnected);
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        cell.set(ConnectionState::Connecting);
        assert_eq!(cell.get(), ConnectionState::Connecting);
        cell.set(ConnectionState::Connected);
        assert_eq!(cell.get(), ConnectionState::Connected);
    }

    #[test]
    fn counters_start_at_zero() {
        let counters = LinkCounters::default();
        assert_eq!(counters.rx_frames(), 0);
        assert_eq!(counters.tx_frames(), 0);
        counters.note_rx();
        counters.note_tx();
        counters.note_tx();
        assert_eq!(counters.rx_frames(), 1);
        assert_eq!(counters.tx_frames(), 2);
    }
}
