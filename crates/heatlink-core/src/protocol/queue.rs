//! Command queue and dispatcher
//!
//! Holds the backlog of not-yet-transmitted commands. At most one command
//! is in flight: each dispatch cycle sends the head of the backlog, and
//! the receive loop advances the queue as status replies arrive. The
//! writer half of the channel lives inside the queue lock, so sending is
//! always paired with backlog mutation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::message::{GetType, Message};
use super::transport::Sender;
use super::{ConnectionState, ProtocolError, StateCell};

/// GET commands of one status refresh, in dispatch order. `ActiveTime`
/// exists in the protocol but carries nothing the status model needs, so
/// it is not polled.
pub const STATUS_REFRESH_SEQUENCE: [GetType; 13] = [
    GetType::DefrostState,
    GetType::CompressorFrequency,
    GetType::ForcedDhwState,
    GetType::HeatingPower,
    GetType::TemperatureConfig,
    GetType::RoomTemperatureState,
    GetType::DhwTemperatureA,
    GetType::DhwTemperatureB,
    GetType::FlowRate,
    GetType::ModeFlagsA,
    GetType::ModeFlagsB,
    GetType::EnergyUsage,
    GetType::EnergyDelivery,
];

struct QueueInner {
    backlog: VecDeque<Message>,
    sender: Sender,
}

/// FIFO backlog of outbound commands plus the transmitting half of the
/// link, under one lock.
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    state: Arc<StateCell>,
}

impl CommandQueue {
    /// New empty queue around the writer half.
    pub fn new(sender: Sender, state: Arc<StateCell>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                backlog: VecDeque::new(),
                sender,
            }),
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a fresh status-refresh batch. A non-empty backlog means the
    /// previous refresh never completed; it is stale and gets replaced.
    pub fn enqueue_status_refresh(&self) {
        let mut inner = self.lock();
        if !inner.backlog.is_empty() {
            warn!(
                pending = inner.backlog.len(),
                "command backlog was not empty when queueing status refresh"
            );
            inner.backlog.clear();
        }
        for get in STATUS_REFRESH_SEQUENCE {
            inner.backlog.push_back(Message::get(get));
        }
    }

    /// Append a caller-issued SET command. Never displaces queued work.
    pub fn enqueue_set(&self, cmd: Message) {
        self.lock().backlog.push_back(cmd);
    }

    /// Send the next queued command, if any. An empty backlog is success.
    ///
    /// A send failure means the connection is broken: the whole backlog is
    /// flushed and the link is marked disconnected, so no further commands
    /// are fired into a dead line.
    pub fn dispatch_next(&self) -> Result<(), ProtocolError> {
        let mut inner = self.lock();
        let Some(mut msg) = inner.backlog.pop_front() else {
            return Ok(());
        };
        if let Err(e) = inner.sender.send(&mut msg) {
            warn!("unable to dispatch queued command, flushing backlog: {e}");
            inner.backlog.clear();
            self.state.set(ConnectionState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    /// Send a command immediately, bypassing the backlog. Used for the
    /// connect handshake, which precedes any queued exchange.
    pub fn send_direct(&self, mut cmd: Message) -> Result<(), ProtocolError> {
        self.lock().sender.send(&mut cmd)
    }

    /// Drop every pending command. Part of transport resynchronization.
    pub fn clear(&self) {
        self.lock().backlog.clear();
    }

    /// Number of commands awaiting dispatch.
    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }
}
