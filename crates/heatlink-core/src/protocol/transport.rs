//! Half-duplex framing over the byte channel
//!
//! Maps the raw byte stream to whole [`Message`]s. The line is noisy and
//! the protocol carries no request IDs, so any framing, checksum, or
//! timeout failure resynchronizes: drain every buffered byte and drop the
//! pending command backlog, since a reply after corruption can no longer
//! be correlated to a specific request.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::channel::Channel;
use super::message::{Message, CHECKSUM_SIZE, HEADER_MAGIC_A, HEADER_SIZE};
use super::queue::CommandQueue;
use super::{LinkCounters, ProtocolError};

/// Bounded wait for the start of a frame.
const HEADER_WAIT: Duration = Duration::from_millis(1000);
/// Poll granularity while waiting for a frame to start.
const HEADER_POLL: Duration = Duration::from_millis(10);
/// Hard ceiling on waiting for the remainder of a frame after its header.
const BODY_WAIT: Duration = Duration::from_secs(30);
/// Poll granularity while waiting for body bytes.
const BODY_POLL: Duration = Duration::from_millis(1);
/// Minimum spacing between channel-unavailable log lines.
const UNAVAILABLE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Receiving half of the link. Owned by the receive loop; nothing else
/// reads the channel.
pub struct Transport {
    channel: Box<dyn Channel>,
    queue: Arc<CommandQueue>,
    counters: Arc<LinkCounters>,
    dump_packets: bool,
    last_unavailable_log: Option<Instant>,
}

impl Transport {
    /// Wrap the reader half of a channel.
    pub fn new(
        channel: Box<dyn Channel>,
        queue: Arc<CommandQueue>,
        counters: Arc<LinkCounters>,
        dump_packets: bool,
    ) -> Self {
        Self {
            channel,
            queue,
            counters,
            dump_packets,
            last_unavailable_log: None,
        }
    }

    /// Block until a complete, checksum-valid frame arrives or the header
    /// wait window passes.
    ///
    /// Returns `Ok(None)` when no frame started within the window. Every
    /// error path has already resynchronized by the time it returns.
    pub fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
        if !self.wait_for_header()? {
            return Ok(None);
        }

        // Scan for the start of a frame. Anything else means the stream
        // is corrupt; drop everything buffered.
        let lead = self.read_byte()?;
        if lead != HEADER_MAGIC_A {
            warn!(byte = lead, "dropping serial data, frame start mismatch");
            self.resync();
            return Err(ProtocolError::BadMagic(lead));
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0] = lead;
        if let Err(e) = self.read_exact(&mut header[1..]) {
            warn!("serial header read failure: {e}");
            self.resync();
            return Err(e);
        }

        let mut msg = Message::response();
        msg.write_header(&header)?;
        if !msg.verify_header() {
            warn!(?header, "serial frame header invalid, skipping body wait");
            self.resync();
            return Err(ProtocolError::InvalidHeader);
        }

        // The rest of the frame should follow the header promptly.
        let remaining = msg.payload_len() + CHECKSUM_SIZE;
        if let Err(e) = self.wait_for_body(remaining) {
            self.resync();
            return Err(e);
        }

        let payload_len = msg.payload_len();
        if let Err(e) = self.read_exact(msg.body_mut()) {
            warn!("serial body read failure: {e}");
            self.resync();
            return Err(e);
        }
        // The checksum byte is not counted by the write cursor.
        msg.advance(payload_len);

        if !msg.verify_checksum() {
            self.resync();
            return Err(ProtocolError::ChecksumMismatch);
        }

        if self.dump_packets {
            debug!(frame = ?msg, "rx");
        }
        self.counters.note_rx();
        Ok(Some(msg))
    }

    /// Recover after corruption: discard all buffered input and every
    /// pending command. Safe to call at any time, any number of times.
    pub fn resync(&mut self) {
        if let Err(e) = self.channel.drain_input() {
            debug!("failed to drain serial input during resync: {e}");
        }
        self.queue.clear();
    }

    fn wait_for_header(&mut self) -> Result<bool, ProtocolError> {
        let deadline = Instant::now() + HEADER_WAIT;
        loop {
            match self.channel.bytes_to_read() {
                Ok(n) if n >= HEADER_SIZE => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    self.log_unavailable(&e);
                    return Err(e.into());
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(HEADER_POLL);
        }
    }

    fn wait_for_body(&mut self, expected: usize) -> Result<(), ProtocolError> {
        let start = Instant::now();
        loop {
            let available = self.channel.bytes_to_read()?;
            if available >= expected {
                return Ok(());
            }
            if start.elapsed() > BODY_WAIT {
                warn!(
                    got = available,
                    expected, "serial frame body did not arrive in time"
                );
                return Err(ProtocolError::BodyTimeout {
                    got: available,
                    expected,
                });
            }
            thread::sleep(BODY_POLL);
        }
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut offset = 0;
        while offset < buf.len() {
            match self.channel.read(&mut buf[offset..]) {
                Ok(0) => {
                    return Err(ProtocolError::TruncatedRead {
                        got: offset,
                        expected: buf.len(),
                    })
                }
                Ok(n) => offset += n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    // Availability was checked before reading; retry.
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn log_unavailable(&mut self, err: &std::io::Error) {
        let due = self
            .last_unavailable_log
            .map(|t| t.elapsed() >= UNAVAILABLE_LOG_INTERVAL)
            .unwrap_or(true);
        if due {
            warn!("serial channel unavailable for rx: {err}");
            self.last_unavailable_log = Some(Instant::now());
        }
    }
}

/// Transmitting half of the link. Owned by the command queue so every
/// send is paired with backlog mutation under one lock.
pub struct Sender {
    channel: Box<dyn Channel>,
    counters: Arc<LinkCounters>,
    dump_packets: bool,
    last_unavailable_log: Option<Instant>,
}

impl Sender {
    /// Wrap the writer half of a channel.
    pub fn new(channel: Box<dyn Channel>, counters: Arc<LinkCounters>, dump_packets: bool) -> Self {
        Self {
            channel,
            counters,
            dump_packets,
            last_unavailable_log: None,
        }
    }

    /// Stamp the checksum and put the frame on the wire. Fails fast when
    /// the channel cannot take the frame; never blocks on a dead device.
    pub fn send(&mut self, msg: &mut Message) -> Result<(), ProtocolError> {
        msg.set_checksum();
        match self.channel.write_all(msg.frame()) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                warn!(len = msg.frame_len(), "serial tx buffer cannot take frame");
                return Err(ProtocolError::TxBufferFull(msg.frame_len()));
            }
            Err(e) => {
                self.log_unavailable(&e);
                return Err(e.into());
            }
        }
        self.channel.flush()?;

        if self.dump_packets {
            debug!(frame = ?msg, "tx");
        }
        self.counters.note_tx();
        Ok(())
    }

    fn log_unavailable(&mut self, err: &std::io::Error) {
        let due = self
            .last_unavailable_log
            .map(|t| t.elapsed() >= UNAVAILABLE_LOG_INTERVAL)
            .unwrap_or(true);
        if due {
            warn!("serial channel unavailable for tx: {err}");
            self.last_unavailable_log = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::channel::MemoryChannel;
    use crate::protocol::message::{GetType, MsgType};
    use crate::protocol::{ConnectionState, StateCell};
    use pretty_assertions::assert_eq;

    fn test_rig(device: &MemoryChannel) -> (Transport, Arc<CommandQueue>) {
        let counters = Arc::new(LinkCounters::default());
        let state = Arc::new(StateCell::new(ConnectionState::Connected));
        let sender = Sender::new(device.try_clone().unwrap(), counters.clone(), false);
        let queue = Arc::new(CommandQueue::new(sender, state));
        let transport = Transport::new(device.try_clone().unwrap(), queue.clone(), counters, false);
        (transport, queue)
    }

    fn valid_frame(kind: MsgType, payload: &[u8]) -> Vec<u8> {
        let mut msg = Message::command(kind);
        msg.write_payload(payload).unwrap();
        msg.set_checksum();
        msg.frame().to_vec()
    }

    #[test]
    fn receives_a_valid_frame() {
        let device = MemoryChannel::new();
        let (mut transport, _queue) = test_rig(&device);

        device.push_inbound(&valid_frame(MsgType::ConnectResponse, &[0x00]));
        let msg = transport.receive().unwrap().expect("frame expected");
        assert_eq!(msg.msg_type(), Some(MsgType::ConnectResponse));
        assert_eq!(msg.payload_len(), 1);
        assert!(!msg.is_command());
    }

    #[test]
    fn bad_leading_byte_resyncs_and_clears_backlog() {
        let device = MemoryChannel::new();
        let (mut transport, queue) = test_rig(&device);

        queue.enqueue_status_refresh();
        assert!(queue.backlog_len() > 0);

        let mut bytes = vec![0x00, 0x11, 0x22, 0x33, 0x44];
        bytes.extend_from_slice(&valid_frame(MsgType::GetResponse, &[0x02; 16]));
        device.push_inbound(&bytes);

        assert!(matches!(
            transport.receive(),
            Err(ProtocolError::BadMagic(0x00))
        ));
        // Resync swallowed the valid frame queued behind the noise too.
        assert_eq!(device.inbound_len(), 0);
        assert_eq!(queue.backlog_len(), 0);
    }

    #[test]
    fn corrupt_checksum_resyncs() {
        let device = MemoryChannel::new();
        let (mut transport, queue) = test_rig(&device);

        queue.enqueue_status_refresh();
        let mut bytes = valid_frame(MsgType::GetResponse, &[0x02; 16]);
        *bytes.last_mut().unwrap() ^= 0xFF;
        device.push_inbound(&bytes);

        assert!(matches!(
            transport.receive(),
            Err(ProtocolError::ChecksumMismatch)
        ));
        assert_eq!(queue.backlog_len(), 0);
    }

    #[test]
    fn invalid_header_resyncs() {
        let device = MemoryChannel::new();
        let (mut transport, queue) = test_rig(&device);

        queue.enqueue_status_refresh();
        // Declared payload length 0x20 exceeds the 16-byte ceiling.
        device.push_inbound(&[HEADER_MAGIC_A, 0x62, 0x02, 0x7A, 0x20, 0x00, 0x00]);

        assert!(matches!(
            transport.receive(),
            Err(ProtocolError::InvalidHeader)
        ));
        assert_eq!(queue.backlog_len(), 0);
    }

    #[test]
    fn resync_is_idempotent() {
        let device = MemoryChannel::new();
        let (mut transport, queue) = test_rig(&device);

        queue.enqueue_status_refresh();
        device.push_inbound(&[0xDE, 0xAD, 0xBE, 0xEF]);

        transport.resync();
        assert_eq!(device.inbound_len(), 0);
        assert_eq!(queue.backlog_len(), 0);

        transport.resync();
        assert_eq!(device.inbound_len(), 0);
        assert_eq!(queue.backlog_len(), 0);

        // The transport still recovers a clean frame afterwards.
        device.push_inbound(&valid_frame(MsgType::ConnectResponse, &[0x00]));
        assert!(transport.receive().unwrap().is_some());
    }

    #[test]
    fn idle_wait_returns_no_frame() {
        let device = MemoryChannel::new();
        let (mut transport, _queue) = test_rig(&device);
        // Fewer than a header's worth of bytes: the bounded wait expires.
        device.push_inbound(&[HEADER_MAGIC_A, 0x62]);
        assert!(transport.receive().unwrap().is_none());
    }

    #[test]
    fn sender_counts_transmitted_frames() {
        let device = MemoryChannel::new();
        let counters = Arc::new(LinkCounters::default());
        let mut sender = Sender::new(device.try_clone().unwrap(), counters.clone(), false);

        let mut msg = Message::get(GetType::DefrostState);
        sender.send(&mut msg).unwrap();
        assert_eq!(counters.tx_frames(), 1);
        assert_eq!(device.take_outbound().len(), msg.frame_len());
    }

    #[test]
    fn sender_reports_channel_failure() {
        let device = MemoryChannel::new();
        let counters = Arc::new(LinkCounters::default());
        let mut sender = Sender::new(device.try_clone().unwrap(), counters.clone(), false);

        device.set_fail_writes(true);
        let mut msg = Message::get(GetType::DefrostState);
        assert!(sender.send(&mut msg).is_err());
        assert_eq!(counters.tx_frames(), 0);
    }
}
