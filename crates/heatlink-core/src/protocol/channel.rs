//! Byte channel abstraction
//!
//! The transport reads and writes raw bytes through a [`Channel`], so the
//! link can run over a local serial port, a TCP serial bridge, or an
//! in-memory channel in tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use crate::config::{LinkConfig, Parity};

/// A duplex byte stream with enough introspection for half-duplex framing.
///
/// `try_clone` yields a second handle onto the same underlying device so
/// the receive loop and the dispatcher can hold independent halves.
pub trait Channel: Send {
    /// Read available bytes into `buf`, returning the count.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write an entire frame.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push written bytes out to the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Discard all received bytes that have not been read yet.
    fn drain_input(&mut self) -> io::Result<()>;

    /// Second handle onto the same device.
    fn try_clone(&self) -> io::Result<Box<dyn Channel>>;
}

/// Local serial port channel.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Open and configure the port named by the config: 8 data bits, the
    /// configured parity, 1 stop bit, no flow control.
    pub fn open(config: &LinkConfig) -> io::Result<Self> {
        let parity = match config.parity {
            Parity::Even => serialport::Parity::Even,
            Parity::None => serialport::Parity::None,
        };
        let port = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(parity)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(io::Error::other)?;
        Ok(Self { port })
    }
}

impl Channel for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::other)
    }

    fn drain_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        let port = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel { port }))
    }
}

/// TCP channel for serial-over-network bridges (ser2net and friends).
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Connect to `host:port`.
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Channel for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        // peek() on a non-blocking socket reports min(available, buffer).
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let result = self.stream.peek(&mut buf);
        self.stream.set_nonblocking(false)?;
        match result {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn drain_input(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    let _ = self.stream.set_nonblocking(false);
                    return Err(e);
                }
            }
        }
        self.stream.set_nonblocking(false)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(TcpChannel {
            stream: self.stream.try_clone()?,
        }))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Bytes the link will read, i.e. the device's transmissions.
    inbound: VecDeque<u8>,
    /// Bytes the link wrote, i.e. frames sent to the device.
    outbound: Vec<u8>,
    fail_writes: bool,
}

/// In-memory channel standing in for a heat pump on the far end. Used by
/// tests and hardware-free demo setups; cloned handles share one state.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    /// New empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes for the link to receive.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes);
    }

    /// Take every byte the link has written so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    /// Number of bytes the link has written and not yet been taken.
    pub fn outbound_len(&self) -> usize {
        self.lock().outbound.len()
    }

    /// Number of queued bytes the link has not read yet.
    pub fn inbound_len(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Make subsequent writes fail, as a closed or saturated device would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl Channel for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let mut n = 0;
        while n < buf.len() {
            match state.inbound.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        state.outbound.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.lock().inbound.len())
    }

    fn drain_input(&mut self) -> io::Result<()> {
        self.lock().inbound.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(self.clone()))
    }
}

/// Open the channel named by the config: `tcp://host:port` for a serial
/// bridge, anything else as a local serial port.
pub fn open_channel(config: &LinkConfig) -> io::Result<Box<dyn Channel>> {
    if let Some(addr) = config.port_name.strip_prefix("tcp://") {
        debug!(addr, "opening tcp serial bridge");
        Ok(Box::new(TcpChannel::connect(addr)?))
    } else {
        Ok(Box::new(SerialChannel::open(config)?))
    }
}

/// Names of serial ports present on this machine.
pub fn list_ports() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn memory_channel_roundtrip() {
        let device = MemoryChannel::new();
        let mut link_side = device.try_clone().unwrap();

        device.push_inbound(&[1, 2, 3]);
        assert_eq!(link_side.bytes_to_read().unwrap(), 3);

        let mut buf = [0u8; 2];
        assert_eq!(link_side.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);

        link_side.write_all(&[9, 8]).unwrap();
        assert_eq!(device.take_outbound(), vec![9, 8]);
    }

    #[test]
    fn memory_channel_drain_clears_inbound() {
        let device = MemoryChannel::new();
        let mut link_side = device.try_clone().unwrap();
        device.push_inbound(&[0xFF; 10]);
        link_side.drain_input().unwrap();
        assert_eq!(link_side.bytes_to_read().unwrap(), 0);
    }

    #[test]
    fn memory_channel_write_failure() {
        let device = MemoryChannel::new();
        let mut link_side = device.try_clone().unwrap();
        device.set_fail_writes(true);
        assert!(link_side.write_all(&[0x01]).is_err());
        assert_eq!(device.outbound_len(), 0);
    }
}
