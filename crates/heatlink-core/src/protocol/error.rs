//! Protocol errors

use thiserror::Error;

/// Errors that can occur on the heat pump serial link.
///
/// All of these are handled inside the core: framing and timeout errors
/// trigger a transport resync, dispatch errors flush the command backlog
/// and force the link disconnected. Nothing here crosses the public API,
/// which reports only boolean success and the connected signal.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("serial channel error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("serial tx buffer cannot take a {0}-byte frame")]
    TxBufferFull(usize),

    #[error("leading byte {0:#04x} is not a frame start")]
    BadMagic(u8),

    #[error("frame header failed validation")]
    InvalidHeader,

    #[error("header must be exactly 5 bytes, got {0}")]
    BadHeaderLength(usize),

    #[error("payload exceeds the 16-byte limit: {0}")]
    PayloadTooLarge(usize),

    #[error("short read: got {got} of {expected} bytes")]
    TruncatedRead { got: usize, expected: usize },

    #[error("frame body timed out: got {got} of {expected} bytes")]
    BodyTimeout { got: usize, expected: usize },

    #[error("frame checksum mismatch")]
    ChecksumMismatch,
}
