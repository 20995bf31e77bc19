//! # HeatLink Core Library
//!
//! Core functionality for the HeatLink heat pump serial bridge.
//!
//! This library provides:
//! - The binary frame codec for the controller's serial protocol
//! - A half-duplex transport with framing-error resynchronization
//! - A single-in-flight command queue and dispatcher
//! - The connection life-cycle state machine and receive loop
//! - A lock-guarded mirror of the device's last-known status
//!
//! ## Example
//!
//! ```rust,ignore
//! use heatlink_core::{config::LinkConfig, link::HeatPump};
//!
//! let mut pump = HeatPump::initialize(LinkConfig::for_port("/dev/ttyUSB0"))?;
//! loop {
//!     pump.tick();
//!     if pump.is_connected() {
//!         println!("flow temp: {}", pump.get_status().zone1_flow_setpoint);
//!     }
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod link;
pub mod protocol;
pub mod status;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LinkConfig, Parity};
    pub use crate::link::HeatPump;
    pub use crate::protocol::{ConnectionState, GetType, Message, MsgType, SetType};
    pub use crate::status::{DhwMode, HpMode, OperationMode, PowerMode, Status};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
