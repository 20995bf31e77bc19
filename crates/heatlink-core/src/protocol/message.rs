//! Message encoding/decoding
//!
//! Implements the fixed binary frame exchanged with the heat pump
//! controller over the serial link.
//!
//! Frame format:
//! - 5 bytes: header (`0xFC`, message kind, `0x02`, `0x7A`, payload length)
//! - 0..16 bytes: payload (for GET/SET commands byte 0 selects the sub-type)
//! - 1 byte: checksum (`0xFC` minus the sum of all preceding bytes, mod 256)

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

use super::ProtocolError;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 5;
/// Maximum payload length in bytes.
pub const PAYLOAD_SIZE: usize = 16;
/// Checksum length in bytes.
pub const CHECKSUM_SIZE: usize = 1;
/// Capacity of a frame buffer.
pub const TOTAL_MSG_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE + CHECKSUM_SIZE;

/// First header byte of every frame.
pub const HEADER_MAGIC_A: u8 = 0xFC;
/// Third header byte of every frame.
pub const HEADER_MAGIC_B: u8 = 0x02;
/// Fourth header byte of every frame.
pub const HEADER_MAGIC_C: u8 = 0x7A;

const MSG_TYPE_OFFSET: usize = 1;
const PAYLOAD_LEN_OFFSET: usize = 4;

/// Message kinds understood by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Change a setting.
    SetCommand = 0x41,
    /// Acknowledgement of a setting change.
    SetResponse = 0x61,
    /// Request a status group.
    GetCommand = 0x42,
    /// Status group reply.
    GetResponse = 0x62,
    /// Connection handshake request.
    ConnectCommand = 0x5A,
    /// Connection handshake reply.
    ConnectResponse = 0x7A,
    /// Extended handshake request (unused by this bridge).
    ExtConnectCommand = 0x5B,
    /// Extended handshake reply.
    ExtConnectResponse = 0x7B,
}

impl MsgType {
    /// Decode a wire kind byte. Unknown kinds are dropped by the caller,
    /// not treated as fatal.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x41 => Some(MsgType::SetCommand),
            0x61 => Some(MsgType::SetResponse),
            0x42 => Some(MsgType::GetCommand),
            0x62 => Some(MsgType::GetResponse),
            0x5A => Some(MsgType::ConnectCommand),
            0x7A => Some(MsgType::ConnectResponse),
            0x5B => Some(MsgType::ExtConnectCommand),
            0x7B => Some(MsgType::ExtConnectResponse),
            _ => None,
        }
    }
}

/// Status groups addressable by a GET command. Codes match the controller
/// firmware and are append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GetType {
    /// Defrost cycle state.
    DefrostState = 0x02,
    /// Compressor frequency in Hz.
    CompressorFrequency = 0x04,
    /// Forced domestic-hot-water state.
    ForcedDhwState = 0x05,
    /// Heat output power.
    HeatingPower = 0x07,
    /// Configured temperature set-points and limits.
    TemperatureConfig = 0x09,
    /// Zone room temperatures and outside temperature.
    RoomTemperatureState = 0x0B,
    /// Domestic-hot-water feed/return/tank temperatures.
    DhwTemperatureA = 0x0C,
    /// Boiler flow/return temperatures.
    DhwTemperatureB = 0x0D,
    /// Accumulated active time counters.
    ActiveTime = 0x13,
    /// Primary circuit flow rate.
    FlowRate = 0x14,
    /// Power/operation/mode flags and flow set-points.
    ModeFlagsA = 0x26,
    /// Holiday and timer flags.
    ModeFlagsB = 0x28,
    /// Energy consumption counters.
    EnergyUsage = 0xA1,
    /// Energy delivery counters.
    EnergyDelivery = 0xA2,
}

impl GetType {
    /// Decode a payload sub-type byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(GetType::DefrostState),
            0x04 => Some(GetType::CompressorFrequency),
            0x05 => Some(GetType::ForcedDhwState),
            0x07 => Some(GetType::HeatingPower),
            0x09 => Some(GetType::TemperatureConfig),
            0x0B => Some(GetType::RoomTemperatureState),
            0x0C => Some(GetType::DhwTemperatureA),
            0x0D => Some(GetType::DhwTemperatureB),
            0x13 => Some(GetType::ActiveTime),
            0x14 => Some(GetType::FlowRate),
            0x26 => Some(GetType::ModeFlagsA),
            0x28 => Some(GetType::ModeFlagsB),
            0xA1 => Some(GetType::EnergyUsage),
            0xA2 => Some(GetType::EnergyDelivery),
            _ => None,
        }
    }
}

/// Setting groups addressable by a SET command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetType {
    /// Power, modes, zone and DHW temperatures.
    BasicSettings = 0x32,
    /// Forced DHW and holiday mode toggles.
    DhwSetting = 0x34,
}

/// Basic-settings flag: zone target temperature change (payload byte 1).
pub const SET_FLAG_ZONE_TEMPERATURE: u8 = 0x80;
/// Basic-settings flag: DHW target temperature change.
pub const SET_FLAG_DHW_TEMPERATURE: u8 = 0x20;
/// Basic-settings flag: heat pump mode change.
pub const SET_FLAG_HP_MODE: u8 = 0x08;
/// Basic-settings flag: DHW mode change.
pub const SET_FLAG_DHW_MODE: u8 = 0x04;
/// Flag: power/forced-DHW toggle.
pub const SET_FLAG_MODE_TOGGLE: u8 = 0x01;
/// Flag: holiday mode toggle.
pub const SET_FLAG_HOLIDAY_TOGGLE: u8 = 0x02;

/// Zone selector operand for zone-temperature SET commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetZone {
    /// Heating zone 1.
    Zone1 = 0,
    /// Heating zone 2.
    Zone2 = 1,
    /// Both zones.
    Both = 2,
}

/// Heat pump mode operand for mode SET commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetHpMode {
    /// Target room temperature control.
    Temperature = 0,
    /// Fixed flow temperature control.
    FlowControl = 1,
    /// Weather compensation curve control.
    CompensationCurve = 2,
}

/// One complete frame: header, payload and checksum in a fixed buffer.
///
/// A `Message` is either a locally constructed command or a response
/// assembled from wire bytes by the transport; the distinction only
/// affects debug formatting. Messages are moved, never cloned, between
/// the dispatcher and the transport.
pub struct Message {
    buf: [u8; TOTAL_MSG_SIZE],
    write_offset: usize,
    command: bool,
}

impl Message {
    /// Empty buffer for a frame arriving from the wire.
    pub fn response() -> Self {
        Self {
            buf: [0; TOTAL_MSG_SIZE],
            write_offset: 0,
            command: false,
        }
    }

    /// Command frame with the header magics and kind filled in.
    pub fn command(kind: MsgType) -> Self {
        let mut buf = [0; TOTAL_MSG_SIZE];
        buf[0] = HEADER_MAGIC_A;
        buf[MSG_TYPE_OFFSET] = kind as u8;
        buf[2] = HEADER_MAGIC_B;
        buf[3] = HEADER_MAGIC_C;
        Self {
            buf,
            write_offset: HEADER_SIZE,
            command: true,
        }
    }

    /// GET command for one status group: zero-filled 16-byte payload with
    /// the sub-type code at payload byte 0.
    pub fn get(sub: GetType) -> Self {
        let mut msg = Self::command(MsgType::GetCommand);
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0] = sub as u8;
        // Full payload always fits; ignore the length check.
        let _ = msg.write_payload(&payload);
        msg
    }

    /// SET command for one setting group, payload shaped like [`Self::get`].
    pub fn set(sub: SetType) -> Self {
        let mut msg = Self::command(MsgType::SetCommand);
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0] = sub as u8;
        let _ = msg.write_payload(&payload);
        msg
    }

    /// Raw message-kind byte from the header.
    pub fn kind_byte(&self) -> u8 {
        self.buf[MSG_TYPE_OFFSET]
    }

    /// Decoded message kind, if recognized.
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_wire(self.kind_byte())
    }

    /// Decoded GET sub-type from payload byte 0, if recognized.
    pub fn get_type(&self) -> Option<GetType> {
        GetType::from_wire(self.u8_at(0))
    }

    /// Declared payload length from the header.
    pub fn payload_len(&self) -> usize {
        self.buf[PAYLOAD_LEN_OFFSET] as usize
    }

    /// Total frame length: header, declared payload, checksum.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len() + CHECKSUM_SIZE
    }

    /// True for locally constructed commands, false for received frames.
    pub fn is_command(&self) -> bool {
        self.command
    }

    /// Copy exactly [`HEADER_SIZE`] wire bytes into the header region.
    pub fn write_header(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.len() != HEADER_SIZE {
            return Err(ProtocolError::BadHeaderLength(bytes.len()));
        }
        self.buf[..HEADER_SIZE].copy_from_slice(bytes);
        self.write_offset = HEADER_SIZE;
        Ok(())
    }

    /// Validate the header magics and declared payload length.
    ///
    /// On success the payload and checksum region is zero-filled so that
    /// only explicitly written fields carry live data. Failure is not
    /// fatal; the caller must resynchronize.
    pub fn verify_header(&mut self) -> bool {
        if self.buf[0] != HEADER_MAGIC_A
            || self.buf[2] != HEADER_MAGIC_B
            || self.buf[3] != HEADER_MAGIC_C
        {
            return false;
        }
        if self.payload_len() > PAYLOAD_SIZE {
            return false;
        }
        self.buf[HEADER_SIZE..].fill(0);
        true
    }

    /// Copy a payload into the frame, zero-filling the remainder of the
    /// payload region and recording the length in the header.
    pub fn write_payload(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(data.len()));
        }
        self.buf[HEADER_SIZE..HEADER_SIZE + data.len()].copy_from_slice(data);
        self.buf[HEADER_SIZE + data.len()..HEADER_SIZE + PAYLOAD_SIZE].fill(0);
        self.buf[PAYLOAD_LEN_OFFSET] = data.len() as u8;
        self.write_offset = HEADER_SIZE + data.len();
        Ok(())
    }

    /// Writable view of the payload+checksum region, sized for the
    /// declared payload. Used by the transport to assemble a response.
    pub fn body_mut(&mut self) -> &mut [u8] {
        let end = HEADER_SIZE + self.payload_len() + CHECKSUM_SIZE;
        &mut self.buf[HEADER_SIZE..end]
    }

    /// Advance the write cursor after bytes have been placed directly in
    /// the buffer. The checksum byte is never counted.
    pub fn advance(&mut self, n: usize) {
        self.write_offset += n;
    }

    fn calculate_checksum(&self) -> u8 {
        let sum = self.buf[..self.write_offset]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        0xFCu8.wrapping_sub(sum)
    }

    /// Append the checksum at the current write cursor.
    pub fn set_checksum(&mut self) {
        self.buf[self.write_offset] = self.calculate_checksum();
    }

    /// Recompute the checksum and compare it against the stored byte.
    /// A mismatch is logged with both values.
    pub fn verify_checksum(&self) -> bool {
        let computed = self.calculate_checksum();
        let stored = self.buf[self.write_offset];
        if computed == stored {
            return true;
        }
        warn!(computed, stored, "serial message rx checksum failed");
        false
    }

    /// The complete wire frame. Valid once the checksum has been set
    /// (commands) or the body has been received (responses).
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.write_offset + CHECKSUM_SIZE]
    }

    /// Payload byte at `index`.
    pub fn u8_at(&self, index: usize) -> u8 {
        self.buf[HEADER_SIZE + index]
    }

    /// Set payload byte at `index`.
    pub fn set_u8(&mut self, index: usize, value: u8) {
        debug_assert!(index < PAYLOAD_SIZE);
        self.buf[HEADER_SIZE + index] = value;
    }

    /// Big-endian u16 at a payload offset.
    pub fn get_u16(&self, index: usize) -> u16 {
        BigEndian::read_u16(&self.buf[HEADER_SIZE + index..HEADER_SIZE + index + 2])
    }

    /// Big-endian 16-bit value scaled by 1/100.
    pub fn get_float16(&self, index: usize) -> f32 {
        f32::from(self.get_u16(index)) / 100.0
    }

    /// Single-byte value decoded as `(byte / 2) - 40`. Used for most
    /// 8-bit temperatures.
    pub fn get_float8(&self, index: usize) -> f32 {
        f32::from(self.u8_at(index)) / 2.0 - 40.0
    }

    /// Single-byte value decoded as `(byte - 40) / 2`. Used for the DHW
    /// temperature-drop threshold.
    pub fn get_float8_v2(&self, index: usize) -> f32 {
        (f32::from(self.u8_at(index)) - 40.0) / 2.0
    }

    /// Single-byte value decoded as `byte - 80`. Used for min/max flow
    /// temperature.
    pub fn get_float8_v3(&self, index: usize) -> f32 {
        f32::from(self.u8_at(index)) - 80.0
    }

    /// Big-endian 16-bit integer part plus a third byte carrying a /100
    /// fractional remainder. Used for energy counters.
    pub fn get_float24(&self, index: usize) -> f32 {
        let value = f32::from(self.get_u16(index));
        let remainder = f32::from(self.u8_at(index + 2));
        value + remainder / 100.0
    }

    /// Write `round(value * 100)` big-endian at a payload offset.
    pub fn set_float16(&mut self, value: f32, index: usize) {
        let raw = (value * 100.0).round() as u16;
        BigEndian::write_u16(
            &mut self.buf[HEADER_SIZE + index..HEADER_SIZE + index + 2],
            raw,
        );
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.payload_len().min(PAYLOAD_SIZE);
        write!(
            f,
            "{} {{ .hdr {:02x?} .payload {:02x?} .chk {:02x} }}",
            if self.command { "CMD" } else { "RES" },
            &self.buf[..HEADER_SIZE],
            &self.buf[HEADER_SIZE..HEADER_SIZE + len],
            self.buf[HEADER_SIZE + len],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn checksum_roundtrip_all_payload_lengths() {
        for len in 0..=PAYLOAD_SIZE {
            let payload: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let mut msg = Message::command(MsgType::GetCommand);
            msg.write_payload(&payload).unwrap();
            msg.set_checksum();
            assert!(msg.verify_checksum(), "payload length {len}");
        }
    }

    #[test]
    fn checksum_detects_corruption() {
        let mut msg = Message::get(GetType::DefrostState);
        msg.set_checksum();
        assert!(msg.verify_checksum());
        msg.set_u8(3, 0xFF);
        assert!(!msg.verify_checksum());
    }

    #[test]
    fn get_command_wire_shape() {
        let mut msg = Message::get(GetType::DefrostState);
        msg.set_checksum();
        let mut expected = vec![0xFC, 0x42, 0x02, 0x7A, 0x10, 0x02];
        expected.extend_from_slice(&[0u8; 15]);
        expected.push(0x30);
        assert_eq!(msg.frame(), expected.as_slice());
    }

    #[test]
    fn header_rejected_on_magic_mismatch() {
        for (idx, byte) in [(0usize, 0x00u8), (2, 0xFF), (3, 0x00)] {
            let mut header = [HEADER_MAGIC_A, 0x62, HEADER_MAGIC_B, HEADER_MAGIC_C, 0x01];
            header[idx] = byte;
            let mut msg = Message::response();
            msg.write_header(&header).unwrap();
            assert!(!msg.verify_header(), "header byte {idx}");
        }
    }

    #[test]
    fn header_rejected_on_oversized_payload() {
        let mut msg = Message::response();
        msg.write_header(&[HEADER_MAGIC_A, 0x62, HEADER_MAGIC_B, HEADER_MAGIC_C, 17])
            .unwrap();
        assert!(!msg.verify_header());
    }

    #[test]
    fn header_accepted_zero_fills_body() {
        let mut msg = Message::response();
        msg.write_header(&[HEADER_MAGIC_A, 0x62, HEADER_MAGIC_B, HEADER_MAGIC_C, 0x10])
            .unwrap();
        msg.body_mut().fill(0xAA);
        assert!(msg.verify_header());
        assert!(msg.body_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn write_header_requires_exact_length() {
        let mut msg = Message::response();
        assert!(msg.write_header(&[0xFC, 0x62, 0x02]).is_err());
        assert!(msg.write_header(&[0u8; 6]).is_err());
    }

    #[test]
    fn write_payload_rejects_oversize() {
        let mut msg = Message::command(MsgType::SetCommand);
        assert!(msg.write_payload(&[0u8; 17]).is_err());
    }

    #[test]
    fn float16_decoding() {
        let mut msg = Message::get(GetType::TemperatureConfig);
        msg.set_u8(1, 0x09);
        msg.set_u8(2, 0xC4);
        assert_eq!(msg.get_float16(1), 25.00);
    }

    #[test]
    fn float8_decodings_are_distinct() {
        let mut msg = Message::get(GetType::TemperatureConfig);
        msg.set_u8(1, 0x78);
        assert_eq!(msg.get_float8(1), 20.0);
        msg.set_u8(1, 0x50);
        assert_eq!(msg.get_float8_v2(1), 20.0);
        msg.set_u8(1, 0x5A);
        assert_eq!(msg.get_float8_v3(1), 10.0);
    }

    #[test]
    fn float24_decoding() {
        let mut msg = Message::get(GetType::EnergyUsage);
        msg.set_u8(4, 0x00);
        msg.set_u8(5, 0x0A);
        msg.set_u8(6, 0x32);
        assert_eq!(msg.get_float24(4), 10.50);
    }

    #[test]
    fn set_float16_roundtrip() {
        let mut msg = Message::set(SetType::BasicSettings);
        msg.set_float16(21.5, 10);
        assert_eq!(msg.u8_at(10), 0x08);
        assert_eq!(msg.u8_at(11), 0x66);
        assert_eq!(msg.get_float16(10), 21.5);
    }

    #[test]
    fn unknown_kind_and_subtype_bytes() {
        assert_eq!(MsgType::from_wire(0x99), None);
        assert_eq!(GetType::from_wire(0xEE), None);
        assert_eq!(MsgType::from_wire(0x7A), Some(MsgType::ConnectResponse));
        assert_eq!(GetType::from_wire(0xA2), Some(GetType::EnergyDelivery));
    }

    #[test]
    fn debug_dump_distinguishes_commands_from_responses() {
        let mut cmd = Message::get(GetType::FlowRate);
        cmd.set_checksum();
        assert!(format!("{cmd:?}").starts_with("CMD"));
        let res = Message::response();
        assert!(format!("{res:?}").starts_with("RES"));
    }
}
