//! Heat pump link
//!
//! Owns the connection life-cycle: the connect handshake, the periodic
//! status-refresh cadence, reconnection after silence or dispatch failure,
//! and the receive loop that routes frames to their handlers. This is the
//! context object external collaborators (publisher, portal) talk to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::protocol::channel::{open_channel, Channel};
use crate::protocol::message::{
    Message, MsgType, SetHpMode, SetType, SetZone, SET_FLAG_DHW_MODE, SET_FLAG_DHW_TEMPERATURE,
    SET_FLAG_HOLIDAY_TOGGLE, SET_FLAG_HP_MODE, SET_FLAG_MODE_TOGGLE, SET_FLAG_ZONE_TEMPERATURE,
};
use crate::protocol::queue::CommandQueue;
use crate::protocol::transport::{Sender, Transport};
use crate::protocol::{ConnectionState, LinkCounters, ProtocolError, StateCell};
use crate::status::{DhwMode, Status};

/// Payload of the connect handshake command.
const CONNECT_PAYLOAD: [u8; 2] = [0xCA, 0x01];

/// Pause before retrying after an unexpected receive failure.
const RX_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Set-point granularity the thermostat accepts.
pub const TEMPERATURE_STEP: f32 = 0.5;
/// Lowest accepted zone target temperature.
pub const MIN_THERMOSTAT_TEMPERATURE: f32 = 8.0;
/// Highest accepted zone target temperature.
pub const MAX_THERMOSTAT_TEMPERATURE: f32 = 28.0;
/// Lowest accepted DHW target temperature.
pub const MIN_DHW_TEMPERATURE: f32 = 40.0;
/// Highest accepted DHW target temperature.
pub const MAX_DHW_TEMPERATURE: f32 = 60.0;

/// Accepted flow-temperature target range for the given direction.
pub fn flow_target_temperature_range(cooling: bool) -> (f32, f32) {
    if cooling {
        (5.0, 25.0)
    } else {
        (20.0, 60.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one heat pump link.
///
/// Create it with [`HeatPump::initialize`], then drive [`HeatPump::tick`]
/// from a scheduler loop. A background thread owns the receiving half of
/// the channel; setting changes and snapshot reads may come from any
/// thread holding the handle.
pub struct HeatPump {
    config: LinkConfig,
    queue: Arc<CommandQueue>,
    status: Arc<Mutex<Status>>,
    state: Arc<StateCell>,
    counters: Arc<LinkCounters>,
    last_rx: Arc<Mutex<Option<Instant>>>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    last_connect_attempt: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl HeatPump {
    /// Open the configured channel and start the link. The connect
    /// handshake is fired immediately; a failure there is not fatal, the
    /// periodic tick keeps retrying.
    pub fn initialize(config: LinkConfig) -> Result<Self, ProtocolError> {
        info!(
            port = %config.port_name,
            baud = config.baud_rate,
            "initializing heat pump link"
        );
        let writer = open_channel(&config)?;
        let reader = writer.try_clone()?;
        Self::attach(config, reader, writer)
    }

    /// Assemble a link over explicit channel halves. Tests and demo
    /// setups pass [`MemoryChannel`](crate::protocol::MemoryChannel)
    /// handles here.
    pub fn attach(
        config: LinkConfig,
        reader: Box<dyn Channel>,
        writer: Box<dyn Channel>,
    ) -> Result<Self, ProtocolError> {
        let counters = Arc::new(LinkCounters::default());
        let state = Arc::new(StateCell::new(ConnectionState::Disconnected));
        let status = Arc::new(Mutex::new(Status::default()));
        let last_rx = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let sender = Sender::new(writer, counters.clone(), config.dump_packets);
        let queue = Arc::new(CommandQueue::new(sender, state.clone()));
        let transport = Transport::new(reader, queue.clone(), counters.clone(), config.dump_packets);

        let rx = RxLoop {
            transport,
            queue: queue.clone(),
            status: status.clone(),
            state: state.clone(),
            last_rx: last_rx.clone(),
            running: running.clone(),
        };
        let rx_thread = thread::Builder::new()
            .name("heatlink-rx".into())
            .spawn(move || rx.run())?;

        let mut link = Self {
            config,
            queue,
            status,
            state,
            counters,
            last_rx,
            running,
            rx_thread: Some(rx_thread),
            last_connect_attempt: None,
            last_refresh: None,
        };
        if !link.begin_connect() {
            warn!("failed to start heat pump connection procedure");
        }
        Ok(link)
    }

    /// Send the connect handshake, bypassing the backlog: there is no
    /// connection context yet for queued exchanges to run in.
    pub fn begin_connect(&mut self) -> bool {
        let mut cmd = Message::command(MsgType::ConnectCommand);
        if cmd.write_payload(&CONNECT_PAYLOAD).is_err() {
            return false;
        }

        self.last_connect_attempt = Some(Instant::now());
        self.state.set(ConnectionState::Connecting);
        match self.queue.send_direct(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to tx connect command: {e}");
                self.state.set(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Drive the connection state machine. Call this on a coarse cadence
    /// (about once a second) from the owning scheduler loop.
    pub fn tick(&mut self) {
        match self.state.get() {
            ConnectionState::Connected => {
                if self.rx_silence_exceeded() {
                    warn!(
                        silence = ?self.config.silence_timeout,
                        "no traffic from heat pump, dropping connection"
                    );
                    self.state.set(ConnectionState::Disconnected);
                    return;
                }
                let refresh_due = self
                    .last_refresh
                    .map(|t| t.elapsed() >= self.config.refresh_interval)
                    .unwrap_or(true);
                if refresh_due && !self.refresh_status() {
                    warn!("failed to begin heat pump status update");
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                let retry_due = self
                    .last_connect_attempt
                    .map(|t| t.elapsed() >= self.config.reconnect_interval)
                    .unwrap_or(true);
                if retry_due && !self.begin_connect() {
                    warn!("failed to start heat pump connection procedure");
                }
            }
        }
    }

    fn rx_silence_exceeded(&self) -> bool {
        (*lock(&self.last_rx))
            .map(|t| t.elapsed() > self.config.silence_timeout)
            .unwrap_or(false)
    }

    /// Queue a full status-refresh batch and dispatch its first command.
    pub fn refresh_status(&mut self) -> bool {
        self.last_refresh = Some(Instant::now());
        self.queue.enqueue_status_refresh();
        self.queue.dispatch_next().is_ok()
    }

    /// True once the connect handshake has been acknowledged.
    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    /// Current life-cycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Snapshot of the last-known device state.
    pub fn get_status(&self) -> Status {
        lock(&self.status).clone()
    }

    /// Valid frames received so far.
    pub fn rx_frame_count(&self) -> u64 {
        self.counters.rx_frames()
    }

    /// Frames transmitted so far.
    pub fn tx_frame_count(&self) -> u64 {
        self.counters.tx_frames()
    }

    /// Commands queued and not yet transmitted.
    pub fn pending_command_count(&self) -> usize {
        self.queue.backlog_len()
    }

    /// Device model label for entity announcements.
    pub fn device_model(&self) -> &'static str {
        "Air Source Heat Pump"
    }

    /// Change the zone 1 target room temperature.
    pub fn set_zone1_target_temperature(&self, temperature: f32) -> bool {
        if temperature > MAX_THERMOSTAT_TEMPERATURE {
            warn!(temperature, "thermostat setting exceeds maximum allowed");
            return false;
        }
        if temperature < MIN_THERMOSTAT_TEMPERATURE {
            warn!(temperature, "thermostat setting is lower than minimum allowed");
            return false;
        }

        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_ZONE_TEMPERATURE);
        cmd.set_u8(2, SetZone::Zone1 as u8);
        cmd.set_float16(temperature, 10);
        self.submit_set(cmd, "zone 1 target temperature")
    }

    /// Change the zone 1 flow temperature target. The accepted range
    /// depends on whether the unit is currently heating or cooling.
    pub fn set_zone1_flow_target_temperature(&self, temperature: f32) -> bool {
        let cooling = lock(&self.status).heating_cooling_mode.is_cooling();
        let (min, max) = flow_target_temperature_range(cooling);
        if temperature > max {
            warn!(temperature, max, "zone 1 flow setting exceeds maximum allowed");
            return false;
        }
        if temperature < min {
            warn!(temperature, min, "zone 1 flow setting is lower than minimum allowed");
            return false;
        }

        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_ZONE_TEMPERATURE);
        cmd.set_u8(2, SetZone::Zone1 as u8);
        cmd.set_u8(6, SetHpMode::FlowControl as u8);
        cmd.set_float16(temperature, 10);
        self.submit_set(cmd, "zone 1 flow target temperature")
    }

    /// Change the DHW target temperature.
    pub fn set_dhw_target_temperature(&self, temperature: f32) -> bool {
        if temperature > MAX_DHW_TEMPERATURE {
            warn!(temperature, "dhw setting exceeds maximum allowed");
            return false;
        }
        if temperature < MIN_DHW_TEMPERATURE {
            warn!(temperature, "dhw setting is lower than minimum allowed");
            return false;
        }

        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_DHW_TEMPERATURE);
        cmd.set_float16(temperature, 8);
        self.submit_set(cmd, "dhw target temperature")
    }

    /// Change the DHW production mode. Accepts the bus-facing values
    /// "off", "performance" and "eco".
    pub fn set_dhw_mode(&self, mode: &str) -> bool {
        let dhw_mode = match mode {
            "off" => return self.set_dhw_force(false),
            "performance" => DhwMode::Normal,
            "eco" => DhwMode::Eco,
            _ => {
                warn!(mode, "unsupported dhw mode");
                return false;
            }
        };

        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_DHW_MODE);
        cmd.set_u8(5, dhw_mode as u8);
        self.submit_set(cmd, "dhw mode")
    }

    /// Toggle the forced DHW boost.
    pub fn set_dhw_force(&self, on: bool) -> bool {
        let mut cmd = Message::set(SetType::DhwSetting);
        cmd.set_u8(1, SET_FLAG_MODE_TOGGLE);
        cmd.set_u8(3, on as u8);
        self.submit_set(cmd, "dhw force")
    }

    /// Toggle holiday mode.
    pub fn set_holiday_mode(&self, on: bool) -> bool {
        let mut cmd = Message::set(SetType::DhwSetting);
        cmd.set_u8(1, SET_FLAG_HOLIDAY_TOGGLE);
        cmd.set_u8(4, on as u8);
        self.submit_set(cmd, "holiday mode")
    }

    /// Switch the unit between standby and on.
    pub fn set_power_mode(&self, on: bool) -> bool {
        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_MODE_TOGGLE);
        cmd.set_u8(3, on as u8);
        self.submit_set(cmd, "power mode")
    }

    /// Change the heating/cooling control strategy (wire mode index).
    pub fn set_hp_mode(&self, mode: u8) -> bool {
        if mode > 4 {
            warn!(mode, "heat pump mode index out of range");
            return false;
        }
        let mut cmd = Message::set(SetType::BasicSettings);
        cmd.set_u8(1, SET_FLAG_HP_MODE);
        cmd.set_u8(6, mode);
        self.submit_set(cmd, "heat pump mode")
    }

    fn submit_set(&self, cmd: Message, what: &str) -> bool {
        self.queue.enqueue_set(cmd);
        match self.queue.dispatch_next() {
            Ok(()) => true,
            Err(e) => {
                warn!("command dispatch failed for {what} setting: {e}");
                false
            }
        }
    }

    /// Stop the receive loop and release the channel. Also runs on drop.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeatPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The long-lived receive task: wait for a frame, route it by kind,
/// advance the command queue.
struct RxLoop {
    transport: Transport,
    queue: Arc<CommandQueue>,
    status: Arc<Mutex<Status>>,
    state: Arc<StateCell>,
    last_rx: Arc<Mutex<Option<Instant>>>,
    running: Arc<AtomicBool>,
}

impl RxLoop {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            match self.transport.receive() {
                Ok(Some(msg)) => {
                    *lock(&self.last_rx) = Some(Instant::now());
                    self.route(msg);
                }
                // Bounded wait elapsed without a frame starting.
                Ok(None) => {}
                Err(ProtocolError::Channel(_)) => {
                    // Channel-level failures can repeat immediately; back
                    // off instead of spinning on a dead descriptor.
                    thread::sleep(RX_RETRY_DELAY);
                }
                // Framing errors already resynchronized the line.
                Err(_) => {}
            }
        }
        debug!("receive loop stopped");
    }

    fn route(&mut self, msg: Message) {
        match msg.msg_type() {
            Some(MsgType::SetResponse) => {
                debug!("settings change acknowledged");
            }
            Some(MsgType::GetResponse) => self.handle_get_response(&msg),
            Some(MsgType::ConnectResponse) => {
                info!("connection reply received from heat pump");
                self.state.set(ConnectionState::Connected);
            }
            Some(MsgType::ExtConnectResponse) => {
                warn!("unexpected extended connection response");
            }
            Some(other) => {
                warn!(kind = ?other, "unexpected serial message type received");
            }
            None => {
                warn!(kind = msg.kind_byte(), "unknown serial message type received");
            }
        }
    }

    fn handle_get_response(&mut self, res: &Message) {
        {
            let mut status = lock(&self.status);
            status.apply_get_response(res);
        }
        // Status lock released before the queue lock is taken.
        if let Err(e) = self.queue.dispatch_next() {
            warn!("failed to dispatch status update command: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_ranges_by_direction() {
        assert_eq!(flow_target_temperature_range(false), (20.0, 60.0));
        assert_eq!(flow_target_temperature_range(true), (5.0, 25.0));
    }

    #[test]
    fn connect_payload_shape() {
        let mut cmd = Message::command(MsgType::ConnectCommand);
        cmd.write_payload(&CONNECT_PAYLOAD).unwrap();
        cmd.set_checksum();
        assert_eq!(cmd.frame(), &[0xFC, 0x5A, 0x02, 0x7A, 0x02, 0xCA, 0x01, 0x5D]);
    }
}
