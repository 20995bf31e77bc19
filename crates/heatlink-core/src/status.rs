//! Shared status model
//!
//! The last-observed operating state of the heat pump. Each GET response
//! updates only the fields its status group carries, so a snapshot may
//! mix data from adjacent poll cycles, bounded by the refresh interval.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::message::{GetType, Message};

/// Sentinel reported for a zone temperature the installed system does not
/// measure.
const UNREPORTED_TEMPERATURE: u16 = 0xF0C4;

/// Main power state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerMode {
    /// Unit is in standby.
    #[default]
    Standby,
    /// Unit is on.
    On,
}

impl PowerMode {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PowerMode::Standby),
            1 => Some(PowerMode::On),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            PowerMode::Standby => "Standby",
            PowerMode::On => "On",
        }
    }
}

/// What the unit is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    /// Idle.
    #[default]
    Off,
    /// Producing domestic hot water.
    HotWater,
    /// Space heating.
    Heating,
    /// Space cooling.
    Cooling,
    /// Frost protection cycle.
    FrostProtect,
    /// Legionella prevention cycle.
    LegionellaPrevention,
}

impl OperationMode {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OperationMode::Off),
            1 => Some(OperationMode::HotWater),
            2 => Some(OperationMode::Heating),
            3 => Some(OperationMode::Cooling),
            5 => Some(OperationMode::FrostProtect),
            6 => Some(OperationMode::LegionellaPrevention),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            OperationMode::Off => "Off",
            OperationMode::HotWater => "Heating Water",
            OperationMode::Heating => "Space Heating",
            OperationMode::Cooling => "Space Cooling",
            OperationMode::FrostProtect => "Frost Protection",
            OperationMode::LegionellaPrevention => "Legionella Prevention",
        }
    }
}

/// Domestic hot water production mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhwMode {
    /// Full-rate hot water production.
    #[default]
    Normal,
    /// Economy hot water production.
    Eco,
}

impl DhwMode {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DhwMode::Normal),
            1 => Some(DhwMode::Eco),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DhwMode::Normal => "Normal",
            DhwMode::Eco => "Eco",
        }
    }
}

/// Space heating/cooling control strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HpMode {
    /// Heat towards a room temperature target.
    #[default]
    HeatRoomTemp,
    /// Heat towards a fixed flow temperature.
    HeatFlowTemp,
    /// Heat along the weather compensation curve.
    HeatCompensationCurve,
    /// Cool towards a room temperature target.
    CoolRoomTemp,
    /// Cool towards a fixed flow temperature.
    CoolFlowTemp,
}

impl HpMode {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(HpMode::HeatRoomTemp),
            1 => Some(HpMode::HeatFlowTemp),
            2 => Some(HpMode::HeatCompensationCurve),
            3 => Some(HpMode::CoolRoomTemp),
            4 => Some(HpMode::CoolFlowTemp),
            _ => None,
        }
    }

    /// True for the cooling strategies.
    pub fn is_cooling(&self) -> bool {
        matches!(self, HpMode::CoolRoomTemp | HpMode::CoolFlowTemp)
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            HpMode::HeatRoomTemp => "Heat Target Temperature",
            HpMode::HeatFlowTemp => "Heat Flow Temperature",
            HpMode::HeatCompensationCurve => "Heat Compensation Curve",
            HpMode::CoolRoomTemp => "Cool Target Temperature",
            HpMode::CoolFlowTemp => "Cool Flow Temperature",
        }
    }
}

/// Last-known operating state of the heat pump, guarded by one lock in
/// the link and handed out to consumers as cloned snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Defrost cycle active.
    pub defrost_active: bool,
    /// Forced DHW boost active.
    pub dhw_forced_active: bool,
    /// Heat output power.
    pub output_power: u8,
    /// Compressor frequency in Hz.
    pub compressor_frequency: u8,
    /// Primary circuit flow rate in l/min.
    pub flow_rate: u8,

    /// Zone 1 target room temperature.
    pub zone1_set_temperature: f32,
    /// Zone 1 flow temperature set-point.
    pub zone1_flow_setpoint: f32,
    /// Zone 1 measured room temperature.
    pub zone1_room_temperature: f32,
    /// Zone 2 target room temperature.
    pub zone2_set_temperature: f32,
    /// Zone 2 flow temperature set-point.
    pub zone2_flow_setpoint: f32,
    /// Zone 2 measured room temperature (0.0 when not reported).
    pub zone2_room_temperature: f32,
    /// Legionella prevention set-point.
    pub legionella_setpoint: f32,
    /// DHW re-heat temperature drop threshold.
    pub dhw_temperature_drop: f32,
    /// Maximum allowed flow temperature.
    pub maximum_flow_temperature: f32,
    /// Minimum allowed flow temperature.
    pub minimum_flow_temperature: f32,
    /// Outside air temperature.
    pub outside_temperature: f32,
    /// DHW circuit feed temperature.
    pub dhw_feed_temperature: f32,
    /// DHW circuit return temperature.
    pub dhw_return_temperature: f32,
    /// DHW tank temperature.
    pub dhw_temperature: f32,
    /// Boiler flow temperature.
    pub boiler_flow_temperature: f32,
    /// Boiler return temperature.
    pub boiler_return_temperature: f32,
    /// DHW flow temperature set-point.
    pub dhw_flow_setpoint: f32,
    /// Radiator flow temperature set-point.
    pub radiator_flow_setpoint: f32,

    /// Main power state.
    pub power: PowerMode,
    /// Current operation.
    pub operation: OperationMode,
    /// Hot water production mode.
    pub hot_water_mode: DhwMode,
    /// Heating/cooling control strategy.
    pub heating_cooling_mode: HpMode,
    /// Holiday mode active.
    pub holiday_mode: bool,
    /// DHW timer program active.
    pub dhw_timer_mode: bool,

    /// Energy consumed for space heating, kWh.
    pub energy_consumed_heating: f32,
    /// Energy consumed for space cooling, kWh.
    pub energy_consumed_cooling: f32,
    /// Energy consumed for hot water, kWh.
    pub energy_consumed_dhw: f32,
    /// Energy delivered for space heating, kWh.
    pub energy_delivered_heating: f32,
    /// Energy delivered for space cooling, kWh.
    pub energy_delivered_cooling: f32,
    /// Energy delivered for hot water, kWh.
    pub energy_delivered_dhw: f32,
}

impl Status {
    /// Fold one GET response into the model. Only the fields carried by
    /// the response's status group change; an unrecognized sub-type is
    /// logged and changes nothing.
    pub fn apply_get_response(&mut self, res: &Message) {
        let Some(group) = res.get_type() else {
            debug!(
                code = res.u8_at(0),
                "unknown status group received on serial port"
            );
            return;
        };

        match group {
            GetType::DefrostState => self.defrost_active = res.u8_at(3) != 0,
            GetType::CompressorFrequency => self.compressor_frequency = res.u8_at(1),
            GetType::ForcedDhwState => self.dhw_forced_active = res.u8_at(7) != 0,
            GetType::HeatingPower => self.output_power = res.u8_at(6),
            GetType::TemperatureConfig => {
                self.zone1_set_temperature = res.get_float16(1);
                self.zone2_set_temperature = res.get_float16(3);
                self.zone1_flow_setpoint = res.get_float16(5);
                self.zone2_flow_setpoint = res.get_float16(7);
                self.legionella_setpoint = res.get_float16(9);
                self.dhw_temperature_drop = res.get_float8_v2(11);
                self.maximum_flow_temperature = res.get_float8_v3(12);
                self.minimum_flow_temperature = res.get_float8_v3(13);
            }
            GetType::RoomTemperatureState => {
                self.zone1_room_temperature = res.get_float16(1);
                self.zone2_room_temperature = if res.get_u16(3) == UNREPORTED_TEMPERATURE {
                    0.0
                } else {
                    res.get_float16(3)
                };
                self.outside_temperature = res.get_float8(11);
            }
            GetType::DhwTemperatureA => {
                self.dhw_feed_temperature = res.get_float16(1);
                self.dhw_return_temperature = res.get_float16(4);
                self.dhw_temperature = res.get_float16(7);
            }
            GetType::DhwTemperatureB => {
                self.boiler_flow_temperature = res.get_float16(1);
                self.boiler_return_temperature = res.get_float16(4);
            }
            GetType::ActiveTime => {}
            GetType::FlowRate => self.flow_rate = res.u8_at(12),
            GetType::ModeFlagsA => {
                self.set_power_mode(res.u8_at(3));
                self.set_operation_mode(res.u8_at(4));
                self.set_dhw_mode(res.u8_at(5));
                self.set_heating_cooling_mode(res.u8_at(6));
                self.dhw_flow_setpoint = res.get_float16(8);
                self.radiator_flow_setpoint = res.get_float16(12);
            }
            GetType::ModeFlagsB => {
                self.holiday_mode = res.u8_at(4) > 0;
                self.dhw_timer_mode = res.u8_at(5) > 0;
            }
            GetType::EnergyUsage => {
                self.energy_consumed_heating = res.get_float24(4);
                self.energy_consumed_cooling = res.get_float24(7);
                self.energy_consumed_dhw = res.get_float24(10);
            }
            GetType::EnergyDelivery => {
                self.energy_delivered_heating = res.get_float24(4);
                self.energy_delivered_cooling = res.get_float24(7);
                self.energy_delivered_dhw = res.get_float24(10);
            }
        }
    }

    fn set_power_mode(&mut self, byte: u8) {
        match PowerMode::from_wire(byte) {
            Some(mode) => self.power = mode,
            None => debug!(byte, "unknown power mode"),
        }
    }

    fn set_operation_mode(&mut self, byte: u8) {
        match OperationMode::from_wire(byte) {
            Some(mode) => self.operation = mode,
            None => debug!(byte, "unknown operation mode"),
        }
    }

    fn set_dhw_mode(&mut self, byte: u8) {
        match DhwMode::from_wire(byte) {
            Some(mode) => self.hot_water_mode = mode,
            None => debug!(byte, "unknown hot water mode"),
        }
    }

    fn set_heating_cooling_mode(&mut self, byte: u8) {
        match HpMode::from_wire(byte) {
            Some(mode) => self.heating_cooling_mode = mode,
            None => debug!(byte, "unknown heating/cooling mode"),
        }
    }

    /// Coarse climate mode for the automation hub: "heat", "cool" or
    /// "off".
    pub fn climate_mode(&self) -> &'static str {
        match self.power {
            PowerMode::On if self.heating_cooling_mode.is_cooling() => "cool",
            PowerMode::On => "heat",
            PowerMode::Standby => "off",
        }
    }

    /// Coarse climate action for the automation hub: "heating", "cooling"
    /// or "idle".
    pub fn climate_action(&self) -> &'static str {
        match self.operation {
            OperationMode::Heating | OperationMode::FrostProtect => "heating",
            OperationMode::Cooling => "cooling",
            _ => "idle",
        }
    }

    /// Hot water mode label, "Off" while no hot water is being produced.
    pub fn dhw_mode_label(&self) -> &'static str {
        match self.operation {
            OperationMode::HotWater | OperationMode::LegionellaPrevention => {
                self.hot_water_mode.label()
            }
            _ => "Off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::MsgType;
    use pretty_assertions::assert_eq;

    fn get_response(group: u8, fields: &[(usize, u8)]) -> Message {
        let mut res = Message::command(MsgType::GetResponse);
        let mut payload = [0u8; 16];
        payload[0] = group;
        for (idx, byte) in fields {
            payload[*idx] = *byte;
        }
        res.write_payload(&payload).unwrap();
        res
    }

    #[test]
    fn defrost_state_mapping() {
        let mut status = Status::default();
        status.apply_get_response(&get_response(0x02, &[(3, 1)]));
        assert!(status.defrost_active);
        status.apply_get_response(&get_response(0x02, &[]));
        assert!(!status.defrost_active);
    }

    #[test]
    fn temperature_config_mapping() {
        let mut status = Status::default();
        // Zone 1 set 25.00, DHW drop (0x50-40)/2 = 20.0, max flow 0x5A-80 = 10.0
        status.apply_get_response(&get_response(
            0x09,
            &[(1, 0x09), (2, 0xC4), (11, 0x50), (12, 0x5A), (13, 0x64)],
        ));
        assert_eq!(status.zone1_set_temperature, 25.00);
        assert_eq!(status.dhw_temperature_drop, 20.0);
        assert_eq!(status.maximum_flow_temperature, 10.0);
        assert_eq!(status.minimum_flow_temperature, 20.0);
    }

    #[test]
    fn room_temperature_mapping_with_sentinel() {
        let mut status = Status::default();
        // Zone 1 at 21.34, zone 2 carries the not-reported sentinel.
        status.apply_get_response(&get_response(
            0x0B,
            &[(1, 0x08), (2, 0x56), (3, 0xF0), (4, 0xC4), (11, 0x78)],
        ));
        assert_eq!(status.zone1_room_temperature, 21.34);
        assert_eq!(status.zone2_room_temperature, 0.0);
        assert_eq!(status.outside_temperature, 20.0);

        // A real zone 2 reading replaces the sentinel default.
        status.apply_get_response(&get_response(0x0B, &[(3, 0x07), (4, 0xD0)]));
        assert_eq!(status.zone2_room_temperature, 20.0);
    }

    #[test]
    fn mode_flags_mapping() {
        let mut status = Status::default();
        status.apply_get_response(&get_response(
            0x26,
            &[(3, 1), (4, 2), (5, 1), (6, 4), (8, 0x13), (9, 0x88)],
        ));
        assert_eq!(status.power, PowerMode::On);
        assert_eq!(status.operation, OperationMode::Heating);
        assert_eq!(status.hot_water_mode, DhwMode::Eco);
        assert_eq!(status.heating_cooling_mode, HpMode::CoolFlowTemp);
        assert_eq!(status.dhw_flow_setpoint, 50.0);

        status.apply_get_response(&get_response(0x28, &[(4, 1), (5, 1)]));
        assert!(status.holiday_mode);
        assert!(status.dhw_timer_mode);
    }

    #[test]
    fn unknown_mode_bytes_leave_fields_unchanged() {
        let mut status = Status {
            operation: OperationMode::Heating,
            ..Status::default()
        };
        // Operation byte 4 is not assigned by the firmware.
        status.apply_get_response(&get_response(0x26, &[(4, 4)]));
        assert_eq!(status.operation, OperationMode::Heating);
    }

    #[test]
    fn energy_counter_mapping() {
        let mut status = Status::default();
        status.apply_get_response(&get_response(
            0xA1,
            &[(4, 0x00), (5, 0x0A), (6, 0x32), (10, 0x01), (11, 0x00)],
        ));
        assert_eq!(status.energy_consumed_heating, 10.50);
        assert_eq!(status.energy_consumed_dhw, 256.0);
    }

    #[test]
    fn unknown_status_group_changes_nothing() {
        let mut status = Status::default();
        let before = status.clone();
        status.apply_get_response(&get_response(0xEE, &[(3, 1), (7, 9)]));
        assert_eq!(status, before);
    }

    #[test]
    fn climate_labels() {
        let mut status = Status::default();
        assert_eq!(status.climate_mode(), "off");
        assert_eq!(status.climate_action(), "idle");

        status.power = PowerMode::On;
        status.heating_cooling_mode = HpMode::HeatFlowTemp;
        status.operation = OperationMode::Heating;
        assert_eq!(status.climate_mode(), "heat");
        assert_eq!(status.climate_action(), "heating");

        status.heating_cooling_mode = HpMode::CoolRoomTemp;
        status.operation = OperationMode::Cooling;
        assert_eq!(status.climate_mode(), "cool");
        assert_eq!(status.climate_action(), "cooling");
    }

    #[test]
    fn dhw_label_follows_operation() {
        let mut status = Status::default();
        status.hot_water_mode = DhwMode::Eco;
        assert_eq!(status.dhw_mode_label(), "Off");
        status.operation = OperationMode::HotWater;
        assert_eq!(status.dhw_mode_label(), "Eco");
    }
}
