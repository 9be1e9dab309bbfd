//! Decoder for the telemetry a battery management system and its charger
//! broadcast on a 29 bit CAN bus.

pub mod can_frame;
pub mod codec;
pub mod telemetry_cache;

use core::fmt::{Display, Formatter};

use codec::{
    cell_volts, current_amps, deci_amps, deci_volts, temperature_celsius, u16_from_bytes,
    CellStatus, ChargeCommand, ChargerStatus, FaultLevel, PackStatus,
};
use serde::Serialize;
pub use telemetry_cache::TelemetryCache;

/// Mask of the 29 identifier bits of a SocketCAN `can_id`
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

// Consumed identifiers, written with the extended-frame flag in bit 31
pub const BASIC_INFO_1_ID: u32 = 0x98FF28F4;
pub const BASIC_INFO_2_ID: u32 = 0x98FE28F4;
pub const CHARGING_DEMAND_ID: u32 = 0x98FFE5F4;
pub const CHARGER_FEEDBACK_ID: u32 = 0x98FF50E5;

/// Remote frame the BMS answers with its broadcast
pub const REQUEST_ID: u32 = 0x18FF28F4;

pub const CELL_PACKET_FUNCTIONS: core::ops::RangeInclusive<u8> = 0xC8..=0xCC;
pub const TEMPERATURE_PACKET_FUNCTIONS: core::ops::RangeInclusive<u8> = 0xB4..=0xC6;

const CELLS_PER_FRAME: usize = 4;
/// Cell decoding stops before this index
const CELL_INDEX_LIMIT: usize = 19;
const DECODED_PROBES: usize = 3;

pub fn packet_function(id: u32) -> u8 {
    ((id >> 16) & 0xFF) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    BasicInfo1,
    BasicInfo2,
    ChargingDemand,
    ChargerFeedback,
    CellVoltages { first_cell: usize },
    Temperatures,
    Unknown,
}

impl MessageKind {
    /// Exact identifiers take precedence over the packet-function ranges.
    /// Packet functions between the two ranges (0xC7) are unknown.
    pub fn from_id(id: u32) -> Self {
        const BASIC_INFO_1: u32 = BASIC_INFO_1_ID & CAN_EFF_MASK;
        const BASIC_INFO_2: u32 = BASIC_INFO_2_ID & CAN_EFF_MASK;
        const CHARGING_DEMAND: u32 = CHARGING_DEMAND_ID & CAN_EFF_MASK;
        const CHARGER_FEEDBACK: u32 = CHARGER_FEEDBACK_ID & CAN_EFF_MASK;

        match id & CAN_EFF_MASK {
            BASIC_INFO_1 => Self::BasicInfo1,
            BASIC_INFO_2 => Self::BasicInfo2,
            CHARGING_DEMAND => Self::ChargingDemand,
            CHARGER_FEEDBACK => Self::ChargerFeedback,
            other => match packet_function(other) {
                pf if CELL_PACKET_FUNCTIONS.contains(&pf) => Self::CellVoltages {
                    first_cell: first_cell_of(pf),
                },
                pf if TEMPERATURE_PACKET_FUNCTIONS.contains(&pf) => Self::Temperatures,
                _ => Self::Unknown,
            },
        }
    }
}

fn first_cell_of(packet_function: u8) -> usize {
    match packet_function {
        0xC8 => 0,
        0xC9 => 4,
        0xCA => 8,
        0xCB => 12,
        _ => 16,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BmsCanData {
    BasicInfo1(BasicInfo1),
    BasicInfo2(BasicInfo2),
    ChargingDemand(ChargingDemand),
    ChargerFeedback(ChargerFeedback),
    CellVoltages(CellVoltages),
    Temperatures(Temperatures),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInfo1 {
    pub status: PackStatus,
    pub state_of_charge: u8,
    pub current: f32,
    pub voltage: f32,
    pub fault_level: FaultLevel,
    pub fault_code: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInfo2 {
    pub max_cell_voltage: f32,
    pub min_cell_voltage: f32,
    pub max_temperature: i16,
    pub min_temperature: i16,
    pub max_discharge_current: f32,
}

impl BasicInfo2 {
    pub fn imbalance(&self) -> f32 {
        self.max_cell_voltage - self.min_cell_voltage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingDemand {
    pub target_voltage: f32,
    pub target_current: f32,
    pub command: ChargeCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargerFeedback {
    pub output_voltage: f32,
    pub output_current: f32,
    /// Only sent by chargers that transmit more than 4 bytes
    pub status: Option<ChargerStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellVoltages {
    pub first_cell: usize,
    pub voltages: heapless::Vec<f32, CELLS_PER_FRAME>,
}

impl CellVoltages {
    /// Zero based cell index with its voltage
    pub fn cells(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.voltages
            .iter()
            .enumerate()
            .map(|(offset, volts)| (self.first_cell + offset, *volts))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Temperatures {
    pub probes: [i16; DECODED_PROBES],
}

/// Outcome of routing one frame through the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(BmsCanData),
    /// Known identifier, but the payload is too short for it
    Malformed(MessageKind),
    Unknown(u32),
}

pub fn parse_bms_can_data(can_frame: &can_frame::CanFrame) -> Option<BmsCanData> {
    decode_kind(MessageKind::from_id(can_frame.raw_id()), &can_frame.data)
}

/// Decodes a frame and records cell voltages and probe readings in `cache`
pub fn decode_frame(can_frame: &can_frame::CanFrame, cache: &mut TelemetryCache) -> Decoded {
    let kind = MessageKind::from_id(can_frame.raw_id());
    if kind == MessageKind::Unknown {
        return Decoded::Unknown(can_frame.raw_id());
    }

    match decode_kind(kind, &can_frame.data) {
        Some(data) => {
            cache.ingest(&data);
            Decoded::Message(data)
        }
        None => Decoded::Malformed(kind),
    }
}

fn decode_kind(kind: MessageKind, data: &[u8]) -> Option<BmsCanData> {
    match kind {
        MessageKind::BasicInfo1 => Some(BmsCanData::BasicInfo1(BasicInfo1 {
            status: PackStatus::from_raw(*data.first()?),
            state_of_charge: *data.get(1)?,
            current: current_amps(le_u16(data, 2)?),
            voltage: deci_volts(le_u16(data, 4)?),
            fault_level: FaultLevel::from_raw(*data.get(6)?),
            fault_code: *data.get(7)?,
        })),
        MessageKind::BasicInfo2 => Some(BmsCanData::BasicInfo2(BasicInfo2 {
            max_cell_voltage: cell_volts(le_u16(data, 0)?),
            min_cell_voltage: cell_volts(le_u16(data, 2)?),
            max_temperature: temperature_celsius(*data.get(4)?),
            min_temperature: temperature_celsius(*data.get(5)?),
            max_discharge_current: deci_amps(le_u16(data, 6)?),
        })),
        MessageKind::ChargingDemand => Some(BmsCanData::ChargingDemand(ChargingDemand {
            target_voltage: deci_volts(le_u16(data, 0)?),
            target_current: deci_amps(le_u16(data, 2)?),
            command: ChargeCommand::from_flags(*data.get(4)?),
        })),
        MessageKind::ChargerFeedback => Some(BmsCanData::ChargerFeedback(ChargerFeedback {
            output_voltage: deci_volts(le_u16(data, 0)?),
            output_current: deci_amps(le_u16(data, 2)?),
            status: data.get(4).copied().map(ChargerStatus),
        })),
        MessageKind::CellVoltages { first_cell } => {
            let mut voltages = heapless::Vec::new();
            for (offset, pair) in data.chunks_exact(2).take(CELLS_PER_FRAME).enumerate() {
                if first_cell + offset >= CELL_INDEX_LIMIT {
                    break;
                }
                // cell pairs are sent high byte first
                voltages
                    .push(cell_volts(u16_from_bytes(pair[1], pair[0])))
                    .ok()?;
            }
            Some(BmsCanData::CellVoltages(CellVoltages {
                first_cell,
                voltages,
            }))
        }
        MessageKind::Temperatures => {
            let bytes = data.get(0..DECODED_PROBES)?;
            let mut probes = [0; DECODED_PROBES];
            for (probe, raw) in probes.iter_mut().zip(bytes) {
                *probe = temperature_celsius(*raw);
            }
            Some(BmsCanData::Temperatures(Temperatures { probes }))
        }
        MessageKind::Unknown => None,
    }
}

/// Low byte at `offset`, high byte right after it
fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16_from_bytes(*data.get(offset)?, *data.get(offset + 1)?))
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

impl Display for BmsCanData {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BasicInfo1(data) => data.fmt(f),
            Self::BasicInfo2(data) => data.fmt(f),
            Self::ChargingDemand(data) => data.fmt(f),
            Self::ChargerFeedback(data) => data.fmt(f),
            Self::CellVoltages(data) => data.fmt(f),
            Self::Temperatures(data) => data.fmt(f),
        }
    }
}

impl Display for BasicInfo1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "--- BMS BASIC INFO 1 ---")?;
        writeln!(f, "Cable connected: {}", yes_no(self.status.cable_connected))?;
        writeln!(
            f,
            "Charging status: {}",
            if self.status.charging {
                "CHARGING"
            } else {
                "NOT CHARGING"
            }
        )?;
        writeln!(f, "Low power: {}", yes_no(self.status.low_power))?;
        writeln!(
            f,
            "Pack ready: {}",
            if self.status.ready { "READY" } else { "NOT READY" }
        )?;
        writeln!(f, "SOC: {}%", self.state_of_charge)?;
        writeln!(f, "Current: {:.1} A", self.current)?;
        writeln!(f, "Voltage: {:.1} V", self.voltage)?;
        writeln!(f, "Fault level: {}", self.fault_level)?;
        writeln!(f, "Fault code: 0x{:02X}", self.fault_code)
    }
}

impl Display for BasicInfo2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "--- BMS BASIC INFO 2 ---")?;
        writeln!(
            f,
            "Max cell: {:.3} V, Min cell: {:.3} V, Imbalance: {:.3} V",
            self.max_cell_voltage,
            self.min_cell_voltage,
            self.imbalance()
        )?;
        writeln!(
            f,
            "Max temp: {}°C, Min temp: {}°C",
            self.max_temperature, self.min_temperature
        )?;
        writeln!(f, "Max discharge: {:.1} A", self.max_discharge_current)
    }
}

impl Display for ChargingDemand {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "--- CHARGING DEMAND ---")?;
        writeln!(
            f,
            "Target V: {:.1} V, Target I: {:.1} A, Cmd: {}",
            self.target_voltage, self.target_current, self.command
        )
    }
}

impl Display for ChargerFeedback {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "--- CHARGER FEEDBACK ---")?;
        writeln!(
            f,
            "Out V: {:.1} V, Out I: {:.1} A",
            self.output_voltage, self.output_current
        )?;
        if let Some(status) = &self.status {
            for (label, active) in status.flags() {
                writeln!(f, "{}: {}", label, if active { "ACTIVE" } else { "normal" })?;
            }
        }
        Ok(())
    }
}

impl Display for CellVoltages {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.first_cell == 0 {
            writeln!(f, "--- CELL VOLTAGES ---")?;
        }
        for (index, volts) in self.cells() {
            writeln!(
                f,
                "Cell {:02}: {:.3} V [{}]",
                index + 1,
                volts,
                CellStatus::classify(volts)
            )?;
        }
        Ok(())
    }
}

impl Display for Temperatures {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "--- TEMPERATURES ---")?;
        for (index, celsius) in self.probes.iter().enumerate() {
            writeln!(f, "Probe {}: {}°C", index + 1, celsius)?;
        }
        Ok(())
    }
}
