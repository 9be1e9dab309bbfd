//! Fixed-point conventions of the BMS and charger messages.
//!
//! Every multi-byte field is an unsigned 16 bit value assembled from two
//! payload bytes. The callers decide which byte is the high one, the helpers
//! here only apply offsets and scale factors.

use core::fmt::{Display, Formatter};
use serde::Serialize;

const CURRENT_OFFSET: i32 = 5000;
const TEMPERATURE_OFFSET: i16 = 40;

pub const CELL_CRITICAL_LOW: f32 = 2.5;
pub const CELL_CRITICAL_HIGH: f32 = 4.2;
pub const CELL_WARNING_LOW: f32 = 3.0;

pub fn u16_from_bytes(low: u8, high: u8) -> u16 {
    u16::from_le_bytes([low, high])
}

/// Offset binary current in 0.1 A steps, raw 5000 is 0 A
pub fn current_amps(raw: u16) -> f32 {
    (raw as i32 - CURRENT_OFFSET) as f32 / 10.0
}

/// Pack, charger and charge-demand voltages, 0.1 V steps
pub fn deci_volts(raw: u16) -> f32 {
    raw as f32 / 10.0
}

/// Currents without offset, 0.1 A steps
pub fn deci_amps(raw: u16) -> f32 {
    raw as f32 / 10.0
}

/// Cell voltages, 1 mV steps
pub fn cell_volts(raw: u16) -> f32 {
    raw as f32 / 1000.0
}

pub fn temperature_celsius(raw: u8) -> i16 {
    raw as i16 - TEMPERATURE_OFFSET
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultLevel {
    NoFault,
    Level1,
    NormalFault,
    FaultWithAlarm,
    Unknown(u8),
}

impl FaultLevel {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::NoFault,
            1 => Self::Level1,
            2 => Self::NormalFault,
            3 => Self::FaultWithAlarm,
            other => Self::Unknown(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoFault => "NO FAULT",
            Self::Level1 => "LEVEL 1",
            Self::NormalFault => "NORMAL FAULT (50%)",
            Self::FaultWithAlarm => "FAULT WITH ALARM",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl Display for FaultLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellStatus {
    Normal,
    Warning,
    Critical,
}

impl CellStatus {
    pub fn classify(volts: f32) -> Self {
        if volts < CELL_CRITICAL_LOW || volts > CELL_CRITICAL_HIGH {
            Self::Critical
        } else if volts < CELL_WARNING_LOW {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

impl Display for CellStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeCommand {
    Start,
    Stop,
}

impl ChargeCommand {
    /// Bit 0 clear requests charging
    pub fn from_flags(flags: u8) -> Self {
        if flags & 0x01 == 0 {
            Self::Start
        } else {
            Self::Stop
        }
    }
}

impl Display for ChargeCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::Stop => "STOP",
        })
    }
}

/// Status byte of basic info 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackStatus {
    pub cable_connected: bool,
    pub charging: bool,
    pub low_power: bool,
    pub ready: bool,
}

impl PackStatus {
    pub fn from_raw(raw: u8) -> Self {
        Self {
            cable_connected: raw & 0x01 != 0,
            charging: raw & 0x02 != 0,
            low_power: raw & 0x04 != 0,
            ready: raw & 0x08 != 0,
        }
    }
}

/// Status byte of the charger feedback message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargerStatus(pub u8);

impl ChargerStatus {
    pub const FLAGS: [&'static str; 8] = [
        "HW failure",
        "Temp failure",
        "Low power",
        "Input low",
        "Overcurrent",
        "Charging",
        "Comm timeout",
        "Battery reversed",
    ];

    pub fn is_active(&self, bit: usize) -> bool {
        bit < 8 && self.0 & (1 << bit) != 0
    }

    pub fn flags(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        Self::FLAGS
            .iter()
            .enumerate()
            .map(|(bit, label)| (*label, self.is_active(bit)))
    }
}
