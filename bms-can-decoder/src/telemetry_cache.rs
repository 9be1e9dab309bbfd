use crate::BmsCanData;
use serde::Serialize;

pub const CELL_COUNT: usize = 20;
pub const PROBE_COUNT: usize = 16;

/// Last observed cell voltages and temperature probe readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryCache {
    cell_voltages: [f32; CELL_COUNT],
    temperature_probes: [i16; PROBE_COUNT],
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self {
            cell_voltages: [0.0; CELL_COUNT],
            temperature_probes: [0; PROBE_COUNT],
        }
    }

    pub fn cell_voltages(&self) -> &[f32; CELL_COUNT] {
        &self.cell_voltages
    }

    pub fn temperature_probes(&self) -> &[i16; PROBE_COUNT] {
        &self.temperature_probes
    }

    /// Returns `false` and leaves the cache untouched if `index` is out of bounds
    pub fn set_cell_voltage(&mut self, index: usize, volts: f32) -> bool {
        match self.cell_voltages.get_mut(index) {
            Some(slot) => {
                *slot = volts;
                true
            }
            None => false,
        }
    }

    /// Returns `false` and leaves the cache untouched if `index` is out of bounds
    pub fn set_temperature(&mut self, index: usize, celsius: i16) -> bool {
        match self.temperature_probes.get_mut(index) {
            Some(slot) => {
                *slot = celsius;
                true
            }
            None => false,
        }
    }

    pub fn ingest(&mut self, data: &BmsCanData) {
        match data {
            BmsCanData::CellVoltages(cells) => {
                for (offset, volts) in cells.voltages.iter().enumerate() {
                    self.set_cell_voltage(cells.first_cell + offset, *volts);
                }
            }
            BmsCanData::Temperatures(temperatures) => {
                for (index, celsius) in temperatures.probes.iter().enumerate() {
                    self.set_temperature(index, *celsius);
                }
            }
            BmsCanData::BasicInfo1(_)
            | BmsCanData::BasicInfo2(_)
            | BmsCanData::ChargingDemand(_)
            | BmsCanData::ChargerFeedback(_) => {}
        }
    }
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellVoltages, Temperatures};
    use assert2::assert;

    #[test]
    fn starts_zeroed() {
        let cache = TelemetryCache::default();
        assert!(cache.cell_voltages().iter().all(|v| *v == 0.0));
        assert!(cache.temperature_probes().iter().all(|t| *t == 0));
    }

    #[test]
    fn out_of_bounds_writes_are_dropped() {
        let mut cache = TelemetryCache::new();
        assert!(cache.set_cell_voltage(19, 3.3));
        assert!(!cache.set_cell_voltage(20, 3.3));
        assert!(cache.set_temperature(15, -5));
        assert!(!cache.set_temperature(16, -5));
        assert!(cache.cell_voltages()[19] == 3.3);
        assert!(cache.temperature_probes()[15] == -5);
    }

    #[test]
    fn ingest_overwrites_in_place() {
        let mut cache = TelemetryCache::new();
        let cells = BmsCanData::CellVoltages(CellVoltages {
            first_cell: 8,
            voltages: heapless::Vec::from_slice(&[3.1, 3.2, 3.3, 3.4]).unwrap(),
        });
        cache.ingest(&cells);
        assert!(cache.cell_voltages()[7] == 0.0);
        assert!(cache.cell_voltages()[8..12] == [3.1_f32, 3.2, 3.3, 3.4]);
        assert!(cache.cell_voltages()[12] == 0.0);

        cache.ingest(&BmsCanData::Temperatures(Temperatures {
            probes: [25, -10, 0],
        }));
        cache.ingest(&BmsCanData::Temperatures(Temperatures {
            probes: [26, -9, 1],
        }));
        assert!(cache.temperature_probes()[..4] == [26_i16, -9, 1, 0]);
    }
}
