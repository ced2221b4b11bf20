use crate::concentrationunit::ConcentrationUnit;
use crate::gaschannel::{GasChannel, CO_SOFT_CAP_PPM};

use chrono::{DateTime, Utc};
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::path::Path;

/// O2 share of dry air, used when CO2 is derived from the O2 reading.
pub const ATMOSPHERIC_O2_PERCENT: f64 = 20.90;

/// One time-aligned sample of all three channels.
/// CO in ppm, CO2 and O2 in volume percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorReading {
    pub co: f64,
    pub co2: f64,
    pub o2: f64,
}

impl SensorReading {
    pub fn new(co: f64, co2: f64, o2: f64) -> Self {
        Self { co, co2, o2 }
    }
    pub fn get(&self, channel: GasChannel) -> f64 {
        match channel {
            GasChannel::CO => self.co,
            GasChannel::CO2 => self.co2,
            GasChannel::O2 => self.o2,
        }
    }
    pub fn set(&mut self, channel: GasChannel, value: f64) {
        match channel {
            GasChannel::CO => self.co = value,
            GasChannel::CO2 => self.co2 = value,
            GasChannel::O2 => self.o2 = value,
        }
    }
}

/// CO2 estimated as the O2 deficit against ambient air.
pub fn co2_from_o2(o2_percent: f64) -> f64 {
    (ATMOSPHERIC_O2_PERCENT - o2_percent).max(0.0)
}

/// Reading as posted by the analyzer node. CO2 arrives in ppm.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub node_name: String,
    pub co_ppm: f64,
    pub co2_ppm: f64,
    pub o2_percent: f64,
    pub fan: i64,
    pub compressor: i64,
}

impl Default for DeviceReading {
    fn default() -> Self {
        Self {
            node_name: "node_unknown".to_owned(),
            co_ppm: 0.0,
            co2_ppm: 0.0,
            o2_percent: 0.0,
            fan: 0,
            compressor: 0,
        }
    }
}

impl DeviceReading {
    /// CO2 in percent as it is stored, either converted or derived from O2.
    pub fn co2_percent(&self, use_co2_from_o2: bool) -> f64 {
        if use_co2_from_o2 {
            co2_from_o2(self.o2_percent)
        } else {
            ConcentrationUnit::Ppm.to_percent(self.co2_ppm)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub recorded_at: DateTime<Utc>,
    pub co: f64,
    pub co2: f64,
    pub o2: f64,
}

impl HistoryRow {
    pub fn reading(&self) -> SensorReading {
        SensorReading::new(self.co, self.co2, self.o2)
    }
    pub fn with_reading(&self, reading: SensorReading) -> Self {
        Self { recorded_at: self.recorded_at, co: reading.co, co2: reading.co2, o2: reading.o2 }
    }
    /// Row as plotted: CO never exceeds the detector cap.
    pub fn for_chart(&self) -> Self {
        Self { co: chart_co(self.co), ..*self }
    }
}

pub fn chart_co(co_ppm: f64) -> f64 {
    co_ppm.min(CO_SOFT_CAP_PPM)
}

/// CO label for live cards, above the cap the detector saturates.
pub fn co_label(co_ppm: f64) -> String {
    if co_ppm > CO_SOFT_CAP_PPM {
        format!(">{}", CO_SOFT_CAP_PPM)
    } else {
        format!("{:.1}", co_ppm)
    }
}

pub fn write_history_csv<P: AsRef<Path>>(path: P, rows: &[HistoryRow]) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(path)?);

    wtr.write_record(["datetime", "co_ppm", "co2_percent", "o2_percent"])?;

    for row in rows {
        wtr.write_record(&[
            row.recorded_at.to_rfc3339(),
            format!("{:.1}", row.co),
            format!("{:.2}", row.co2),
            format!("{:.2}", row.o2),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
