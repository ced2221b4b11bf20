use crate::concentrationunit::ConcentrationUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const CO_SOFT_CAP_PPM: f64 = 2000.0;
pub const DEFAULT_O2_REFERENCE: f64 = 20.9;

#[derive(Debug)]
pub struct ParseGasError(String);

impl fmt::Display for ParseGasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ParseGasError {}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum GasChannel {
    #[default]
    CO,
    CO2,
    O2,
}

impl fmt::Display for GasChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.key())
    }
}

impl FromStr for GasChannel {
    type Err = ParseGasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "co" => Ok(GasChannel::CO),
            "co2" => Ok(GasChannel::CO2),
            "o2" => Ok(GasChannel::O2),
            other => Err(ParseGasError(format!("Invalid gas: {other}"))),
        }
    }
}

impl GasChannel {
    pub const ALL: [GasChannel; 3] = [GasChannel::CO, GasChannel::CO2, GasChannel::O2];

    /// Key used for the `gas_type` column of the calibration table.
    pub fn key(&self) -> &'static str {
        match self {
            GasChannel::CO => "CO",
            GasChannel::CO2 => "CO2",
            GasChannel::O2 => "O2",
        }
    }
    pub fn unit(&self) -> ConcentrationUnit {
        match self {
            GasChannel::CO => ConcentrationUnit::Ppm,
            GasChannel::CO2 => ConcentrationUnit::Percent,
            GasChannel::O2 => ConcentrationUnit::Percent,
        }
    }
    /// Upper display/sampling bound, only CO has one.
    pub fn soft_cap(&self) -> Option<f64> {
        match self {
            GasChannel::CO => Some(CO_SOFT_CAP_PPM),
            GasChannel::CO2 | GasChannel::O2 => None,
        }
    }
    pub fn nominal_range(&self) -> Option<RangeInclusive<f64>> {
        match self {
            GasChannel::O2 => Some(19.5..=23.5),
            GasChannel::CO | GasChannel::CO2 => None,
        }
    }
    /// Reference value pre-filled for the operator before a run.
    pub fn default_reference(&self) -> f64 {
        match self {
            GasChannel::O2 => DEFAULT_O2_REFERENCE,
            GasChannel::CO | GasChannel::CO2 => 0.0,
        }
    }
    pub fn group(&self) -> ChannelGroup {
        match self {
            GasChannel::CO => ChannelGroup::Co,
            GasChannel::CO2 | GasChannel::O2 => ChannelGroup::Co2O2,
        }
    }
}

/// Channels that are sampled together in one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum ChannelGroup {
    Co,
    Co2O2,
}

impl ChannelGroup {
    pub const ALL: [ChannelGroup; 2] = [ChannelGroup::Co, ChannelGroup::Co2O2];

    pub fn channels(&self) -> &'static [GasChannel] {
        match self {
            ChannelGroup::Co => &[GasChannel::CO],
            ChannelGroup::Co2O2 => &[GasChannel::CO2, GasChannel::O2],
        }
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelGroup::Co => write!(f, "CO"),
            ChannelGroup::Co2O2 => write!(f, "CO2 & O2"),
        }
    }
}
