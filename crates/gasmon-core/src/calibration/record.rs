use crate::gaschannel::GasChannel;
use crate::stats::Evaluation;
use crate::types::FastMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChannelMap<V> = FastMap<GasChannel, V>;

/// Stored result of the latest completed run for one channel.
/// Always written as a whole, one record per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub channel: GasChannel,
    pub reference_value: f64,
    pub readings: Vec<f64>,
    pub average: f64,
    pub t_value: Option<f64>,
    pub passed: Option<bool>,
    pub correction_slope: f64,
    pub correction_intercept: f64,
    pub updated_at: DateTime<Utc>,
}

impl CalibrationRecord {
    /// Record of a channel that has never completed a run.
    pub fn empty(channel: GasChannel) -> Self {
        Self {
            channel,
            reference_value: channel.default_reference(),
            readings: Vec::new(),
            average: 0.0,
            t_value: None,
            passed: None,
            correction_slope: 1.0,
            correction_intercept: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn from_evaluation(
        channel: GasChannel,
        reference_value: f64,
        readings: Vec<f64>,
        evaluation: &Evaluation,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            reference_value,
            readings,
            average: evaluation.average,
            t_value: Some(evaluation.t_value),
            passed: Some(evaluation.passed),
            correction_slope: evaluation.slope,
            correction_intercept: evaluation.intercept,
            updated_at,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.passed == Some(true)
    }
}

impl fmt::Display for CalibrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let unit = self.channel.unit();
        let verdict = match self.passed {
            Some(true) => "PASSED",
            Some(false) => "FAILED",
            None => "not calibrated",
        };
        write!(
            f,
            "{:<4} {:<14} ref {:.2} {unit}, avg {:.2} {unit}, t {}, slope {:.4}, intercept {:.2}, {} readings, {}",
            self.channel,
            verdict,
            self.reference_value,
            self.average,
            self.t_value.map_or("N/A".to_string(), |t| format!("{:.3}", t)),
            self.correction_slope,
            self.correction_intercept,
            self.readings.len(),
            self.updated_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}
