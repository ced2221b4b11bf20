use crate::gaschannel::GasChannel;
use crate::stats::EvalError;

#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    #[error("sensor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sensor did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("no sensor reading available")]
    NoReading,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("{0}")]
    Msg(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid readings json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("{0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of a calibration run. Every variant leaves the run group idle.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("invalid {channel} reference value: {input:?}")]
    InvalidReference { channel: GasChannel, input: String },
    #[error("a {0} calibration run is already in progress")]
    RunInProgress(crate::gaschannel::ChannelGroup),
    #[error("sensor capture failed at reading {step}/{total}: {source}")]
    CaptureFailed { step: usize, total: usize, source: SensorError },
    #[error("could not evaluate {channel} readings: {source}")]
    Evaluation { channel: GasChannel, source: EvalError },
    #[error("could not save {channel} calibration: {source}")]
    PersistFailed { channel: GasChannel, source: StoreError },
    #[error("calibration run cancelled")]
    Cancelled,
}

/// Stage of a run a failure belongs to, named in operator notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Validation,
    Capture,
    Evaluation,
    Persist,
    Cancelled,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Validation => write!(f, "Reference check"),
            FailureStage::Capture => write!(f, "Sensor capture"),
            FailureStage::Evaluation => write!(f, "Computation"),
            FailureStage::Persist => write!(f, "Saving results"),
            FailureStage::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl CalibrationError {
    pub fn stage(&self) -> FailureStage {
        match self {
            CalibrationError::InvalidReference { .. } | CalibrationError::RunInProgress(_) => {
                FailureStage::Validation
            },
            CalibrationError::CaptureFailed { .. } => FailureStage::Capture,
            CalibrationError::Evaluation { .. } => FailureStage::Evaluation,
            CalibrationError::PersistFailed { .. } => FailureStage::Persist,
            CalibrationError::Cancelled => FailureStage::Cancelled,
        }
    }
}
