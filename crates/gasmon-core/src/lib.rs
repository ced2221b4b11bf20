pub mod calibration;
pub mod calibrationevent;
pub mod concentrationunit;
pub mod db;
pub mod error;
pub mod gaschannel;
pub mod reading;
pub mod sensor;
pub mod stats;
pub mod types;
pub mod warmup;

pub use calibration::{CalibrationRecord, CalibrationRunner, CorrectionApplier, RunRequest};
pub use error::{CalibrationError, SensorError, StoreError};
pub use gaschannel::{ChannelGroup, GasChannel};
pub use reading::{HistoryRow, SensorReading};
