pub mod correction;
pub mod record;
pub mod runner;
pub mod store;

pub use correction::{CorrectionApplier, CorrectionOptions, CorrectionStrategy};
pub use record::{CalibrationRecord, ChannelMap};
pub use runner::{CalibrationRunner, RunRequest, RunState, RunStatus};
pub use store::{CalibrationStore, MemoryCalibrationStore};

use std::time::Duration;

/// Readings taken per run.
pub const SAMPLE_COUNT: usize = 30;
/// Spacing between readings, the first one is taken immediately.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(6);
/// How long a finished run shows its results before going idle.
pub const RESULT_DISPLAY_DELAY: Duration = Duration::from_secs(3);
/// Longest a single sensor fetch may take before the run is aborted.
pub const SENSOR_TIMEOUT: Duration = Duration::from_secs(5);
