pub mod http;
pub mod simulated;
pub mod stored;

pub use http::HttpSensorSource;
pub use simulated::SimulatedSensorSource;
pub use stored::StoredSensorSource;

use crate::error::SensorError;
use crate::reading::SensorReading;

use async_trait::async_trait;

/// Anything that can answer "what does the analyzer read right now".
///
/// One call returns all three channels from the same fetch, so CO2 and O2
/// taken together are always time-aligned.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn current_reading(&self) -> Result<SensorReading, SensorError>;
}
