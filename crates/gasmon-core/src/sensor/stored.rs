use super::SensorSource;
use crate::db::readings::query_latest;
use crate::db::{with_connection, SharedConnection};
use crate::error::SensorError;
use crate::reading::SensorReading;

use async_trait::async_trait;

/// Latest row of the `sensor` table, as posted by the analyzer node.
pub struct StoredSensorSource {
    conn: SharedConnection,
}

impl StoredSensorSource {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SensorSource for StoredSensorSource {
    async fn current_reading(&self) -> Result<SensorReading, SensorError> {
        let latest = with_connection(&self.conn, query_latest)
            .await
            .map_err(|e| SensorError::Msg(format!("sensor query task failed: {e}")))??;
        latest.map(|row| row.reading()).ok_or(SensorError::NoReading)
    }
}
