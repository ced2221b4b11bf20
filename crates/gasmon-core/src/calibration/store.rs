use super::record::{CalibrationRecord, ChannelMap};
use crate::error::{StoreError, StoreResult};
use crate::gaschannel::GasChannel;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Durable home of the calibration records and the CO2 derivation flag.
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Every stored record, channels that never completed a run are absent.
    async fn load_records(&self) -> StoreResult<ChannelMap<CalibrationRecord>>;

    /// Insert or replace the record of `record.channel`. Must be safe to retry.
    async fn upsert_record(&self, record: &CalibrationRecord) -> StoreResult<()>;

    async fn co2_from_o2(&self) -> StoreResult<bool>;

    async fn set_co2_from_o2(&self, enabled: bool) -> StoreResult<()>;
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCalibrationStore {
    records: Mutex<ChannelMap<CalibrationRecord>>,
    co2_from_o2: Mutex<bool>,
    reject_writes_for: Mutex<Vec<GasChannel>>,
    writes: Mutex<usize>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CalibrationRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.records.lock();
            for rec in records {
                map.insert(rec.channel, rec);
            }
        }
        store
    }

    /// Make upserts of `channel` fail, as a rejecting database would.
    pub fn reject_writes_for(&self, channel: GasChannel) {
        self.reject_writes_for.lock().push(channel);
    }

    /// Number of successful upserts so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn record(&self, channel: GasChannel) -> Option<CalibrationRecord> {
        self.records.lock().get(&channel).cloned()
    }
}

#[async_trait]
impl CalibrationStore for MemoryCalibrationStore {
    async fn load_records(&self) -> StoreResult<ChannelMap<CalibrationRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn upsert_record(&self, record: &CalibrationRecord) -> StoreResult<()> {
        if self.reject_writes_for.lock().contains(&record.channel) {
            return Err(StoreError::Unavailable(format!("write of {} rejected", record.channel)));
        }
        self.records.lock().insert(record.channel, record.clone());
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn co2_from_o2(&self) -> StoreResult<bool> {
        Ok(*self.co2_from_o2.lock())
    }

    async fn set_co2_from_o2(&self, enabled: bool) -> StoreResult<()> {
        *self.co2_from_o2.lock() = enabled;
        Ok(())
    }
}
