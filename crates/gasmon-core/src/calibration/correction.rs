use super::record::{CalibrationRecord, ChannelMap};
use super::store::CalibrationStore;
use crate::error::StoreResult;
use crate::gaschannel::GasChannel;
use crate::reading::{co2_from_o2, HistoryRow, SensorReading};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Coefficients of one channel as held in the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionFactors {
    pub slope: f64,
    pub intercept: f64,
    pub passed: bool,
}

impl From<&CalibrationRecord> for CorrectionFactors {
    fn from(rec: &CalibrationRecord) -> Self {
        // a zeroed or garbled slope reads as identity, never as "everything is 0"
        let slope = if rec.correction_slope.is_finite() && rec.correction_slope != 0.0 {
            rec.correction_slope
        } else {
            1.0
        };
        let intercept =
            if rec.correction_intercept.is_finite() { rec.correction_intercept } else { 0.0 };
        Self { slope, intercept, passed: rec.is_passed() }
    }
}

/// How a raw value of one channel turns into the value shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionStrategy {
    Identity,
    Direct { slope: f64, intercept: f64 },
    DerivedFromComplement { complement: GasChannel },
}

impl CorrectionStrategy {
    /// `complement` is the already corrected value of the complement channel
    /// for the same instant. Without it a derived channel passes through.
    pub fn apply(&self, raw: f64, complement: Option<f64>) -> f64 {
        match *self {
            CorrectionStrategy::Identity => raw,
            CorrectionStrategy::Direct { slope, intercept } => (raw * slope + intercept).max(0.0),
            CorrectionStrategy::DerivedFromComplement { .. } => match complement {
                Some(o2) => co2_from_o2(o2),
                None => raw,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectionOptions {
    /// Raw O2 of the same sample, needed when CO2 is derived from O2.
    pub o2_raw: Option<f64>,
}

/// Snapshot of everything a correction depends on.
#[derive(Debug, Clone, Default)]
pub struct CalibrationCache {
    factors: ChannelMap<CorrectionFactors>,
    co2_from_o2: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

impl CalibrationCache {
    pub fn from_records(records: &ChannelMap<CalibrationRecord>, co2_from_o2: bool) -> Self {
        let factors = records.iter().map(|(gas, rec)| (*gas, CorrectionFactors::from(rec))).collect();
        Self { factors, co2_from_o2, refreshed_at: Some(Utc::now()) }
    }

    pub fn strategy(&self, channel: GasChannel, use_calibration: bool) -> CorrectionStrategy {
        if channel == GasChannel::CO2 && self.co2_from_o2 {
            return CorrectionStrategy::DerivedFromComplement { complement: GasChannel::O2 };
        }
        if !use_calibration {
            return CorrectionStrategy::Identity;
        }
        match self.factors.get(&channel) {
            Some(f) if f.passed => {
                CorrectionStrategy::Direct { slope: f.slope, intercept: f.intercept }
            },
            _ => CorrectionStrategy::Identity,
        }
    }

    pub fn correct(
        &self,
        channel: GasChannel,
        raw: f64,
        use_calibration: bool,
        opts: CorrectionOptions,
    ) -> f64 {
        let strategy = self.strategy(channel, use_calibration);
        let complement = match strategy {
            CorrectionStrategy::DerivedFromComplement { complement } => opts.o2_raw.map(|o2| {
                self.strategy(complement, use_calibration).apply(o2, None)
            }),
            _ => None,
        };
        strategy.apply(raw, complement)
    }

    pub fn correct_reading(&self, reading: &SensorReading, use_calibration: bool) -> SensorReading {
        let opts = CorrectionOptions { o2_raw: Some(reading.o2) };
        SensorReading {
            co: self.correct(GasChannel::CO, reading.co, use_calibration, opts),
            co2: self.correct(GasChannel::CO2, reading.co2, use_calibration, opts),
            o2: self.correct(GasChannel::O2, reading.o2, use_calibration, opts),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.factors.values().any(|f| f.passed)
    }
}

/// Process-wide view of the latest calibration, shared by every consumer.
///
/// Reads are served from the cache; only [`refresh`](Self::refresh) and
/// [`set_co2_from_o2`](Self::set_co2_from_o2) touch the store.
pub struct CorrectionApplier {
    store: Arc<dyn CalibrationStore>,
    cache: RwLock<CalibrationCache>,
}

impl CorrectionApplier {
    pub fn new(store: Arc<dyn CalibrationStore>) -> Self {
        Self { store, cache: RwLock::new(CalibrationCache::default()) }
    }

    /// Construct and load the cache once, as a session start does.
    pub async fn load(store: Arc<dyn CalibrationStore>) -> StoreResult<Self> {
        let applier = Self::new(store);
        applier.refresh().await?;
        Ok(applier)
    }

    /// Replace the cache wholesale with the store contents.
    pub async fn refresh(&self) -> StoreResult<()> {
        let records = self.store.load_records().await?;
        let co2_from_o2 = self.store.co2_from_o2().await?;
        let cache = CalibrationCache::from_records(&records, co2_from_o2);
        debug!(channels = records.len(), co2_from_o2, "calibration cache refreshed");
        *self.cache.write() = cache;
        Ok(())
    }

    /// Refresh every `CACHE_REFRESH_INTERVAL` until `cancel` fires.
    /// A failed refresh keeps the previous cache.
    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let applier = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_REFRESH_INTERVAL);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = applier.refresh().await {
                            warn!("calibration refresh failed: {e}");
                        }
                    },
                }
            }
        })
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.cache.read().refreshed_at
    }

    pub fn strategy(&self, channel: GasChannel, use_calibration: bool) -> CorrectionStrategy {
        self.cache.read().strategy(channel, use_calibration)
    }

    pub fn factors(&self, channel: GasChannel) -> Option<CorrectionFactors> {
        self.cache.read().factors.get(&channel).copied()
    }

    pub fn correct(
        &self,
        channel: GasChannel,
        raw: f64,
        use_calibration: bool,
        opts: CorrectionOptions,
    ) -> f64 {
        self.cache.read().correct(channel, raw, use_calibration, opts)
    }

    pub fn correct_reading(&self, reading: &SensorReading, use_calibration: bool) -> SensorReading {
        self.cache.read().correct_reading(reading, use_calibration)
    }

    /// Same transform as `correct_reading`, over every history row.
    pub fn correct_history(&self, rows: &[HistoryRow], use_calibration: bool) -> Vec<HistoryRow> {
        let cache = self.cache.read();
        rows.iter()
            .map(|row| row.with_reading(cache.correct_reading(&row.reading(), use_calibration)))
            .collect()
    }

    pub fn is_calibrated(&self) -> bool {
        self.cache.read().is_calibrated()
    }

    pub fn co2_from_o2(&self) -> bool {
        self.cache.read().co2_from_o2
    }

    pub async fn set_co2_from_o2(&self, enabled: bool) -> StoreResult<()> {
        self.store.set_co2_from_o2(enabled).await?;
        self.cache.write().co2_from_o2 = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::store::MemoryCalibrationStore;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn record(channel: GasChannel, slope: f64, intercept: f64, passed: Option<bool>) -> CalibrationRecord {
        CalibrationRecord {
            correction_slope: slope,
            correction_intercept: intercept,
            passed,
            t_value: passed.map(|_| 0.5),
            ..CalibrationRecord::empty(channel)
        }
    }

    async fn applier_with(records: Vec<CalibrationRecord>) -> (Arc<MemoryCalibrationStore>, CorrectionApplier) {
        let store = Arc::new(MemoryCalibrationStore::with_records(records));
        let applier = CorrectionApplier::load(store.clone()).await.unwrap();
        (store, applier)
    }

    const NONE: CorrectionOptions = CorrectionOptions { o2_raw: None };

    #[tokio::test]
    async fn disabled_calibration_is_identity() {
        let (_, applier) = applier_with(vec![record(GasChannel::CO, 1.02, -3.0, Some(true))]).await;
        for x in [-5.0, 0.0, 0.001, 50.0, 1999.9, 1.0e6] {
            assert_eq!(applier.correct(GasChannel::CO, x, false, NONE), x);
        }
    }

    #[tokio::test]
    async fn absent_or_failed_record_is_identity() {
        let (_, applier) = applier_with(vec![
            record(GasChannel::CO, 1.02, -3.0, Some(false)),
            record(GasChannel::O2, 0.9, 0.0, None),
        ])
        .await;
        for x in [0.0, 12.5, 400.0] {
            assert_eq!(applier.correct(GasChannel::CO, x, true, NONE), x);
            assert_eq!(applier.correct(GasChannel::CO2, x, true, NONE), x);
            assert_eq!(applier.correct(GasChannel::O2, x, true, NONE), x);
        }
        assert!(!applier.is_calibrated());
    }

    #[tokio::test]
    async fn passed_record_applies_linear_correction() {
        let (_, applier) = applier_with(vec![record(GasChannel::CO, 1.02, -3.0, Some(true))]).await;
        assert_relative_eq!(applier.correct(GasChannel::CO, 50.0, true, NONE), 48.0, epsilon = 1e-9);
        assert!(applier.is_calibrated());
    }

    #[tokio::test]
    async fn corrected_value_is_clamped_at_zero() {
        let (_, applier) = applier_with(vec![record(GasChannel::CO, 1.02, -3.0, Some(true))]).await;
        assert_eq!(applier.correct(GasChannel::CO, 1.0, true, NONE), 0.0);
        for x in [0.0, 2.0, 10.0, 300.0] {
            let expected = (x * 1.02 - 3.0_f64).max(0.0);
            assert_relative_eq!(applier.correct(GasChannel::CO, x, true, NONE), expected);
        }
    }

    #[tokio::test]
    async fn derived_co2_uses_corrected_o2() {
        let (store, applier) = applier_with(vec![
            record(GasChannel::O2, 0.5, 0.0, Some(true)),
            record(GasChannel::CO2, 3.0, 0.0, Some(true)),
        ])
        .await;
        store.set_co2_from_o2(true).await.unwrap();
        applier.refresh().await.unwrap();

        // raw O2 41.0 corrects to 20.5, CO2 correction is bypassed
        let co2 =
            applier.correct(GasChannel::CO2, 7.7, true, CorrectionOptions { o2_raw: Some(41.0) });
        assert_relative_eq!(co2, 0.40, epsilon = 1e-9);
        assert_eq!(
            applier.strategy(GasChannel::CO2, true),
            CorrectionStrategy::DerivedFromComplement { complement: GasChannel::O2 }
        );

        // with calibration off the raw O2 is used
        let co2_raw =
            applier.correct(GasChannel::CO2, 7.7, false, CorrectionOptions { o2_raw: Some(20.5) });
        assert_relative_eq!(co2_raw, 0.40, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn derived_co2_without_o2_passes_through() {
        let (_, applier) = applier_with(vec![]).await;
        applier.set_co2_from_o2(true).await.unwrap();
        assert_eq!(applier.correct(GasChannel::CO2, 0.7, true, NONE), 0.7);
    }

    #[tokio::test]
    async fn whole_reading_and_history_share_semantics() {
        let (_, applier) = applier_with(vec![
            record(GasChannel::CO, 1.02, -3.0, Some(true)),
            record(GasChannel::O2, 1.01, 0.0, Some(true)),
        ])
        .await;
        let live = SensorReading::new(50.0, 0.04, 20.0);
        let corrected = applier.correct_reading(&live, true);
        assert_relative_eq!(corrected.co, 48.0, epsilon = 1e-9);
        assert_eq!(corrected.co2, 0.04);
        assert_relative_eq!(corrected.o2, 20.2, epsilon = 1e-9);

        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![
            HistoryRow { recorded_at: t0, co: 50.0, co2: 0.04, o2: 20.0 },
            HistoryRow { recorded_at: t0, co: 1.0, co2: 0.05, o2: 19.0 },
        ];
        let mapped = applier.correct_history(&rows, true);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].reading(), corrected);
        assert_eq!(mapped[0].recorded_at, t0);
        assert_eq!(mapped[1].co, 0.0);
        assert_eq!(applier.correct_history(&rows, false), rows);
    }

    #[tokio::test]
    async fn zero_slope_in_store_reads_as_identity_scale() {
        let (_, applier) = applier_with(vec![record(GasChannel::CO, 0.0, 0.0, Some(true))]).await;
        assert_eq!(applier.factors(GasChannel::CO).unwrap().slope, 1.0);
        assert_eq!(applier.correct(GasChannel::CO, 25.0, true, NONE), 25.0);
    }

    #[tokio::test]
    async fn refresh_overwrites_cache() {
        let (store, applier) = applier_with(vec![record(GasChannel::CO, 2.0, 0.0, Some(true))]).await;
        assert_eq!(applier.correct(GasChannel::CO, 10.0, true, NONE), 20.0);

        store.upsert_record(&record(GasChannel::CO, 2.0, 0.0, Some(false))).await.unwrap();
        // stale until refreshed
        assert_eq!(applier.correct(GasChannel::CO, 10.0, true, NONE), 20.0);
        applier.refresh().await.unwrap();
        assert_eq!(applier.correct(GasChannel::CO, 10.0, true, NONE), 10.0);
        assert!(applier.refreshed_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_picks_up_new_records() {
        let (store, applier) = applier_with(vec![]).await;
        let applier = Arc::new(applier);
        let cancel = CancellationToken::new();
        let handle = applier.spawn_refresh_loop(cancel.clone());

        store.upsert_record(&record(GasChannel::CO, 2.0, 0.0, Some(true))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!applier.is_calibrated());

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(applier.is_calibrated());

        cancel.cancel();
        handle.await.unwrap();
    }
}
