use gasmon_core::calibration::record::CalibrationRecord;
use gasmon_core::calibration::runner::{CalibrationRunner, RunRequest};
use gasmon_core::calibration::store::CalibrationStore;
use gasmon_core::calibration::{CorrectionApplier, CorrectionOptions, SAMPLE_INTERVAL};
use gasmon_core::calibrationevent::{
    apply_event, drain_events, CalibrationEvent, CalibrationEventSink, LifecycleEvent, ProgressEvent,
    RunFailure,
};
use gasmon_core::concentrationunit::ConcentrationUnit;
use gasmon_core::db::readings::{insert_reading, query_history};
use gasmon_core::db::{with_connection, SqliteStore};
use gasmon_core::error::{CalibrationError, SensorError, StoreError};
use gasmon_core::gaschannel::{ChannelGroup, GasChannel};
use gasmon_core::reading::{co_label, write_history_csv, DeviceReading, HistoryRow, SensorReading};
use gasmon_core::sensor::{HttpSensorSource, SensorSource, SimulatedSensorSource, StoredSensorSource};
use gasmon_core::warmup::{format_mm_ss, WarmUp, WarmUpStage};

use chrono::Utc;
use chrono_tz::{Tz, UTC};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Poll period of the live view.
const LIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/* =================== Public configuration types =================== */

#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub sensor: SensorChoice,
    pub co2_unit: ConcentrationUnit,
    pub action: Action,
    pub progress_receiver: Option<UnboundedReceiver<CalibrationEvent>>,
    last_sample: Option<SensorReading>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorChoice {
    Simulated,
    Stored,
    Http(String),
}

impl FromStr for SensorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sim" | "simulated" => Ok(SensorChoice::Simulated),
            "db" => Ok(SensorChoice::Stored),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(SensorChoice::Http(url.to_owned()))
            },
            other => Err(format!("unknown sensor source {other:?}, use sim, db or an http(s) URL")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Calibrate(Calibrate),
    Records,
    Correct(Correct),
    History(History),
    Live(Live),
    Ingest(DeviceReading),
    Co2Mode(Option<bool>),
}

#[derive(Debug, Clone)]
pub struct Calibrate {
    pub group: ChannelGroup,
    /// Reference values exactly as typed.
    pub references: Vec<(GasChannel, String)>,
    pub warmup: bool,
}

#[derive(Debug, Clone)]
pub struct Correct {
    pub channel: GasChannel,
    pub value: f64,
    pub o2: Option<f64>,
    pub use_calibration: bool,
}

#[derive(Debug, Clone)]
pub struct History {
    pub limit: usize,
    pub use_calibration: bool,
    pub chart: bool,
    pub csv: Option<PathBuf>,
    pub tz: Option<Tz>,
}

#[derive(Debug, Clone)]
pub struct Live {
    pub use_calibration: bool,
    pub count: Option<usize>,
}

/* =================== Error type (no process::exit) =================== */

#[derive(thiserror::Error, Debug)]
pub enum CmdError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("{}: {}", .0.stage(), .0)]
    Calibration(#[from] CalibrationError),
    #[error("{0}")]
    Msg(String),
}

/* =================== Entry point =================== */

impl Config {
    pub fn new(db_path: PathBuf, sensor: SensorChoice, co2_unit: ConcentrationUnit, action: Action) -> Self {
        Self { db_path, sensor, co2_unit, action, progress_receiver: None, last_sample: None }
    }

    pub fn run(&mut self) -> Result<(), CmdError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let store = Arc::new(SqliteStore::open(&self.db_path)?);

        match &self.action.clone() {
            Action::Calibrate(c) => runtime.block_on(self.run_calibrate(store, c)),
            Action::Records => runtime.block_on(self.run_records(store)),
            Action::Correct(c) => runtime.block_on(self.run_correct(store, c)),
            Action::History(h) => runtime.block_on(self.run_history(store, h)),
            Action::Live(l) => runtime.block_on(self.run_live(store, l)),
            Action::Ingest(d) => runtime.block_on(self.run_ingest(store, d)),
            Action::Co2Mode(m) => runtime.block_on(self.run_co2_mode(store, *m)),
        }
    }

    fn sensor_source(&self, store: &SqliteStore) -> Result<Arc<dyn SensorSource>, CmdError> {
        let sensor: Arc<dyn SensorSource> = match &self.sensor {
            SensorChoice::Simulated => Arc::new(SimulatedSensorSource::ambient()),
            SensorChoice::Stored => Arc::new(StoredSensorSource::new(store.connection())),
            SensorChoice::Http(url) => Arc::new(HttpSensorSource::new(url.clone(), self.co2_unit)?),
        };
        Ok(sensor)
    }

    pub fn handle_progress_messages(&mut self) {
        // take the receiver out so the sink can borrow self
        if let Some(mut receiver) = self.progress_receiver.take() {
            drain_events(self, &mut receiver);
            self.progress_receiver = Some(receiver);
        }
    }
}

/// Cancel `cancel` on the first Ctrl-C.
fn cancel_on_ctrl_c(cancel: &CancellationToken) -> JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupted, stopping...");
            cancel.cancel();
        }
    })
}

/* =================== Actions =================== */

impl Config {
    async fn run_calibrate(&mut self, store: Arc<SqliteStore>, c: &Calibrate) -> Result<(), CmdError> {
        let inputs: Vec<(GasChannel, &str)> =
            c.references.iter().map(|(channel, input)| (*channel, input.as_str())).collect();
        let request = RunRequest::parse(c.group, &inputs)?;

        let sensor = self.sensor_source(&store)?;
        let applier = Arc::new(CorrectionApplier::load(store.clone()).await?);
        let cancel = CancellationToken::new();
        let ctrl_c = cancel_on_ctrl_c(&cancel);

        if c.warmup && !wait_for_warmup(&cancel).await {
            ctrl_c.abort();
            return Err(CalibrationError::Cancelled.into());
        }

        let (progress_sender, mut progress_receiver) = unbounded_channel::<CalibrationEvent>();
        let runner = CalibrationRunner::new(sensor, store, applier, progress_sender);

        println!(
            "Calibrating {}: {} readings, one every {} s. Keep the reference gas flowing.",
            c.group,
            gasmon_core::calibration::SAMPLE_COUNT,
            SAMPLE_INTERVAL.as_secs()
        );

        let run = runner.run(request, cancel.clone());
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                res = &mut run => break res,
                Some(msg) = progress_receiver.recv() => apply_event(self, msg),
            }
        };
        ctrl_c.abort();

        // anything sent after the run future finished
        self.progress_receiver = Some(progress_receiver);
        self.handle_progress_messages();

        result.map(|_| ()).map_err(CmdError::from)
    }

    async fn run_records(&mut self, store: Arc<SqliteStore>) -> Result<(), CmdError> {
        let applier = CorrectionApplier::load(store.clone()).await?;
        let records = store.load_records().await?;

        for channel in GasChannel::ALL {
            match records.get(&channel) {
                Some(rec) => println!("{}", rec),
                None => println!("{:<4} not calibrated", channel),
            }
        }
        println!(
            "Correction: {}",
            if applier.is_calibrated() { "calibrated" } else { "uncalibrated, raw values shown" }
        );
        println!(
            "CO2 source: {}",
            if applier.co2_from_o2() { "derived from O2" } else { "measured" }
        );
        Ok(())
    }

    async fn run_correct(&mut self, store: Arc<SqliteStore>, c: &Correct) -> Result<(), CmdError> {
        let applier = CorrectionApplier::load(store).await?;
        let opts = CorrectionOptions { o2_raw: c.o2 };
        if c.channel == GasChannel::CO2 && applier.co2_from_o2() && c.o2.is_none() {
            warn!("CO2 is derived from O2 but no --o2 was given, value passes through");
        }
        let corrected = applier.correct(c.channel, c.value, c.use_calibration, opts);
        let unit = c.channel.unit();
        println!("{} {} {unit} -> {} {unit}", c.channel, c.value, corrected);
        Ok(())
    }

    async fn run_history(&mut self, store: Arc<SqliteStore>, h: &History) -> Result<(), CmdError> {
        let applier = CorrectionApplier::load(store.clone()).await?;
        let limit = h.limit;
        let rows = with_connection(&store.connection(), move |conn| query_history(conn, limit))
            .await
            .map_err(|e| CmdError::Msg(format!("history query failed: {e}")))??;

        let mut rows = applier.correct_history(&rows, h.use_calibration);
        if h.chart {
            rows = rows.iter().map(HistoryRow::for_chart).collect();
        }

        if let Some(path) = &h.csv {
            write_history_csv(path, &rows)
                .map_err(|e| CmdError::Msg(format!("Failed to write {}: {}", path.display(), e)))?;
            println!("Wrote {} rows to {}", rows.len(), path.display());
            return Ok(());
        }

        if rows.is_empty() {
            println!("No readings stored yet.");
            return Ok(());
        }
        let tz = h.tz.unwrap_or(UTC);
        println!("{:<19}  {:>8}  {:>8}  {:>8}", "datetime", "CO ppm", "CO2 %", "O2 %");
        for row in &rows {
            println!(
                "{:<19}  {:>8}  {:>8.2}  {:>8.2}",
                row.recorded_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S"),
                co_label(row.co),
                row.co2,
                row.o2
            );
        }
        if !h.use_calibration {
            println!("(raw values)");
        }
        Ok(())
    }

    async fn run_live(&mut self, store: Arc<SqliteStore>, l: &Live) -> Result<(), CmdError> {
        let sensor = self.sensor_source(&store)?;
        let applier = Arc::new(CorrectionApplier::load(store).await?);
        let cancel = CancellationToken::new();
        let ctrl_c = cancel_on_ctrl_c(&cancel);
        let refresher = applier.spawn_refresh_loop(cancel.clone());

        println!(
            "Following sensor ({}), {}. Ctrl-C to stop.",
            if applier.is_calibrated() { "calibrated" } else { "uncalibrated" },
            if l.use_calibration { "corrected" } else { "raw" }
        );

        let mut ticker = tokio::time::interval(LIVE_POLL_INTERVAL);
        let mut shown = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }
            match sensor.current_reading().await {
                Ok(raw) => {
                    let r = applier.correct_reading(&raw, l.use_calibration);
                    let o2_flag = match GasChannel::O2.nominal_range() {
                        Some(range) if !range.contains(&r.o2) => "  O2 out of range",
                        _ => "",
                    };
                    println!(
                        "{}  CO {:>7} ppm  CO2 {:>6.2} %  O2 {:>6.2} %{}",
                        Utc::now().format("%H:%M:%S"),
                        co_label(r.co),
                        r.co2,
                        r.o2,
                        o2_flag
                    );
                },
                Err(e) => warn!("no reading: {e}"),
            }
            shown += 1;
            if l.count.is_some_and(|n| shown >= n) {
                break;
            }
        }

        cancel.cancel();
        ctrl_c.abort();
        let _ = refresher.await;
        Ok(())
    }

    async fn run_ingest(&mut self, store: Arc<SqliteStore>, d: &DeviceReading) -> Result<(), CmdError> {
        let device = d.clone();
        let row = with_connection(&store.connection(), move |conn| insert_reading(conn, &device, Utc::now()))
            .await
            .map_err(|e| CmdError::Msg(format!("insert failed: {e}")))??;
        info!(node = %d.node_name, "sensor data saved");
        println!("Stored: CO {:.1} ppm, CO2 {:.4} %, O2 {:.2} %", row.co, row.co2, row.o2);
        Ok(())
    }

    async fn run_co2_mode(&mut self, store: Arc<SqliteStore>, mode: Option<bool>) -> Result<(), CmdError> {
        if let Some(enabled) = mode {
            store.set_co2_from_o2(enabled).await?;
        }
        let enabled = store.co2_from_o2().await?;
        println!(
            "CO2 from O2: {}",
            if enabled { "on (CO2 = 20.90 - O2)" } else { "off (CO2 measured)" }
        );
        Ok(())
    }
}

async fn wait_for_warmup(cancel: &CancellationToken) -> bool {
    let warmup = WarmUp::start();
    let mut last_stage = None;
    warmup
        .wait(cancel, |w| {
            let stage = w.stage();
            if last_stage != Some(stage) || w.remaining().as_secs() % 30 == 0 {
                if stage == WarmUpStage::Ready {
                    println!("Warm-up done.");
                } else {
                    println!("Warm-up {} left ({:.0}%): {}", format_mm_ss(w.remaining()), w.progress(), stage);
                }
                last_stage = Some(stage);
            }
        })
        .await
}

impl CalibrationEventSink for Config {
    fn on_lifecycle_event(&mut self, group: ChannelGroup, ev: &LifecycleEvent) {
        match ev {
            LifecycleEvent::Started { total } => {
                println!("{} calibration started, {} readings to collect.", group, total);
            },
            LifecycleEvent::Computing => {
                println!("Computing {} results...", group);
            },
            LifecycleEvent::Completed => {
                println!("{} calibration complete.", group);
            },
            LifecycleEvent::Idle => {},
        }
    }

    fn on_progress_event(&mut self, group: ChannelGroup, ev: &ProgressEvent) {
        match ev {
            ProgressEvent::Sample(reading) => {
                self.last_sample = Some(*reading);
            },
            ProgressEvent::Collected(n, total) => {
                let values = match (group, self.last_sample) {
                    (ChannelGroup::Co, Some(r)) => format!("CO {} ppm", co_label(r.co)),
                    (ChannelGroup::Co2O2, Some(r)) => format!("CO2 {:.2} %, O2 {:.2} %", r.co2, r.o2),
                    (_, None) => String::new(),
                };
                println!("[{:>2}/{}] {:>3.0}%  {}", n, total, *n as f64 / *total as f64 * 100.0, values);
            },
        }
    }

    fn on_done(&mut self, group: ChannelGroup, res: &Result<Vec<CalibrationRecord>, RunFailure>) {
        match res {
            Ok(records) => {
                for rec in records {
                    println!("{}", rec);
                }
                let passed = records.iter().filter(|r| r.is_passed()).count();
                println!("{}: {}/{} channel(s) passed.", group, passed, records.len());
            },
            Err(e) => {
                println!("{} calibration aborted. {}", group, e);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_choice_parsing() {
        assert_eq!("sim".parse::<SensorChoice>().unwrap(), SensorChoice::Simulated);
        assert_eq!("db".parse::<SensorChoice>().unwrap(), SensorChoice::Stored);
        assert_eq!(
            "https://host/sensor_value".parse::<SensorChoice>().unwrap(),
            SensorChoice::Http("https://host/sensor_value".to_owned())
        );
        assert!("ftp://host".parse::<SensorChoice>().is_err());
    }

    #[test]
    fn calibration_error_names_stage() {
        let err = CmdError::from(CalibrationError::InvalidReference {
            channel: GasChannel::CO,
            input: "abc".into(),
        });
        assert!(err.to_string().starts_with("Reference check: invalid CO reference value"));
    }

    #[test]
    fn run_ingest_then_history() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("gasmon.db");
        let device = DeviceReading { co_ppm: 12.0, co2_ppm: 400.0, o2_percent: 20.8, ..Default::default() };
        let mut cfg = Config::new(db_path.clone(), SensorChoice::Stored, ConcentrationUnit::Percent, Action::Ingest(device));
        cfg.run().unwrap();

        let csv = dir.path().join("history.csv");
        let history = History { limit: 10, use_calibration: true, chart: false, csv: Some(csv.clone()), tz: None };
        let mut cfg = Config::new(db_path, SensorChoice::Stored, ConcentrationUnit::Percent, Action::History(history));
        cfg.run().unwrap();

        let text = std::fs::read_to_string(&csv).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("datetime,co_ppm,co2_percent,o2_percent"));
        assert!(lines.next().unwrap().ends_with(",12.0,0.04,20.80"));
    }

    #[test]
    fn invalid_reference_fails_before_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let calibrate = Calibrate {
            group: ChannelGroup::Co,
            references: vec![(GasChannel::CO, "fifty".to_owned())],
            warmup: false,
        };
        let mut cfg = Config::new(
            dir.path().join("gasmon.db"),
            SensorChoice::Simulated,
            ConcentrationUnit::Percent,
            Action::Calibrate(calibrate),
        );
        let err = cfg.run().unwrap_err();
        assert!(matches!(err, CmdError::Calibration(CalibrationError::InvalidReference { .. })));
    }
}
