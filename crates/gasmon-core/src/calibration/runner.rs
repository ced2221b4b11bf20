use super::correction::CorrectionApplier;
use super::record::CalibrationRecord;
use super::store::CalibrationStore;
use super::{RESULT_DISPLAY_DELAY, SAMPLE_COUNT, SAMPLE_INTERVAL, SENSOR_TIMEOUT};
use crate::calibrationevent::{CalibrationEvent, LifecycleEvent, ProgressEvent, RunFailure};
use crate::error::{CalibrationError, SensorError};
use crate::gaschannel::{ChannelGroup, GasChannel};
use crate::reading::SensorReading;
use crate::sensor::SensorSource;
use crate::stats::evaluate;
use crate::types::FastMap;

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Calibrating,
    Computing,
    Complete,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Calibrating | RunState::Computing)
    }
}

/// Operator input for one run: the group and a reference per channel in it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub group: ChannelGroup,
    pub references: Vec<(GasChannel, f64)>,
}

impl RunRequest {
    pub fn co(reference: f64) -> Self {
        Self { group: ChannelGroup::Co, references: vec![(GasChannel::CO, reference)] }
    }

    pub fn co2_o2(co2_reference: f64, o2_reference: f64) -> Self {
        Self {
            group: ChannelGroup::Co2O2,
            references: vec![(GasChannel::CO2, co2_reference), (GasChannel::O2, o2_reference)],
        }
    }

    /// Build a request from the text the operator typed, one entry per channel.
    pub fn parse(group: ChannelGroup, inputs: &[(GasChannel, &str)]) -> Result<Self, CalibrationError> {
        let references = inputs
            .iter()
            .map(|(channel, input)| parse_reference(*channel, input).map(|v| (*channel, v)))
            .collect::<Result<Vec<_>, _>>()?;
        let request = Self { group, references };
        request.validate()?;
        Ok(request)
    }

    pub fn reference(&self, channel: GasChannel) -> Option<f64> {
        self.references.iter().find(|(c, _)| *c == channel).map(|(_, v)| *v)
    }

    /// Every channel of the group needs a finite reference.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        for &channel in self.group.channels() {
            match self.reference(channel) {
                Some(v) if v.is_finite() => {},
                Some(v) => {
                    return Err(CalibrationError::InvalidReference { channel, input: v.to_string() })
                },
                None => {
                    return Err(CalibrationError::InvalidReference { channel, input: String::new() })
                },
            }
        }
        Ok(())
    }
}

pub fn parse_reference(channel: GasChannel, input: &str) -> Result<f64, CalibrationError> {
    match input.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CalibrationError::InvalidReference { channel, input: input.to_owned() }),
    }
}

#[derive(Debug, Clone)]
struct CalibrationRun {
    id: u64,
    state: RunState,
    references: Vec<(GasChannel, f64)>,
    samples: Vec<SensorReading>,
    results: Vec<CalibrationRecord>,
    started_at: Instant,
}

/// Point-in-time view of a group's run, for progress displays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunStatus {
    pub state: RunState,
    pub collected: usize,
    pub total: usize,
    pub references: Vec<(GasChannel, f64)>,
    pub last_sample: Option<SensorReading>,
    /// Records of the finished run, empty until it completes.
    pub results: Vec<CalibrationRecord>,
    pub elapsed: Duration,
}

impl RunStatus {
    /// Completion in percent.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.collected as f64 / self.total as f64 * 100.0
    }
}

type RunTable = Arc<Mutex<FastMap<ChannelGroup, CalibrationRun>>>;

/// Returns the group to idle if the run future is dropped mid-run.
struct ActiveRunGuard {
    runs: RunTable,
    progress: UnboundedSender<CalibrationEvent>,
    group: ChannelGroup,
    id: u64,
    armed: bool,
}

impl ActiveRunGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = {
            let mut runs = self.runs.lock();
            let stale = runs
                .get(&self.group)
                .is_some_and(|run| run.id == self.id && run.state.is_active());
            if stale {
                runs.remove(&self.group);
            }
            stale
        };
        if removed {
            warn!("{} calibration dropped before finishing", self.group);
            let _ = self.progress.send(CalibrationEvent::Lifecycle(self.group, LifecycleEvent::Idle));
        }
    }
}

/// Drives timed sampling, evaluation and persistence of calibration runs.
/// At most one run per `ChannelGroup` is active at a time.
pub struct CalibrationRunner {
    sensor: Arc<dyn SensorSource>,
    store: Arc<dyn CalibrationStore>,
    applier: Arc<CorrectionApplier>,
    runs: RunTable,
    progress: UnboundedSender<CalibrationEvent>,
    next_id: AtomicU64,
}

impl CalibrationRunner {
    pub fn new(
        sensor: Arc<dyn SensorSource>,
        store: Arc<dyn CalibrationStore>,
        applier: Arc<CorrectionApplier>,
        progress: UnboundedSender<CalibrationEvent>,
    ) -> Self {
        Self {
            sensor,
            store,
            applier,
            runs: Arc::new(Mutex::new(FastMap::default())),
            progress,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn applier(&self) -> &Arc<CorrectionApplier> {
        &self.applier
    }

    pub fn status(&self, group: ChannelGroup) -> RunStatus {
        match self.runs.lock().get(&group) {
            Some(run) => RunStatus {
                state: run.state,
                collected: run.samples.len(),
                total: SAMPLE_COUNT,
                references: run.references.clone(),
                last_sample: run.samples.last().copied(),
                results: run.results.clone(),
                elapsed: run.started_at.elapsed(),
            },
            None => RunStatus { total: SAMPLE_COUNT, ..Default::default() },
        }
    }

    /// Return every group that is not sampling or computing to idle and
    /// clear its displayed results. Stored records are kept. Active runs are
    /// stopped through their cancellation token, not here.
    pub fn reset(&self) -> usize {
        let mut runs = self.runs.lock();
        let before = runs.len();
        runs.retain(|_, run| run.state.is_active());
        before - runs.len()
    }

    /// Run a calibration to the end. Every failure leaves the group idle.
    ///
    /// Cancelling `cancel` stops sampling at the next suspension point and
    /// discards the readings taken so far; stored records are untouched.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<CalibrationRecord>, CalibrationError> {
        request.validate()?;
        let group = request.group;
        let id = self.begin(&request)?;
        let mut guard = ActiveRunGuard {
            runs: Arc::clone(&self.runs),
            progress: self.progress.clone(),
            group,
            id,
            armed: true,
        };
        info!("{} calibration started", group);

        let samples = match self.collect_samples(group, id, &cancel).await {
            Ok(samples) => samples,
            Err(e) => return Err(self.abort(group, id, e)),
        };

        self.set_state(group, id, RunState::Computing);
        self.send(CalibrationEvent::Lifecycle(group, LifecycleEvent::Computing));

        let records = match self.evaluate_and_store(&request, &samples).await {
            Ok(records) => records,
            Err(e) => return Err(self.abort(group, id, e)),
        };

        if let Some(run) = self.runs.lock().get_mut(&group).filter(|run| run.id == id) {
            run.state = RunState::Complete;
            run.results = records.clone();
        }
        guard.disarm();
        self.send(CalibrationEvent::Lifecycle(group, LifecycleEvent::Completed));
        self.send(CalibrationEvent::Done(group, Ok(records.clone())));
        self.schedule_idle(group, id, cancel);

        Ok(records)
    }

    fn begin(&self, request: &RunRequest) -> Result<u64, CalibrationError> {
        let mut runs = self.runs.lock();
        if runs.get(&request.group).is_some_and(|run| run.state.is_active()) {
            return Err(CalibrationError::RunInProgress(request.group));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        runs.insert(
            request.group,
            CalibrationRun {
                id,
                state: RunState::Calibrating,
                references: request.references.clone(),
                samples: Vec::with_capacity(SAMPLE_COUNT),
                results: Vec::new(),
                started_at: Instant::now(),
            },
        );
        drop(runs);
        self.send(CalibrationEvent::Lifecycle(
            request.group,
            LifecycleEvent::Started { total: SAMPLE_COUNT },
        ));
        Ok(id)
    }

    async fn collect_samples(
        &self,
        group: ChannelGroup,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SensorReading>, CalibrationError> {
        let mut samples = Vec::with_capacity(SAMPLE_COUNT);

        for step in 1..=SAMPLE_COUNT {
            if step > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CalibrationError::Cancelled),
                    _ = tokio::time::sleep(SAMPLE_INTERVAL) => {},
                }
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CalibrationError::Cancelled),
                res = tokio::time::timeout(SENSOR_TIMEOUT, self.sensor.current_reading()) => res,
            };
            let mut reading = match fetched {
                Ok(Ok(reading)) => reading,
                Ok(Err(source)) => {
                    return Err(CalibrationError::CaptureFailed { step, total: SAMPLE_COUNT, source })
                },
                Err(_) => {
                    return Err(CalibrationError::CaptureFailed {
                        step,
                        total: SAMPLE_COUNT,
                        source: SensorError::Timeout(SENSOR_TIMEOUT),
                    })
                },
            };

            if let Some(channel) = GasChannel::ALL.into_iter().find(|c| !reading.get(*c).is_finite()) {
                return Err(CalibrationError::CaptureFailed {
                    step,
                    total: SAMPLE_COUNT,
                    source: SensorError::Msg(format!("{channel} reading is not a finite number")),
                });
            }
            for channel in GasChannel::ALL {
                if let Some(cap) = channel.soft_cap() {
                    reading.set(channel, reading.get(channel).min(cap));
                }
            }
            debug!(step, co = reading.co, co2 = reading.co2, o2 = reading.o2, "{} sample", group);

            samples.push(reading);
            if let Some(run) = self.runs.lock().get_mut(&group).filter(|run| run.id == id) {
                run.samples.push(reading);
            }
            self.send(CalibrationEvent::Progress(group, ProgressEvent::Sample(reading)));
            self.send(CalibrationEvent::Progress(group, ProgressEvent::Collected(step, SAMPLE_COUNT)));
        }

        Ok(samples)
    }

    /// Channels are written one by one; a failed write does not undo the
    /// channels already stored in this run.
    async fn evaluate_and_store(
        &self,
        request: &RunRequest,
        samples: &[SensorReading],
    ) -> Result<Vec<CalibrationRecord>, CalibrationError> {
        let mut records = Vec::with_capacity(request.group.channels().len());
        let mut result = Ok(());

        for &channel in request.group.channels() {
            // validate() guarantees a reference for every channel of the group
            let reference = request.reference(channel).unwrap_or(f64::NAN);
            let readings: Vec<f64> = samples.iter().map(|s| s.get(channel)).collect();
            let evaluation = match evaluate(&readings, reference) {
                Ok(ev) => ev,
                Err(source) => {
                    result = Err(CalibrationError::Evaluation { channel, source });
                    break;
                },
            };

            let record =
                CalibrationRecord::from_evaluation(channel, reference, readings, &evaluation, Utc::now());
            if let Err(source) = self.store.upsert_record(&record).await {
                result = Err(CalibrationError::PersistFailed { channel, source });
                break;
            }
            info!(
                "{} calibration {}: avg {:.3}, t {:.3}, slope {:.4}",
                channel,
                if evaluation.passed { "passed" } else { "failed" },
                evaluation.average,
                evaluation.t_value,
                evaluation.slope,
            );
            records.push(record);
        }

        if !records.is_empty() {
            if let Err(e) = self.applier.refresh().await {
                warn!("could not refresh calibration cache: {e}");
            }
        }

        result.map(|_| records)
    }

    fn abort(&self, group: ChannelGroup, id: u64, err: CalibrationError) -> CalibrationError {
        {
            let mut runs = self.runs.lock();
            if runs.get(&group).is_some_and(|run| run.id == id) {
                runs.remove(&group);
            }
        }
        match &err {
            CalibrationError::Cancelled => info!("{} calibration cancelled", group),
            e => warn!("{} calibration failed: {}", group, e),
        }
        self.send(CalibrationEvent::Done(group, Err(RunFailure::from(&err))));
        self.send(CalibrationEvent::Lifecycle(group, LifecycleEvent::Idle));
        err
    }

    fn set_state(&self, group: ChannelGroup, id: u64, state: RunState) {
        if let Some(run) = self.runs.lock().get_mut(&group).filter(|run| run.id == id) {
            run.state = state;
        }
    }

    fn schedule_idle(&self, group: ChannelGroup, id: u64, cancel: CancellationToken) {
        let runs = Arc::clone(&self.runs);
        let progress = self.progress.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = tokio::time::sleep(RESULT_DISPLAY_DELAY) => {},
            }
            let reverted = {
                let mut runs = runs.lock();
                let finished = runs.get(&group).is_some_and(|run| run.id == id && run.state == RunState::Complete);
                if finished {
                    runs.remove(&group);
                }
                finished
            };
            if reverted {
                let _ = progress.send(CalibrationEvent::Lifecycle(group, LifecycleEvent::Idle));
            }
        });
    }

    fn send(&self, ev: CalibrationEvent) {
        // nobody listening is fine, the run goes on
        let _ = self.progress.send(ev);
    }
}
