use crate::calibration::record::CalibrationRecord;
use crate::error::{CalibrationError, FailureStage};
use crate::gaschannel::ChannelGroup;
use crate::reading::SensorReading;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug)]
pub enum CalibrationEvent {
    Lifecycle(ChannelGroup, LifecycleEvent),
    Progress(ChannelGroup, ProgressEvent),
    Done(ChannelGroup, Result<Vec<CalibrationRecord>, RunFailure>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Started { total: usize },
    Computing,
    Completed,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Collected(usize, usize),
    Sample(SensorReading),
}

/// Failure as shown to the operator, naming the stage that broke.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl From<&CalibrationError> for RunFailure {
    fn from(err: &CalibrationError) -> Self {
        Self { stage: err.stage(), message: err.to_string() }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

pub trait CalibrationEventSink {
    fn on_lifecycle_event(&mut self, group: ChannelGroup, ev: &LifecycleEvent);
    fn on_progress_event(&mut self, group: ChannelGroup, ev: &ProgressEvent);
    fn on_done(&mut self, group: ChannelGroup, res: &Result<Vec<CalibrationRecord>, RunFailure>);
}

pub fn apply_event<T: CalibrationEventSink>(sink: &mut T, msg: CalibrationEvent) {
    match msg {
        CalibrationEvent::Lifecycle(group, ev) => sink.on_lifecycle_event(group, &ev),
        CalibrationEvent::Progress(group, ev) => sink.on_progress_event(group, &ev),
        CalibrationEvent::Done(group, res) => sink.on_done(group, &res),
    }
}

/// Hand every queued event to `sink` without waiting for new ones.
pub fn drain_events<T: CalibrationEventSink>(
    sink: &mut T,
    receiver: &mut UnboundedReceiver<CalibrationEvent>,
) {
    loop {
        match receiver.try_recv() {
            Ok(msg) => apply_event(sink, msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                break;
            },
        }
    }
}
