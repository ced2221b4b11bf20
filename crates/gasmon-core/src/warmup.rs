use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Time the analyzer needs after power-up before readings are trustworthy.
pub const WARMUP_DURATION: Duration = Duration::from_secs(300);
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpStage {
    Initializing,
    Stabilizing,
    AlmostReady,
    Final,
    Ready,
}

impl WarmUpStage {
    pub fn from_remaining(remaining: Duration) -> Self {
        match remaining.as_secs() {
            0 if remaining.is_zero() => WarmUpStage::Ready,
            s if s > 240 => WarmUpStage::Initializing,
            s if s > 120 => WarmUpStage::Stabilizing,
            s if s > 60 => WarmUpStage::AlmostReady,
            _ => WarmUpStage::Final,
        }
    }
}

impl fmt::Display for WarmUpStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WarmUpStage::Initializing => write!(f, "Initializing sensors..."),
            WarmUpStage::Stabilizing => write!(f, "Stabilizing temperature..."),
            WarmUpStage::AlmostReady => write!(f, "Almost ready..."),
            WarmUpStage::Final => write!(f, "Final calibration..."),
            WarmUpStage::Ready => write!(f, "Sensors ready"),
        }
    }
}

/// Countdown from sensor power-up.
#[derive(Debug, Clone, Copy)]
pub struct WarmUp {
    started_at: Instant,
    duration: Duration,
}

impl WarmUp {
    pub fn start() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started_at: Instant) -> Self {
        Self { started_at, duration: WARMUP_DURATION }
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started_at.elapsed())
    }

    /// Share of the warm-up already behind us, 0 to 100.
    pub fn progress(&self) -> f64 {
        let done = self.duration.saturating_sub(self.remaining());
        done.as_secs_f64() / self.duration.as_secs_f64() * 100.0
    }

    pub fn stage(&self) -> WarmUpStage {
        WarmUpStage::from_remaining(self.remaining())
    }

    pub fn is_complete(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Wait until warmed up, calling `on_tick` about once a second.
    /// Returns false if cancelled first.
    pub async fn wait<F: FnMut(&WarmUp)>(&self, cancel: &CancellationToken, mut on_tick: F) -> bool {
        while !self.is_complete() {
            on_tick(self);
            let step = self.remaining().min(TICK);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {},
            }
        }
        on_tick(self);
        true
    }
}

pub fn format_mm_ss(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_boundaries() {
        let s = Duration::from_secs;
        assert_eq!(WarmUpStage::from_remaining(s(300)), WarmUpStage::Initializing);
        assert_eq!(WarmUpStage::from_remaining(s(241)), WarmUpStage::Initializing);
        assert_eq!(WarmUpStage::from_remaining(s(240)), WarmUpStage::Stabilizing);
        assert_eq!(WarmUpStage::from_remaining(s(121)), WarmUpStage::Stabilizing);
        assert_eq!(WarmUpStage::from_remaining(s(120)), WarmUpStage::AlmostReady);
        assert_eq!(WarmUpStage::from_remaining(s(60)), WarmUpStage::Final);
        assert_eq!(WarmUpStage::from_remaining(Duration::from_millis(400)), WarmUpStage::Final);
        assert_eq!(WarmUpStage::from_remaining(Duration::ZERO), WarmUpStage::Ready);
    }

    #[test]
    fn mm_ss() {
        assert_eq!(format_mm_ss(Duration::from_secs(300)), "5:00");
        assert_eq!(format_mm_ss(Duration::from_secs(61)), "1:01");
        assert_eq!(format_mm_ss(Duration::ZERO), "0:00");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_follows_the_clock() {
        let warmup = WarmUp::start();
        assert_eq!(warmup.remaining(), WARMUP_DURATION);
        assert_eq!(warmup.progress(), 0.0);

        tokio::time::advance(Duration::from_secs(150)).await;
        assert_eq!(warmup.remaining(), Duration::from_secs(150));
        assert_eq!(warmup.progress(), 50.0);
        assert_eq!(warmup.stage(), WarmUpStage::Stabilizing);

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(warmup.is_complete());
        assert_eq!(warmup.progress(), 100.0);
        assert_eq!(warmup.stage(), WarmUpStage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_runs_to_completion() {
        let warmup = WarmUp::start();
        let mut ticks = 0;
        let done = warmup.wait(&CancellationToken::new(), |_| ticks += 1).await;
        assert!(done);
        assert!(warmup.is_complete());
        assert_eq!(ticks, 301);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_stops_on_cancel() {
        let warmup = WarmUp::start();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });
        assert!(!warmup.wait(&cancel, |_| {}).await);
        assert!(!warmup.is_complete());
    }
}
