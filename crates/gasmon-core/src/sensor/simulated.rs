use super::SensorSource;
use crate::error::SensorError;
use crate::reading::SensorReading;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Analyzer stand-in for dry runs: a fixed base reading plus uniform noise.
pub struct SimulatedSensorSource {
    base: SensorReading,
    jitter: SensorReading,
    rng: Mutex<StdRng>,
}

impl SimulatedSensorSource {
    pub fn new(base: SensorReading, jitter: SensorReading) -> Self {
        Self { base, jitter, rng: Mutex::new(StdRng::from_os_rng()) }
    }

    /// Deterministic sequence for tests.
    pub fn seeded(base: SensorReading, jitter: SensorReading, seed: u64) -> Self {
        Self { base, jitter, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// Clean ambient air with a little sensor noise.
    pub fn ambient() -> Self {
        Self::new(SensorReading::new(2.0, 0.04, 20.9), SensorReading::new(0.5, 0.005, 0.05))
    }
}

fn noisy(rng: &mut StdRng, base: f64, jitter: f64) -> f64 {
    if jitter > 0.0 {
        (base + rng.random_range(-jitter..=jitter)).max(0.0)
    } else {
        base
    }
}

#[async_trait]
impl SensorSource for SimulatedSensorSource {
    async fn current_reading(&self) -> Result<SensorReading, SensorError> {
        let mut rng = self.rng.lock();
        Ok(SensorReading {
            co: noisy(&mut rng, self.base.co, self.jitter.co),
            co2: noisy(&mut rng, self.base.co2, self.jitter.co2),
            o2: noisy(&mut rng, self.base.o2, self.jitter.o2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readings_stay_within_jitter() {
        let base = SensorReading::new(50.0, 0.5, 20.0);
        let src = SimulatedSensorSource::seeded(base, SensorReading::new(1.0, 0.1, 0.2), 7);
        for _ in 0..100 {
            let r = src.current_reading().await.unwrap();
            assert!((r.co - 50.0).abs() <= 1.0);
            assert!((r.co2 - 0.5).abs() <= 0.1);
            assert!((r.o2 - 20.0).abs() <= 0.2);
        }
    }

    #[tokio::test]
    async fn zero_jitter_is_constant() {
        let base = SensorReading::new(410.0, 0.04, 20.9);
        let src = SimulatedSensorSource::new(base, SensorReading::default());
        assert_eq!(src.current_reading().await.unwrap(), base);
        assert_eq!(src.current_reading().await.unwrap(), base);
    }

    #[tokio::test]
    async fn same_seed_same_sequence() {
        let base = SensorReading::new(10.0, 1.0, 20.0);
        let jitter = SensorReading::new(1.0, 0.1, 0.1);
        let a = SimulatedSensorSource::seeded(base, jitter, 42);
        let b = SimulatedSensorSource::seeded(base, jitter, 42);
        for _ in 0..5 {
            assert_eq!(a.current_reading().await.unwrap(), b.current_reading().await.unwrap());
        }
    }
}
