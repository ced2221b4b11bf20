use super::evalerror::{EvalError, EvalResult};
use super::stats::{all_equal, mean, sample_variance};

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-tailed critical t for df = 29, alpha = 0.05.
/// Only exact for 30 readings, the sample count is fixed to match.
pub const CRITICAL_T_VALUE: f64 = 2.045;
pub const MIN_READINGS: usize = 2;

/// Outcome of a one-sample t-test of the readings against the reference gas,
/// together with the scale correction derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub n: usize,
    pub average: f64,
    pub std_dev: f64,
    pub standard_error: f64,
    pub t_value: f64,
    /// Informational, `passed` is decided by `CRITICAL_T_VALUE` only.
    pub p_value: f64,
    pub passed: bool,
    pub slope: f64,
    pub intercept: f64,
}

/// Evaluate a finished sample set against the operator's reference value.
///
/// A zero-variance set has no standard error; it is reported as t = 0 and
/// therefore passes. The correction is always a pure scale: intercept stays 0.
pub fn evaluate(readings: &[f64], reference: f64) -> EvalResult<Evaluation> {
    if readings.len() < MIN_READINGS {
        return Err(EvalError::NotEnoughReadings { len: readings.len(), needed: MIN_READINGS });
    }
    if !reference.is_finite() {
        return Err(EvalError::NonFiniteReference);
    }
    if let Some(index) = readings.iter().position(|v| !v.is_finite()) {
        return Err(EvalError::NonFiniteReading { index });
    }

    let n = readings.len() as f64;
    let average = mean(readings).ok_or(EvalError::StatError("mean of empty readings"))?;
    let variance = if all_equal(readings) {
        0.0
    } else {
        sample_variance(readings, average).ok_or(EvalError::StatError("variance undefined"))?
    };

    let std_dev = variance.sqrt();
    let standard_error = std_dev / n.sqrt();

    let (t_value, p_value) = if standard_error != 0.0 {
        let t = (average - reference) / standard_error;
        let dist = StudentsT::new(0.0, 1.0, n - 1.0)
            .map_err(|_| EvalError::StatError("failed to construct StudentsT"))?;
        (t, 2.0 * (1.0 - dist.cdf(t.abs())))
    } else {
        (0.0, 1.0)
    };

    let passed = t_value.abs() <= CRITICAL_T_VALUE;
    let slope = if average != 0.0 { reference / average } else { 1.0 };

    Ok(Evaluation {
        n: readings.len(),
        average,
        std_dev,
        standard_error,
        t_value,
        p_value,
        passed,
        slope,
        intercept: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> Vec<f64> {
        (1..=30).map(|v| v as f64).collect()
    }

    #[test]
    fn zero_variance_passes_with_t_zero() {
        let ev = evaluate(&[410.0; 30], 400.0).unwrap();
        assert_eq!(ev.average, 410.0);
        assert_eq!(ev.std_dev, 0.0);
        assert_eq!(ev.t_value, 0.0);
        assert!(ev.passed);
        assert_eq!(ev.p_value, 1.0);
        assert_relative_eq!(ev.slope, 400.0 / 410.0);
        assert_relative_eq!(ev.slope, 0.9756, epsilon = 1e-4);
        assert_eq!(ev.intercept, 0.0);
    }

    #[test]
    fn zero_variance_with_unrepresentable_value() {
        // 30 * 0.1 does not sum back to exactly 3.0
        let ev = evaluate(&[0.1; 30], 20.9).unwrap();
        assert_eq!(ev.t_value, 0.0);
        assert!(ev.passed);
    }

    #[test]
    fn mean_equal_to_reference_gives_t_zero() {
        let readings: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let ev = evaluate(&readings, 10.0).unwrap();
        assert_eq!(ev.average, 10.0);
        assert!(ev.std_dev > 0.0);
        assert_eq!(ev.t_value, 0.0);
        assert!(ev.passed);
        assert_eq!(ev.slope, 1.0);
    }

    #[test]
    fn known_t_value() {
        let ev = evaluate(&ramp(), 15.0).unwrap();
        assert_eq!(ev.n, 30);
        assert_relative_eq!(ev.average, 15.5);
        assert_relative_eq!(ev.std_dev, 77.5_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(ev.standard_error, 1.607275, epsilon = 1e-6);
        assert_relative_eq!(ev.t_value, 0.311084, epsilon = 1e-5);
        assert!(ev.passed);
        assert!(ev.p_value > 0.7 && ev.p_value < 0.8);
    }

    #[test]
    fn biased_sensor_fails_but_still_yields_slope() {
        let readings: Vec<f64> = (0..30).map(|i| 410.0 + (i % 3) as f64 - 1.0).collect();
        let ev = evaluate(&readings, 400.0).unwrap();
        assert!(ev.t_value > CRITICAL_T_VALUE);
        assert!(!ev.passed);
        assert!(ev.p_value < 0.05);
        assert_relative_eq!(ev.slope, 400.0 / ev.average);
        assert_eq!(ev.intercept, 0.0);
    }

    #[test]
    fn negative_t_uses_magnitude() {
        let readings: Vec<f64> = (0..30).map(|i| 390.0 + (i % 3) as f64 - 1.0).collect();
        let ev = evaluate(&readings, 400.0).unwrap();
        assert!(ev.t_value < -CRITICAL_T_VALUE);
        assert!(!ev.passed);
    }

    #[test]
    fn zero_average_keeps_identity_slope() {
        let readings: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { -1.0 } else { 1.0 }).collect();
        let ev = evaluate(&readings, 0.5).unwrap();
        assert_eq!(ev.average, 0.0);
        assert_eq!(ev.slope, 1.0);
    }

    #[test]
    fn too_few_readings() {
        assert_eq!(
            evaluate(&[1.0], 1.0),
            Err(EvalError::NotEnoughReadings { len: 1, needed: 2 })
        );
        assert!(evaluate(&[], 1.0).is_err());
    }

    #[test]
    fn non_finite_input_rejected() {
        assert_eq!(evaluate(&[1.0, f64::NAN, 2.0], 1.0), Err(EvalError::NonFiniteReading { index: 1 }));
        assert_eq!(evaluate(&[1.0, 2.0], f64::NAN), Err(EvalError::NonFiniteReference));
    }

    #[test]
    fn deterministic() {
        assert_eq!(evaluate(&ramp(), 14.0).unwrap(), evaluate(&ramp(), 14.0).unwrap());
    }
}
