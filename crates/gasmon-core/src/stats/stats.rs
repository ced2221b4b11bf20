pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Bessel-corrected variance around a precomputed mean.
pub fn sample_variance(data: &[f64], mean: f64) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let ss: f64 = data.iter().map(|&x| (x - mean).powi(2)).sum();
    Some(ss / (data.len() as f64 - 1.0))
}

/// True when every value is bit-identical to the first.
/// The summed mean of such a set can be off by an ulp, this catches it.
pub fn all_equal(data: &[f64]) -> bool {
    match data.first() {
        Some(first) => data.iter().all(|x| x.to_bits() == first.to_bits()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), None);
    }
    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1., 2., 3., 4.]), Some(2.5));
    }
    #[test]
    fn test_variance_single() {
        assert_eq!(sample_variance(&[3.0], 3.0), None);
    }
    #[test]
    fn test_variance_bessel() {
        // population variance would be 4.0
        let x = [2., 4., 4., 4., 5., 5., 7., 9.];
        assert_relative_eq!(sample_variance(&x, 5.0).unwrap(), 32.0 / 7.0);
    }
    #[test]
    fn test_all_equal() {
        assert!(all_equal(&[0.1; 30]));
        assert!(!all_equal(&[0.1, 0.1, 0.2]));
        assert!(all_equal(&[]));
    }
}
