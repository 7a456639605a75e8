//! Descriptive statistics over replicate readings.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). `None` below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Coefficient of variation in percent. `None` when the mean is zero.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if m == 0.0 {
        return None;
    }
    let sd = sample_std_dev(values)?;
    Some(sd / m.abs() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn sample_std_dev_uses_bessel_correction() {
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138_089_935).abs() < 1e-6);
        assert_eq!(sample_std_dev(&[1.0]), None);
    }

    #[test]
    fn cv_is_relative_to_mean() {
        let cv = coefficient_of_variation(&[99.0, 100.0, 101.0]).unwrap();
        assert!((cv - 1.0).abs() < 1e-9);
        assert_eq!(coefficient_of_variation(&[-1.0, 1.0]), None);
    }
}
