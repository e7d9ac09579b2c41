//! Small-sample statistics over cycle-length series.
//!
//! Every function tolerates empty input and returns a neutral value rather
//! than NaN, so callers can feed sparse user histories directly.

/// Scale factor turning a MAD into a normal-consistent standard deviation
pub const MAD_TO_SIGMA: f64 = 1.4826;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (a single value has variance 0)
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around the median
pub fn mad(values: &[f64]) -> f64 {
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

/// Weighted mean and weighted population variance
pub fn weighted_mean_variance(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let total: f64 = weights.iter().take(values.len()).sum();
    if values.is_empty() || total <= 0.0 {
        return (mean(values), variance(values));
    }
    let m = values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / total;
    let var = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - m).powi(2))
        .sum::<f64>()
        / total;
    (m, var)
}

/// Kish effective sample size of a weight vector
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq <= 0.0 { 0.0 } else { sum * sum / sum_sq }
}

/// Least-squares line through `(i, values[i])`; returns `(intercept, slope)`
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (values.first().copied().unwrap_or(0.0), 0.0);
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    (y_mean - slope * x_mean, slope)
}

pub fn slope(values: &[f64]) -> f64 {
    linear_fit(values).1
}

/// Lag-1 autocorrelation; 0 when the series is constant or too short
pub fn lag1_autocorrelation(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let m = mean(values);
    let den: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    if den <= f64::EPSILON {
        return 0.0;
    }
    let num: f64 = values
        .windows(2)
        .map(|w| (w[0] - m) * (w[1] - m))
        .sum();
    (num / den).clamp(-1.0, 1.0)
}

/// Residuals of `values` around their least-squares line
pub fn detrend(values: &[f64]) -> Vec<f64> {
    let (intercept, slope) = linear_fit(values);
    values
        .iter()
        .enumerate()
        .map(|(i, v)| v - (intercept + slope * i as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_moments() {
        let v = [28.0, 30.0, 26.0, 28.0];
        assert_eq!(mean(&v), 28.0);
        assert_eq!(variance(&v), 2.0);
        assert_eq!(median(&v), 28.0);
        assert_eq!(mad(&v), 1.0);
        assert_eq!(variance(&[31.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_linear_fit_recovers_trend() {
        let v = [30.0, 29.0, 28.0, 27.0, 26.0];
        let (intercept, slope) = linear_fit(&v);
        assert!((slope + 1.0).abs() < 1e-12);
        assert!((intercept - 30.0).abs() < 1e-12);
        assert!(detrend(&v).iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_autocorrelation_of_alternating_series_is_negative() {
        let v = [26.0, 30.0, 26.0, 30.0, 26.0, 30.0];
        assert!(lag1_autocorrelation(&v) < -0.5);
        assert_eq!(lag1_autocorrelation(&[28.0; 6]), 0.0);
    }

    #[test]
    fn test_weighted_moments() {
        let (m, var) = weighted_mean_variance(&[20.0, 30.0], &[1.0, 3.0]);
        assert!((m - 27.5).abs() < 1e-12);
        assert!((var - 18.75).abs() < 1e-12);
        assert!((effective_sample_size(&[1.0, 1.0, 1.0]) - 3.0).abs() < 1e-12);
    }
}
