use serde::{Deserialize, Serialize};

/// Additive Holt-Winters smoother over a sequence of cycle lengths.
///
/// The "season" here is a short run of cycles (a user whose cycles alternate
/// long/short shows up as a seasonal component), not a calendar season.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HoltWinters {
    alpha: f64,    // Level smoothing factor
    beta: f64,     // Trend smoothing factor
    gamma: f64,    // Seasonality smoothing factor
    period: usize, // Season length in cycles

    level: f64,
    trend: f64,
    seasonals: Vec<f64>,

    initialized: bool,
    step: usize,
}

impl HoltWinters {
    pub fn new(alpha: f64, beta: f64, gamma: f64, period: usize) -> Self {
        let period = period.max(1);
        Self {
            alpha,
            beta,
            gamma,
            period,
            level: 0.0,
            trend: 0.0,
            seasonals: vec![0.0; period],
            initialized: false,
            step: 0,
        }
    }

    /// Feed every value of `series` in order
    pub fn fit(alpha: f64, beta: f64, gamma: f64, period: usize, series: &[f64]) -> Self {
        let mut hw = Self::new(alpha, beta, gamma, period);
        for &v in series {
            hw.update(v);
        }
        hw
    }

    /// Returns (expected value, deviation of `value` from it)
    ///
    /// The first `period` values only seed the model: the level starts at
    /// their mean and each seasonal at its value's offset from that mean.
    pub fn update(&mut self, value: f64) -> (f64, f64) {
        let slot = self.step % self.period;

        if !self.initialized {
            // Raw values are parked in their slots until the first season is complete
            self.seasonals[slot] = value;
            self.step += 1;
            if self.step == self.period {
                self.level = self.seasonals.iter().sum::<f64>() / self.period as f64;
                let level = self.level;
                self.seasonals.iter_mut().for_each(|s| *s -= level);
                self.initialized = true;
            }
            return (value, 0.0);
        }

        let seasonal = self.seasonals[slot];
        let expected = self.level + self.trend + seasonal;
        let previous_level = self.level;

        self.level = self.alpha * (value - seasonal)
            + (1.0 - self.alpha) * (previous_level + self.trend);
        self.trend = self.beta * (self.level - previous_level) + (1.0 - self.beta) * self.trend;
        self.seasonals[slot] = self.gamma * (value - self.level) + (1.0 - self.gamma) * seasonal;
        self.recenter();

        self.step += 1;
        (expected, value - expected)
    }

    /// Keeps the seasonals summing to zero so the level carries the mean
    fn recenter(&mut self) {
        let offset = self.seasonals.iter().sum::<f64>() / self.period as f64;
        self.seasonals.iter_mut().for_each(|s| *s -= offset);
        self.level += offset;
    }

    /// Forecast `horizon` steps past the last observed value (horizon >= 1).
    /// Only meaningful once the first season has been seen.
    pub fn forecast(&self, horizon: usize) -> f64 {
        let h = horizon.max(1);
        self.level + h as f64 * self.trend + self.seasonal_at(h)
    }

    /// Seasonal component that applies to the next value
    pub fn next_seasonal(&self) -> f64 {
        self.seasonal_at(1)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn get_seasonality(&self) -> &[f64] {
        &self.seasonals
    }

    fn seasonal_at(&self, horizon: usize) -> f64 {
        if !self.initialized {
            return 0.0;
        }
        let idx = (self.step + horizon - 1) % self.period;
        self.seasonals[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_series_forecasts_level() {
        let hw = HoltWinters::fit(0.3, 0.1, 0.2, 3, &[28.0; 9]);
        assert!(hw.is_initialized());
        assert!((hw.forecast(1) - 28.0).abs() < 1e-9);
        assert!(hw.next_seasonal().abs() < 1e-9);
    }

    #[test]
    fn test_warmup_has_no_seasonality() {
        let hw = HoltWinters::fit(0.3, 0.1, 0.2, 3, &[27.0, 29.0]);
        assert!(!hw.is_initialized());
        assert_eq!(hw.next_seasonal(), 0.0);
    }

    #[test]
    fn test_first_season_seeds_level_and_offsets() {
        let hw = HoltWinters::fit(0.3, 0.1, 0.3, 3, &[32.0, 27.0, 28.0]);
        assert!(hw.is_initialized());
        assert!((hw.forecast(1) - 32.0).abs() < 1e-9);
        assert!((hw.forecast(2) - 27.0).abs() < 1e-9);
        let sum: f64 = hw.get_seasonality().iter().sum();
        assert!(sum.abs() < 1e-9);
    }

    #[test]
    fn test_seasonals_stay_centered_on_noisy_series() {
        let series = [31.0, 26.0, 28.0, 33.0, 27.0, 27.0, 30.0, 25.0, 29.0, 32.0];
        let hw = HoltWinters::fit(0.3, 0.1, 0.3, 3, &series);
        let sum: f64 = hw.get_seasonality().iter().sum();
        assert!(sum.abs() < 1e-9);
        assert!(hw.forecast(1) > 20.0 && hw.forecast(1) < 40.0);
    }

    #[test]
    fn test_repeating_pattern_learns_seasonal_sign() {
        let series: Vec<f64> = (0..30)
            .map(|i| if i % 3 == 0 { 32.0 } else { 27.0 })
            .collect();
        let hw = HoltWinters::fit(0.2, 0.05, 0.5, 3, &series);
        // Next value is index 30, i.e. the long slot
        assert!(hw.next_seasonal() > 0.0);
        assert!(hw.forecast(1) > hw.forecast(2));
    }
}
