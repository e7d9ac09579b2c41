use serde::{Deserialize, Serialize};

/// Weight of an observation `age` time units old under exponential decay
pub fn decay_weight(age: f64, half_life: f64) -> f64 {
    if half_life <= 0.0 {
        return if age <= 0.0 { 1.0 } else { 0.0 };
    }
    0.5f64.powf(age.max(0.0) / half_life)
}

/// Smoothing factor for a sample arriving `elapsed` time units after the previous one
pub fn smoothing_factor(elapsed: f64, half_life: f64) -> f64 {
    (1.0 - decay_weight(elapsed, half_life)).clamp(0.0, 1.0)
}

/// Exponentially weighted mean and variance with a caller-supplied smoothing factor,
/// so irregularly spaced samples can be decayed by elapsed time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Ewma {
    mean: f64,
    variance: f64,
    samples: u64,
}

impl Ewma {
    pub fn new() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            samples: 0,
        }
    }

    /// Start from a prior mean; the first real sample is blended with it
    pub fn seeded(prior: f64) -> Self {
        Self {
            mean: prior,
            variance: 0.0,
            samples: 0,
        }
    }

    pub fn update(&mut self, sample: f64, alpha: f64) -> f64 {
        let alpha = alpha.clamp(0.0, 1.0);
        let diff = sample - self.mean;
        self.mean += alpha * diff;
        // Standard EWMVar update
        self.variance = (1.0 - alpha) * (self.variance + alpha * diff * diff);
        self.samples += 1;
        self.mean
    }

    pub fn value(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new()
    }
}
