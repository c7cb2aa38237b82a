//! Exponentially-weighted smoothing of noisy time signals.

/// Running exponential moving average.
///
/// The weight is derived from a window size in samples, so the estimate
/// converges over roughly that many observations. Callers guarantee
/// non-negative durations; there is no bounds checking here.
#[derive(Debug, Clone)]
pub struct DataSmoother {
    alpha: f64,
    value: f64,
    seeded: bool,
}

impl DataSmoother {
    pub fn new(window: u32) -> Self {
        Self {
            alpha: 2.0 / (window.max(1) as f64 + 1.0),
            value: 0.0,
            seeded: false,
        }
    }

    /// Fold one observation into the estimate. `force` (and the very first
    /// sample) seeds the estimate to the observation instead of blending,
    /// avoiding slow warm-up bias at startup.
    pub fn post_value(&mut self, observation: f64, force: bool) {
        if force || !self.seeded {
            self.value = observation;
            self.seeded = true;
        } else {
            self.value += self.alpha * (observation - self.value);
        }
    }

    pub fn smoothed_value(&self) -> f64 {
        self.value
    }
}
