use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VadConfig {
    /// Mean byte-scaled spectrum level above which a source is speaking.
    pub threshold: f32,
    pub interval_ms: u64,
    pub fft_size: usize,
    /// Per-bin magnitude smoothing between analyses, in `[0, 1)`.
    pub smoothing: f32,
    /// Minimum time a speaking state is held before it may flip again.
    /// Zero reports every crossing.
    pub min_hold_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            interval_ms: 100,
            fft_size: 256,
            smoothing: 0.5,
            min_hold_ms: 0,
        }
    }
}

impl VadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn min_hold(&self) -> Duration {
        Duration::from_millis(self.min_hold_ms)
    }
}
