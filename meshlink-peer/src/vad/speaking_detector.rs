use std::time::Duration;
use tokio::time::Instant;

/// Turns sampled levels into a speaking flag, reporting only crossings.
#[derive(Debug, Clone)]
pub struct SpeakingDetector {
    threshold: f32,
    min_hold: Duration,
    speaking: bool,
    last_change: Option<Instant>,
}

impl SpeakingDetector {
    pub fn new(threshold: f32, min_hold: Duration) -> Self {
        Self {
            threshold,
            min_hold,
            speaking: false,
            last_change: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Forces the not-speaking state, ignoring the hold time. Returns whether
    /// the source was speaking.
    pub fn reset(&mut self) -> bool {
        let was_speaking = self.speaking;
        self.speaking = false;
        self.last_change = None;
        was_speaking
    }

    /// Returns the new state when it changed. A closed gate always reads as
    /// not speaking.
    pub fn update(&mut self, level: f32, gate_open: bool, now: Instant) -> Option<bool> {
        let speaking = gate_open && level > self.threshold;
        if speaking == self.speaking {
            return None;
        }
        if let Some(last) = self.last_change
            && now.duration_since(last) < self.min_hold
        {
            return None;
        }
        self.speaking = speaking;
        self.last_change = Some(now);
        Some(speaking)
    }
}
