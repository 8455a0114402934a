use crate::media::frame::AudioFrame;
use std::f32::consts::PI;

const HIGHPASS_CUTOFF_HZ: f32 = 80.0;
/// Resonance in dB, as Web Audio interprets `Q` for high/low-pass filters.
const HIGHPASS_Q_DB: f32 = 1.0;

const COMPRESSOR_THRESHOLD_DB: f32 = -20.0;
const COMPRESSOR_KNEE_DB: f32 = 10.0;
const COMPRESSOR_RATIO: f32 = 4.0;
const COMPRESSOR_ATTACK_S: f32 = 0.003;
const COMPRESSOR_RELEASE_S: f32 = 0.25;

const OUTPUT_GAIN: f32 = 0.9;

/// Second-order high-pass section (transposed direct form II).
#[derive(Debug, Clone)]
pub struct HighPassFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl HighPassFilter {
    pub fn new(cutoff_hz: f32, q_db: f32, sample_rate: u32) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate as f32;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * 10f32.powf(q_db / 20.0));
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Feed-forward soft-knee compressor with an attack/release smoothed gain.
#[derive(Debug, Clone)]
pub struct DynamicsCompressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coef: f32,
    release_coef: f32,
    reduction_db: f32,
}

impl DynamicsCompressor {
    pub fn new(
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_s: f32,
        release_s: f32,
        sample_rate: u32,
    ) -> Self {
        let rate = sample_rate as f32;
        Self {
            threshold_db,
            knee_db,
            ratio,
            attack_coef: (-1.0 / (attack_s * rate)).exp(),
            release_coef: (-1.0 / (release_s * rate)).exp(),
            reduction_db: 0.0,
        }
    }

    /// Static curve: gain change in dB (always <= 0) for an input level.
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        let slope = 1.0 / self.ratio - 1.0;

        if 2.0 * over < -self.knee_db {
            0.0
        } else if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            slope * x * x / (2.0 * self.knee_db)
        } else {
            slope * over
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let level_db = 20.0 * x.abs().max(1e-6).log10();
        let target = self.gain_reduction_db(level_db);
        let coef = if target < self.reduction_db {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.reduction_db = coef * self.reduction_db + (1.0 - coef) * target;
        x * 10f32.powf(self.reduction_db / 20.0)
    }
}

/// Local microphone chain: high-pass → compressor → gain. Keeps rumble and
/// feedback peaks out of what every peer receives.
#[derive(Debug, Clone)]
pub struct AudioProcessingGraph {
    sample_rate: u32,
    highpass: HighPassFilter,
    compressor: DynamicsCompressor,
    gain: f32,
}

impl AudioProcessingGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            highpass: HighPassFilter::new(HIGHPASS_CUTOFF_HZ, HIGHPASS_Q_DB, sample_rate),
            compressor: DynamicsCompressor::new(
                COMPRESSOR_THRESHOLD_DB,
                COMPRESSOR_KNEE_DB,
                COMPRESSOR_RATIO,
                COMPRESSOR_ATTACK_S,
                COMPRESSOR_RELEASE_S,
                sample_rate,
            ),
            gain: OUTPUT_GAIN,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn process(&mut self, frame: &mut AudioFrame) {
        if frame.sample_rate != self.sample_rate && frame.sample_rate > 0 {
            *self = Self::new(frame.sample_rate);
        }
        for sample in frame.samples.iter_mut() {
            let filtered = self.highpass.process(*sample);
            *sample = self.compressor.process(filtered) * self.gain;
        }
    }
}
