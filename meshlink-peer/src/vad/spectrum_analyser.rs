use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Frequency analyser over the most recent `fft_size` samples, producing
/// byte-scaled bin levels the way browsers report them.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            fft,
            window: blackman(fft_size),
            samples: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 0.999),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    pub fn push(&mut self, samples: &[f32]) {
        let size = self.fft_size();
        let tail = &samples[samples.len().saturating_sub(size)..];
        for _ in 0..(self.samples.len() + tail.len()).saturating_sub(size) {
            self.samples.pop_front();
        }
        self.samples.extend(tail.iter().copied());
    }

    /// Runs one analysis and returns each bin as a byte over
    /// [-100 dB, -30 dB]. Successive calls are smoothed.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let size = self.fft_size() as f32;

        for ((slot, sample), w) in self
            .buffer
            .iter_mut()
            .zip(self.samples.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.smoothed
            .iter_mut()
            .zip(self.buffer.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() / size;
                *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (255.0 / range * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Mean of the byte-scaled bins.
    pub fn average_level(&mut self) -> f32 {
        let data = self.byte_frequency_data();
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

fn blackman(size: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
