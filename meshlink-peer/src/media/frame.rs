use bytes::Bytes;
use std::time::Duration;

/// Mono PCM in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// One encoded video frame, ready to be packetized.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum MediaFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}
