use crate::media::audio_graph::AudioProcessingGraph;
use crate::media::capture::{AudioEncoder, CaptureDevice, CaptureKind};
use crate::media::frame::{AudioFrame, MediaFrame};
use meshlink_core::TrackKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Which local capture a track comes from. Each source has at most one live
/// track at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

impl TrackSource {
    pub const ALL: [TrackSource; 3] = [Self::Camera, Self::Microphone, Self::Screen];

    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Microphone => TrackKind::Audio,
            Self::Camera | Self::Screen => TrackKind::Video,
        }
    }

    pub fn capture_kind(&self) -> CaptureKind {
        match self {
            Self::Camera => CaptureKind::Camera,
            Self::Microphone => CaptureKind::Microphone,
            Self::Screen => CaptureKind::Display,
        }
    }

    /// Camera and microphone are swapped on existing senders; screen share
    /// adds and removes a sender and needs a new offer.
    pub fn replaceable_in_place(&self) -> bool {
        !matches!(self, Self::Screen)
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera => f.write_str("camera"),
            Self::Microphone => f.write_str("microphone"),
            Self::Screen => f.write_str("screen"),
        }
    }
}

/// Sent by a pump when its device stops producing frames on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEnded {
    pub track_id: String,
    pub source: TrackSource,
}

/// A running local capture. Every connection's sender references the same
/// `rtp` track, so muting or stopping here is seen by all peers at once.
pub struct LocalTrack {
    id: String,
    source: TrackSource,
    label: String,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("label", &self.label)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub(crate) struct TrackWiring {
    pub stream_id: String,
    pub enabled: Arc<AtomicBool>,
    pub encoder: Option<Box<dyn AudioEncoder>>,
    pub audio_tap: Option<broadcast::Sender<AudioFrame>>,
    pub ended: Option<mpsc::UnboundedSender<TrackEnded>>,
}

impl LocalTrack {
    /// Takes ownership of `device` and starts pumping its frames. Audio goes
    /// through the processing graph and `wiring.encoder`; video frames are
    /// already encoded by the device.
    pub(crate) fn start(
        source: TrackSource,
        device: Box<dyn CaptureDevice>,
        wiring: TrackWiring,
    ) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        let label = device.label();
        let codec = match (&wiring.encoder, source.kind()) {
            (Some(encoder), TrackKind::Audio) => encoder.codec(),
            _ => device.codec(),
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            wiring.stream_id.clone(),
        ));

        let track = Arc::new(Self {
            id: id.clone(),
            source,
            label,
            rtp: rtp.clone(),
            enabled: wiring.enabled.clone(),
            stopped: AtomicBool::new(false),
            pump: Mutex::new(None),
        });

        let pump = Pump {
            track_id: id,
            source,
            rtp,
            enabled: wiring.enabled,
            ended: wiring.ended,
        };
        let handle = match wiring.encoder {
            Some(encoder) if source.kind() == TrackKind::Audio => {
                tokio::spawn(pump.run_audio(device, encoder, wiring.audio_tap))
            }
            _ => tokio::spawn(pump.run_video(device)),
        };
        *track.pump.lock() = Some(handle);

        info!("Started {} track {} ({})", track.source, track.id, track.label);
        track
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The object handed to every connection's sender.
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    /// Stops the pump and releases the capture device. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        debug!("Stopped {} track {}", self.source, self.id);
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Pump {
    track_id: String,
    source: TrackSource,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    ended: Option<mpsc::UnboundedSender<TrackEnded>>,
}

impl Pump {
    async fn run_audio(
        self,
        mut device: Box<dyn CaptureDevice>,
        mut encoder: Box<dyn AudioEncoder>,
        tap: Option<broadcast::Sender<AudioFrame>>,
    ) {
        let mut graph = AudioProcessingGraph::new(DEFAULT_SAMPLE_RATE);

        while let Some(frame) = device.next_frame().await {
            let MediaFrame::Audio(mut frame) = frame else {
                continue;
            };
            graph.process(&mut frame);

            if let Some(tap) = &tap {
                // No receivers is fine.
                let _ = tap.send(frame.clone());
            }

            if !self.enabled.load(Ordering::Relaxed) {
                frame.samples.fill(0.0);
            }

            let duration = frame.duration();
            match encoder.encode(&frame) {
                Ok(data) => self.write(data, duration).await,
                Err(e) => warn!("Failed to encode {} frame: {}", self.source, e),
            }
        }

        drop(device);
        self.finish();
    }

    async fn run_video(self, mut device: Box<dyn CaptureDevice>) {
        while let Some(frame) = device.next_frame().await {
            let MediaFrame::Video(frame) = frame else {
                continue;
            };
            if !self.enabled.load(Ordering::Relaxed) {
                continue;
            }
            self.write(frame.data, frame.duration).await;
        }

        drop(device);
        self.finish();
    }

    async fn write(&self, data: bytes::Bytes, duration: std::time::Duration) {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        if let Err(e) = self.rtp.write_sample(&sample).await {
            debug!("Dropped {} sample on track {}: {}", self.source, self.track_id, e);
        }
    }

    fn finish(self) {
        info!("{} device for track {} ended", self.source, self.track_id);
        if let Some(ended) = self.ended {
            let _ = ended.send(TrackEnded {
                track_id: self.track_id,
                source: self.source,
            });
        }
    }
}
