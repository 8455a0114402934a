use crate::error::{DeviceSwapError, MediaAccessError};
use crate::media::capture::{AudioConstraints, CaptureBackend, CaptureDevice, CaptureRequest};
use crate::media::frame::AudioFrame;
use crate::media::local_track::{LocalTrack, TrackEnded, TrackSource, TrackWiring};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

const AUDIO_TAP_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MediaStartOptions {
    pub video_device_id: Option<String>,
    pub audio_device_id: Option<String>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub audio: AudioConstraints,
}

impl Default for MediaStartOptions {
    fn default() -> Self {
        Self {
            video_device_id: None,
            audio_device_id: None,
            video_enabled: true,
            audio_enabled: true,
            audio: AudioConstraints::default(),
        }
    }
}

/// Snapshot of the live local tracks.
#[derive(Debug, Clone, Default)]
pub struct LocalTracks {
    pub camera: Option<Arc<LocalTrack>>,
    pub microphone: Option<Arc<LocalTrack>>,
    pub screen: Option<Arc<LocalTrack>>,
}

impl LocalTracks {
    pub fn get(&self, source: TrackSource) -> Option<&Arc<LocalTrack>> {
        match source {
            TrackSource::Camera => self.camera.as_ref(),
            TrackSource::Microphone => self.microphone.as_ref(),
            TrackSource::Screen => self.screen.as_ref(),
        }
    }

    fn slot(&mut self, source: TrackSource) -> &mut Option<Arc<LocalTrack>> {
        match source {
            TrackSource::Camera => &mut self.camera,
            TrackSource::Microphone => &mut self.microphone,
            TrackSource::Screen => &mut self.screen,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        [&self.camera, &self.microphone, &self.screen]
            .into_iter()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns local capture. Tracks are created, replaced and stopped only here;
/// sessions hold them by reference.
pub struct MediaSourceManager {
    backend: Arc<dyn CaptureBackend>,
    stream_id: String,
    tracks: Mutex<LocalTracks>,
    /// Bumped by `stop_all`; acquisitions that started under an older epoch
    /// are released instead of installed.
    epoch: AtomicU64,
    video_enabled: Arc<AtomicBool>,
    audio_enabled: Arc<AtomicBool>,
    audio_tap: broadcast::Sender<AudioFrame>,
    ended_tx: mpsc::UnboundedSender<TrackEnded>,
}

impl MediaSourceManager {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        ended_tx: mpsc::UnboundedSender<TrackEnded>,
    ) -> Self {
        let (audio_tap, _) = broadcast::channel(AUDIO_TAP_CAPACITY);
        Self {
            backend,
            stream_id: Uuid::new_v4().to_string(),
            tracks: Mutex::new(LocalTracks::default()),
            epoch: AtomicU64::new(0),
            video_enabled: Arc::new(AtomicBool::new(true)),
            audio_enabled: Arc::new(AtomicBool::new(true)),
            audio_tap,
            ended_tx,
        }
    }

    /// Stream id shared by every local track.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Opens camera and microphone. If either fails, whatever was already
    /// opened is released before returning.
    pub async fn start(&self, options: MediaStartOptions) -> Result<LocalTracks, MediaAccessError> {
        if self.is_active() {
            return Err(MediaAccessError::AlreadyStarted);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);

        let camera = self
            .open(CaptureRequest::camera(options.video_device_id.clone()))
            .await?;
        let microphone = self
            .open(CaptureRequest::microphone(
                options.audio_device_id.clone(),
                options.audio.clone(),
            ))
            .await?;

        let mut tracks = self.tracks.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!("Local media stopped during start; releasing devices");
            return Err(MediaAccessError::Discarded(
                TrackSource::Camera.capture_kind(),
            ));
        }
        if tracks.camera.is_some() || tracks.microphone.is_some() {
            return Err(MediaAccessError::AlreadyStarted);
        }

        self.video_enabled
            .store(options.video_enabled, Ordering::SeqCst);
        self.audio_enabled
            .store(options.audio_enabled, Ordering::SeqCst);

        tracks.camera = Some(self.spawn_track(TrackSource::Camera, camera));
        tracks.microphone = Some(self.spawn_track(TrackSource::Microphone, microphone));

        info!(
            "Local media started (video: {}, audio: {})",
            options.video_enabled, options.audio_enabled
        );
        Ok(tracks.clone())
    }

    pub fn is_active(&self) -> bool {
        let tracks = self.tracks.lock();
        tracks.camera.is_some() || tracks.microphone.is_some()
    }

    /// Flips the camera's enabled flag in place. `None` when there is no
    /// camera track.
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackSource::Camera)
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackSource::Microphone)
    }

    fn toggle(&self, source: TrackSource) -> Option<bool> {
        let tracks = self.tracks.lock();
        let track = tracks.get(source)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!("{} {}", source, if enabled { "enabled" } else { "muted" });
        Some(enabled)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Opens `device_id` as the future `source` track. The new track shares
    /// the enabled flag of the one it will replace. Nothing is installed yet.
    pub async fn open_replacement(
        &self,
        source: TrackSource,
        device_id: &str,
    ) -> Result<Arc<LocalTrack>, DeviceSwapError> {
        let request = match source {
            TrackSource::Camera => CaptureRequest::camera(Some(device_id.to_owned())),
            TrackSource::Microphone => CaptureRequest::microphone(
                Some(device_id.to_owned()),
                AudioConstraints::default(),
            ),
            TrackSource::Screen => return Err(DeviceSwapError::NoActiveTrack(source)),
        };
        if self.tracks.lock().get(source).is_none() {
            return Err(DeviceSwapError::NoActiveTrack(source));
        }
        let epoch = self.epoch.load(Ordering::SeqCst);

        let device = self
            .backend
            .open(&request)
            .await
            .map_err(|cause| DeviceSwapError::Open {
                source_kind: source,
                device_id: device_id.to_owned(),
                cause,
            })?;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(DeviceSwapError::Discarded);
        }
        Ok(self.spawn_track(source, device))
    }

    /// Makes `track` the current track for its source and stops the one it
    /// replaces.
    pub fn install(&self, track: Arc<LocalTrack>) -> Result<(), DeviceSwapError> {
        let source = track.source();
        let previous = {
            let mut tracks = self.tracks.lock();
            let slot = tracks.slot(source);
            if slot.is_none() {
                track.stop();
                return Err(DeviceSwapError::Discarded);
            }
            slot.replace(track.clone())
        };
        if let Some(previous) = previous {
            previous.stop();
        }
        info!("Installed {} track {} ({})", source, track.id(), track.label());
        Ok(())
    }

    /// Opens a display capture. Returns the existing track if already
    /// sharing.
    pub async fn start_screen_share(&self) -> Result<Arc<LocalTrack>, MediaAccessError> {
        if let Some(screen) = self.tracks.lock().screen.clone() {
            return Ok(screen);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let device = self.open(CaptureRequest::display()).await?;

        let mut tracks = self.tracks.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(MediaAccessError::Discarded(
                TrackSource::Screen.capture_kind(),
            ));
        }
        if let Some(screen) = tracks.screen.clone() {
            return Ok(screen);
        }
        let screen = self.spawn_track(TrackSource::Screen, device);
        tracks.screen = Some(screen.clone());
        Ok(screen)
    }

    /// Detaches the screen track from the current set. The caller stops it
    /// once no sender references it anymore.
    pub fn take_screen(&self) -> Option<Arc<LocalTrack>> {
        self.tracks.lock().screen.take()
    }

    /// Stops every track. Safe to call repeatedly.
    pub fn stop_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let tracks = std::mem::take(&mut *self.tracks.lock());
        if tracks.is_empty() {
            return;
        }
        for track in tracks.iter() {
            track.stop();
        }
        info!("Local media stopped ({} tracks)", tracks.len());
    }

    pub fn current_tracks(&self) -> LocalTracks {
        self.tracks.lock().clone()
    }

    /// Processed microphone PCM. Survives microphone swaps.
    pub fn local_audio_feed(&self) -> broadcast::Receiver<AudioFrame> {
        self.audio_tap.subscribe()
    }

    /// Tracks the microphone's enabled flag.
    pub fn audio_gate(&self) -> Arc<AtomicBool> {
        self.audio_enabled.clone()
    }

    async fn open(
        &self,
        request: CaptureRequest,
    ) -> Result<Box<dyn CaptureDevice>, MediaAccessError> {
        self.backend.open(&request).await.map_err(|source| {
            warn!("Failed to open {}: {}", request.kind, source);
            MediaAccessError::Capture {
                kind: request.kind,
                source,
            }
        })
    }

    fn spawn_track(&self, source: TrackSource, device: Box<dyn CaptureDevice>) -> Arc<LocalTrack> {
        let wiring = match source {
            TrackSource::Camera => TrackWiring {
                stream_id: self.stream_id.clone(),
                enabled: self.video_enabled.clone(),
                encoder: None,
                audio_tap: None,
                ended: Some(self.ended_tx.clone()),
            },
            TrackSource::Microphone => TrackWiring {
                stream_id: self.stream_id.clone(),
                enabled: self.audio_enabled.clone(),
                encoder: Some(self.backend.audio_encoder()),
                audio_tap: Some(self.audio_tap.clone()),
                ended: Some(self.ended_tx.clone()),
            },
            TrackSource::Screen => TrackWiring {
                stream_id: self.stream_id.clone(),
                enabled: Arc::new(AtomicBool::new(true)),
                encoder: None,
                audio_tap: None,
                ended: Some(self.ended_tx.clone()),
            },
        };
        LocalTrack::start(source, device, wiring)
    }
}

impl Drop for MediaSourceManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
