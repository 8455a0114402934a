use crate::config::MeshConfig;
use crate::error::{DeviceSwapError, MediaAccessError, NegotiationError};
use crate::media::{
    CaptureBackend, LocalTracks, MediaSourceManager, MediaStartOptions, TrackEnded, TrackSource,
};
use crate::negotiation::mesh_event::{MeshEvent, MeshEvents};
use crate::registry::PeerRegistry;
use crate::session::{PeerHandle, RemoteStream, SessionCommand, SessionContext, SessionSnapshot};
use crate::signaling::SignalingOutput;
use crate::transport::ConnectionFactory;
use crate::vad::{VoiceActivityMonitor, VoiceSource};
use dashmap::DashMap;
use futures::future::join_all;
use meshlink_core::{PeerId, RoomUser, SignalMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Entry point of the mesh: routes signaling to sessions and fans local
/// media changes out to every live session.
pub struct MeshCoordinator {
    config: Arc<MeshConfig>,
    media: Arc<MediaSourceManager>,
    vad: Arc<VoiceActivityMonitor>,
    registry: PeerRegistry,
    roster: DashMap<PeerId, String>,
    /// Peers that left, with the time they left.
    departed: DashMap<PeerId, Instant>,
    events: mpsc::UnboundedSender<MeshEvent>,
    track_ended: Mutex<Option<mpsc::UnboundedReceiver<TrackEnded>>>,
}

impl MeshCoordinator {
    pub fn new(
        config: MeshConfig,
        signaling: Arc<dyn SignalingOutput>,
        factory: Arc<dyn ConnectionFactory>,
        backend: Arc<dyn CaptureBackend>,
    ) -> (Arc<Self>, MeshEvents) {
        let config = Arc::new(config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (voice_tx, voice_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        let media = Arc::new(MediaSourceManager::new(backend, ended_tx));
        let vad = Arc::new(VoiceActivityMonitor::new(config.vad.clone(), voice_tx));

        let registry = PeerRegistry::new(SessionContext {
            config: config.clone(),
            signaling,
            factory,
            media: media.clone(),
            vad: vad.clone(),
            events: events_tx.clone(),
        });

        let coordinator = Arc::new(Self {
            config,
            media,
            vad,
            registry,
            roster: DashMap::new(),
            departed: DashMap::new(),
            events: events_tx,
            track_ended: Mutex::new(Some(ended_rx)),
        });

        let events = MeshEvents {
            events: events_rx,
            voice: voice_rx,
        };
        (coordinator, events)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn media(&self) -> &Arc<MediaSourceManager> {
        &self.media
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Drives the mesh: inbound signaling, local devices ending on their own,
    /// and the periodic sender consistency pass. Returns when `inbound`
    /// closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<SignalMessage>) {
        info!("Mesh event loop started");

        let mut ended = self.track_ended.lock().take();
        let mut reconcile = self.config.reconcile_interval().map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    match msg {
                        Some(m) => self.handle_signal(m).await,
                        None => {
                            info!("Signaling channel closed. Stopping mesh loop.");
                            break;
                        }
                    }
                }

                Some(track) = next_ended(&mut ended) => self.on_track_ended(track).await,

                _ = next_tick(&mut reconcile) => self.reconcile_all().await,
            }
        }

        info!("Mesh event loop finished");
    }

    pub async fn handle_signal(&self, msg: SignalMessage) {
        if let Some(local) = &self.config.local_id
            && msg.peer_id() == Some(local)
        {
            debug!("Ignoring signal about ourselves");
            return;
        }

        match msg {
            SignalMessage::Offer { from, sdp } => {
                if self.is_departed(&from) {
                    return;
                }
                self.registry
                    .get_or_create(&from)
                    .send(SessionCommand::RemoteOffer(sdp));
            }

            SignalMessage::Answer { from, sdp } => {
                let Some(handle) = self.registry.get(&from) else {
                    debug!("Dropping answer from unknown peer {}", from);
                    return;
                };
                handle.send(SessionCommand::RemoteAnswer(sdp));
            }

            SignalMessage::IceCandidate { from, candidate } => {
                if self.is_departed(&from) {
                    return;
                }
                self.registry
                    .get_or_create(&from)
                    .send(SessionCommand::RemoteCandidate(candidate));
            }

            SignalMessage::PeerJoined(RoomUser { id, display_name }) => {
                info!("Peer {} joined", id);
                self.departed.remove(&id);
                self.roster.insert(id.clone(), display_name.clone());
                let _ = self.events.send(MeshEvent::PeerJoined {
                    peer_id: id,
                    display_name,
                });
            }

            SignalMessage::PeerLeft { id } => {
                info!("Peer {} left", id);
                self.mark_departed(&id);
                self.roster.remove(&id);
                self.registry.remove(&id).await;
                let _ = self.events.send(MeshEvent::PeerLeft { peer_id: id });
            }

            SignalMessage::RoomUsers(users) => self.connect_to_room(users),
        }
    }

    /// We are the newcomer: offer to everyone already in the room.
    fn connect_to_room(&self, users: Vec<RoomUser>) {
        info!("Joining room with {} participants", users.len());
        for user in users {
            if self.config.local_id.as_ref() == Some(&user.id) {
                continue;
            }
            self.departed.remove(&user.id);
            self.roster.insert(user.id.clone(), user.display_name);
            self.registry
                .get_or_create(&user.id)
                .send(SessionCommand::Initiate);
        }
    }

    fn mark_departed(&self, peer_id: &PeerId) {
        let now = Instant::now();
        let grace = self.config.departed_grace();
        self.departed
            .retain(|_, left| now.duration_since(*left) < grace);
        self.departed.insert(peer_id.clone(), now);
    }

    fn is_departed(&self, peer_id: &PeerId) -> bool {
        let grace = self.config.departed_grace();
        self.departed
            .remove_if(peer_id, |_, left| left.elapsed() >= grace);
        let departed = self.departed.contains_key(peer_id);
        if departed {
            debug!("Dropping signal from departed peer {}", peer_id);
        }
        departed
    }

    /// Number of departed peers whose signals are still dropped.
    pub fn departed_count(&self) -> usize {
        self.departed.len()
    }

    pub async fn start_media(
        &self,
        options: MediaStartOptions,
    ) -> Result<LocalTracks, MediaAccessError> {
        let tracks = self.media.start(options).await?;
        self.vad.watch(
            VoiceSource::Local,
            self.media.local_audio_feed(),
            Some(self.media.audio_gate()),
        );
        self.reconcile_all().await;
        Ok(tracks)
    }

    /// Mutes or unmutes the camera in place. `None` without a camera.
    pub fn toggle_video(&self) -> Option<bool> {
        self.media.toggle_video()
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.media.toggle_audio()
    }

    pub async fn swap_video_device(&self, device_id: &str) -> Result<(), DeviceSwapError> {
        self.swap_device(TrackSource::Camera, device_id).await
    }

    pub async fn swap_audio_device(&self, device_id: &str) -> Result<(), DeviceSwapError> {
        self.swap_device(TrackSource::Microphone, device_id).await
    }

    /// Replaces the outbound track on every session, then installs it. Any
    /// failure puts the previous track back on the sessions that already
    /// switched.
    async fn swap_device(&self, source: TrackSource, device_id: &str) -> Result<(), DeviceSwapError> {
        let replacement = self.media.open_replacement(source, device_id).await?;
        let handles = self.registry.handles();

        let results = join_all(
            handles
                .iter()
                .map(|h| h.replace_track(source, replacement.clone())),
        )
        .await;

        let failure = handles.iter().zip(results.iter()).find_map(|(h, r)| match r {
            Err(NegotiationError::SessionClosed) | Ok(()) => None,
            Err(e) => Some((h.peer_id().clone(), e.clone())),
        });

        if let Some((peer_id, cause)) = failure {
            warn!("Swapping {} failed for {}: {}; rolling back", source, peer_id, cause);
            if let Some(previous) = self.media.current_tracks().get(source).cloned() {
                let switched: Vec<&PeerHandle> = handles
                    .iter()
                    .zip(results.iter())
                    .filter(|(_, r)| r.is_ok())
                    .map(|(h, _)| h)
                    .collect();
                join_all(
                    switched
                        .iter()
                        .map(|h| h.replace_track(source, previous.clone())),
                )
                .await;
            }
            replacement.stop();
            return Err(DeviceSwapError::Replace {
                source_kind: source,
                peer_id,
                cause,
            });
        }

        self.media.install(replacement)?;
        // Sessions created during the swap attached the previous track.
        self.reconcile_all().await;
        Ok(())
    }

    /// Starts screen capture and adds it to every session.
    pub async fn start_screen_share(&self) -> Result<(), MediaAccessError> {
        let screen = self.media.start_screen_share().await?;
        info!("Screen share started ({})", screen.label());
        self.reconcile_all().await;
        Ok(())
    }

    /// Removes the screen track from every session. Returns false if not
    /// sharing.
    pub async fn stop_screen_share(&self) -> bool {
        let Some(screen) = self.media.take_screen() else {
            return false;
        };
        self.reconcile_all().await;
        screen.stop();
        info!("Screen share stopped");
        true
    }

    async fn on_track_ended(&self, ended: TrackEnded) {
        let current = self.media.current_tracks();
        let Some(track) = current.get(ended.source) else {
            return;
        };
        if track.id() != ended.track_id {
            return;
        }

        match ended.source {
            TrackSource::Screen => {
                if self.stop_screen_share().await {
                    let _ = self.events.send(MeshEvent::ScreenShareEnded);
                }
            }
            source => warn!("Local {} device ended unexpectedly", source),
        }
    }

    /// Stops all capture and drops the senders from every session.
    pub async fn stop_media(&self) {
        self.media.stop_all();
        self.vad.unwatch(&VoiceSource::Local).await;
        self.reconcile_all().await;
    }

    /// Closes every session and releases all local resources.
    pub async fn leave(&self) {
        info!("Leaving room");
        self.registry.remove_all().await;
        self.media.stop_all();
        self.vad.unwatch_all().await;
        self.roster.clear();
    }

    /// Brings every session's senders in line with the current local tracks.
    pub async fn reconcile_all(&self) {
        let handles = self.registry.handles();
        let results = join_all(handles.iter().map(|h| h.reconcile())).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                debug!("Reconcile for {} failed: {}", handle.peer_id(), e);
            }
        }
    }

    /// Current inbound streams of every session.
    pub async fn remote_streams(&self) -> Vec<RemoteStream> {
        let handles = self.registry.handles();
        join_all(handles.iter().map(|h| h.snapshot()))
            .await
            .into_iter()
            .flatten()
            .flat_map(|snapshot| snapshot.remote_streams)
            .collect()
    }

    pub async fn session_snapshot(&self, peer_id: &PeerId) -> Option<SessionSnapshot> {
        self.registry.get(peer_id)?.snapshot().await
    }

    pub fn display_name(&self, peer_id: &PeerId) -> Option<String> {
        self.roster.get(peer_id).map(|name| name.clone())
    }

    pub fn is_speaking(&self, source: &VoiceSource) -> bool {
        self.vad.is_speaking(source)
    }
}

async fn next_ended(rx: &mut Option<mpsc::UnboundedReceiver<TrackEnded>>) -> Option<TrackEnded> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
