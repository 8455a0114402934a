use crate::error::{ConnectivityFailure, NegotiationError};
use crate::media::{LocalTrack, TrackSource};
use crate::negotiation::MeshEvent;
use crate::session::session_command::{CommandReply, RemoteStream, SessionCommand, SessionSnapshot};
use crate::session::session_context::SessionContext;
use crate::session::session_state::SessionState;
use crate::transport::{ConnectionEvent, MediaConnection, RemoteTrack, TransportState};
use crate::vad::VoiceSource;
use meshlink_core::{CandidateInit, PeerId, SessionDescription, TrackKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub(crate) type ConnectionSlot = Arc<OnceLock<Arc<dyn MediaConnection>>>;

/// Actor owning one peer's connection and handshake state. Commands for a
/// peer are handled one at a time, in arrival order.
pub struct PeerSession {
    peer_id: PeerId,
    ctx: SessionContext,
    slot: ConnectionSlot,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: SessionState,
    polite: bool,
    /// Candidates that arrived before any remote description was applied.
    pending_candidates: Vec<CandidateInit>,
    remote_described: bool,
    remote_streams: BTreeMap<String, Vec<RemoteTrack>>,
    /// Local source -> id of the local track its sender carries.
    attached: HashMap<TrackSource, String>,
    /// Remote audio track whose feed the voice monitor samples.
    voice_track: Option<String>,
    awaiting_answer: bool,
    renegotiation_pending: bool,
    transport_connected: bool,
    recovery_attempts: u32,
    unreachable_reported: bool,
}

impl PeerSession {
    pub(crate) fn new(
        peer_id: PeerId,
        ctx: SessionContext,
        slot: ConnectionSlot,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        let polite = ctx.config.is_polite_towards(&peer_id);
        Self {
            peer_id,
            ctx,
            slot,
            commands,
            state: SessionState::New,
            polite,
            pending_candidates: Vec::new(),
            remote_described: false,
            remote_streams: BTreeMap::new(),
            attached: HashMap::new(),
            voice_track: None,
            awaiting_answer: false,
            renegotiation_pending: false,
            transport_connected: false,
            recovery_attempts: 0,
            unreachable_reported: false,
        }
    }

    pub async fn run(mut self) {
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
        let connection = match self
            .ctx
            .factory
            .create(&self.peer_id, &self.ctx.config.connectivity, conn_tx)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to create connection for {}: {:?}", self.peer_id, e);
                self.emit(MeshEvent::PeerError {
                    peer_id: self.peer_id.clone(),
                    error: NegotiationError::Connection(e.to_string()),
                });
                return;
            }
        };
        let _ = self.slot.set(connection.clone());

        if let Err(e) = self.sync_senders(&connection).await {
            warn!("Initial track attach for {} failed: {}", self.peer_id, e);
        }
        info!("Session for {} started (polite: {})", self.peer_id, self.polite);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(&connection, c).await,
                        None => {
                            debug!("Command channel for {} closed", self.peer_id);
                            break;
                        }
                    }
                }

                Some(evt) = conn_rx.recv() => {
                    self.handle_connection_event(&connection, evt).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, conn: &Arc<dyn MediaConnection>, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Initiate => self.negotiate(conn, false).await,

            SessionCommand::RemoteOffer(offer) => self.handle_remote_offer(conn, offer).await,

            SessionCommand::RemoteAnswer(answer) => self.handle_remote_answer(conn, answer).await,

            SessionCommand::RemoteCandidate(candidate) => {
                if !self.remote_described {
                    debug!("Buffering candidate from {}", self.peer_id);
                    self.pending_candidates.push(candidate);
                    return;
                }
                self.apply_candidate(conn, candidate).await;
            }

            SessionCommand::Reconcile(reply) => self.handle_reconcile(conn, reply).await,

            SessionCommand::ReplaceTrack {
                source,
                track,
                reply,
            } => {
                let result = self.replace_track(conn, source, &track).await;
                let _ = reply.send(result);
            }

            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_remote_offer(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        offer: SessionDescription,
    ) {
        if self.awaiting_answer {
            if !self.polite {
                info!("Ignoring colliding offer from {}", self.peer_id);
                return;
            }
            info!("Offer collision with {}; rolling back ours", self.peer_id);
            if let Err(e) = conn.rollback().await {
                warn!("Rollback for {} failed: {:?}", self.peer_id, e);
            }
            self.awaiting_answer = false;
            self.renegotiation_pending = true;
        }
        self.enter_negotiating();

        if let Err(e) = self.answer(conn, offer).await {
            self.fail_and_retry(conn, e).await;
            return;
        }
        self.handshake_complete(conn).await;
    }

    async fn answer(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        offer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        conn.set_remote_description(offer)
            .await
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()))?;
        self.remote_described = true;
        self.drain_candidates(conn).await;

        let answer = conn
            .create_answer()
            .await
            .map_err(|e| NegotiationError::CreateAnswer(e.to_string()))?;
        conn.set_local_description(answer.clone())
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;

        if let Err(e) = self
            .ctx
            .signaling
            .send_answer(self.peer_id.clone(), answer)
            .await
        {
            warn!("Failed to send answer to {}: {:?}", self.peer_id, e);
            self.report(NegotiationError::Signaling(e.to_string()));
        }
        Ok(())
    }

    async fn handle_remote_answer(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        answer: SessionDescription,
    ) {
        if !self.awaiting_answer {
            debug!("Dropping unexpected answer from {}", self.peer_id);
            return;
        }

        if let Err(e) = conn.set_remote_description(answer).await {
            self.fail_and_retry(conn, NegotiationError::RemoteDescription(e.to_string()))
                .await;
            return;
        }
        self.awaiting_answer = false;
        self.remote_described = true;
        self.drain_candidates(conn).await;
        self.handshake_complete(conn).await;
    }

    /// Applies buffered candidates once, in arrival order.
    async fn drain_candidates(&mut self, conn: &Arc<dyn MediaConnection>) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return;
        }
        debug!("Applying {} buffered candidates for {}", pending.len(), self.peer_id);
        for candidate in pending {
            self.apply_candidate(conn, candidate).await;
        }
    }

    async fn apply_candidate(&self, conn: &Arc<dyn MediaConnection>, candidate: CandidateInit) {
        if let Err(e) = conn.add_ice_candidate(candidate).await {
            debug!("Failed to add ICE candidate for {}: {:?}", self.peer_id, e);
        }
    }

    async fn handshake_complete(&mut self, conn: &Arc<dyn MediaConnection>) {
        if self.transport_connected {
            self.set_state(SessionState::Connected);
        }
        if self.renegotiation_pending {
            self.negotiate(conn, false).await;
        }
    }

    /// Sends an offer, retrying with a fresh one on local failures until the
    /// recovery budget is spent.
    async fn negotiate(&mut self, conn: &Arc<dyn MediaConnection>, ice_restart: bool) {
        loop {
            match self.offer(conn, ice_restart).await {
                Ok(()) => return,
                Err(NegotiationError::Signaling(e)) => {
                    warn!("Failed to send offer to {}: {}", self.peer_id, e);
                    self.report(NegotiationError::Signaling(e));
                    return;
                }
                Err(e) => {
                    if !self.record_failure(conn, e).await {
                        return;
                    }
                }
            }
        }
    }

    async fn offer(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        ice_restart: bool,
    ) -> Result<(), NegotiationError> {
        if self.awaiting_answer {
            if !ice_restart {
                self.renegotiation_pending = true;
                return Ok(());
            }
            self.abandon_offer(conn).await;
        }
        self.renegotiation_pending = false;

        let offer = conn
            .create_offer(ice_restart)
            .await
            .map_err(|e| NegotiationError::CreateOffer(e.to_string()))?;
        conn.set_local_description(offer.clone())
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;
        self.awaiting_answer = true;
        self.enter_negotiating();

        if let Err(e) = self
            .ctx
            .signaling
            .send_offer(self.peer_id.clone(), offer)
            .await
        {
            // Retried on the next reconcile pass.
            self.abandon_offer(conn).await;
            self.renegotiation_pending = true;
            return Err(NegotiationError::Signaling(e.to_string()));
        }

        debug!(
            "Sent {}offer to {}",
            if ice_restart { "ICE restart " } else { "" },
            self.peer_id
        );
        Ok(())
    }

    async fn abandon_offer(&mut self, conn: &Arc<dyn MediaConnection>) {
        if let Err(e) = conn.rollback().await {
            debug!("Rollback for {} failed: {:?}", self.peer_id, e);
        }
        self.awaiting_answer = false;
    }

    async fn fail_and_retry(&mut self, conn: &Arc<dyn MediaConnection>, err: NegotiationError) {
        if self.record_failure(conn, err).await {
            self.negotiate(conn, false).await;
        }
    }

    /// Moves to `Recovering` and reports the failure. Returns false once the
    /// recovery budget is spent.
    async fn record_failure(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        err: NegotiationError,
    ) -> bool {
        warn!("Negotiation with {} failed: {}", self.peer_id, err);
        self.report(err);
        if self.awaiting_answer {
            self.abandon_offer(conn).await;
        }
        self.recover()
    }

    fn recover(&mut self) -> bool {
        self.recovery_attempts += 1;
        self.set_state(SessionState::Recovering);

        let max = self.ctx.config.max_recovery_attempts;
        if self.recovery_attempts <= max {
            return true;
        }
        if !self.unreachable_reported {
            self.unreachable_reported = true;
            error!("Peer {} unreachable after {} attempts", self.peer_id, max);
            self.emit(MeshEvent::PeerUnreachable(ConnectivityFailure {
                peer_id: self.peer_id.clone(),
                attempts: max,
            }));
        }
        false
    }

    async fn handle_reconcile(&mut self, conn: &Arc<dyn MediaConnection>, reply: Option<CommandReply>) {
        let result = self.sync_senders(conn).await;
        if let Err(e) = &result {
            warn!("Sender update for {} failed: {}", self.peer_id, e);
            self.report(e.clone());
        }

        if self.renegotiation_pending && !self.awaiting_answer && self.state != SessionState::New {
            self.negotiate(conn, false).await;
        }

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// Makes the senders match the current local tracks. Sender set changes
    /// mark the session for renegotiation.
    async fn sync_senders(&mut self, conn: &Arc<dyn MediaConnection>) -> Result<(), NegotiationError> {
        let tracks = self.ctx.media.current_tracks();
        let mut result = Ok(());

        for source in TrackSource::ALL {
            let wanted = tracks.get(source);
            let attached = self.attached.get(&source).cloned();

            let step = match (wanted, attached) {
                (Some(track), Some(id)) if id == track.id() => continue,
                (Some(track), Some(_)) if source.replaceable_in_place() => {
                    self.replace_track(conn, source, track).await
                }
                (Some(track), Some(_)) => match self.detach(conn, source).await {
                    Ok(()) => self.attach(conn, source, track).await,
                    Err(e) => Err(e),
                },
                (Some(track), None) => self.attach(conn, source, track).await,
                (None, Some(_)) => self.detach(conn, source).await,
                (None, None) => continue,
            };

            if let Err(e) = step {
                result = Err(e);
            }
        }
        result
    }

    async fn attach(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        source: TrackSource,
        track: &Arc<LocalTrack>,
    ) -> Result<(), NegotiationError> {
        conn.add_track(source, track.rtp_track())
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        self.attached.insert(source, track.id().to_owned());
        self.renegotiation_pending = true;
        Ok(())
    }

    async fn detach(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        source: TrackSource,
    ) -> Result<(), NegotiationError> {
        conn.remove_track(source)
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        self.attached.remove(&source);
        self.renegotiation_pending = true;
        Ok(())
    }

    async fn replace_track(
        &mut self,
        conn: &Arc<dyn MediaConnection>,
        source: TrackSource,
        track: &Arc<LocalTrack>,
    ) -> Result<(), NegotiationError> {
        if !self.attached.contains_key(&source) {
            return Ok(());
        }
        conn.replace_track(source, track.rtp_track())
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        self.attached.insert(source, track.id().to_owned());
        debug!("Replaced {} for {} with {}", source, self.peer_id, track.id());
        Ok(())
    }

    async fn handle_connection_event(&mut self, conn: &Arc<dyn MediaConnection>, evt: ConnectionEvent) {
        match evt {
            ConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .ctx
                    .signaling
                    .send_ice(self.peer_id.clone(), candidate)
                    .await
                {
                    debug!("Failed to send ICE candidate to {}: {:?}", self.peer_id, e);
                }
            }

            ConnectionEvent::TransportState(state) => self.handle_transport_state(conn, state).await,

            ConnectionEvent::TrackAdded { stream_id, track } => {
                self.on_track_added(stream_id, track).await;
            }

            ConnectionEvent::TrackRemoved {
                stream_id,
                track_id,
            } => self.on_track_removed(stream_id, track_id).await,
        }
    }

    async fn handle_transport_state(&mut self, conn: &Arc<dyn MediaConnection>, state: TransportState) {
        match state {
            TransportState::Connected => {
                self.transport_connected = true;
                self.recovery_attempts = 0;
                self.unreachable_reported = false;
                if !self.awaiting_answer {
                    self.set_state(SessionState::Connected);
                }
            }
            TransportState::Failed => {
                self.transport_connected = false;
                warn!("Transport to {} failed", self.peer_id);
                if self.recover() {
                    self.negotiate(conn, true).await;
                }
            }
            TransportState::Disconnected => {
                self.transport_connected = false;
                debug!("Transport to {} disconnected", self.peer_id);
            }
            _ => {}
        }
    }

    async fn on_track_added(&mut self, stream_id: String, track: RemoteTrack) {
        if track.kind == TrackKind::Audio
            && let Some(audio) = &track.audio
        {
            let source = VoiceSource::Peer(self.peer_id.clone());
            if self.voice_track.as_ref().is_some_and(|id| *id != track.id) {
                self.ctx.vad.unwatch(&source).await;
            }
            self.ctx.vad.watch(source, audio.subscribe(), None);
            self.voice_track = Some(track.id.clone());
        }

        info!("Remote {} track {} from {}", track.kind, track.id, self.peer_id);
        self.emit(MeshEvent::StreamAdded {
            peer_id: self.peer_id.clone(),
            stream_id: stream_id.clone(),
            track_id: track.id.clone(),
            kind: track.kind,
        });

        let tracks = self.remote_streams.entry(stream_id).or_default();
        tracks.retain(|t| t.id != track.id);
        tracks.push(track);
    }

    async fn on_track_removed(&mut self, stream_id: String, track_id: String) {
        let Some(tracks) = self.remote_streams.get_mut(&stream_id) else {
            return;
        };
        let Some(pos) = tracks.iter().position(|t| t.id == track_id) else {
            return;
        };
        let removed = tracks.remove(pos);

        if self.voice_track.as_ref() == Some(&removed.id) {
            self.voice_track = None;
            self.ctx
                .vad
                .unwatch(&VoiceSource::Peer(self.peer_id.clone()))
                .await;
        }

        if tracks.is_empty() {
            self.remote_streams.remove(&stream_id);
            info!("Remote stream {} from {} ended", stream_id, self.peer_id);
            self.emit(MeshEvent::StreamRemoved {
                peer_id: self.peer_id.clone(),
                stream_id,
            });
        }
    }

    fn enter_negotiating(&mut self) {
        if self.state != SessionState::Recovering {
            self.set_state(SessionState::Negotiating);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("Session {}: {} -> {}", self.peer_id, self.state, state);
        self.state = state;
        self.emit(MeshEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            state,
        });
    }

    fn report(&self, error: NegotiationError) {
        self.emit(MeshEvent::PeerError {
            peer_id: self.peer_id.clone(),
            error,
        });
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.ctx.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut senders: Vec<TrackSource> = self.attached.keys().copied().collect();
        senders.sort();

        SessionSnapshot {
            peer_id: self.peer_id.clone(),
            state: self.state,
            senders,
            pending_candidates: self.pending_candidates.len(),
            awaiting_answer: self.awaiting_answer,
            recovery_attempts: self.recovery_attempts,
            remote_streams: self
                .remote_streams
                .iter()
                .map(|(stream_id, tracks)| RemoteStream {
                    peer_id: self.peer_id.clone(),
                    stream_id: stream_id.clone(),
                    tracks: tracks.clone(),
                })
                .collect(),
        }
    }
}
