use crate::media::{AudioDecoder, TrackSource};
use crate::transport::connection_event::{ConnectionEvent, RemoteTrack};
use crate::transport::media_connection::{ConnectionFactory, MediaConnection};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use meshlink_core::{CandidateInit, ConnectivityConfig, PeerId, SessionDescription, TrackKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

const REMOTE_TRACK_CAPACITY: usize = 128;
const RTCP_BUFFER_SIZE: usize = 1500;

pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn AudioDecoder> + Send + Sync>;

/// Builds webrtc-rs peer connections.
#[derive(Clone, Default)]
pub struct RtcConnectionFactory {
    audio_decoder: Option<DecoderFactory>,
}

impl RtcConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode inbound audio so remote voice activity can be measured.
    pub fn with_audio_decoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn AudioDecoder> + Send + Sync + 'static,
    {
        self.audio_decoder = Some(Arc::new(factory));
        self
    }
}

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    async fn create(
        &self,
        peer_id: &PeerId,
        connectivity: &ConnectivityConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Arc<dyn MediaConnection>> {
        let connection = RtcConnection::new(
            peer_id.clone(),
            connectivity,
            events,
            self.audio_decoder.clone(),
        )
        .await?;
        Ok(Arc::new(connection))
    }
}

pub struct RtcConnection {
    peer_id: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackSource, Arc<RTCRtpSender>>>,
}

impl RtcConnection {
    pub async fn new(
        peer_id: PeerId,
        connectivity: &ConnectivityConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        audio_decoder: Option<DecoderFactory>,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: connectivity
                .ice_servers
                .iter()
                .map(RTCIceServer::from)
                .collect(),
            ice_candidate_pool_size: connectivity.ice_candidate_pool_size,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let state_tx = events.clone();
        let uid_state = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let uid = uid_state.clone();

                Box::pin(async move {
                    info!("Peer connection state changed for {}: {}", uid, s);
                    let _ = tx.send(ConnectionEvent::TransportState(s.into()));
                })
            },
        ));

        let ice_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let _ = tx.send(ConnectionEvent::LocalCandidate(init.into()));
            })
        }));

        let track_tx = events;
        let uid_track = peer_id.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                let uid = uid_track.clone();
                let decoder = audio_decoder.clone();

                Box::pin(async move {
                    let kind = TrackKind::from(track.kind());
                    let decoder = match kind {
                        TrackKind::Audio => decoder.map(|factory| factory()),
                        TrackKind::Video => None,
                    };
                    debug!("Remote {} track {} from {}", kind, track.id(), uid);
                    tokio::spawn(forward_remote_track(track, kind, decoder, tx));
                })
            },
        ));

        Ok(Self {
            peer_id,
            peer_connection,
            senders: Mutex::new(HashMap::new()),
        })
    }

    fn sender(&self, source: TrackSource) -> Option<Arc<RTCRtpSender>> {
        self.senders.lock().get(&source).cloned()
    }
}

/// Fans packets out to subscribers until the remote track ends.
async fn forward_remote_track(
    track: Arc<TrackRemote>,
    kind: TrackKind,
    mut decoder: Option<Box<dyn AudioDecoder>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let stream_id = track.stream_id();
    let mut remote = RemoteTrack::new(track.id(), kind);
    remote.rtp = Some(broadcast::channel(REMOTE_TRACK_CAPACITY).0);
    if decoder.is_some() {
        remote.audio = Some(broadcast::channel(REMOTE_TRACK_CAPACITY).0);
    }

    let _ = events.send(ConnectionEvent::TrackAdded {
        stream_id: stream_id.clone(),
        track: remote.clone(),
    });

    while let Ok((packet, _)) = track.read_rtp().await {
        if let (Some(decoder), Some(audio)) = (decoder.as_mut(), remote.audio.as_ref()) {
            match decoder.decode(&packet.payload) {
                Ok(frame) => {
                    let _ = audio.send(frame);
                }
                Err(e) => trace!("Dropped undecodable packet on {}: {}", remote.id, e),
            }
        }
        if let Some(rtp) = &remote.rtp {
            let _ = rtp.send(packet);
        }
    }

    let _ = events.send(ConnectionEvent::TrackRemoved {
        stream_id,
        track_id: remote.id,
    });
}

#[async_trait]
impl MediaConnection for RtcConnection {
    async fn add_track(
        &self,
        source: TrackSource,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()> {
        if self.sender(source).is_some() {
            return self.replace_track(source, track).await;
        }

        let sender = self
            .peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .with_context(|| format!("Failed to add {} track", source))?;

        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().insert(source, sender);
        debug!("Added {} sender for {}", source, self.peer_id);
        Ok(())
    }

    async fn remove_track(&self, source: TrackSource) -> Result<()> {
        let Some(sender) = self.senders.lock().remove(&source) else {
            return Ok(());
        };
        self.peer_connection.remove_track(&sender).await?;
        debug!("Removed {} sender for {}", source, self.peer_id);
        Ok(())
    }

    async fn replace_track(
        &self,
        source: TrackSource,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()> {
        let sender = self
            .sender(source)
            .ok_or_else(|| anyhow!("no {} sender to replace", source))?;
        sender
            .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.peer_connection.create_offer(options).await?;
        Ok(offer.into())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(answer.into())
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = RTCSessionDescription::try_from(description)?;
        self.peer_connection
            .set_local_description(description)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = RTCSessionDescription::try_from(description)
            .context("Failed to parse remote SDP")?;
        self.peer_connection
            .set_remote_description(description)
            .await?;
        Ok(())
    }

    /// Drops our pending offer. The rollback description has to carry
    /// parseable SDP, so the pending offer itself is reused.
    async fn rollback(&self) -> Result<()> {
        let Some(mut description) = self.peer_connection.pending_local_description().await else {
            return Ok(());
        };
        description.sdp_type = RTCSdpType::Rollback;
        self.peer_connection
            .set_local_description(description)
            .await
            .context("Failed to roll back local offer")?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().clear();
        self.peer_connection.close().await?;
        Ok(())
    }
}
