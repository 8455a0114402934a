use crate::media::TrackSource;
use crate::transport::connection_event::ConnectionEvent;
use anyhow::Result;
use async_trait::async_trait;
use meshlink_core::{CandidateInit, ConnectivityConfig, PeerId, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// One peer-to-peer media connection. Owned by exactly one session; senders
/// are addressed by the local source they carry.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn add_track(
        &self,
        source: TrackSource,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()>;

    async fn remove_track(&self, source: TrackSource) -> Result<()>;

    /// Swaps what an existing sender carries without renegotiation.
    async fn replace_track(
        &self,
        source: TrackSource,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Abandons a local offer that has not been answered.
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates the connection for a new session. Callbacks from the connection
/// go to `events`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn create(
        &self,
        peer_id: &PeerId,
        connectivity: &ConnectivityConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Arc<dyn MediaConnection>>;
}
