use anyhow::Result;
use async_trait::async_trait;
use meshlink_core::{CandidateInit, PeerId, SessionDescription};

/// Outbound half of the signaling channel. Implemented by whatever carries
/// messages to the other participants (usually a WebSocket client).
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    async fn send_offer(&self, peer_id: PeerId, sdp: SessionDescription) -> Result<()>;

    async fn send_answer(&self, peer_id: PeerId, sdp: SessionDescription) -> Result<()>;

    async fn send_ice(&self, peer_id: PeerId, candidate: CandidateInit) -> Result<()>;
}
