use crate::signaling::signaling_output::SignalingOutput;
use anyhow::{Context, Result};
use async_trait::async_trait;
use meshlink_core::{CandidateInit, OutboundSignal, PeerId, SessionDescription};
use tokio::sync::mpsc;

/// Hands outbound signals to a channel; the embedding app forwards them to
/// its socket.
#[derive(Clone)]
pub struct ChannelSignaling {
    tx: mpsc::UnboundedSender<OutboundSignal>,
}

impl ChannelSignaling {
    pub fn new(tx: mpsc::UnboundedSender<OutboundSignal>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, signal: OutboundSignal) -> Result<()> {
        self.tx
            .send(signal)
            .ok()
            .context("signaling channel closed")
    }
}

#[async_trait]
impl SignalingOutput for ChannelSignaling {
    async fn send_offer(&self, peer_id: PeerId, sdp: SessionDescription) -> Result<()> {
        self.send(OutboundSignal::Offer { to: peer_id, sdp })
    }

    async fn send_answer(&self, peer_id: PeerId, sdp: SessionDescription) -> Result<()> {
        self.send(OutboundSignal::Answer { to: peer_id, sdp })
    }

    async fn send_ice(&self, peer_id: PeerId, candidate: CandidateInit) -> Result<()> {
        self.send(OutboundSignal::IceCandidate {
            to: peer_id,
            candidate,
        })
    }
}
