use crate::media::AudioFrame;
use meshlink_core::{CandidateInit, TrackKind};
use std::fmt;
use tokio::sync::broadcast;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        }
    }
}

/// An inbound track. `rtp` carries the raw packets; `audio` carries decoded
/// PCM when a decoder is available for audio tracks.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub rtp: Option<broadcast::Sender<Packet>>,
    pub audio: Option<broadcast::Sender<AudioFrame>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            rtp: None,
            audio: None,
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("decoded", &self.audio.is_some())
            .finish()
    }
}

/// Everything a connection reports back to its owning session.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    LocalCandidate(CandidateInit),
    TransportState(TransportState),
    TrackAdded { stream_id: String, track: RemoteTrack },
    TrackRemoved { stream_id: String, track_id: String },
}
