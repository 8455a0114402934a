use crate::error::{ConnectivityFailure, NegotiationError};
use crate::session::SessionState;
use crate::vad::VoiceActivityEvent;
use meshlink_core::{PeerId, TrackKind};
use tokio::sync::mpsc;

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    PeerJoined {
        peer_id: PeerId,
        display_name: String,
    },

    PeerLeft {
        peer_id: PeerId,
    },

    StateChanged {
        peer_id: PeerId,
        state: SessionState,
    },

    StreamAdded {
        peer_id: PeerId,
        stream_id: String,
        track_id: String,
        kind: TrackKind,
    },

    StreamRemoved {
        peer_id: PeerId,
        stream_id: String,
    },

    /// A peer-scoped failure. Other sessions are unaffected.
    PeerError {
        peer_id: PeerId,
        error: NegotiationError,
    },

    PeerUnreachable(ConnectivityFailure),

    /// Screen capture ended from outside the app and sharing was stopped.
    ScreenShareEnded,
}

pub struct MeshEvents {
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
    pub voice: mpsc::UnboundedReceiver<VoiceActivityEvent>,
}
