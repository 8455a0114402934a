use crate::error::NegotiationError;
use crate::media::{LocalTrack, TrackSource};
use crate::session::session_state::SessionState;
use crate::transport::RemoteTrack;
use meshlink_core::{CandidateInit, PeerId, SessionDescription};
use std::sync::Arc;
use tokio::sync::oneshot;

pub type CommandReply = oneshot::Sender<Result<(), NegotiationError>>;

/// Work items for a session actor, processed strictly in arrival order.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send an offer (first contact, or local media changed).
    Initiate,

    RemoteOffer(SessionDescription),

    RemoteAnswer(SessionDescription),

    RemoteCandidate(CandidateInit),

    /// Bring the senders in line with the current local tracks,
    /// renegotiating if the sender set changed.
    Reconcile(Option<CommandReply>),

    /// Swap what an existing sender carries, without renegotiation.
    ReplaceTrack {
        source: TrackSource,
        track: Arc<LocalTrack>,
        reply: CommandReply,
    },

    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Inbound media grouped the way the remote side grouped it.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub peer_id: PeerId,
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub peer_id: PeerId,
    pub state: SessionState,
    /// Local sources with a sender on this connection.
    pub senders: Vec<TrackSource>,
    pub pending_candidates: usize,
    pub awaiting_answer: bool,
    pub recovery_attempts: u32,
    pub remote_streams: Vec<RemoteStream>,
}
