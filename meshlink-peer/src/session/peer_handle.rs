use crate::error::NegotiationError;
use crate::media::{LocalTrack, TrackSource};
use crate::session::session_command::{SessionCommand, SessionSnapshot};
use meshlink_core::PeerId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cheap handle to a running session. All interaction goes through its
/// command queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer_id: PeerId,
    instance: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl PeerHandle {
    pub(crate) fn new(
        peer_id: PeerId,
        instance: u64,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            peer_id,
            instance,
            commands,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Distinguishes a recreated session from the one it replaced.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Queues `command`. Returns false if the session is gone.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub async fn reconcile(&self) -> Result<(), NegotiationError> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Reconcile(Some(tx))) {
            return Err(NegotiationError::SessionClosed);
        }
        rx.await.unwrap_or(Err(NegotiationError::SessionClosed))
    }

    pub async fn replace_track(
        &self,
        source: TrackSource,
        track: Arc<LocalTrack>,
    ) -> Result<(), NegotiationError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(SessionCommand::ReplaceTrack {
            source,
            track,
            reply,
        }) {
            return Err(NegotiationError::SessionClosed);
        }
        rx.await.unwrap_or(Err(NegotiationError::SessionClosed))
    }
}
