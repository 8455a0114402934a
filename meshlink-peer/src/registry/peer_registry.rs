use crate::negotiation::MeshEvent;
use crate::session::{ConnectionSlot, PeerHandle, PeerSession, SessionContext, SessionState};
use crate::vad::VoiceSource;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use meshlink_core::PeerId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct SessionEntry {
    handle: PeerHandle,
    task: JoinHandle<()>,
    connection: ConnectionSlot,
}

/// The only place sessions are created and removed. At most one live
/// session exists per peer id.
#[derive(Clone)]
pub struct PeerRegistry {
    sessions: Arc<DashMap<PeerId, SessionEntry>>,
    ctx: SessionContext,
    next_instance: Arc<AtomicU64>,
}

impl PeerRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ctx,
            next_instance: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the live session for `peer_id`, creating it if needed. New
    /// sessions attach every current local track before handling any
    /// command.
    pub fn get_or_create(&self, peer_id: &PeerId) -> PeerHandle {
        match self.sessions.entry(peer_id.clone()) {
            Entry::Occupied(entry) if !entry.get().task.is_finished() => entry.get().handle.clone(),
            Entry::Occupied(mut entry) => {
                warn!("Session for {} died; recreating", peer_id);
                let fresh = self.spawn(peer_id);
                let handle = fresh.handle.clone();
                let stale = entry.insert(fresh);
                tokio::spawn(close_connection(peer_id.clone(), stale.connection));
                handle
            }
            Entry::Vacant(entry) => {
                info!("Creating session for {}", peer_id);
                let fresh = self.spawn(peer_id);
                let handle = fresh.handle.clone();
                entry.insert(fresh);
                handle
            }
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerHandle> {
        self.sessions.get(peer_id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }

    /// Tears the session down: cancels whatever it was doing, stops voice
    /// monitoring and closes the connection. Unknown ids are a no-op.
    pub async fn remove(&self, peer_id: &PeerId) -> bool {
        let Some((_, entry)) = self.sessions.remove(peer_id) else {
            return false;
        };

        entry.task.abort();
        let _ = entry.task.await;

        self.ctx
            .vad
            .unwatch(&VoiceSource::Peer(peer_id.clone()))
            .await;
        close_connection(peer_id.clone(), entry.connection).await;

        let _ = self.ctx.events.send(MeshEvent::StateChanged {
            peer_id: peer_id.clone(),
            state: SessionState::Closed,
        });
        info!("Removed session for {}", peer_id);
        true
    }

    pub async fn remove_all(&self) {
        let ids = self.peer_ids();
        join_all(ids.iter().map(|id| self.remove(id))).await;
    }

    pub fn handles(&self) -> Vec<PeerHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn(&self, peer_id: &PeerId) -> SessionEntry {
        let (tx, rx) = mpsc::unbounded_channel();
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let connection = ConnectionSlot::default();

        let session = PeerSession::new(peer_id.clone(), self.ctx.clone(), connection.clone(), rx);
        let task = tokio::spawn(session.run());

        SessionEntry {
            handle: PeerHandle::new(peer_id.clone(), instance, tx),
            task,
            connection,
        }
    }
}

async fn close_connection(peer_id: PeerId, slot: ConnectionSlot) {
    let Some(connection) = slot.get() else {
        return;
    };
    if let Err(e) = connection.close().await {
        debug!("Closing connection to {} failed: {:?}", peer_id, e);
    }
}
