pub mod media_tests;
pub mod negotiation_tests;

use meshlink_peer::{
    MeshConfig, MeshCoordinator, MeshEvent, OutboundSignal, PeerId, SessionSnapshot,
    VoiceActivityEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;

use crate::utils::{FakeCaptureBackend, MockConnectionFactory, MockSignalingOutput};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub struct TestMesh {
    pub coordinator: Arc<MeshCoordinator>,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
    pub voice: mpsc::UnboundedReceiver<VoiceActivityEvent>,
    pub signaling: MockSignalingOutput,
    pub signal_rx: mpsc::UnboundedReceiver<OutboundSignal>,
    pub factory: Arc<MockConnectionFactory>,
    pub backend: Arc<FakeCaptureBackend>,
}

impl TestMesh {
    /// Waits until the session has handled everything queued before it.
    pub async fn snapshot(&self, peer: &str) -> SessionSnapshot {
        self.coordinator
            .session_snapshot(&PeerId::from(peer))
            .await
            .unwrap_or_else(|| panic!("no session for {}", peer))
    }

    pub async fn sender_count(&self, peer: &str) -> usize {
        self.snapshot(peer).await.senders.len()
    }
}

/// Mesh for local participant `local_id` with the periodic reconcile pass
/// disabled, so tests control every renegotiation.
pub fn create_test_mesh(local_id: &str) -> TestMesh {
    create_test_mesh_with(MeshConfig {
        reconcile_interval_ms: 0,
        ..MeshConfig::default().with_local_id(local_id)
    })
}

pub fn create_test_mesh_with(config: MeshConfig) -> TestMesh {
    let (signaling, signal_rx) = MockSignalingOutput::new();
    let factory = MockConnectionFactory::new();
    let backend = FakeCaptureBackend::new();

    let (coordinator, events) = MeshCoordinator::new(
        config,
        Arc::new(signaling.clone()),
        factory.clone(),
        backend.clone(),
    );

    TestMesh {
        coordinator,
        events: events.events,
        voice: events.voice,
        signaling,
        signal_rx,
        factory,
        backend,
    }
}
