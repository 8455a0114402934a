use meshlink_peer::{
    MediaStartOptions, MeshEvent, PeerId, RoomUser, SessionState, SignalMessage,
};

use crate::integration::{create_test_mesh, init_tracing};
use crate::utils::{ConnectionOp, WAIT_TIMEOUT_MS, drain_events, wait_for_event, wait_until};

fn users(ids: &[&str]) -> SignalMessage {
    SignalMessage::RoomUsers(
        ids.iter()
            .map(|id| RoomUser {
                id: PeerId::from(*id),
                display_name: id.to_string(),
            })
            .collect(),
    )
}

#[tokio::test]
async fn test_get_or_create_reuses_live_session() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");
    let registry = mesh.coordinator.registry();

    let first = registry.get_or_create(&bob);
    let second = registry.get_or_create(&bob);
    assert_eq!(first.instance(), second.instance());

    mesh.snapshot("bob").await;
    assert_eq!(mesh.factory.created(), 1);
    assert_eq!(registry.len(), 1);

    assert!(registry.remove(&bob).await);
    assert!(first.is_closed());

    let third = registry.get_or_create(&bob);
    assert_ne!(third.instance(), first.instance());
    mesh.snapshot("bob").await;
    assert_eq!(mesh.factory.created(), 2);
}

#[tokio::test]
async fn test_remove_closes_connection_once() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");

    mesh.coordinator.handle_signal(users(&["bob"])).await;
    mesh.snapshot("bob").await;
    let conn = mesh.factory.connection(&bob).unwrap();

    assert!(mesh.coordinator.registry().remove(&bob).await);
    assert!(!mesh.coordinator.registry().remove(&bob).await);
    assert!(!mesh.coordinator.registry().remove(&PeerId::from("nobody")).await);

    assert!(wait_until(WAIT_TIMEOUT_MS, || conn.count(|op| *op == ConnectionOp::Close) == 1).await);
    let event = wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
        matches!(e, MeshEvent::StateChanged { state: SessionState::Closed, .. })
    })
    .await
    .expect("closed state reported");
    assert_eq!(
        event,
        MeshEvent::StateChanged {
            peer_id: bob.clone(),
            state: SessionState::Closed,
        }
    );

    assert!(mesh.coordinator.session_snapshot(&bob).await.is_none());
    assert_eq!(conn.count(|op| *op == ConnectionOp::Close), 1);
}

#[tokio::test]
async fn test_leave_tears_everything_down() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob", "carol"])).await;
    mesh.snapshot("bob").await;
    mesh.snapshot("carol").await;
    drain_events(&mut mesh.events);

    mesh.coordinator.leave().await;

    assert!(mesh.coordinator.registry().is_empty());
    assert!(!mesh.coordinator.media().is_active());
    assert!(mesh.coordinator.display_name(&PeerId::from("bob")).is_none());
    for peer in ["bob", "carol"] {
        let conn = mesh.factory.connection(&PeerId::from(peer)).unwrap();
        assert!(wait_until(WAIT_TIMEOUT_MS, || conn.count(|op| *op == ConnectionOp::Close) == 1).await);
    }
    assert!(wait_until(WAIT_TIMEOUT_MS, || mesh.backend.live_devices() == 0).await);

    let closed = drain_events(&mut mesh.events)
        .into_iter()
        .filter(|e| matches!(e, MeshEvent::StateChanged { state: SessionState::Closed, .. }))
        .count();
    assert_eq!(closed, 2);
}

#[tokio::test]
async fn test_bare_id_roster_creates_sessions() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    let room: SignalMessage =
        serde_json::from_str(r#"{"type":"room-users","payload":["bob-0123456789","alice"]}"#)
            .unwrap();
    let joined: SignalMessage =
        serde_json::from_str(r#"{"type":"user-joined","payload":"carol-0123456789"}"#).unwrap();

    mesh.coordinator.handle_signal(room).await;
    mesh.coordinator.handle_signal(joined).await;
    mesh.snapshot("bob-0123456789").await;

    let bob = PeerId::from("bob-0123456789");
    let carol = PeerId::from("carol-0123456789");
    assert_eq!(mesh.factory.created(), 1);
    assert_eq!(mesh.signaling.offers_to(&bob).await.len(), 1);
    assert_eq!(mesh.coordinator.display_name(&bob).as_deref(), Some("bob-0123"));
    assert_eq!(mesh.coordinator.display_name(&carol).as_deref(), Some("carol-01"));

    let event = wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
        matches!(e, MeshEvent::PeerJoined { .. })
    })
    .await;
    assert!(matches!(
        event,
        Some(MeshEvent::PeerJoined { peer_id, display_name })
            if peer_id == carol && display_name == "carol-01"
    ));
}
