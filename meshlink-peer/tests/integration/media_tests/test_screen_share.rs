use meshlink_peer::{
    CaptureKind, MediaStartOptions, MeshEvent, PeerId, RoomUser, SessionDescription,
    SignalMessage, TrackSource,
};
use tokio::sync::mpsc;

use crate::integration::{create_test_mesh, init_tracing};
use crate::utils::{ConnectionOp, WAIT_TIMEOUT_MS, wait_for_event, wait_until};

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

fn answer_from(peer: &str) -> SignalMessage {
    SignalMessage::Answer {
        from: PeerId::from(peer),
        sdp: SessionDescription::answer(format!("v=0 answer from {}", peer)),
    }
}

#[tokio::test]
async fn test_screen_share_round_trip() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob", "carol"])).await;
    for peer in ["bob", "carol"] {
        mesh.coordinator.handle_signal(answer_from(peer)).await;
        assert!(!mesh.snapshot(peer).await.awaiting_answer);
    }

    let bob_conn = mesh.factory.connection(&PeerId::from("bob")).unwrap();
    let before = bob_conn.senders();

    mesh.coordinator.start_screen_share().await.unwrap();

    for peer in ["bob", "carol"] {
        let snapshot = mesh.snapshot(peer).await;
        assert_eq!(
            snapshot.senders,
            vec![
                TrackSource::Camera,
                TrackSource::Microphone,
                TrackSource::Screen
            ]
        );
        assert!(snapshot.awaiting_answer, "adding a sender renegotiates");
        assert_eq!(mesh.signaling.offers_to(&PeerId::from(peer)).await.len(), 2);
        mesh.coordinator.handle_signal(answer_from(peer)).await;
    }

    assert!(mesh.coordinator.stop_screen_share().await);
    assert!(!mesh.coordinator.stop_screen_share().await);

    for peer in ["bob", "carol"] {
        assert_eq!(mesh.sender_count(peer).await, 2);
        assert_eq!(mesh.signaling.offers_to(&PeerId::from(peer)).await.len(), 3);
    }
    assert_eq!(bob_conn.senders(), before);
    assert!(mesh.coordinator.media().current_tracks().screen.is_none());
    assert!(wait_until(WAIT_TIMEOUT_MS, || mesh.backend.live_devices() == 2).await);
}

#[tokio::test]
async fn test_screen_ended_by_os_stops_sharing() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(mesh.coordinator.clone().run(inbound_rx));

    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob"])).await;
    mesh.coordinator.start_screen_share().await.unwrap();
    assert_eq!(mesh.sender_count("bob").await, 3);

    mesh.backend.end_latest(CaptureKind::Display);

    wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
        *e == MeshEvent::ScreenShareEnded
    })
    .await
    .expect("screen share ended event");

    assert_eq!(mesh.sender_count("bob").await, 2);
    assert!(mesh.coordinator.media().current_tracks().screen.is_none());
    assert!(wait_until(WAIT_TIMEOUT_MS, || mesh.backend.live_devices() == 2).await);
}

#[tokio::test]
async fn test_new_screen_capture_is_re_added() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob"])).await;
    mesh.coordinator.handle_signal(answer_from("bob")).await;
    mesh.coordinator.start_screen_share().await.unwrap();
    mesh.coordinator.handle_signal(answer_from("bob")).await;
    assert!(!mesh.snapshot("bob").await.awaiting_answer);

    let media = mesh.coordinator.media();
    let first = media.take_screen().unwrap();
    let second = media.start_screen_share().await.unwrap();
    assert_ne!(first.id(), second.id());
    mesh.coordinator.reconcile_all().await;
    first.stop();

    let conn = mesh.factory.connection(&bob).unwrap();
    let ops = conn.ops();
    let removed = ops
        .iter()
        .rposition(|op| *op == ConnectionOp::RemoveTrack(TrackSource::Screen))
        .expect("old screen sender removed");
    assert_eq!(
        ops[removed + 1],
        ConnectionOp::AddTrack(TrackSource::Screen, second.id().to_owned())
    );
    assert_eq!(
        conn.count(|op| matches!(op, ConnectionOp::ReplaceTrack(TrackSource::Screen, _))),
        0
    );
    assert_eq!(
        conn.senders().get(&TrackSource::Screen).map(String::as_str),
        Some(second.id())
    );
    assert_eq!(mesh.signaling.offers_to(&bob).await.len(), 3);
}
