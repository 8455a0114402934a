use meshlink_peer::{
    CaptureKind, MediaAccessError, MediaStartOptions, PeerId, RoomUser, SignalMessage,
    TrackSource,
};

use crate::integration::{create_test_mesh, init_tracing};
use crate::utils::{ConnectionOp, WAIT_TIMEOUT_MS, wait_until};

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
async fn test_new_sessions_carry_local_tracks() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob", "carol"])).await;

    for peer in ["bob", "carol"] {
        let snapshot = mesh.snapshot(peer).await;
        assert_eq!(
            snapshot.senders,
            vec![TrackSource::Camera, TrackSource::Microphone]
        );
    }
    assert_eq!(mesh.backend.live_devices(), 2);
}

#[tokio::test]
async fn test_toggles_keep_senders_in_place() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob", "carol"])).await;
    mesh.snapshot("bob").await;
    mesh.snapshot("carol").await;
    let offers_before = mesh.signaling.offers_to(&bob).await.len();

    assert_eq!(mesh.coordinator.toggle_video(), Some(false));
    assert_eq!(mesh.coordinator.toggle_audio(), Some(false));
    assert_eq!(mesh.coordinator.toggle_video(), Some(true));
    mesh.coordinator.reconcile_all().await;

    assert!(mesh.coordinator.media().is_video_enabled());
    assert!(!mesh.coordinator.media().is_audio_enabled());
    let tracks = mesh.coordinator.media().current_tracks();
    assert!(!tracks.microphone.as_ref().unwrap().is_enabled());

    for peer in ["bob", "carol"] {
        assert_eq!(mesh.sender_count(peer).await, 2);
        let conn = mesh.factory.connection(&PeerId::from(peer)).unwrap();
        assert_eq!(
            conn.count(|op| matches!(op, ConnectionOp::AddTrack(..))),
            2
        );
        assert_eq!(
            conn.count(|op| matches!(
                op,
                ConnectionOp::RemoveTrack(_) | ConnectionOp::ReplaceTrack(..)
            )),
            0
        );
    }
    assert_eq!(mesh.signaling.offers_to(&bob).await.len(), offers_before);
}

#[tokio::test]
async fn test_toggle_without_media_is_none() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    assert_eq!(mesh.coordinator.toggle_video(), None);
    assert_eq!(mesh.coordinator.toggle_audio(), None);
}

#[tokio::test]
async fn test_failed_start_releases_everything() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    mesh.backend.deny(CaptureKind::Microphone);

    let err = mesh
        .coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MediaAccessError::Capture {
            kind: CaptureKind::Microphone,
            ..
        }
    ));

    assert!(wait_until(WAIT_TIMEOUT_MS, || mesh.backend.live_devices() == 0).await);
    assert!(!mesh.coordinator.media().is_active());
    assert!(mesh.coordinator.media().current_tracks().is_empty());

    mesh.coordinator.handle_signal(users(&["bob"])).await;
    assert_eq!(mesh.sender_count("bob").await, 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();

    let err = mesh
        .coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MediaAccessError::AlreadyStarted));
    assert_eq!(mesh.backend.opened(), 2);
}

#[tokio::test]
async fn test_stop_media_detaches_from_sessions() {
    init_tracing();

    let mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    mesh.coordinator.handle_signal(users(&["bob"])).await;
    assert_eq!(mesh.sender_count("bob").await, 2);

    mesh.coordinator.stop_media().await;

    assert_eq!(mesh.sender_count("bob").await, 0);
    assert!(wait_until(WAIT_TIMEOUT_MS, || mesh.backend.live_devices() == 0).await);
    let conn = mesh.factory.connection(&PeerId::from("bob")).unwrap();
    assert_eq!(conn.sender_count(), 0);
}
