use meshlink_peer::{
    AudioFrame, ConnectionEvent, MediaStartOptions, MeshEvent, PeerId, RemoteTrack, RoomUser,
    SignalMessage, TrackKind, VoiceActivityEvent, VoiceSource,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::integration::{create_test_mesh, init_tracing};
use crate::utils::{WAIT_TIMEOUT_MS, wait_for_event};

const FRAME_MS: u64 = 10;
const FRAME_SAMPLES: usize = 480;

fn noise(amplitude: f32, seed: &mut u32) -> AudioFrame {
    let samples = (0..FRAME_SAMPLES)
        .map(|_| {
            *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            amplitude * ((*seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0)
        })
        .collect();
    AudioFrame::new(samples, 48_000)
}

fn drain_voice(voice: &mut mpsc::UnboundedReceiver<VoiceActivityEvent>) -> Vec<VoiceActivityEvent> {
    let mut events = Vec::new();
    while let Ok(event) = voice.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_local_burst_reports_start_and_stop() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();

    let mut seed = 7;
    for elapsed in (0..1_000).step_by(FRAME_MS as usize) {
        let frame = if elapsed < 200 {
            noise(0.02, &mut seed)
        } else {
            AudioFrame::silence(FRAME_SAMPLES, 48_000)
        };
        mesh.backend.push_audio(frame);
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }

    let events = drain_voice(&mut mesh.voice);
    assert_eq!(
        events,
        vec![
            VoiceActivityEvent {
                source: VoiceSource::Local,
                speaking: true,
            },
            VoiceActivityEvent {
                source: VoiceSource::Local,
                speaking: false,
            },
        ]
    );
    assert!(!mesh.coordinator.is_speaking(&VoiceSource::Local));
}

#[tokio::test(start_paused = true)]
async fn test_muted_microphone_never_speaks() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    mesh.coordinator
        .start_media(MediaStartOptions::default())
        .await
        .unwrap();
    assert_eq!(mesh.coordinator.toggle_audio(), Some(false));

    let mut seed = 11;
    for _ in 0..50 {
        mesh.backend.push_audio(noise(0.2, &mut seed));
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }

    assert!(drain_voice(&mut mesh.voice).is_empty());
    assert!(!mesh.coordinator.is_speaking(&VoiceSource::Local));
}

#[tokio::test(start_paused = true)]
async fn test_removed_peer_stops_reporting() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");
    let source = VoiceSource::Peer(bob.clone());

    mesh.coordinator
        .handle_signal(SignalMessage::RoomUsers(vec![RoomUser {
            id: bob.clone(),
            display_name: "Bob".into(),
        }]))
        .await;
    mesh.snapshot("bob").await;

    let (feed, _) = broadcast::channel(64);
    let mut track = RemoteTrack::new("bob-audio", TrackKind::Audio);
    track.audio = Some(feed.clone());
    mesh.factory
        .connection(&bob)
        .unwrap()
        .emit(ConnectionEvent::TrackAdded {
            stream_id: "bob-stream".into(),
            track,
        });
    wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
        matches!(e, MeshEvent::StreamAdded { .. })
    })
    .await
    .expect("remote audio added");

    let mut seed = 5;
    for _ in 0..20 {
        let _ = feed.send(noise(0.02, &mut seed));
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }
    assert!(mesh.coordinator.is_speaking(&source));

    mesh.coordinator
        .handle_signal(SignalMessage::PeerLeft { id: bob.clone() })
        .await;
    drain_voice(&mut mesh.voice);

    for _ in 0..50 {
        let _ = feed.send(noise(0.02, &mut seed));
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }

    assert!(drain_voice(&mut mesh.voice).is_empty());
    assert!(!mesh.coordinator.is_speaking(&source));
}

#[tokio::test(start_paused = true)]
async fn test_replaced_remote_audio_keeps_reporting() {
    init_tracing();

    let mut mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");
    let source = VoiceSource::Peer(bob.clone());

    mesh.coordinator
        .handle_signal(SignalMessage::RoomUsers(vec![RoomUser::new(bob.clone(), "Bob")]))
        .await;
    mesh.snapshot("bob").await;
    let conn = mesh.factory.connection(&bob).unwrap();

    let (old_feed, _) = broadcast::channel(64);
    let (new_feed, _) = broadcast::channel(64);
    for (stream_id, track_id, feed) in [
        ("bob-old", "bob-audio-1", &old_feed),
        ("bob-new", "bob-audio-2", &new_feed),
    ] {
        let mut track = RemoteTrack::new(track_id, TrackKind::Audio);
        track.audio = Some(feed.clone());
        conn.emit(ConnectionEvent::TrackAdded {
            stream_id: stream_id.into(),
            track,
        });
        wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
            matches!(e, MeshEvent::StreamAdded { stream_id: s, .. } if s == stream_id)
        })
        .await
        .expect("remote audio added");
    }

    conn.emit(ConnectionEvent::TrackRemoved {
        stream_id: "bob-old".into(),
        track_id: "bob-audio-1".into(),
    });
    wait_for_event(&mut mesh.events, WAIT_TIMEOUT_MS, |e| {
        matches!(e, MeshEvent::StreamRemoved { .. })
    })
    .await
    .expect("old stream removed");

    let mut seed = 13;
    for _ in 0..20 {
        let _ = new_feed.send(noise(0.02, &mut seed));
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }

    assert!(mesh.coordinator.is_speaking(&source));
    assert_eq!(
        drain_voice(&mut mesh.voice),
        vec![VoiceActivityEvent {
            source,
            speaking: true,
        }]
    );
    drop(old_feed);
}
