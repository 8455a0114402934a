use meshlink_peer::{PeerId, RoomUser, SdpType, SessionDescription, SignalMessage};

use crate::integration::{create_test_mesh, init_tracing};
use crate::utils::ConnectionOp;

fn join(user: &str) -> SignalMessage {
    SignalMessage::RoomUsers(vec![RoomUser {
        id: PeerId::from(user),
        display_name: user.to_uppercase(),
    }])
}

#[tokio::test]
async fn test_polite_side_rolls_back_and_answers() {
    init_tracing();

    // "alice" < "bob": alice yields.
    let mesh = create_test_mesh("alice");
    let bob = PeerId::from("bob");

    mesh.coordinator.handle_signal(join("bob")).await;
    assert!(mesh.snapshot("bob").await.awaiting_answer);
    assert_eq!(mesh.signaling.offers_to(&bob).await.len(), 1);

    mesh.coordinator
        .handle_signal(SignalMessage::Offer {
            from: bob.clone(),
            sdp: SessionDescription::offer("v=0 from bob"),
        })
        .await;
    let snapshot = mesh.snapshot("bob").await;

    let conn = mesh.factory.connection(&bob).expect("connection for bob");
    assert_eq!(conn.count(|op| *op == ConnectionOp::Rollback), 1);
    assert_eq!(
        conn.count(|op| *op == ConnectionOp::SetRemote(SdpType::Offer)),
        1
    );
    assert_eq!(mesh.signaling.answers_to(&bob).await.len(), 1);

    // The rolled back renegotiation goes out again after answering.
    assert_eq!(mesh.signaling.offers_to(&bob).await.len(), 2);
    assert!(snapshot.awaiting_answer);
    assert_eq!(mesh.coordinator.display_name(&bob).as_deref(), Some("BOB"));
}

#[tokio::test]
async fn test_impolite_side_ignores_colliding_offer() {
    init_tracing();

    // "carol" > "bob": carol keeps her offer.
    let mesh = create_test_mesh("carol");
    let bob = PeerId::from("bob");

    mesh.coordinator.handle_signal(join("bob")).await;
    mesh.coordinator
        .handle_signal(SignalMessage::Offer {
            from: bob.clone(),
            sdp: SessionDescription::offer("v=0 from bob"),
        })
        .await;

    let snapshot = mesh.snapshot("bob").await;
    assert!(snapshot.awaiting_answer);
    assert!(mesh.signaling.answers_to(&bob).await.is_empty());

    mesh.coordinator
        .handle_signal(SignalMessage::Answer {
            from: bob.clone(),
            sdp: SessionDescription::answer("v=0 answer from bob"),
        })
        .await;

    let snapshot = mesh.snapshot("bob").await;
    assert!(!snapshot.awaiting_answer);

    let conn = mesh.factory.connection(&bob).expect("connection for bob");
    assert_eq!(conn.count(|op| *op == ConnectionOp::Rollback), 0);
    assert_eq!(
        conn.count(|op| *op == ConnectionOp::SetRemote(SdpType::Answer)),
        1
    );
}
