//! End-to-end peer session tests: handshake, application messaging, and the
//! replay/ordering invariants the transport frame relies on.

#[path = "fixtures/two_node.rs"]
mod two_node;

use quantumgate_core::{MessageKind, Settings, Status};
use two_node::TwoNodeFixture;

#[test]
fn full_handshake_reaches_ready_on_both_sides() {
    let mut fixture = TwoNodeFixture::new();
    fixture.run_handshake();

    assert_eq!(fixture.alice.status(), Status::Ready);
    assert_eq!(fixture.bob.status(), Status::Ready);
    assert!(fixture.alice.is_authenticated());
    assert!(fixture.bob.is_authenticated());
}

#[test]
fn application_message_round_trips_in_both_directions() {
    let mut fixture = TwoNodeFixture::new();
    fixture.run_handshake();

    fixture.alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"hello from alice").unwrap();
    let wire = fixture.alice.build_outbound_frame().unwrap().expect("a frame should be produced");
    let delivered = fixture.bob.receive_wire_bytes(&wire).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, MessageKind::ExtenderCommunication);
    assert_eq!(delivered[0].2, b"hello from alice");

    fixture.bob.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"hello from bob").unwrap();
    let wire = fixture.bob.build_outbound_frame().unwrap().expect("a frame should be produced");
    let delivered = fixture.alice.receive_wire_bytes(&wire).unwrap();
    assert_eq!(delivered[0].2, b"hello from bob");
}

#[test]
fn large_application_message_is_fragmented_and_reassembled() {
    let mut fixture = TwoNodeFixture::new();
    fixture.run_handshake();

    let payload = vec![0x5Au8; 200_000];
    fixture.alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, &payload).unwrap();

    let mut delivered = Vec::new();
    for _ in 0..64 {
        let Some(wire) = fixture.alice.build_outbound_frame().unwrap() else { break };
        delivered.extend(fixture.bob.receive_wire_bytes(&wire).unwrap());
    }

    assert_eq!(delivered.len(), 1, "fragments should reassemble into exactly one delivered message");
    assert_eq!(delivered[0].2, payload);
}

#[test]
fn global_shared_secret_primes_a_usable_key_pair_before_handshake() {
    let mut settings = Settings::default();
    settings.local.global_shared_secret = Some(vec![0x42; 32]);
    let mut fixture = TwoNodeFixture::with_settings(settings);

    fixture.bob.mark_connected().unwrap();
    fixture.bob.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"priming works").unwrap();
    assert!(fixture.bob.build_outbound_frame().unwrap().is_some());
}

#[test]
fn replayed_frame_after_counter_advance_is_rejected() {
    let mut fixture = TwoNodeFixture::new();
    fixture.run_handshake();

    fixture.alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"first").unwrap();
    let replayed = fixture.alice.build_outbound_frame().unwrap().unwrap();
    fixture.bob.receive_wire_bytes(&replayed).unwrap();

    fixture.alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"second").unwrap();
    let second = fixture.alice.build_outbound_frame().unwrap().unwrap();
    fixture.bob.receive_wire_bytes(&second).unwrap();

    assert!(fixture.bob.receive_wire_bytes(&replayed).is_err(), "a previously consumed frame must not decode again");
}

#[test]
fn peer_status_never_regresses_below_ready_once_reached() {
    let mut fixture = TwoNodeFixture::new();
    fixture.run_handshake();

    for _ in 0..8 {
        fixture.alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"keepalive").unwrap();
        fixture.pump_once();
        assert_eq!(fixture.alice.status(), Status::Ready);
        assert_eq!(fixture.bob.status(), Status::Ready);
    }
}
