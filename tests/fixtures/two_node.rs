//! Two-peer test fixture.
//!
//! Wires two in-memory [`Peer`]s together over a pair of relay sockets (the
//! same no-op-forwarder trick `quantumgate-core`'s own unit tests use) so the
//! full handshake and transport dispatch run without touching a real socket.

use std::net::SocketAddr;
use std::sync::Arc;

use quantumgate_core::{Peer, Settings, Status};
use quantumgate_crypto::signatures::SigningKey;
use quantumgate_transport::{AnySocket, RelayForwarder, RelaySocket};
use rand_core::OsRng;

struct NullForwarder;
impl RelayForwarder for NullForwarder {
    fn forward(&self, _bytes: &[u8]) {}
}

fn dummy_socket(addr: SocketAddr) -> AnySocket {
    AnySocket::Relay(RelaySocket::new(Arc::new(NullForwarder), addr))
}

/// A pair of connected peers: `alice` is the inbound (accepted) side, `bob`
/// the outbound (dialing) side, matching §3's Alice/Bob role assignment.
pub struct TwoNodeFixture {
    pub alice: Peer,
    pub bob: Peer,
}

impl TwoNodeFixture {
    /// Build a fresh pair with default settings, not yet marked connected.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Build a fresh pair with the given settings on both sides.
    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        let alice_addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let bob_addr: SocketAddr = "10.0.0.2:9001".parse().unwrap();

        let alice = Peer::new_inbound(
            alice_addr,
            dummy_socket(bob_addr),
            settings.clone(),
            SigningKey::generate(&mut OsRng),
            vec![],
        );
        let bob = Peer::new_outbound(
            bob_addr,
            dummy_socket(alice_addr),
            settings,
            SigningKey::generate(&mut OsRng),
            vec![],
        );
        Self { alice, bob }
    }

    /// Mark both sockets connected and bounce frames back and forth until
    /// both sides reach `Ready`, or panic after a generous number of rounds.
    pub fn run_handshake(&mut self) {
        self.alice.mark_connected().unwrap();
        self.bob.mark_connected().unwrap();

        for _ in 0..128 {
            if self.alice.status() == Status::Ready && self.bob.status() == Status::Ready {
                return;
            }
            if let Some(wire) = self.alice.build_outbound_frame().unwrap() {
                self.bob.receive_wire_bytes(&wire).unwrap();
            }
            if let Some(wire) = self.bob.build_outbound_frame().unwrap() {
                self.alice.receive_wire_bytes(&wire).unwrap();
            }
        }
        panic!(
            "handshake did not complete: alice={:?} bob={:?}",
            self.alice.status(),
            self.bob.status()
        );
    }

    /// One round of draining whatever either side currently has queued,
    /// without the `Ready`-convergence check `run_handshake` does. Useful
    /// for tests that need to observe intermediate in-flight state.
    pub fn pump_once(&mut self) {
        if let Some(wire) = self.alice.build_outbound_frame().unwrap() {
            let _ = self.bob.receive_wire_bytes(&wire);
        }
        if let Some(wire) = self.bob.build_outbound_frame().unwrap() {
            let _ = self.alice.receive_wire_bytes(&wire);
        }
    }
}

impl Default for TwoNodeFixture {
    fn default() -> Self {
        Self::new()
    }
}
