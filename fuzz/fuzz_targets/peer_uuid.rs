//! Fuzz target for `PeerUuid` wire parsing and the binding check (§6).
//!
//! Tests that arbitrary 16-byte input doesn't cause panics when parsed as a
//! `PeerUuid`, and that it round-trips through its wire encoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quantumgate_core::PeerUuid;

fuzz_target!(|data: &[u8]| {
    if data.len() != 16 {
        return;
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(data);

    if let Some(uuid) = PeerUuid::from_bytes(bytes) {
        assert_eq!(uuid.to_bytes(), bytes, "roundtrip through bytes must be exact");
    }
});
