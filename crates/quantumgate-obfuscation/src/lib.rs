//! # QuantumGate Obfuscation
//!
//! Traffic-shaping primitives used by the noise queue and frame layer
//! (§4.6): random padding lengths, send-timing jitter, and cover traffic
//! generation. Protocol mimicry (HTTPS/WebSocket/DoH record wrapping) is
//! out of scope here — the wire format is QuantumGate's own framed
//! transport (§6), not a disguise of another protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cover;
pub mod padding;
pub mod timing;

pub use cover::{CoverTrafficGenerator, TrafficDistribution};
pub use padding::{PaddingEngine, PaddingMode};
pub use timing::{TimingMode, TimingObfuscator, TrafficShaper};
