//! # QuantumGate Core
//!
//! Core peer session subsystem for the QuantumGate P2P protocol.
//!
//! This crate provides:
//! - **Peer session state machine**: the per-connection handshake and
//!   post-handshake lifecycle (`Status`, `Peer`)
//! - **Key exchange**: dual-leg DH/KEM negotiation and transcript signing
//! - **Symmetric key management**: newest-first key pairs with grace-period
//!   expiration and the key-update sub-protocol
//! - **Wire framing**: the AEAD transport frame format with random padding
//! - **Inner messages**: the application/handshake message kinds and
//!   fragmentation/reassembly
//! - **Noise**: cover-traffic and padding scheduling
//! - **Configuration and error types**
//!
//! ## Module Structure
//!
//! - [`session`]: `Peer`, `Status`, and the handshake message dispatch table
//! - [`keyexchange`]: `KeyExchange`, `Role`, algorithm negotiation
//! - [`keys`]: `SymmetricKeyPair`, `SymmetricKeySet`
//! - [`frame`]: wire frame header, `peek`/`extract`/`encode`/`decrypt`
//! - [`message`]: `MessageKind`, `InnerMessage`, fragmentation, `Reassembler`
//! - [`noise`]: cover-traffic queue feeding the frame layer
//! - [`ratelimit`]: per-peer rate windows and the deferred-receive policy
//! - [`uuid`]: `PeerUuid` and extender/peer identifiers
//! - [`config`]: `Settings` and validation
//! - [`error`]: `PeerError` and the disconnect/reputation taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod frame;
pub mod keyexchange;
pub mod keys;
pub mod message;
pub mod noise;
pub mod ratelimit;
pub mod session;
pub mod uuid;

pub use config::Settings;
pub use error::PeerError;
pub use frame::{FRAME_HEADER_SIZE, Frame, FrameHeader, PeekResult};
pub use keyexchange::{AsymmetricAlgorithm, KeyExchange, Role};
pub use keys::{SymmetricKeyPair, SymmetricKeySet};
pub use message::{FragmentKind, InnerMessage, MessageKind, Reassembler};
pub use noise::NoiseQueue;
pub use ratelimit::{RateLimitKind, RateLimitSet, RateWindow};
pub use session::{ConnectionType, Luid, Peer, Status};
pub use uuid::{PeerUuid, UuidType};
