//! # QuantumGate Transport
//!
//! The socket capability abstraction peer sessions are built on (§6, §9).
//! Concrete socket implementations beyond this thin surface — a full UDP
//! reliability layer, hole-punching, multipath — are out of scope (§1);
//! this crate only gives the core something uniform to poll and push bytes
//! through, whether the connection is a real TCP/UDP socket or a virtual
//! relay splice.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod any_socket;
pub mod relay;
pub mod socket;
pub mod tcp;
pub mod udp;
pub mod unix_poll;

pub use any_socket::AnySocket;
pub use relay::{RelayForwarder, RelaySocket};
pub use socket::{IoStatus, Socket, SocketError};
pub use tcp::TcpSocket;
pub use udp::UdpSocket;
