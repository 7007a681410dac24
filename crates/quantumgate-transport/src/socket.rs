//! The socket capability trait (§6, §9).
//!
//! The core consumes exactly these operations — `BeginConnect`,
//! `CompleteConnect`, `Send`, `Receive`, `UpdateIOStatus`, `GetIOStatus`,
//! `Close` — against whichever concrete socket backs a peer. Per §9's
//! "Dynamic dispatch" note, the three variants (TCP, UDP, relay-virtual)
//! are modeled as a tagged enum dispatched by `match`, not a trait-object
//! hierarchy: a `Peer` owns one [`AnySocket`] and never needs to know which
//! arm it is.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Failure from a socket operation. Maps 1:1 onto
/// `quantumgate_core::error::PeerError::Socket` at the call site.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The underlying OS call failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// An operation was attempted before `complete_connect` finished.
    #[error("socket not yet connected")]
    NotConnected,
    /// The socket has been closed.
    #[error("socket closed")]
    Closed,
}

/// Snapshot of a socket's readiness, as polled by `GetIOStatus` (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatus {
    /// An outbound connect is still in flight.
    pub connecting: bool,
    /// A `receive` would return data without blocking.
    pub can_read: bool,
    /// A `send` would accept data without blocking.
    pub can_write: bool,
    /// The socket has reported an out-of-band error condition.
    pub has_exception: bool,
    /// OS error code, if `has_exception`.
    pub error_code: Option<i32>,
}

/// The capability set every concrete socket backend implements (§6, §9).
///
/// All operations are non-blocking: `update_io_status` performs a
/// zero-or-bounded-timeout readiness poll and nothing else in this trait
/// ever blocks indefinitely, per §5's "no operation blocks indefinitely
/// inside the worker".
pub trait Socket: Send {
    /// Start an outbound connection to `endpoint`. Returns immediately;
    /// progress is observed via `update_io_status`/`complete_connect`.
    fn begin_connect(&mut self, endpoint: SocketAddr) -> Result<(), SocketError>;

    /// Poll whether a `begin_connect` has finished. `Ok(true)` once
    /// connected, `Ok(false)` while still in progress.
    fn complete_connect(&mut self) -> Result<bool, SocketError>;

    /// Write as much of `buf` as the socket will currently accept.
    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError>;

    /// Read as much as is currently available into `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Re-poll readiness, blocking for at most `timeout` (may be zero).
    fn update_io_status(&mut self, timeout: Duration) -> Result<IoStatus, SocketError>;

    /// The last status computed by `update_io_status`, without re-polling.
    fn io_status(&self) -> IoStatus;

    /// Close the socket. `linger` mirrors `SO_LINGER` semantics.
    fn close(&mut self, linger: Option<Duration>);

    /// The remote address, once known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Whether this socket is a virtual relay socket rather than a real
    /// kernel connection (§3: `Peer`'s relay flag).
    fn is_relay(&self) -> bool {
        false
    }
}
