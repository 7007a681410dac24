//! Relay-virtual socket (§4.14, §9).
//!
//! A relay link's two halves are ordinary [`Peer`](crate) sessions, but the
//! socket underneath one half may be virtual: reads and writes don't touch
//! a kernel connection, they call back into the relay table, which
//! forwards the opaque bytes to the other half. From the peer session's
//! point of view there is no difference from a real socket.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::socket::{IoStatus, Socket, SocketError};

/// Callback invoked with bytes a relay-virtual socket wants sent onward.
/// The relay table supplies this; it forwards the bytes as a `RelayData`
/// inner message on the other half of the link.
pub trait RelayForwarder: Send + Sync {
    /// Forward `bytes` to the other half of this relay link.
    fn forward(&self, bytes: &[u8]);
}

/// A virtual socket spliced into a relay link (§4.14).
///
/// Inbound bytes are pushed onto `inbox` by the relay table when the other
/// half of the link receives a `RelayData` frame; `receive` drains it.
/// `send` hands bytes to `forwarder`, which the relay table wires to the
/// other half.
pub struct RelaySocket {
    inbox: VecDeque<u8>,
    forwarder: Arc<dyn RelayForwarder>,
    peer_addr: Option<SocketAddr>,
    status: IoStatus,
}

impl RelaySocket {
    /// Construct a virtual socket that forwards outbound bytes through
    /// `forwarder` and reports `peer_addr` as its logical remote endpoint
    /// (the real peer at the far end of the relay chain).
    #[must_use]
    pub fn new(forwarder: Arc<dyn RelayForwarder>, peer_addr: SocketAddr) -> Self {
        Self {
            inbox: VecDeque::new(),
            forwarder,
            peer_addr: Some(peer_addr),
            status: IoStatus { connecting: false, can_write: true, ..IoStatus::default() },
        }
    }

    /// Called by the relay table when data arrives for this half.
    pub fn deliver(&mut self, bytes: &[u8]) {
        self.inbox.extend(bytes);
        self.status.can_read = true;
    }
}

impl Socket for RelaySocket {
    fn begin_connect(&mut self, _endpoint: SocketAddr) -> Result<(), SocketError> {
        // A relay-virtual socket is always already "connected" — the
        // relay table only splices two already-authenticated peers.
        Ok(())
    }

    fn complete_connect(&mut self) -> Result<bool, SocketError> {
        Ok(true)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        self.forwarder.forward(buf);
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let n = self.inbox.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbox.pop_front().unwrap();
        }
        self.status.can_read = !self.inbox.is_empty();
        Ok(n)
    }

    fn update_io_status(&mut self, _timeout: Duration) -> Result<IoStatus, SocketError> {
        self.status.can_read = !self.inbox.is_empty();
        Ok(self.status)
    }

    fn io_status(&self) -> IoStatus {
        self.status
    }

    fn close(&mut self, _linger: Option<Duration>) {
        self.inbox.clear();
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn is_relay(&self) -> bool {
        true
    }
}
