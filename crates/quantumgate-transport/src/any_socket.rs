//! The tagged socket variant (§9: "model as a tagged variant ... rather
//! than deep inheritance").

use std::net::SocketAddr;
use std::time::Duration;

use crate::relay::RelaySocket;
use crate::socket::{IoStatus, Socket, SocketError};
use crate::tcp::TcpSocket;
use crate::udp::UdpSocket;

/// Whichever concrete backend a [`Peer`](crate)'s socket currently is.
/// Dispatched by `match`, never boxed as a trait object: the call sites
/// (handshake processor, transport send/receive path) don't care which
/// arm they're holding.
pub enum AnySocket {
    /// A real TCP connection.
    Tcp(TcpSocket),
    /// A real UDP "connection" (connected datagram socket).
    Udp(UdpSocket),
    /// A virtual socket spliced into a relay link.
    Relay(RelaySocket),
}

impl Socket for AnySocket {
    fn begin_connect(&mut self, endpoint: SocketAddr) -> Result<(), SocketError> {
        match self {
            Self::Tcp(s) => s.begin_connect(endpoint),
            Self::Udp(s) => s.begin_connect(endpoint),
            Self::Relay(s) => s.begin_connect(endpoint),
        }
    }

    fn complete_connect(&mut self) -> Result<bool, SocketError> {
        match self {
            Self::Tcp(s) => s.complete_connect(),
            Self::Udp(s) => s.complete_connect(),
            Self::Relay(s) => s.complete_connect(),
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        match self {
            Self::Tcp(s) => s.send(buf),
            Self::Udp(s) => s.send(buf),
            Self::Relay(s) => s.send(buf),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        match self {
            Self::Tcp(s) => s.receive(buf),
            Self::Udp(s) => s.receive(buf),
            Self::Relay(s) => s.receive(buf),
        }
    }

    fn update_io_status(&mut self, timeout: Duration) -> Result<IoStatus, SocketError> {
        match self {
            Self::Tcp(s) => s.update_io_status(timeout),
            Self::Udp(s) => s.update_io_status(timeout),
            Self::Relay(s) => s.update_io_status(timeout),
        }
    }

    fn io_status(&self) -> IoStatus {
        match self {
            Self::Tcp(s) => s.io_status(),
            Self::Udp(s) => s.io_status(),
            Self::Relay(s) => s.io_status(),
        }
    }

    fn close(&mut self, linger: Option<Duration>) {
        match self {
            Self::Tcp(s) => s.close(linger),
            Self::Udp(s) => s.close(linger),
            Self::Relay(s) => s.close(linger),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(s) => s.peer_addr(),
            Self::Udp(s) => s.peer_addr(),
            Self::Relay(s) => s.peer_addr(),
        }
    }

    fn is_relay(&self) -> bool {
        matches!(self, Self::Relay(_))
    }
}
