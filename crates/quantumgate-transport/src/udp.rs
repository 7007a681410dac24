//! UDP socket backend (§6, §9).
//!
//! Out of scope per §1: the UDP transport's own reliability layer (an
//! external collaborator). What lives here is only the thin `Socket`
//! capability surface over a connected datagram socket — `connect()` binds
//! a default peer so `send`/`receive` behave point-to-point, same as the
//! TCP backend from the core's point of view.

use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket as Socket2, Type};

use crate::socket::{IoStatus, Socket, SocketError};
use crate::unix_poll::poll_readiness;

/// A UDP-backed [`Socket`].
pub struct UdpSocket {
    inner: Socket2,
    peer_addr: Option<SocketAddr>,
    status: IoStatus,
}

impl UdpSocket {
    /// Bind a fresh outbound-capable UDP socket.
    ///
    /// # Errors
    /// Returns [`SocketError`] if the underlying socket cannot be created.
    pub fn new(domain_hint: SocketAddr) -> Result<Self, SocketError> {
        let domain = if domain_hint.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let inner = Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        inner.set_nonblocking(true)?;
        let any: SocketAddr = if domain_hint.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        inner.bind(&any.into())?;
        Ok(Self { inner, peer_addr: None, status: IoStatus { can_write: true, ..IoStatus::default() } })
    }
}

impl Socket for UdpSocket {
    fn begin_connect(&mut self, endpoint: SocketAddr) -> Result<(), SocketError> {
        self.inner.connect(&endpoint.into())?;
        self.peer_addr = Some(endpoint);
        self.status.connecting = false;
        self.status.can_write = true;
        Ok(())
    }

    fn complete_connect(&mut self) -> Result<bool, SocketError> {
        Ok(self.peer_addr.is_some())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        if self.peer_addr.is_none() {
            return Err(SocketError::NotConnected);
        }
        use std::io::Write;
        match (&self.inner).write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        use std::io::Read;
        match (&self.inner).read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn update_io_status(&mut self, timeout: Duration) -> Result<IoStatus, SocketError> {
        let (can_read, can_write, has_exception) =
            poll_readiness(self.inner.as_raw_fd(), true, true, timeout)?;
        self.status.can_read = can_read;
        self.status.can_write = can_write;
        self.status.has_exception = has_exception;
        if has_exception {
            self.status.error_code = self.inner.take_error()?.and_then(|e| e.raw_os_error());
        }
        Ok(self.status)
    }

    fn io_status(&self) -> IoStatus {
        self.status
    }

    fn close(&mut self, _linger: Option<Duration>) {
        self.peer_addr = None;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}
