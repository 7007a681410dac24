//! TCP socket backend (§6, §9).
//!
//! Outbound sockets go through the classic nonblocking-connect dance:
//! `connect()` on a nonblocking socket returns `EINPROGRESS`, and
//! `complete_connect` polls for writability before checking `SO_ERROR`.
//! Inbound sockets arrive already connected from a listener's `accept()`.

use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket as Socket2, Type};

use crate::socket::{IoStatus, Socket, SocketError};
use crate::unix_poll::poll_readiness;

/// A TCP-backed [`Socket`].
pub struct TcpSocket {
    inner: Socket2,
    peer_addr: Option<SocketAddr>,
    status: IoStatus,
}

impl TcpSocket {
    /// Wrap an already-connected socket, as produced by an inbound
    /// listener's `accept()` (§3: connection type `Inbound`).
    #[must_use]
    pub fn from_accepted(inner: Socket2, peer_addr: SocketAddr) -> Self {
        let _ = inner.set_nonblocking(true);
        Self { inner, peer_addr: Some(peer_addr), status: IoStatus::default() }
    }

    /// A fresh outbound socket with no connection attempt yet started.
    ///
    /// # Errors
    /// Returns [`SocketError`] if the underlying socket cannot be created.
    pub fn new_outbound(domain_hint: SocketAddr) -> Result<Self, SocketError> {
        let domain = if domain_hint.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let inner = Socket2::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner, peer_addr: None, status: IoStatus::default() })
    }
}

impl Socket for TcpSocket {
    fn begin_connect(&mut self, endpoint: SocketAddr) -> Result<(), SocketError> {
        self.peer_addr = Some(endpoint);
        match self.inner.connect(&endpoint.into()) {
            Ok(()) => {
                self.status.connecting = false;
                self.status.can_write = true;
            }
            Err(e) if matches!(e.raw_os_error(), Some(libc::EINPROGRESS)) => {
                self.status.connecting = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.status.connecting = true;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn complete_connect(&mut self) -> Result<bool, SocketError> {
        if !self.status.connecting {
            return Ok(self.peer_addr.is_some());
        }
        let (_, can_write, has_exception) =
            poll_readiness(self.inner.as_raw_fd(), false, true, Duration::ZERO)?;
        if has_exception {
            if let Some(err) = self.inner.take_error()? {
                return Err(err.into());
            }
        }
        if can_write {
            if let Some(err) = self.inner.take_error()? {
                return Err(err.into());
            }
            self.status.connecting = false;
            self.status.can_write = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
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
            Ok(0) => Err(SocketError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn update_io_status(&mut self, timeout: Duration) -> Result<IoStatus, SocketError> {
        if self.status.connecting {
            self.complete_connect()?;
        }
        let (can_read, can_write, has_exception) =
            poll_readiness(self.inner.as_raw_fd(), true, true, timeout)?;
        self.status.can_read = can_read;
        self.status.can_write = can_write || !self.status.connecting;
        self.status.has_exception = has_exception;
        if has_exception {
            self.status.error_code = self.inner.take_error()?.and_then(|e| e.raw_os_error());
        }
        Ok(self.status)
    }

    fn io_status(&self) -> IoStatus {
        self.status
    }

    fn close(&mut self, linger: Option<Duration>) {
        let _ = self.inner.set_linger(linger);
        let _ = self.inner.shutdown(std::net::Shutdown::Both);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}
