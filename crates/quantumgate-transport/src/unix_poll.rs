//! Zero-timeout (or bounded) readiness polling via `poll(2)`.
//!
//! Backs [`crate::socket::Socket::update_io_status`] for the TCP and UDP
//! backends: a single, short `poll()` call tells us whether a subsequent
//! `send`/`recv` would return immediately, without ever blocking inside a
//! worker thread (§5).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// `(can_read, can_write, has_exception)` for `fd`, waiting at most
/// `timeout` for one of the requested conditions to become true.
pub fn poll_readiness(
    fd: RawFd,
    want_read: bool,
    want_write: bool,
    timeout: Duration,
) -> io::Result<(bool, bool, bool)> {
    let mut events: libc::c_short = 0;
    if want_read {
        events |= libc::POLLIN;
    }
    if want_write {
        events |= libc::POLLOUT;
    }

    let mut fds = [libc::pollfd { fd, events, revents: 0 }];
    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = timeout.as_millis().min(i64::MAX as u128) as i32;

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let revents = fds[0].revents;
    let can_read = revents & libc::POLLIN != 0;
    let can_write = revents & libc::POLLOUT != 0;
    let has_exception = revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
    Ok((can_read, can_write, has_exception))
}
