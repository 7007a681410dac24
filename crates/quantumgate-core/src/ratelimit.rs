//! Per-peer rate limiting (§4.13): bounded budgets on the message kinds
//! that carry externally-controlled payload volume. Each window tracks
//! outstanding (not-yet-consumed) bytes, capped at `MaxInnerData`.
//!
//! Unlike [`crate::error::PeerError::RateLimited`]'s use elsewhere for
//! hard rejection, a receive-side overflow here is *deferred*: the
//! message is held in the peer's deferred-receive queue instead of
//! dropped, so back-pressure stays observable to whatever is slow to
//! drain it (§4.13).

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::message::MAX_INNER_DATA;

/// Which per-peer budget a message kind draws against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKind {
    /// Outbound `ExtenderCommunication` payload volume.
    ExtenderCommunicationSend,
    /// Inbound `ExtenderCommunication` payload volume.
    ExtenderCommunicationReceive,
    /// Outbound `Noise` payload volume.
    NoiseSend,
    /// Outbound `RelayData` payload volume.
    RelayDataSend,
    /// Inbound `RelayData` payload volume.
    RelayDataReceive,
}

/// A single constant-time byte budget, capped at `cap` outstanding bytes.
#[derive(Debug)]
pub struct RateWindow {
    cap: usize,
    used: AtomicUsize,
}

impl RateWindow {
    #[must_use]
    fn new(cap: usize) -> Self {
        Self { cap, used: AtomicUsize::new(0) }
    }

    /// Whether `n` more bytes would still fit under the cap.
    #[must_use]
    pub fn can_add(&self, n: usize) -> bool {
        self.used.load(Ordering::Acquire).saturating_add(n) <= self.cap
    }

    /// Reserve `n` bytes of budget. Returns `false` (no-op) if it would
    /// overflow the cap.
    pub fn add(&self, n: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.saturating_add(n);
                (next <= self.cap).then_some(next)
            })
            .is_ok()
    }

    /// Release `n` bytes of previously-reserved budget (e.g. once a
    /// consumer has drained a deferred message).
    pub fn subtract(&self, n: usize) {
        self.used.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| Some(used.saturating_sub(n))).ok();
    }

    /// Currently outstanding bytes.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// The full set of per-peer rate windows (§4.13), one per
/// [`RateLimitKind`], each bounded by `MaxInnerData`.
#[derive(Debug)]
pub struct RateLimitSet {
    extender_send: RateWindow,
    extender_receive: RateWindow,
    noise_send: RateWindow,
    relay_data_send: RateWindow,
    relay_data_receive: RateWindow,
}

impl RateLimitSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extender_send: RateWindow::new(MAX_INNER_DATA),
            extender_receive: RateWindow::new(MAX_INNER_DATA),
            noise_send: RateWindow::new(MAX_INNER_DATA),
            relay_data_send: RateWindow::new(MAX_INNER_DATA),
            relay_data_receive: RateWindow::new(MAX_INNER_DATA),
        }
    }

    /// The window backing `kind`.
    #[must_use]
    pub fn window(&self, kind: RateLimitKind) -> &RateWindow {
        match kind {
            RateLimitKind::ExtenderCommunicationSend => &self.extender_send,
            RateLimitKind::ExtenderCommunicationReceive => &self.extender_receive,
            RateLimitKind::NoiseSend => &self.noise_send,
            RateLimitKind::RelayDataSend => &self.relay_data_send,
            RateLimitKind::RelayDataReceive => &self.relay_data_receive,
        }
    }
}

impl Default for RateLimitSet {
    fn default() -> Self {
        Self::new()
    }
}
