//! Noise queue and traffic shaping (§4.6).
//!
//! Schedules decoy `Noise`-kind inner messages at a randomized rate so that
//! idle periods and real traffic are harder to distinguish from the wire.
//! Drives the obfuscation crate's padding/timing primitives
//! (`quantumgate-obfuscation::padding`, `::timing`) rather than duplicating
//! them.

use std::time::{Duration, Instant};

use rand::Rng;
use rand_core::OsRng;

use crate::config::NoiseSettings;
use crate::message::{InnerMessage, MessageKind};

/// Minimum per-second noise rate maintained even under the stretched
/// handshake interval (§4.6: "a floor of 3 messages/s maximum capacity").
const HANDSHAKE_RATE_FLOOR_PER_SEC: f64 = 3.0;

/// Schedules and produces noise messages for one peer session.
pub struct NoiseQueue {
    settings: NoiseSettings,
    next_due: Option<Instant>,
    in_handshake: bool,
    max_handshake_delay: Duration,
}

impl NoiseQueue {
    /// A fresh queue using `settings`; `max_handshake_delay` is
    /// `Local.MaxHandshakeDelay` (§4.6: "the interval is stretched to
    /// `2 × MaxHandshakeDelay`").
    #[must_use]
    pub fn new(settings: NoiseSettings, max_handshake_delay: Duration) -> Self {
        Self { settings, next_due: None, in_handshake: true, max_handshake_delay }
    }

    /// Call once the peer leaves the handshake phase and reaches `Ready`.
    pub fn mark_handshake_complete(&mut self) {
        self.in_handshake = false;
    }

    fn interval(&self) -> Duration {
        if self.in_handshake {
            Duration::from_millis(self.settings.time_interval_ms) * 2
        } else {
            Duration::from_millis(self.settings.time_interval_ms)
        }
    }

    fn messages_per_interval(&self) -> u32 {
        if !self.in_handshake {
            return rand::thread_rng()
                .gen_range(self.settings.min_messages_per_interval..=self.settings.max_messages_per_interval);
        }
        // Scale N so the per-second rate is preserved across the stretched
        // interval, with a floor of HANDSHAKE_RATE_FLOOR_PER_SEC msgs/s.
        let base = rand::thread_rng()
            .gen_range(self.settings.min_messages_per_interval..=self.settings.max_messages_per_interval);
        let base_rate = f64::from(base) / (self.settings.time_interval_ms as f64 / 1000.0);
        let floor = HANDSHAKE_RATE_FLOOR_PER_SEC.min(base_rate.max(HANDSHAKE_RATE_FLOOR_PER_SEC));
        let stretched_secs = self.max_handshake_delay.as_secs_f64() * 2.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (floor * stretched_secs.max(self.interval().as_secs_f64())) as u32;
        scaled.max(base)
    }

    /// Schedule the next noise event if the queue is currently empty
    /// (§4.9: the primary loop "enqueues noise if the noise queue is
    /// empty").
    pub fn ensure_scheduled(&mut self) {
        if !self.settings.enabled {
            self.next_due = None;
            return;
        }
        if self.next_due.is_none() {
            let n = self.messages_per_interval();
            if n > 0 {
                self.next_due = Some(Instant::now() + self.interval());
            }
        }
    }

    /// Whether a scheduled noise event is due now.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.next_due.is_some_and(|at| Instant::now() >= at)
    }

    /// Pop the due noise event and produce a `Noise`-kind inner message of
    /// uniformly random length. Returns `None` if nothing is due, or the
    /// caller-supplied `available_budget` (the noise rate-limit bucket)
    /// is smaller than the smallest size the queue could produce.
    pub fn pop(&mut self, available_budget: u32) -> Option<InnerMessage> {
        if !self.is_due() {
            return None;
        }
        self.next_due = None;

        if available_budget < self.settings.min_message_size {
            return None;
        }
        let max_len = self.settings.max_message_size.min(available_budget);
        let len = rand::thread_rng().gen_range(self.settings.min_message_size..=max_len) as usize;
        let mut data = vec![0u8; len];
        OsRng.fill(&mut data[..]);
        Some(InnerMessage::complete(MessageKind::Noise, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_queue_never_schedules() {
        let mut settings = NoiseSettings::default();
        settings.enabled = false;
        let mut queue = NoiseQueue::new(settings, Duration::from_millis(500));
        queue.ensure_scheduled();
        assert!(!queue.is_due());
    }

    #[test]
    fn pop_respects_available_budget_floor() {
        let mut settings = NoiseSettings::default();
        settings.min_message_size = 100;
        settings.max_message_size = 200;
        let mut queue = NoiseQueue::new(settings, Duration::from_millis(10));
        queue.next_due = Some(Instant::now());
        assert!(queue.pop(50).is_none());
    }

    #[test]
    fn pop_produces_noise_kind_within_bounds() {
        let mut settings = NoiseSettings::default();
        settings.min_message_size = 16;
        settings.max_message_size = 32;
        let mut queue = NoiseQueue::new(settings, Duration::from_millis(10));
        queue.next_due = Some(Instant::now());
        let msg = queue.pop(1024).unwrap();
        assert_eq!(msg.kind, MessageKind::Noise);
        assert!(msg.data.len() >= 16 && msg.data.len() <= 32);
    }
}
