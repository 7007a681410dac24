//! Sliding-window replay protection for per-peer, per-direction message
//! counters.
//!
//! The transport frame carries a `u8` counter alongside its nonce seed; this
//! window tracks which counters within the trailing window have already been
//! seen so a replayed frame is rejected rather than re-decrypted.

/// Width of the replay window in counter positions.
pub const WINDOW_SIZE: u32 = 64;

/// Sliding-window replay detector.
///
/// Tracks the highest counter seen so far plus a bitmask of the
/// `WINDOW_SIZE` positions immediately below it. A counter above the
/// highest seen always advances the window; a counter within the window
/// is accepted once and rejected on every subsequent occurrence; a counter
/// below the window is always rejected.
#[derive(Debug, Clone)]
pub struct ReplayProtection {
    highest: u64,
    window: u64,
    initialized: bool,
}

impl ReplayProtection {
    /// Create an empty replay window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            highest: 0,
            window: 0,
            initialized: false,
        }
    }

    /// Check whether `counter` is fresh and, if so, record it as seen.
    ///
    /// Returns `true` if the counter is new and the message should be
    /// processed; `false` if it's a replay and should be dropped.
    pub fn check_and_update(&mut self, counter: u64) -> bool {
        if !self.initialized {
            self.initialized = true;
            self.highest = counter;
            self.window = 1;
            return true;
        }

        if counter > self.highest {
            let shift = counter - self.highest;
            self.window = if shift >= u64::from(WINDOW_SIZE) {
                1
            } else {
                (self.window << shift) | 1
            };
            self.highest = counter;
            return true;
        }

        let diff = self.highest - counter;
        if diff >= u64::from(WINDOW_SIZE) {
            return false;
        }

        let bit = 1u64 << diff;
        if self.window & bit != 0 {
            return false;
        }
        self.window |= bit;
        true
    }
}

impl Default for ReplayProtection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_counter_accepted() {
        let mut replay = ReplayProtection::new();
        assert!(replay.check_and_update(0));
    }

    #[test]
    fn test_sequential_counters_accepted() {
        let mut replay = ReplayProtection::new();
        for i in 0..10 {
            assert!(replay.check_and_update(i));
        }
    }

    #[test]
    fn test_exact_replay_rejected() {
        let mut replay = ReplayProtection::new();
        assert!(replay.check_and_update(5));
        assert!(!replay.check_and_update(5));
    }

    #[test]
    fn test_out_of_order_within_window_accepted_once() {
        let mut replay = ReplayProtection::new();
        assert!(replay.check_and_update(10));
        assert!(replay.check_and_update(8));
        assert!(!replay.check_and_update(8));
        assert!(replay.check_and_update(9));
    }

    #[test]
    fn test_counter_below_window_rejected() {
        let mut replay = ReplayProtection::new();
        assert!(replay.check_and_update(1000));
        assert!(!replay.check_and_update(1000 - u64::from(WINDOW_SIZE) - 1));
    }

    #[test]
    fn test_large_forward_jump_resets_window() {
        let mut replay = ReplayProtection::new();
        assert!(replay.check_and_update(5));
        assert!(replay.check_and_update(5 + u64::from(WINDOW_SIZE) + 50));
        // the old counter is now far below the new window
        assert!(!replay.check_and_update(5));
    }
}
