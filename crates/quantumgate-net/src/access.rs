//! IP access plane (§4.11): allow/block filtering, per-subnet admission
//! limits, IP reputation, and connection-attempt rate limiting.
//!
//! Uses atomics for lock-free counters and a `DashMap`-keyed concurrent
//! table for per-IP and per-CIDR-bucket bookkeeping, matching the pattern
//! the scheduler's own worker stats and peer lookup indices use.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ipnet::IpNet;
use parking_lot::RwLock;

use quantumgate_core::PeerError;

/// IP reputation score bounds (§4.11).
pub const MIN_SCORE: i32 = -3000;
/// IP reputation score bounds (§4.11).
pub const MAX_SCORE: i32 = 3000;
/// Starting/reset score and acceptance threshold.
pub const BASE_SCORE: i32 = 0;

/// Reputation deltas (§4.11: "concrete deltas are implementation constants").
pub const IMPROVE_MINIMAL: i32 = 1;
/// Reputation deltas (§4.11).
pub const DETERIORATE_MINIMAL: i32 = -1;
/// Reputation deltas (§4.11).
pub const IMPROVE_MODERATE: i32 = 10;
/// Reputation deltas (§4.11).
pub const DETERIORATE_MODERATE: i32 = -10;
/// Reputation deltas (§4.11).
pub const IMPROVE_SEVERE: i32 = 50;
/// Reputation deltas (§4.11).
pub const DETERIORATE_SEVERE: i32 = -50;

/// Whether a CIDR rule allows or blocks the IPs it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Explicitly allowed.
    Allow,
    /// Explicitly blocked.
    Block,
}

/// A single CIDR-masked access rule.
#[derive(Debug, Clone)]
pub struct FilterRule {
    /// The network this rule matches.
    pub network: IpNet,
    /// Allow or block.
    pub action: FilterAction,
}

/// IP allow/block filter (§4.11): "a peer-IP is allowed iff it matches at
/// least one Allowed rule OR matches no Blocked rule".
#[derive(Default)]
pub struct IpFilter {
    rules: RwLock<Vec<FilterRule>>,
}

impl IpFilter {
    /// Construct an empty filter (everything allowed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rule set wholesale.
    pub fn set_rules(&self, rules: Vec<FilterRule>) {
        *self.rules.write() = rules;
    }

    /// Add a single rule.
    pub fn add_rule(&self, rule: FilterRule) {
        self.rules.write().push(rule);
    }

    /// Evaluate whether `ip` is allowed to connect.
    #[must_use]
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let rules = self.rules.read();
        let mut matched_allow = false;
        let mut matched_block = false;
        for rule in rules.iter() {
            if rule.network.contains(&ip) {
                match rule.action {
                    FilterAction::Allow => matched_allow = true,
                    FilterAction::Block => matched_block = true,
                }
            }
        }
        matched_allow || !matched_block
    }
}

/// Per-CIDR-bucket connection counters for subnet admission limits
/// (§4.11). A "depth" is a CIDR prefix length at which a cap applies, e.g.
/// "no more than 4 peers per IPv4 /24".
pub struct SubnetLimits {
    v4_depths: Vec<(u8, u32)>,
    v6_depths: Vec<(u8, u32)>,
    counts: DashMap<IpNet, u32>,
}

impl SubnetLimits {
    /// `v4_depths`/`v6_depths` are `(prefix_len, max_connections)` pairs.
    #[must_use]
    pub fn new(v4_depths: Vec<(u8, u32)>, v6_depths: Vec<(u8, u32)>) -> Self {
        Self { v4_depths, v6_depths, counts: DashMap::new() }
    }

    fn depths_for(&self, ip: IpAddr) -> &[(u8, u32)] {
        if ip.is_ipv4() { &self.v4_depths } else { &self.v6_depths }
    }

    /// Attempt to admit a connection from `ip`. On success the relevant
    /// bucket counters are incremented; on rejection nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::SubnetLimitExceeded`] if any configured depth's
    /// bucket is already at its cap.
    pub fn admit(&self, ip: IpAddr) -> Result<(), PeerError> {
        let buckets: Vec<IpNet> = self
            .depths_for(ip)
            .iter()
            .filter_map(|(prefix, _)| IpNet::new(ip, *prefix).ok())
            .map(|net| net.trunc())
            .collect();

        for (net, (_, max)) in buckets.iter().zip(self.depths_for(ip)) {
            let current = self.counts.get(net).map(|c| *c).unwrap_or(0);
            if current >= *max {
                return Err(PeerError::SubnetLimitExceeded);
            }
        }
        for net in &buckets {
            *self.counts.entry(*net).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Release a previously admitted connection from `ip`.
    pub fn release(&self, ip: IpAddr) {
        for (prefix, _) in self.depths_for(ip) {
            if let Ok(net) = IpNet::new(ip, *prefix) {
                let net = net.trunc();
                if let Some(mut count) = self.counts.get_mut(&net) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }
}

/// One IP's reputation record (§4.11). The time-based improvement is
/// applied lazily on read rather than via a background timer.
struct ReputationEntry {
    score: AtomicI64,
    last_update_ms: AtomicI64,
}

/// Tracks IP reputation scores for the life of the process.
pub struct ReputationTable {
    entries: DashMap<IpAddr, ReputationEntry>,
    improvement_interval: Duration,
    started_at: Instant,
}

impl ReputationTable {
    /// `improvement_interval` is `Local.IPReputationImprovementInterval`.
    #[must_use]
    pub fn new(improvement_interval: Duration) -> Self {
        Self { entries: DashMap::new(), improvement_interval, started_at: Instant::now() }
    }

    fn now_ms(&self) -> i64 {
        self.started_at.elapsed().as_millis() as i64
    }

    /// Current score for `ip`, after applying any lazy time-based
    /// improvement accrued since the last update.
    #[must_use]
    pub fn score(&self, ip: IpAddr) -> i32 {
        let entry = self.entries.entry(ip).or_insert_with(|| ReputationEntry {
            score: AtomicI64::new(i64::from(MAX_SCORE)),
            last_update_ms: AtomicI64::new(0),
        });
        let now = self.now_ms();
        let last = entry.last_update_ms.load(Ordering::Acquire);
        let elapsed_intervals = if self.improvement_interval.is_zero() {
            0
        } else {
            ((now - last).max(0) as u128 / self.improvement_interval.as_millis().max(1)) as i64
        };
        if elapsed_intervals > 0 {
            let improved =
                (entry.score.load(Ordering::Acquire) + elapsed_intervals * i64::from(IMPROVE_MINIMAL))
                    .min(i64::from(MAX_SCORE));
            entry.score.store(improved, Ordering::Release);
            entry.last_update_ms.store(now, Ordering::Release);
        }
        entry.score.load(Ordering::Acquire) as i32
    }

    /// Apply a delta, clamped to `[MinScore, MaxScore]`.
    pub fn adjust(&self, ip: IpAddr, delta: i32) {
        let _ = self.score(ip);
        let entry = self.entries.entry(ip).or_insert_with(|| ReputationEntry {
            score: AtomicI64::new(i64::from(MAX_SCORE)),
            last_update_ms: AtomicI64::new(0),
        });
        let now = self.now_ms();
        let updated = (entry.score.load(Ordering::Acquire) + i64::from(delta))
            .clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE));
        entry.score.store(updated, Ordering::Release);
        entry.last_update_ms.store(now, Ordering::Release);
    }

    /// Reset `ip`'s score to the maximum.
    pub fn reset(&self, ip: IpAddr) {
        self.entries.insert(
            ip,
            ReputationEntry {
                score: AtomicI64::new(i64::from(MAX_SCORE)),
                last_update_ms: AtomicI64::new(self.now_ms()),
            },
        );
    }

    /// Whether `ip`'s current score clears the acceptance threshold
    /// (`Base`, §4.11).
    #[must_use]
    pub fn is_acceptable(&self, ip: IpAddr) -> bool {
        self.score(ip) >= BASE_SCORE
    }
}

/// Rolling connection-attempt counter for a single IP (§4.11).
struct AttemptWindow {
    count: AtomicU32,
    window_start_ms: AtomicI64,
}

/// Per-IP connection-attempt rate limiting.
pub struct AttemptLimiter {
    windows: DashMap<IpAddr, AttemptWindow>,
    max_per_interval: u32,
    interval: Duration,
    started_at: Instant,
}

impl AttemptLimiter {
    /// Construct from `Local.IPConnectionAttempts`.
    #[must_use]
    pub fn new(max_per_interval: u32, interval: Duration) -> Self {
        Self { windows: DashMap::new(), max_per_interval, interval, started_at: Instant::now() }
    }

    fn now_ms(&self) -> i64 {
        self.started_at.elapsed().as_millis() as i64
    }

    /// Record a connection attempt from `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::RateLimited`] if this attempt overflows the
    /// rolling window.
    pub fn record_attempt(&self, ip: IpAddr) -> Result<(), PeerError> {
        let now = self.now_ms();
        let interval_ms = self.interval.as_millis().max(1) as i64;
        let mut entry = self.windows.entry(ip).or_insert_with(|| AttemptWindow {
            count: AtomicU32::new(0),
            window_start_ms: AtomicI64::new(now),
        });
        let start = entry.window_start_ms.load(Ordering::Acquire);
        if now - start >= interval_ms {
            entry.window_start_ms.store(now, Ordering::Release);
            entry.count.store(0, Ordering::Release);
        }
        let updated = entry.count.fetch_add(1, Ordering::AcqRel) + 1;
        if updated > self.max_per_interval {
            return Err(PeerError::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_allows_when_no_rules_match() {
        let filter = IpFilter::new();
        assert!(filter.is_allowed("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn filter_blocks_matched_block_rule() {
        let filter = IpFilter::new();
        filter.add_rule(FilterRule { network: "10.0.0.0/8".parse().unwrap(), action: FilterAction::Block });
        assert!(!filter.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(filter.is_allowed("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn filter_allow_rule_overrides_block() {
        let filter = IpFilter::new();
        filter.add_rule(FilterRule { network: "10.0.0.0/8".parse().unwrap(), action: FilterAction::Block });
        filter.add_rule(FilterRule { network: "10.0.0.0/24".parse().unwrap(), action: FilterAction::Allow });
        assert!(filter.is_allowed("10.0.0.5".parse().unwrap()));
        assert!(!filter.is_allowed("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn subnet_limit_rejects_once_bucket_full() {
        let limits = SubnetLimits::new(vec![(24, 2)], vec![]);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let c: IpAddr = "10.0.0.3".parse().unwrap();
        limits.admit(a).unwrap();
        limits.admit(b).unwrap();
        assert!(limits.admit(c).is_err());
        limits.release(a);
        assert!(limits.admit(c).is_ok());
    }

    #[test]
    fn reputation_starts_at_max_and_clamps_on_adjust() {
        let table = ReputationTable::new(Duration::from_secs(60));
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(table.score(ip), MAX_SCORE);
        for _ in 0..200 {
            table.adjust(ip, DETERIORATE_SEVERE);
        }
        assert_eq!(table.score(ip), MIN_SCORE);
        table.reset(ip);
        assert_eq!(table.score(ip), MAX_SCORE);
    }

    #[test]
    fn reputation_below_base_is_unacceptable() {
        let table = ReputationTable::new(Duration::from_secs(60));
        let ip: IpAddr = "1.2.3.5".parse().unwrap();
        table.adjust(ip, -(MAX_SCORE + 1));
        assert!(!table.is_acceptable(ip));
    }

    #[test]
    fn attempt_limiter_blocks_after_max_per_interval() {
        let limiter = AttemptLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(limiter.record_attempt(ip).is_ok());
        assert!(limiter.record_attempt(ip).is_ok());
        assert!(limiter.record_attempt(ip).is_ok());
        assert!(limiter.record_attempt(ip).is_err());
    }
}
