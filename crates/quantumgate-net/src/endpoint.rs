//! Public endpoint inference (§4.12).
//!
//! Each peer, on reaching `SessionInit`, reports the endpoint it observes
//! for us. This module aggregates those reports into a confidence-ranked
//! set of believed-public endpoints, evicting the least relevant entry once
//! the set grows past a configured cap.
//!
//! Follows the same reputation-style scoring pattern as the access plane:
//! small, explicit bookkeeping structs rather than a generic "metadata bag",
//! and `ipnet` for network-membership tests.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use ipnet::IpNet;
use parking_lot::RwLock;

/// Application-level protocol a reported port belongs to (TCP/UDP, not an
/// HTTP-style scheme).
pub type Protocol = &'static str;

/// What's tracked for one believed-public endpoint (§4.12).
#[derive(Debug, Clone)]
pub struct EndpointRecord {
    /// When this endpoint was first reported.
    pub first_seen: Instant,
    /// When this endpoint was most recently reported.
    pub last_seen: Instant,
    /// Ports observed per protocol.
    pub ports: HashMap<Protocol, HashSet<u16>>,
    /// Networks (by /16 for v4, /48 for v6) of peers that have reported
    /// this endpoint, used for reporter-diversity scoring and to reject
    /// repeat reports from the same untrusted network.
    reporter_networks: HashSet<IpNet>,
    /// Whether this endpoint is operator-pinned as trusted.
    pub trusted: bool,
    /// Whether a trusted report has ever confirmed this endpoint.
    pub verified: bool,
}

impl EndpointRecord {
    fn new(now: Instant) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            ports: HashMap::new(),
            reporter_networks: HashSet::new(),
            trusted: false,
            verified: false,
        }
    }

    fn reporter_network(reporter_ip: IpAddr) -> IpNet {
        let prefix = if reporter_ip.is_ipv4() { 16 } else { 48 };
        IpNet::new(reporter_ip, prefix).expect("valid prefix for address family").trunc()
    }

    /// Higher is more relevant: verified beats trusted beats
    /// reporter-network diversity beats recency. Recency is negated so
    /// "just seen" sorts above "seen long ago" under plain ascending
    /// comparison of the tuple.
    fn relevance(&self, now: Instant) -> (bool, bool, usize, i64) {
        let recency_secs = now.duration_since(self.last_seen).as_secs() as i64;
        (self.verified, self.trusted, self.reporter_networks.len(), -recency_secs)
    }
}

/// Aggregates per-endpoint observation reports (§4.12).
pub struct EndpointInference {
    records: RwLock<HashMap<SocketAddr, EndpointRecord>>,
    max_endpoints: usize,
}

impl EndpointInference {
    /// `max_endpoints` is the cap past which [`Self::evict_least_relevant`]
    /// trims the set.
    #[must_use]
    pub fn new(max_endpoints: usize) -> Self {
        Self { records: RwLock::new(HashMap::new()), max_endpoints }
    }

    /// Record a report of `observed` coming from `reporter_ip`, on protocol
    /// `protocol` with port `observed.port()`.
    ///
    /// An untrusted report is ignored if some other peer from the same
    /// reporter network has already reported this endpoint (§4.12): only a
    /// trusted/pinned reporter can corroborate from a previously-seen
    /// network.
    pub fn report(&self, observed: SocketAddr, reporter_ip: IpAddr, protocol: Protocol, reporter_trusted: bool) {
        let now = Instant::now();
        let reporter_net = EndpointRecord::reporter_network(reporter_ip);
        let mut records = self.records.write();
        let record = records.entry(observed).or_insert_with(|| EndpointRecord::new(now));

        let already_seen_network = record.reporter_networks.contains(&reporter_net);
        if already_seen_network && !reporter_trusted {
            return;
        }

        record.last_seen = now;
        record.reporter_networks.insert(reporter_net);
        record.ports.entry(protocol).or_default().insert(observed.port());
        if reporter_trusted {
            record.verified = true;
        }

        drop(records);
        self.evict_least_relevant();
    }

    /// Mark `endpoint` as operator-pinned trusted.
    pub fn pin_trusted(&self, endpoint: SocketAddr) {
        if let Some(record) = self.records.write().get_mut(&endpoint) {
            record.trusted = true;
        }
    }

    /// Snapshot of `endpoint`'s current record, if known.
    #[must_use]
    pub fn get(&self, endpoint: SocketAddr) -> Option<EndpointRecord> {
        self.records.read().get(&endpoint).cloned()
    }

    /// Every currently-tracked endpoint, most relevant first.
    #[must_use]
    pub fn ranked(&self) -> Vec<(SocketAddr, EndpointRecord)> {
        let now = Instant::now();
        let mut out: Vec<_> = self.records.read().iter().map(|(a, r)| (*a, r.clone())).collect();
        out.sort_by(|(_, a), (_, b)| {
            let (av, at, an, ar) = a.relevance(now);
            let (bv, bt, bn, br) = b.relevance(now);
            (bv, bt, bn, std::cmp::Reverse(br)).cmp(&(av, at, an, std::cmp::Reverse(ar)))
        });
        out
    }

    fn evict_least_relevant(&self) {
        let mut records = self.records.write();
        if records.len() <= self.max_endpoints {
            return;
        }
        let now = Instant::now();
        while records.len() > self.max_endpoints {
            let worst = records
                .iter()
                .min_by(|(_, a), (_, b)| a.relevance(now).cmp(&b.relevance(now)))
                .map(|(addr, _)| *addr);
            let Some(addr) = worst else { break };
            records.remove(&addr);
        }
    }
}

impl Clone for EndpointRecord {
    fn clone(&self) -> Self {
        Self {
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            ports: self.ports.clone(),
            reporter_networks: self.reporter_networks.clone(),
            trusted: self.trusted,
            verified: self.verified,
        }
    }
}
