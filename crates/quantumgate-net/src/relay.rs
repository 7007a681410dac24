//! Relay plane (§4.14): splices two peer sessions together so encrypted
//! `RelayData` frames arriving on one hop are forwarded verbatim onto the
//! other, without the session layer on either side ever distinguishing a
//! relayed link from a direct one.
//!
//! Built around a `DashMap`-keyed concurrent table so lookups and inserts
//! never block a worker thread. The actual byte-forwarding callback is
//! `quantumgate_transport`'s `RelaySocket`/`RelayForwarder` pair: a locally
//! terminated relay client splices its own `Peer` into this table via a
//! virtual socket, so from the session layer's side there is no difference
//! from a real kernel connection (§9).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use quantumgate_core::Luid;

/// A locally generated id identifying one relay link (§4.14).
pub type RelayPort = u64;

/// The two peer sessions spliced together under one relay port, plus the
/// hop budget remaining. A `RelayCreate` with `hops > 1` chains through a
/// `GetRandomPeer`-selected intermediate before reaching the requested
/// endpoint; each intermediate forward decrements the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLink {
    /// The peer the `RelayCreate` arrived from.
    pub near: Luid,
    /// The peer opened (or chained to) in response.
    pub far: Luid,
    /// Remaining hops before the link reaches its final endpoint.
    pub hops_remaining: u32,
}

impl RelayLink {
    /// The other half of this link, from `luid`'s point of view.
    #[must_use]
    pub fn other(&self, luid: Luid) -> Option<Luid> {
        if luid == self.near {
            Some(self.far)
        } else if luid == self.far {
            Some(self.near)
        } else {
            None
        }
    }
}

/// The manager's table of active relay links, keyed by [`RelayPort`].
///
/// Indexed both by port (for `RelayData`/`RelayDataAck` forwarding, which
/// arrive tagged with the port they belong to) and by peer (so a peer's
/// disconnect can tear down every link it participates in and notify the
/// far side via `RelayStatus`).
#[derive(Default)]
pub struct RelayTable {
    links: DashMap<RelayPort, RelayLink>,
    by_peer: DashMap<Luid, Vec<RelayPort>>,
    next_port: AtomicU64,
}

impl RelayTable {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice `near` and `far` together under a freshly allocated port.
    pub fn create_link(&self, near: Luid, far: Luid, hops_remaining: u32) -> RelayPort {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed) + 1;
        self.links.insert(port, RelayLink { near, far, hops_remaining });
        self.by_peer.entry(near).or_default().push(port);
        self.by_peer.entry(far).or_default().push(port);
        port
    }

    /// The link registered under `port`, if any.
    #[must_use]
    pub fn link(&self, port: RelayPort) -> Option<RelayLink> {
        self.links.get(&port).map(|l| *l)
    }

    /// Every port `luid` currently participates in.
    #[must_use]
    pub fn ports_for(&self, luid: Luid) -> Vec<RelayPort> {
        self.by_peer.get(&luid).map(|v| v.clone()).unwrap_or_default()
    }

    /// The peer on the other end of `port` from `luid`'s perspective; the
    /// forwarding call site (§4.14: "forwarded verbatim ... as `RelayData`
    /// on S2") uses this to find where an inbound `RelayData` goes next.
    #[must_use]
    pub fn other_half(&self, port: RelayPort, luid: Luid) -> Option<Luid> {
        self.link(port)?.other(luid)
    }

    /// Tear down every link `luid` participates in (on disconnect).
    /// Returns the removed `(port, far_peer)` pairs so the caller can emit
    /// a `RelayStatus` to each far side.
    pub fn remove_peer(&self, luid: Luid) -> Vec<(RelayPort, Luid)> {
        let ports = self.by_peer.remove(&luid).map(|(_, v)| v).unwrap_or_default();
        let mut notified = Vec::with_capacity(ports.len());
        for port in ports {
            let Some((_, link)) = self.links.remove(&port) else { continue };
            if let Some(other) = link.other(luid) {
                if let Some(mut entry) = self.by_peer.get_mut(&other) {
                    entry.retain(|p| *p != port);
                }
                notified.push((port, other));
            }
        }
        notified
    }

    /// Decrement the hop budget on `port`, returning the new value, or
    /// `None` if the port doesn't exist.
    pub fn decrement_hop(&self, port: RelayPort) -> Option<u32> {
        let mut entry = self.links.get_mut(&port)?;
        entry.hops_remaining = entry.hops_remaining.saturating_sub(1);
        Some(entry.hops_remaining)
    }

    /// Total active links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the table holds no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn luid(n: u64) -> Luid {
        Luid::from_endpoint(&format!("10.0.0.{n}:9000"))
    }

    #[test]
    fn create_link_indexes_both_halves() {
        let table = RelayTable::new();
        let a = luid(1);
        let b = luid(2);
        let port = table.create_link(a, b, 1);
        assert_eq!(table.other_half(port, a), Some(b));
        assert_eq!(table.other_half(port, b), Some(a));
    }

    #[test]
    fn remove_peer_tears_down_its_links_and_notifies_far_side() {
        let table = RelayTable::new();
        let a = luid(1);
        let b = luid(2);
        let port = table.create_link(a, b, 1);
        let removed = table.remove_peer(a);
        assert_eq!(removed, vec![(port, b)]);
        assert!(table.link(port).is_none());
        assert!(table.ports_for(b).is_empty());
    }

    #[test]
    fn decrement_hop_reaches_zero() {
        let table = RelayTable::new();
        let port = table.create_link(luid(1), luid(2), 1);
        assert_eq!(table.decrement_hop(port), Some(0));
        assert_eq!(table.decrement_hop(port), Some(0));
    }

    #[test]
    fn unknown_port_yields_none() {
        let table = RelayTable::new();
        assert!(table.link(999).is_none());
        assert!(table.other_half(999, luid(1)).is_none());
    }
}
