//! Peer lookup indices (§4.10).
//!
//! Four maps, kept mutually consistent: UUID → set of LUIDs, address → set
//! of LUIDs, endpoint-hash → set of LUIDs, and LUID → peer-data handle.
//! Built around independently-locked tables so lookups never contend with
//! the scheduler's worker threads.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ipnet::IpNet;
use parking_lot::RwLock;
use rand::Rng;
use rand::seq::SliceRandom;

use quantumgate_core::{ConnectionType, Luid, Peer, PeerUuid, Status};

/// Set-membership mode for a `QueryPeers` filter (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMatch {
    /// At least one of the given values must match.
    OneOf,
    /// Every given value must match.
    AllOf,
    /// None of the given values may match.
    NoneOf,
}

/// Filter parameters for [`LookupMaps::query_peers`].
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Restrict to authenticated peers only, if `Some`.
    pub authenticated: Option<bool>,
    /// Restrict to relayed (vs. direct) peers only, if `Some`.
    pub relayed: Option<bool>,
    /// Restrict by connection direction, if `Some`.
    pub direction: Option<ConnectionType>,
    /// Extender-membership filter: `(uuids, mode)`.
    pub extenders: Option<(Vec<PeerUuid>, SetMatch)>,
}

impl QueryParams {
    fn matches(&self, peer: &Peer) -> bool {
        if let Some(wanted) = self.authenticated
            && peer.is_authenticated() != wanted
        {
            return false;
        }
        if let Some(wanted) = self.relayed
            && peer.is_relay() != wanted
        {
            return false;
        }
        if let Some(wanted) = self.direction
            && peer.connection_type() != wanted
        {
            return false;
        }
        if let Some((uuids, mode)) = &self.extenders {
            let peer_set = peer.peer_extenders();
            let hit = |u: &PeerUuid| peer_set.contains(u);
            let ok = match mode {
                SetMatch::OneOf => uuids.iter().any(hit),
                SetMatch::AllOf => uuids.iter().all(hit),
                SetMatch::NoneOf => !uuids.iter().any(hit),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// Hash an endpoint the way `LookupMaps::GetEndpointHash` does: address and
/// port folded into one key so the endpoint-hash index doesn't need to
/// store `SocketAddr`s verbatim.
#[must_use]
pub fn endpoint_hash(endpoint: SocketAddr) -> u64 {
    let mut hasher = DefaultHasher::new();
    endpoint.hash(&mut hasher);
    hasher.finish()
}

/// Indexed lookup over the manager's peer set (§4.10): UUID, address, and
/// endpoint-hash each map to the *set* of LUIDs currently using them, and
/// LUID maps one-to-one to the peer handle. Holds `Arc` handles into the
/// same peers `AllPeers` owns; this structure never drops a peer, it only
/// indexes one. The four maps are kept mutually consistent by routing every
/// mutation through [`LookupMaps::insert`]/[`LookupMaps::remove`]/
/// [`LookupMaps::update_uuid`].
#[derive(Default)]
pub struct LookupMaps {
    by_uuid: RwLock<HashMap<PeerUuid, HashSet<Luid>>>,
    by_address: RwLock<HashMap<IpAddr, HashSet<Luid>>>,
    by_endpoint_hash: RwLock<HashMap<u64, HashSet<Luid>>>,
    peers: RwLock<HashMap<Luid, Arc<parking_lot::RwLock<Peer>>>>,
}

impl LookupMaps {
    /// Construct an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer under its current endpoint and LUID. If the peer's
    /// UUID is already known (e.g. a reconnect of a previously-authenticated
    /// peer) it is indexed immediately; otherwise call
    /// [`LookupMaps::update_uuid`] once authentication completes.
    pub fn insert(&self, luid: Luid, endpoint: Option<SocketAddr>, peer: Arc<parking_lot::RwLock<Peer>>) {
        if let Some(addr) = endpoint {
            self.by_address.write().entry(addr.ip()).or_default().insert(luid);
            self.by_endpoint_hash.write().entry(endpoint_hash(addr)).or_default().insert(luid);
        }
        if let Some(uuid) = peer.read().peer_uuid() {
            self.by_uuid.write().entry(uuid).or_default().insert(luid);
        }
        self.peers.write().insert(luid, peer);
    }

    /// Record a peer's UUID once learned (post-authentication). A no-op if
    /// already indexed under that UUID.
    pub fn update_uuid(&self, luid: Luid, uuid: PeerUuid) {
        self.by_uuid.write().entry(uuid).or_default().insert(luid);
    }

    /// Remove a peer from every index.
    pub fn remove(&self, luid: Luid) {
        let Some(peer) = self.peers.write().remove(&luid) else { return };
        let snapshot = peer.read();
        if let Some(uuid) = snapshot.peer_uuid() {
            let mut by_uuid = self.by_uuid.write();
            if let Some(luids) = by_uuid.get_mut(&uuid) {
                luids.remove(&luid);
                if luids.is_empty() {
                    by_uuid.remove(&uuid);
                }
            }
        }
        if let Some(addr) = snapshot.endpoint() {
            let mut by_address = self.by_address.write();
            if let Some(luids) = by_address.get_mut(&addr.ip()) {
                luids.remove(&luid);
                if luids.is_empty() {
                    by_address.remove(&addr.ip());
                }
            }
            let hash = endpoint_hash(addr);
            let mut by_hash = self.by_endpoint_hash.write();
            if let Some(luids) = by_hash.get_mut(&hash) {
                luids.remove(&luid);
                if luids.is_empty() {
                    by_hash.remove(&hash);
                }
            }
        }
    }

    /// Look up a peer by its observed remote endpoint.
    #[must_use]
    pub fn get_peer_by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<parking_lot::RwLock<Peer>>> {
        let hash = endpoint_hash(endpoint);
        let luids = self.by_endpoint_hash.read().get(&hash)?.clone();
        let peers = self.peers.read();
        luids.iter().find_map(|luid| {
            let peer = peers.get(luid)?;
            (peer.read().endpoint() == Some(endpoint)).then(|| Arc::clone(peer))
        })
    }

    /// All LUIDs currently registered under `uuid`.
    #[must_use]
    pub fn luids_for_uuid(&self, uuid: PeerUuid) -> Vec<Luid> {
        self.by_uuid.read().get(&uuid).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Filtered peer query (§4.10).
    #[must_use]
    pub fn query_peers(&self, params: &QueryParams) -> Vec<Arc<parking_lot::RwLock<Peer>>> {
        self.peers
            .read()
            .values()
            .filter(|p| params.matches(&p.read()))
            .cloned()
            .collect()
    }

    /// Pick a uniformly random `Ready` peer, excluding the given LUIDs,
    /// endpoints, and CIDR ranges (§4.10: the relay-path builder).
    ///
    /// Mirrors `LookupMaps::GetRandomPeer`'s two-level selection: pick a
    /// random bucket from the address index, then a random LUID from that
    /// bucket. Retries up to 3 times against the excluded sets before
    /// falling back to a linear scan over every bucket; returns `None` only
    /// if truly nothing qualifies.
    #[must_use]
    pub fn get_random_peer(
        &self,
        exclude_luids: &[Luid],
        exclude_addrs: &[SocketAddr],
        exclude_cidrs: &[IpNet],
    ) -> Option<Arc<parking_lot::RwLock<Peer>>> {
        let eligible = |luid: &Luid, peer: &Peer| -> bool {
            if peer.status() != Status::Ready {
                return false;
            }
            if exclude_luids.contains(luid) {
                return false;
            }
            if let Some(addr) = peer.endpoint() {
                if exclude_addrs.contains(&addr) {
                    return false;
                }
                if exclude_cidrs.iter().any(|net| net.contains(&addr.ip())) {
                    return false;
                }
            }
            true
        };

        let by_address = self.by_address.read();
        let buckets: Vec<(&IpAddr, &HashSet<Luid>)> = by_address.iter().collect();
        if buckets.is_empty() {
            return None;
        }
        let peers = self.peers.read();

        let mut rng = rand::thread_rng();
        for _ in 0..3 {
            let Some((_, bucket)) = buckets.choose(&mut rng) else { continue };
            let bucket: Vec<&Luid> = bucket.iter().collect();
            let Some(&&luid) = bucket.choose(&mut rng) else { continue };
            if let Some(peer) = peers.get(&luid) {
                if eligible(&luid, &peer.read()) {
                    return Some(Arc::clone(peer));
                }
            }
        }

        // Fall back to a linear scan over every bucket, starting at a random
        // offset so repeated misses don't all land on the same bucket.
        let start = rng.gen_range(0..buckets.len());
        for i in 0..buckets.len() {
            let (_, bucket) = buckets[(start + i) % buckets.len()];
            for &luid in bucket {
                if let Some(peer) = peers.get(&luid) {
                    if eligible(&luid, &peer.read()) {
                        return Some(Arc::clone(peer));
                    }
                }
            }
        }
        None
    }

    /// Total number of indexed peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

/// Exposed for callers that need to bucket by raw IP rather than full
/// socket address (subnet exclusion in relay path selection, §4.11/§4.14).
#[must_use]
pub fn ip_of(addr: SocketAddr) -> IpAddr {
    addr.ip()
}

#[cfg(test)]
mod tests {
    use quantumgate_core::{PeerUuid, Settings};
    use quantumgate_crypto::signatures::SigningKey;
    use quantumgate_transport::AnySocket;
    use rand_core::OsRng;

    use super::*;

    struct NullForwarder;
    impl quantumgate_transport::RelayForwarder for NullForwarder {
        fn forward(&self, _bytes: &[u8]) {}
    }

    fn dummy_socket(addr: SocketAddr) -> AnySocket {
        AnySocket::Relay(quantumgate_transport::RelaySocket::new(Arc::new(NullForwarder), addr))
    }

    /// A peer whose `luid()` derives from `luid_seed` and whose `endpoint()`
    /// (what the lookup indices key on) is `observed_endpoint`.
    fn peer_at(luid_seed: SocketAddr, observed_endpoint: SocketAddr) -> Arc<parking_lot::RwLock<Peer>> {
        let peer = Peer::new_outbound(
            luid_seed,
            dummy_socket(observed_endpoint),
            Settings::default(),
            SigningKey::generate(&mut OsRng),
            vec![],
        );
        Arc::new(parking_lot::RwLock::new(peer))
    }

    #[test]
    fn insert_populates_address_and_endpoint_hash_indices() {
        let maps = LookupMaps::new();
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let peer = peer_at("127.0.0.1:1".parse().unwrap(), addr);
        let luid = peer.read().luid();
        maps.insert(luid, Some(addr), Arc::clone(&peer));

        assert_eq!(maps.len(), 1);
        assert!(maps.get_peer_by_endpoint(addr).is_some());
        assert_eq!(maps.by_address.read().get(&addr.ip()).unwrap().len(), 1);
        assert_eq!(maps.by_endpoint_hash.read().get(&endpoint_hash(addr)).unwrap().len(), 1);
    }

    #[test]
    fn remove_clears_every_index() {
        let maps = LookupMaps::new();
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let peer = peer_at("127.0.0.1:1".parse().unwrap(), addr);
        let luid = peer.read().luid();
        maps.insert(luid, Some(addr), Arc::clone(&peer));
        maps.update_uuid(luid, PeerUuid::extender([0x42; 14]));

        maps.remove(luid);

        assert!(maps.is_empty());
        assert!(maps.get_peer_by_endpoint(addr).is_none());
        assert!(maps.by_address.read().is_empty());
        assert!(maps.by_endpoint_hash.read().is_empty());
        assert!(maps.by_uuid.read().is_empty());
    }

    #[test]
    fn update_uuid_indexes_an_already_inserted_peer() {
        let maps = LookupMaps::new();
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let peer = peer_at("127.0.0.1:1".parse().unwrap(), addr);
        let luid = peer.read().luid();
        maps.insert(luid, Some(addr), peer);

        let uuid = PeerUuid::extender([0x11; 14]);
        assert!(maps.luids_for_uuid(uuid).is_empty());
        maps.update_uuid(luid, uuid);
        assert_eq!(maps.luids_for_uuid(uuid), vec![luid]);
    }

    #[test]
    fn multiple_luids_can_share_one_address_bucket() {
        let maps = LookupMaps::new();
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let a = peer_at("127.0.0.1:1".parse().unwrap(), addr);
        let b = peer_at("127.0.0.1:2".parse().unwrap(), addr);
        let luid_a = a.read().luid();
        let luid_b = b.read().luid();
        maps.insert(luid_a, Some(addr), a);
        maps.insert(luid_b, Some(addr), b);

        assert_eq!(maps.by_address.read().get(&addr.ip()).unwrap().len(), 2);
    }
}
