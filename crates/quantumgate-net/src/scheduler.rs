//! Peer manager & scheduling (§4.9, §5).
//!
//! Built on plain OS threads (`thread::Builder::new().name(...).spawn(...)`,
//! an `AtomicBool` shutdown flag joined at the end, `tracing` for lifecycle
//! logging) following §4.9's two-tier model: several thread pools, each with
//! one primary sweep thread plus worker threads draining that pool's
//! bounded-burst queue. `Peer`'s own `InQueue` flag
//! (flipped under its own lock in `try_enter_queue`/`leave_queue`) is the
//! serialization token described in §5 — the pool's work queue only ever
//! holds LUIDs, never the peer data itself.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use quantumgate_core::error::{DisconnectCondition, ReputationImpact};
use quantumgate_core::{Luid, MessageKind, Peer, PeerError, PeerUuid, Settings};
use quantumgate_crypto::signatures::SigningKey;
use quantumgate_transport::{AnySocket, Socket, TcpSocket};

use crate::access::{
    AttemptLimiter, IpFilter, ReputationTable, SubnetLimits, DETERIORATE_MINIMAL, DETERIORATE_MODERATE,
    DETERIORATE_SEVERE,
};
use crate::lookup::{LookupMaps, QueryParams};
use crate::relay::{RelayPort, RelayTable};

/// Scales `max_handshake_duration` for a peer whose socket is a relay
/// splice (§4.9: "enforces ... max_handshake_duration (adjusted for relay
/// hops)"). Not itself a configured setting — a relay hop adds one more
/// real round trip underneath the virtual socket, so its budget scales
/// with the number of hops.
const RELAY_HANDSHAKE_MULTIPLIER: u32 = 3;

/// How often a pool's primary thread re-sweeps its peers.
const PRIMARY_SWEEP_INTERVAL: Duration = Duration::from_millis(20);

fn deteriorate_for(impact: ReputationImpact) -> i32 {
    match impact {
        ReputationImpact::None | ReputationImpact::Minimal => {
            if impact == ReputationImpact::Minimal {
                DETERIORATE_MINIMAL
            } else {
                0
            }
        }
        ReputationImpact::Moderate => DETERIORATE_MODERATE,
        ReputationImpact::Severe => DETERIORATE_SEVERE,
    }
}

fn encode_relay_port_payload(port: RelayPort, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&port.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_relay_port_payload(data: &[u8]) -> Option<(RelayPort, &[u8])> {
    if data.len() < 8 {
        return None;
    }
    let port = u64::from_le_bytes(data[0..8].try_into().ok()?);
    Some((port, &data[8..]))
}

fn encode_relay_create(target: SocketAddr, hops: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(23);
    match target {
        SocketAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_le_bytes());
        }
        SocketAddr::V6(v6) => {
            out.push(6);
            out.extend_from_slice(&v6.ip().octets());
            out.extend_from_slice(&v6.port().to_le_bytes());
        }
    }
    out.extend_from_slice(&hops.to_le_bytes());
    out
}

fn decode_relay_create(data: &[u8]) -> Option<(SocketAddr, u32)> {
    match data.first()? {
        4 => {
            if data.len() < 1 + 4 + 2 + 4 {
                return None;
            }
            let ip = Ipv4Addr::new(data[1], data[2], data[3], data[4]);
            let port = u16::from_le_bytes([data[5], data[6]]);
            let hops = u32::from_le_bytes(data[7..11].try_into().ok()?);
            Some((SocketAddr::V4(SocketAddrV4::new(ip, port)), hops))
        }
        6 => {
            if data.len() < 1 + 16 + 2 + 4 {
                return None;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[1..17]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_le_bytes([data[17], data[18]]);
            let hops = u32::from_le_bytes(data[19..23].try_into().ok()?);
            Some((SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)), hops))
        }
        _ => None,
    }
}

/// One application-level message delivered out of the scheduler to whatever
/// owns the [`PeerManager`] (§4.9's `ProcessEvents` receive path, filtered
/// to the kinds an extender actually consumes).
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Which peer this arrived from.
    pub luid: Luid,
    /// The peer's authenticated UUID, once known.
    pub peer_uuid: Option<PeerUuid>,
    /// The inner message kind (`ExtenderCommunication` or `ExtenderUpdate`).
    pub kind: MessageKind,
    /// Extender this message is addressed to/from, if any.
    pub extender_uuid: Option<PeerUuid>,
    /// Reassembled payload.
    pub data: Vec<u8>,
}

/// Bundles the access-plane primitives behind the single `AccessUpdateFlag`
/// the scheduler propagates (§4.11, §5).
pub struct AccessPlane {
    /// CIDR allow/block rules.
    pub filter: IpFilter,
    /// Per-subnet admission caps.
    pub subnet_limits: SubnetLimits,
    /// Per-IP reputation scores.
    pub reputation: ReputationTable,
    /// Per-IP connection-attempt rate limiting.
    pub attempts: AttemptLimiter,
    update_flag: AtomicU64,
}

impl AccessPlane {
    /// Construct from the component primitives.
    #[must_use]
    pub fn new(filter: IpFilter, subnet_limits: SubnetLimits, reputation: ReputationTable, attempts: AttemptLimiter) -> Self {
        Self { filter, subnet_limits, reputation, attempts, update_flag: AtomicU64::new(0) }
    }

    /// Build from [`Settings`] with an empty filter and no subnet caps; the
    /// caller installs [`FilterRule`](crate::access::FilterRule)s and depth
    /// caps afterwards and calls [`Self::notify_changed`].
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            IpFilter::new(),
            SubnetLimits::new(Vec::new(), Vec::new()),
            ReputationTable::new(Duration::from_secs(settings.local.ip_reputation_improvement_interval_secs)),
            AttemptLimiter::new(
                settings.local.ip_connection_attempts.max_per_interval,
                Duration::from_secs(settings.local.ip_connection_attempts.interval_secs),
            ),
        )
    }

    /// Bump `AccessUpdateFlag` (§5): call after modifying the filter, a
    /// subnet cap, or revoking a peer's access, so every pool re-checks its
    /// peers on its next sweep.
    pub fn notify_changed(&self) {
        self.update_flag.fetch_add(1, Ordering::Release);
    }

    fn current(&self) -> u64 {
        self.update_flag.load(Ordering::Acquire)
    }

    /// Whether `ip` may connect right now (filter + reputation threshold;
    /// subnet admission and the attempt counter have their own call sites
    /// because they carry side effects).
    #[must_use]
    pub fn ip_allowed(&self, ip: IpAddr) -> bool {
        self.filter.is_allowed(ip) && self.reputation.is_acceptable(ip)
    }
}

struct PoolShared {
    peers: RwLock<HashMap<Luid, Arc<RwLock<Peer>>>>,
    queue: SegQueue<Luid>,
    last_observed_access_update: AtomicU64,
}

impl PoolShared {
    fn new() -> Self {
        Self { peers: RwLock::new(HashMap::new()), queue: SegQueue::new(), last_observed_access_update: AtomicU64::new(0) }
    }

    fn len(&self) -> usize {
        self.peers.read().len()
    }
}

/// Everything the primary/worker threads need, independent of the
/// [`PeerManager`] handle itself (so a worker processing a `RelayCreate`
/// can open a brand-new outbound peer and insert it exactly the way
/// [`PeerManager::connect`] does).
struct ManagerShared {
    settings: Settings,
    identity: SigningKey,
    local_extenders: RwLock<Vec<PeerUuid>>,
    all_peers: DashMap<Luid, Arc<RwLock<Peer>>>,
    lookup: LookupMaps,
    access: AccessPlane,
    relay: RelayTable,
    pools: Vec<Arc<PoolShared>>,
    delivered_tx: Sender<DeliveredMessage>,
    shutdown: Arc<AtomicBool>,
}

impl ManagerShared {
    fn pool_with_min_peers(&self) -> &Arc<PoolShared> {
        self.pools.iter().min_by_key(|p| p.len()).expect("at least one pool")
    }

    fn insert_peer(&self, luid: Luid, endpoint: Option<SocketAddr>, peer: Peer) -> Arc<RwLock<Peer>> {
        let handle = Arc::new(RwLock::new(peer));
        self.all_peers.insert(luid, Arc::clone(&handle));
        self.lookup.insert(luid, endpoint, Arc::clone(&handle));
        self.pool_with_min_peers().peers.write().insert(luid, Arc::clone(&handle));
        handle
    }

    fn remove_peer(&self, luid: Luid) {
        self.all_peers.remove(&luid);
        self.lookup.remove(luid);
        for pool in &self.pools {
            pool.peers.write().remove(&luid);
        }
        for (port, far) in self.relay.remove_peer(luid) {
            if let Some(far_peer) = self.all_peers.get(&far) {
                far_peer
                    .write()
                    .enqueue_application_message(MessageKind::RelayStatus, None, &encode_relay_port_payload(port, b"closed"))
                    .ok();
            }
        }
    }

    /// Open a fresh outbound peer session to `endpoint` and admit it into
    /// the pool with the current minimum peer count (§4.9: "a new peer is
    /// assigned to the pool with the current minimum peer count").
    ///
    /// # Errors
    /// Returns [`PeerError::Socket`] if the local outbound socket cannot be
    /// created or a connect attempt cannot be started.
    fn open_outbound(&self, endpoint: SocketAddr) -> Result<Luid, PeerError> {
        let mut tcp = TcpSocket::new_outbound(endpoint).map_err(|e| PeerError::Socket(e.to_string().into()))?;
        tcp.begin_connect(endpoint).map_err(|e| PeerError::Socket(e.to_string().into()))?;
        let socket = AnySocket::Tcp(tcp);
        let extenders = self.local_extenders.read().clone();
        let peer = Peer::new_outbound(endpoint, socket, self.settings.clone(), self.identity.clone(), extenders);
        let luid = peer.luid();
        self.insert_peer(luid, Some(endpoint), peer);
        Ok(luid)
    }

    fn deliver_relay_kind(&self, luid: Luid, kind: MessageKind, data: Vec<u8>) {
        match kind {
            MessageKind::RelayCreate => self.handle_relay_create(luid, &data),
            MessageKind::RelayData => self.forward_relay(luid, kind, &data),
            MessageKind::RelayDataAck => self.forward_relay(luid, kind, &data),
            MessageKind::RelayStatus => self.forward_relay(luid, kind, &data),
            _ => {}
        }
    }

    fn handle_relay_create(&self, near: Luid, data: &[u8]) {
        let Some((target, hops)) = decode_relay_create(data) else {
            warn!("malformed RelayCreate from {:?}", near);
            return;
        };

        let far_luid = if hops > 1 {
            let intermediate = self.lookup.get_random_peer(&[near], &[], &[]);
            match intermediate {
                Some(peer) => {
                    let luid = peer.read().luid();
                    peer.write()
                        .enqueue_application_message(
                            MessageKind::RelayCreate,
                            None,
                            &encode_relay_create(target, hops - 1),
                        )
                        .ok();
                    Some(luid)
                }
                None => None,
            }
        } else {
            self.open_outbound(target).ok()
        };

        let Some(far) = far_luid else {
            if let Some(near_peer) = self.all_peers.get(&near) {
                near_peer.write().enqueue_application_message(MessageKind::RelayStatus, None, b"unreachable").ok();
            }
            return;
        };

        let port = self.relay.create_link(near, far, hops.saturating_sub(1));
        if let Some(near_peer) = self.all_peers.get(&near) {
            near_peer
                .write()
                .enqueue_application_message(MessageKind::RelayStatus, None, &encode_relay_port_payload(port, b"open"))
                .ok();
        }
    }

    fn forward_relay(&self, from: Luid, kind: MessageKind, data: &[u8]) {
        let Some((port, payload)) = decode_relay_port_payload(data) else {
            warn!("malformed relay frame ({:?}) from {:?}", kind, from);
            return;
        };
        let Some(far) = self.relay.other_half(port, from) else {
            trace!("relay frame for unknown port {port}");
            return;
        };
        if kind == MessageKind::RelayData {
            self.relay.decrement_hop(port);
        }
        if let Some(far_peer) = self.all_peers.get(&far) {
            if far_peer.write().enqueue_application_message(kind, None, &encode_relay_port_payload(port, payload)).is_err() {
                trace!("relay forward on port {port} deferred: send window full");
            }
        }
    }
}

/// Owns every peer session, partitioned across `N` thread pools (§4.9), the
/// lookup indices, the access plane, and the relay table. `N = max(1,
/// Settings.local.concurrency.min_thread_pools)` pools, each with one
/// primary thread and `max(1, min_threads_per_pool - 1)` worker threads.
pub struct PeerManager {
    shared: Arc<ManagerShared>,
    delivered_rx: Receiver<DeliveredMessage>,
    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl PeerManager {
    /// Construct a manager and start its thread pools.
    #[must_use]
    pub fn new(settings: Settings, identity: SigningKey, local_extenders: Vec<PeerUuid>) -> Self {
        let access = AccessPlane::from_settings(&settings);
        Self::with_access(settings, identity, local_extenders, access)
    }

    /// Construct with a caller-supplied [`AccessPlane`] (e.g. pre-populated
    /// with IP filter rules and subnet caps before the first connection
    /// attempt arrives).
    #[must_use]
    pub fn with_access(settings: Settings, identity: SigningKey, local_extenders: Vec<PeerUuid>, access: AccessPlane) -> Self {
        let num_pools = settings.local.concurrency.min_thread_pools.max(1);
        let workers_per_pool = settings.local.concurrency.min_threads_per_pool.max(1);
        let (delivered_tx, delivered_rx) = unbounded();
        let pools: Vec<Arc<PoolShared>> = (0..num_pools).map(|_| Arc::new(PoolShared::new())).collect();

        let shared = Arc::new(ManagerShared {
            settings,
            identity,
            local_extenders: RwLock::new(local_extenders),
            all_peers: DashMap::new(),
            lookup: LookupMaps::new(),
            access,
            relay: RelayTable::new(),
            pools,
            delivered_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        let mut handles = Vec::with_capacity(num_pools * workers_per_pool);
        for (pool_idx, pool) in shared.pools.iter().enumerate() {
            handles.push(spawn_primary(pool_idx, Arc::clone(pool), Arc::clone(&shared)));
            for worker_idx in 0..workers_per_pool.saturating_sub(1).max(1) {
                handles.push(spawn_worker(pool_idx, worker_idx, Arc::clone(pool), Arc::clone(&shared)));
            }
        }

        debug!(pools = num_pools, workers_per_pool, "peer manager started");
        Self { shared, delivered_rx, handles: RwLock::new(handles) }
    }

    /// Open an outbound connection to `endpoint` and admit it (§4.9).
    ///
    /// # Errors
    /// Propagates [`PeerError::Socket`] if the local socket could not be
    /// created or a connect attempt could not be started.
    pub fn connect(&self, endpoint: SocketAddr) -> Result<Luid, PeerError> {
        self.shared.open_outbound(endpoint)
    }

    /// Admit an already-connected inbound socket, running it through the
    /// access plane first (§4.11): IP filter, connection-attempt rate
    /// limit, subnet admission caps, and reputation threshold.
    ///
    /// # Errors
    /// Returns the first access-plane check that rejects `endpoint`'s IP.
    pub fn admit_inbound(&self, socket: AnySocket, endpoint: SocketAddr) -> Result<Luid, PeerError> {
        let ip = endpoint.ip();
        if !self.shared.access.ip_allowed(ip) {
            return Err(PeerError::IpNotAllowed);
        }
        self.shared.access.attempts.record_attempt(ip)?;
        self.shared.access.subnet_limits.admit(ip)?;

        let extenders = self.shared.local_extenders.read().clone();
        let peer = Peer::new_inbound(endpoint, socket, self.shared.settings.clone(), self.shared.identity.clone(), extenders);
        let luid = peer.luid();
        self.shared.insert_peer(luid, Some(endpoint), peer);
        Ok(luid)
    }

    /// Replace the locally-enabled extender set; every currently-connected
    /// peer is flagged for an `ExtenderUpdate` announcement on its next
    /// `ProcessEvents` pass.
    pub fn set_local_extenders(&self, extenders: Vec<PeerUuid>) {
        *self.shared.local_extenders.write() = extenders.clone();
        for entry in self.shared.all_peers.iter() {
            entry.value().write().set_local_extenders(extenders.clone());
        }
    }

    /// The access plane, for installing filter rules or subnet caps and
    /// calling [`AccessPlane::notify_changed`] afterwards.
    #[must_use]
    pub fn access(&self) -> &AccessPlane {
        &self.shared.access
    }

    /// The lookup indices, for `QueryPeers`/`GetPeerByEndpoint`/
    /// `GetRandomPeer` (§4.10).
    #[must_use]
    pub fn lookup(&self) -> &LookupMaps {
        &self.shared.lookup
    }

    /// Filtered peer query (§4.10), convenience wrapper over
    /// [`LookupMaps::query_peers`].
    #[must_use]
    pub fn query_peers(&self, params: &QueryParams) -> Vec<Arc<RwLock<Peer>>> {
        self.shared.lookup.query_peers(params)
    }

    /// Receiver for application-level messages delivered from any peer
    /// (§4.9's `ProcessEvents` receive path).
    #[must_use]
    pub fn delivered(&self) -> &Receiver<DeliveredMessage> {
        &self.delivered_rx
    }

    /// Total peers currently tracked across every pool.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.shared.all_peers.len()
    }

    /// Graceful shutdown (§5): cancel all pools, then disconnect every
    /// remaining peer with `graceful=false` and drop it from every index.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.handles.write().drain(..) {
            let _ = handle.join();
        }
        let luids: Vec<Luid> = self.shared.all_peers.iter().map(|e| *e.key()).collect();
        for luid in luids {
            if let Some(peer) = self.shared.all_peers.get(&luid) {
                peer.write().disconnect(DisconnectCondition::DisconnectRequest, false);
            }
            self.shared.remove_peer(luid);
        }
        debug!("peer manager shut down");
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

fn spawn_primary(pool_idx: usize, pool: Arc<PoolShared>, shared: Arc<ManagerShared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("quantumgate-pool{pool_idx}-primary"))
        .spawn(move || {
            while !shared.shutdown.load(Ordering::Acquire) {
                let access_flag = shared.access.current();
                let last = pool.last_observed_access_update.swap(access_flag, Ordering::AcqRel);
                if access_flag != last {
                    for entry in pool.peers.read().values() {
                        entry.write().mark_needs_access_check();
                    }
                }

                let luids: Vec<Luid> = pool.peers.read().keys().copied().collect();
                let mut to_remove = Vec::new();
                for luid in luids {
                    let Some(peer_arc) = pool.peers.read().get(&luid).cloned() else { continue };
                    let mut peer = peer_arc.write();
                    if peer.in_queue() {
                        continue;
                    }

                    let multiplier = if peer.is_relay() { RELAY_HANDSHAKE_MULTIPLIER } else { 1 };
                    if let Err(e) = peer.check_status(multiplier) {
                        if let Some(ip) = peer.endpoint().map(|a| a.ip()) {
                            shared.access.reputation.adjust(ip, deteriorate_for(e.reputation_impact()));
                        }
                        peer.fail(e.disconnect_condition());
                    }

                    if peer.should_disconnect() {
                        let condition = peer.disconnect_condition();
                        peer.disconnect(condition, false);
                        to_remove.push(luid);
                        continue;
                    }

                    if peer.has_pending_events() && peer.try_enter_queue() {
                        drop(peer);
                        pool.queue.push(luid);
                    }
                }

                for luid in to_remove {
                    pool.peers.write().remove(&luid);
                    shared.remove_peer(luid);
                }

                thread::sleep(PRIMARY_SWEEP_INTERVAL);
            }
        })
        .expect("failed to spawn primary thread")
}

fn spawn_worker(pool_idx: usize, worker_idx: usize, pool: Arc<PoolShared>, shared: Arc<ManagerShared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("quantumgate-pool{pool_idx}-worker{worker_idx}"))
        .spawn(move || {
            let idle_sleep = Duration::from_millis(shared.settings.local.concurrency.worker_threads_max_sleep_ms);
            let burst = shared.settings.local.concurrency.worker_threads_max_burst;

            while !shared.shutdown.load(Ordering::Acquire) {
                let Some(luid) = pool.queue.pop() else {
                    thread::sleep(idle_sleep);
                    continue;
                };
                let Some(peer_arc) = pool.peers.read().get(&luid).cloned() else { continue };

                let mut delivered_app_messages;
                {
                    let mut peer = peer_arc.write();
                    peer.leave_queue();
                    match peer.process_events(burst) {
                        Ok(delivered) => delivered_app_messages = delivered,
                        Err(e) => {
                            if let Some(ip) = peer.endpoint().map(|a| a.ip()) {
                                shared.access.reputation.adjust(ip, deteriorate_for(e.reputation_impact()));
                            }
                            peer.fail(e.disconnect_condition());
                            delivered_app_messages = Vec::new();
                        }
                    }
                    // §4.13: pull anything a full rate window previously deferred
                    // now that this pass is about to consume (and release budget
                    // for) a fresh batch.
                    delivered_app_messages.extend(peer.drain_deferred_receive());

                    // Once authentication resolves the peer's UUID, the lookup
                    // index's UUID map needs to learn it too (§4.10).
                    if let Some(uuid) = peer.peer_uuid() {
                        shared.lookup.update_uuid(luid, uuid);
                    }
                }

                for (kind, extender_uuid, data) in delivered_app_messages {
                    let consumed_len = data.len();
                    match kind {
                        MessageKind::RelayCreate
                        | MessageKind::RelayData
                        | MessageKind::RelayDataAck
                        | MessageKind::RelayStatus => {
                            shared.deliver_relay_kind(luid, kind, data);
                        }
                        _ => {
                            let peer_uuid = peer_arc.read().peer_uuid();
                            let _ = shared.delivered_tx.send(DeliveredMessage { luid, peer_uuid, kind, extender_uuid, data });
                        }
                    }
                    peer_arc.write().release_receive_budget(kind, consumed_len);
                }

                let mut peer = peer_arc.write();
                if peer.has_pending_events() && peer.try_enter_queue() {
                    drop(peer);
                    pool.queue.push(luid);
                }
            }
        })
        .expect("failed to spawn worker thread")
}
