//! The peer session state machine (§3, §4.1): advances an accepted or
//! outbound socket from "just connected" to "ready for application
//! traffic," and owns everything that feeds that advancement — the key
//! exchange driver, the symmetric key set, the send/receive queues, the
//! noise queue, and the fragment reassembler.
//!
//! One struct owns its socket and crypto state; a status enum enforces
//! monotone transitions through a single `transition` chokepoint. The
//! handshake itself follows §4.1-§4.8: meta-exchange, two key-exchange
//! legs, authentication, session init, then free-form framed traffic.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand_core::{OsRng, RngCore};

use quantumgate_crypto::aead::{AeadCipher, AeadKey};
use quantumgate_crypto::hash::{hash, hkdf_expand};
use quantumgate_crypto::signatures::{Signature, SigningKey, VerifyingKey};
use quantumgate_transport::{AnySocket, Socket};

use crate::config::Settings;
use crate::error::{DisconnectCondition, PeerError};
use crate::frame;
use crate::keyexchange::{AlgorithmSelection, AsymmetricAlgorithm, KeyExchange, Role};
use crate::keys::{SymmetricKeyPair, SymmetricKeySet};
use crate::message::{fragment, FragmentKind, InnerMessage, MessageKind, MAX_INNER_DATA, Reassembler};
use crate::noise::NoiseQueue;
use crate::ratelimit::{RateLimitKind, RateLimitSet};
use crate::uuid::{PeerUuid, UuidType};

/// Practical ceiling on a single frame's plaintext payload; distinct from
/// [`frame::MAX_FRAME_DATA_SIZE`], which bounds the ciphertext a forged
/// header may claim.
const DEFAULT_MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// A locally unique peer-session id, derived from the endpoint string
/// (§3: "not portable across processes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Luid(u64);

impl Luid {
    /// Derive a LUID from an endpoint's string representation.
    #[must_use]
    pub fn from_endpoint(endpoint: &str) -> Self {
        let digest = hash(endpoint.as_bytes());
        Self(u64::from_le_bytes(digest[0..8].try_into().unwrap()))
    }

    /// The raw 64-bit value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Which side opened the underlying socket (§3). The inbound side plays
/// Alice in the key exchange; the outbound side plays Bob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Accepted from a listener.
    Inbound,
    /// Opened by this node.
    Outbound,
}

impl ConnectionType {
    /// The key-exchange role this connection type always plays.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            ConnectionType::Inbound => Role::Alice,
            ConnectionType::Outbound => Role::Bob,
        }
    }
}

/// The peer session's lifecycle state (§3, §4.1). Monotone up to `Ready`
/// except `Disconnected`, which absorbs from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not yet initialized.
    Unknown,
    /// Created, not yet connecting or accepted.
    Initialized,
    /// Outbound connect attempt in progress.
    Connecting,
    /// Inbound socket accepted, not yet confirmed connected.
    Accepted,
    /// Socket is connected; handshake not yet started.
    Connected,
    /// Negotiating algorithm preferences.
    MetaExchange,
    /// Running the primary (DH-style) key exchange leg.
    PrimaryKeyExchange,
    /// Running the secondary (KEM-style) key exchange leg.
    SecondaryKeyExchange,
    /// Exchanging identity signatures.
    Authentication,
    /// Exchanging starting counters, observed endpoint, and extender sets.
    SessionInit,
    /// Handshake complete; free-form application traffic permitted.
    Ready,
    /// Temporarily parked (e.g. awaiting an access-plane decision).
    Suspended,
    /// Terminal. Absorbing.
    Disconnected,
}

impl Status {
    fn permits(self, next: Status) -> bool {
        use Status::*;
        if next == Disconnected {
            return self != Disconnected;
        }
        matches!(
            (self, next),
            (Unknown, Initialized)
                | (Initialized, Connecting)
                | (Initialized, Accepted)
                | (Connecting, Connected)
                | (Accepted, Connected)
                | (Connected, MetaExchange)
                | (MetaExchange, PrimaryKeyExchange)
                | (PrimaryKeyExchange, SecondaryKeyExchange)
                | (SecondaryKeyExchange, Authentication)
                | (Authentication, SessionInit)
                | (SessionInit, Ready)
                | (Ready, Suspended)
                | (Suspended, Ready)
        )
    }
}

/// Bitset of per-peer scheduling/behavior flags (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// Peer is currently enqueued on a worker pool's work queue.
    pub const IN_QUEUE: Flags = Flags(1 << 0);
    /// Re-enqueue immediately after this worker pass instead of waiting for
    /// the next primary sweep.
    pub const FAST_REQUEUE: Flags = Flags(1 << 1);
    /// The access plane has not yet cleared this peer's IP/UUID.
    pub const NEEDS_ACCESS_CHECK: Flags = Flags(1 << 2);
    /// Set once `Ready` is reached: the send path may concatenate multiple
    /// inner messages into one frame.
    pub const CONCATENATE_MESSAGES: Flags = Flags(1 << 3);
    /// The inbound side is still waiting out its randomized
    /// `MaxHandshakeDelay` before sending its first byte.
    pub const HANDSHAKE_START_DELAY: Flags = Flags(1 << 4);
    /// Outbound sends are temporarily suppressed.
    pub const SEND_DISABLED: Flags = Flags(1 << 5);
    /// The locally-enabled extender set changed since the last
    /// `ExtenderUpdate` was sent.
    pub const NEEDS_EXTENDER_UPDATE: Flags = Flags(1 << 6);

    /// Whether `flag` is set.
    #[must_use]
    pub fn contains(self, flag: Flags) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Set `flag`.
    pub fn insert(&mut self, flag: Flags) {
        self.0 |= flag.0;
    }

    /// Clear `flag`.
    pub fn remove(&mut self, flag: Flags) {
        self.0 &= !flag.0;
    }
}

/// Key-update sub-protocol state (§4.5), layered on top of an already-Ready
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUpdateState {
    /// No update in progress.
    Unknown,
    /// Waiting for the next randomized interval or byte threshold.
    UpdateWait,
    /// Running the primary leg of the update.
    PrimaryExchange,
    /// Running the secondary leg of the update.
    SecondaryExchange,
    /// Update applied; waiting to cycle back to `UpdateWait`.
    ReadyWait,
}

struct KeyUpdate {
    state: KeyUpdateState,
    exchange: Option<KeyExchange>,
    initiated_at: Option<Instant>,
    next_due: Instant,
}

impl KeyUpdate {
    fn new(settings: &crate::config::KeyUpdateSettings) -> Self {
        Self {
            state: KeyUpdateState::UpdateWait,
            exchange: None,
            initiated_at: None,
            next_due: Instant::now() + Self::random_interval(settings),
        }
    }

    fn random_interval(settings: &crate::config::KeyUpdateSettings) -> Duration {
        let secs = rand::thread_rng().gen_range(settings.min_interval_secs..=settings.max_interval_secs);
        Duration::from_secs(secs)
    }
}

/// Negotiated algorithm choice for one connection, resolved during
/// `MetaExchange` (§4.2).
#[derive(Debug, Clone, Copy)]
struct NegotiatedAlgorithms {
    primary: AsymmetricAlgorithm,
    secondary: AsymmetricAlgorithm,
}

fn algorithm_from_name(name: &str) -> Option<AsymmetricAlgorithm> {
    match name {
        "X25519" => Some(AsymmetricAlgorithm::X25519),
        "ML-KEM-768" => Some(AsymmetricAlgorithm::MlKem768),
        _ => None,
    }
}

fn algorithm_to_name(algo: AsymmetricAlgorithm) -> &'static str {
    match algo {
        AsymmetricAlgorithm::X25519 => "X25519",
        AsymmetricAlgorithm::MlKem768 => "ML-KEM-768",
    }
}

fn encode_string_vec(values: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + values.iter().map(|s| 1 + s.len()).sum::<usize>());
    out.push(values.len() as u8);
    for value in values {
        let bytes = value.as_bytes();
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
    out
}

fn decode_string_vec(buf: &[u8]) -> Result<(Vec<String>, usize), PeerError> {
    if buf.is_empty() {
        return Err(PeerError::Recoverable("empty preference vector".into()));
    }
    let count = buf[0] as usize;
    let mut offset = 1;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if offset >= buf.len() {
            return Err(PeerError::Recoverable("truncated preference vector".into()));
        }
        let len = buf[offset] as usize;
        offset += 1;
        if buf.len() < offset + len {
            return Err(PeerError::Recoverable("truncated preference entry".into()));
        }
        let s = String::from_utf8(buf[offset..offset + len].to_vec())
            .map_err(|_| PeerError::Recoverable("non-utf8 preference entry".into()))?;
        out.push(s);
        offset += len;
    }
    Ok((out, offset))
}

/// The five preference vectors exchanged during meta-exchange (§4.2, §6).
#[derive(Debug, Clone)]
struct AlgorithmPreferences {
    hash: Vec<String>,
    primary_asymmetric: Vec<String>,
    secondary_asymmetric: Vec<String>,
    symmetric: Vec<String>,
    compression: Vec<String>,
}

impl AlgorithmPreferences {
    fn from_settings(algos: &crate::config::SupportedAlgorithms) -> Self {
        Self {
            hash: algos.hash.clone(),
            primary_asymmetric: algos.primary_asymmetric.clone(),
            secondary_asymmetric: algos.secondary_asymmetric.clone(),
            symmetric: algos.symmetric.clone(),
            compression: algos.compression.clone(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(encode_string_vec(&self.hash));
        out.extend(encode_string_vec(&self.primary_asymmetric));
        out.extend(encode_string_vec(&self.secondary_asymmetric));
        out.extend(encode_string_vec(&self.symmetric));
        out.extend(encode_string_vec(&self.compression));
        out
    }

    fn decode(buf: &[u8]) -> Result<Self, PeerError> {
        let mut offset = 0;
        let (hash, n) = decode_string_vec(&buf[offset..])?;
        offset += n;
        let (primary_asymmetric, n) = decode_string_vec(&buf[offset..])?;
        offset += n;
        let (secondary_asymmetric, n) = decode_string_vec(&buf[offset..])?;
        offset += n;
        let (symmetric, n) = decode_string_vec(&buf[offset..])?;
        offset += n;
        let (compression, _) = decode_string_vec(&buf[offset..])?;
        Ok(Self { hash, primary_asymmetric, secondary_asymmetric, symmetric, compression })
    }

    fn negotiate(inbound: &Self, outbound: &Self) -> Result<NegotiatedAlgorithms, PeerError> {
        let primary_name = AlgorithmSelection::negotiate(
            &inbound.primary_asymmetric.iter().collect::<Vec<_>>(),
            &outbound.primary_asymmetric.iter().collect::<Vec<_>>(),
        )
        .ok_or_else(|| PeerError::InvalidConfig("no common primary algorithm".into()))?;
        let secondary_name = AlgorithmSelection::negotiate(
            &inbound.secondary_asymmetric.iter().collect::<Vec<_>>(),
            &outbound.secondary_asymmetric.iter().collect::<Vec<_>>(),
        )
        .ok_or_else(|| PeerError::InvalidConfig("no common secondary algorithm".into()))?;
        let primary = algorithm_from_name(primary_name)
            .ok_or_else(|| PeerError::InvalidConfig("unknown primary algorithm".into()))?;
        let secondary = algorithm_from_name(secondary_name)
            .ok_or_else(|| PeerError::InvalidConfig("unknown secondary algorithm".into()))?;
        Ok(NegotiatedAlgorithms { primary, secondary })
    }
}

fn encode_session_init(local_counter: u8, observed_endpoint: Option<SocketAddr>, extenders: &[PeerUuid]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(local_counter);
    let endpoint_str = observed_endpoint.map_or_else(String::new, |e| e.to_string());
    out.push(endpoint_str.len() as u8);
    out.extend_from_slice(endpoint_str.as_bytes());
    out.push(extenders.len() as u8);
    for uuid in extenders {
        out.extend_from_slice(&uuid.to_bytes());
    }
    out
}

struct SessionInitPayload {
    counter: u8,
    observed_endpoint: Option<SocketAddr>,
    extenders: Vec<PeerUuid>,
}

fn decode_session_init(buf: &[u8]) -> Result<SessionInitPayload, PeerError> {
    if buf.is_empty() {
        return Err(PeerError::Recoverable("empty session init payload".into()));
    }
    let counter = buf[0];
    let mut offset = 1;
    if offset >= buf.len() {
        return Err(PeerError::Recoverable("truncated session init payload".into()));
    }
    let endpoint_len = buf[offset] as usize;
    offset += 1;
    if buf.len() < offset + endpoint_len {
        return Err(PeerError::Recoverable("truncated endpoint string".into()));
    }
    let endpoint_str = String::from_utf8(buf[offset..offset + endpoint_len].to_vec())
        .map_err(|_| PeerError::Recoverable("non-utf8 endpoint string".into()))?;
    offset += endpoint_len;
    let observed_endpoint = if endpoint_str.is_empty() { None } else { endpoint_str.parse().ok() };

    if offset >= buf.len() {
        return Err(PeerError::Recoverable("truncated extender count".into()));
    }
    let extender_count = buf[offset] as usize;
    offset += 1;
    let mut extenders = Vec::with_capacity(extender_count);
    for _ in 0..extender_count {
        if buf.len() < offset + 16 {
            return Err(PeerError::Recoverable("truncated extender uuid".into()));
        }
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&buf[offset..offset + 16]);
        offset += 16;
        let uuid = PeerUuid::from_bytes(raw).ok_or_else(|| PeerError::FragmentError("bad extender uuid".into()))?;
        if uuid.uuid_type() != UuidType::Extender {
            return Err(PeerError::UnexpectedMessage {
                kind: "session-init-extender".into(),
                state: "not-an-extender-uuid".into(),
            });
        }
        extenders.push(uuid);
    }
    Ok(SessionInitPayload { counter, observed_endpoint, extenders })
}

fn encode_authentication(verifying_key: &VerifyingKey, signature: &Signature) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 64);
    out.extend_from_slice(&verifying_key.to_bytes());
    out.extend_from_slice(signature.as_bytes());
    out
}

fn derive_auto_generated_key(nonce_seed: u32) -> AeadKey {
    let mut out = [0u8; 32];
    hkdf_expand(&hash(b"quantumgate-auto-generated-key"), &nonce_seed.to_le_bytes(), &mut out);
    AeadKey::from_bytes(out)
}

/// A single peer session (§3): owns its socket, symmetric key set, at most
/// one active key-exchange driver, the key-update machine, send/receive
/// queues, the noise queue, and one fragment-reassembly slot per direction.
pub struct Peer {
    luid: Luid,
    peer_uuid: Option<PeerUuid>,
    local_session_id: u64,
    peer_session_id: Option<u64>,
    status: Status,
    connection_type: ConnectionType,
    is_relay: bool,
    flags: Flags,
    local_counter: Option<u8>,
    peer_counter: Option<u8>,
    bytes_sent: u64,
    bytes_received: u64,
    disconnect_condition: DisconnectCondition,

    socket: AnySocket,
    settings: Settings,
    identity: SigningKey,
    local_extenders: Vec<PeerUuid>,
    peer_extenders: Vec<PeerUuid>,
    reported_public_endpoint: Option<SocketAddr>,

    keys: SymmetricKeySet,
    key_exchange: Option<KeyExchange>,
    negotiated: Option<NegotiatedAlgorithms>,
    inbound_preferences: Option<AlgorithmPreferences>,
    key_update: KeyUpdate,

    noise: NoiseQueue,
    send_queue: VecDeque<InnerMessage>,
    reassembler: Reassembler,
    recv_buffer: Vec<u8>,
    pending_prefix_skip: u16,
    next_outbound_prefix_len: u16,

    rate_limits: RateLimitSet,
    deferred_receive: VecDeque<(MessageKind, Option<PeerUuid>, Vec<u8>)>,

    connect_started_at: Option<Instant>,
    handshake_started_at: Option<Instant>,
}

impl Peer {
    fn new(
        endpoint: SocketAddr,
        socket: AnySocket,
        connection_type: ConnectionType,
        settings: Settings,
        identity: SigningKey,
        local_extenders: Vec<PeerUuid>,
    ) -> Self {
        let is_relay = socket.is_relay();
        let key_update_settings = settings.local.key_update.clone();
        let noise = NoiseQueue::new(settings.noise.clone(), Duration::from_millis(settings.local.max_handshake_delay_ms));
        Self {
            luid: Luid::from_endpoint(&endpoint.to_string()),
            peer_uuid: None,
            local_session_id: OsRng.next_u64(),
            peer_session_id: None,
            status: Status::Initialized,
            connection_type,
            is_relay,
            flags: Flags::default(),
            local_counter: None,
            peer_counter: None,
            bytes_sent: 0,
            bytes_received: 0,
            disconnect_condition: DisconnectCondition::None,
            socket,
            settings,
            identity,
            local_extenders,
            peer_extenders: Vec::new(),
            reported_public_endpoint: None,
            keys: SymmetricKeySet::new(),
            key_exchange: None,
            negotiated: None,
            inbound_preferences: None,
            key_update: KeyUpdate::new(&key_update_settings),
            noise,
            send_queue: VecDeque::new(),
            reassembler: Reassembler::new(),
            recv_buffer: Vec::new(),
            pending_prefix_skip: 0,
            next_outbound_prefix_len: 0,
            rate_limits: RateLimitSet::new(),
            deferred_receive: VecDeque::new(),
            connect_started_at: None,
            handshake_started_at: None,
        }
    }

    /// Construct a peer for a socket this node is opening outbound (§3
    /// lifecycle: "created by the peer manager on outbound `Connect`").
    #[must_use]
    pub fn new_outbound(
        endpoint: SocketAddr,
        socket: AnySocket,
        settings: Settings,
        identity: SigningKey,
        local_extenders: Vec<PeerUuid>,
    ) -> Self {
        let mut peer = Self::new(endpoint, socket, ConnectionType::Outbound, settings, identity, local_extenders);
        peer.transition(Status::Connecting).expect("Initialized -> Connecting is always valid");
        peer.connect_started_at = Some(Instant::now());
        peer.prime_with_gss();
        peer
    }

    /// Construct a peer for a socket accepted from a listener.
    #[must_use]
    pub fn new_inbound(
        endpoint: SocketAddr,
        socket: AnySocket,
        settings: Settings,
        identity: SigningKey,
        local_extenders: Vec<PeerUuid>,
    ) -> Self {
        let mut peer = Self::new(endpoint, socket, ConnectionType::Inbound, settings, identity, local_extenders);
        peer.transition(Status::Accepted).expect("Initialized -> Accepted is always valid");
        peer.prime_with_gss();
        peer
    }

    /// Prime the key set from the Global Shared Secret, if configured
    /// (§4.8), so that even the first meta-exchange frame is encrypted
    /// under a real key instead of the auto-generated obfuscation key.
    fn prime_with_gss(&mut self) {
        let Some(gss) = self.settings.local.global_shared_secret.clone() else { return };
        let mut derived = [0u8; 32];
        let prk = quantumgate_crypto::hash::hkdf_extract(b"quantumgate-gss-priming", &gss);
        hkdf_expand(&prk, b"quantumgate-gss-initial-pair", &mut derived);
        self.keys.install(SymmetricKeyPair::bidirectional(AeadKey::from_bytes(derived)));
    }

    /// This session's LUID, assigned once on construction and never
    /// changed (§3).
    #[must_use]
    pub fn luid(&self) -> Luid {
        self.luid
    }

    /// The peer's UUID, once learned during authentication.
    #[must_use]
    pub fn peer_uuid(&self) -> Option<PeerUuid> {
        self.peer_uuid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether this connection was accepted (`Inbound`) or opened locally
    /// (`Outbound`).
    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Whether the underlying socket is a relay-virtual splice.
    #[must_use]
    pub fn is_relay(&self) -> bool {
        self.is_relay
    }

    /// Current flag bits.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Cached bytes sent so far.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Cached bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Why this peer disconnected, if it has.
    #[must_use]
    pub fn disconnect_condition(&self) -> DisconnectCondition {
        self.disconnect_condition
    }

    /// The endpoint this peer reported observing for us at `SessionInit`
    /// (§4.12).
    #[must_use]
    pub fn reported_public_endpoint(&self) -> Option<SocketAddr> {
        self.reported_public_endpoint
    }

    /// Whether a valid peer signature was exchanged during `Authentication`.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.peer_uuid.is_some()
    }

    /// The peer's network endpoint, as our own socket sees it.
    #[must_use]
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Extender UUIDs the remote side reported as locally enabled at
    /// `SessionInit` (§4.2, §6).
    #[must_use]
    pub fn peer_extenders(&self) -> &[PeerUuid] {
        &self.peer_extenders
    }

    fn transition(&mut self, next: Status) -> Result<(), PeerError> {
        if !self.status.permits(next) {
            return Err(PeerError::InvalidStateTransition(
                format!("{:?} -> {:?}", self.status, next).into(),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Mark the socket connected and start the handshake clock. For an
    /// inbound peer this also sends `BeginMetaExchange` immediately (the
    /// inbound side always drives meta-exchange, §4.1).
    pub fn mark_connected(&mut self) -> Result<(), PeerError> {
        self.transition(Status::Connected)?;
        self.handshake_started_at = Some(Instant::now());
        if self.connection_type == ConnectionType::Inbound {
            self.begin_meta_exchange()?;
        }
        Ok(())
    }

    fn begin_meta_exchange(&mut self) -> Result<(), PeerError> {
        self.transition(Status::MetaExchange)?;
        let prefs = AlgorithmPreferences::from_settings(&self.settings.local.supported_algorithms);
        self.inbound_preferences = Some(prefs.clone());
        self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginMetaExchange, prefs.encode()));
        Ok(())
    }

    /// Whether the handshake has exceeded `MaxHandshakeDuration`, adjusted
    /// for relay hops (§4.9, §4.1).
    #[must_use]
    pub fn is_handshake_timed_out(&self, relay_hop_multiplier: u32) -> bool {
        let Some(started) = self.handshake_started_at else { return false };
        if self.status == Status::Ready || self.status == Status::Disconnected {
            return false;
        }
        let limit = self.settings.max_handshake_duration() * relay_hop_multiplier.max(1);
        started.elapsed() > limit
    }

    /// Whether an outbound connect attempt has exceeded
    /// `Local.ConnectTimeout`.
    #[must_use]
    pub fn is_connect_timed_out(&self) -> bool {
        let Some(started) = self.connect_started_at else { return false };
        if self.status != Status::Connecting {
            return false;
        }
        started.elapsed() > Duration::from_secs(self.settings.local.connect_timeout_secs)
    }

    // -- Handshake message dispatch (§4.1, §9: a table keyed by (state, kind)) --

    fn on_handshake_message(&mut self, kind: MessageKind, data: Vec<u8>) -> Result<(), PeerError> {
        match (self.status, self.connection_type, kind) {
            (Status::MetaExchange, ConnectionType::Outbound, MessageKind::BeginMetaExchange) => {
                let peer_prefs = AlgorithmPreferences::decode(&data)?;
                let own = AlgorithmPreferences::from_settings(&self.settings.local.supported_algorithms);
                let negotiated = AlgorithmPreferences::negotiate(&peer_prefs, &own)?;
                self.negotiated = Some(negotiated);
                self.send_queue.push_back(InnerMessage::complete(MessageKind::EndMetaExchange, own.encode()));
                self.transition(Status::PrimaryKeyExchange)?;
                Ok(())
            }
            (Status::Connected, ConnectionType::Outbound, MessageKind::BeginMetaExchange) => {
                // Outbound hasn't yet observed `Connected -> MetaExchange`
                // locally (no local send occurs for that transition); do
                // it now so the table above can match uniformly next time.
                self.transition(Status::MetaExchange)?;
                self.on_handshake_message(kind, data)
            }
            (Status::MetaExchange, ConnectionType::Inbound, MessageKind::EndMetaExchange) => {
                let outbound_offered = AlgorithmPreferences::decode(&data)?;
                let inbound_prefs = self
                    .inbound_preferences
                    .clone()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no local preferences recorded".into()))?;
                let negotiated = AlgorithmPreferences::negotiate(&inbound_prefs, &outbound_offered)?;
                self.negotiated = Some(negotiated);
                self.key_exchange =
                    Some(KeyExchange::new(Role::Alice, negotiated.primary, negotiated.secondary));
                let blob = self.key_exchange.as_ref().unwrap().primary().local_handshake_data()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginPrimaryKeyExchange, blob));
                self.transition(Status::PrimaryKeyExchange)?;
                Ok(())
            }
            (Status::PrimaryKeyExchange, ConnectionType::Outbound, MessageKind::BeginPrimaryKeyExchange) => {
                let negotiated = self
                    .negotiated
                    .ok_or_else(|| PeerError::InvalidStateTransition("algorithms not negotiated".into()))?;
                let mut kex = KeyExchange::new(Role::Bob, negotiated.primary, negotiated.secondary);
                kex.primary_mut().receive_peer_handshake_data(&data)?;
                let shared = kex.primary().shared_secret().expect("just derived").to_vec();
                let gss = self.settings.local.global_shared_secret.as_deref();
                let key = crate::keyexchange::derive_symmetric_key(&shared, gss, b"quantumgate-primary");
                self.keys.install(SymmetricKeyPair::decrypt_only(key));
                let reply = kex.primary().local_handshake_data()?;
                self.key_exchange = Some(kex);
                self.send_queue.push_back(InnerMessage::complete(MessageKind::EndPrimaryKeyExchange, reply));
                self.transition(Status::SecondaryKeyExchange)?;
                Ok(())
            }
            (Status::PrimaryKeyExchange, ConnectionType::Inbound, MessageKind::EndPrimaryKeyExchange) => {
                let kex = self
                    .key_exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key exchange in progress".into()))?;
                kex.primary_mut().receive_peer_handshake_data(&data)?;
                let shared = kex.primary().shared_secret().expect("just derived").to_vec();
                let gss = self.settings.local.global_shared_secret.clone();
                let key = crate::keyexchange::derive_symmetric_key(&shared, gss.as_deref(), b"quantumgate-primary");
                self.keys.install(SymmetricKeyPair::bidirectional(key));
                let blob = kex.secondary().local_handshake_data()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginSecondaryKeyExchange, blob));
                self.transition(Status::SecondaryKeyExchange)?;
                Ok(())
            }
            (Status::SecondaryKeyExchange, ConnectionType::Outbound, MessageKind::BeginSecondaryKeyExchange) => {
                let kex = self
                    .key_exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key exchange in progress".into()))?;
                kex.secondary_mut().receive_peer_handshake_data(&data)?;
                let shared = kex.secondary().shared_secret().expect("just derived").to_vec();
                let gss = self.settings.local.global_shared_secret.clone();
                let key = crate::keyexchange::derive_symmetric_key(&shared, gss.as_deref(), b"quantumgate-secondary");
                self.keys.install(SymmetricKeyPair::decrypt_only(key));
                let reply = kex.secondary().local_handshake_data()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::EndSecondaryKeyExchange, reply));
                // Outbound only ever replies with "End*"; it waits for the
                // inbound side's real BeginAuthentication rather than
                // driving the next phase itself (§4.1).
                self.transition(Status::Authentication)?;
                Ok(())
            }
            (Status::SecondaryKeyExchange, ConnectionType::Inbound, MessageKind::EndSecondaryKeyExchange) => {
                let kex = self
                    .key_exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key exchange in progress".into()))?;
                kex.secondary_mut().receive_peer_handshake_data(&data)?;
                let shared = kex.secondary().shared_secret().expect("just derived").to_vec();
                let gss = self.settings.local.global_shared_secret.clone();
                let key = crate::keyexchange::derive_symmetric_key(&shared, gss.as_deref(), b"quantumgate-secondary");
                self.keys.install(SymmetricKeyPair::bidirectional(key));
                // Inbound drives the next phase's Begin (§4.1).
                self.send_authentication_reply(MessageKind::BeginAuthentication)?;
                self.transition(Status::Authentication)?;
                Ok(())
            }
            (Status::Authentication, ConnectionType::Outbound, MessageKind::BeginAuthentication) => {
                self.verify_authentication(&data)?;
                self.send_authentication_reply(MessageKind::EndAuthentication)?;
                self.transition(Status::SessionInit)?;
                // Wait for inbound's real BeginSessionInit; outbound never
                // drives a Begin* of its own.
                Ok(())
            }
            (Status::Authentication, ConnectionType::Inbound, MessageKind::EndAuthentication) => {
                self.verify_authentication(&data)?;
                self.send_session_init_begin()?;
                self.transition(Status::SessionInit)?;
                Ok(())
            }
            (Status::SessionInit, ConnectionType::Outbound, MessageKind::BeginSessionInit) => {
                let parsed = decode_session_init(&data)?;
                self.peer_counter = Some(parsed.counter);
                self.reported_public_endpoint = parsed.observed_endpoint;
                self.peer_extenders = parsed.extenders;
                self.send_session_init_reply()?;
                self.activate_local_counter();
                self.transition(Status::Ready)?;
                self.flags.insert(Flags::CONCATENATE_MESSAGES);
                self.noise.mark_handshake_complete();
                Ok(())
            }
            (Status::SessionInit, ConnectionType::Inbound, MessageKind::EndSessionInit) => {
                let parsed = decode_session_init(&data)?;
                self.peer_counter = Some(parsed.counter);
                self.reported_public_endpoint = parsed.observed_endpoint;
                self.peer_extenders = parsed.extenders;
                self.activate_local_counter();
                self.transition(Status::Ready)?;
                self.flags.insert(Flags::CONCATENATE_MESSAGES);
                self.noise.mark_handshake_complete();
                Ok(())
            }
            (Status::Ready, _, MessageKind::BeginPrimaryKeyUpdateExchange | MessageKind::EndPrimaryKeyUpdateExchange
            | MessageKind::BeginSecondaryKeyUpdateExchange | MessageKind::EndSecondaryKeyUpdateExchange
            | MessageKind::KeyUpdateReady) => self.on_key_update_message(kind, data),
            (state, _, kind) => Err(PeerError::UnexpectedMessage {
                kind: format!("{kind:?}").into(),
                state: format!("{state:?}").into(),
            }),
        }
    }

    fn send_authentication_reply(&mut self, kind: MessageKind) -> Result<(), PeerError> {
        let kex = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| PeerError::InvalidStateTransition("no key exchange to authenticate".into()))?;
        let transcript = kex.transcript()?;
        let signature = self.identity.sign(&transcript);
        let payload = encode_authentication(&self.identity.verifying_key(), &signature);
        self.send_queue.push_back(InnerMessage::complete(kind, payload));
        Ok(())
    }

    fn verify_authentication(&mut self, data: &[u8]) -> Result<(), PeerError> {
        if data.is_empty() {
            if self.settings.local.require_authentication {
                return Err(PeerError::NotAuthenticated);
            }
            return Ok(());
        }
        if data.len() != 32 + 64 {
            return Err(PeerError::UnexpectedMessage {
                kind: "Authentication".into(),
                state: "malformed payload".into(),
            });
        }
        let mut vk_bytes = [0u8; 32];
        vk_bytes.copy_from_slice(&data[0..32]);
        let verifying_key = VerifyingKey::from_bytes(&vk_bytes)?;
        let signature = Signature::from_slice(&data[32..96])?;
        let kex = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| PeerError::InvalidStateTransition("no key exchange to verify against".into()))?;
        let transcript = kex.transcript()?;
        verifying_key.verify(&transcript, &signature)?;
        self.peer_uuid = Some(PeerUuid::from_verifying_key(&verifying_key));
        Ok(())
    }

    /// Inbound drives the Begin for this phase (§4.1, §4.2).
    fn send_session_init_begin(&mut self) -> Result<(), PeerError> {
        let counter = rand::thread_rng().r#gen::<u8>();
        self.local_counter = Some(counter);
        let payload = encode_session_init(counter, self.socket.peer_addr(), &self.local_extenders);
        self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginSessionInit, payload));
        Ok(())
    }

    /// Outbound only ever replies with End, upon receiving inbound's Begin.
    fn send_session_init_reply(&mut self) -> Result<(), PeerError> {
        let counter = rand::thread_rng().r#gen::<u8>();
        self.local_counter = Some(counter);
        let payload = encode_session_init(counter, self.socket.peer_addr(), &self.local_extenders);
        self.send_queue.push_back(InnerMessage::complete(MessageKind::EndSessionInit, payload));
        Ok(())
    }

    fn activate_local_counter(&mut self) {
        if self.local_counter.is_none() {
            self.local_counter = Some(rand::thread_rng().r#gen::<u8>());
        }
    }

    fn on_key_update_message(&mut self, kind: MessageKind, data: Vec<u8>) -> Result<(), PeerError> {
        let negotiated = self
            .negotiated
            .ok_or_else(|| PeerError::InvalidStateTransition("no negotiated algorithms for key update".into()))?;
        match kind {
            MessageKind::BeginPrimaryKeyUpdateExchange => {
                let mut kex = KeyExchange::new(Role::Bob, negotiated.primary, negotiated.secondary);
                kex.primary_mut().receive_peer_handshake_data(&data)?;
                let reply = kex.primary().local_handshake_data()?;
                self.key_update.exchange = Some(kex);
                self.key_update.state = KeyUpdateState::PrimaryExchange;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::EndPrimaryKeyUpdateExchange, reply));
                Ok(())
            }
            MessageKind::EndPrimaryKeyUpdateExchange => {
                let kex = self
                    .key_update
                    .exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key update in progress".into()))?;
                kex.primary_mut().receive_peer_handshake_data(&data)?;
                let blob = kex.secondary().local_handshake_data()?;
                self.key_update.state = KeyUpdateState::SecondaryExchange;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginSecondaryKeyUpdateExchange, blob));
                Ok(())
            }
            MessageKind::BeginSecondaryKeyUpdateExchange => {
                let kex = self
                    .key_update
                    .exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key update in progress".into()))?;
                kex.secondary_mut().receive_peer_handshake_data(&data)?;
                let reply = kex.secondary().local_handshake_data()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::EndSecondaryKeyUpdateExchange, reply));
                self.complete_key_update()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::KeyUpdateReady, Vec::new()));
                Ok(())
            }
            MessageKind::EndSecondaryKeyUpdateExchange => {
                let kex = self
                    .key_update
                    .exchange
                    .as_mut()
                    .ok_or_else(|| PeerError::InvalidStateTransition("no key update in progress".into()))?;
                kex.secondary_mut().receive_peer_handshake_data(&data)?;
                self.complete_key_update()?;
                self.send_queue.push_back(InnerMessage::complete(MessageKind::KeyUpdateReady, Vec::new()));
                Ok(())
            }
            MessageKind::KeyUpdateReady => {
                self.key_update.state = KeyUpdateState::UpdateWait;
                self.key_update.initiated_at = None;
                self.key_update.next_due = Instant::now() + KeyUpdate::random_interval(&self.settings.local.key_update);
                Ok(())
            }
            _ => unreachable!("on_key_update_message called with non-key-update kind"),
        }
    }

    fn complete_key_update(&mut self) -> Result<(), PeerError> {
        let kex = self
            .key_update
            .exchange
            .take()
            .ok_or_else(|| PeerError::InvalidStateTransition("no key update to complete".into()))?;
        let gss = self.settings.local.global_shared_secret.clone();
        let primary_shared = kex.primary().shared_secret().expect("derived").to_vec();
        let secondary_shared = kex.secondary().shared_secret().expect("derived").to_vec();
        let primary_key = crate::keyexchange::derive_symmetric_key(&primary_shared, gss.as_deref(), b"quantumgate-primary-update");
        let secondary_key =
            crate::keyexchange::derive_symmetric_key(&secondary_shared, gss.as_deref(), b"quantumgate-secondary-update");
        self.keys.install(SymmetricKeyPair::bidirectional(primary_key));
        self.keys.install(SymmetricKeyPair::bidirectional(secondary_key));
        self.keys.expire_all_but_newest();
        self.key_update.state = KeyUpdateState::ReadyWait;
        self.key_update.initiated_at = None;
        Ok(())
    }

    /// Whether the inbound-only key-update trigger has fired: either the
    /// randomized interval elapsed, or the newest pair has processed more
    /// than `RequireAfterNumProcessedBytes` (§4.5).
    #[must_use]
    pub fn should_begin_key_update(&self) -> bool {
        if self.connection_type != ConnectionType::Inbound || self.status != Status::Ready {
            return false;
        }
        if !matches!(self.key_update.state, KeyUpdateState::UpdateWait) {
            return false;
        }
        if Instant::now() >= self.key_update.next_due {
            return true;
        }
        self.keys
            .current_encryption_pair()
            .and_then(|pair| pair.encryption())
            .is_some_and(|k| k.bytes_processed() > self.settings.local.key_update.require_after_num_processed_bytes)
    }

    /// Start a key update (inbound side only, §4.5).
    pub fn begin_key_update(&mut self) -> Result<(), PeerError> {
        let negotiated = self
            .negotiated
            .ok_or_else(|| PeerError::InvalidStateTransition("no negotiated algorithms".into()))?;
        let kex = KeyExchange::new(Role::Alice, negotiated.primary, negotiated.secondary);
        let blob = kex.primary().local_handshake_data()?;
        self.key_update.exchange = Some(kex);
        self.key_update.state = KeyUpdateState::PrimaryExchange;
        self.key_update.initiated_at = Some(Instant::now());
        self.send_queue.push_back(InnerMessage::complete(MessageKind::BeginPrimaryKeyUpdateExchange, blob));
        Ok(())
    }

    /// Whether an in-progress key update has exceeded `MaxDuration`
    /// (§4.5: "fatal" on timeout).
    #[must_use]
    pub fn is_key_update_timed_out(&self) -> bool {
        self.key_update.initiated_at.is_some_and(|started| {
            started.elapsed() > Duration::from_secs(self.settings.local.key_update.max_duration_secs)
        })
    }

    // -- Transport framing (§4.3) --

    /// Build and encrypt one outbound wire frame from the pending send
    /// queue plus any due noise, or `None` if there is nothing to send.
    pub fn build_outbound_frame(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        self.noise.ensure_scheduled();

        let mut payload = Vec::new();
        let budget = DEFAULT_MAX_FRAME_PAYLOAD;
        let concatenate = self.flags.contains(Flags::CONCATENATE_MESSAGES);
        while let Some(msg) = self.send_queue.front() {
            let encoded = msg.encode()?;
            if !payload.is_empty() && payload.len() + encoded.len() > budget {
                break;
            }
            let msg = self.send_queue.pop_front().unwrap();
            if let Some(rl_kind) = send_rate_kind(msg.kind) {
                self.rate_limits.window(rl_kind).subtract(msg.data.len());
            }
            payload.extend_from_slice(&encoded);
            if !concatenate {
                break;
            }
        }

        if payload.is_empty() {
            let remaining_budget = budget.saturating_sub(payload.len()) as u32;
            let noise_window = self.rate_limits.window(RateLimitKind::NoiseSend);
            if noise_window.can_add(remaining_budget as usize) {
                if let Some(noise_msg) = self.noise.pop(remaining_budget) {
                    payload.extend_from_slice(&noise_msg.encode()?);
                }
            }
        }

        if payload.is_empty() {
            return Ok(None);
        }

        let nonce_seed = rand::thread_rng().r#gen::<u32>();
        let counter = self.local_counter.unwrap_or(0);
        if let Some(c) = &mut self.local_counter {
            *c = c.wrapping_add(1);
        }
        let current_prefix_len = self.next_outbound_prefix_len;
        let min = self.settings.message.min_random_data_prefix_size;
        let max = self.settings.message.max_random_data_prefix_size;
        let next_prefix_len = if min == max { min } else { rand::thread_rng().gen_range(min..=max) };
        self.next_outbound_prefix_len = next_prefix_len;

        let mut random_prefix = vec![0u8; current_prefix_len as usize];
        OsRng.fill_bytes(&mut random_prefix);

        let system_time_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64;

        let cipher = self.current_encryption_cipher(nonce_seed);
        let wire = frame::encode(
            &cipher,
            nonce_seed,
            counter,
            current_prefix_len,
            next_prefix_len,
            system_time_ms,
            &payload,
            &random_prefix,
        )?;

        self.bytes_sent += wire.len() as u64;
        if let Some(pair) = self.keys.current_encryption_pair_mut() {
            if let Some(enc) = pair.encryption_mut() {
                enc.record_bytes(payload.len() as u64);
            }
        }
        Ok(Some(wire))
    }

    fn current_encryption_cipher(&self, nonce_seed: u32) -> AeadCipher {
        match self.keys.current_encryption_pair().and_then(SymmetricKeyPair::encryption) {
            Some(dir) => AeadCipher::new(dir.key().clone()),
            None => AeadCipher::new(derive_auto_generated_key(nonce_seed)),
        }
    }

    /// Append newly received bytes and process as many complete frames as
    /// are buffered, driving the handshake processor and returning any
    /// fully reassembled application-level messages (§4.3, §4.4).
    pub fn receive_wire_bytes(
        &mut self,
        new_bytes: &[u8],
    ) -> Result<Vec<(MessageKind, Option<PeerUuid>, Vec<u8>)>, PeerError> {
        self.recv_buffer.extend_from_slice(new_bytes);
        let mut delivered = Vec::new();

        loop {
            if (self.recv_buffer.len() as u16) < self.pending_prefix_skip
                && self.recv_buffer.len() < self.pending_prefix_skip as usize
            {
                break;
            }
            let skip = self.pending_prefix_skip as usize;
            if self.recv_buffer.len() < skip {
                break;
            }
            let after_prefix = &self.recv_buffer[skip..];
            let total = match frame::peek(after_prefix) {
                frame::PeekResult::Incomplete => break,
                frame::PeekResult::TooMuchData => return Err(PeerError::TooMuchData("frame exceeds bound".into())),
                frame::PeekResult::CompleteMessage(total) => total,
            };

            let (decoded_frame, consumed) = frame::extract(after_prefix)?;
            let total_consumed = skip + consumed;
            debug_assert_eq!(consumed, total);

            let age_tolerance = self.settings.age_tolerance();
            let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64;
            if (now_ms - decoded_frame.header.system_time_ms).unsigned_abs() > age_tolerance.as_millis() as u64 {
                return Err(PeerError::StaleTimestamp);
            }

            if let Some(expected) = self.peer_counter {
                if decoded_frame.header.counter != expected {
                    return Err(PeerError::CounterMismatch { expected, actual: decoded_frame.header.counter });
                }
            }

            let plaintext = self.decrypt_with_candidates(&decoded_frame)?;
            if let Some(expected) = &mut self.peer_counter {
                *expected = expected.wrapping_add(1);
            }

            self.bytes_received += total_consumed as u64;
            self.pending_prefix_skip = decoded_frame.header.next_random_prefix_length;
            self.recv_buffer.drain(0..total_consumed);

            let mut cursor = plaintext.as_slice();
            while !cursor.is_empty() {
                let (msg, n) = InnerMessage::decode(cursor)?;
                cursor = &cursor[n..];
                if msg.kind == MessageKind::Noise {
                    continue;
                }
                if let Some((kind, extender_uuid, data)) = self.reassembler.push(msg)? {
                    if is_handshake_kind(kind) {
                        self.on_handshake_message(kind, data)?;
                    } else if let Some(rl_kind) = receive_rate_kind(kind) {
                        let window = self.rate_limits.window(rl_kind);
                        if window.add(data.len()) {
                            delivered.push((kind, extender_uuid, data));
                        } else {
                            self.deferred_receive.push_back((kind, extender_uuid, data));
                        }
                    } else {
                        delivered.push((kind, extender_uuid, data));
                    }
                }
            }
        }

        Ok(delivered)
    }

    fn decrypt_with_candidates(&mut self, frame: &frame::Frame) -> Result<Vec<u8>, PeerError> {
        if self.keys.is_empty() {
            let cipher = AeadCipher::new(derive_auto_generated_key(frame.header.nonce_seed));
            return frame::decrypt(&cipher, frame);
        }
        let mut result = None;
        for pair in self.keys.decryption_candidates() {
            let Some(dec) = pair.decryption() else { continue };
            let cipher = AeadCipher::new(dec.key().clone());
            if let Ok(plaintext) = frame::decrypt(&cipher, frame) {
                pair.enable_encryption();
                if let Some(dec_mut) = pair.decryption_mut() {
                    dec_mut.record_bytes(plaintext.len() as u64);
                }
                result = Some(plaintext);
                break;
            }
        }
        result.ok_or(PeerError::DecryptionExhausted)
    }

    /// Enqueue an application-level message for delivery (e.g. an extender
    /// payload), fragmenting it first if it exceeds `MaxInnerData` (§4.4).
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::RateLimited`] if `kind` draws against a §4.13
    /// rate window (`ExtenderCommunication`, `RelayData`) and admitting
    /// `data` would overflow it — the caller already has this many bytes
    /// of the same kind outstanding on the wire.
    pub fn enqueue_application_message(
        &mut self,
        kind: MessageKind,
        extender_uuid: Option<PeerUuid>,
        data: &[u8],
    ) -> Result<(), PeerError> {
        if let Some(rl_kind) = send_rate_kind(kind) {
            if !self.rate_limits.window(rl_kind).add(data.len()) {
                return Err(PeerError::RateLimited);
            }
        }
        for msg in fragment(kind, extender_uuid, data) {
            self.send_queue.push_back(msg);
        }
        Ok(())
    }

    /// Pull any messages that were deferred on receipt because their
    /// kind's §4.13 rate window was full. Callers should pair draining a
    /// message with [`Peer::release_receive_budget`] once it has actually
    /// been consumed, so the window has room for the next one.
    pub fn drain_deferred_receive(&mut self) -> Vec<(MessageKind, Option<PeerUuid>, Vec<u8>)> {
        self.deferred_receive.drain(..).collect()
    }

    /// Release `n` bytes of previously-reserved receive budget for `kind`
    /// (§4.13), making room for deferred messages of the same kind.
    pub fn release_receive_budget(&mut self, kind: MessageKind, n: usize) {
        if let Some(rl_kind) = receive_rate_kind(kind) {
            self.rate_limits.window(rl_kind).subtract(n);
        }
    }

    /// Pump the socket: write one outbound frame if one is ready, and read
    /// whatever is available, handing decoded application messages back to
    /// the caller.
    pub fn pump(&mut self) -> Result<Vec<(MessageKind, Option<PeerUuid>, Vec<u8>)>, PeerError> {
        if let Some(wire) = self.build_outbound_frame()? {
            let mut offset = 0;
            while offset < wire.len() {
                let n = self
                    .socket
                    .send(&wire[offset..])
                    .map_err(|e| PeerError::Socket(e.to_string().into()))?;
                if n == 0 {
                    break;
                }
                offset += n;
            }
        }

        let mut buf = [0u8; 4096];
        let mut inbound = Vec::new();
        loop {
            let n = self.socket.receive(&mut buf).map_err(|e| PeerError::Socket(e.to_string().into()))?;
            if n == 0 {
                break;
            }
            inbound.extend_from_slice(&buf[..n]);
        }
        if inbound.is_empty() {
            return Ok(Vec::new());
        }
        self.receive_wire_bytes(&inbound)
    }

    // -- Scheduler integration (§4.9, §5) --

    /// Mark the local extender set as having changed since the last
    /// `ExtenderUpdate` was sent.
    pub fn mark_needs_extender_update(&mut self) {
        self.flags.insert(Flags::NEEDS_EXTENDER_UPDATE);
    }

    /// Replace the locally-enabled extender set and flag it for
    /// announcement on the next `ProcessEvents` pass.
    pub fn set_local_extenders(&mut self, extenders: Vec<PeerUuid>) {
        self.local_extenders = extenders;
        self.mark_needs_extender_update();
    }

    fn send_extender_update_if_pending(&mut self) {
        if !self.flags.contains(Flags::NEEDS_EXTENDER_UPDATE) {
            return;
        }
        let mut payload = Vec::with_capacity(1 + self.local_extenders.len() * 16);
        payload.push(self.local_extenders.len() as u8);
        for uuid in &self.local_extenders {
            payload.extend_from_slice(&uuid.to_bytes());
        }
        self.send_queue.push_back(InnerMessage::complete(MessageKind::ExtenderUpdate, payload));
        self.flags.remove(Flags::NEEDS_EXTENDER_UPDATE);
    }

    /// Mark this peer as needing an access-plane recheck (§4.9: the
    /// primary sweep sets this on every peer in a pool when
    /// `AccessUpdateFlag` changes).
    pub fn mark_needs_access_check(&mut self) {
        self.flags.insert(Flags::NEEDS_ACCESS_CHECK);
    }

    /// Whether an access-plane recheck is pending.
    #[must_use]
    pub fn needs_access_check(&self) -> bool {
        self.flags.contains(Flags::NEEDS_ACCESS_CHECK)
    }

    /// Clear the access-recheck flag once the scheduler has re-evaluated
    /// this peer's IP/UUID against the access plane.
    pub fn clear_access_check(&mut self) {
        self.flags.remove(Flags::NEEDS_ACCESS_CHECK);
    }

    /// Whether this peer is currently enqueued on a worker pool's work
    /// queue (§4.9, §5: the `InQueue` serialization token).
    #[must_use]
    pub fn in_queue(&self) -> bool {
        self.flags.contains(Flags::IN_QUEUE)
    }

    /// Attempt to claim this peer for scheduling. Returns `true` (and sets
    /// the flag) only if it was not already set — the primary sweep "skips
    /// if already in queue" (§4.9).
    pub fn try_enter_queue(&mut self) -> bool {
        if self.flags.contains(Flags::IN_QUEUE) {
            return false;
        }
        self.flags.insert(Flags::IN_QUEUE);
        true
    }

    /// Clear the in-queue flag. A worker does this only after taking the
    /// peer's unique lock (§5).
    pub fn leave_queue(&mut self) {
        self.flags.remove(Flags::IN_QUEUE);
    }

    /// Force this peer to terminal `Disconnected`, recording `condition`
    /// and closing the socket (§4.1).
    pub fn disconnect(&mut self, condition: DisconnectCondition, graceful: bool) {
        if self.status == Status::Disconnected {
            return;
        }
        self.disconnect_condition = condition;
        self.status = Status::Disconnected;
        let linger = if graceful { Some(Duration::from_secs(1)) } else { None };
        self.socket.close(linger);
    }

    /// Whether this peer has recorded a disconnect condition and should be
    /// drained and removed by the manager on its next sweep (§4.9).
    #[must_use]
    pub fn should_disconnect(&self) -> bool {
        self.disconnect_condition != DisconnectCondition::None
    }

    /// Record a fatal error's disconnect condition without immediately
    /// tearing down the socket; the manager drains and removes the peer on
    /// its next primary sweep (§4.9, §7).
    pub fn fail(&mut self, condition: DisconnectCondition) {
        if self.disconnect_condition == DisconnectCondition::None {
            self.disconnect_condition = condition;
        }
    }

    /// Poll socket readiness and report whether this peer has any pending
    /// work a worker should process: socket I/O readiness, a queued
    /// outbound message, due noise, a pending extender update, or a due
    /// key-update event (§4.9 `CheckStatus`).
    pub fn has_pending_events(&mut self) -> bool {
        let status = self.socket.update_io_status(Duration::ZERO).unwrap_or_else(|_| self.socket.io_status());
        status.can_read
            || status.can_write
            || !self.send_queue.is_empty()
            || self.noise.is_due()
            || self.flags.contains(Flags::NEEDS_EXTENDER_UPDATE)
            || self.should_begin_key_update()
            || matches!(
                self.key_update.state,
                KeyUpdateState::PrimaryExchange | KeyUpdateState::SecondaryExchange | KeyUpdateState::ReadyWait
            )
    }

    /// Drive the per-sweep lifecycle checks the primary thread performs for
    /// every peer in its pool (§4.9 `CheckStatus`): complete an in-flight
    /// outbound connect, send the inbound side's first `BeginMetaExchange`
    /// once truly connected, and enforce connect/handshake/key-update
    /// timeouts (handshake timeout scaled by `relay_hop_multiplier`).
    pub fn check_status(&mut self, relay_hop_multiplier: u32) -> Result<(), PeerError> {
        if self.status == Status::Connecting {
            let connected =
                self.socket.complete_connect().map_err(|e| PeerError::Socket(e.to_string().into()))?;
            if connected {
                self.mark_connected()?;
            } else if self.is_connect_timed_out() {
                return Err(PeerError::TimedOut("connect timed out".into()));
            }
            return Ok(());
        }
        if self.status == Status::Accepted {
            self.mark_connected()?;
        }
        if self.is_handshake_timed_out(relay_hop_multiplier) {
            return Err(PeerError::TimedOut("handshake timed out".into()));
        }
        if self.is_key_update_timed_out() {
            return Err(PeerError::TimedOut("key update timed out".into()));
        }
        self.noise.ensure_scheduled();
        Ok(())
    }

    /// Run one bounded burst of send/receive/key-update work (§4.9
    /// `ProcessEvents`, §5: "the worker yields after
    /// `WorkerThreadsMaxBurst` inner messages processed"), returning
    /// whatever application-level messages were delivered.
    pub fn process_events(
        &mut self,
        max_burst: u32,
    ) -> Result<Vec<(MessageKind, Option<PeerUuid>, Vec<u8>)>, PeerError> {
        self.send_extender_update_if_pending();
        if self.should_begin_key_update() {
            self.begin_key_update()?;
        }
        let mut delivered = Vec::new();
        for _ in 0..max_burst.max(1) {
            if !self.has_pending_events() {
                break;
            }
            delivered.extend(self.pump()?);
        }
        Ok(delivered)
    }
}

/// The §4.13 send-side rate window a given message kind draws against, if
/// any (handshake and control kinds are unbounded).
fn send_rate_kind(kind: MessageKind) -> Option<RateLimitKind> {
    match kind {
        MessageKind::ExtenderCommunication => Some(RateLimitKind::ExtenderCommunicationSend),
        MessageKind::RelayData => Some(RateLimitKind::RelayDataSend),
        _ => None,
    }
}

/// The §4.13 receive-side rate window a given message kind draws against.
fn receive_rate_kind(kind: MessageKind) -> Option<RateLimitKind> {
    match kind {
        MessageKind::ExtenderCommunication => Some(RateLimitKind::ExtenderCommunicationReceive),
        MessageKind::RelayData => Some(RateLimitKind::RelayDataReceive),
        _ => None,
    }
}

fn is_handshake_kind(kind: MessageKind) -> bool {
    !matches!(
        kind,
        MessageKind::ExtenderCommunication
            | MessageKind::ExtenderUpdate
            | MessageKind::RelayCreate
            | MessageKind::RelayStatus
            | MessageKind::RelayData
            | MessageKind::RelayDataAck
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NullForwarder;
    impl quantumgate_transport::RelayForwarder for NullForwarder {
        fn forward(&self, _bytes: &[u8]) {}
    }

    fn dummy_socket(addr: SocketAddr) -> AnySocket {
        AnySocket::Relay(quantumgate_transport::RelaySocket::new(Arc::new(NullForwarder), addr))
    }

    fn make_pair() -> (Peer, Peer) {
        let settings = Settings::default();
        let alice_addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let bob_addr: SocketAddr = "10.0.0.2:9001".parse().unwrap();
        let alice = Peer::new_inbound(
            alice_addr,
            dummy_socket(bob_addr),
            settings.clone(),
            SigningKey::generate(&mut OsRng),
            vec![],
        );
        let bob = Peer::new_outbound(bob_addr, dummy_socket(alice_addr), settings, SigningKey::generate(&mut OsRng), vec![]);
        (alice, bob)
    }

    /// Drive two in-memory peers through the full handshake by bouncing
    /// whatever each side's `build_outbound_frame` produces into the
    /// other's `receive_wire_bytes`, until both reach `Ready`.
    fn run_handshake(alice: &mut Peer, bob: &mut Peer) {
        alice.mark_connected().unwrap();
        bob.mark_connected().unwrap();

        for _ in 0..64 {
            if alice.status() == Status::Ready && bob.status() == Status::Ready {
                return;
            }
            if let Some(wire) = alice.build_outbound_frame().unwrap() {
                bob.receive_wire_bytes(&wire).unwrap();
            }
            if let Some(wire) = bob.build_outbound_frame().unwrap() {
                alice.receive_wire_bytes(&wire).unwrap();
            }
        }
        panic!("handshake did not complete: alice={:?} bob={:?}", alice.status(), bob.status());
    }

    #[test]
    fn full_handshake_reaches_ready_on_both_sides() {
        let (mut alice, mut bob) = make_pair();
        run_handshake(&mut alice, &mut bob);
        assert_eq!(alice.status(), Status::Ready);
        assert_eq!(bob.status(), Status::Ready);
        assert!(alice.is_authenticated());
        assert!(bob.is_authenticated());
        assert!(alice.flags().contains(Flags::CONCATENATE_MESSAGES));
    }

    #[test]
    fn application_message_round_trips_after_handshake() {
        let (mut alice, mut bob) = make_pair();
        run_handshake(&mut alice, &mut bob);

        alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"hello").unwrap();
        let wire = alice.build_outbound_frame().unwrap().expect("a frame should be produced");
        let delivered = bob.receive_wire_bytes(&wire).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, MessageKind::ExtenderCommunication);
        assert_eq!(delivered[0].2, b"hello");
    }

    #[test]
    fn gss_priming_installs_a_usable_pair_before_handshake() {
        let mut settings = Settings::default();
        settings.local.global_shared_secret = Some(vec![0x42; 32]);
        let addr: SocketAddr = "10.0.0.3:9000".parse().unwrap();
        let peer = Peer::new_outbound(addr, dummy_socket(addr), settings, SigningKey::generate(&mut OsRng), vec![]);
        assert!(!peer.keys.is_empty());
        assert!(peer.keys.current_encryption_pair().is_some());
    }

    #[test]
    fn status_transitions_are_rejected_out_of_order() {
        let settings = Settings::default();
        let addr: SocketAddr = "10.0.0.4:9000".parse().unwrap();
        let mut peer =
            Peer::new_outbound(addr, dummy_socket(addr), settings, SigningKey::generate(&mut OsRng), vec![]);
        assert!(peer.transition(Status::Ready).is_err());
    }

    #[test]
    fn replayed_frame_after_counter_advance_is_rejected() {
        let (mut alice, mut bob) = make_pair();
        run_handshake(&mut alice, &mut bob);

        alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"first").unwrap();
        let replayed = alice.build_outbound_frame().unwrap().unwrap();
        bob.receive_wire_bytes(&replayed).unwrap();

        alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"second").unwrap();
        let second = alice.build_outbound_frame().unwrap().unwrap();
        bob.receive_wire_bytes(&second).unwrap();

        assert!(bob.receive_wire_bytes(&replayed).is_err());
    }

    #[test]
    fn send_queue_rejects_once_extender_send_window_is_full() {
        let (mut alice, mut bob) = make_pair();
        run_handshake(&mut alice, &mut bob);

        alice
            .enqueue_application_message(MessageKind::ExtenderCommunication, None, &vec![0u8; MAX_INNER_DATA])
            .unwrap();
        let err = alice
            .enqueue_application_message(MessageKind::ExtenderCommunication, None, b"too much")
            .unwrap_err();
        assert!(matches!(err, PeerError::RateLimited));

        // Draining the queued message onto the wire frees the window again.
        while alice.build_outbound_frame().unwrap().is_some() {}
        alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"fits now").unwrap();
    }

    #[test]
    fn overflowing_receive_window_defers_instead_of_dropping() {
        let (mut alice, mut bob) = make_pair();
        run_handshake(&mut alice, &mut bob);

        // Force bob's receive window to be saturated, then verify a
        // message that would overflow it lands in the deferred queue
        // rather than the immediate delivery list.
        bob.rate_limits.window(RateLimitKind::ExtenderCommunicationReceive).add(MAX_INNER_DATA);

        alice.enqueue_application_message(MessageKind::ExtenderCommunication, None, b"overflow me").unwrap();
        let wire = alice.build_outbound_frame().unwrap().unwrap();
        let delivered = bob.receive_wire_bytes(&wire).unwrap();
        assert!(delivered.is_empty());

        let deferred = bob.drain_deferred_receive();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].2, b"overflow me");

        bob.release_receive_budget(MessageKind::ExtenderCommunication, MAX_INNER_DATA);
        assert!(bob.rate_limits.window(RateLimitKind::ExtenderCommunicationReceive).can_add(b"overflow me".len()));
    }
}
