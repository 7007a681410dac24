//! Key exchange driver (§4.2): orchestrates the primary (DH) and secondary
//! (KEM) legs, the Alice/Bob role asymmetry, and algorithm selection.
//!
//! Grounded on `examples/original_source/QuantumGateLib/Core/Peer/PeerKeyExchange.h`:
//! `KeyExchange` holds primary/secondary `AsymmetricKeyData` plus the
//! resulting `SymmetricKeyPair`s; `GenerateAsymmetricKeys` skips keypair
//! generation for a KEM-owning Bob ("Bob doesn't need an asymmetric
//! keypair; he'll encrypt a shared secret using Alice's public key"); the
//! peer-public-key slot holds the KEM ciphertext for a KEM exchange.
//! [`KeyExchange::transcript`] builds a canonical Alice-then-Bob ordering
//! per leg so both sides sign and verify the same bytes regardless of
//! which side they played.

use quantumgate_crypto::aead::AeadKey;
use quantumgate_crypto::dh;
use quantumgate_crypto::hash::{hkdf_expand, hkdf_extract};
use quantumgate_crypto::kem;

use crate::error::PeerError;

/// Which side of the handshake this peer is playing. Fixed per connection,
/// derived from the connection direction: the inbound side is Alice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Inbound side; the key holder for KEM legs.
    Alice,
    /// Outbound side; encapsulates against Alice's KEM public key.
    Bob,
}

/// Which concrete algorithm family a leg uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricAlgorithm {
    /// Classical Diffie-Hellman (X25519).
    X25519,
    /// Post-quantum KEM (ML-KEM-768).
    MlKem768,
}

/// The five independently negotiated algorithm categories (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmCategory {
    /// Transcript / handshake hash.
    Hash,
    /// Primary asymmetric leg.
    PrimaryAsymmetric,
    /// Secondary asymmetric leg.
    SecondaryAsymmetric,
    /// Symmetric (AEAD) algorithm.
    Symmetric,
    /// Compression algorithm.
    Compression,
}

/// Per-category algorithm preference vectors advertised during meta
/// exchange, and the negotiation that picks one per category.
///
/// Resolved Open Question: the *inbound* side's preference order is
/// authoritative. `negotiate` walks the inbound vector in order and returns
/// the first entry also present in the outbound side's offered set.
pub struct AlgorithmSelection;

impl AlgorithmSelection {
    /// Negotiate a single category: walk `inbound_preference` in order,
    /// returning the first entry also contained in `outbound_offered`.
    pub fn negotiate<T: PartialEq + Copy>(
        inbound_preference: &[T],
        outbound_offered: &[T],
    ) -> Option<T> {
        inbound_preference
            .iter()
            .copied()
            .find(|candidate| outbound_offered.contains(candidate))
    }
}

/// One leg's asymmetric key material, role-tagged per the KEM-ciphertext
/// convention (§3: "Asymmetric key data").
pub enum AsymmetricKeyData {
    /// Alice's side of a DH leg: her keypair, and the peer's public key
    /// once received.
    AliceDh {
        /// Alice's own keypair.
        local: dh::PrivateKey,
        /// Bob's public key, once received.
        peer_public: Option<dh::PublicKey>,
    },
    /// Bob's side of a DH leg.
    BobDh {
        /// Bob's own keypair.
        local: dh::PrivateKey,
        /// Alice's public key, once received.
        peer_public: Option<dh::PublicKey>,
    },
    /// Alice's side of a KEM leg: she holds the only keypair.
    AliceKem {
        /// Alice's keypair.
        local: kem::KeyPair,
        /// Bob's returned ciphertext, once received (sits in the "peer
        /// public key" slot per the KEM convention).
        ciphertext: Option<kem::Ciphertext>,
    },
    /// Bob's side of a KEM leg: no keypair of his own — he encapsulates
    /// against Alice's public key, and "his handshake blob" *is* the
    /// resulting ciphertext.
    BobKem {
        /// Alice's public key, once received.
        alice_public: Option<kem::PublicKey>,
        /// The ciphertext Bob produced (sent back as his handshake blob).
        ciphertext: Option<kem::Ciphertext>,
    },
}

fn parse_dh_key(bytes: &[u8]) -> Result<[u8; 32], PeerError> {
    bytes
        .try_into()
        .map_err(|_| PeerError::TrivialHandshakeData("wrong dh key length".into()))
}

/// Handshake data must not be all-zero, all-one, or empty (§4.7). Checked
/// before any shared-secret derivation is attempted.
pub fn reject_trivial_handshake_data(data: &[u8]) -> Result<(), PeerError> {
    if data.is_empty() {
        return Err(PeerError::TrivialHandshakeData("empty".into()));
    }
    if data.iter().all(|b| *b == 0x00) {
        return Err(PeerError::TrivialHandshakeData("all-zero".into()));
    }
    if data.iter().all(|b| *b == 0xFF) {
        return Err(PeerError::TrivialHandshakeData("all-one".into()));
    }
    Ok(())
}

/// HKDF-style derivation of a symmetric key pair's key from a leg's shared
/// secret, optionally combined with the Global Shared Secret (§4.2, §4.8).
pub fn derive_symmetric_key(shared_secret: &[u8], gss: Option<&[u8]>, context: &'static [u8]) -> AeadKey {
    let mut ikm = Vec::with_capacity(shared_secret.len() + gss.map_or(0, <[u8]>::len));
    ikm.extend_from_slice(shared_secret);
    if let Some(gss) = gss {
        ikm.extend_from_slice(gss);
    }
    let prk = hkdf_extract(b"quantumgate-symmetric-key", &ikm);
    let mut out = [0u8; 32];
    hkdf_expand(&prk, context, &mut out);
    AeadKey::from_bytes(out)
}

/// One leg (primary or secondary) of the key exchange driver.
pub struct Leg {
    algorithm: AsymmetricAlgorithm,
    data: AsymmetricKeyData,
    shared_secret: Option<Vec<u8>>,
    /// The peer's handshake blob exactly as received on the wire (a DH
    /// public key, Alice's KEM public key, or Bob's KEM ciphertext).
    /// Kept verbatim — rather than re-deriving it from `data`, which has
    /// no representation for a KEM peer's blob on this side (see
    /// [`Leg::peer_handshake_blob`]) — so the authentication transcript
    /// can be built the same way by both sides (§4.2).
    peer_handshake_blob: Option<Vec<u8>>,
}

impl Leg {
    /// Alice generates (or is handed a pregenerated) keypair for this leg.
    /// Bob, on a KEM leg, intentionally generates nothing (`BobKem` starts
    /// empty) per `GenerateAsymmetricKeys`'s documented skip.
    #[must_use]
    pub fn generate(role: Role, algorithm: AsymmetricAlgorithm) -> Self {
        let data = match (role, algorithm) {
            (Role::Alice, AsymmetricAlgorithm::X25519) => AsymmetricKeyData::AliceDh {
                local: dh::PrivateKey::generate(&mut rand_core::OsRng),
                peer_public: None,
            },
            (Role::Bob, AsymmetricAlgorithm::X25519) => AsymmetricKeyData::BobDh {
                local: dh::PrivateKey::generate(&mut rand_core::OsRng),
                peer_public: None,
            },
            (Role::Alice, AsymmetricAlgorithm::MlKem768) => AsymmetricKeyData::AliceKem {
                local: kem::KeyPair::generate(),
                ciphertext: None,
            },
            (Role::Bob, AsymmetricAlgorithm::MlKem768) => {
                AsymmetricKeyData::BobKem { alice_public: None, ciphertext: None }
            }
        };
        Self { algorithm, data, shared_secret: None, peer_handshake_blob: None }
    }

    /// The handshake blob this side sends: a DH public key, or (Alice-KEM)
    /// her public key, or (Bob-KEM) his encapsulated ciphertext.
    pub fn local_handshake_data(&self) -> Result<Vec<u8>, PeerError> {
        match &self.data {
            AsymmetricKeyData::AliceDh { local, .. } | AsymmetricKeyData::BobDh { local, .. } => {
                Ok(local.public_key().as_bytes().to_vec())
            }
            AsymmetricKeyData::AliceKem { local, .. } => Ok(local.public_key().as_bytes().to_vec()),
            AsymmetricKeyData::BobKem { ciphertext, .. } => ciphertext
                .as_ref()
                .map(|ct| ct.as_bytes().to_vec())
                .ok_or_else(|| PeerError::InvalidStateTransition("bob has not encapsulated yet".into())),
        }
    }

    /// Process the peer's handshake blob: validate non-triviality, derive
    /// (or complete deriving) the shared secret for this leg.
    pub fn receive_peer_handshake_data(&mut self, peer_data: &[u8]) -> Result<(), PeerError> {
        reject_trivial_handshake_data(peer_data)?;
        match &mut self.data {
            AsymmetricKeyData::AliceDh { local, peer_public } => {
                let pk = dh::PublicKey::from_bytes(parse_dh_key(peer_data)?);
                let secret = local
                    .exchange(&pk)
                    .ok_or_else(|| PeerError::TrivialHandshakeData("low-order dh point".into()))?;
                *peer_public = Some(pk);
                self.shared_secret = Some(secret.as_bytes().to_vec());
            }
            AsymmetricKeyData::BobDh { local, peer_public } => {
                let pk = dh::PublicKey::from_bytes(parse_dh_key(peer_data)?);
                let secret = local
                    .exchange(&pk)
                    .ok_or_else(|| PeerError::TrivialHandshakeData("low-order dh point".into()))?;
                *peer_public = Some(pk);
                self.shared_secret = Some(secret.as_bytes().to_vec());
            }
            AsymmetricKeyData::AliceKem { local, ciphertext } => {
                let ct = kem::Ciphertext::from_bytes(peer_data)?;
                let secret = local.secret_key().decapsulate(&ct)?;
                *ciphertext = Some(ct);
                self.shared_secret = Some(secret.as_bytes().to_vec());
            }
            AsymmetricKeyData::BobKem { alice_public, ciphertext } => {
                let pk = kem::PublicKey::from_bytes(peer_data)?;
                let (ct, secret) = pk.encapsulate()?;
                *alice_public = Some(pk);
                *ciphertext = Some(ct);
                self.shared_secret = Some(secret.as_bytes().to_vec());
            }
        }
        self.peer_handshake_blob = Some(peer_data.to_vec());
        Ok(())
    }

    /// The peer's handshake blob exactly as received — a DH public key,
    /// Alice's KEM public key, or Bob's KEM ciphertext — for transcript
    /// construction. `None` until [`Leg::receive_peer_handshake_data`] has
    /// run.
    #[must_use]
    pub fn peer_handshake_blob(&self) -> Option<&[u8]> {
        self.peer_handshake_blob.as_deref()
    }

    /// Whether this leg's algorithm is a KEM (affects transcript ordering
    /// per `AddKeyExchangeData`).
    #[must_use]
    pub fn is_kem(&self) -> bool {
        matches!(self.algorithm, AsymmetricAlgorithm::MlKem768)
    }

    /// The derived shared secret, once both handshake blobs have been
    /// exchanged.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_deref()
    }
}

/// Drives both legs of the key exchange for one peer session.
pub struct KeyExchange {
    role: Role,
    primary: Leg,
    secondary: Leg,
}

impl KeyExchange {
    /// Start both legs for this role with the negotiated algorithms.
    #[must_use]
    pub fn new(role: Role, primary_algorithm: AsymmetricAlgorithm, secondary_algorithm: AsymmetricAlgorithm) -> Self {
        Self {
            role,
            primary: Leg::generate(role, primary_algorithm),
            secondary: Leg::generate(role, secondary_algorithm),
        }
    }

    /// This connection's fixed role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Mutable access to the primary leg.
    pub fn primary_mut(&mut self) -> &mut Leg {
        &mut self.primary
    }

    /// Mutable access to the secondary leg.
    pub fn secondary_mut(&mut self) -> &mut Leg {
        &mut self.secondary
    }

    /// Read-only access to the primary leg.
    #[must_use]
    pub fn primary(&self) -> &Leg {
        &self.primary
    }

    /// Read-only access to the secondary leg.
    #[must_use]
    pub fn secondary(&self) -> &Leg {
        &self.secondary
    }

    /// Build the authentication transcript. Canonical and role-independent:
    /// for each leg, in fixed Alice-then-Bob order, we write whichever side
    /// (ourselves or the peer) actually played that role, followed by both
    /// shared secrets. Unlike the old `AddKeyExchangeData`-mirrored ordering,
    /// this reconstructs to the exact same bytes on both ends even when a
    /// leg is a KEM (where only Alice's public key and Bob's ciphertext
    /// exist, never a peer-returned "public key"): each side now keeps a
    /// verbatim copy of the peer's handshake blob
    /// ([`Leg::peer_handshake_blob`]) rather than trying to recompute it.
    pub fn transcript(&self) -> Result<Vec<u8>, PeerError> {
        let mut out = Vec::new();
        for leg in [&self.primary, &self.secondary] {
            let local = leg.local_handshake_data()?;
            let peer = leg.peer_handshake_blob().ok_or_else(|| {
                PeerError::InvalidStateTransition("leg has no peer handshake data".into())
            })?;
            let (alice_blob, bob_blob): (&[u8], &[u8]) = match self.role {
                Role::Alice => (&local, peer),
                Role::Bob => (peer, &local),
            };
            out.extend_from_slice(alice_blob);
            out.extend_from_slice(bob_blob);
        }
        let primary_shared = self
            .primary
            .shared_secret()
            .ok_or_else(|| PeerError::InvalidStateTransition("primary leg incomplete".into()))?;
        let secondary_shared = self
            .secondary
            .shared_secret()
            .ok_or_else(|| PeerError::InvalidStateTransition("secondary leg incomplete".into()))?;
        out.extend_from_slice(primary_shared);
        out.extend_from_slice(secondary_shared);
        Ok(out)
    }
}
