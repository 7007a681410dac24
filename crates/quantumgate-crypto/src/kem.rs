//! ML-KEM-768 (FIPS 203) key encapsulation for the secondary key-exchange leg.
//!
//! The primary leg (`dh`) is a classical Diffie-Hellman exchange where both
//! sides hold a keypair and derive the same shared secret by combining their
//! private scalar with the peer's public point. A KEM does not have that
//! symmetry: only one side (Alice, per `PeerKeyExchange.h`'s convention) holds
//! a keypair; the other side (Bob) encapsulates a fresh shared secret against
//! Alice's public key and sends back the ciphertext, never generating a
//! keypair of its own. `quantumgate-core::keyexchange` drives that asymmetry;
//! this module only wraps the primitive.

use crate::CryptoError;
use ml_kem::{Encoded, EncodedSizeUser, KemCore, MlKem768, kem::Decapsulate, kem::Encapsulate};
use rand_core::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// ML-KEM-768 public (encapsulation) key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 1184;

/// ML-KEM-768 secret (decapsulation) key size in bytes.
pub const SECRET_KEY_SIZE: usize = 2400;

/// ML-KEM-768 ciphertext size in bytes.
pub const CIPHERTEXT_SIZE: usize = 1088;

/// ML-KEM-768 shared secret size in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Alice's public (encapsulation) key, sent to Bob as the primary handshake
/// blob for the secondary leg.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

/// Alice's secret (decapsulation) key. Never leaves Alice's side.
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct SecretKey([u8; SECRET_KEY_SIZE]);

/// The ciphertext Bob returns to Alice in place of a public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext([u8; CIPHERTEXT_SIZE]);

/// The shared secret recovered by either encapsulation (Bob) or
/// decapsulation (Alice).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl PublicKey {
    /// Parse a public key from its wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Raw wire encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Bob's half of the leg: encapsulate a fresh shared secret against this
    /// public key, returning the ciphertext to send back plus the secret to
    /// feed into the symmetric key pair derivation.
    pub fn encapsulate(&self) -> Result<(Ciphertext, SharedSecret), CryptoError> {
        type EkEncoded = Encoded<<MlKem768 as KemCore>::EncapsulationKey>;

        let ek_encoded =
            EkEncoded::try_from(&self.0[..]).map_err(|_| CryptoError::InvalidPublicKey)?;
        let ek = <MlKem768 as KemCore>::EncapsulationKey::from_bytes(&ek_encoded);

        let (ct, ss) = ek
            .encapsulate(&mut OsRng)
            .map_err(|_| CryptoError::EncapsulationFailed)?;

        let ct_bytes: [u8; CIPHERTEXT_SIZE] = ct
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::EncapsulationFailed)?;
        let ss_bytes: [u8; SHARED_SECRET_SIZE] = ss
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::EncapsulationFailed)?;

        Ok((Ciphertext(ct_bytes), SharedSecret(ss_bytes)))
    }
}

impl SecretKey {
    /// Alice's half of the leg: recover the shared secret Bob encapsulated.
    pub fn decapsulate(&self, ciphertext: &Ciphertext) -> Result<SharedSecret, CryptoError> {
        type DkEncoded = Encoded<<MlKem768 as KemCore>::DecapsulationKey>;
        type CtEncoded = ml_kem::Ciphertext<MlKem768>;

        let dk_encoded =
            DkEncoded::try_from(&self.0[..]).map_err(|_| CryptoError::InvalidSecretKey)?;
        let dk = <MlKem768 as KemCore>::DecapsulationKey::from_bytes(&dk_encoded);

        let ct_encoded =
            CtEncoded::try_from(&ciphertext.0[..]).map_err(|_| CryptoError::InvalidCiphertext)?;

        let ss = dk
            .decapsulate(&ct_encoded)
            .map_err(|_| CryptoError::DecapsulationFailed)?;

        let ss_bytes: [u8; SHARED_SECRET_SIZE] = ss
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecapsulationFailed)?;
        Ok(SharedSecret(ss_bytes))
    }
}

impl Ciphertext {
    /// Parse a ciphertext from its wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; CIPHERTEXT_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        Ok(Self(arr))
    }

    /// Raw wire encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CIPHERTEXT_SIZE] {
        &self.0
    }
}

impl SharedSecret {
    /// Raw bytes, fed into the primary/secondary symmetric key pair KDF.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

/// Alice's keypair for the KEM leg (generated fresh, or served from the
/// key-generation service's pregenerated cache per §4.2).
pub struct KeyPair {
    public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh ML-KEM-768 keypair.
    #[must_use]
    pub fn generate() -> Self {
        let (dk, ek) = MlKem768::generate(&mut OsRng);

        let mut pk_bytes = [0u8; PUBLIC_KEY_SIZE];
        pk_bytes.copy_from_slice(ek.as_bytes().as_slice());
        let mut sk_bytes = [0u8; SECRET_KEY_SIZE];
        sk_bytes.copy_from_slice(dk.as_bytes().as_slice());

        Self {
            public: PublicKey(pk_bytes),
            secret: SecretKey(sk_bytes),
        }
    }

    /// The public key to send as the primary handshake blob.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The secret key used to decapsulate Bob's returned ciphertext.
    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}
