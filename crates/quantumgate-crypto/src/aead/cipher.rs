//! `XChaCha20-Poly1305` AEAD primitives.
//!
//! Provides authenticated encryption with associated data using
//! `XChaCha20-Poly1305`:
//! - 256-bit keys
//! - 192-bit random nonces (safe to generate at random per message)
//! - 128-bit authentication tags
//! - Key-committing encryption: the key's commitment is mixed into the AAD so
//!   that a ciphertext cannot be reinterpreted as valid under a different key

use crate::CryptoError;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AEAD key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// AEAD authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Key-commitment prefix size mixed into the AAD.
const COMMITMENT_SIZE: usize = 32;

/// `XChaCha20-Poly1305` symmetric key.
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct AeadKey([u8; KEY_SIZE]);

/// `XChaCha20-Poly1305` nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

/// Authentication tag, kept around for callers that split ciphertext/tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag([u8; TAG_SIZE]);

impl AeadKey {
    /// Generate a random key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Commitment derived from this key: BLAKE3 keyed hash of a fixed label,
    /// mixed into the AAD so ciphertexts don't verify under any other key.
    #[must_use]
    pub fn commitment(&self) -> [u8; COMMITMENT_SIZE] {
        crate::hash::Kdf::new("quantumgate-key-commitment").derive_key(&self.0)
    }
}

impl Nonce {
    /// Generate a random nonce.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive a nonce from a seed and a hash algorithm tag, per the transport
    /// frame's nonce-seed convention: the seed is expanded with the session's
    /// hash to fill the nonce.
    #[must_use]
    pub fn from_seed(seed: u32, context: &[u8]) -> Self {
        let mut ikm = Vec::with_capacity(4 + context.len());
        ikm.extend_from_slice(&seed.to_le_bytes());
        ikm.extend_from_slice(context);
        let mut bytes = [0u8; NONCE_SIZE];
        crate::hash::hkdf_expand(&crate::hash::hash(&ikm), b"quantumgate-nonce", &mut bytes);
        Self(bytes)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl Tag {
    /// Raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

/// Stateless `XChaCha20-Poly1305` cipher bound to a single key.
pub struct AeadCipher {
    cipher: XChaCha20Poly1305,
    key: AeadKey,
}

impl AeadCipher {
    /// Build a cipher from a key.
    #[must_use]
    pub fn new(key: AeadKey) -> Self {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
        Self { cipher, key }
    }

    /// Encrypt `plaintext` with the given nonce and additional data, binding
    /// the key commitment into the AAD.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the underlying cipher
    /// rejects the operation (only possible on plaintexts exceeding the
    /// cipher's internal limits).
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut full_aad = Vec::with_capacity(COMMITMENT_SIZE + aad.len());
        full_aad.extend_from_slice(&self.key.commitment());
        full_aad.extend_from_slice(aad);

        self.cipher
            .encrypt(
                XNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad: &full_aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt `ciphertext` (including its trailing tag) with the given
    /// nonce and additional data.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if authentication fails —
    /// either the key, nonce, AAD, or ciphertext don't match.
    pub fn decrypt(
        &self,
        nonce: &Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut full_aad = Vec::with_capacity(COMMITMENT_SIZE + aad.len());
        full_aad.extend_from_slice(&self.key.commitment());
        full_aad.extend_from_slice(aad);

        self.cipher
            .decrypt(
                XNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad: &full_aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
