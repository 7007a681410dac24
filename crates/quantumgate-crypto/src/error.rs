//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Invalid signature encoding or verification failure
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key encoding
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Invalid secret/private key encoding
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Invalid ciphertext encoding (KEM)
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// KEM encapsulation failed
    #[error("key encapsulation failed")]
    EncapsulationFailed,

    /// KEM decapsulation failed
    #[error("key decapsulation failed")]
    DecapsulationFailed,

    /// Key not encodable with Elligator2
    #[error("key not encodable with Elligator2")]
    NotEncodable,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce overflow (counter exhausted)
    #[error("nonce counter exhausted, rekey required")]
    NonceOverflow,

    /// Handshake data rejected: all-zero, all-one, or empty (§4.7)
    #[error("handshake data failed non-triviality check")]
    TrivialHandshakeData,

    /// Compression failed
    #[error("compression failed")]
    CompressionFailed,

    /// Decompression failed (corrupt or truncated stream)
    #[error("decompression failed")]
    DecompressionFailed,
}
