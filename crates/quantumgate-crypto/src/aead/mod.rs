//! `XChaCha20-Poly1305` AEAD encryption.
//!
//! Provides authenticated encryption with associated data (AEAD) using
//! `XChaCha20-Poly1305`. Features include:
//! - 256-bit keys
//! - 192-bit nonces (extended nonce for safe random generation)
//! - 128-bit authentication tags
//! - Associated data authentication
//! - In-place encryption/decryption for zero-copy operations
//!
//! ## Security Properties
//!
//! - Confidentiality: `XChaCha20` stream cipher
//! - Integrity: Poly1305 MAC with 128-bit security
//! - Nonce misuse: 192-bit nonce makes random collisions negligible; the
//!   transport frame derives its nonce from a per-frame random seed rather
//!   than a counter, so duplicate nonces are astronomically unlikely
//!
//! ## Module Organization
//!
//! - [`cipher`] - Core AEAD types (Nonce, Tag, AeadKey, AeadCipher)
//! - [`replay`] - Replay protection with sliding window, keyed by the
//!   transport frame's `u8` message counter once activated (§4.3)
//!
//! ## Usage
//!
//! ```ignore
//! use quantumgate_crypto::aead::{AeadKey, AeadCipher, Nonce};
//!
//! let key = AeadKey::generate(&mut OsRng);
//! let nonce = Nonce::from_seed(seed, b"context");
//!
//! let ciphertext = key.encrypt(&nonce, b"secret", b"aad")?;
//! let plaintext = key.decrypt(&nonce, &ciphertext, b"aad")?;
//! ```

pub mod cipher;
pub mod replay;

pub use cipher::{AeadCipher, AeadKey, KEY_SIZE, NONCE_SIZE, Nonce, TAG_SIZE, Tag};
pub use replay::ReplayProtection;
