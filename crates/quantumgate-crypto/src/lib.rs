//! # QuantumGate Crypto
//!
//! Cryptographic primitives for the QuantumGate peer session subsystem.
//!
//! This crate provides the leaf-level algorithms the core protocol composes:
//! - X25519 for the primary (DH-style) key exchange leg
//! - ML-KEM-768 for the secondary (KEM-style) key exchange leg
//! - `XChaCha20-Poly1305` AEAD for transport frame encryption
//! - BLAKE3 hashing and HKDF-style key derivation
//! - Ed25519 signatures for peer authentication
//! - Zstandard compression for inner message payloads
//! - Secure random number generation
//!
//! Algorithm *selection* (which hash/asymmetric/symmetric/compression tag a
//! session actually negotiates) lives one layer up, in `quantumgate-core`;
//! this crate only implements the primitives behind each tag.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod compress;
pub mod constant_time;
pub mod dh;
pub mod error;
pub mod hash;
pub mod kem;
pub mod random;
pub mod signatures;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// `XChaCha20-Poly1305` key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// `XChaCha20-Poly1305` nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 secret key size
pub const ED25519_SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;
