//! Symmetric key set (§3, §4.2, §4.5): an ordered, newest-first collection
//! of directional key pairs with grace-period expiration.
//!
//! Uses a small, bounded `VecDeque`-backed collection rather than a plain
//! `Vec`, with a "most recent pair tried first" ordering invariant instead
//! of a FIFO.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use quantumgate_crypto::aead::AeadKey;

/// At most this many symmetric key pairs are retained per direction set
/// (§3: `MaxNumSymmetricKeyPairs`).
pub const MAX_SYMMETRIC_KEY_PAIRS: usize = 4;

/// How long an expired key pair remains valid for decryption, to absorb
/// frames already in flight when a key update completes (§4.5).
pub const EXPIRATION_GRACE_PERIOD: Duration = Duration::from_secs(120);

/// One directional sub-key: a derived AEAD key plus bookkeeping
/// (`NumBytesProcessed` drives the key-update byte-count trigger).
#[derive(Clone)]
pub struct DirectionalKey {
    key: AeadKey,
    bytes_processed: u64,
}

impl DirectionalKey {
    /// Wrap a derived key with a fresh byte counter.
    #[must_use]
    pub fn new(key: AeadKey) -> Self {
        Self { key, bytes_processed: 0 }
    }

    /// The underlying AEAD key.
    #[must_use]
    pub fn key(&self) -> &AeadKey {
        &self.key
    }

    /// Bytes processed (encrypted or decrypted) with this sub-key so far.
    #[must_use]
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Account for `n` bytes just processed with this sub-key.
    pub fn record_bytes(&mut self, n: u64) {
        self.bytes_processed = self.bytes_processed.saturating_add(n);
    }
}

/// A symmetric key pair as installed by the primary or secondary leg, or by
/// a completed key update (§3).
#[derive(Clone)]
pub struct SymmetricKeyPair {
    encryption: Option<DirectionalKey>,
    decryption: Option<DirectionalKey>,
    installed_at: Instant,
    expires_at: Option<Instant>,
}

impl SymmetricKeyPair {
    /// A pair usable for both directions immediately (the GSS-primed pair,
    /// or a freshly completed leg once both sides have switched over).
    #[must_use]
    pub fn bidirectional(key: AeadKey) -> Self {
        Self {
            encryption: Some(DirectionalKey::new(key.clone())),
            decryption: Some(DirectionalKey::new(key)),
            installed_at: Instant::now(),
            expires_at: None,
        }
    }

    /// A pair installed decrypt-only, as Bob does while waiting for Alice to
    /// start encrypting with it (§4.2).
    #[must_use]
    pub fn decrypt_only(key: AeadKey) -> Self {
        Self {
            encryption: None,
            decryption: Some(DirectionalKey::new(key)),
            installed_at: Instant::now(),
            expires_at: None,
        }
    }

    /// Start using this pair for encryption too (the point at which Alice,
    /// or later Bob, "starts using the primary pair for encryption").
    pub fn enable_encryption(&mut self) {
        if self.encryption.is_none() {
            if let Some(dec) = &self.decryption {
                self.encryption = Some(DirectionalKey::new(dec.key().clone()));
            }
        }
    }

    /// Mark this pair expired as of now; it remains usable for decryption
    /// until [`EXPIRATION_GRACE_PERIOD`] elapses.
    pub fn expire(&mut self) {
        self.expires_at = Some(Instant::now() + EXPIRATION_GRACE_PERIOD);
        self.encryption = None;
    }

    /// Whether the grace period (if any) has elapsed and this pair should be
    /// dropped entirely.
    #[must_use]
    pub fn is_past_grace_period(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// The encryption sub-key, if this pair currently has one.
    #[must_use]
    pub fn encryption(&self) -> Option<&DirectionalKey> {
        self.encryption.as_ref()
    }

    /// The decryption sub-key, if this pair currently has one (it always
    /// does, except for a brief window during construction).
    #[must_use]
    pub fn decryption(&self) -> Option<&DirectionalKey> {
        self.decryption.as_ref()
    }

    /// Mutable access to the decryption sub-key, to record processed bytes.
    pub fn decryption_mut(&mut self) -> Option<&mut DirectionalKey> {
        self.decryption.as_mut()
    }

    /// Mutable access to the encryption sub-key.
    pub fn encryption_mut(&mut self) -> Option<&mut DirectionalKey> {
        self.encryption.as_mut()
    }

    /// When this pair was installed.
    #[must_use]
    pub fn installed_at(&self) -> Instant {
        self.installed_at
    }
}

/// Ordered, newest-first collection of symmetric key pairs for one peer
/// session (§3). Encryption always uses index 0 (the newest); decryption
/// tries index 0, then 1, ... until one succeeds or the set is exhausted.
#[derive(Default, Clone)]
pub struct SymmetricKeySet {
    pairs: VecDeque<SymmetricKeyPair>,
}

impl SymmetricKeySet {
    /// An empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: VecDeque::new() }
    }

    /// Insert a newly installed pair at the front (newest), evicting the
    /// oldest pair if [`MAX_SYMMETRIC_KEY_PAIRS`] would be exceeded.
    pub fn install(&mut self, pair: SymmetricKeyPair) {
        self.pairs.push_front(pair);
        while self.pairs.len() > MAX_SYMMETRIC_KEY_PAIRS {
            self.pairs.pop_back();
        }
    }

    /// The current pair used for encryption: the newest pair that has an
    /// encryption sub-key installed.
    #[must_use]
    pub fn current_encryption_pair(&self) -> Option<&SymmetricKeyPair> {
        self.pairs.iter().find(|p| p.encryption().is_some())
    }

    /// Mutable access to the current encryption pair.
    pub fn current_encryption_pair_mut(&mut self) -> Option<&mut SymmetricKeyPair> {
        self.pairs.iter_mut().find(|p| p.encryption.is_some())
    }

    /// Candidate pairs for decryption, newest first, as the receive path
    /// iterates them (§4.3).
    pub fn decryption_candidates(&mut self) -> impl Iterator<Item = &mut SymmetricKeyPair> {
        self.pairs.iter_mut().filter(|p| p.decryption.is_some())
    }

    /// Expire every pair except the newest (used after a completed key
    /// update, §4.5).
    pub fn expire_all_but_newest(&mut self) {
        for pair in self.pairs.iter_mut().skip(1) {
            pair.expire();
        }
    }

    /// Drop pairs whose grace period has fully elapsed.
    pub fn sweep_expired(&mut self) {
        self.pairs.retain(|p| !p.is_past_grace_period());
    }

    /// How many pairs are currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the set holds no pairs at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
