//! Fuzz target for AEAD encrypt/decrypt operations (§4.3, §7).
//!
//! Tests that `AeadCipher` correctly handles arbitrary input without
//! panicking, and that a successful encryption always decrypts back under
//! the same key/nonce/AAD.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quantumgate_crypto::aead::{AeadCipher, AeadKey, Nonce};

#[derive(Debug, Arbitrary)]
struct CryptoInput {
    key: [u8; 32],
    nonce_seed: u32,
    plaintext: Vec<u8>,
    aad: Vec<u8>,
}

fuzz_target!(|input: CryptoInput| {
    let cipher = AeadCipher::new(AeadKey::from_bytes(input.key));
    let nonce = Nonce::from_seed(input.nonce_seed, b"fuzz-crypto");

    // Fuzz encryption - should never panic.
    if let Ok(ciphertext) = cipher.encrypt(&nonce, &input.plaintext, &input.aad) {
        // A ciphertext produced under these exact params must decrypt back.
        let decrypted = cipher
            .decrypt(&nonce, &ciphertext, &input.aad)
            .expect("roundtrip decrypt must succeed");
        assert_eq!(decrypted, input.plaintext);
    }

    // Fuzz decryption with arbitrary (likely invalid) ciphertext - never panics.
    let _ = cipher.decrypt(&nonce, &input.plaintext, &input.aad);
});
