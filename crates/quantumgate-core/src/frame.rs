//! Message transport framing (§4.3, §6): the outermost on-wire unit.
//!
//! Pre-encryption layout, in order: a variable-length random prefix (its
//! length was communicated by the *previous* frame, or derived from the
//! Global Shared Secret for the very first frame, §4.8), the fixed header,
//! then the AEAD-encrypted payload (a concatenation of inner messages).
//!
//! Uses a builder-pattern encode/decode split with a `Peek`-before-`extract`
//! discipline: a length prefix is peeked off a receive buffer before
//! committing to a full parse. The header fields themselves come from
//! §4.3, independent of any QUIC-shaped frame type.

use quantumgate_crypto::aead::{AeadCipher, Nonce};

use crate::error::PeerError;

/// Fixed header size in bytes: `nonce_seed(4) + counter(1) +
/// current_random_prefix_length(2) + next_random_prefix_length(2) +
/// system_time(8) + data_size(4)`.
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 2 + 2 + 8 + 4;

/// The result of peeking at a receive buffer to see whether a complete
/// frame is available yet (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekResult {
    /// A complete frame (random prefix + header + payload) is buffered;
    /// carries its total on-wire length.
    CompleteMessage(usize),
    /// Not enough bytes buffered yet.
    Incomplete,
    /// The claimed data size exceeds any sane bound: a fatal protocol
    /// violation, not a buffering condition.
    TooMuchData,
}

/// Sanity bound on a single frame's encrypted payload, independent of the
/// per-session data-size offset/XOR derivation (§4.3); real payloads are far
/// smaller but a forged header must not be allowed to claim gigabytes.
pub const MAX_FRAME_DATA_SIZE: u32 = 16 * 1024 * 1024;

/// The fixed frame header (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Seeds nonce derivation for this frame's AEAD operation.
    pub nonce_seed: u32,
    /// Rolling message counter; ignored (treated as 0) until the session
    /// has activated counters at `SessionInit`.
    pub counter: u8,
    /// Length of the random prefix that preceded *this* frame's header.
    pub current_random_prefix_length: u16,
    /// Length of the random prefix the sender will use on the *next*
    /// frame it sends.
    pub next_random_prefix_length: u16,
    /// Milliseconds since the Unix epoch when this frame was sent.
    pub system_time_ms: i64,
    /// Encrypted payload length in bytes.
    pub data_size: u32,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.nonce_seed.to_le_bytes());
        out[4] = self.counter;
        out[5..7].copy_from_slice(&self.current_random_prefix_length.to_le_bytes());
        out[7..9].copy_from_slice(&self.next_random_prefix_length.to_le_bytes());
        out[9..17].copy_from_slice(&self.system_time_ms.to_le_bytes());
        out[17..21].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            nonce_seed: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            counter: bytes[4],
            current_random_prefix_length: u16::from_le_bytes(bytes[5..7].try_into().unwrap()),
            next_random_prefix_length: u16::from_le_bytes(bytes[7..9].try_into().unwrap()),
            system_time_ms: i64::from_le_bytes(bytes[9..17].try_into().unwrap()),
            data_size: u32::from_le_bytes(bytes[17..21].try_into().unwrap()),
        }
    }
}

/// A decoded transport frame: header plus still-encrypted payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The fixed header.
    pub header: FrameHeader,
    /// The AEAD-encrypted payload (concatenated inner messages once
    /// decrypted).
    pub ciphertext: Vec<u8>,
}

/// Look at the front of `buf` (which begins right after `current_random_prefix_length`
/// bytes of random prefix have already been skipped by the caller) and
/// determine whether a complete frame is available.
#[must_use]
pub fn peek(buf: &[u8]) -> PeekResult {
    if buf.len() < FRAME_HEADER_SIZE {
        return PeekResult::Incomplete;
    }
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    header_bytes.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::decode(&header_bytes);
    if header.data_size > MAX_FRAME_DATA_SIZE {
        return PeekResult::TooMuchData;
    }
    let total = FRAME_HEADER_SIZE + header.data_size as usize;
    if buf.len() < total {
        PeekResult::Incomplete
    } else {
        PeekResult::CompleteMessage(total)
    }
}

/// Extract one complete frame from the front of `buf` (random prefix
/// already stripped by the caller using the previous frame's
/// `next_random_prefix_length`). Returns the frame and the number of bytes
/// consumed (`FRAME_HEADER_SIZE + data_size`).
pub fn extract(buf: &[u8]) -> Result<(Frame, usize), PeerError> {
    match peek(buf) {
        PeekResult::Incomplete => Err(PeerError::Recoverable("frame incomplete".into())),
        PeekResult::TooMuchData => Err(PeerError::TooMuchData("frame data_size exceeds bound".into())),
        PeekResult::CompleteMessage(total) => {
            let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
            header_bytes.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
            let header = FrameHeader::decode(&header_bytes);
            let ciphertext = buf[FRAME_HEADER_SIZE..total].to_vec();
            Ok((Frame { header, ciphertext }, total))
        }
    }
}

/// Build the random prefix plus header plus ciphertext for one outbound
/// frame, encrypting `payload` with `cipher` under a nonce derived from
/// `nonce_seed` (§4.3: "derive the nonce from `nonce_seed` and key's hash
/// algorithm").
pub fn encode(
    cipher: &AeadCipher,
    nonce_seed: u32,
    counter: u8,
    current_random_prefix_length: u16,
    next_random_prefix_length: u16,
    system_time_ms: i64,
    payload: &[u8],
    random_prefix: &[u8],
) -> Result<Vec<u8>, PeerError> {
    let nonce = Nonce::from_seed(nonce_seed, b"quantumgate-transport-frame");
    let header = FrameHeader {
        nonce_seed,
        counter,
        current_random_prefix_length,
        next_random_prefix_length,
        system_time_ms,
        data_size: 0,
    };
    let aad = header.encode();
    let ciphertext = cipher.encrypt(&nonce, payload, &aad)?;

    let mut final_header = header;
    final_header.data_size = ciphertext.len() as u32;

    let mut out = Vec::with_capacity(random_prefix.len() + FRAME_HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(random_prefix);
    out.extend_from_slice(&final_header.encode());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a [`Frame`]'s ciphertext with `cipher`, using the same
/// AAD-binding discipline `encode` used (the header, with `data_size`
/// recomputed to match the actual ciphertext length fed to the AEAD).
pub fn decrypt(cipher: &AeadCipher, frame: &Frame) -> Result<Vec<u8>, PeerError> {
    let nonce = Nonce::from_seed(frame.header.nonce_seed, b"quantumgate-transport-frame");
    let mut aad_header = frame.header;
    aad_header.data_size = 0;
    let aad = aad_header.encode();
    Ok(cipher.decrypt(&nonce, &frame.ciphertext, &aad)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantumgate_crypto::aead::AeadKey;
    use rand_core::OsRng;

    fn cipher() -> AeadCipher {
        AeadCipher::new(AeadKey::generate(&mut OsRng))
    }

    #[test]
    fn encode_then_peek_then_extract_then_decrypt_roundtrips() {
        let cipher = cipher();
        let payload = b"concatenated inner messages";
        let wire = encode(&cipher, 0xDEAD_BEEF, 0, 0, 12, 1_700_000_000_000, payload, &[]).unwrap();

        assert_eq!(peek(&wire), PeekResult::CompleteMessage(wire.len()));

        let (frame, consumed) = extract(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.header.nonce_seed, 0xDEAD_BEEF);
        assert_eq!(frame.header.next_random_prefix_length, 12);

        let decrypted = decrypt(&cipher, &frame).unwrap();
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn peek_reports_incomplete_on_truncated_buffer() {
        let cipher = cipher();
        let wire = encode(&cipher, 1, 0, 0, 0, 0, b"hello", &[]).unwrap();
        assert_eq!(peek(&wire[..FRAME_HEADER_SIZE - 1]), PeekResult::Incomplete);
        assert_eq!(peek(&wire[..wire.len() - 1]), PeekResult::Incomplete);
    }

    #[test]
    fn peek_rejects_absurd_data_size_claim() {
        let mut header = FrameHeader {
            nonce_seed: 0,
            counter: 0,
            current_random_prefix_length: 0,
            next_random_prefix_length: 0,
            system_time_ms: 0,
            data_size: MAX_FRAME_DATA_SIZE + 1,
        };
        let bytes = header.encode();
        assert_eq!(peek(&bytes), PeekResult::TooMuchData);
        header.data_size = 0;
        let _ = header.encode();
    }

    #[test]
    fn decryption_fails_under_wrong_key() {
        let cipher_a = cipher();
        let cipher_b = cipher();
        let wire = encode(&cipher_a, 7, 0, 0, 0, 0, b"secret", &[]).unwrap();
        let (frame, _) = extract(&wire).unwrap();
        assert!(decrypt(&cipher_b, &frame).is_err());
    }

    #[test]
    fn random_prefix_is_carried_but_not_part_of_the_frame_length() {
        let cipher = cipher();
        let prefix = [0xAAu8; 8];
        let wire = encode(&cipher, 1, 0, 8, 0, 0, b"x", &prefix).unwrap();
        assert_eq!(peek(&wire[prefix.len()..]), PeekResult::CompleteMessage(wire.len() - prefix.len()));
    }
}
