//! Zstandard compression for inner message payloads (§4.4, `COMPRESSION`
//! algorithm category).

use crate::error::CryptoError;

/// Default zstd compression level. Matches zstd's own default; favors
/// speed over ratio since this runs on every outbound fragment.
const DEFAULT_LEVEL: i32 = 3;

/// Compress `data` with zstd at [`DEFAULT_LEVEL`].
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    zstd::stream::encode_all(data, DEFAULT_LEVEL).map_err(|_| CryptoError::CompressionFailed)
}

/// Decompress a zstd frame produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    zstd::stream::decode_all(data).map_err(|_| CryptoError::DecompressionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_data() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(32);
        let compressed = compress(&data).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn round_trips_empty_data() {
        let compressed = compress(&[]).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_corrupt_stream() {
        assert!(decompress(b"not a zstd frame").is_err());
    }
}
