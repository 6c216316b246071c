//! Per-file DEFLATE compression for package payloads
//!
//! Stateless, reversible byte compression. Applied before encryption
//! (ciphertext is incompressible) and after hashing (the content hash
//! always covers the original plaintext); the builder and loader enforce
//! that ordering.

use crate::error::{PackageError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress bytes as a raw DEFLATE stream
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PackageError::Compression(format!("deflate encode failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PackageError::Compression(format!("deflate encode failed: {}", e)))
}

/// Upper bound on the upfront output reservation. The index's original
/// size is untrusted input; allocation grows past this only as real
/// decompressed bytes arrive.
const PREALLOC_CAP: usize = 16 * 1024 * 1024;

/// Decompress a raw DEFLATE stream.
///
/// `expected_len` is the original plaintext size stored in the index; it
/// bounds both the output buffer and how far the stream is decoded. A
/// length mismatch means the stored payload does not match its entry, and
/// a stream that would expand past `expected_len` is cut off rather than
/// decoded in full.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len.min(PREALLOC_CAP));
    let mut decoder = DeflateDecoder::new(data).take((expected_len as u64).saturating_add(1));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PackageError::Compression(format!("deflate decode failed: {}", e)))?;

    if out.len() != expected_len {
        return Err(PackageError::Compression(format!(
            "decompressed size mismatch: expected {}, got {}",
            expected_len,
            out.len()
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"Hello, World! ".repeat(100);
        let compressed = compress(&data).unwrap();
        let decompressed = decompress(&compressed, data.len()).unwrap();

        assert_eq!(data.as_slice(), decompressed.as_slice());
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn test_empty_input() {
        let compressed = compress(b"").unwrap();
        let decompressed = decompress(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data = vec![b'A'; 1000];
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < 1000);
        assert_eq!(decompress(&compressed, 1000).unwrap(), data);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let compressed = compress(b"twelve bytes").unwrap();
        assert!(matches!(
            decompress(&compressed, 5),
            Err(PackageError::Compression(_))
        ));
    }

    #[test]
    fn test_absurd_expected_len_errors_without_panicking() {
        // An index orig_size of u64::MAX must surface as an error, not a
        // capacity-overflow panic or a giant allocation.
        let compressed = compress(b"tiny").unwrap();
        assert!(matches!(
            decompress(&compressed, usize::MAX),
            Err(PackageError::Compression(_))
        ));
    }

    #[test]
    fn test_overlong_stream_cut_off() {
        let data = vec![b'A'; 4096];
        let compressed = compress(&data).unwrap();
        assert!(matches!(
            decompress(&compressed, 10),
            Err(PackageError::Compression(_))
        ));
    }

    #[test]
    fn test_garbage_input_rejected() {
        assert!(matches!(
            decompress(&[0xFF, 0xFE, 0xFD, 0x00, 0x01], 100),
            Err(PackageError::Compression(_))
        ));
    }
}
