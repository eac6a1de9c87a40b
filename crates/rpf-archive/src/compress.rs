//! Raw DEFLATE compression for entry payloads.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::{Error, Result};

/// Upper bound on how far DEFLATE can expand its input.
const MAX_INFLATE_RATIO: usize = 1032;

/// Inflate `data`, which must expand to exactly `expected_size` bytes.
///
/// The declared size only bounds the work: the buffer grows with the actual
/// output, and inflation stops one byte past `expected_size`.
pub fn decompress_sized(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let capacity = expected_size.min(data.len().saturating_mul(MAX_INFLATE_RATIO));
    let mut output = Vec::with_capacity(capacity);
    DeflateDecoder::new(data)
        .take(expected_size as u64 + 1)
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    if output.len() > expected_size {
        return Err(Error::Decompression(format!(
            "inflated size mismatch: expected {expected_size}, got more"
        )));
    }
    if output.len() != expected_size {
        return Err(Error::Decompression(format!(
            "inflated size mismatch: expected {}, got {}",
            expected_size,
            output.len()
        )));
    }

    Ok(output)
}

/// Deflate `data` at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_roundtrip() {
        let original = b"common:/data/levels/gta5/vehicles.meta common:/data/levels/gta5/peds.meta";

        let compressed = compress(original).unwrap();
        let decompressed = decompress_sized(&compressed, original.len()).unwrap();

        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_size_mismatch() {
        let compressed = compress(b"sixteen bytes!!!").unwrap();
        assert!(matches!(
            decompress_sized(&compressed, 15),
            Err(Error::Decompression(_))
        ));
    }

    #[test]
    fn test_declared_size_does_not_drive_allocation() {
        let compressed = compress(b"tiny").unwrap();
        let err = decompress_sized(&compressed, u32::MAX as usize).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
    }

    #[test]
    fn test_output_beyond_declared_size_stops_early() {
        let compressed = compress(&vec![0u8; 1 << 20]).unwrap();
        match decompress_sized(&compressed, 10) {
            Err(Error::Decompression(message)) => assert!(message.contains("got more")),
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_input() {
        assert!(decompress_sized(&[0xFF; 8], 100).is_err());
    }
}
