//! CRC32C checksum helpers.
//!
//! Used to detect torn or corrupted cache blobs before their contents are
//! trusted for decryption.

/// Compute the CRC32C checksum of a byte slice.
///
/// Uses hardware acceleration when available (SSE4.2 on x86).
#[inline]
pub fn checksum(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Check `data` against an expected checksum.
#[inline]
pub fn verify(data: &[u8], expected: u32) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_checksum() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_verify_detects_flip() {
        let sum = checksum(b"key material");
        assert!(verify(b"key material", sum));
        assert!(!verify(b"key materiaL", sum));
    }
}
