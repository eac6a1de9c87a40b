//! Binary reader for bounds-checked parsing of byte slices.
//!
//! [`BinaryReader`] is a cursor over a borrowed slice. Every read checks the
//! remaining length first and fails with [`Error::UnexpectedEof`] instead of
//! panicking, so truncated archives surface as errors.

use zerocopy::FromBytes;

use crate::{Error, Result};

/// A little-endian reader over a byte slice.
///
/// # Example
///
/// ```
/// use rpf_common::BinaryReader;
///
/// let data = [0x37, 0x46, 0x50, 0x52, 0x00, 0x08, 0x00, 0x00];
/// let mut reader = BinaryReader::new(&data);
///
/// assert_eq!(reader.read_u32().unwrap(), 0x52504637);
/// assert_eq!(reader.read_u32().unwrap(), 2048);
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    /// Create a new reader from a byte slice.
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a new reader starting at a specific position.
    ///
    /// Fails if `position` lies past the end of `data`.
    #[inline]
    pub fn new_at(data: &'a [u8], position: usize) -> Result<Self> {
        if position > data.len() {
            return Err(Error::OutOfBounds {
                position,
                len: data.len(),
            });
        }
        Ok(Self { data, position })
    }

    /// Get the current position in the buffer.
    #[inline]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Get the total length of the underlying buffer.
    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Get the number of bytes remaining to read.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Check if there are no more bytes to read.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Get the remaining bytes as a slice.
    #[inline]
    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    /// Peek at bytes without advancing the position.
    #[inline]
    pub fn peek_bytes(&self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(Error::UnexpectedEof {
                needed: count,
                available: self.remaining(),
            });
        }
        Ok(&self.data[self.position..self.position + count])
    }

    /// Read bytes and advance the position.
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.peek_bytes(count)?;
        self.position += count;
        Ok(bytes)
    }

    /// Read a fixed-size array.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a little-endian u16.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array::<2>().map(u16::from_le_bytes)
    }

    /// Read a little-endian 24-bit integer into the low bits of a u32.
    #[inline]
    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_array::<3>()?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    /// Read a little-endian u32.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    /// Read a null-terminated UTF-8 string.
    pub fn read_cstring(&mut self) -> Result<&'a str> {
        let remaining = self.remaining_bytes();

        let null_pos = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MissingNullTerminator)?;

        let string_bytes = &remaining[..null_pos];
        self.position += null_pos + 1;

        std::str::from_utf8(string_bytes).map_err(Error::Utf8)
    }

    /// Read a struct using zerocopy.
    ///
    /// The struct must implement `FromBytes` from the zerocopy crate.
    #[inline]
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| Error::UnexpectedEof {
            needed: size,
            available: bytes.len(),
        })
    }

    /// Peek at a little-endian u32 without advancing.
    #[inline]
    pub fn peek_u32(&self) -> Result<u32> {
        let bytes = self.peek_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Expect specific magic bytes.
    pub fn expect_magic(&mut self, expected: &[u8]) -> Result<()> {
        let actual = self.read_bytes(expected.len())?;
        if actual != expected {
            return Err(Error::InvalidMagic {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [
            0x01u8, 0x02, 0x03, 0x04, // u32: 0x04030201
            0xFF, 0xFF, // u16
            0x10, 0x20, 0x30, // u24
        ];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_u32().unwrap(), 0x04030201);
        assert_eq!(reader.read_u16().unwrap(), 0xFFFF);
        assert_eq!(reader.read_u24().unwrap(), 0x302010);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_cstring() {
        let data = b"common.rpf\0x64\0";
        let mut reader = BinaryReader::new(data);

        assert_eq!(reader.read_cstring().unwrap(), "common.rpf");
        assert_eq!(reader.read_cstring().unwrap(), "x64");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_cstring_without_terminator() {
        let mut reader = BinaryReader::new(b"abc");
        assert!(matches!(
            reader.read_cstring(),
            Err(Error::MissingNullTerminator)
        ));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.peek_u32().unwrap(), 0x04030201);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u32().unwrap(), 0x04030201);
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_eof_error() {
        let data = [0x01, 0x02];
        let mut reader = BinaryReader::new(&data);

        match reader.read_u32() {
            Err(Error::UnexpectedEof { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected EOF, got {other:?}"),
        }
        // A failed read leaves the cursor in place.
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_new_at_bounds() {
        let data = [0u8; 4];
        assert!(BinaryReader::new_at(&data, 4).is_ok());
        assert!(matches!(
            BinaryReader::new_at(&data, 5),
            Err(Error::OutOfBounds { position: 5, len: 4 })
        ));
    }

    #[test]
    fn test_expect_magic() {
        let mut reader = BinaryReader::new(b"RPFKrest");
        reader.expect_magic(b"RPFK").unwrap();
        assert_eq!(reader.remaining(), 4);

        let mut reader = BinaryReader::new(b"XXXX");
        assert!(reader.expect_magic(b"RPFK").is_err());
    }
}
