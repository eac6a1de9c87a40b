//! Error types for rpf-common.

use thiserror::Error;

/// Common error type for low-level reads.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// Invalid magic bytes encountered.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// Read position lies outside the buffer.
    #[error("position {position} is outside a buffer of {len} bytes")]
    OutOfBounds { position: usize, len: usize },

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Missing null terminator in string.
    #[error("string missing null terminator")]
    MissingNullTerminator,
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
