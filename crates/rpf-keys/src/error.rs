//! Error types for key derivation and the key cache.

use thiserror::Error;

use crate::KeyStructure;

/// Errors that can occur while deriving, loading or storing key material.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] rpf_common::Error),

    /// Signature document could not be parsed.
    #[error("invalid signature document: {0}")]
    Json(#[from] serde_json::Error),

    /// A structure's byte signature does not occur in the executable image.
    #[error("signature for {0} not found in executable image")]
    SignatureNotFound(KeyStructure),

    /// A structure was located but does not fit in the image.
    #[error("{structure} truncated: needed {needed} bytes, {available} available")]
    TruncatedTable {
        structure: KeyStructure,
        needed: usize,
        available: usize,
    },

    /// Key material does not have the shape the layout requires.
    #[error("invalid key layout: {0}")]
    InvalidLayout(String),

    /// Cache blob is structurally invalid.
    #[error("invalid key cache: {0}")]
    InvalidCache(String),

    /// Cache blob checksum mismatch.
    #[error("key cache checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl Error {
    /// Whether this error came from scanning the executable.
    pub fn is_derivation_error(&self) -> bool {
        matches!(
            self,
            Error::SignatureNotFound(_) | Error::TruncatedTable { .. }
        )
    }
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, Error>;
