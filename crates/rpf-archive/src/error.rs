//! Error types for the RPF archive crate.

use thiserror::Error;

use crate::EncryptionMode;

/// Errors that can occur when working with RPF archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] rpf_common::Error),

    /// Key material error.
    #[error("{0}")]
    Keys(#[from] rpf_keys::Error),

    /// Not enough bytes for the header the version calls for.
    #[error("archive header truncated: needed {needed} bytes, got {available}")]
    TruncatedHeader { needed: usize, available: usize },

    /// Archive magic is not a known version.
    #[error("unsupported archive version: {0:#010x}")]
    UnsupportedVersion(u32),

    /// The header announces more table of contents than the file holds.
    #[error("table of contents size mismatch: header announces {announced} bytes, {available} available")]
    TocSizeMismatch { announced: u64, available: u64 },

    /// The table of contents is malformed.
    #[error("invalid table of contents: {0}")]
    InvalidToc(String),

    /// A value does not fit in its on-disk field.
    #[error("{field} overflow: {value} exceeds {max}")]
    Overflow {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// Entry kind the codec does not handle.
    #[error("unsupported entry: {0}")]
    UnsupportedEntry(String),

    /// Encryption mode cannot be produced.
    #[error("writing {0:?} encrypted archives is not supported")]
    UnsupportedEncryption(EncryptionMode),

    /// Decryption needs key material that was not supplied.
    #[error("no key material for {0:?} encryption")]
    MissingKeys(EncryptionMode),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Compression error.
    #[error("compression error: {0}")]
    Compression(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A name is already used in its directory.
    #[error("duplicate entry name: {0}")]
    DuplicateEntry(String),

    /// Path is empty or otherwise unusable.
    #[error("invalid entry path: {0:?}")]
    InvalidPath(String),
}

impl Error {
    /// Whether this is a malformed-bytes error rather than I/O or key trouble.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::TruncatedHeader { .. }
                | Error::TocSizeMismatch { .. }
                | Error::InvalidToc(_)
                | Error::Common(_)
        )
    }
}

/// Result type for RPF operations.
pub type Result<T> = std::result::Result<T, Error>;
