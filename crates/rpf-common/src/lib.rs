//! Common utilities shared by the RPF crates.
//!
//! - [`BinaryReader`] - bounds-checked little-endian reading from byte slices
//! - [`crc`] - CRC32C checksums used by on-disk caches

mod error;
mod reader;

pub mod crc;

pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
