//! RPF - packed resource archive codec.
//!
//! This crate provides a unified interface to the RPF crates.
//!
//! # Crates
//!
//! - [`rpf_common`] - Common utilities (binary reading, CRC32C)
//! - [`rpf_keys`] - Key material derivation from the game executable and its cache
//! - [`rpf_archive`] - Archive header, table of contents, payload crypto and the archive handle
//!
//! # Example
//!
//! ```no_run
//! use rpf::prelude::*;
//!
//! let keys = KeyCache::in_dir("profile").load()?;
//!
//! let mut archive = RpfArchive::open("update.rpf")?;
//! if let Some(keys) = keys {
//!     archive.set_keys(keys);
//! }
//! let data = archive.read("common/data/levels/gta5/vehicles.meta")?;
//! println!("{} bytes", data.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use rpf_archive as archive;
pub use rpf_common as common;
pub use rpf_keys as keys;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use rpf_archive::{
        ArchiveHeader, ArchiveVersion, DirectoryEntry, DirectoryNode, EncryptionMode, FileEntry,
        InsertOptions, RpfArchive,
    };
    pub use rpf_common::{crc, BinaryReader};
    pub use rpf_keys::{KeyCache, KeyMaterial, KeySignatures};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
