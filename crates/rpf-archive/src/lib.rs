//! RPF packed archive reader and writer.
//!
//! An archive is a small header, a table of contents describing a tree of
//! directories and files, then the file payloads on 512-byte blocks.
//! Payloads may be deflated and, depending on the archive's encryption mode,
//! encrypted together with the table of contents.
//!
//! # Example
//!
//! ```no_run
//! use rpf_archive::RpfArchive;
//!
//! let mut archive = RpfArchive::open("update.rpf")?;
//! for (path, entry) in archive.files()? {
//!     println!("{} ({} bytes)", path, entry.uncompressed_size);
//! }
//! # Ok::<(), rpf_archive::Error>(())
//! ```

mod archive;
mod encryption;
mod error;
mod header;

pub mod compress;
pub mod crypto;
pub mod toc;

pub use archive::{InsertOptions, RpfArchive};
pub use encryption::EncryptionMode;
pub use error::{Error, Result};
pub use header::{ArchiveHeader, ArchiveVersion};
pub use toc::{DirectoryEntry, DirectoryNode, FileEntry};
