//! Key material for encrypted RPF archives.
//!
//! Encrypted archives need an AES key, a set of per-title "NG" keys, the NG
//! decryption tables and a hash lookup table. None of these ship with this
//! crate: they are located inside the game executable by byte signature
//! ([`derive`]) and cached per profile ([`KeyCache`]) so the scan runs once
//! per installation.
//!
//! # Example
//!
//! ```no_run
//! use rpf_keys::{KeyCache, KeySignatures};
//!
//! let signatures = KeySignatures::from_json_file("signatures.json")?;
//! let cache = KeyCache::in_dir("profiles/default");
//!
//! let keys = cache.load_or_derive(
//!     || rpf_keys::map_executable("GTA5.exe"),
//!     &signatures,
//!     |status| println!("{status}"),
//! )?;
//! println!("{} NG keys", keys.ng_keys.len());
//! # Ok::<(), rpf_keys::Error>(())
//! ```

mod cache;
mod error;
mod material;
mod signature;

pub use cache::{deserialize, serialize, KeyCache, CACHE_FILE_NAME};
pub use error::{Error, Result};
pub use material::{KeyLayout, KeyMaterial, KeyStructure};
pub use signature::{derive, derive_from_executable, map_executable, KeySignatures, Signature};
