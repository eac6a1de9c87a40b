//! Locating key material inside a game executable.
//!
//! Each structure is found by searching the image for a byte pattern that
//! sits at a fixed distance from it. The patterns are title specific and are
//! supplied by the caller as a [`KeySignatures`] document.

use std::fs::{self, File};
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, KeyLayout, KeyMaterial, KeyStructure, Result};

/// A byte pattern and the offset of a structure relative to its match.
///
/// An empty pattern matches at the start of the image, which turns `offset`
/// into an absolute position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Bytes to search for, hex encoded in JSON.
    #[serde(with = "hex")]
    pub pattern: Vec<u8>,
    /// Distance from the start of the match to the structure.
    #[serde(default)]
    pub offset: i64,
}

impl Signature {
    /// A signature whose structure follows the pattern directly.
    pub fn followed_by(pattern: impl Into<Vec<u8>>) -> Self {
        let pattern = pattern.into();
        let offset = pattern.len() as i64;
        Self { pattern, offset }
    }
}

/// Signatures for all four structures plus their expected sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignatures {
    pub aes_key: Signature,
    pub ng_keys: Signature,
    pub ng_tables: Signature,
    pub lut: Signature,
    #[serde(default)]
    pub layout: KeyLayout,
}

impl KeySignatures {
    /// Parse a signature document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a signature document from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Signature for one structure.
    pub fn get(&self, structure: KeyStructure) -> &Signature {
        match structure {
            KeyStructure::AesKey => &self.aes_key,
            KeyStructure::NgKeys => &self.ng_keys,
            KeyStructure::NgTables => &self.ng_tables,
            KeyStructure::Lut => &self.lut,
        }
    }
}

/// Find one structure in `image`, returning its offset and bytes.
fn locate<'a>(
    image: &'a [u8],
    signature: &Signature,
    structure: KeyStructure,
    len: usize,
) -> Result<(usize, &'a [u8])> {
    let found = memchr::memmem::find(image, &signature.pattern)
        .ok_or(Error::SignatureNotFound(structure))?;

    let start = found as i64 + signature.offset;
    if start < 0 {
        return Err(Error::TruncatedTable {
            structure,
            needed: len,
            available: 0,
        });
    }

    let start = start as usize;
    let available = image.len().saturating_sub(start);
    if available < len {
        return Err(Error::TruncatedTable {
            structure,
            needed: len,
            available,
        });
    }

    Ok((start, &image[start..start + len]))
}

#[cfg(not(feature = "parallel"))]
fn locate_all<'a>(image: &'a [u8], signatures: &KeySignatures) -> Result<Vec<(usize, &'a [u8])>> {
    KeyStructure::ALL
        .iter()
        .map(|&s| locate(image, signatures.get(s), s, signatures.layout.byte_len(s)))
        .collect()
}

#[cfg(feature = "parallel")]
fn locate_all<'a>(image: &'a [u8], signatures: &KeySignatures) -> Result<Vec<(usize, &'a [u8])>> {
    use rayon::prelude::*;

    // Indexed collect keeps the structure order regardless of scheduling.
    KeyStructure::ALL
        .par_iter()
        .map(|&s| locate(image, signatures.get(s), s, signatures.layout.byte_len(s)))
        .collect()
}

/// Derive key material from an executable image.
///
/// `progress` receives human-readable status lines; it may ignore them.
/// Fails with [`Error::SignatureNotFound`] or [`Error::TruncatedTable`] when
/// a structure cannot be located, and never returns partial material.
pub fn derive<F>(image: &[u8], signatures: &KeySignatures, mut progress: F) -> Result<KeyMaterial>
where
    F: FnMut(&str),
{
    let layout = &signatures.layout;
    layout.check()?;

    progress(&format!(
        "Scanning {} byte executable image for key material",
        image.len()
    ));

    let found = locate_all(image, signatures)?;
    for (structure, (offset, bytes)) in KeyStructure::ALL.iter().zip(&found) {
        debug!("Located {} ({} bytes) at {:#x}", structure, bytes.len(), offset);
        progress(&format!("Found {structure} at {offset:#x}"));
    }

    let keys = KeyMaterial::from_raw(layout, found[0].1, found[1].1, found[2].1, found[3].1);
    keys.validate(layout)?;

    info!(
        "Derived key material: {} NG keys, {} NG rounds",
        keys.ng_keys.len(),
        keys.ng_tables.len()
    );
    progress("Key material derived");

    Ok(keys)
}

/// Memory-map an executable for scanning.
pub fn map_executable<P: AsRef<Path>>(path: P) -> std::io::Result<Mmap> {
    let file = File::open(path)?;
    // The mapping is read-only and dropped before the caller returns.
    unsafe { Mmap::map(&file) }
}

/// Map an executable from disk and derive key material from it.
pub fn derive_from_executable<P, F>(
    path: P,
    signatures: &KeySignatures,
    progress: F,
) -> Result<KeyMaterial>
where
    P: AsRef<Path>,
    F: FnMut(&str),
{
    let image = map_executable(path)?;
    derive(&image, signatures, progress)
}
