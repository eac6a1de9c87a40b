//! On-disk key cache.
//!
//! # Layout
//!
//! All integers little-endian, every sequence length-prefixed:
//!
//! ```text
//! "RPFK"  u16 version
//! u16 aes_len   aes_len bytes
//! u32 key_count { u32 len, len bytes }*
//! u32 rounds    { u32 tables { u32 words, words * u32 }* }*
//! u32 lut_len   lut_len bytes
//! u32 crc32c of everything above
//! ```
//!
//! The blob is written whole or not at all; there is no partial update.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rpf_common::{crc, BinaryReader};
use tracing::{info, warn};

use crate::{derive, Error, KeyMaterial, KeySignatures, Result};

/// File name of the cache inside a profile directory.
pub const CACHE_FILE_NAME: &str = "rpf_keys.bin";

const CACHE_MAGIC: &[u8; 4] = b"RPFK";
const CACHE_VERSION: u16 = 1;

/// Length prefix for a field, rejecting lengths the prefix cannot hold.
fn prefix<T: TryFrom<usize>>(len: usize, field: &str) -> Result<T> {
    T::try_from(len).map_err(|_| {
        Error::InvalidCache(format!("{field} length {len} does not fit its prefix"))
    })
}

/// Encode key material into the cache format.
///
/// Fails when a length exceeds its prefix, such as an AES key longer than
/// `u16::MAX` bytes.
pub fn serialize(keys: &KeyMaterial) -> Result<Vec<u8>> {
    let table_words: usize = keys
        .ng_tables
        .iter()
        .flat_map(|round| round.iter().map(Vec::len))
        .sum();
    let mut out = Vec::with_capacity(
        32 + keys.aes_key.len()
            + keys.ng_keys.iter().map(|k| k.len() + 4).sum::<usize>()
            + table_words * 4
            + keys.lut.len(),
    );

    out.extend_from_slice(CACHE_MAGIC);
    out.extend_from_slice(&CACHE_VERSION.to_le_bytes());

    out.extend_from_slice(&prefix::<u16>(keys.aes_key.len(), "AES key")?.to_le_bytes());
    out.extend_from_slice(&keys.aes_key);

    out.extend_from_slice(&prefix::<u32>(keys.ng_keys.len(), "NG key list")?.to_le_bytes());
    for key in &keys.ng_keys {
        out.extend_from_slice(&prefix::<u32>(key.len(), "NG key")?.to_le_bytes());
        out.extend_from_slice(key);
    }

    out.extend_from_slice(&prefix::<u32>(keys.ng_tables.len(), "NG round list")?.to_le_bytes());
    for round in &keys.ng_tables {
        out.extend_from_slice(&prefix::<u32>(round.len(), "NG round")?.to_le_bytes());
        for table in round {
            out.extend_from_slice(&prefix::<u32>(table.len(), "NG table")?.to_le_bytes());
            for word in table {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
    }

    out.extend_from_slice(&prefix::<u32>(keys.lut.len(), "LUT")?.to_le_bytes());
    out.extend_from_slice(&keys.lut);

    let sum = crc::checksum(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    Ok(out)
}

/// Decode key material from the cache format.
pub fn deserialize(data: &[u8]) -> Result<KeyMaterial> {
    if data.len() < CACHE_MAGIC.len() + 2 + 4 {
        return Err(Error::InvalidCache(format!(
            "blob is {} bytes, too short for a header",
            data.len()
        )));
    }

    let (body, trailer) = data.split_at(data.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if !crc::verify(body, expected) {
        return Err(Error::ChecksumMismatch {
            expected,
            actual: crc::checksum(body),
        });
    }

    let mut reader = BinaryReader::new(body);
    reader.expect_magic(CACHE_MAGIC)?;

    let version = reader.read_u16()?;
    if version != CACHE_VERSION {
        return Err(Error::InvalidCache(format!(
            "unsupported cache version {version}"
        )));
    }

    let aes_len = reader.read_u16()? as usize;
    let aes_key = reader.read_bytes(aes_len)?.to_vec();

    let key_count = reader.read_u32()? as usize;
    let mut ng_keys = Vec::with_capacity(key_count.min(reader.remaining() / 4));
    for _ in 0..key_count {
        let len = reader.read_u32()? as usize;
        ng_keys.push(reader.read_bytes(len)?.to_vec());
    }

    let rounds = reader.read_u32()? as usize;
    let mut ng_tables = Vec::with_capacity(rounds.min(reader.remaining() / 4));
    for _ in 0..rounds {
        let tables = reader.read_u32()? as usize;
        let mut round = Vec::with_capacity(tables.min(reader.remaining() / 4));
        for _ in 0..tables {
            let words = reader.read_u32()? as usize;
            let bytes = reader.read_bytes(words.checked_mul(4).ok_or_else(|| {
                Error::InvalidCache(format!("table of {words} words overflows"))
            })?)?;
            round.push(
                bytes
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect(),
            );
        }
        ng_tables.push(round);
    }

    let lut_len = reader.read_u32()? as usize;
    let lut = reader.read_bytes(lut_len)?.to_vec();

    if !reader.is_empty() {
        return Err(Error::InvalidCache(format!(
            "{} trailing bytes after LUT",
            reader.remaining()
        )));
    }

    Ok(KeyMaterial {
        aes_key,
        ng_keys,
        ng_tables,
        lut,
    })
}

/// Per-profile key cache file.
#[derive(Debug, Clone)]
pub struct KeyCache {
    path: PathBuf,
}

impl KeyCache {
    /// A cache stored at an explicit path.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The cache inside a profile directory.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(CACHE_FILE_NAME))
    }

    /// Path of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached material; `Ok(None)` when no cache exists.
    pub fn load(&self) -> Result<Option<KeyMaterial>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        deserialize(&data).map(Some)
    }

    /// Replace the cache with `keys`.
    ///
    /// The blob goes to a sibling temp file first and is renamed over the
    /// cache, so readers never see a half-written file.
    pub fn store(&self, keys: &KeyMaterial) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("bin.tmp");
        fs::write(&tmp, serialize(keys)?)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!("Stored key cache at {}", self.path.display());
        Ok(())
    }

    /// Delete the cache. Returns whether a file was removed.
    pub fn invalidate(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the cache, deriving and storing fresh material when it is missing
    /// or unreadable.
    ///
    /// `read_image` is only called when derivation is needed. When derivation
    /// fails the existing file is left as it was and the error is returned.
    pub fn load_or_derive<F, I, P>(
        &self,
        read_image: F,
        signatures: &KeySignatures,
        mut progress: P,
    ) -> Result<KeyMaterial>
    where
        F: FnOnce() -> std::io::Result<I>,
        I: AsRef<[u8]>,
        P: FnMut(&str),
    {
        match self.load() {
            Ok(Some(keys)) => {
                progress("Loaded key material from cache");
                return Ok(keys);
            }
            Ok(None) => progress("No key cache found, deriving from executable"),
            Err(e) => {
                warn!("Discarding key cache {}: {}", self.path.display(), e);
                progress("Key cache unreadable, deriving from executable");
            }
        }

        let image = read_image()?;
        let keys = derive(image.as_ref(), signatures, &mut progress)?;
        self.store(&keys)?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::tests::{test_image, test_signatures};
    use proptest::prelude::*;

    fn sample_keys() -> KeyMaterial {
        KeyMaterial {
            aes_key: (0..32).collect(),
            ng_keys: vec![vec![1; 16], vec![2; 16]],
            ng_tables: vec![vec![vec![1, 2, 3], vec![0xFFFF_FFFF]], vec![vec![]]],
            lut: (0..=255).collect(),
        }
    }

    #[test]
    fn test_roundtrip_sample() {
        let keys = sample_keys();
        assert_eq!(deserialize(&serialize(&keys).unwrap()).unwrap(), keys);
    }

    #[test]
    fn test_roundtrip_empty() {
        let keys = KeyMaterial::default();
        let blob = serialize(&keys).unwrap();
        assert_eq!(&blob[..4], b"RPFK");
        assert_eq!(deserialize(&blob).unwrap(), keys);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut blob = serialize(&sample_keys()).unwrap();
        blob[10] ^= 0x40;
        assert!(matches!(
            deserialize(&blob),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_blob() {
        let blob = serialize(&sample_keys()).unwrap();
        assert!(deserialize(&blob[..blob.len() - 9]).is_err());
        assert!(matches!(deserialize(&blob[..5]), Err(Error::InvalidCache(_))));
    }

    #[test]
    fn test_oversized_aes_key_is_rejected() {
        let keys = KeyMaterial {
            aes_key: vec![0x5A; usize::from(u16::MAX) + 1],
            ..KeyMaterial::default()
        };
        assert!(matches!(serialize(&keys), Err(Error::InvalidCache(_))));

        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path());
        assert!(cache.store(&keys).is_err());
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path());
        assert!(cache.load().unwrap().is_none());
        assert!(!cache.invalidate().unwrap());
    }

    #[test]
    fn test_store_load_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path().join("profile"));
        let keys = sample_keys();

        cache.store(&keys).unwrap();
        assert_eq!(cache.load().unwrap(), Some(keys));
        assert!(!cache.path().with_extension("bin.tmp").exists());

        assert!(cache.invalidate().unwrap());
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_load_or_derive_populates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path());
        let sigs = test_signatures();

        let derived = cache
            .load_or_derive(|| Ok(test_image()), &sigs, |_| {})
            .unwrap();
        assert!(cache.path().exists());

        let cached = cache
            .load_or_derive(
                || -> std::io::Result<Vec<u8>> { Err(ErrorKind::NotFound.into()) },
                &sigs,
                |_| {},
            )
            .unwrap();
        assert_eq!(cached, derived);
    }

    #[test]
    fn test_missing_signature_writes_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path());

        let err = cache
            .load_or_derive(|| Ok(vec![0u8; 4096]), &test_signatures(), |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::SignatureNotFound(_)));
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_corrupt_cache_is_rederived() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::in_dir(dir.path());
        fs::write(cache.path(), b"garbage").unwrap();

        let keys = cache
            .load_or_derive(|| Ok(test_image()), &test_signatures(), |_| {})
            .unwrap();
        assert_eq!(cache.load().unwrap(), Some(keys));
    }

    proptest! {
        #[test]
        fn prop_cache_roundtrip(
            aes_key in prop::collection::vec(any::<u8>(), 0..=32),
            ng_keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 0..4),
            ng_tables in prop::collection::vec(
                prop::collection::vec(prop::collection::vec(any::<u32>(), 0..6), 0..4),
                0..4,
            ),
            lut in prop::collection::vec(any::<u8>(), 0..300),
        ) {
            let keys = KeyMaterial { aes_key, ng_keys, ng_tables, lut };
            prop_assert_eq!(deserialize(&serialize(&keys).unwrap()).unwrap(), keys);
        }
    }
}
