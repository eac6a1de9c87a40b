//! Key material and the shape it is expected to have.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The four structures that make up [`KeyMaterial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStructure {
    /// Symmetric key for AES-mode archives.
    AesKey,
    /// Per-title NG round keys.
    NgKeys,
    /// NG decryption lookup tables.
    NgTables,
    /// Name-hash lookup table.
    Lut,
}

impl KeyStructure {
    /// All structures, in derivation and cache order.
    pub const ALL: [KeyStructure; 4] = [
        KeyStructure::AesKey,
        KeyStructure::NgKeys,
        KeyStructure::NgTables,
        KeyStructure::Lut,
    ];
}

impl fmt::Display for KeyStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyStructure::AesKey => "AES key",
            KeyStructure::NgKeys => "NG keys",
            KeyStructure::NgTables => "NG decrypt tables",
            KeyStructure::Lut => "hash LUT",
        })
    }
}

/// Sizes of the structures embedded in a title's executable.
///
/// Defaults describe the reference title: a 256-bit AES key, 101 NG keys of
/// 17 round keys each, 17 rounds of 16 tables of 256 words, and a 256-byte LUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyLayout {
    pub aes_key_len: usize,
    pub ng_key_count: usize,
    pub ng_key_len: usize,
    pub ng_rounds: usize,
    pub ng_tables_per_round: usize,
    pub ng_table_len: usize,
    pub lut_len: usize,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            aes_key_len: 32,
            ng_key_count: 101,
            ng_key_len: 272,
            ng_rounds: 17,
            ng_tables_per_round: 16,
            ng_table_len: 256,
            lut_len: 256,
        }
    }
}

impl KeyLayout {
    /// Number of bytes a structure occupies in the executable image.
    pub fn byte_len(&self, structure: KeyStructure) -> usize {
        match structure {
            KeyStructure::AesKey => self.aes_key_len,
            KeyStructure::NgKeys => self.ng_key_count.saturating_mul(self.ng_key_len),
            KeyStructure::NgTables => self
                .ng_rounds
                .saturating_mul(self.ng_tables_per_round)
                .saturating_mul(self.ng_table_len)
                .saturating_mul(4),
            KeyStructure::Lut => self.lut_len,
        }
    }

    /// Reject layouts that cannot describe usable key material.
    pub fn check(&self) -> Result<()> {
        if !matches!(self.aes_key_len, 16 | 32) {
            return Err(Error::InvalidLayout(format!(
                "AES key must be 16 or 32 bytes, layout says {}",
                self.aes_key_len
            )));
        }
        if self.ng_rounds.checked_mul(16) != Some(self.ng_key_len) {
            return Err(Error::InvalidLayout(format!(
                "NG key length {} does not hold {} round keys",
                self.ng_key_len, self.ng_rounds
            )));
        }
        let table_bytes = self
            .ng_rounds
            .checked_mul(self.ng_tables_per_round)
            .and_then(|n| n.checked_mul(self.ng_table_len))
            .and_then(|n| n.checked_mul(4));
        let key_bytes = self.ng_key_count.checked_mul(self.ng_key_len);
        if table_bytes.is_none() || key_bytes.is_none() {
            return Err(Error::InvalidLayout(format!(
                "NG structures of {}x{} keys and {}x{}x{} tables overflow",
                self.ng_key_count,
                self.ng_key_len,
                self.ng_rounds,
                self.ng_tables_per_round,
                self.ng_table_len
            )));
        }
        Ok(())
    }
}

/// Decryption material for one game installation.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct KeyMaterial {
    /// AES key, 16 or 32 bytes.
    pub aes_key: Vec<u8>,
    /// NG keys, each a run of 16-byte round keys.
    pub ng_keys: Vec<Vec<u8>>,
    /// NG tables indexed `[round][table][byte]`.
    pub ng_tables: Vec<Vec<Vec<u32>>>,
    /// Lookup table for the name hash that selects NG keys.
    pub lut: Vec<u8>,
}

impl KeyMaterial {
    /// Build key material from the raw structures found in an image.
    pub(crate) fn from_raw(
        layout: &KeyLayout,
        aes_key: &[u8],
        ng_keys: &[u8],
        ng_tables: &[u8],
        lut: &[u8],
    ) -> Self {
        let ng_keys = if layout.ng_key_len == 0 {
            Vec::new()
        } else {
            ng_keys
                .chunks_exact(layout.ng_key_len)
                .map(<[u8]>::to_vec)
                .collect()
        };

        let words: Vec<u32> = ng_tables
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        let table_len = layout.ng_table_len.max(1);
        let round_len = layout
            .ng_tables_per_round
            .saturating_mul(layout.ng_table_len)
            .max(1);
        let ng_tables = words
            .chunks(round_len)
            .map(|round| round.chunks(table_len).map(<[u32]>::to_vec).collect())
            .collect();

        Self {
            aes_key: aes_key.to_vec(),
            ng_keys,
            ng_tables,
            lut: lut.to_vec(),
        }
    }

    /// Check every structure against `layout`.
    pub fn validate(&self, layout: &KeyLayout) -> Result<()> {
        layout.check()?;

        if self.aes_key.len() != layout.aes_key_len {
            return Err(Error::InvalidLayout(format!(
                "AES key is {} bytes, expected {}",
                self.aes_key.len(),
                layout.aes_key_len
            )));
        }
        if self.ng_keys.len() != layout.ng_key_count
            || self.ng_keys.iter().any(|k| k.len() != layout.ng_key_len)
        {
            return Err(Error::InvalidLayout(format!(
                "expected {} NG keys of {} bytes",
                layout.ng_key_count, layout.ng_key_len
            )));
        }
        let tables_ok = self.ng_tables.len() == layout.ng_rounds
            && self.ng_tables.iter().all(|round| {
                round.len() == layout.ng_tables_per_round
                    && round.iter().all(|t| t.len() == layout.ng_table_len)
            });
        if !tables_ok {
            return Err(Error::InvalidLayout(format!(
                "expected NG tables of {}x{}x{}",
                layout.ng_rounds, layout.ng_tables_per_round, layout.ng_table_len
            )));
        }
        if self.lut.len() != layout.lut_len {
            return Err(Error::InvalidLayout(format!(
                "LUT is {} bytes, expected {}",
                self.lut.len(),
                layout.lut_len
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes stay out of logs.
        f.debug_struct("KeyMaterial")
            .field("aes_key_len", &self.aes_key.len())
            .field("ng_keys", &self.ng_keys.len())
            .field("ng_rounds", &self.ng_tables.len())
            .field("lut_len", &self.lut.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_layout() -> KeyLayout {
        KeyLayout {
            aes_key_len: 16,
            ng_key_count: 2,
            ng_key_len: 32,
            ng_rounds: 2,
            ng_tables_per_round: 2,
            ng_table_len: 3,
            lut_len: 4,
        }
    }

    #[test]
    fn test_default_layout_sizes() {
        let layout = KeyLayout::default();
        assert_eq!(layout.byte_len(KeyStructure::AesKey), 32);
        assert_eq!(layout.byte_len(KeyStructure::NgKeys), 101 * 272);
        assert_eq!(layout.byte_len(KeyStructure::NgTables), 17 * 16 * 256 * 4);
        assert_eq!(layout.byte_len(KeyStructure::Lut), 256);
        layout.check().unwrap();
    }

    #[test]
    fn test_from_raw_shapes() {
        let layout = small_layout();
        let tables: Vec<u8> = (0u32..12).flat_map(|w| w.to_le_bytes()).collect();
        let keys = KeyMaterial::from_raw(&layout, &[7; 16], &[1; 64], &tables, &[0, 1, 2, 3]);

        keys.validate(&layout).unwrap();
        assert_eq!(keys.ng_tables[0][0], vec![0, 1, 2]);
        assert_eq!(keys.ng_tables[1][1], vec![9, 10, 11]);
    }

    #[test]
    fn test_validate_rejects_wrong_aes_len() {
        let layout = small_layout();
        let mut keys = KeyMaterial::from_raw(&layout, &[7; 16], &[1; 64], &[0; 48], &[0; 4]);
        keys.aes_key.pop();
        assert!(matches!(keys.validate(&layout), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_layout_check() {
        let mut layout = small_layout();
        layout.aes_key_len = 24;
        assert!(layout.check().is_err());
    }

    #[test]
    fn test_layout_check_rejects_overflowing_sizes() {
        let mut layout = small_layout();
        layout.ng_rounds = usize::MAX / 8;
        assert!(matches!(layout.check(), Err(Error::InvalidLayout(_))));

        let mut layout = small_layout();
        layout.ng_tables_per_round = usize::MAX / 2;
        assert!(matches!(layout.check(), Err(Error::InvalidLayout(_))));

        let mut layout = small_layout();
        layout.ng_key_count = usize::MAX;
        assert!(matches!(layout.check(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_from_raw_with_huge_table_dimensions() {
        let mut layout = small_layout();
        layout.ng_tables_per_round = usize::MAX / 2;
        let keys = KeyMaterial::from_raw(&layout, &[7; 16], &[1; 64], &[0; 48], &[0; 4]);
        assert_eq!(keys.ng_tables.len(), 1);
        assert!(keys.validate(&layout).is_err());
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let keys = KeyMaterial {
            aes_key: vec![0xAB; 16],
            ..Default::default()
        };
        let dbg = format!("{keys:?}");
        assert!(dbg.contains("aes_key_len: 16"));
        assert!(!dbg.contains("171"));
    }
}
