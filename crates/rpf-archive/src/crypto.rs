//! Table of contents and entry encryption.
//!
//! Both schemes work on whole 16-byte blocks; a trailing partial block is
//! stored as plaintext and left untouched.
//!
//! - AES: ECB with the title's AES key (128 or 256 bit).
//! - NG: a 17-round table cipher. The key is picked from the title's NG keys
//!   by hashing a name (the archive file name for the TOC, the entry name for
//!   entry data) and adding a length (archive size or entry size).

use aes::{Aes128, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use rpf_keys::KeyMaterial;

use crate::{EncryptionMode, Error, Result};

/// AES and NG block size.
pub const BLOCK_SIZE: usize = 16;

/// NG rounds per block.
pub const NG_ROUNDS: usize = 17;

const NG_TABLES_PER_ROUND: usize = 16;
const NG_TABLE_LEN: usize = 256;

enum AesCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Aes128::new_from_slice(key).map(AesCipher::Aes128),
            32 => Aes256::new_from_slice(key).map(AesCipher::Aes256),
            _ => return Err(Error::MissingKeys(EncryptionMode::Aes)),
        }
        .map_err(|_| Error::MissingKeys(EncryptionMode::Aes))
    }

    fn decrypt(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                AesCipher::Aes128(c) => c.decrypt_block(block),
                AesCipher::Aes256(c) => c.decrypt_block(block),
            }
        }
    }

    fn encrypt(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                AesCipher::Aes128(c) => c.encrypt_block(block),
                AesCipher::Aes256(c) => c.encrypt_block(block),
            }
        }
    }
}

/// Decrypt `data` in place with AES-ECB.
pub fn aes_decrypt(data: &mut [u8], key: &[u8]) -> Result<()> {
    AesCipher::new(key)?.decrypt(data);
    Ok(())
}

/// Encrypt `data` in place with AES-ECB.
pub fn aes_encrypt(data: &mut [u8], key: &[u8]) -> Result<()> {
    AesCipher::new(key)?.encrypt(data);
    Ok(())
}

/// One-at-a-time hash of a name, with each byte mapped through `lut`.
///
/// Without a 256-byte LUT the bytes are lowercased instead, which is what the
/// reference LUT does for printable names.
pub fn name_hash(name: &str, lut: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in name.as_bytes() {
        let c = if lut.len() == 256 {
            lut[b as usize]
        } else {
            b.to_ascii_lowercase()
        };
        hash = hash.wrapping_add(c as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Pick the NG key for `name` and `length`.
pub fn select_ng_key<'a>(keys: &'a KeyMaterial, name: &str, length: u32) -> Result<&'a [u8]> {
    if keys.ng_keys.is_empty() {
        return Err(Error::MissingKeys(EncryptionMode::Ng));
    }
    let index = name_hash(name, &keys.lut).wrapping_add(length) as usize % keys.ng_keys.len();
    Ok(&keys.ng_keys[index])
}

fn check_ng_shape(key: &[u8], tables: &[Vec<Vec<u32>>]) -> Result<()> {
    let tables_ok = tables.len() == NG_ROUNDS
        && tables.iter().all(|round| {
            round.len() == NG_TABLES_PER_ROUND && round.iter().all(|t| t.len() == NG_TABLE_LEN)
        });
    if key.len() != NG_ROUNDS * BLOCK_SIZE || !tables_ok {
        return Err(rpf_keys::Error::InvalidLayout(format!(
            "NG decryption needs a {}-byte key and {}x{}x{} tables",
            NG_ROUNDS * BLOCK_SIZE,
            NG_ROUNDS,
            NG_TABLES_PER_ROUND,
            NG_TABLE_LEN
        ))
        .into());
    }
    Ok(())
}

fn words(block: &[u8; 16]) -> [u32; 4] {
    std::array::from_fn(|i| {
        u32::from_le_bytes([
            block[4 * i],
            block[4 * i + 1],
            block[4 * i + 2],
            block[4 * i + 3],
        ])
    })
}

fn bytes(x: [u32; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (chunk, word) in out.chunks_exact_mut(4).zip(x) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn round_a(b: &[u8; 16], key: [u32; 4], t: &[Vec<u32>]) -> [u8; 16] {
    let l = |i: usize| t[i][b[i] as usize];
    bytes([
        l(0) ^ l(1) ^ l(2) ^ l(3) ^ key[0],
        l(4) ^ l(5) ^ l(6) ^ l(7) ^ key[1],
        l(8) ^ l(9) ^ l(10) ^ l(11) ^ key[2],
        l(12) ^ l(13) ^ l(14) ^ l(15) ^ key[3],
    ])
}

fn round_b(b: &[u8; 16], key: [u32; 4], t: &[Vec<u32>]) -> [u8; 16] {
    let l = |i: usize| t[i][b[i] as usize];
    bytes([
        l(0) ^ l(7) ^ l(10) ^ l(13) ^ key[0],
        l(1) ^ l(4) ^ l(11) ^ l(14) ^ key[1],
        l(2) ^ l(5) ^ l(8) ^ l(15) ^ key[2],
        l(3) ^ l(6) ^ l(9) ^ l(12) ^ key[3],
    ])
}

/// Decrypt `data` in place with the NG cipher.
pub fn ng_decrypt(data: &mut [u8], key: &[u8], tables: &[Vec<Vec<u32>>]) -> Result<()> {
    check_ng_shape(key, tables)?;

    let round_keys: Vec<[u32; 4]> = key
        .chunks_exact(BLOCK_SIZE)
        .map(|k| {
            let mut block = [0u8; 16];
            block.copy_from_slice(k);
            words(&block)
        })
        .collect();

    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        let mut block = [0u8; 16];
        block.copy_from_slice(chunk);

        for (round, (rk, t)) in round_keys.iter().zip(tables).enumerate() {
            block = match round {
                0 | 1 | 16 => round_a(&block, *rk, t),
                _ => round_b(&block, *rk, t),
            };
        }

        chunk.copy_from_slice(&block);
    }
    Ok(())
}

/// Decrypt `data` in place according to `mode`.
///
/// `name` and `length` select the NG key and are ignored by other modes.
pub fn decrypt(
    mode: EncryptionMode,
    data: &mut [u8],
    keys: Option<&KeyMaterial>,
    name: &str,
    length: u32,
) -> Result<()> {
    match mode {
        EncryptionMode::None | EncryptionMode::OpenPublic => Ok(()),
        EncryptionMode::Aes => {
            let keys = keys.ok_or(Error::MissingKeys(mode))?;
            aes_decrypt(data, &keys.aes_key)
        }
        EncryptionMode::Ng => {
            let keys = keys.ok_or(Error::MissingKeys(mode))?;
            let key = select_ng_key(keys, name, length)?;
            ng_decrypt(data, key, &keys.ng_tables)
        }
    }
}

/// Encrypt `data` in place according to `mode`.
///
/// NG has no encryption tables and is rejected.
pub fn encrypt(mode: EncryptionMode, data: &mut [u8], keys: Option<&KeyMaterial>) -> Result<()> {
    match mode {
        EncryptionMode::None | EncryptionMode::OpenPublic => Ok(()),
        EncryptionMode::Aes => {
            let keys = keys.ok_or(Error::MissingKeys(mode))?;
            aes_encrypt(data, &keys.aes_key)
        }
        EncryptionMode::Ng => Err(Error::UnsupportedEncryption(mode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_tables() -> Vec<Vec<Vec<u32>>> {
        vec![vec![vec![0u32; NG_TABLE_LEN]; NG_TABLES_PER_ROUND]; NG_ROUNDS]
    }

    #[test]
    fn test_aes256_roundtrip_leaves_tail() {
        let key = [0x42u8; 32];
        let original: Vec<u8> = (0..40).collect();
        let mut data = original.clone();

        aes_encrypt(&mut data, &key).unwrap();
        assert_ne!(&data[..32], &original[..32]);
        assert_eq!(&data[32..], &original[32..]);

        aes_decrypt(&mut data, &key).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_aes128_known_vector() {
        // FIPS-197 appendix C.1
        let key: Vec<u8> = (0u8..16).collect();
        let mut block = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        aes_encrypt(&mut block, &key).unwrap();
        assert_eq!(
            block,
            [
                0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4,
                0xc5, 0x5a
            ]
        );
    }

    #[test]
    fn test_aes_rejects_bad_key() {
        let mut data = [0u8; 16];
        assert!(matches!(
            aes_decrypt(&mut data, &[1, 2, 3]),
            Err(Error::MissingKeys(EncryptionMode::Aes))
        ));
    }

    #[test]
    fn test_ng_zero_tables_yield_last_round_key() {
        let key: Vec<u8> = (0..NG_ROUNDS * BLOCK_SIZE).map(|i| i as u8).collect();
        let mut data = vec![0xA5u8; 35];

        ng_decrypt(&mut data, &key, &zero_tables()).unwrap();

        assert_eq!(&data[..16], &key[256..272]);
        assert_eq!(&data[16..32], &key[256..272]);
        assert_eq!(&data[32..], &[0xA5; 3]);
    }

    #[test]
    fn test_ng_round_a_uses_own_column() {
        let mut tables = zero_tables();
        // Round 0 maps byte 0 of the block straight into word 0.
        tables[0][0] = (0..256u32).collect();
        // Round 1 and later copy that word through via tables 0..4 (round A)
        // or table 0 (round B, word 0 reads bytes 0, 7, 10, 13).
        for round in 1..NG_ROUNDS {
            tables[round][0] = (0..256u32).collect();
        }
        let key = vec![0u8; NG_ROUNDS * BLOCK_SIZE];
        let mut data = [0u8; 16];
        data[0] = 0x7E;

        ng_decrypt(&mut data, &key, &tables).unwrap();
        assert_eq!(data[0], 0x7E);
        assert!(data[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ng_shape_checked() {
        let mut data = [0u8; 16];
        let err = ng_decrypt(&mut data, &[0; 16], &zero_tables()).unwrap_err();
        assert!(matches!(err, Error::Keys(rpf_keys::Error::InvalidLayout(_))));
    }

    #[test]
    fn test_name_hash_case_insensitive_without_lut() {
        assert_eq!(name_hash("Common.RPF", &[]), name_hash("common.rpf", &[]));
        assert_ne!(name_hash("common.rpf", &[]), name_hash("update.rpf", &[]));
        assert_eq!(name_hash("", &[]), 0);
    }

    #[test]
    fn test_name_hash_uses_lut() {
        let identity: Vec<u8> = (0..=255).collect();
        let lower: Vec<u8> = (0..=255u8).map(|b| b.to_ascii_lowercase()).collect();
        assert_eq!(name_hash("ABC", &lower), name_hash("abc", &[]));
        assert_ne!(name_hash("ABC", &identity), name_hash("abc", &identity));
    }

    #[test]
    fn test_select_ng_key_wraps() {
        let keys = KeyMaterial {
            ng_keys: (0..101u8).map(|i| vec![i; 272]).collect(),
            ..Default::default()
        };
        let h = name_hash("x64a.rpf", &[]);
        let expected = h.wrapping_add(1000) as usize % 101;
        assert_eq!(select_ng_key(&keys, "x64a.rpf", 1000).unwrap()[0], expected as u8);

        let empty = KeyMaterial::default();
        assert!(select_ng_key(&empty, "a", 0).is_err());
    }

    #[test]
    fn test_mode_dispatch() {
        let keys = KeyMaterial {
            aes_key: vec![9; 32],
            ..Default::default()
        };
        let mut data = vec![1u8; 32];

        decrypt(EncryptionMode::OpenPublic, &mut data, None, "", 0).unwrap();
        assert_eq!(data, vec![1u8; 32]);

        encrypt(EncryptionMode::Aes, &mut data, Some(&keys)).unwrap();
        decrypt(EncryptionMode::Aes, &mut data, Some(&keys), "", 0).unwrap();
        assert_eq!(data, vec![1u8; 32]);

        assert!(matches!(
            decrypt(EncryptionMode::Aes, &mut data, None, "", 0),
            Err(Error::MissingKeys(EncryptionMode::Aes))
        ));
        assert!(matches!(
            encrypt(EncryptionMode::Ng, &mut data, Some(&keys)),
            Err(Error::UnsupportedEncryption(EncryptionMode::Ng))
        ));
    }
}
