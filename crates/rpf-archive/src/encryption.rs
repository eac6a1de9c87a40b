//! Encryption mode tags.

/// How the table of contents and flagged entries are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionMode {
    /// Plain archive.
    #[default]
    None,
    /// Marker written by open modding tools; contents are plain.
    OpenPublic,
    /// AES in ECB mode over whole 16-byte blocks.
    Aes,
    /// Title-specific table cipher.
    Ng,
}

impl EncryptionMode {
    /// Tag for [`EncryptionMode::None`].
    pub const NONE_TAG: u32 = 0x0000_0000;
    /// Tag for [`EncryptionMode::OpenPublic`] ("OPEN").
    pub const OPEN_TAG: u32 = 0x4E45_504F;
    /// Tag for [`EncryptionMode::Aes`].
    pub const AES_TAG: u32 = 0x0FFF_FFF9;
    /// Tag for [`EncryptionMode::Ng`].
    pub const NG_TAG: u32 = 0x0FEF_FFFF;

    /// Classify a raw header tag.
    ///
    /// Total: tags that are not recognised resolve to [`EncryptionMode::Ng`],
    /// the scheme that needs the most key material, so nothing is read as
    /// plaintext by mistake.
    pub const fn resolve(tag: u32) -> Self {
        match tag {
            Self::NONE_TAG => EncryptionMode::None,
            Self::OPEN_TAG => EncryptionMode::OpenPublic,
            Self::AES_TAG => EncryptionMode::Aes,
            _ => EncryptionMode::Ng,
        }
    }

    /// The tag written to the header.
    pub const fn value(self) -> u32 {
        match self {
            EncryptionMode::None => Self::NONE_TAG,
            EncryptionMode::OpenPublic => Self::OPEN_TAG,
            EncryptionMode::Aes => Self::AES_TAG,
            EncryptionMode::Ng => Self::NG_TAG,
        }
    }

    /// Whether the table of contents and flagged entries are ciphertext.
    pub const fn is_encrypted(self) -> bool {
        matches!(self, EncryptionMode::Aes | EncryptionMode::Ng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_tags() {
        assert_eq!(EncryptionMode::resolve(0), EncryptionMode::None);
        assert_eq!(EncryptionMode::resolve(0x4E45504F), EncryptionMode::OpenPublic);
        assert_eq!(EncryptionMode::resolve(0x0FFFFFF9), EncryptionMode::Aes);
        assert_eq!(EncryptionMode::resolve(0x0FEFFFFF), EncryptionMode::Ng);
    }

    #[test]
    fn test_unknown_tag_falls_back_to_ng() {
        assert_eq!(EncryptionMode::resolve(1), EncryptionMode::Ng);
        assert_eq!(EncryptionMode::resolve(u32::MAX), EncryptionMode::Ng);
    }

    #[test]
    fn test_value_roundtrip() {
        for mode in [
            EncryptionMode::None,
            EncryptionMode::OpenPublic,
            EncryptionMode::Aes,
            EncryptionMode::Ng,
        ] {
            assert_eq!(EncryptionMode::resolve(mode.value()), mode);
        }
    }

    proptest! {
        #[test]
        fn prop_resolve_is_total(tag in any::<u32>()) {
            let mode = EncryptionMode::resolve(tag);
            let known = [
                EncryptionMode::NONE_TAG,
                EncryptionMode::OPEN_TAG,
                EncryptionMode::AES_TAG,
                EncryptionMode::NG_TAG,
            ];
            if !known.contains(&tag) {
                prop_assert_eq!(mode, EncryptionMode::Ng);
            } else {
                prop_assert_eq!(mode.value(), tag);
            }
        }
    }
}
