//! Versioned archive header.
//!
//! ```text
//! u32 magic
//! u32 toc_size
//! u32 entry_count
//! u32 reserved       GtaIv <= version < GtaV
//! u32 encryption     every known version
//! ```
//!
//! All fields are little-endian, the byte order of every platform the engine
//! ships on.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use rpf_common::BinaryReader;

use crate::{EncryptionMode, Error, Result};

/// Archive format generation, identified by the header magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchiveVersion {
    /// Magic not recognised.
    Unknown,
    /// "RPF2"
    GtaIv,
    /// "RPF3"
    MidnightClub,
    /// "RPF4"
    MaxPayne,
    /// "RPF6"
    Rdr,
    /// "RPF7"
    GtaV,
    /// "RPF8"
    Rdr2,
}

impl ArchiveVersion {
    /// Every named generation, oldest first.
    pub const KNOWN: [ArchiveVersion; 6] = [
        ArchiveVersion::GtaIv,
        ArchiveVersion::MidnightClub,
        ArchiveVersion::MaxPayne,
        ArchiveVersion::Rdr,
        ArchiveVersion::GtaV,
        ArchiveVersion::Rdr2,
    ];

    /// The magic value for this generation.
    pub const fn magic(self) -> u32 {
        match self {
            ArchiveVersion::Unknown => 0x0000_0000,
            ArchiveVersion::GtaIv => 0x5250_4632,
            ArchiveVersion::MidnightClub => 0x5250_4633,
            ArchiveVersion::MaxPayne => 0x5250_4634,
            ArchiveVersion::Rdr => 0x5250_4636,
            ArchiveVersion::GtaV => 0x5250_4637,
            ArchiveVersion::Rdr2 => 0x5250_4638,
        }
    }

    /// Classify a raw magic read as a little-endian u32.
    ///
    /// Archives written by the engine store the magic so that it reads back
    /// as e.g. `0x52504637`; some tools write the ASCII bytes `RPF7` instead.
    /// Both orders are recognised. Anything else is [`ArchiveVersion::Unknown`].
    pub fn from_magic(raw: u32) -> Self {
        Self::exact(raw)
            .or_else(|| Self::exact(raw.swap_bytes()))
            .unwrap_or(ArchiveVersion::Unknown)
    }

    fn exact(raw: u32) -> Option<Self> {
        Self::KNOWN.into_iter().find(|v| v.magic() == raw)
    }

    /// Whether the header carries the reserved word.
    pub fn has_reserved(self) -> bool {
        self >= ArchiveVersion::GtaIv && self < ArchiveVersion::GtaV
    }

    /// Whether the header carries an encryption tag.
    pub fn has_encryption(self) -> bool {
        self >= ArchiveVersion::GtaIv
    }

    /// Encoded header length for this generation.
    pub fn header_len(self) -> usize {
        ArchiveHeader::MIN_LEN + 4 * (self.has_reserved() as usize + self.has_encryption() as usize)
    }
}

/// Decoded archive header.
///
/// Fields a version does not carry are kept at their neutral value
/// (`reserved == 0`, encryption [`EncryptionMode::None`]), so
/// `decode(encode(h)) == h` holds for every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    magic: u32,
    toc_size: u32,
    entry_count: u32,
    reserved: u32,
    encryption: EncryptionMode,
}

impl Default for ArchiveHeader {
    fn default() -> Self {
        Self::new(ArchiveVersion::GtaV).with_encryption(EncryptionMode::OpenPublic)
    }
}

impl ArchiveHeader {
    /// Smallest possible header: magic, TOC size and entry count.
    pub const MIN_LEN: usize = 12;

    /// Largest header any version produces.
    pub const MAX_LEN: usize = 20;

    /// An empty header for `version`.
    pub fn new(version: ArchiveVersion) -> Self {
        Self::from_magic(version.magic())
    }

    /// An empty header carrying a raw magic, recognised or not.
    pub fn from_magic(magic: u32) -> Self {
        Self {
            magic,
            toc_size: 0,
            entry_count: 0,
            reserved: 0,
            encryption: EncryptionMode::None,
        }
    }

    /// Set the TOC size.
    pub fn with_toc_size(mut self, toc_size: u32) -> Self {
        self.toc_size = toc_size;
        self
    }

    /// Set the entry count.
    pub fn with_entry_count(mut self, entry_count: u32) -> Self {
        self.entry_count = entry_count;
        self
    }

    /// Set the reserved word; ignored for versions without one.
    pub fn with_reserved(mut self, reserved: u32) -> Self {
        if self.version().has_reserved() {
            self.reserved = reserved;
        }
        self
    }

    /// Set the encryption mode; ignored for versions without a tag.
    pub fn with_encryption(mut self, encryption: EncryptionMode) -> Self {
        self.set_encryption(encryption);
        self
    }

    /// Raw magic as read from or written to disk.
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Format generation.
    pub fn version(&self) -> ArchiveVersion {
        ArchiveVersion::from_magic(self.magic)
    }

    /// Size of the table of contents in bytes.
    pub fn toc_size(&self) -> u32 {
        self.toc_size
    }

    /// Number of TOC entries, the root directory included.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Reserved word (zero when the version has none).
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Encryption mode.
    pub fn encryption(&self) -> EncryptionMode {
        self.encryption
    }

    /// Change the encryption mode; ignored for versions without a tag.
    pub fn set_encryption(&mut self, encryption: EncryptionMode) {
        if self.version().has_encryption() {
            self.encryption = encryption;
        }
    }

    pub(crate) fn set_toc(&mut self, toc_size: u32, entry_count: u32) {
        self.toc_size = toc_size;
        self.entry_count = entry_count;
    }

    /// Encoded length of this header.
    pub fn encoded_len(&self) -> usize {
        self.version().header_len()
    }

    /// Decode a header from the start of `data`.
    ///
    /// Trailing bytes are ignored. Fails with [`Error::TruncatedHeader`] when
    /// `data` is shorter than the header its magic calls for.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(Error::TruncatedHeader {
                needed: Self::MIN_LEN,
                available: data.len(),
            });
        }

        let mut reader = BinaryReader::new(data);
        let magic = reader.read_u32()?;
        let version = ArchiveVersion::from_magic(magic);

        let needed = version.header_len();
        if data.len() < needed {
            return Err(Error::TruncatedHeader {
                needed,
                available: data.len(),
            });
        }

        let toc_size = reader.read_u32()?;
        let entry_count = reader.read_u32()?;
        let reserved = if version.has_reserved() {
            reader.read_u32()?
        } else {
            0
        };
        let encryption = if version.has_encryption() {
            EncryptionMode::resolve(reader.read_u32()?)
        } else {
            EncryptionMode::None
        };

        Ok(Self {
            magic,
            toc_size,
            entry_count,
            reserved,
            encryption,
        })
    }

    /// Read exactly one header from a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::MAX_LEN];
        read_full(reader, &mut buf[..Self::MIN_LEN], 0)?;

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = ArchiveVersion::from_magic(magic).header_len();
        read_full(reader, &mut buf[Self::MIN_LEN..len], Self::MIN_LEN)?;

        Self::decode(&buf[..len])
    }

    /// Encode the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    /// Write the header, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let version = self.version();

        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.toc_size)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        if version.has_reserved() {
            writer.write_u32::<LittleEndian>(self.reserved)?;
        }
        if version.has_encryption() {
            writer.write_u32::<LittleEndian>(self.encryption.value())?;
        }

        Ok(version.header_len())
    }
}

/// `read_exact` that reports how far it got as a truncated header.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], already: usize) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::TruncatedHeader {
                    needed: already + buf.len(),
                    available: already + filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
