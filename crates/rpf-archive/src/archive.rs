//! Archive handle: owns the backing file and rewrites it transactionally.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use rpf_keys::KeyMaterial;
use tracing::{debug, info, warn};

use crate::compress;
use crate::crypto;
use crate::header::{ArchiveHeader, ArchiveVersion};
use crate::toc::{self, align_block, split_path, DirectoryEntry, DirectoryNode, FileEntry};
use crate::{EncryptionMode, Error, Result};

/// How [`RpfArchive::insert_file`] stores a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Deflate the payload.
    pub compress: bool,
    /// Encrypt the payload with the archive's scheme when it has one.
    pub encrypt: bool,
}

impl InsertOptions {
    /// Deflated, unencrypted.
    pub fn compressed() -> Self {
        Self {
            compress: true,
            encrypt: false,
        }
    }
}

/// An RPF archive, backed by a file or built in memory.
///
/// The header is decoded when the archive is opened; the table of contents
/// is decoded on first use. Changes stay in memory until [`write`] lays the
/// whole archive out again.
///
/// One handle per file: nothing stops two handles from writing the same
/// path, and the result of doing so is unspecified.
///
/// [`write`]: RpfArchive::write
pub struct RpfArchive {
    file: Option<File>,
    name: String,
    header: ArchiveHeader,
    /// Header as it is on disk; `None` until a file backs the archive.
    on_disk: Option<ArchiveHeader>,
    root: Option<DirectoryNode>,
    keys: Option<Arc<KeyMaterial>>,
    /// Plaintext (possibly deflated) payloads not yet written, by path key.
    pending: HashMap<String, Vec<u8>>,
    modified: bool,
}

impl Default for RpfArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpfArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpfArchive")
            .field("name", &self.name)
            .field("header", &self.header)
            .field("backed", &self.file.is_some())
            .field("pending", &self.pending.len())
            .field("modified", &self.modified)
            .finish()
    }
}

/// Payload bytes for a new entry and its compressed size field.
///
/// A deflated payload larger than `limit` cannot be described by the entry,
/// so the data is stored instead.
fn stored_payload(data: &[u8], compress: bool, limit: u32) -> Result<(Vec<u8>, u32)> {
    if compress {
        let deflated = compress::compress(data)?;
        match u32::try_from(deflated.len()) {
            Ok(len) if len <= limit => return Ok((deflated, len)),
            _ => debug!(
                "Deflated size {} exceeds {:#x}, storing {} bytes",
                deflated.len(),
                limit,
                data.len()
            ),
        }
    }
    Ok((data.to_vec(), 0))
}

fn path_key(path: &str) -> String {
    split_path(path).join("/").to_ascii_lowercase()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

impl RpfArchive {
    /// A fresh, empty archive with the default header.
    pub fn new() -> Self {
        Self::with_header(ArchiveHeader::default())
    }

    /// A fresh, empty archive with `header`.
    pub fn with_header(header: ArchiveHeader) -> Self {
        Self {
            file: None,
            name: String::new(),
            header: header.with_toc_size(0).with_entry_count(0),
            on_disk: None,
            root: None,
            keys: None,
            pending: HashMap::new(),
            modified: false,
        }
    }

    /// Open an archive read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_file(file, file_name(path))
    }

    /// Open an archive for reading and in-place rewriting.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, file_name(path))
    }

    /// Take ownership of an already open file.
    ///
    /// `name` is the archive's file name, which keys the NG table of
    /// contents. The file is dropped if the header does not decode.
    pub fn from_file(mut file: File, name: impl Into<String>) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let header = ArchiveHeader::read_from(&mut file)?;
        let name = name.into();

        debug!(
            "Opened {}: {:?}, {} entries, TOC {} bytes, {:?}",
            name,
            header.version(),
            header.entry_count(),
            header.toc_size(),
            header.encryption()
        );

        Ok(Self {
            file: Some(file),
            name,
            header,
            on_disk: Some(header),
            root: None,
            keys: None,
            pending: HashMap::new(),
            modified: false,
        })
    }

    /// Archive file name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The header as it will be written.
    #[inline]
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Whether there are changes not yet written.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether a file backs this archive.
    #[inline]
    pub fn is_backed(&self) -> bool {
        self.file.is_some()
    }

    /// Supply key material for encrypted archives.
    pub fn set_keys(&mut self, keys: impl Into<Arc<KeyMaterial>>) {
        self.keys = Some(keys.into());
    }

    /// Key material in use, if any.
    pub fn keys(&self) -> Option<&KeyMaterial> {
        self.keys.as_deref()
    }

    /// Change the encryption applied by the next write.
    ///
    /// Versions without an encryption tag ignore this.
    pub fn set_encryption(&mut self, mode: EncryptionMode) {
        if !self.header.version().has_encryption() || self.header.encryption() == mode {
            return;
        }
        self.header.set_encryption(mode);
        self.modified = true;
    }

    fn source_mode(&self) -> EncryptionMode {
        self.on_disk
            .map(|h| h.encryption())
            .unwrap_or(EncryptionMode::None)
    }

    fn backing(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::other("archive has no backing file")))
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.backing()?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn decode_toc(&self) -> Result<DirectoryNode> {
        let Some(header) = self.on_disk else {
            return Ok(DirectoryNode::default());
        };
        if header.version() == ArchiveVersion::Unknown {
            return Err(Error::UnsupportedVersion(header.magic()));
        }

        let physical = self.backing()?.metadata()?.len();
        let start = header.encoded_len() as u64;
        let announced = start + header.toc_size() as u64;
        if announced > physical {
            return Err(Error::TocSizeMismatch {
                announced,
                available: physical,
            });
        }

        let mut bytes = self.read_at(start, header.toc_size() as usize)?;
        crypto::decrypt(
            header.encryption(),
            &mut bytes,
            self.keys.as_deref(),
            &self.name,
            physical as u32,
        )?;

        let root = toc::decode(&bytes, header.entry_count())?;
        toc::validate(&root, physical)?;

        debug!(
            "Decoded TOC of {}: {} files",
            self.name,
            root.files().len()
        );
        Ok(root)
    }

    fn tree(&mut self) -> Result<&mut DirectoryNode> {
        let root = match self.root.take() {
            Some(root) => root,
            None => self.decode_toc()?,
        };
        Ok(self.root.insert(root))
    }

    /// The entry tree, decoding the table of contents on first use.
    pub fn root(&mut self) -> Result<&DirectoryNode> {
        self.tree().map(|root| &*root)
    }

    /// Look up an entry by path (`/` or `\` separated, ASCII case-insensitive).
    pub fn find(&mut self, path: &str) -> Result<Option<&DirectoryEntry>> {
        Ok(self.tree()?.find(path))
    }

    /// All files with their paths, in on-disk order.
    pub fn files(&mut self) -> Result<Vec<(String, &FileEntry)>> {
        Ok(self.root()?.files())
    }

    fn file_entry(&mut self, path: &str) -> Result<FileEntry> {
        self.tree()?
            .find(path)
            .and_then(DirectoryEntry::as_file)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))
    }

    /// Payload bytes as stored, with on-disk encryption removed.
    fn read_stored(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        let mut data = self.read_at(entry.offset, entry.stored_size() as usize)?;
        let mode = self.source_mode();
        if entry.encrypted && mode.is_encrypted() {
            crypto::decrypt(
                mode,
                &mut data,
                self.keys.as_deref(),
                &entry.name,
                entry.uncompressed_size,
            )?;
        }
        Ok(data)
    }

    /// Read a file's contents: decrypted, inflated and size checked.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self.file_entry(path)?;
        let stored = match self.pending.get(&path_key(path)) {
            Some(data) => data.clone(),
            None => self.read_stored(&entry)?,
        };

        if entry.is_compressed() {
            compress::decompress_sized(&stored, entry.uncompressed_size as usize)
        } else {
            Ok(stored)
        }
    }

    /// Add a file. Missing parent directories are created.
    pub fn insert_file(&mut self, path: &str, data: &[u8], options: InsertOptions) -> Result<()> {
        let components = split_path(path);
        let Some((name, parents)) = components.split_last() else {
            return Err(Error::InvalidPath(path.to_string()));
        };
        if !components.iter().all(|c| toc::is_valid_name(c)) {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let uncompressed_size = u32::try_from(data.len()).map_err(|_| Error::Overflow {
            field: "uncompressed size",
            value: data.len() as u64,
            max: u32::MAX as u64,
        })?;

        let (stored, compressed_size) = stored_payload(data, options.compress, toc::MAX_U24)?;

        let entry = FileEntry {
            name: name.to_string(),
            offset: 0,
            compressed_size,
            uncompressed_size,
            encrypted: options.encrypt,
        };
        self.tree()?
            .make_dirs(parents)?
            .insert(DirectoryEntry::File(entry))?;

        debug!(
            "Inserted {} ({} bytes, {} stored)",
            path,
            uncompressed_size,
            stored.len()
        );
        self.pending.insert(path_key(path), stored);
        self.modified = true;
        Ok(())
    }

    /// Remove a file or directory.
    pub fn remove(&mut self, path: &str) -> Result<DirectoryEntry> {
        let removed = self
            .tree()?
            .remove(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;

        let key = path_key(path);
        let prefix = format!("{key}/");
        self.pending
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
        self.modified = true;
        Ok(removed)
    }

    /// Payload for `entry` as the next write stores it, and whether it ends
    /// up encrypted.
    fn output_payload(
        &self,
        path: &str,
        entry: &FileEntry,
        mode: EncryptionMode,
    ) -> Result<(Vec<u8>, bool)> {
        let encrypt = entry.encrypted && mode.is_encrypted();
        let keys = self.keys.as_deref();

        let mut data = match self.pending.get(&path_key(path)) {
            Some(data) => data.clone(),
            None => {
                let source = self.source_mode();
                if encrypt && source == mode {
                    // Ciphertext carries over as is.
                    return Ok((self.read_at(entry.offset, entry.stored_size() as usize)?, true));
                }
                self.read_stored(entry)?
            }
        };

        if encrypt {
            crypto::encrypt(mode, &mut data, keys)?;
        }
        Ok((data, encrypt))
    }

    /// Header and body copied verbatim, with the current header in front.
    fn passthrough_image(&self, on_disk: &ArchiveHeader) -> Result<Vec<u8>> {
        let mut file = self.backing()?;
        file.seek(SeekFrom::Start(on_disk.encoded_len() as u64))?;

        let mut image = self.header.encode();
        file.read_to_end(&mut image)?;
        Ok(image)
    }

    /// Lay the whole archive out from the in-memory model.
    fn full_image(&mut self) -> Result<(Vec<u8>, ArchiveHeader, DirectoryNode)> {
        if self.header.version() == ArchiveVersion::Unknown {
            return Err(Error::UnsupportedVersion(self.header.magic()));
        }
        let mode = self.header.encryption();
        if mode == EncryptionMode::Ng {
            return Err(Error::UnsupportedEncryption(mode));
        }

        let mut tree = self.tree()?.clone();
        let header_len = self.header.encoded_len();
        let toc_len = toc::encoded_len(&tree);
        let mut cursor = align_block((header_len + toc_len) as u64);

        let mut payloads = Vec::new();
        for path in toc::file_paths(&tree) {
            let Some(entry) = tree.find_file_mut(&path) else {
                return Err(Error::EntryNotFound(path));
            };
            let (data, encrypted) = self.output_payload(&path, entry, mode)?;
            entry.offset = cursor;
            entry.encrypted = encrypted;
            cursor = align_block(cursor + data.len() as u64);
            payloads.push((entry.offset, data));
        }

        let mut encoded = toc::encode(&tree)?;
        let toc_size = u32::try_from(encoded.bytes.len()).map_err(|_| Error::Overflow {
            field: "toc size",
            value: encoded.bytes.len() as u64,
            max: u32::MAX as u64,
        })?;
        crypto::encrypt(mode, &mut encoded.bytes, self.keys.as_deref())?;

        let mut header = self.header;
        header.set_toc(toc_size, encoded.entry_count);

        let mut image = Vec::with_capacity(cursor as usize);
        header.write_to(&mut image)?;
        image.extend_from_slice(&encoded.bytes);
        for (offset, data) in payloads {
            image.resize(offset as usize, 0);
            image.extend_from_slice(&data);
        }
        image.resize(cursor as usize, 0);

        Ok((image, header, tree))
    }

    /// Serialize the archive and, when a file is involved, store it.
    ///
    /// The complete image is built in memory first. An archive whose entries
    /// were never changed keeps its body byte for byte; anything else is laid
    /// out again: header, table of contents, then payloads on 512-byte
    /// blocks in entry order.
    ///
    /// With `target`, the image goes to that path (created if needed), which
    /// then becomes the backing file. Without it the image replaces the
    /// current backing file in place. A fresh archive with neither only
    /// returns the bytes and keeps its changes pending.
    ///
    /// Nothing on disk changes unless the image was built and the target
    /// opened.
    pub fn write(&mut self, target: Option<&Path>) -> Result<(Vec<u8>, usize)> {
        let (image, header, tree) = match self.on_disk {
            Some(on_disk) if !self.modified && self.file.is_some() => {
                (self.passthrough_image(&on_disk)?, self.header, None)
            }
            _ => {
                let (image, header, tree) = self.full_image()?;
                (image, header, Some(tree))
            }
        };
        let len = image.len();

        let written = match target {
            Some(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?;
                store(&file, &image)?;
                self.file = Some(file);
                self.name = file_name(path);
                true
            }
            None => match &self.file {
                Some(file) => {
                    store(file, &image)?;
                    true
                }
                None => false,
            },
        };

        if written {
            info!("Wrote {} ({} bytes)", self.name, len);
            self.header = header;
            self.on_disk = Some(header);
            if tree.is_some() {
                self.root = tree;
            }
            self.pending.clear();
            self.modified = false;
        }

        Ok((image, len))
    }

    /// Release the backing file. Unwritten changes are discarded.
    pub fn close(mut self) -> Result<()> {
        if self.modified {
            warn!("Closing {} with unwritten changes", self.name);
        }
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

fn store(mut file: &File, image: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(image)?;
    file.set_len(image.len() as u64)?;
    file.flush()?;
    Ok(())
}
