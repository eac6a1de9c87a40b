//! Table of contents: the entry directory that follows the header.
//!
//! ```text
//! entry_count x 16-byte entries      entry 0 is the root directory
//! name table                         NUL-terminated names, zero padded to 16
//! ```
//!
//! Directory entry: `u32 name_offset, u32 0x7FFFFF00, u32 first_child, u32 child_count`.
//!
//! File entry: `u16 name_offset, u24 compressed_size, u24 block offset,
//! u32 uncompressed_size, u32 encrypted`. A compressed size of zero means the
//! payload is stored. Offsets count 512-byte blocks from the start of the
//! archive.
//!
//! The children of a directory are contiguous and directories are laid out
//! breadth first, so payload offsets grow in entry order.

use std::collections::HashSet;

use rpf_common::{BinaryReader, FromBytes, Immutable, IntoBytes, KnownLayout};
use tracing::debug;

use crate::{Error, Result};

/// Size of one TOC entry.
pub const ENTRY_SIZE: usize = 16;

/// Alignment of entry payloads, and the unit of file offsets.
pub const DATA_BLOCK: u64 = 512;

/// Marker in the second word of a directory entry.
const DIRECTORY_MARKER: u32 = 0x7FFF_FF00;

/// Offset bit that flags a resource entry.
const RESOURCE_FLAG: u32 = 0x80_0000;

/// Largest value of a 24-bit entry field.
pub(crate) const MAX_U24: u32 = 0xFF_FFFF;

/// Block offsets at or above this collide with the directory marker.
const MAX_BLOCK_OFFSET: u64 = 0x7F_FFFF;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct RawDirectoryEntry {
    name_offset: u32,
    marker: u32,
    first_child: u32,
    child_count: u32,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct RawFileEntry {
    name_offset: u16,
    compressed_size: [u8; 3],
    offset: [u8; 3],
    uncompressed_size: u32,
    encrypted: u32,
}

fn to_u24(value: u32) -> [u8; 3] {
    let b = value.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// Whether `name` can be stored as a single path component.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\0', '/', '\\'])
}

/// Round `value` up to the next payload block.
pub fn align_block(value: u64) -> u64 {
    value.div_ceil(DATA_BLOCK) * DATA_BLOCK
}

/// A file in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Name within its directory.
    pub name: String,
    /// Byte offset of the payload from the start of the archive.
    pub offset: u64,
    /// Deflated payload size, or 0 when stored.
    pub compressed_size: u32,
    /// Size after decryption and inflation.
    pub uncompressed_size: u32,
    /// Whether the payload is encrypted with the archive's scheme.
    pub encrypted: bool,
}

impl FileEntry {
    /// A stored, unencrypted entry of `size` bytes.
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            offset: 0,
            compressed_size: 0,
            uncompressed_size: size,
            encrypted: false,
        }
    }

    /// Whether the payload is deflated.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != 0
    }

    /// Number of payload bytes on disk.
    #[inline]
    pub fn stored_size(&self) -> u64 {
        if self.is_compressed() {
            self.compressed_size as u64
        } else {
            self.uncompressed_size as u64
        }
    }

}

/// A directory and its ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryNode {
    /// Name within the parent; empty for the root.
    pub name: String,
    /// Children in on-disk order.
    pub children: Vec<DirectoryEntry>,
}

/// A node of the entry tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEntry {
    File(FileEntry),
    Directory(DirectoryNode),
}

impl DirectoryEntry {
    /// Entry name.
    pub fn name(&self) -> &str {
        match self {
            DirectoryEntry::File(f) => &f.name,
            DirectoryEntry::Directory(d) => &d.name,
        }
    }

    /// The file, if this is one.
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            DirectoryEntry::File(f) => Some(f),
            DirectoryEntry::Directory(_) => None,
        }
    }

    /// The directory, if this is one.
    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            DirectoryEntry::Directory(d) => Some(d),
            DirectoryEntry::File(_) => None,
        }
    }

    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, DirectoryEntry::Directory(_))
    }
}

/// Split an archive path on either separator, dropping empty components.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|c| !c.is_empty()).collect()
}

impl DirectoryNode {
    /// An empty directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Look up a direct child, ignoring ASCII case.
    pub fn child(&self, name: &str) -> Option<&DirectoryEntry> {
        self.children
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Look up an entry by path relative to this directory.
    pub fn find(&self, path: &str) -> Option<&DirectoryEntry> {
        let components = split_path(path);
        let (last, parents) = components.split_last()?;
        let mut dir = self;
        for component in parents {
            dir = dir.child(component)?.as_directory()?;
        }
        dir.child(last)
    }

    /// Mutable lookup of a file by path.
    pub fn find_file_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        let components = split_path(path);
        let (last, parents) = components.split_last()?;
        let mut dir = self;
        for component in parents {
            let idx = dir.child_index(component)?;
            dir = match &mut dir.children[idx] {
                DirectoryEntry::Directory(d) => d,
                DirectoryEntry::File(_) => return None,
            };
        }
        let idx = dir.child_index(last)?;
        match &mut dir.children[idx] {
            DirectoryEntry::File(f) => Some(f),
            DirectoryEntry::Directory(_) => None,
        }
    }

    /// Add a child, rejecting a name already in use.
    pub fn insert(&mut self, entry: DirectoryEntry) -> Result<()> {
        if self.child(entry.name()).is_some() {
            return Err(Error::DuplicateEntry(entry.name().to_string()));
        }
        self.children.push(entry);
        Ok(())
    }

    /// Get or create the directory at `components`.
    pub fn make_dirs(&mut self, components: &[&str]) -> Result<&mut DirectoryNode> {
        let mut dir = self;
        for component in components {
            let idx = match dir.child_index(component) {
                Some(idx) => idx,
                None => {
                    dir.children
                        .push(DirectoryEntry::Directory(DirectoryNode::new(*component)));
                    dir.children.len() - 1
                }
            };
            dir = match &mut dir.children[idx] {
                DirectoryEntry::Directory(d) => d,
                DirectoryEntry::File(f) => return Err(Error::InvalidPath(f.name.clone())),
            };
        }
        Ok(dir)
    }

    /// Remove the entry at `path`.
    pub fn remove(&mut self, path: &str) -> Option<DirectoryEntry> {
        let components = split_path(path);
        let (last, parents) = components.split_last()?;
        let mut dir = self;
        for component in parents {
            let idx = dir.child_index(component)?;
            dir = match &mut dir.children[idx] {
                DirectoryEntry::Directory(d) => d,
                DirectoryEntry::File(_) => return None,
            };
        }
        let idx = dir.child_index(last)?;
        Some(dir.children.remove(idx))
    }

    /// All files with their paths, in on-disk entry order.
    pub fn files(&self) -> Vec<(String, &FileEntry)> {
        flatten(self)
            .into_iter()
            .filter_map(|flat| match flat.kind {
                FlatKind::File(f) => Some((flat.path, f)),
                FlatKind::Dir { .. } => None,
            })
            .collect()
    }

    /// Number of TOC entries this tree encodes to, itself included.
    pub fn entry_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|c| match c {
                DirectoryEntry::File(_) => 1,
                DirectoryEntry::Directory(d) => d.entry_count(),
            })
            .sum::<usize>()
    }
}

#[derive(Clone, Copy)]
enum FlatKind<'a> {
    Dir {
        node: &'a DirectoryNode,
        first: u32,
        count: u32,
    },
    File(&'a FileEntry),
}

struct Flat<'a> {
    path: String,
    kind: FlatKind<'a>,
}

impl Flat<'_> {
    fn name(&self) -> &str {
        match self.kind {
            FlatKind::Dir { node, .. } => &node.name,
            FlatKind::File(f) => &f.name,
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Breadth-first layout of the tree: entry 0 is `root`.
fn flatten(root: &DirectoryNode) -> Vec<Flat<'_>> {
    let mut flat = vec![Flat {
        path: String::new(),
        kind: FlatKind::Dir {
            node: root,
            first: 0,
            count: 0,
        },
    }];

    let mut cursor = 0;
    while cursor < flat.len() {
        if let FlatKind::Dir { node, .. } = flat[cursor].kind {
            let first = flat.len() as u32;
            let parent = flat[cursor].path.clone();
            for child in &node.children {
                let kind = match child {
                    DirectoryEntry::File(f) => FlatKind::File(f),
                    DirectoryEntry::Directory(d) => FlatKind::Dir {
                        node: d,
                        first: 0,
                        count: 0,
                    },
                };
                flat.push(Flat {
                    path: join(&parent, child.name()),
                    kind,
                });
            }
            flat[cursor].kind = FlatKind::Dir {
                node,
                first,
                count: node.children.len() as u32,
            };
        }
        cursor += 1;
    }

    flat
}

/// File paths in on-disk entry order.
pub fn file_paths(root: &DirectoryNode) -> Vec<String> {
    root.files().into_iter().map(|(path, _)| path).collect()
}

fn name_table_len(flat: &[Flat<'_>]) -> usize {
    // Root name is the empty string at offset 0.
    let raw = 1 + flat[1..].iter().map(|f| f.name().len() + 1).sum::<usize>();
    raw.next_multiple_of(ENTRY_SIZE)
}

/// Encoded size of the TOC for `root`.
pub fn encoded_len(root: &DirectoryNode) -> usize {
    let flat = flatten(root);
    flat.len() * ENTRY_SIZE + name_table_len(&flat)
}

/// An encoded table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedToc {
    /// Entries followed by the name table.
    pub bytes: Vec<u8>,
    /// Number of entries, root included.
    pub entry_count: u32,
}

/// Encode the tree. File offsets must already be block aligned.
pub fn encode(root: &DirectoryNode) -> Result<EncodedToc> {
    let flat = flatten(root);

    let mut names = vec![0u8];
    let mut name_offsets = vec![0usize];
    for entry in &flat[1..] {
        let name = entry.name();
        if !is_valid_name(name) {
            return Err(Error::InvalidPath(entry.path.clone()));
        }
        name_offsets.push(names.len());
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }
    names.resize(names.len().next_multiple_of(ENTRY_SIZE), 0);

    let mut bytes = Vec::with_capacity(flat.len() * ENTRY_SIZE + names.len());
    for (entry, &name_offset) in flat.iter().zip(&name_offsets) {
        match entry.kind {
            FlatKind::Dir { first, count, .. } => {
                let raw = RawDirectoryEntry {
                    name_offset: name_offset as u32,
                    marker: DIRECTORY_MARKER,
                    first_child: first,
                    child_count: count,
                };
                bytes.extend_from_slice(raw.as_bytes());
            }
            FlatKind::File(file) => {
                let raw = encode_file(file, name_offset, &entry.path)?;
                bytes.extend_from_slice(raw.as_bytes());
            }
        }
    }
    bytes.extend_from_slice(&names);

    debug!(
        "Encoded TOC: {} entries, {} name bytes",
        flat.len(),
        names.len()
    );

    Ok(EncodedToc {
        bytes,
        entry_count: flat.len() as u32,
    })
}

fn encode_file(file: &FileEntry, name_offset: usize, path: &str) -> Result<RawFileEntry> {
    if name_offset > u16::MAX as usize {
        return Err(Error::Overflow {
            field: "name offset",
            value: name_offset as u64,
            max: u16::MAX as u64,
        });
    }
    if file.compressed_size > MAX_U24 {
        return Err(Error::Overflow {
            field: "compressed size",
            value: file.compressed_size as u64,
            max: MAX_U24 as u64,
        });
    }
    if file.offset % DATA_BLOCK != 0 {
        return Err(Error::InvalidToc(format!(
            "{path}: offset {:#x} is not block aligned",
            file.offset
        )));
    }
    let blocks = file.offset / DATA_BLOCK;
    if blocks >= MAX_BLOCK_OFFSET {
        return Err(Error::Overflow {
            field: "block offset",
            value: blocks,
            max: MAX_BLOCK_OFFSET - 1,
        });
    }

    Ok(RawFileEntry {
        name_offset: name_offset as u16,
        compressed_size: to_u24(file.compressed_size),
        offset: to_u24(blocks as u32),
        uncompressed_size: file.uncompressed_size,
        encrypted: file.encrypted as u32,
    })
}

enum Parsed {
    Dir {
        name_offset: u32,
        first: u32,
        count: u32,
    },
    File {
        name_offset: u16,
        compressed_size: u32,
        blocks: u32,
        uncompressed_size: u32,
        encrypted: bool,
    },
}

fn parse_entry(index: usize, bytes: &[u8]) -> Result<Parsed> {
    let marker = BinaryReader::new_at(bytes, 4)?.peek_u32()?;
    let mut reader = BinaryReader::new(bytes);

    if marker == DIRECTORY_MARKER {
        let raw: RawDirectoryEntry = reader.read_struct()?;
        return Ok(Parsed::Dir {
            name_offset: raw.name_offset,
            first: raw.first_child,
            count: raw.child_count,
        });
    }

    let name_offset = reader.read_u16()?;
    let compressed_size = reader.read_u24()?;
    let blocks = reader.read_u24()?;
    if blocks & RESOURCE_FLAG != 0 {
        return Err(Error::UnsupportedEntry(format!(
            "entry {index} is a resource entry"
        )));
    }

    Ok(Parsed::File {
        name_offset,
        compressed_size,
        blocks,
        uncompressed_size: reader.read_u32()?,
        encrypted: reader.read_u32()? != 0,
    })
}

fn read_name(names: &[u8], offset: usize) -> Result<String> {
    let name = BinaryReader::new_at(names, offset)
        .and_then(|mut r| r.read_cstring().map(str::to_string))
        .map_err(|e| Error::InvalidToc(format!("name at {offset}: {e}")))?;
    if !is_valid_name(&name) {
        return Err(Error::InvalidToc(format!(
            "name at {offset} is not a path component: {name:?}"
        )));
    }
    Ok(name)
}

struct Decoder<'a> {
    entries: Vec<Parsed>,
    names: &'a [u8],
    claimed: Vec<bool>,
}

impl Decoder<'_> {
    fn directory(&mut self, index: usize, name: String, depth: usize) -> Result<DirectoryNode> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidToc(format!(
                "directories nested deeper than {MAX_DEPTH}"
            )));
        }

        let (first, count) = match self.entries[index] {
            Parsed::Dir { first, count, .. } => (first as usize, count as usize),
            Parsed::File { .. } => {
                return Err(Error::InvalidToc(format!("entry {index} is not a directory")))
            }
        };

        let end = first.checked_add(count).unwrap_or(usize::MAX);
        if count > 0 && (first <= index || end > self.entries.len()) {
            return Err(Error::InvalidToc(format!(
                "directory {index} children {first}..{end} out of range"
            )));
        }

        let mut node = DirectoryNode::new(name);
        node.children.reserve(count);
        for child in first..first + count {
            if std::mem::replace(&mut self.claimed[child], true) {
                return Err(Error::InvalidToc(format!(
                    "entry {child} belongs to more than one directory"
                )));
            }

            let entry = match self.entries[child] {
                Parsed::Dir { name_offset, .. } => {
                    let name = read_name(self.names, name_offset as usize)?;
                    DirectoryEntry::Directory(self.directory(child, name, depth + 1)?)
                }
                Parsed::File {
                    name_offset,
                    compressed_size,
                    blocks,
                    uncompressed_size,
                    encrypted,
                } => DirectoryEntry::File(FileEntry {
                    name: read_name(self.names, name_offset as usize)?,
                    offset: blocks as u64 * DATA_BLOCK,
                    compressed_size,
                    uncompressed_size,
                    encrypted,
                }),
            };
            node.children.push(entry);
        }

        Ok(node)
    }
}

/// Decode a plaintext TOC holding `entry_count` entries.
pub fn decode(toc: &[u8], entry_count: u32) -> Result<DirectoryNode> {
    if entry_count == 0 {
        return Ok(DirectoryNode::default());
    }

    let count = entry_count as usize;
    let table_len = count
        .checked_mul(ENTRY_SIZE)
        .filter(|&len| len <= toc.len())
        .ok_or_else(|| {
            Error::InvalidToc(format!(
                "{entry_count} entries do not fit in {} TOC bytes",
                toc.len()
            ))
        })?;

    let (table, names) = toc.split_at(table_len);
    let entries = table
        .chunks_exact(ENTRY_SIZE)
        .enumerate()
        .map(|(i, bytes)| parse_entry(i, bytes))
        .collect::<Result<Vec<_>>>()?;

    let mut decoder = Decoder {
        entries,
        names,
        claimed: vec![false; count],
    };
    decoder.claimed[0] = true;
    let root = decoder.directory(0, String::new(), 0)?;

    let orphans = decoder.claimed.iter().filter(|c| !**c).count();
    if orphans > 0 {
        return Err(Error::InvalidToc(format!(
            "{orphans} entries are not reachable from the root"
        )));
    }

    Ok(root)
}

/// Check the tree against the archive it came from.
///
/// Names must be unique within each directory, payload offsets must not
/// decrease in entry order, and every payload must lie inside
/// `physical_size` bytes.
pub fn validate(root: &DirectoryNode, physical_size: u64) -> Result<()> {
    let flat = flatten(root);
    let mut last_offset = 0u64;
    let mut total = 0u64;

    for entry in &flat {
        match entry.kind {
            FlatKind::Dir { node, .. } => {
                let mut seen = HashSet::with_capacity(node.children.len());
                for child in &node.children {
                    if !seen.insert(child.name().to_ascii_lowercase()) {
                        return Err(Error::DuplicateEntry(join(&entry.path, child.name())));
                    }
                }
            }
            FlatKind::File(file) => {
                let size = file.stored_size();
                if size == 0 {
                    continue;
                }
                if file.offset < last_offset {
                    return Err(Error::InvalidToc(format!(
                        "{}: offset {:#x} precedes previous entry at {:#x}",
                        entry.path, file.offset, last_offset
                    )));
                }
                last_offset = file.offset;

                let end = file.offset.saturating_add(size);
                total = total.saturating_add(size);
                if end > physical_size || total > physical_size {
                    return Err(Error::InvalidToc(format!(
                        "{}: payload {:#x}..{:#x} exceeds archive size {:#x}",
                        entry.path, file.offset, end, physical_size
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, offset: u64, size: u32) -> DirectoryEntry {
        DirectoryEntry::File(FileEntry {
            offset,
            ..FileEntry::new(name, size)
        })
    }

    fn sample_tree() -> DirectoryNode {
        let mut common = DirectoryNode::new("common");
        common.children.push(file("gxt2.meta", 1024, 100));
        let mut data = DirectoryNode::new("data");
        data.children.push(file("handling.meta", 1536, 2000));
        common.children.push(DirectoryEntry::Directory(data));

        let mut root = DirectoryNode::default();
        root.children.push(file("readme.txt", 512, 10));
        root.children.push(DirectoryEntry::Directory(common));
        root
    }

    #[test]
    fn test_flatten_is_breadth_first() {
        let root = sample_tree();
        let paths = file_paths(&root);
        assert_eq!(
            paths,
            vec!["readme.txt", "common/gxt2.meta", "common/data/handling.meta"]
        );
        assert_eq!(root.entry_count(), 6);
    }

    #[test]
    fn test_encode_decode_tree() {
        let root = sample_tree();
        let toc = encode(&root).unwrap();

        assert_eq!(toc.entry_count, 6);
        assert_eq!(toc.bytes.len(), encoded_len(&root));
        assert_eq!(toc.bytes.len() % ENTRY_SIZE, 0);

        let decoded = decode(&toc.bytes, toc.entry_count).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn test_raw_entry_layout() {
        let mut root = DirectoryNode::default();
        root.children.push(DirectoryEntry::File(FileEntry {
            name: "a.bin".into(),
            offset: 3 * DATA_BLOCK,
            compressed_size: 0x010203,
            uncompressed_size: 0x11223344,
            encrypted: true,
        }));
        let toc = encode(&root).unwrap();
        let b = &toc.bytes;

        // Root directory.
        assert_eq!(&b[0..4], &0u32.to_le_bytes());
        assert_eq!(&b[4..8], &DIRECTORY_MARKER.to_le_bytes());
        assert_eq!(&b[8..12], &1u32.to_le_bytes());
        assert_eq!(&b[12..16], &1u32.to_le_bytes());

        // File entry.
        assert_eq!(&b[16..18], &1u16.to_le_bytes());
        assert_eq!(&b[18..21], &[0x03, 0x02, 0x01]);
        assert_eq!(&b[21..24], &[3, 0, 0]);
        assert_eq!(&b[24..28], &0x11223344u32.to_le_bytes());
        assert_eq!(&b[28..32], &1u32.to_le_bytes());

        // Names.
        assert_eq!(&b[32..39], b"\0a.bin\0");
        assert_eq!(b.len(), 48);
    }

    #[test]
    fn test_empty_tree() {
        let root = DirectoryNode::default();
        let toc = encode(&root).unwrap();
        assert_eq!(toc.entry_count, 1);
        assert_eq!(decode(&toc.bytes, 1).unwrap(), root);
        assert_eq!(decode(&[], 0).unwrap(), root);
    }

    #[test]
    fn test_find_and_remove() {
        let mut root = sample_tree();

        let entry = root.find("Common\\Data/HANDLING.meta").unwrap();
        assert_eq!(entry.as_file().unwrap().uncompressed_size, 2000);
        assert!(root.find("common/missing").is_none());
        assert!(root.find("readme.txt/child").is_none());
        assert!(root.find("").is_none());

        root.find_file_mut("common/gxt2.meta").unwrap().encrypted = true;
        assert!(root.find("common/gxt2.meta").unwrap().as_file().unwrap().encrypted);

        let removed = root.remove("common/data").unwrap();
        assert!(removed.is_dir());
        assert_eq!(root.entry_count(), 4);
    }

    #[test]
    fn test_make_dirs_and_duplicates() {
        let mut root = DirectoryNode::default();
        let dir = root.make_dirs(&["x64", "audio"]).unwrap();
        dir.insert(file("sfx.awc", 0, 1)).unwrap();
        assert!(matches!(
            dir.insert(file("SFX.awc", 0, 1)),
            Err(Error::DuplicateEntry(_))
        ));

        // Existing directories are reused.
        root.make_dirs(&["X64"]).unwrap();
        assert_eq!(root.children.len(), 1);

        assert!(matches!(
            root.make_dirs(&["x64", "audio", "sfx.awc"]),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resource_entries_rejected() {
        let mut root = DirectoryNode::default();
        root.children.push(file("model.ydr", 512, 4));
        let mut bytes = encode(&root).unwrap().bytes;
        bytes[23] |= 0x80;

        assert!(matches!(
            decode(&bytes, 2),
            Err(Error::UnsupportedEntry(_))
        ));
    }

    #[test]
    fn test_entry_count_exceeding_toc() {
        let toc = encode(&sample_tree()).unwrap();
        let err = decode(&toc.bytes[..64], 6).unwrap_err();
        assert!(matches!(err, Error::InvalidToc(_)));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_child_range_out_of_bounds() {
        let toc = encode(&sample_tree()).unwrap();
        let mut bytes = toc.bytes;
        // Root claims 9 children.
        bytes[12..16].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(decode(&bytes, 6), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn test_self_referencing_directory() {
        let toc = encode(&sample_tree()).unwrap();
        let mut bytes = toc.bytes;
        // Root's first child points back at the root.
        bytes[8..12].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(decode(&bytes, 6), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn test_orphan_entries() {
        let toc = encode(&sample_tree()).unwrap();
        let mut bytes = toc.bytes;
        bytes[12..16].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(decode(&bytes, 6), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn test_misaligned_offset() {
        let mut root = DirectoryNode::default();
        root.children.push(file("a", 100, 1));
        assert!(matches!(encode(&root), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn test_invalid_names() {
        let mut root = DirectoryNode::default();
        root.children.push(file("a/b", 0, 1));
        assert!(matches!(encode(&root), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_decoded_names_must_be_components() {
        let mut root = DirectoryNode::default();
        root.children.push(file("a.bin", 512, 4));
        let bytes = encode(&root).unwrap().bytes;
        assert_eq!(&bytes[32..39], b"\0a.bin\0");

        // A separator inside a stored name.
        let mut slashed = bytes.clone();
        slashed[34] = b'/';
        assert!(matches!(decode(&slashed, 2), Err(Error::InvalidToc(_))));

        let mut backslashed = bytes.clone();
        backslashed[34] = b'\\';
        assert!(matches!(decode(&backslashed, 2), Err(Error::InvalidToc(_))));

        // A file pointing at the root's empty name.
        let mut unnamed = bytes;
        unnamed[16..18].copy_from_slice(&0u16.to_le_bytes());
        let err = decode(&unnamed, 2).unwrap_err();
        assert!(matches!(err, Error::InvalidToc(_)));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_validate() {
        let root = sample_tree();
        validate(&root, 1536 + 2000).unwrap();

        assert!(matches!(
            validate(&root, 3000),
            Err(Error::InvalidToc(_))
        ));

        let mut dup = sample_tree();
        dup.children.push(file("README.TXT", 4096, 1));
        assert!(matches!(
            validate(&dup, 1 << 20),
            Err(Error::DuplicateEntry(_))
        ));

        let mut unordered = DirectoryNode::default();
        unordered.children.push(file("b", 1024, 4));
        unordered.children.push(file("a", 512, 4));
        assert!(matches!(
            validate(&unordered, 1 << 20),
            Err(Error::InvalidToc(_))
        ));
    }

    #[test]
    fn test_align_block() {
        assert_eq!(align_block(0), 0);
        assert_eq!(align_block(1), 512);
        assert_eq!(align_block(512), 512);
        assert_eq!(align_block(513), 1024);
    }
}
