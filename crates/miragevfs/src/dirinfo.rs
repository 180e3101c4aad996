//! Native directory-information record layouts.
//!
//! Directory enumeration answers land in a caller buffer as a chain of
//! variable-length records: each starts with a "distance to next record"
//! field (zero terminates the chain), carries layout-specific metadata, and
//! ends with a UTF-16LE file name. Eight layouts exist, differing only in
//! which metadata fields sit between the header and the name.
//!
//! Records are handled as an explicit byte arena indexed by offsets, never
//! as a linked list of references, so entries can be spliced out of a
//! finished chain by rewriting offsets in place.

use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0020;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0080;

/// Seconds between 1601-01-01 (native epoch) and 1970-01-01 (Unix epoch).
const EPOCH_DELTA_SECS: u64 = 11_644_473_600;

/// Convert a system time to 100-nanosecond intervals since 1601.
pub fn filetime_from_system(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => (EPOCH_DELTA_SECS + since.as_secs()) * 10_000_000
            + u64::from(since.subsec_nanos()) / 100,
        // Pre-1970 timestamps round down to the Unix epoch.
        Err(_) => EPOCH_DELTA_SECS * 10_000_000,
    }
}

/// Which record layout the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoClass {
    /// Times, sizes, attributes.
    Directory,
    /// `Directory` plus an extended-attribute size.
    FullDirectory,
    /// `FullDirectory` plus a short-name slot.
    BothDirectory,
    /// Name only.
    Names,
    /// `BothDirectory` plus a 64-bit file id.
    IdBothDirectory,
    /// `FullDirectory` plus a 64-bit file id.
    IdFullDirectory,
    /// Extended layout: reparse tag and a 128-bit file id.
    IdExtdDirectory,
    /// Extended layout with the short-name slot.
    IdExtdBothDirectory,
}

impl InfoClass {
    /// Byte offset of the UTF-16 file name within a record.
    pub fn name_offset(self) -> usize {
        match self {
            InfoClass::Names => 12,
            InfoClass::Directory => 64,
            InfoClass::FullDirectory => 68,
            InfoClass::IdFullDirectory => 80,
            InfoClass::IdExtdDirectory => 88,
            InfoClass::BothDirectory => 94,
            InfoClass::IdBothDirectory => 104,
            InfoClass::IdExtdBothDirectory => 114,
        }
    }

    /// Byte offset of the name-length field.
    fn name_length_offset(self) -> usize {
        match self {
            InfoClass::Names => 8,
            _ => 60,
        }
    }
}

/// Layout-independent metadata of one directory entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub attributes: u32,
    pub size: u64,
    pub allocation_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub file_id: u128,
    pub ea_size: u32,
    pub reparse_tag: u32,
}

impl FileEntry {
    /// Query the real file system for the entry backing a synthesized
    /// record. `name` is the name the entry should carry in the listing,
    /// which may differ in case from the on-disk name.
    pub fn from_path(path: &Path, name: &str) -> io::Result<FileEntry> {
        let metadata = std::fs::metadata(path)?;

        let mut attributes = if metadata.is_dir() {
            FILE_ATTRIBUTE_DIRECTORY
        } else {
            FILE_ATTRIBUTE_ARCHIVE
        };
        if metadata.permissions().readonly() {
            attributes |= FILE_ATTRIBUTE_READONLY;
        }

        let written = metadata
            .modified()
            .map(filetime_from_system)
            .unwrap_or_default();
        let accessed = metadata
            .accessed()
            .map(filetime_from_system)
            .unwrap_or(written);
        let created = metadata
            .created()
            .map(filetime_from_system)
            .unwrap_or(written);

        Ok(FileEntry {
            name: name.to_string(),
            attributes,
            size: metadata.len(),
            allocation_size: metadata.len().next_multiple_of(512),
            creation_time: created,
            last_access_time: accessed,
            last_write_time: written,
            change_time: written,
            file_id: file_id_of(&metadata),
            ea_size: 0,
            reparse_tag: 0,
        })
    }
}

#[cfg(unix)]
fn file_id_of(metadata: &std::fs::Metadata) -> u128 {
    use std::os::unix::fs::MetadataExt;
    u128::from(metadata.ino())
}

#[cfg(not(unix))]
fn file_id_of(_metadata: &std::fs::Metadata) -> u128 {
    0
}

/// Records start on 8-byte boundaries.
pub fn align8(offset: usize) -> usize {
    (offset + 7) & !7
}

/// Total byte length of one record for `name` in `class` layout.
pub fn record_len(class: InfoClass, name: &str) -> usize {
    class.name_offset() + name.encode_utf16().count() * 2
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().expect("bounds checked"))
}

thread_local! {
    // Scratch for UTF-16 name encoding; avoids an allocation per record.
    static NAME_SCRATCH: RefCell<Vec<u16>> = const { RefCell::new(Vec::new()) };
}

/// Serialize `entry` into `buf` at `offset` in the selected layout, with a
/// zero next-entry offset. Returns the record length, or `None` if the
/// record does not fit.
pub fn write_entry(buf: &mut [u8], offset: usize, class: InfoClass, entry: &FileEntry) -> Option<usize> {
    let len = record_len(class, &entry.name);
    if offset + len > buf.len() {
        return None;
    }
    let record = &mut buf[offset..offset + len];
    record.fill(0);

    put_u32(record, 0, 0); // next-entry offset, patched by the chain writer
    put_u32(record, 4, 0); // file index, unused by modern callers

    if class != InfoClass::Names {
        put_u64(record, 8, entry.creation_time);
        put_u64(record, 16, entry.last_access_time);
        put_u64(record, 24, entry.last_write_time);
        put_u64(record, 32, entry.change_time);
        put_u64(record, 40, entry.size);
        put_u64(record, 48, entry.allocation_size);
        put_u32(record, 56, entry.attributes);
    }
    put_u32(record, class.name_length_offset(), (len - class.name_offset()) as u32);

    match class {
        InfoClass::Names | InfoClass::Directory => {}
        InfoClass::FullDirectory | InfoClass::BothDirectory => {
            put_u32(record, 64, entry.ea_size);
            // BothDirectory's short-name slot (length at 68, WCHAR[12] at
            // 70) stays zeroed: short names are not synthesized.
        }
        InfoClass::IdFullDirectory => {
            put_u32(record, 64, entry.ea_size);
            put_u64(record, 72, entry.file_id as u64);
        }
        InfoClass::IdBothDirectory => {
            put_u32(record, 64, entry.ea_size);
            put_u64(record, 96, entry.file_id as u64);
        }
        InfoClass::IdExtdDirectory | InfoClass::IdExtdBothDirectory => {
            put_u32(record, 64, entry.ea_size);
            put_u32(record, 68, entry.reparse_tag);
            record[72..88].copy_from_slice(&entry.file_id.to_le_bytes());
        }
    }

    let name_offset = class.name_offset();
    NAME_SCRATCH.with(|scratch| {
        let mut scratch = scratch.borrow_mut();
        scratch.clear();
        scratch.extend(entry.name.encode_utf16());
        for (index, unit) in scratch.iter().enumerate() {
            let at = name_offset + index * 2;
            record[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
    });

    Some(len)
}

/// Next-entry offset of the record at `offset`.
pub fn read_next_offset(buf: &[u8], offset: usize) -> u32 {
    get_u32(buf, offset)
}

/// Patch the next-entry offset of the record at `offset`.
pub fn write_next_offset(buf: &mut [u8], offset: usize, value: u32) {
    put_u32(buf, offset, value);
}

/// File name of the record at `offset`.
pub fn read_name(buf: &[u8], offset: usize, class: InfoClass) -> String {
    let name_len = get_u32(buf, offset + class.name_length_offset()) as usize;
    let start = offset + class.name_offset();
    let units: Vec<u16> = buf[start..start + name_len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Byte length of the record at `offset` (header through name, unpadded).
fn record_byte_len(buf: &[u8], offset: usize, class: InfoClass) -> usize {
    class.name_offset() + get_u32(buf, offset + class.name_length_offset()) as usize
}

/// All record names of a chain starting at byte 0 of `buf`. Diagnostic
/// helper; `len` bounds the chain.
pub fn chain_names(buf: &[u8], len: usize, class: InfoClass) -> Vec<String> {
    let mut names = Vec::new();
    if len == 0 {
        return names;
    }
    let mut offset = 0usize;
    loop {
        names.push(read_name(buf, offset, class));
        let next = read_next_offset(buf, offset) as usize;
        if next == 0 {
            break;
        }
        offset += next;
    }
    names
}

/// Remove every record whose name fails `keep` from the chain in
/// `buf[..len]`, preserving chain validity: interior records are spliced out
/// by rewriting the previous record's next-entry offset, a removed head
/// shifts the remainder of the chain to the front. Returns the new used
/// length (0 when nothing survives).
pub fn filter_chain(
    buf: &mut [u8],
    mut len: usize,
    class: InfoClass,
    mut keep: impl FnMut(&str) -> bool,
) -> usize {
    if len == 0 {
        return 0;
    }

    // Drop rejected head records by shifting the rest of the chain down.
    loop {
        let name = read_name(buf, 0, class);
        if keep(&name) {
            break;
        }
        let next = read_next_offset(buf, 0) as usize;
        if next == 0 {
            return 0;
        }
        buf.copy_within(next..len, 0);
        len -= next;
    }

    // Splice rejected interior records out by relinking.
    let mut previous = 0usize;
    loop {
        let distance = read_next_offset(buf, previous) as usize;
        if distance == 0 {
            break;
        }
        let current = previous + distance;
        let name = read_name(buf, current, class);
        if keep(&name) {
            previous = current;
            continue;
        }
        let current_next = read_next_offset(buf, current) as usize;
        if current_next == 0 {
            write_next_offset(buf, previous, 0);
            len = previous + record_byte_len(buf, previous, class);
            break;
        }
        write_next_offset(buf, previous, (distance + current_next) as u32);
    }
    len
}

/// Appends records to a chain, maintaining alignment and next-entry links.
pub struct ChainWriter<'a> {
    buf: &'a mut [u8],
    class: InfoClass,
    last_offset: Option<usize>,
    used: usize,
    count: usize,
}

impl<'a> ChainWriter<'a> {
    pub fn new(buf: &'a mut [u8], class: InfoClass) -> Self {
        ChainWriter {
            buf,
            class,
            last_offset: None,
            used: 0,
            count: 0,
        }
    }

    /// Append one record. Returns `false` (leaving the chain untouched) if
    /// the record does not fit in the remaining space.
    pub fn append(&mut self, entry: &FileEntry) -> bool {
        let offset = align8(self.used);
        let Some(len) = write_entry(self.buf, offset, self.class, entry) else {
            return false;
        };
        if let Some(previous) = self.last_offset {
            write_next_offset(self.buf, previous, (offset - previous) as u32);
        }
        self.last_offset = Some(offset);
        self.used = offset + len;
        self.count += 1;
        true
    }

    /// Records appended so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes used through the end of the last record.
    pub fn bytes_used(&self) -> usize {
        self.used
    }

    /// Offset of the most recently appended record.
    pub fn last_offset(&self) -> Option<usize> {
        self.last_offset
    }
}
