//! The native enumeration protocol this layer consumes.
//!
//! A query takes a destination buffer, a record layout selector, flags and
//! an optional wildcard name filter, and yields a zero-terminated chain of
//! records. Exhaustion ("no more files") is a distinct outcome from "the
//! next record does not fit": callers retry the latter with a bigger
//! buffer and stop on the former.
//!
//! [`StdDirectoryEnumerator`] implements the protocol over a real directory
//! via `std::fs::read_dir`: it is the delegate used in tests, and a
//! reference for hosts whose hook layer forwards to the original call.

use std::io;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::dirinfo::{ChainWriter, FileEntry, InfoClass};
use crate::wildcard;

bitflags! {
    /// Flags of one enumeration call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        /// Restart the listing from the beginning.
        const RESTART_SCAN = 0x01;
        /// Return at most one record.
        const RETURN_SINGLE_ENTRY = 0x02;
    }
}

/// Outcome of one enumeration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStatus {
    /// One or more records were written; `bytes` is the used length.
    Complete { bytes: usize },
    /// The listing is exhausted; nothing was written.
    NoMoreFiles,
    /// Not even one record fits the buffer; nothing was written.
    BufferTooSmall,
}

/// One open directory listing. Implementations keep their own position and
/// honor restart/single-entry/filter semantics.
pub trait DirectoryEnumerator {
    fn query(
        &mut self,
        buf: &mut [u8],
        class: InfoClass,
        flags: QueryFlags,
        filter: Option<&str>,
    ) -> io::Result<EnumStatus>;
}

/// Protocol implementation over a real directory.
pub struct StdDirectoryEnumerator {
    dir: PathBuf,
    /// Loaded lazily; `None` until the first query or after a restart.
    entries: Option<Vec<FileEntry>>,
    cursor: usize,
}

impl StdDirectoryEnumerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StdDirectoryEnumerator {
            dir: dir.into(),
            entries: None,
            cursor: 0,
        }
    }

    /// Snapshot the directory, sorted by folded name for a stable order.
    fn load(&mut self) -> io::Result<()> {
        let mut entries = Vec::new();
        for result in std::fs::read_dir(&self.dir)? {
            let dir_entry = result?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            match FileEntry::from_path(&dir_entry.path(), &name) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    tracing::warn!(%error, name, "entry metadata unavailable; skipped");
                }
            }
        }
        entries.sort_by_key(|entry| entry.name.to_uppercase());
        self.entries = Some(entries);
        self.cursor = 0;
        Ok(())
    }
}

impl DirectoryEnumerator for StdDirectoryEnumerator {
    fn query(
        &mut self,
        buf: &mut [u8],
        class: InfoClass,
        flags: QueryFlags,
        filter: Option<&str>,
    ) -> io::Result<EnumStatus> {
        if flags.contains(QueryFlags::RESTART_SCAN) || self.entries.is_none() {
            self.load()?;
        }
        let entries = self.entries.as_ref().expect("loaded above");

        let mut writer = ChainWriter::new(buf, class);
        while self.cursor < entries.len() {
            let entry = &entries[self.cursor];
            if let Some(pattern) = filter {
                if !wildcard::matches(pattern, &entry.name) {
                    self.cursor += 1;
                    continue;
                }
            }
            if !writer.append(entry) {
                return Ok(if writer.count() > 0 {
                    EnumStatus::Complete {
                        bytes: writer.bytes_used(),
                    }
                } else {
                    EnumStatus::BufferTooSmall
                });
            }
            self.cursor += 1;
            if flags.contains(QueryFlags::RETURN_SINGLE_ENTRY) {
                break;
            }
        }

        Ok(if writer.count() > 0 {
            EnumStatus::Complete {
                bytes: writer.bytes_used(),
            }
        } else {
            EnumStatus::NoMoreFiles
        })
    }
}
