//! Merges synthesized directory entries with real enumeration results.
//!
//! One splicer exists per open handle on a redirected directory. Across
//! repeated paginated calls it:
//! 1. synthesizes one record per remaining virtual entry (real metadata is
//!    queried from the redirect target; a broken target is skipped, not
//!    fatal),
//! 2. hands the rest of the buffer to the real enumeration for that
//!    directory (forcing a restart on the first delegated call, since the
//!    virtual phase consumed calls the underlying listing never saw),
//! 3. splices records whose names were already injected out of the
//!    delegate's chain, so a virtual entry shadowing a real file never
//!    appears twice.
//!
//! This is a merge of two differently-paced iterators into one bounded
//! buffer whose record chain must stay internally consistent.

use std::collections::HashSet;
use std::io;

use miragecore::manager::RedirectionManager;
use miragecore::paths;
use miragecore::target::RedirectionTarget;

use crate::dirinfo::{self, ChainWriter, FileEntry, InfoClass};
use crate::enumerator::{DirectoryEnumerator, EnumStatus, QueryFlags};
use crate::wildcard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpliceState {
    Enumerating,
    Exhausted,
}

/// Per-handle enumeration state for one redirected directory.
pub struct EnumerationSplicer {
    /// Canonical logical path of the directory the handle refers to.
    dir_path: String,
    state: SpliceState,
    /// Fetched lazily on the first call; reset by a restart scan.
    virtual_entries: Option<Vec<RedirectionTarget>>,
    /// Folded names already written, for duplicate suppression.
    injected: HashSet<String>,
    cursor: usize,
    /// The next delegated call must carry a restart.
    force_delegate_restart: bool,
}

impl EnumerationSplicer {
    pub fn new(dir_path: impl Into<String>) -> Self {
        EnumerationSplicer {
            dir_path: dir_path.into(),
            state: SpliceState::Enumerating,
            virtual_entries: None,
            injected: HashSet::new(),
            cursor: 0,
            force_delegate_restart: false,
        }
    }

    pub fn dir_path(&self) -> &str {
        &self.dir_path
    }

    fn reset(&mut self) {
        self.state = SpliceState::Enumerating;
        self.virtual_entries = None;
        self.injected.clear();
        self.cursor = 0;
        // The caller restarted; the underlying listing must restart too.
        self.force_delegate_restart = true;
    }

    /// One enumeration call for this handle.
    pub fn query(
        &mut self,
        manager: &RedirectionManager,
        buf: &mut [u8],
        class: InfoClass,
        flags: QueryFlags,
        filter: Option<&str>,
        delegate: &mut dyn DirectoryEnumerator,
    ) -> io::Result<EnumStatus> {
        if flags.contains(QueryFlags::RESTART_SCAN) {
            self.reset();
        }
        if self.virtual_entries.is_none() {
            let entries = manager.try_get_folder(&self.dir_path).unwrap_or_default();
            if !entries.is_empty() {
                // The virtual phase advances our position but not the
                // underlying handle's; the first delegation must restart.
                self.force_delegate_restart = true;
            }
            self.virtual_entries = Some(entries);
        }

        let single = flags.contains(QueryFlags::RETURN_SINGLE_ENTRY);
        let mut writer = ChainWriter::new(&mut *buf, class);

        // Phase 1: synthesize virtual entries.
        loop {
            let target = {
                let entries = self.virtual_entries.as_ref().expect("fetched above");
                match entries.get(self.cursor) {
                    Some(target) => target.clone(),
                    None => break,
                }
            };
            if let Some(pattern) = filter {
                if !wildcard::matches(pattern, target.file_name()) {
                    self.cursor += 1;
                    continue;
                }
            }
            let entry = match FileEntry::from_path(&target.full_path(), target.file_name()) {
                Ok(entry) => entry,
                Err(error) => {
                    // One broken target must not hide the rest of the
                    // listing.
                    tracing::warn!(
                        %error,
                        target = %target.full_path().display(),
                        "virtual entry metadata unavailable; skipped"
                    );
                    self.cursor += 1;
                    continue;
                }
            };
            if !writer.append(&entry) {
                return Ok(if writer.count() > 0 {
                    EnumStatus::Complete {
                        bytes: writer.bytes_used(),
                    }
                } else {
                    EnumStatus::BufferTooSmall
                });
            }
            self.injected
                .insert(paths::fold_component(target.file_name()));
            self.cursor += 1;
            if single {
                return Ok(EnumStatus::Complete {
                    bytes: writer.bytes_used(),
                });
            }
        }

        // Phase 2: delegate the rest of the buffer to the real listing.
        let virtual_count = writer.count();
        let virtual_bytes = writer.bytes_used();
        let last_virtual = writer.last_offset();
        let delegate_start = dirinfo::align8(virtual_bytes).min(buf.len());

        loop {
            let slice = &mut buf[delegate_start..];
            if slice.is_empty() {
                return Ok(if virtual_count > 0 {
                    EnumStatus::Complete {
                        bytes: virtual_bytes,
                    }
                } else {
                    EnumStatus::BufferTooSmall
                });
            }

            let mut delegate_flags = flags & QueryFlags::RETURN_SINGLE_ENTRY;
            if self.force_delegate_restart {
                delegate_flags |= QueryFlags::RESTART_SCAN;
            }
            let status = delegate.query(&mut *slice, class, delegate_flags, filter)?;
            if !matches!(status, EnumStatus::BufferTooSmall) {
                self.force_delegate_restart = false;
            }

            match status {
                EnumStatus::NoMoreFiles => {
                    self.state = SpliceState::Exhausted;
                    return Ok(if virtual_count > 0 {
                        EnumStatus::Complete {
                            bytes: virtual_bytes,
                        }
                    } else {
                        EnumStatus::NoMoreFiles
                    });
                }
                EnumStatus::BufferTooSmall => {
                    return Ok(if virtual_count > 0 {
                        EnumStatus::Complete {
                            bytes: virtual_bytes,
                        }
                    } else {
                        EnumStatus::BufferTooSmall
                    });
                }
                EnumStatus::Complete { bytes } => {
                    // Phase 3: splice out names the virtual phase already
                    // emitted.
                    let injected = &self.injected;
                    let kept = dirinfo::filter_chain(slice, bytes, class, |name| {
                        !injected.contains(&paths::fold_component(name))
                    });
                    if kept == 0 {
                        // Everything was a duplicate; ask for more rather
                        // than reporting an empty success.
                        continue;
                    }
                    if let Some(last) = last_virtual {
                        dirinfo::write_next_offset(buf, last, (delegate_start - last) as u32);
                    }
                    return Ok(EnumStatus::Complete {
                        bytes: delegate_start + kept,
                    });
                }
            }
        }
    }

    /// Whether the listing reported exhaustion.
    pub fn is_exhausted(&self) -> bool {
        self.state == SpliceState::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirinfo::chain_names;
    use crate::enumerator::StdDirectoryEnumerator;
    use std::fs;
    use std::path::PathBuf;

    const DIR: &str = "C:\\GAME\\DATA";

    struct Setup {
        _tmp: tempfile::TempDir,
        real_dir: PathBuf,
        overlay: PathBuf,
        manager: RedirectionManager,
    }

    /// A redirected game directory: `real` files on disk, `overlay` files
    /// projected over them.
    fn setup(real: &[&str], overlay_files: &[&str]) -> Setup {
        let tmp = tempfile::tempdir().unwrap();
        let real_dir = tmp.path().join("game_data");
        fs::create_dir_all(&real_dir).unwrap();
        for file in real {
            fs::write(real_dir.join(file), *file).unwrap();
        }

        let overlay = tmp.path().join("mod");
        fs::create_dir_all(&overlay).unwrap();
        for file in overlay_files {
            fs::write(overlay.join(file), *file).unwrap();
        }

        let manager = RedirectionManager::new();
        manager.add_folder_redirection(DIR, &overlay).unwrap();
        manager.optimise();

        Setup {
            _tmp: tmp,
            real_dir,
            overlay,
            manager,
        }
    }

    fn drain(
        splicer: &mut EnumerationSplicer,
        setup: &Setup,
        buf_len: usize,
        class: InfoClass,
        flags: QueryFlags,
        filter: Option<&str>,
    ) -> Vec<String> {
        let mut delegate = StdDirectoryEnumerator::new(&setup.real_dir);
        let mut buf = vec![0u8; buf_len];
        let mut names = Vec::new();
        loop {
            match splicer
                .query(&setup.manager, &mut buf, class, flags, filter, &mut delegate)
                .unwrap()
            {
                EnumStatus::Complete { bytes } => names.extend(chain_names(&buf, bytes, class)),
                EnumStatus::NoMoreFiles => return names,
                EnumStatus::BufferTooSmall => panic!("buffer too small mid-drain"),
            }
        }
    }

    #[test]
    fn test_merge_with_collisions() {
        // 3 real, 2 virtual, 1 name collides: 3 + 2 - 1 = 4 distinct.
        let setup = setup(&["a.esp", "b.esp", "c.esp"], &["b.esp", "d.esp"]);
        let mut splicer = EnumerationSplicer::new(DIR);

        let names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::BothDirectory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(names.len(), 4);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a.esp", "b.esp", "c.esp", "d.esp"]);
        // Virtual entries come first.
        assert_eq!(names[0], "b.esp");
        assert_eq!(names[1], "d.esp");
        assert!(splicer.is_exhausted());
    }

    #[test]
    fn test_virtual_entry_resolves_to_overlay_file() {
        let setup = setup(&["b.esp"], &["b.esp"]);
        let target = setup.manager.try_get_file("C:\\GAME\\DATA\\B.ESP").unwrap();
        assert_eq!(target.full_path(), setup.overlay.join("b.esp"));

        // The merged listing carries exactly one b.esp (the virtual one).
        let mut splicer = EnumerationSplicer::new(DIR);
        let names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(names, vec!["b.esp"]);
    }

    #[test]
    fn test_buffer_too_small_writes_nothing() {
        let setup = setup(&["a.esp"], &["b.esp"]);
        let mut splicer = EnumerationSplicer::new(DIR);
        let mut delegate = StdDirectoryEnumerator::new(&setup.real_dir);

        let mut buf = [0u8; 16];
        let status = splicer
            .query(
                &setup.manager,
                &mut buf,
                InfoClass::Directory,
                QueryFlags::empty(),
                None,
                &mut delegate,
            )
            .unwrap();
        assert_eq!(status, EnumStatus::BufferTooSmall);

        // State resumed: a retry with room yields the full merge.
        let names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        let mut sorted = names;
        sorted.sort();
        assert_eq!(sorted, vec!["a.esp", "b.esp"]);
    }

    #[test]
    fn test_small_buffer_pagination_no_duplicates() {
        let setup = setup(
            &["real_one.esp", "real_two.esp", "real_three.esp"],
            &["virt_one.esp", "virt_two.esp", "real_two.esp"],
        );
        let mut splicer = EnumerationSplicer::new(DIR);

        // Roughly one record per call.
        let names = drain(
            &mut splicer,
            &setup,
            112,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(names.len(), 5);
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_single_entry_one_record_per_call() {
        let setup = setup(&["a.esp"], &["b.esp"]);
        let mut splicer = EnumerationSplicer::new(DIR);
        let mut delegate = StdDirectoryEnumerator::new(&setup.real_dir);
        let mut buf = [0u8; 4096];

        for expected in ["b.esp", "a.esp"] {
            let status = splicer
                .query(
                    &setup.manager,
                    &mut buf,
                    InfoClass::Directory,
                    QueryFlags::RETURN_SINGLE_ENTRY,
                    None,
                    &mut delegate,
                )
                .unwrap();
            let EnumStatus::Complete { bytes } = status else {
                panic!("expected a record");
            };
            assert_eq!(
                chain_names(&buf, bytes, InfoClass::Directory),
                vec![expected]
            );
        }
        let status = splicer
            .query(
                &setup.manager,
                &mut buf,
                InfoClass::Directory,
                QueryFlags::RETURN_SINGLE_ENTRY,
                None,
                &mut delegate,
            )
            .unwrap();
        assert_eq!(status, EnumStatus::NoMoreFiles);
    }

    #[test]
    fn test_restart_scan_resets_everything() {
        let setup = setup(&["a.esp", "b.esp"], &["c.esp"]);
        let mut splicer = EnumerationSplicer::new(DIR);
        let mut delegate = StdDirectoryEnumerator::new(&setup.real_dir);
        let mut buf = [0u8; 4096];

        // Consume the whole listing once.
        let first = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(first.len(), 3);

        // Restart mid-life of the handle and list again, sharing the same
        // delegate position.
        let status = splicer
            .query(
                &setup.manager,
                &mut buf,
                InfoClass::Directory,
                QueryFlags::RESTART_SCAN,
                None,
                &mut delegate,
            )
            .unwrap();
        let EnumStatus::Complete { bytes } = status else {
            panic!("restart should produce records");
        };
        let mut names = chain_names(&buf, bytes, InfoClass::Directory);
        loop {
            match splicer
                .query(
                    &setup.manager,
                    &mut buf,
                    InfoClass::Directory,
                    QueryFlags::empty(),
                    None,
                    &mut delegate,
                )
                .unwrap()
            {
                EnumStatus::Complete { bytes } => {
                    names.extend(chain_names(&buf, bytes, InfoClass::Directory))
                }
                EnumStatus::NoMoreFiles => break,
                EnumStatus::BufferTooSmall => panic!("buffer too small"),
            }
        }
        names.sort();
        assert_eq!(names, vec!["a.esp", "b.esp", "c.esp"]);
    }

    #[test]
    fn test_wildcard_applies_to_both_sides() {
        let setup = setup(&["real.esp", "real.esm"], &["virt.esp", "virt.esm"]);
        let mut splicer = EnumerationSplicer::new(DIR);

        let mut names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Names,
            QueryFlags::empty(),
            Some("*.esp"),
        );
        names.sort();
        assert_eq!(names, vec!["real.esp", "virt.esp"]);
    }

    #[test]
    fn test_broken_virtual_target_is_skipped() {
        let setup = setup(&["real.esp"], &["ok.esp"]);
        // A file redirection whose target never existed.
        setup
            .manager
            .add_file_redirection("C:\\GAME\\DATA\\ghost.esp", "/nonexistent/ghost.esp");

        let mut splicer = EnumerationSplicer::new(DIR);
        let mut names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        names.sort();
        assert_eq!(names, vec!["ok.esp", "real.esp"]);
    }

    #[test]
    fn test_all_real_entries_shadowed() {
        // Every real name is shadowed; the merge must not report an empty
        // success in between.
        let setup = setup(&["a.esp", "b.esp"], &["a.esp", "b.esp"]);
        let mut splicer = EnumerationSplicer::new(DIR);

        let names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(names, vec!["a.esp", "b.esp"]);
    }

    #[test]
    fn test_directory_without_redirections_lists_real_only() {
        let setup = setup(&["a.esp"], &["b.esp"]);
        // A splicer for a different directory: no virtual entries.
        let mut splicer = EnumerationSplicer::new("C:\\GAME\\OTHER");
        let names = drain(
            &mut splicer,
            &setup,
            4096,
            InfoClass::Directory,
            QueryFlags::empty(),
            None,
        );
        assert_eq!(names, vec!["a.esp"]);
    }

    #[test]
    fn test_exhausted_stays_exhausted() {
        let setup = setup(&["a.esp"], &[]);
        let mut splicer = EnumerationSplicer::new(DIR);
        let mut delegate = StdDirectoryEnumerator::new(&setup.real_dir);
        let mut buf = [0u8; 4096];

        splicer
            .query(
                &setup.manager,
                &mut buf,
                InfoClass::Directory,
                QueryFlags::empty(),
                None,
                &mut delegate,
            )
            .unwrap();
        for _ in 0..2 {
            let status = splicer
                .query(
                    &setup.manager,
                    &mut buf,
                    InfoClass::Directory,
                    QueryFlags::empty(),
                    None,
                    &mut delegate,
                )
                .unwrap();
            assert_eq!(status, EnumStatus::NoMoreFiles);
        }
    }

    #[test]
    fn test_id_layouts_roundtrip() {
        let setup = setup(&["real.esp"], &["virt.esp"]);
        for class in [
            InfoClass::IdBothDirectory,
            InfoClass::IdFullDirectory,
            InfoClass::IdExtdDirectory,
            InfoClass::IdExtdBothDirectory,
            InfoClass::FullDirectory,
            InfoClass::Names,
        ] {
            let mut splicer = EnumerationSplicer::new(DIR);
            let mut names = drain(
                &mut splicer,
                &setup,
                4096,
                class,
                QueryFlags::empty(),
                None,
            );
            names.sort();
            assert_eq!(names, vec!["real.esp", "virt.esp"], "{class:?}");
        }
    }

    // Keep the test fixture honest about what the splicer assumes.
    #[test]
    fn test_setup_dir_is_canonical() {
        assert_eq!(miragecore::paths::canonicalize(DIR), DIR);
    }
}
