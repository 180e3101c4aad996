//! Folder redirections: a snapshot of one overlay folder's contents.
//!
//! A folder redirection projects every file under a physical overlay folder
//! (a mod's content) onto a logical base folder (the game directory being
//! overlaid). The overlay is scanned once at construction; live updates
//! arrive later through the change watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::paths;
use crate::target::{DirPool, RedirectionTarget};

/// A file recorded into the snapshot, with the keys the lookup structures
/// need alongside the target itself.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    /// Canonical subfolder key relative to the overlay root (`""` for root).
    pub relative_dir: String,
    /// Canonical (folded) file-name key.
    pub name_key: String,
    /// Physical location of the file.
    pub target: RedirectionTarget,
}

/// One overlay folder projected onto a logical base folder.
#[derive(Debug)]
pub struct FolderRedirection {
    base_dir: String,
    overlay_dir: PathBuf,
    pool: DirPool,
    contents: HashMap<String, Vec<RedirectionTarget>>,
}

impl PartialEq for FolderRedirection {
    fn eq(&self, other: &Self) -> bool {
        self.base_dir == other.base_dir && self.overlay_dir == other.overlay_dir
    }
}

impl Eq for FolderRedirection {}

impl FolderRedirection {
    /// Scan `overlay_dir` recursively and build the snapshot. `base_dir` is
    /// the logical folder the contents appear under; it is canonicalized
    /// here, the overlay path is kept native and case-preserved.
    pub fn scan(base_dir: &str, overlay_dir: &Path) -> Result<Self> {
        if !overlay_dir.is_dir() {
            bail!("overlay folder does not exist: {}", overlay_dir.display());
        }
        let mut redirection = FolderRedirection {
            base_dir: paths::canonicalize(base_dir),
            overlay_dir: overlay_dir.to_path_buf(),
            pool: DirPool::new(),
            contents: HashMap::new(),
        };
        redirection.scan_contents()?;
        Ok(redirection)
    }

    fn scan_contents(&mut self) -> Result<()> {
        let mut contents: HashMap<String, Vec<RedirectionTarget>> = HashMap::new();
        let mut files = 0usize;

        for entry in walkdir::WalkDir::new(&self.overlay_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let parent = entry.path().parent().unwrap_or(&self.overlay_dir);
            let relative_dir = match paths::relative_key(&self.overlay_dir, parent) {
                Some(key) => key,
                None => continue,
            };

            let dir_string = parent.to_string_lossy();
            let shared_dir = self.pool.intern(&dir_string);
            let name = entry.file_name().to_string_lossy().into_owned();
            push_target(
                contents.entry(relative_dir).or_default(),
                RedirectionTarget::new(shared_dir, name),
            );
            files += 1;
        }

        tracing::debug!(
            overlay = %self.overlay_dir.display(),
            files,
            subfolders = contents.len(),
            "scanned overlay folder"
        );
        self.contents = contents;
        Ok(())
    }

    /// Logical folder (canonical) the overlay is projected onto.
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// Physical overlay folder (native, case-preserved).
    pub fn overlay_dir(&self) -> &Path {
        &self.overlay_dir
    }

    /// Snapshot contents: canonical relative subfolder -> targets.
    pub fn contents(&self) -> &HashMap<String, Vec<RedirectionTarget>> {
        &self.contents
    }

    /// Record a newly observed file so later rebuilds see it, and return the
    /// keys needed to patch the active lookup structure. `relative` is the
    /// file's path below the overlay root, in native form.
    pub fn add_file(&mut self, relative: &Path) -> Option<SnapshotFile> {
        let name = relative.file_name()?.to_string_lossy().into_owned();
        let parent = relative.parent().unwrap_or(Path::new(""));

        let full_parent = self.overlay_dir.join(parent);
        let relative_dir = paths::relative_key(&self.overlay_dir, &full_parent)?;

        let shared_dir = self.pool.intern(&full_parent.to_string_lossy());
        let target = RedirectionTarget::new(shared_dir, name.clone());
        push_target(
            self.contents.entry(relative_dir.clone()).or_default(),
            target.clone(),
        );

        Some(SnapshotFile {
            relative_dir,
            name_key: paths::fold_component(&name),
            target,
        })
    }

    /// Replace the snapshot with the overlay's current on-disk contents.
    /// An overlay folder that disappeared entirely yields an empty snapshot.
    pub fn rescan(&mut self) -> Result<()> {
        if !self.overlay_dir.is_dir() {
            tracing::warn!(
                overlay = %self.overlay_dir.display(),
                "overlay folder vanished; snapshot emptied"
            );
            self.contents.clear();
            return Ok(());
        }
        self.scan_contents()
            .with_context(|| format!("rescan of {}", self.overlay_dir.display()))
    }
}

/// Insert a target into a subfolder list, replacing a case-variant duplicate.
fn push_target(list: &mut Vec<RedirectionTarget>, target: RedirectionTarget) {
    let key = paths::fold_component(target.file_name());
    match list
        .iter_mut()
        .find(|t| paths::fold_component(t.file_name()) == key)
    {
        Some(existing) => *existing = target,
        None => list.push(target),
    }
}
