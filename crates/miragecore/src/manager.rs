//! The redirection manager: owns every registered redirection and the active
//! lookup structure.
//!
//! Two mutually exclusive modes:
//! - *Building*: a mutable trie; additions patch it in place.
//! - *Optimised*: a flattened lookup built once by [`optimise`]; additions
//!   force a full rebuild (reconstruct the trie from the retained
//!   redirections, then re-flatten).
//!
//! Removals always rebuild: neither structure remembers what a removed
//! redirection may have shadowed. Rebuilds construct the replacement off to
//! the side and swap it in under the write lock, so concurrent readers see
//! the old structure or the new one, never a partial state.
//!
//! [`optimise`]: RedirectionManager::optimise

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;

use crate::flat::{FastAppend, FlatLookup};
use crate::folder::FolderRedirection;
use crate::paths;
use crate::target::RedirectionTarget;
use crate::tree::RedirectionTree;
use crate::watcher::FolderUpdateListener;

/// An explicit single-file redirection, independent of any folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRedirection {
    /// Canonical logical path being redirected.
    old_path: String,
    /// Native, case-preserved path of the real file.
    new_path: String,
}

impl FileRedirection {
    pub fn new(old_path: &str, new_path: &str) -> Self {
        FileRedirection {
            old_path: paths::canonicalize(old_path),
            new_path: new_path.to_string(),
        }
    }

    pub fn old_path(&self) -> &str {
        &self.old_path
    }

    pub fn new_path(&self) -> &str {
        &self.new_path
    }

    fn target(&self) -> RedirectionTarget {
        let (dir, name) = paths::split_native_file(&self.new_path);
        RedirectionTarget::new(Arc::from(dir), name)
    }
}

/// The active lookup structure. One-way transition Building -> Optimised.
enum ActiveLookup {
    Building(RedirectionTree<RedirectionTarget>),
    Optimised(FlatLookup<RedirectionTarget>),
}

struct ManagerInner {
    lookup: ActiveLookup,
    files: Vec<FileRedirection>,
    folders: Vec<FolderRedirection>,
}

/// Owns the set of file/folder redirections and answers lookup queries from
/// any thread.
pub struct RedirectionManager {
    inner: RwLock<ManagerInner>,
    rebuilds: AtomicU64,
}

impl Default for RedirectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RedirectionManager {
    pub fn new() -> Self {
        RedirectionManager {
            inner: RwLock::new(ManagerInner {
                lookup: ActiveLookup::Building(RedirectionTree::new()),
                files: Vec::new(),
                folders: Vec::new(),
            }),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Register `old_path` -> `new_path`. File redirections take priority
    /// over folder redirections covering the same logical path.
    pub fn add_file_redirection(&self, old_path: &str, new_path: &str) {
        let redirection = FileRedirection::new(old_path, new_path);
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        inner.files.retain(|existing| *existing != redirection);
        inner.files.push(redirection.clone());

        match &mut inner.lookup {
            ActiveLookup::Building(tree) => {
                apply_file(tree, &redirection);
                tracing::debug!(old = %redirection.old_path(), "file redirection added");
            }
            ActiveLookup::Optimised(_) => self.rebuild(inner),
        }
    }

    /// Remove a previously registered file redirection. Always rebuilds on a
    /// match: the removed entry may have shadowed another redirection.
    pub fn remove_file_redirection(&self, old_path: &str, new_path: &str) -> bool {
        let redirection = FileRedirection::new(old_path, new_path);
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        let before = inner.files.len();
        inner.files.retain(|existing| *existing != redirection);
        if inner.files.len() == before {
            return false;
        }
        self.rebuild(inner);
        true
    }

    /// Scan `overlay_dir` and project its contents onto `base_dir`.
    /// Later-registered folders win conflicts; file redirections win over
    /// any folder.
    pub fn add_folder_redirection(&self, base_dir: &str, overlay_dir: &Path) -> Result<()> {
        let folder = FolderRedirection::scan(base_dir, overlay_dir)?;
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        tracing::info!(
            base = folder.base_dir(),
            overlay = %overlay_dir.display(),
            "folder redirection added"
        );
        inner.folders.retain(|existing| *existing != folder);
        inner.folders.push(folder);

        match &mut inner.lookup {
            ActiveLookup::Building(tree) => {
                apply_folder(tree, inner.folders.last().expect("just pushed"));
                // Files must keep priority over the folder just applied.
                for file in &inner.files {
                    apply_file(tree, file);
                }
            }
            ActiveLookup::Optimised(_) => self.rebuild(inner),
        }
        Ok(())
    }

    /// Remove a folder redirection identified by its (base, overlay) pair.
    pub fn remove_folder_redirection(&self, base_dir: &str, overlay_dir: &Path) -> bool {
        let base = paths::canonicalize(base_dir);
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        let before = inner.folders.len();
        inner
            .folders
            .retain(|f| !(f.base_dir() == base && f.overlay_dir() == overlay_dir));
        if inner.folders.len() == before {
            return false;
        }
        self.rebuild(inner);
        true
    }

    /// One-way Building -> Optimised transition. Idempotent.
    pub fn optimise(&self) {
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        if let ActiveLookup::Building(tree) = &guard.lookup {
            let flat = FlatLookup::from_tree(tree);
            tracing::info!(
                prefix = flat.prefix(),
                folders = flat.folder_count(),
                "lookup optimised"
            );
            guard.lookup = ActiveLookup::Optimised(flat);
        }
    }

    /// Resolve one logical file path. A trailing separator on the query is
    /// stripped; the input need not be case-folded.
    pub fn try_get_file(&self, path: &str) -> Option<RedirectionTarget> {
        let canonical = paths::canonicalize(path);
        let guard = self.inner.read().expect("redirection lock poisoned");
        let target = match &guard.lookup {
            ActiveLookup::Building(tree) => tree.try_get_file(&canonical),
            ActiveLookup::Optimised(flat) => flat.try_get_file(&canonical),
        };
        target.cloned()
    }

    /// The virtual entries of one logical directory, sorted by file name.
    /// `None` means the directory has no redirected files.
    pub fn try_get_folder(&self, path: &str) -> Option<Vec<RedirectionTarget>> {
        let canonical = paths::canonicalize(path);
        let guard = self.inner.read().expect("redirection lock poisoned");
        let files = match &guard.lookup {
            ActiveLookup::Building(tree) => tree.try_get_folder(&canonical)?,
            ActiveLookup::Optimised(flat) => flat.try_get_folder(&canonical)?,
        };
        let mut entries: Vec<RedirectionTarget> = files.values().cloned().collect();
        entries.sort_by(|a, b| {
            paths::fold_component(a.file_name()).cmp(&paths::fold_component(b.file_name()))
        });
        Some(entries)
    }

    /// How many full rebuilds have run. Exposed for diagnostics and tests.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Whether [`RedirectionManager::optimise`] has run.
    pub fn is_optimised(&self) -> bool {
        let guard = self.inner.read().expect("redirection lock poisoned");
        matches!(guard.lookup, ActiveLookup::Optimised(_))
    }

    /// Reconstruct the lookup structure from the retained redirections:
    /// folders in registration order, then files (so files win), then
    /// re-flatten if the manager was optimised.
    fn rebuild(&self, inner: &mut ManagerInner) {
        let mut tree = RedirectionTree::new();
        for folder in &inner.folders {
            apply_folder(&mut tree, folder);
        }
        for file in &inner.files {
            apply_file(&mut tree, file);
        }

        inner.lookup = if matches!(inner.lookup, ActiveLookup::Optimised(_)) {
            ActiveLookup::Optimised(FlatLookup::from_tree(&tree))
        } else {
            ActiveLookup::Building(tree)
        };
        let count = self.rebuilds.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(rebuilds = count, "lookup rebuilt");
    }
}

impl FolderUpdateListener for RedirectionManager {
    fn on_file_added(&self, base_dir: &str, overlay_dir: &Path, relative: &Path) {
        let base = paths::canonicalize(base_dir);
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        let Some(index) = inner
            .folders
            .iter()
            .position(|f| f.base_dir() == base && f.overlay_dir() == overlay_dir)
        else {
            return;
        };
        let Some(added) = inner.folders[index].add_file(relative) else {
            return;
        };
        let dir_key = paths::join(&base, &added.relative_dir);

        let needs_rebuild = match &mut inner.lookup {
            ActiveLookup::Building(tree) => {
                let collides = tree
                    .try_get_folder(&dir_key)
                    .is_some_and(|files| files.contains_key(&added.name_key));
                if !collides {
                    tree.add_folder_paths(
                        &dir_key,
                        std::iter::once((added.name_key, added.target)),
                    );
                }
                // On a collision, which redirection wins cannot be decided
                // locally; rebuild restores the priority order.
                collides
            }
            ActiveLookup::Optimised(flat) => !matches!(
                flat.try_append(&dir_key, &added.name_key, added.target),
                FastAppend::Inserted
            ),
        };
        if needs_rebuild {
            self.rebuild(inner);
        }
    }

    fn on_other_update(&self, base_dir: &str, overlay_dir: &Path) {
        let base = paths::canonicalize(base_dir);
        let mut guard = self.inner.write().expect("redirection lock poisoned");
        let inner = &mut *guard;

        let Some(index) = inner
            .folders
            .iter()
            .position(|f| f.base_dir() == base && f.overlay_dir() == overlay_dir)
        else {
            return;
        };
        if let Err(error) = inner.folders[index].rescan() {
            tracing::warn!(%error, "overlay rescan failed; rebuilding from last snapshot");
        }
        self.rebuild(inner);
    }
}

fn apply_file(tree: &mut RedirectionTree<RedirectionTarget>, file: &FileRedirection) {
    tree.add_path(file.old_path(), file.target());
}

fn apply_folder(tree: &mut RedirectionTree<RedirectionTarget>, folder: &FolderRedirection) {
    for (relative, targets) in folder.contents() {
        let dir_key = paths::join(folder.base_dir(), relative);
        tree.add_folder_paths(
            &dir_key,
            targets
                .iter()
                .map(|t| (paths::fold_component(t.file_name()), t.clone())),
        );
    }
}
