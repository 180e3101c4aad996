//! Live change notifications for tracked overlay folders.
//!
//! Watcher callbacks never touch shared lookup structures directly: events
//! flow through a channel to one consumer thread, which resolves the
//! affected folder registration and forwards a typed update to the
//! listener (normally the redirection manager).
//!
//! Delivery is best effort. Platform backends drop events under bursts
//! (archive extraction, mass deletes); a rescan-flagged event is answered by
//! broadcasting an "other update" for every tracked folder, which makes the
//! listener rescan and rebuild. Correctness never depends on seeing every
//! event.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::WatchError;
use crate::paths;
use crate::tree::RedirectionTree;

/// Receiver for typed folder-update events. Implemented by the redirection
/// manager; `base_dir`/`overlay_dir` identify the folder redirection the
/// event belongs to.
pub trait FolderUpdateListener: Send + Sync {
    /// A file appeared at `relative` (native form) below the overlay root.
    fn on_file_added(&self, base_dir: &str, overlay_dir: &Path, relative: &Path);

    /// Anything other than a plain file addition happened (delete, rename,
    /// unclassifiable event). The snapshot can no longer be trusted.
    fn on_other_update(&self, base_dir: &str, overlay_dir: &Path);
}

#[derive(Debug, Clone)]
struct TrackedFolder {
    base_dir: String,
    overlay_dir: PathBuf,
}

/// Maps overlay folders to their registrations. The trie resolves a changed
/// path to the innermost tracked overlay containing it.
#[derive(Default)]
struct Registry {
    tree: RedirectionTree<TrackedFolder>,
    tracked: Vec<TrackedFolder>,
}

impl Registry {
    fn rebuild_tree(&mut self) {
        let mut tree = RedirectionTree::new();
        for folder in &self.tracked {
            tree.add_path(&overlay_key(&folder.overlay_dir), folder.clone());
        }
        self.tree = tree;
    }

    fn resolve(&self, native_path: &Path) -> Option<TrackedFolder> {
        let key = overlay_key(native_path);
        self.tree.longest_item_match(&key).cloned()
    }
}

/// Canonical lookup key for a native folder path.
fn overlay_key(path: &Path) -> String {
    paths::canonicalize(&path.to_string_lossy())
}

/// Owns the native change subscription and the consumer thread. Dropping the
/// watcher closes the channel and ends the thread.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    registry: Arc<RwLock<Registry>>,
}

impl ChangeWatcher {
    pub fn new(listener: Arc<dyn FolderUpdateListener>) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel::<Result<notify::Event, notify::Error>>();
        let watcher = notify::recommended_watcher(tx)?;
        let registry = Arc::new(RwLock::new(Registry::default()));

        let thread_registry = registry.clone();
        std::thread::Builder::new()
            .name("mirage-watcher".to_string())
            .spawn(move || {
                while let Ok(result) = rx.recv() {
                    handle_event(&thread_registry, listener.as_ref(), result);
                }
            })
            .expect("failed to spawn watcher thread");

        Ok(ChangeWatcher { watcher, registry })
    }

    /// Start watching `overlay_dir` (recursively) for the folder redirection
    /// projecting it onto `base_dir`.
    pub fn track(&mut self, base_dir: &str, overlay_dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(overlay_dir, RecursiveMode::Recursive)?;

        let mut registry = self.registry.write().expect("watch registry poisoned");
        registry.tracked.push(TrackedFolder {
            base_dir: paths::canonicalize(base_dir),
            overlay_dir: overlay_dir.to_path_buf(),
        });
        registry.rebuild_tree();
        tracing::info!(overlay = %overlay_dir.display(), "overlay folder tracked");
        Ok(())
    }

    /// Stop watching the registration. The native subscription is released
    /// only when no other registration shares the same overlay folder.
    pub fn untrack(&mut self, base_dir: &str, overlay_dir: &Path) -> Result<(), WatchError> {
        let base = paths::canonicalize(base_dir);
        let mut registry = self.registry.write().expect("watch registry poisoned");

        let before = registry.tracked.len();
        registry
            .tracked
            .retain(|f| !(f.base_dir == base && f.overlay_dir == overlay_dir));
        if registry.tracked.len() == before {
            return Err(WatchError::NotTracked(overlay_dir.to_path_buf()));
        }
        registry.rebuild_tree();

        let still_watched = registry
            .tracked
            .iter()
            .any(|f| f.overlay_dir == overlay_dir);
        drop(registry);
        if !still_watched {
            self.watcher.unwatch(overlay_dir)?;
        }
        Ok(())
    }
}

/// What a raw notification means for the snapshot.
#[derive(Clone, Copy)]
enum EventClass {
    Added,
    Other,
    Ignored,
}

fn classify(kind: &EventKind) -> EventClass {
    match kind {
        EventKind::Create(_) => EventClass::Added,
        EventKind::Remove(_) => EventClass::Other,
        EventKind::Modify(ModifyKind::Name(_)) => EventClass::Other,
        // Content and metadata writes don't move files around.
        EventKind::Modify(_) | EventKind::Access(_) => EventClass::Ignored,
        // Unclassifiable events resolve ambiguity the safe way: rebuild.
        EventKind::Any | EventKind::Other => EventClass::Other,
    }
}

fn handle_event(
    registry: &RwLock<Registry>,
    listener: &dyn FolderUpdateListener,
    result: Result<notify::Event, notify::Error>,
) {
    let event = match result {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "change notification error");
            return;
        }
    };

    let registry = registry.read().expect("watch registry poisoned");

    if event.need_rescan() {
        tracing::warn!("notification backend dropped events; rescanning all tracked folders");
        for folder in &registry.tracked {
            listener.on_other_update(&folder.base_dir, &folder.overlay_dir);
        }
        return;
    }

    let class = classify(&event.kind);
    if matches!(class, EventClass::Ignored) {
        return;
    }

    for path in &event.paths {
        let Some(folder) = registry.resolve(path) else {
            continue;
        };
        match class {
            // A create event may be a directory (or already gone again);
            // only a present regular file is a plain addition.
            EventClass::Added if path.is_file() => {
                if let Ok(relative) = path.strip_prefix(&folder.overlay_dir) {
                    tracing::debug!(path = %path.display(), "file added under overlay");
                    listener.on_file_added(&folder.base_dir, &folder.overlay_dir, relative);
                }
            }
            EventClass::Added | EventClass::Other => {
                listener.on_other_update(&folder.base_dir, &folder.overlay_dir);
            }
            EventClass::Ignored => {}
        }
    }
}
