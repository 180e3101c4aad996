//! Core of the Mirage virtual-file-system overlay.
//!
//! Maps canonical logical paths (the Windows-style paths a game issues) to
//! the physical mod files that should answer them, without copying anything:
//! - [`tree`]: mutable prefix trie, one map probe per path segment
//! - [`flat`]: immutable flattened lookup for the optimised hot path
//! - [`folder`]: snapshots of overlay (mod) folders
//! - [`manager`]: the two-mode owner of all registered redirections
//! - [`watcher`]: live file-system change notifications
//!
//! The interception layer that feeds paths in (and splices directory
//! listings) lives in the `miragevfs` crate.

pub mod error;
pub mod flat;
pub mod folder;
pub mod manager;
pub mod paths;
pub mod target;
pub mod tree;
pub mod watcher;

pub use error::WatchError;
pub use flat::{FastAppend, FlatLookup};
pub use folder::FolderRedirection;
pub use manager::{FileRedirection, RedirectionManager};
pub use target::{DirPool, RedirectionTarget};
pub use tree::RedirectionTree;
pub use watcher::{ChangeWatcher, FolderUpdateListener};
