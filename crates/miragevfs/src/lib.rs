//! Interception-facing layer of the Mirage virtual-file-system overlay.
//!
//! `miragecore` decides *where* a logical path really lives; this crate
//! rewrites what an intercepted caller sees:
//! - [`dirinfo`]: the native directory-information record layouts
//! - [`enumerator`]: the enumeration protocol seam, plus a reference
//!   implementation over the real file system
//! - [`splicer`]: merges virtual entries into real listings per handle
//! - [`handles`]: open-handle registry with deferred retirement
//! - [`reentry`]: per-thread guard against recursive interception
//!
//! The hooking mechanism itself stays outside: a host wires its directory
//! hooks to [`handles::HandleTable::query_directory`] and its path hooks to
//! `miragecore::RedirectionManager`.

pub mod dirinfo;
pub mod enumerator;
pub mod handles;
pub mod reentry;
pub mod splicer;
pub mod wildcard;

pub use dirinfo::{FileEntry, InfoClass};
pub use enumerator::{DirectoryEnumerator, EnumStatus, QueryFlags, StdDirectoryEnumerator};
pub use handles::HandleTable;
pub use reentry::ReentryGuard;
pub use splicer::EnumerationSplicer;
