//! Typed errors for the change-notification layer.
//!
//! Lookup misses are `Option`s, never errors; they happen on every
//! intercepted call. Errors here are the infrequent setup failures callers
//! actually need to match on.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform notification backend refused the subscription.
    #[error("file-system notification subscription failed: {0}")]
    Subscribe(#[from] notify::Error),

    /// Untrack was called for a folder that was never tracked.
    #[error("folder is not tracked: {}", .0.display())]
    NotTracked(PathBuf),
}
