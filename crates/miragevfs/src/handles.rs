//! Open-directory-handle registry.
//!
//! Tracks a splicer per open handle on a redirected directory. Handles on
//! anything else are never tracked; their calls pass straight through.
//!
//! Close notifications race with in-flight enumeration calls on other
//! threads, so retirement is deferred: a close only queues the handle, and
//! every query entry point drains the queue first, under a short lock scoped
//! to the retirement list. Per-handle state sits behind its own `Arc`, so a
//! call that already looked its state up keeps it alive even if the handle
//! retires mid-call.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use miragecore::manager::RedirectionManager;
use miragecore::paths;

use crate::dirinfo::InfoClass;
use crate::enumerator::{DirectoryEnumerator, EnumStatus, QueryFlags};
use crate::splicer::EnumerationSplicer;

/// Registry of open directory handles with virtual entries.
#[derive(Default)]
pub struct HandleTable {
    handles: Mutex<HashMap<u64, Arc<Mutex<EnumerationSplicer>>>>,
    retired: Mutex<Vec<u64>>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable::default()
    }

    /// Called when a directory handle opens. Returns whether the handle is
    /// tracked: only directories the manager resolves get a splicer.
    pub fn on_open(&self, handle: u64, dir_path: &str, manager: &RedirectionManager) -> bool {
        // A queued retirement may name this same handle value (the OS
        // reuses values as soon as the old handle closed); settle it before
        // inserting fresh state.
        self.drain_retired();

        let canonical = paths::canonicalize(dir_path);
        if manager.try_get_folder(&canonical).is_none() {
            return false;
        }
        tracing::debug!(handle, dir = %canonical, "tracking redirected directory handle");
        self.handles
            .lock()
            .expect("handle table poisoned")
            .insert(handle, Arc::new(Mutex::new(EnumerationSplicer::new(canonical))));
        true
    }

    /// Called when a handle closes, possibly concurrently with an
    /// enumeration on another thread. Only queues the retirement.
    pub fn on_close(&self, handle: u64) {
        self.retired
            .lock()
            .expect("retirement list poisoned")
            .push(handle);
    }

    /// Whether the handle currently has tracked state.
    pub fn is_tracked(&self, handle: u64) -> bool {
        self.handles
            .lock()
            .expect("handle table poisoned")
            .contains_key(&handle)
    }

    /// Tracked-handle count.
    pub fn len(&self) -> usize {
        self.handles.lock().expect("handle table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain_retired(&self) {
        let retired = {
            let mut queue = self.retired.lock().expect("retirement list poisoned");
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };
        let mut handles = self.handles.lock().expect("handle table poisoned");
        for handle in retired {
            handles.remove(&handle);
        }
    }

    /// One intercepted enumeration call. Tracked handles are spliced;
    /// everything else goes straight to the delegate.
    #[allow(clippy::too_many_arguments)]
    pub fn query_directory(
        &self,
        handle: u64,
        manager: &RedirectionManager,
        buf: &mut [u8],
        class: InfoClass,
        flags: QueryFlags,
        filter: Option<&str>,
        delegate: &mut dyn DirectoryEnumerator,
    ) -> io::Result<EnumStatus> {
        self.drain_retired();

        let state = {
            let handles = self.handles.lock().expect("handle table poisoned");
            handles.get(&handle).cloned()
        };
        match state {
            Some(splicer) => splicer
                .lock()
                .expect("splicer state poisoned")
                .query(manager, buf, class, flags, filter, delegate),
            None => delegate.query(buf, class, flags, filter),
        }
    }
}
