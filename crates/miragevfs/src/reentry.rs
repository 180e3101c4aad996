//! Per-thread reentrancy guard for intercepted entry points.
//!
//! Resolving a redirected path can itself issue file operations, which land
//! back in the same hooks on the same thread. A nested call must take the
//! unmodified, non-redirecting path instead of recursing.

use std::cell::Cell;

thread_local! {
    static INSIDE_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Held while a thread is inside an intercepted operation.
///
/// ```
/// # use miragevfs::reentry::ReentryGuard;
/// let Some(_guard) = ReentryGuard::enter() else {
///     // Nested call: fall through to the original operation.
///     return;
/// };
/// // Redirection logic runs here; the guard releases on drop.
/// ```
pub struct ReentryGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentryGuard {
    /// Enter the intercepted operation, or `None` if this thread is already
    /// inside one.
    pub fn enter() -> Option<ReentryGuard> {
        INSIDE_HOOK.with(|flag| {
            if flag.get() {
                return None;
            }
            flag.set(true);
            Some(ReentryGuard {
                _not_send: std::marker::PhantomData,
            })
        })
    }

    /// Whether the current thread is inside an intercepted operation.
    pub fn active() -> bool {
        INSIDE_HOOK.with(Cell::get)
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        INSIDE_HOOK.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_enter_is_refused() {
        let guard = ReentryGuard::enter();
        assert!(guard.is_some());
        assert!(ReentryGuard::active());
        assert!(ReentryGuard::enter().is_none());

        drop(guard);
        assert!(!ReentryGuard::active());
        assert!(ReentryGuard::enter().is_some());
    }

    #[test]
    fn test_guard_is_per_thread() {
        let _guard = ReentryGuard::enter().unwrap();
        let other = std::thread::spawn(|| ReentryGuard::enter().is_some())
            .join()
            .unwrap();
        assert!(other, "another thread must not observe this thread's guard");
    }
}
