//! Per-thread tracer state

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static INTERNAL_CALL: Cell<bool> = const { Cell::new(false) };
    static THREAD_ID: u32 = current_os_thread_id();
}

#[cfg(target_os = "linux")]
fn current_os_thread_id() -> u32 {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}

#[cfg(not(target_os = "linux"))]
fn current_os_thread_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// OS thread ID of the calling thread, computed once per thread
pub fn cached_thread_id() -> u32 {
    THREAD_ID.with(|id| *id)
}

/// Marks runtime calls issued by the tracer itself.
///
/// While a guard is alive, API callbacks raised on this thread are ignored,
/// so the tracer never traces (and recurses into) its own HIP/roctracer
/// calls. Dropping the guard restores the previous state, which makes guards
/// safe to nest.
#[must_use = "the guard only applies while it is alive"]
pub struct InternalCallGuard {
    previous: bool,
    _not_send: PhantomData<*const ()>,
}

impl InternalCallGuard {
    pub fn new() -> Self {
        let previous = INTERNAL_CALL.with(|flag| flag.replace(true));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread is inside a tracer-issued runtime call
    pub fn is_active() -> bool {
        INTERNAL_CALL.with(Cell::get)
    }
}

impl Default for InternalCallGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InternalCallGuard {
    fn drop(&mut self) {
        INTERNAL_CALL.with(|flag| flag.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_guard_nests_and_restores() {
        assert!(!InternalCallGuard::is_active());
        {
            let _outer = InternalCallGuard::new();
            assert!(InternalCallGuard::is_active());
            {
                let _inner = InternalCallGuard::new();
                assert!(InternalCallGuard::is_active());
            }
            assert!(InternalCallGuard::is_active());
        }
        assert!(!InternalCallGuard::is_active());
    }

    #[test]
    fn test_guard_restored_on_early_return() {
        fn issue_call(fail: bool) -> Result<(), ()> {
            let _guard = InternalCallGuard::new();
            if fail {
                return Err(());
            }
            Ok(())
        }

        assert!(issue_call(true).is_err());
        assert!(!InternalCallGuard::is_active());
    }

    #[test]
    fn test_guard_is_thread_local() {
        let _guard = InternalCallGuard::new();
        let seen = thread::spawn(InternalCallGuard::is_active).join().unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_thread_id_is_stable_per_thread() {
        let here = cached_thread_id();
        assert_eq!(here, cached_thread_id());

        let there = thread::spawn(cached_thread_id).join().unwrap();
        assert_ne!(here, there);
    }
}
