//! Multi-context flash lockout
//!
//! While flash is being programmed or erased no context may fetch from it.
//! Every context that executes out of flash holds a [`FlashExecGuard`] for as
//! long as it does so; the writer takes the exclusive side, which waits for
//! all guards to be released and keeps new ones out until the operation is
//! done.

use super::{CriticalSection, StorageResult};
use crate::error::StorageError;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Default)]
struct LockoutState {
    lock: RwLock<()>,
    exclusive_sections: AtomicUsize,
}

/// Shared lockout handle; clone one into every execution context
#[derive(Clone, Default)]
pub struct CoreLockout {
    state: Arc<LockoutState>,
}

/// Held by a context while it may fetch from flash
pub struct FlashExecGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

impl CoreLockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this context as executing from flash; blocks during a write
    pub fn enter_flash(&self) -> FlashExecGuard<'_> {
        FlashExecGuard {
            _guard: self.state.lock.read(),
        }
    }

    /// Like [`CoreLockout::enter_flash`] but gives up after `timeout`
    pub fn try_enter_flash_for(&self, timeout: Duration) -> Option<FlashExecGuard<'_>> {
        self.state
            .lock
            .try_read_for(timeout)
            .map(|guard| FlashExecGuard { _guard: guard })
    }

    /// True while a program or erase is in progress
    pub fn is_locked_out(&self) -> bool {
        self.state.lock.is_locked_exclusive()
    }

    /// Number of exclusive sections completed so far
    pub fn exclusive_sections(&self) -> usize {
        self.state.exclusive_sections.load(Ordering::Acquire)
    }
}

impl CriticalSection for CoreLockout {
    fn run_exclusive<R, F>(&self, timeout: Duration, f: F) -> StorageResult<R>
    where
        F: FnOnce() -> R,
    {
        let Some(_exclusive) = self.state.lock.try_write_for(timeout) else {
            warn!(
                "Other contexts still executing from flash after {} ms",
                timeout.as_millis()
            );
            return Err(StorageError::LockoutTimeout(timeout.as_millis() as u64));
        };

        let result = f();
        self.state.exclusive_sections.fetch_add(1, Ordering::AcqRel);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::thread;

    #[test]
    fn test_exclusive_when_idle() {
        let lockout = CoreLockout::new();
        let value = lockout
            .run_exclusive(Duration::from_millis(10), || {
                // Inside the section nobody may enter flash
                assert!(lockout.try_enter_flash_for(Duration::ZERO).is_none());
                42
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(lockout.exclusive_sections(), 1);
        assert!(!lockout.is_locked_out());
    }

    #[test]
    fn test_times_out_while_other_context_in_flash() {
        let lockout = CoreLockout::new();
        let other = lockout.clone();
        let (entered_tx, entered_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded::<()>();

        let handle = thread::spawn(move || {
            let _guard = other.enter_flash();
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        entered_rx.recv().unwrap();
        let result = lockout.run_exclusive(Duration::from_millis(20), || ());
        assert!(matches!(result, Err(StorageError::LockoutTimeout(20))));
        assert_eq!(lockout.exclusive_sections(), 0);

        release_tx.send(()).unwrap();
        handle.join().unwrap();

        lockout
            .run_exclusive(Duration::from_millis(20), || ())
            .unwrap();
        assert_eq!(lockout.exclusive_sections(), 1);
    }
}
