//! Process-wide SMU mailbox lock
//!
//! MP1 and PSMU share one PCI index/data port pair, so every transaction in
//! the process, on either mailbox and from any transport instance, goes
//! through this single lock.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounded-wait lock; `std::sync::Mutex` alone cannot time out
pub struct SmuLock {
    held: Mutex<bool>,
    released: Condvar,
}

/// Held SMU lock; released on drop, including while unwinding
#[must_use = "the SMU lock is released as soon as the guard is dropped"]
pub struct SmuLockGuard<'a> {
    lock: &'a SmuLock,
}

static SMU_LOCK: SmuLock = SmuLock::new();

/// The lock shared by every transport in the process
pub fn global() -> &'static SmuLock {
    &SMU_LOCK
}

impl SmuLock {
    /// Create an unlocked instance
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        // The flag is only ever flipped while the inner mutex is held, so a
        // poisoned mutex still guards a consistent value
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire, waiting at most `timeout`
    pub fn acquire(&self, timeout: Duration) -> Option<SmuLockGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut held = self.state();

        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        *held = true;
        Some(SmuLockGuard { lock: self })
    }

    /// Whether some caller currently holds the lock
    pub fn is_held(&self) -> bool {
        *self.state()
    }
}

impl Default for SmuLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SmuLockGuard<'_> {
    fn drop(&mut self) {
        *self.lock.state() = false;
        self.lock.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let lock = SmuLock::new();
        {
            let _guard = lock.acquire(Duration::from_millis(10)).expect("free lock");
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let lock = SmuLock::new();
        let _guard = lock.acquire(Duration::from_millis(10)).expect("free lock");

        let started = Instant::now();
        assert!(lock.acquire(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let lock = Arc::new(SmuLock::new());
        let guard = lock.acquire(Duration::from_millis(10)).expect("free lock");

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire(Duration::from_secs(5)).is_some())
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_released_while_unwinding() {
        let lock = Arc::new(SmuLock::new());
        let result = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _guard = lock.acquire(Duration::from_millis(10)).expect("free lock");
                panic!("transaction blew up");
            })
            .join()
        };

        assert!(result.is_err());
        assert!(!lock.is_held());
        assert!(lock.acquire(Duration::from_millis(10)).is_some());
    }
}
