//! Sleepable locks.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

/// A mutual-exclusion lock whose guards can sleep on the lock's own wait
/// channel while the condition they need is not yet true.
pub struct SleepableLock<T> {
    name: &'static str,
    cond: Condvar,
    mutex: Mutex<T>,
}

/// Guards of `SleepableLock<T>`. These guards can `sleep()`/`wakeup()`.
pub struct SleepableLockGuard<'s, T> {
    lock: &'s SleepableLock<T>,
    // `None` only transiently, while the lock is released inside `sleep` or
    // `reacquire_after`.
    inner: Option<MutexGuard<'s, T>>,
}

impl<T> SleepableLock<T> {
    /// Returns a new `SleepableLock` with name `name` and data `data`.
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            cond: Condvar::new(),
            mutex: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SleepableLockGuard<'_, T> {
        SleepableLockGuard {
            lock: self,
            inner: Some(self.mutex.lock().unwrap()),
        }
    }
}

impl<T> fmt::Debug for SleepableLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SleepableLock({})", self.name)
    }
}

impl<T> SleepableLockGuard<'_, T> {
    /// Atomically release the lock and block until some other guard of the
    /// same lock calls `wakeup`. The lock is held again on return; the caller
    /// must re-check its condition.
    pub fn sleep(&mut self) {
        let guard = self.inner.take().unwrap();
        self.inner = Some(self.lock.cond.wait(guard).unwrap());
    }

    /// Wake every guard sleeping on this lock.
    pub fn wakeup(&self) {
        self.lock.cond.notify_all();
    }

    /// Run `f` with the lock released, then reacquire it before returning.
    pub fn reacquire_after<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner = None;
        let r = f();
        self.inner = Some(self.lock.mutex.lock().unwrap());
        r
    }
}

impl<T> Deref for SleepableLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().unwrap()
    }
}

impl<T> DerefMut for SleepableLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut().unwrap()
    }
}
