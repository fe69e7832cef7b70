//! Long-term locks, held across block I/O.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

/// A lock that may be held for a long time: waiters block instead of
/// spinning, and the holder may itself block on I/O while holding it.
pub struct SleepLock<T> {
    name: &'static str,
    mutex: Mutex<T>,
}

pub struct SleepLockGuard<'s, T> {
    lock: &'s SleepLock<T>,
    // `None` only transiently, inside `reacquire_after`.
    inner: Option<MutexGuard<'s, T>>,
}

impl<T> SleepLock<T> {
    /// Returns a new `SleepLock` with name `name` and data `data`.
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            mutex: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        SleepLockGuard {
            lock: self,
            inner: Some(self.mutex.lock().unwrap()),
        }
    }

    /// Acquire the lock only if it is not held. Used where the caller can
    /// prove there is no contention and blocking would be a bug.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        self.mutex.try_lock().ok().map(|g| SleepLockGuard {
            lock: self,
            inner: Some(g),
        })
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SleepLock({})", self.name)
    }
}

impl<T> SleepLockGuard<'_, T> {
    /// Run `f` with the lock released, then reacquire it before returning.
    /// The protected data may have changed in between.
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

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().unwrap()
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut().unwrap()
    }
}
