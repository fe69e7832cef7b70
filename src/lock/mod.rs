//! The lock module.
//!
//! Two flavors of lock coordinate the filesystem layers:
//!
//! * [`SleepableLock`] is a short lock whose guard can block on the lock's
//!   wait channel. It protects small state (the log's counters, cache slot
//!   identity) and is never held across block I/O; a guard that must wait
//!   for a condition calls `sleep()` and is woken by a `wakeup()` from
//!   another guard of the same lock.
//! * [`SleepLock`] is a long lock, held across multiple block I/Os. It
//!   guards an inode's content fields and a cached buffer's data.
//!
//! In a kernel the short locks would be spinlocks and the long locks a
//! locked-flag-plus-wait-channel pair. Here both map onto host mutexes, and
//! each lock's wait channel is its own condition variable, so a wakeup can
//! never be lost between a condition check and the sleep that follows it.

mod sleepablelock;
mod sleeplock;

pub use sleepablelock::{SleepableLock, SleepableLockGuard};
pub use sleeplock::{SleepLock, SleepLockGuard};
