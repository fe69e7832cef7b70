//! Buffer cache.
//!
//! The buffer cache is a fixed table of slots holding cached copies of disk
//! block contents. Caching disk blocks in memory reduces the number of disk
//! reads and also provides a synchronization point for blocks used by
//! multiple threads.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call `read`.
//! * After changing buffer data, call `write` to write it to disk.
//! * Dropping the buffer releases it; do not keep buffers longer than
//!   necessary.
//!
//! A short mutex protects slot identity, reference counts and recency; a
//! per-slot [`SleepLock`] protects the block data and is held for the whole
//! life of a [`Buf`]. A slot with a nonzero reference count is never
//! recycled, which is also how the log pins blocks between `log_write` and
//! commit.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use array_macro::array;

use crate::block_dev::BlockDevice;
use crate::lock::{SleepLock, SleepLockGuard};
use crate::param::{BSIZE, NBUF};

/// Block data, aligned so that on-disk structures can be read in place.
#[repr(align(4))]
pub struct BufData {
    pub inner: [u8; BSIZE],
}

impl BufData {
    pub fn new() -> Self {
        Self { inner: [0; BSIZE] }
    }

    pub fn copy_from(&mut self, other: &BufData) {
        self.inner.copy_from_slice(&other.inner);
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

struct BufInner {
    /// Has data been read from disk?
    valid: bool,
    data: BufData,
}

#[derive(Clone, Copy, Default)]
struct BufMeta {
    dev: u32,
    blockno: u32,
    /// Live guards plus log pins; nonzero keeps the slot resident.
    refcnt: u32,
    /// Set once the slot has ever held a block, so identity matches are
    /// meaningful.
    used: bool,
    /// Release stamp; the recycling victim is the smallest among free slots.
    last_use: u64,
}

struct Meta {
    slots: [BufMeta; NBUF],
    ticks: u64,
}

pub struct Bcache {
    disk: Arc<dyn BlockDevice>,
    meta: Mutex<Meta>,
    entries: [SleepLock<BufInner>; NBUF],
}

impl Bcache {
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        Self {
            disk,
            meta: Mutex::new(Meta {
                slots: [BufMeta::default(); NBUF],
                ticks: 0,
            }),
            entries: array![_ => SleepLock::new("buffer", BufInner { valid: false, data: BufData::new() }); NBUF],
        }
    }

    /// Find or allocate the cache slot for `(dev, blockno)` with its
    /// reference count bumped.
    fn get(&self, dev: u32, blockno: u32) -> usize {
        let mut meta = self.meta.lock().unwrap();

        // Is the block already cached?
        if let Some(idx) = meta
            .slots
            .iter()
            .position(|s| s.used && s.dev == dev && s.blockno == blockno)
        {
            meta.slots[idx].refcnt += 1;
            return idx;
        }

        // Not cached; recycle the least recently released slot.
        let victim = meta
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.refcnt == 0)
            .min_by_key(|(_, s)| s.last_use)
            .map(|(idx, _)| idx);
        let idx = match victim {
            Some(idx) => idx,
            None => {
                drop(meta);
                panic!("bio: no buffers");
            }
        };
        let slot = &mut meta.slots[idx];
        slot.dev = dev;
        slot.blockno = blockno;
        slot.refcnt = 1;
        slot.used = true;
        // The slot was free, so its lock cannot be contended.
        self.entries[idx]
            .try_lock()
            .expect("bio: recycled buffer held")
            .valid = false;
        idx
    }

    /// Return a locked buffer with the contents of the indicated block.
    pub fn read(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let idx = self.get(dev, blockno);
        let mut guard = self.entries[idx].lock();
        if !guard.valid {
            self.disk.read_block(blockno, &mut guard.data);
            guard.valid = true;
        }
        Buf {
            cache: self,
            idx,
            dev,
            blockno,
            inner: Some(guard),
        }
    }

    /// Return a locked buffer with its contents zeroed, without reading the
    /// device. For blocks about to be completely overwritten.
    pub fn get_zeroed(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let idx = self.get(dev, blockno);
        let mut guard = self.entries[idx].lock();
        guard.data.fill(0);
        guard.valid = true;
        Buf {
            cache: self,
            idx,
            dev,
            blockno,
            inner: Some(guard),
        }
    }

    /// Write the buffer's contents through to the device.
    pub fn write(&self, buf: &Buf<'_>) {
        self.disk.write_block(buf.blockno, buf.data());
    }

    /// Take an extra reference on a block so it cannot be recycled until
    /// `unpin`. The caller must currently hold the block's buffer.
    pub(crate) fn pin(&self, buf: &Buf<'_>) {
        let mut meta = self.meta.lock().unwrap();
        meta.slots[buf.idx].refcnt += 1;
    }

    /// Drop the reference taken by `pin`. The block is still resident: a
    /// pinned slot can never have been recycled.
    pub(crate) fn unpin(&self, dev: u32, blockno: u32) {
        let mut meta = self.meta.lock().unwrap();
        let ticks = meta.ticks + 1;
        meta.ticks = ticks;
        let slot = meta
            .slots
            .iter_mut()
            .find(|s| s.used && s.refcnt > 0 && s.dev == dev && s.blockno == blockno)
            .expect("bio: unpin of unpinned block");
        slot.refcnt -= 1;
        slot.last_use = ticks;
    }

    fn release(&self, idx: usize) {
        let mut meta = self.meta.lock().unwrap();
        meta.ticks += 1;
        let ticks = meta.ticks;
        let slot = &mut meta.slots[idx];
        debug_assert!(slot.refcnt > 0);
        slot.refcnt -= 1;
        slot.last_use = ticks;
    }
}

/// A locked buffer. The slot's data lock is held for the life of this value;
/// dropping it unlocks the slot and releases the reference.
pub struct Buf<'b> {
    cache: &'b Bcache,
    idx: usize,
    pub dev: u32,
    pub blockno: u32,
    // `None` only while dropping.
    inner: Option<SleepLockGuard<'b, BufInner>>,
}

impl Buf<'_> {
    pub fn data(&self) -> &BufData {
        &self.inner.as_ref().unwrap().data
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        &mut self.inner.as_mut().unwrap().data
    }

    /// Pin the underlying slot in the cache; see [`Bcache::unpin`].
    pub(crate) fn pin(&self) {
        self.cache.pin(self);
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // Unlock before giving up the reference, so a recycler can never
        // observe a free slot whose lock is held.
        self.inner = None;
        self.cache.release(self.idx);
    }
}
