//! Inodes.
//!
//! An inode describes a single unnamed file. The inode disk structure holds
//! metadata: the file's type, its size, the number of links referring to it,
//! and the list of blocks holding the file's content.
//!
//! The inodes are laid out sequentially on disk starting right after the
//! superblock. Each inode has a number, indicating its position on the disk.
//!
//! The filesystem keeps a table of in-use inodes in memory to provide a
//! place for synchronizing access to inodes used by multiple threads. The
//! in-memory inodes include book-keeping information that is not stored on
//! disk: the slot's reference count and the `valid` flag.
//!
//! An inode and its in-memory representation go through a sequence of states
//! before they can be used by the rest of the file system code:
//!
//! * Allocation: an inode is allocated if its type (on disk) is non-zero.
//!   [`Tx::ialloc`] allocates, and [`RcInode::put`] frees if the reference
//!   and link counts have fallen to zero.
//! * Referencing in table: an entry in the inode table is free if its
//!   reference count is zero. Otherwise it tracks the number of in-memory
//!   handles to the entry. [`FileSystem::iget`] finds or creates a table
//!   entry and increments its count; [`RcInode::put`] decrements it.
//! * Valid: the information (type, size, &c) in a table entry is only
//!   correct when `valid` is set. [`RcInode::lock`] reads the inode from the
//!   disk and sets `valid`, while [`RcInode::put`] clears `valid` if the
//!   reference count has fallen to zero.
//! * Locked: file system code may only examine and modify the information in
//!   an inode and its content if it holds the inode's long lock, i.e. an
//!   [`InodeGuard`].
//!
//! Thus a typical sequence is:
//!   let ip = fs.iget(dev, inum);
//!   let guard = ip.lock();
//!   ... examine and modify guard ...
//!   drop(guard);
//!   ip.put(&tx);
//!
//! `lock()` is separate from `iget()` so that callers can keep a long-term
//! reference to an inode (as for an open file or a working directory) and
//! only lock it for short periods (e.g., in `read_bytes()`). The separation
//! also helps avoid deadlock and races during pathname lookup: `iget()`
//! bumps the reference count so the slot stays allocated and the handle
//! remains usable.
//!
//! The table's short mutex protects slot identity and reference counts. The
//! per-slot long lock protects everything else: `valid`, `typ`, `size`, the
//! block map. Dropping the last handle to an unlinked inode frees the inode
//! on disk, which is why `put` requires a transaction.

use std::mem;
use std::sync::Mutex;

use array_macro::array;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use super::path::FileName;
use super::stat::Stat;
use super::superblock::IPB;
use super::{FileSystem, Tx, MAXFILE, NDIRECT, NINDIRECT};
use crate::error::{Error, Result};
use crate::lock::{SleepLock, SleepLockGuard};
use crate::param::{BSIZE, NINODE};

/// Directory entry name length.
pub const DIRSIZ: usize = 14;

/// dirent size.
pub const DIRENT_SIZE: usize = mem::size_of::<Dirent>();

// On-disk type codes.
pub(crate) const T_DIR: i16 = 1;
pub(crate) const T_FILE: i16 = 2;
pub(crate) const T_DEV: i16 = 3;

/// What an inode is. `None` marks a free on-disk inode and is never
/// observable through a locked, live inode.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InodeType {
    None,
    Dir,
    File,
    Device { major: u16, minor: u16 },
}

/// Content fields of an in-memory inode, guarded by the slot's long lock.
pub struct InodeInner {
    /// Has the dinode been read from disk?
    pub valid: bool,
    /// Copy of the disk inode.
    pub typ: InodeType,
    pub nlink: i16,
    pub size: u32,
    pub addr_direct: [u32; NDIRECT],
    pub addr_indirect: u32,
}

/// On-disk inode structure.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub(crate) struct Dinode {
    /// File type; 0 means free.
    pub typ: i16,

    /// Major device number (device files only)
    pub major: u16,

    /// Minor device number (device files only)
    pub minor: u16,

    /// Number of links to inode in file system
    pub nlink: i16,

    /// Size of file (bytes)
    pub size: u32,

    /// Direct data block addresses
    pub addr_direct: [u32; NDIRECT],

    /// Indirect data block address
    pub addr_indirect: u32,
}

// An inode block holds a whole number of dinodes.
const_assert!(mem::size_of::<Dinode>() == 64);
const_assert!(BSIZE % mem::size_of::<Dinode>() == 0);

/// A directory entry. `inum == 0` marks a free slot. The name is NUL-padded
/// when shorter than `DIRSIZ` and unterminated at full length.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct Dirent {
    pub inum: u16,
    name: [u8; DIRSIZ],
}

const_assert!(BSIZE % DIRENT_SIZE == 0);

impl Dirent {
    /// Fill in the name, NUL-terminated unless it occupies the whole field.
    pub(crate) fn set_name(&mut self, name: FileName<'_>) {
        let bytes = name.as_bytes();
        if bytes.len() == DIRSIZ {
            self.name.copy_from_slice(bytes);
        } else {
            self.name[..bytes.len()].copy_from_slice(bytes);
            self.name[bytes.len()] = 0;
        }
    }

    /// The stored name, without padding.
    pub fn name(&self) -> FileName<'_> {
        let len = self.name.iter().position(|&ch| ch == 0).unwrap_or(DIRSIZ);
        FileName::new(&self.name[..len])
    }
}

#[derive(Copy, Clone, Default)]
struct SlotMeta {
    dev: u32,
    inum: u32,
    /// Number of live handles; 0 means the slot is recyclable.
    refcnt: u32,
}

/// The in-memory inode table: a fixed arena of slots. The mutex mediates
/// slot identity and reference counts; each slot's long lock guards its
/// content fields.
pub struct Itable {
    meta: Mutex<[SlotMeta; NINODE]>,
    slots: [SleepLock<InodeInner>; NINODE],
}

impl Itable {
    pub(crate) fn new() -> Self {
        Self {
            meta: Mutex::new([SlotMeta::default(); NINODE]),
            slots: array![_ => SleepLock::new("inode", InodeInner {
                valid: false,
                typ: InodeType::None,
                nlink: 0,
                size: 0,
                addr_direct: [0; NDIRECT],
                addr_indirect: 0,
            }); NINODE],
        }
    }

    /// Find the slot caching `(dev, inum)`, or recycle a free one, with the
    /// reference count bumped.
    fn get_slot(&self, dev: u32, inum: u32) -> usize {
        let mut meta = self.meta.lock().unwrap();
        let mut empty = None;
        for (idx, slot) in meta.iter_mut().enumerate() {
            if slot.refcnt > 0 && slot.dev == dev && slot.inum == inum {
                slot.refcnt += 1;
                return idx;
            }
            if empty.is_none() && slot.refcnt == 0 {
                empty = Some(idx);
            }
        }
        let idx = empty.expect("itable: no inodes");
        meta[idx] = SlotMeta {
            dev,
            inum,
            refcnt: 1,
        };
        // Whatever the slot held before is stale. It was free, so its long
        // lock cannot be contended.
        self.slots[idx]
            .try_lock()
            .expect("itable: free inode held")
            .valid = false;
        idx
    }
}

impl FileSystem {
    /// Find the inode with number `inum` on device `dev` and return an
    /// in-memory handle to it. Does not lock the inode and does not read it
    /// from disk.
    pub fn iget(&self, dev: u32, inum: u32) -> RcInode<'_> {
        let idx = self.itable.get_slot(dev, inum);
        RcInode {
            fs: self,
            idx,
            dev,
            inum,
        }
    }
}

/// A counted handle to an in-memory inode. Cloning it is the classic `idup`;
/// it must be released with [`RcInode::put`], inside a transaction, because
/// releasing the last handle to an unlinked inode frees it on disk.
pub struct RcInode<'s> {
    fs: &'s FileSystem,
    idx: usize,
    /// Device number; stable while this handle exists.
    pub dev: u32,
    /// Inode number; stable while this handle exists.
    pub inum: u32,
}

impl Clone for RcInode<'_> {
    fn clone(&self) -> Self {
        let mut meta = self.fs.itable.meta.lock().unwrap();
        meta[self.idx].refcnt += 1;
        Self {
            fs: self.fs,
            idx: self.idx,
            dev: self.dev,
            inum: self.inum,
        }
    }
}

impl std::fmt::Debug for RcInode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcInode")
            .field("dev", &self.dev)
            .field("inum", &self.inum)
            .finish()
    }
}

impl Drop for RcInode<'_> {
    fn drop(&mut self) {
        // References are released with put(); a plain drop would skip the
        // free-on-last-reference protocol. Letting this slide during an
        // unwind keeps a failing assertion elsewhere readable.
        if !std::thread::panicking() {
            panic!("inode reference dropped without put()");
        }
    }
}

impl<'s> RcInode<'s> {
    /// Lock the inode, reading its metadata from disk if this slot has not
    /// been loaded yet.
    pub fn lock(&self) -> InodeGuard<'s> {
        let fs = self.fs;
        let mut inner = fs.itable.slots[self.idx].lock();
        if !inner.valid {
            let buf = fs.bcache.read(self.dev, fs.superblock.iblock(self.inum));
            let dinodes = LayoutVerified::<_, [Dinode]>::new_slice(&buf.data()[..])
                .expect("inode: bad block layout");
            let dip = &dinodes[self.inum as usize % IPB];
            inner.typ = match dip.typ {
                0 => InodeType::None,
                T_DIR => InodeType::Dir,
                T_FILE => InodeType::File,
                T_DEV => InodeType::Device {
                    major: dip.major,
                    minor: dip.minor,
                },
                t => panic!("ilock: unknown type {}", t),
            };
            inner.nlink = dip.nlink;
            inner.size = dip.size;
            inner.addr_direct = dip.addr_direct;
            inner.addr_indirect = dip.addr_indirect;
            drop(buf);
            inner.valid = true;
            assert!(inner.typ != InodeType::None, "ilock: no type");
        }
        InodeGuard {
            fs,
            dev: self.dev,
            inum: self.inum,
            inner,
        }
    }

    /// Drop a reference to an in-memory inode. If that was the last
    /// reference, the table entry can be recycled; if the inode also has no
    /// links, free the inode (and its content) on disk. The transaction is
    /// required for that final free.
    pub fn put(self, tx: &Tx<'_>) {
        let fs = self.fs;
        let mut meta = fs.itable.meta.lock().unwrap();
        if meta[self.idx].refcnt == 1 {
            // No other handle exists and every guard stems from a handle, so
            // the long lock cannot be contended.
            let inner = fs.itable.slots[self.idx]
                .try_lock()
                .expect("iput: busy inode");
            if inner.valid && inner.nlink == 0 {
                // The inode has no links and no other references: truncate
                // and free it, without the table mutex across the I/O.
                drop(meta);
                let mut guard = InodeGuard {
                    fs,
                    dev: self.dev,
                    inum: self.inum,
                    inner,
                };
                guard.trunc(tx);
                guard.deref_inner_mut().typ = InodeType::None;
                guard.update(tx);
                guard.deref_inner_mut().valid = false;
                drop(guard);
                meta = fs.itable.meta.lock().unwrap();
            }
        }
        meta[self.idx].refcnt -= 1;
        drop(meta);
        mem::forget(self);
    }

    /// Snapshot the inode's metadata. Callers that already hold the lock use
    /// [`InodeGuard::stat`] instead.
    pub fn stat(&self) -> Stat {
        self.lock().stat()
    }
}

/// Holder of an inode's long lock; the only way to reach content fields.
/// Dropping the guard unlocks the inode.
pub struct InodeGuard<'s> {
    fs: &'s FileSystem,
    pub dev: u32,
    pub inum: u32,
    inner: SleepLockGuard<'s, InodeInner>,
}

impl<'s> InodeGuard<'s> {
    pub fn deref_inner(&self) -> &InodeInner {
        &self.inner
    }

    pub fn deref_inner_mut(&mut self) -> &mut InodeInner {
        &mut self.inner
    }

    pub fn stat(&self) -> Stat {
        let inner = self.deref_inner();
        Stat {
            dev: self.dev,
            ino: self.inum,
            typ: inner.typ,
            nlink: inner.nlink,
            size: inner.size,
        }
    }

    /// Copy a modified in-memory inode to disk. Must be called after every
    /// change to a field that lives in the dinode.
    pub fn update(&mut self, tx: &Tx<'_>) {
        let fs = self.fs;
        let mut buf = fs.bcache.read(self.dev, fs.superblock.iblock(self.inum));
        let mut dinodes = LayoutVerified::<_, [Dinode]>::new_slice(&mut buf.data_mut()[..])
            .expect("inode: bad block layout");
        let dip = &mut dinodes[self.inum as usize % IPB];
        let inner = &*self.inner;
        match inner.typ {
            InodeType::None => {
                dip.typ = 0;
                dip.major = 0;
                dip.minor = 0;
            }
            InodeType::Dir => {
                dip.typ = T_DIR;
                dip.major = 0;
                dip.minor = 0;
            }
            InodeType::File => {
                dip.typ = T_FILE;
                dip.major = 0;
                dip.minor = 0;
            }
            InodeType::Device { major, minor } => {
                dip.typ = T_DEV;
                dip.major = major;
                dip.minor = minor;
            }
        }
        dip.nlink = inner.nlink;
        dip.size = inner.size;
        dip.addr_direct = inner.addr_direct;
        dip.addr_indirect = inner.addr_indirect;
        tx.write(buf);
    }

    /// Inode content.
    ///
    /// The content (data) associated with each inode is stored in blocks on
    /// the disk. The first `NDIRECT` block numbers are listed in
    /// `addr_direct`; the next `NINDIRECT` in the block `addr_indirect`
    /// points to. Returns the disk block number of the `bn`th content block,
    /// allocating it (and the indirect block) first when the caller supplies
    /// a transaction.
    fn bmap_raw(&mut self, bn: usize, tx: Option<&Tx<'_>>) -> u32 {
        if bn < NDIRECT {
            let mut addr = self.deref_inner().addr_direct[bn];
            if addr == 0 {
                addr = tx.expect("bmap: unallocated block").balloc(self.dev);
                self.deref_inner_mut().addr_direct[bn] = addr;
            }
            addr
        } else {
            let bn = bn - NDIRECT;
            assert!(bn < NINDIRECT, "bmap: out of range");

            let mut indirect = self.deref_inner().addr_indirect;
            if indirect == 0 {
                indirect = tx.expect("bmap: unallocated block").balloc(self.dev);
                self.deref_inner_mut().addr_indirect = indirect;
            }

            let fs = self.fs;
            let mut bp = fs.bcache.read(self.dev, indirect);
            let mut slots = LayoutVerified::<_, [u32]>::new_slice(&mut bp.data_mut()[..])
                .expect("bmap: bad indirect block");
            let mut addr = slots[bn];
            if addr == 0 {
                let tx = tx.expect("bmap: unallocated block");
                addr = tx.balloc(self.dev);
                slots[bn] = addr;
                tx.write(bp);
            }
            addr
        }
    }

    fn bmap(&mut self, bn: usize) -> u32 {
        self.bmap_raw(bn, None)
    }

    fn bmap_or_alloc(&mut self, bn: usize, tx: &Tx<'_>) -> u32 {
        self.bmap_raw(bn, Some(tx))
    }

    /// Truncate the inode's content, returning every data block (and the
    /// indirect block) to the allocator.
    pub fn trunc(&mut self, tx: &Tx<'_>) {
        let dev = self.dev;
        for addr in &mut self.deref_inner_mut().addr_direct {
            if *addr != 0 {
                tx.bfree(dev, *addr);
                *addr = 0;
            }
        }

        let indirect = self.deref_inner().addr_indirect;
        if indirect != 0 {
            {
                let bp = self.fs.bcache.read(dev, indirect);
                let slots = LayoutVerified::<_, [u32]>::new_slice(&bp.data()[..])
                    .expect("trunc: bad indirect block");
                for &addr in slots.iter() {
                    if addr != 0 {
                        tx.bfree(dev, addr);
                    }
                }
            }
            tx.bfree(dev, indirect);
            self.deref_inner_mut().addr_indirect = 0;
        }

        self.deref_inner_mut().size = 0;
        self.update(tx);
    }

    /// Read up to `dst.len()` bytes from the inode at byte offset `off` into
    /// `dst`; returns the number of bytes read, short only at end of file.
    /// Device inodes dispatch to the registered driver, with the inode
    /// unlocked for the duration of the call.
    pub fn read_bytes(&mut self, dst: &mut [u8], off: u32) -> Result<usize> {
        if let InodeType::Device { major, .. } = self.deref_inner().typ {
            let device = self.fs.devsw.get(major)?;
            return self.inner.reacquire_after(|| device.read(dst));
        }

        let size = self.deref_inner().size;
        let mut n = dst.len() as u32;
        if off > size || off.checked_add(n).is_none() {
            return Err(Error::OutOfRange);
        }
        if off + n > size {
            n = size - off;
        }

        let mut tot: u32 = 0;
        let mut off = off;
        while tot < n {
            let addr = self.bmap(off as usize / BSIZE);
            let bp = self.fs.bcache.read(self.dev, addr);
            let m = (n - tot).min(BSIZE as u32 - off % BSIZE as u32);
            let begin = (off % BSIZE as u32) as usize;
            dst[tot as usize..(tot + m) as usize]
                .copy_from_slice(&bp.data()[begin..begin + m as usize]);
            tot += m;
            off += m;
        }
        Ok(tot as usize)
    }

    /// Write `src` into the inode at byte offset `off`, growing the file (and
    /// its block map) as needed. Device inodes dispatch to the registered
    /// driver, with the inode unlocked for the duration of the call.
    pub fn write_bytes(&mut self, src: &[u8], off: u32, tx: &Tx<'_>) -> Result<usize> {
        if let InodeType::Device { major, .. } = self.deref_inner().typ {
            let device = self.fs.devsw.get(major)?;
            return self.inner.reacquire_after(|| device.write(src));
        }

        let n = src.len() as u32;
        if off > self.deref_inner().size {
            return Err(Error::OutOfRange);
        }
        let end = off.checked_add(n).ok_or(Error::OutOfRange)?;
        if end as usize > MAXFILE * BSIZE {
            return Err(Error::OutOfRange);
        }

        let mut tot: u32 = 0;
        let mut off = off;
        while tot < n {
            let addr = self.bmap_or_alloc(off as usize / BSIZE, tx);
            let mut bp = self.fs.bcache.read(self.dev, addr);
            let m = (n - tot).min(BSIZE as u32 - off % BSIZE as u32);
            let begin = (off % BSIZE as u32) as usize;
            bp.data_mut()[begin..begin + m as usize]
                .copy_from_slice(&src[tot as usize..(tot + m) as usize]);
            tx.write(bp);
            tot += m;
            off += m;
        }

        if off > self.deref_inner().size {
            self.deref_inner_mut().size = off;
        }

        // Write the inode back even if the size didn't change, because the
        // loop above may have added blocks to the map.
        self.update(tx);
        Ok(tot as usize)
    }

    /// Read one fixed-size record at byte offset `off`.
    pub fn read_obj<T: AsBytes + FromBytes>(&mut self, dst: &mut T, off: u32) -> Result<()> {
        let read = self.read_bytes(dst.as_bytes_mut(), off)?;
        if read == mem::size_of::<T>() {
            Ok(())
        } else {
            Err(Error::OutOfRange)
        }
    }

    /// Write one fixed-size record at byte offset `off`.
    pub fn write_obj<T: AsBytes>(&mut self, src: &T, off: u32, tx: &Tx<'_>) -> Result<()> {
        let written = self.write_bytes(src.as_bytes(), off, tx)?;
        if written == mem::size_of::<T>() {
            Ok(())
        } else {
            Err(Error::OutOfRange)
        }
    }
}

// Directories.
impl<'s> InodeGuard<'s> {
    /// Look for a directory entry by name. On a hit, returns a fresh
    /// unlocked reference to the child and the entry's byte offset.
    pub fn dirlookup(&mut self, name: FileName<'_>) -> Result<(RcInode<'s>, u32)> {
        assert!(
            self.deref_inner().typ == InodeType::Dir,
            "dirlookup not DIR"
        );

        let size = self.deref_inner().size;
        let mut de = Dirent::default();
        for off in (0..size).step_by(DIRENT_SIZE) {
            self.read_obj(&mut de, off).expect("dirlookup read");
            if de.inum != 0 && de.name() == name {
                return Ok((self.fs.iget(self.dev, de.inum as u32), off));
            }
        }
        Err(Error::NotFound)
    }

    /// Write a new directory entry (`name`, `inum`) into this directory,
    /// reusing the first free slot or appending at the end.
    pub fn dirlink(&mut self, name: FileName<'_>, inum: u32, tx: &Tx<'_>) -> Result<()> {
        // The name must not already be present.
        if let Ok((ip, _)) = self.dirlookup(name) {
            ip.put(tx);
            return Err(Error::AlreadyExists);
        }

        // Look for an empty dirent.
        let size = self.deref_inner().size;
        let mut de = Dirent::default();
        let mut off = size;
        for o in (0..size).step_by(DIRENT_SIZE) {
            self.read_obj(&mut de, o).expect("dirlink read");
            if de.inum == 0 {
                off = o;
                break;
            }
        }

        de.inum = inum as u16;
        de.set_name(name);
        self.write_obj(&de, off, tx).expect("dirlink write");
        Ok(())
    }

    /// Is the directory empty except for "." and ".."?
    pub(crate) fn is_dir_empty(&mut self) -> bool {
        let size = self.deref_inner().size;
        let mut de = Dirent::default();
        for off in (2 * DIRENT_SIZE as u32..size).step_by(DIRENT_SIZE) {
            self.read_obj(&mut de, off).expect("is_dir_empty read");
            if de.inum != 0 {
                return false;
            }
        }
        true
    }
}

impl<'s> Tx<'s> {
    /// Allocate a fresh inode of the given type on device `dev`. Zeroing the
    /// dinode and setting its type land in one logged block write, so
    /// allocation is atomic at the inode level.
    pub fn ialloc(&self, dev: u32, typ: InodeType) -> RcInode<'s> {
        let fs = self.fs;
        for inum in 1..fs.superblock.ninodes {
            let mut bp = fs.bcache.read(dev, fs.superblock.iblock(inum));
            let mut dinodes = LayoutVerified::<_, [Dinode]>::new_slice(&mut bp.data_mut()[..])
                .expect("ialloc: bad block layout");
            let dip = &mut dinodes[inum as usize % IPB];
            if dip.typ == 0 {
                // A free inode.
                *dip = Dinode::default();
                match typ {
                    InodeType::Dir => dip.typ = T_DIR,
                    InodeType::File => dip.typ = T_FILE,
                    InodeType::Device { major, minor } => {
                        dip.typ = T_DEV;
                        dip.major = major;
                        dip.minor = minor;
                    }
                    InodeType::None => panic!("ialloc: no type"),
                }
                // Mark it allocated on the disk.
                self.write(bp);
                return fs.iget(dev, inum);
            }
        }
        panic!("ialloc: no inodes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_fs;
    use crate::fs::ROOTINO;
    use crate::param::{MAXOPBLOCKS, ROOTDEV};

    /// Is block `b` clear in the allocation bitmap?
    fn block_free(fs: &FileSystem, b: u32) -> bool {
        let bp = fs.bcache.read(ROOTDEV, fs.superblock.bblock(b));
        let bi = b % super::super::superblock::BPB;
        bp.data()[bi as usize / 8] & (1 << (bi % 8)) == 0
    }

    /// Write `src` through a sequence of transactions, the way a file write
    /// path batches to respect the per-operation log budget.
    fn write_all(fs: &FileSystem, ip: &RcInode<'_>, src: &[u8], mut off: u32) {
        let max = ((MAXOPBLOCKS - 4) / 2) * BSIZE;
        for chunk in src.chunks(max) {
            let tx = fs.begin_transaction();
            let mut guard = ip.lock();
            let written = guard.write_bytes(chunk, off, &tx).unwrap();
            assert_eq!(written, chunk.len());
            off += written as u32;
            drop(guard);
            drop(tx);
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_round_trips_and_grows_size() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        let mut guard = ip.lock();
        guard.deref_inner_mut().nlink = 1;
        guard.update(&tx);

        let data = pattern(1500);
        assert_eq!(guard.write_bytes(&data, 0, &tx).unwrap(), 1500);
        assert_eq!(guard.deref_inner().size, 1500);

        // Exactly three direct blocks were allocated.
        let inner = guard.deref_inner();
        assert!(inner.addr_direct[..3].iter().all(|&a| a != 0));
        assert!(inner.addr_direct[3..].iter().all(|&a| a == 0));
        assert_eq!(inner.addr_indirect, 0);

        let mut back = vec![0u8; 1500];
        assert_eq!(guard.read_bytes(&mut back, 0).unwrap(), 1500);
        assert_eq!(back, data);

        // Overwrites inside the file do not grow it.
        assert_eq!(guard.write_bytes(&[1, 2, 3], 100, &tx).unwrap(), 3);
        assert_eq!(guard.deref_inner().size, 1500);

        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn read_beyond_the_end_is_truncated_or_rejected() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        let mut guard = ip.lock();
        guard.deref_inner_mut().nlink = 1;
        guard.update(&tx);
        guard.write_bytes(&[9u8; 100], 0, &tx).unwrap();

        // A read straddling the end is truncated.
        let mut buf = [0u8; 64];
        assert_eq!(guard.read_bytes(&mut buf, 80).unwrap(), 20);
        // A read starting past the end is rejected.
        assert_eq!(guard.read_bytes(&mut buf, 101), Err(Error::OutOfRange));
        // So is an offset that overflows.
        assert_eq!(guard.read_bytes(&mut buf, u32::MAX), Err(Error::OutOfRange));

        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn writes_cannot_leave_holes_or_overflow() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        let mut guard = ip.lock();
        guard.deref_inner_mut().nlink = 1;
        guard.update(&tx);

        // A write starting past the end would leave a hole.
        assert_eq!(guard.write_bytes(&[1], 1, &tx), Err(Error::OutOfRange));
        // Offset arithmetic must not wrap.
        assert_eq!(
            guard.write_bytes(&[1, 1], u32::MAX, &tx),
            Err(Error::OutOfRange)
        );

        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn first_write_past_the_direct_region_allocates_the_indirect_block() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        {
            let mut guard = ip.lock();
            guard.deref_inner_mut().nlink = 1;
            guard.update(&tx);
        }
        drop(tx);

        // Fill the direct region in batches.
        let data = pattern(NDIRECT * BSIZE);
        write_all(&fs, &ip, &data, 0);
        {
            let guard = ip.lock();
            assert_eq!(guard.deref_inner().addr_indirect, 0);
        }

        // One more byte forces the indirect block into existence.
        let tx = fs.begin_transaction();
        let mut guard = ip.lock();
        guard.write_bytes(&[0x5a], (NDIRECT * BSIZE) as u32, &tx).unwrap();
        let indirect = guard.deref_inner().addr_indirect;
        assert!(indirect != 0);
        let first_indirect = {
            let bp = fs.bcache.read(ROOTDEV, indirect);
            let slots = LayoutVerified::<_, [u32]>::new_slice(&bp.data()[..]).unwrap();
            slots[0]
        };
        assert!(first_indirect != 0);
        drop(guard);
        drop(tx);

        // Truncation returns both to the bitmap.
        let tx = fs.begin_transaction();
        let mut guard = ip.lock();
        guard.trunc(&tx);
        assert_eq!(guard.deref_inner().size, 0);
        drop(guard);
        drop(tx);
        assert!(block_free(&fs, indirect));
        assert!(block_free(&fs, first_indirect));

        let tx = fs.begin_transaction();
        let mut guard = ip.lock();
        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn the_file_size_limit_is_exact() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        {
            let mut guard = ip.lock();
            guard.deref_inner_mut().nlink = 1;
            guard.update(&tx);
        }
        drop(tx);

        // Writing up to the limit succeeds.
        let limit = (MAXFILE * BSIZE) as u32;
        let data = pattern(MAXFILE * BSIZE);
        write_all(&fs, &ip, &data, 0);

        let tx = fs.begin_transaction();
        let mut guard = ip.lock();
        assert_eq!(guard.deref_inner().size, limit);
        // Writing at the limit is rejected.
        assert_eq!(guard.write_bytes(&[1], limit, &tx), Err(Error::OutOfRange));

        guard.trunc(&tx);
        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn freeing_an_unlinked_inode_returns_everything() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        let inum = ip.inum;
        let mut guard = ip.lock();
        guard.deref_inner_mut().nlink = 1;
        guard.update(&tx);
        guard.write_bytes(&pattern(1000), 0, &tx).unwrap();
        let first = guard.deref_inner().addr_direct[0];
        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        ip.put(&tx);
        drop(tx);

        // The data blocks went back to the bitmap and the inode number to
        // the free pool: the next allocation reuses both.
        assert!(block_free(&fs, first));
        let tx = fs.begin_transaction();
        let again = tx.ialloc(ROOTDEV, InodeType::File);
        assert_eq!(again.inum, inum);
        let mut guard = again.lock();
        assert_eq!(guard.deref_inner().size, 0);
        guard.deref_inner_mut().nlink = 0;
        guard.update(&tx);
        drop(guard);
        again.put(&tx);
        drop(tx);
    }

    #[test]
    fn handles_share_one_table_slot_per_inode() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let a = fs.iget(ROOTDEV, ROOTINO);
        let b = fs.iget(ROOTDEV, ROOTINO);
        let c = a.clone();
        assert_eq!(a.idx, b.idx);
        assert_eq!(a.idx, c.idx);
        assert_eq!(fs.itable.meta.lock().unwrap()[a.idx].refcnt, 3);
        a.put(&tx);
        b.put(&tx);
        c.put(&tx);
        assert_eq!(fs.itable.meta.lock().unwrap()[0].refcnt, 0);
        drop(tx);
    }

    #[test]
    fn dirlink_then_dirlookup_round_trips() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let ip = tx.ialloc(ROOTDEV, InodeType::File);
        {
            let mut guard = ip.lock();
            guard.deref_inner_mut().nlink = 1;
            guard.update(&tx);
        }

        let root = fs.iget(ROOTDEV, ROOTINO);
        let mut dir = root.lock();
        dir.dirlink(FileName::new(b"x"), ip.inum, &tx).unwrap();
        let (found, off) = dir.dirlookup(FileName::new(b"x")).unwrap();
        assert_eq!(found.inum, ip.inum);
        // "." and ".." precede it.
        assert_eq!(off, 2 * DIRENT_SIZE as u32);

        // Linking the same name again is rejected.
        assert_eq!(
            dir.dirlink(FileName::new(b"x"), ip.inum, &tx),
            Err(Error::AlreadyExists)
        );

        drop(dir);
        found.put(&tx);
        root.put(&tx);
        ip.put(&tx);
        drop(tx);
    }

    #[test]
    fn dirlink_reuses_freed_slots() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let root = fs.iget(ROOTDEV, ROOTINO);
        let mut dir = root.lock();
        for (i, name) in [&b"a"[..], b"b", b"c"].iter().enumerate() {
            dir.dirlink(FileName::new(name), 10 + i as u32, &tx).unwrap();
        }
        let (ip, b_off) = dir.dirlookup(FileName::new(b"b")).unwrap();
        ip.put(&tx);

        // Erase "b"; the next link lands in its slot.
        dir.write_obj(&Dirent::default(), b_off, &tx).unwrap();
        dir.dirlink(FileName::new(b"d"), 20, &tx).unwrap();
        let (ip, d_off) = dir.dirlookup(FileName::new(b"d")).unwrap();
        assert_eq!(d_off, b_off);
        assert_eq!(ip.inum, 20);
        ip.put(&tx);

        drop(dir);
        root.put(&tx);
        drop(tx);
    }

    #[test]
    fn dirent_names_fill_the_field_without_a_terminator() {
        let mut de = Dirent::default();
        let long = b"abcdefghijklmn";
        assert_eq!(long.len(), DIRSIZ);
        de.set_name(FileName::new(long));
        assert_eq!(de.name().as_bytes(), &long[..]);

        // Short names are NUL-padded and come back trimmed.
        de.set_name(FileName::new(b"hi"));
        assert_eq!(de.name().as_bytes(), b"hi");
    }
}
