//! File system implementation. Five layers:
//!   + Blocks: allocator for raw disk blocks.
//!   + Log: crash recovery for multi-step updates.
//!   + Files: inode allocator, reading, writing, metadata.
//!   + Directories: inode with special contents (list of other inodes!)
//!   + Names: paths like /usr/alice/notes.txt for convenient naming.
//!
//! Every operation that modifies the disk runs inside a [`Tx`], obtained
//! from [`FileSystem::begin_transaction`]. The handle is the written proof
//! that `begin_op` has run; all block-modifying calls take it, so a write
//! outside a transaction does not typecheck. Dropping the handle is
//! `end_op`: the enclosing group of operations commits when the last one
//! ends.

use std::mem;
use std::sync::Arc;

use ::log::debug;
use num_iter::range_step;
use scopeguard::{guard, ScopeGuard};

use crate::bio::{Bcache, Buf};
use crate::block_dev::BlockDevice;
use crate::dev::DevSw;
use crate::error::{Error, Result};
use crate::lock::SleepableLock;
use crate::param::{BSIZE, ROOTDEV};

pub(crate) mod inode;
mod log;
mod path;
mod stat;
pub(crate) mod superblock;

pub use inode::{Dirent, InodeGuard, InodeInner, InodeType, Itable, RcInode, DIRENT_SIZE, DIRSIZ};
pub use path::{FileName, Path};
pub use stat::Stat;
pub use superblock::{Superblock, BPB, IPB};

use self::log::Log;

/// Root inode number ("/" on the root device).
pub const ROOTINO: u32 = 1;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / mem::size_of::<u32>();
/// Upper bound on file size, in blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// A mounted filesystem: superblock, buffer cache, log, inode table and
/// device switch over one block device.
pub struct FileSystem {
    pub(crate) superblock: Superblock,
    pub(crate) bcache: Bcache,
    pub(crate) log: SleepableLock<Log>,
    pub(crate) itable: Itable,
    /// Character device drivers for device inodes.
    pub devsw: DevSw,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("superblock", &self.superblock)
            .finish_non_exhaustive()
    }
}

impl FileSystem {
    /// Mount the filesystem on `disk`: read and validate the superblock,
    /// then recover any transaction a crash left committed in the log.
    /// Recovery finishes before this returns, so clients never observe a
    /// half-applied transaction.
    pub fn mount(disk: Arc<dyn BlockDevice>) -> Result<Self> {
        let bcache = Bcache::new(disk);
        let superblock = {
            let buf = bcache.read(ROOTDEV, 1);
            Superblock::new(&buf)?
        };
        debug!(
            "fs: mounting, size={} nblocks={} ninodes={} nlog={}",
            superblock.size, superblock.nblocks, superblock.ninodes, superblock.nlog
        );
        let log = SleepableLock::new(
            "log",
            Log::new(ROOTDEV, superblock.logstart(), superblock.nlog, &bcache),
        );
        Ok(Self {
            superblock,
            bcache,
            log,
            itable: Itable::new(),
            devsw: DevSw::new(),
        })
    }

    /// Called for each FS operation; every block-modifying API needs the
    /// returned handle. Blocks while the log is committing or short on
    /// space.
    pub fn begin_transaction(&self) -> Tx<'_> {
        self.log.begin_op();
        Tx { fs: self }
    }

    /// A reference to the root directory.
    pub fn root(&self) -> RcInode<'_> {
        self.iget(ROOTDEV, ROOTINO)
    }

    /// The mounted superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }
}

/// A handle on a running transaction. Dropping it ends the operation and
/// commits the enclosing group once no operation remains outstanding.
pub struct Tx<'s> {
    pub(crate) fs: &'s FileSystem,
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        // Commits if this was the last outstanding operation.
        self.fs.log.end_op(&self.fs.bcache);
    }
}

impl<'s> Tx<'s> {
    /// Record a modified buffer for this transaction; the commit will write
    /// it to its home location. A typical use is:
    ///   let mut bp = fs.bcache.read(dev, bno);
    ///   ... modify bp.data_mut() ...
    ///   tx.write(bp);
    pub fn write(&self, b: Buf<'_>) {
        self.fs.log.lock().write(b);
    }

    /// Zero a block.
    fn bzero(&self, dev: u32, bno: u32) {
        let buf = self.fs.bcache.get_zeroed(dev, bno);
        self.write(buf);
    }

    /// Allocate a zeroed disk block.
    pub(crate) fn balloc(&self, dev: u32) -> u32 {
        let fs = self.fs;
        for b in range_step(0, fs.superblock.size, BPB) {
            let mut bp = fs.bcache.read(dev, fs.superblock.bblock(b));
            for bi in 0..BPB.min(fs.superblock.size - b) {
                let m = 1u8 << (bi % 8);
                if bp.data()[(bi / 8) as usize] & m == 0 {
                    // Is block free?
                    bp.data_mut()[(bi / 8) as usize] |= m; // Mark block in use.
                    self.write(bp);
                    self.bzero(dev, b + bi);
                    return b + bi;
                }
            }
        }
        panic!("balloc: out of blocks");
    }

    /// Free a disk block.
    pub(crate) fn bfree(&self, dev: u32, b: u32) {
        let fs = self.fs;
        let mut bp = fs.bcache.read(dev, fs.superblock.bblock(b));
        let bi = b % BPB;
        let m = 1u8 << (bi % 8);
        assert!(
            bp.data()[(bi / 8) as usize] & m != 0,
            "freeing free block"
        );
        bp.data_mut()[(bi / 8) as usize] &= !m;
        self.write(bp);
    }
}

// Higher-level operations, composed from the core the way the system call
// layer does.
impl<'s> Tx<'s> {
    /// Create an inode of the given type at `path`. Directories are born
    /// with "." and ".." entries. Creating a file over an existing file (or
    /// device) returns the existing inode instead.
    pub fn create(
        &self,
        path: Path<'_>,
        typ: InodeType,
        cwd: &RcInode<'s>,
    ) -> Result<RcInode<'s>> {
        let (dp, name) = self.nameiparent(path, cwd)?;
        let dp = guard(dp, |dp| dp.put(self));
        let mut dpg = dp.lock();

        if let Ok((existing, _)) = dpg.dirlookup(name) {
            drop(dpg);
            let existing = guard(existing, |ip| ip.put(self));
            if typ != InodeType::File {
                return Err(Error::AlreadyExists);
            }
            let eg = existing.lock();
            match eg.deref_inner().typ {
                InodeType::File | InodeType::Device { .. } => {
                    drop(eg);
                    return Ok(ScopeGuard::into_inner(existing));
                }
                _ => return Err(Error::AlreadyExists),
            }
        }

        let ip = self.ialloc(dpg.dev, typ);
        let mut ipg = ip.lock();
        ipg.deref_inner_mut().nlink = 1;
        ipg.update(self);

        // Create . and .. entries.
        if typ == InodeType::Dir {
            // for ".."
            dpg.deref_inner_mut().nlink += 1;
            dpg.update(self);

            let inum = ipg.inum;
            // No nlink++ for ".": avoid cyclic ref count.
            ipg.dirlink(FileName::new(b"."), inum, self)
                .and_then(|_| ipg.dirlink(FileName::new(b".."), dpg.inum, self))
                .expect("create dots");
        }

        dpg.dirlink(name, ipg.inum, self).expect("create: dirlink");
        drop(ipg);
        drop(dpg);
        Ok(ip)
    }

    /// Create a hard link at `new` to the inode named by `old`.
    pub fn link(&self, old: Path<'_>, new: Path<'_>, cwd: &RcInode<'s>) -> Result<()> {
        let ip = self.namei(old, cwd)?;
        let ip = guard(ip, |ip| ip.put(self));

        let mut ipg = ip.lock();
        if ipg.deref_inner().typ == InodeType::Dir {
            return Err(Error::IsDir);
        }
        ipg.deref_inner_mut().nlink += 1;
        ipg.update(self);
        drop(ipg);

        let linked = self.nameiparent(new, cwd).and_then(|(dp, name)| {
            let dp = guard(dp, |dp| dp.put(self));
            let mut dpg = dp.lock();
            if dpg.dev != ip.dev {
                return Err(Error::CrossDevice);
            }
            dpg.dirlink(name, ip.inum, self)
        });

        if linked.is_err() {
            // Undo the optimistic link count bump.
            let mut ipg = ip.lock();
            ipg.deref_inner_mut().nlink -= 1;
            ipg.update(self);
        }
        linked
    }

    /// Remove the directory entry at `path`. The inode itself is freed once
    /// its link and reference counts reach zero.
    pub fn unlink(&self, path: Path<'_>, cwd: &RcInode<'s>) -> Result<()> {
        let (dp, name) = self.nameiparent(path, cwd)?;
        let dp = guard(dp, |dp| dp.put(self));
        let mut dpg = dp.lock();

        // Cannot unlink "." or "..".
        if name.as_bytes() == b"." || name.as_bytes() == b".." {
            return Err(Error::InvalidPath);
        }

        let (ip, off) = dpg.dirlookup(name)?;
        let ip = guard(ip, |ip| ip.put(self));
        let mut ipg = ip.lock();
        assert!(ipg.deref_inner().nlink >= 1, "unlink: nlink < 1");

        if ipg.deref_inner().typ == InodeType::Dir && !ipg.is_dir_empty() {
            return Err(Error::NotEmpty);
        }

        dpg.write_obj(&Dirent::default(), off, self)
            .expect("unlink: write");
        if ipg.deref_inner().typ == InodeType::Dir {
            // The child's ".." no longer refers to the parent.
            dpg.deref_inner_mut().nlink -= 1;
            dpg.update(self);
        }
        drop(dpg);
        drop(dp);

        ipg.deref_inner_mut().nlink -= 1;
        ipg.update(self);
        drop(ipg);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_fs() -> (crate::block_dev::MemDisk, FileSystem) {
    let disk = crate::block_dev::MemDisk::new(1000);
    crate::mkfs::mkfs(&disk, crate::mkfs::Config::default()).unwrap();
    let fs = FileSystem::mount(Arc::new(disk.clone())).unwrap();
    (disk, fs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::LOGSIZE;

    #[test]
    fn balloc_and_bfree_flip_bitmap_bits() {
        let (disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let a = tx.balloc(ROOTDEV);
        let b = tx.balloc(ROOTDEV);
        assert_ne!(a, b);
        // Fresh blocks come zeroed and live in the data region.
        assert!(a >= fs.superblock.bblock(fs.superblock.size - 1) + 1);
        assert!(a < fs.superblock.logstart());
        tx.bfree(ROOTDEV, a);
        drop(tx);

        // A freed block is handed out again.
        let tx = fs.begin_transaction();
        assert_eq!(tx.balloc(ROOTDEV), a);
        drop(tx);
        drop(fs);
        drop(disk);
    }

    #[test]
    #[should_panic(expected = "freeing free block")]
    fn double_free_is_fatal() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let a = tx.balloc(ROOTDEV);
        tx.bfree(ROOTDEV, a);
        tx.bfree(ROOTDEV, a);
    }

    #[test]
    fn mount_rejects_a_bad_superblock() {
        let disk = crate::block_dev::MemDisk::new(64);
        // An all-zero image has no plausible geometry.
        assert_eq!(
            FileSystem::mount(Arc::new(disk.clone())).unwrap_err(),
            Error::InvalidSuperblock
        );

        // A log region smaller than a full transaction is also refused.
        crate::mkfs::mkfs(
            &disk,
            crate::mkfs::Config {
                size: 64,
                ninodes: 8,
                nlog: LOGSIZE as u32,
            },
        )
        .unwrap();
        assert_eq!(
            FileSystem::mount(Arc::new(disk)).unwrap_err(),
            Error::InvalidSuperblock
        );
    }
}
