//! The superblock describes the disk layout.

use std::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use super::inode::Dinode;
use crate::bio::Buf;
use crate::error::{Error, Result};
use crate::param::{BSIZE, LOGSIZE};

/// Disk layout:
/// [ boot block | super block | inode blocks | free bit map | data blocks | log ]
///
/// mkfs computes the super block and builds an initial file system.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
pub struct Superblock {
    /// Size of file system image (blocks)
    pub size: u32,

    /// Number of data blocks
    pub nblocks: u32,

    /// Number of inodes
    pub ninodes: u32,

    /// Number of log blocks
    pub nlog: u32,
}

/// Inodes per block.
pub const IPB: usize = BSIZE / mem::size_of::<Dinode>();

/// Bitmap bits per block.
pub const BPB: u32 = (BSIZE * 8) as u32;

const_assert!(mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    /// Read and sanity-check the super block.
    pub fn new(buf: &Buf<'_>) -> Result<Self> {
        let sb = *LayoutVerified::<_, Superblock>::new_from_prefix(&buf.data()[..])
            .expect("superblock: bad layout")
            .0;
        // There is no magic number; the geometry itself must make sense. The
        // in-memory header caps a transaction at LOGSIZE blocks, so the
        // on-disk log region must offer at least that many payload slots.
        if sb.size == 0
            || sb.ninodes == 0
            || (sb.nlog as usize) < LOGSIZE + 1
            || sb.size <= sb.nlog
        {
            return Err(Error::InvalidSuperblock);
        }
        Ok(sb)
    }

    /// Block containing inode `i`. Inodes start right after the superblock.
    pub const fn iblock(&self, i: u32) -> u32 {
        i / IPB as u32 + 2
    }

    /// Block of free map containing the bit for block `b`.
    pub const fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.ninodes / IPB as u32 + 3
    }

    /// First block of the log region (its header), at the disk tail.
    pub const fn logstart(&self) -> u32 {
        self.size - self.nlog
    }
}
