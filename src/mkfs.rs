//! Build an empty filesystem on a block device.
//!
//! The formatter writes the disk directly, without the cache or the log;
//! it runs before the filesystem is ever mounted, so there is nothing to
//! crash-protect. Layout, front to back: boot block, superblock, inode
//! blocks, allocation bitmap, data blocks, and the log region at the tail.
//! The root directory (inode 1) is created holding "." and "..".

use std::mem;

use ::log::info;
use zerocopy::{AsBytes, LayoutVerified};

use crate::bio::BufData;
use crate::block_dev::BlockDevice;
use crate::error::{Error, Result};
use crate::fs::inode::{Dinode, Dirent, T_DIR};
use crate::fs::superblock::{Superblock, BPB, IPB};
use crate::fs::{FileName, DIRENT_SIZE, ROOTINO};
use crate::param::LOGSIZE;

/// Geometry of the image to build.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Total size in blocks.
    pub size: u32,
    /// Number of inodes.
    pub ninodes: u32,
    /// Length of the log region, header included.
    pub nlog: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: 1000,
            ninodes: 200,
            nlog: LOGSIZE as u32 + 1,
        }
    }
}

/// Format `disk` and return the superblock that was written.
pub fn mkfs(disk: &dyn BlockDevice, config: Config) -> Result<Superblock> {
    let Config {
        size,
        ninodes,
        nlog,
    } = config;

    let ninodeblocks = ninodes / IPB as u32 + 1;
    let nbitmap = size / BPB + 1;
    let nmeta = 2 + ninodeblocks + nbitmap;
    // At least one data block must fit between the metadata and the log.
    if size > disk.size() || ninodes < 2 || nlog < 2 || nmeta + nlog >= size {
        return Err(Error::InvalidGeometry);
    }
    let nblocks = size - nmeta - nlog;

    let sb = Superblock {
        size,
        nblocks,
        ninodes,
        nlog,
    };
    info!(
        "mkfs: {} meta blocks (2 boot+super, {} inode, {} bitmap), {} data, {} log",
        nmeta, ninodeblocks, nbitmap, nblocks, nlog
    );

    let zero = BufData::new();
    for b in 0..size {
        disk.write_block(b, &zero);
    }

    let mut buf = BufData::new();
    buf[..mem::size_of::<Superblock>()].copy_from_slice(sb.as_bytes());
    disk.write_block(1, &buf);

    // Root directory: inode 1, one data block holding "." and "..".
    let rootblk = nmeta;
    let mut root = Dinode::default();
    root.typ = T_DIR;
    root.nlink = 1;
    root.size = (2 * DIRENT_SIZE) as u32;
    root.addr_direct[0] = rootblk;
    write_dinode(disk, &sb, ROOTINO, &root);

    let mut buf = BufData::new();
    let mut de = Dirent::default();
    de.inum = ROOTINO as u16;
    de.set_name(FileName::new(b"."));
    buf[..DIRENT_SIZE].copy_from_slice(de.as_bytes());
    de.set_name(FileName::new(b".."));
    buf[DIRENT_SIZE..2 * DIRENT_SIZE].copy_from_slice(de.as_bytes());
    disk.write_block(rootblk, &buf);

    // Mark the metadata, the root block and the log region allocated, so the
    // bitmap scan can only ever hand out data blocks.
    for b in 0..=rootblk {
        set_bit(disk, &sb, b);
    }
    for b in sb.logstart()..size {
        set_bit(disk, &sb, b);
    }

    Ok(sb)
}

fn write_dinode(disk: &dyn BlockDevice, sb: &Superblock, inum: u32, dinode: &Dinode) {
    let bno = sb.iblock(inum);
    let mut buf = BufData::new();
    disk.read_block(bno, &mut buf);
    let mut dinodes = LayoutVerified::<_, [Dinode]>::new_slice(&mut buf[..])
        .expect("mkfs: bad inode block layout");
    dinodes[inum as usize % IPB] = *dinode;
    disk.write_block(bno, &buf);
}

fn set_bit(disk: &dyn BlockDevice, sb: &Superblock, b: u32) {
    let bno = sb.bblock(b);
    let mut buf = BufData::new();
    disk.read_block(bno, &mut buf);
    let bi = b % BPB;
    buf[bi as usize / 8] |= 1 << (bi % 8);
    disk.write_block(bno, &buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemDisk;
    use crate::param::BSIZE;

    #[test]
    fn geometry_must_fit_the_disk() {
        let disk = MemDisk::new(16);
        // Bigger than the device.
        assert_eq!(
            mkfs(&disk, Config::default()).unwrap_err(),
            Error::InvalidGeometry
        );
        // No room for data blocks.
        assert_eq!(
            mkfs(
                &disk,
                Config {
                    size: 16,
                    ninodes: 8,
                    nlog: 12,
                }
            )
            .unwrap_err(),
            Error::InvalidGeometry
        );
    }

    #[test]
    fn a_fresh_image_has_exactly_the_root() {
        let disk = MemDisk::new(1000);
        let sb = mkfs(&disk, Config::default()).unwrap();
        assert_eq!(sb.size, 1000);
        assert_eq!(sb.logstart(), 1000 - sb.nlog);

        // Root dinode: a directory of two entries; every other inode free.
        let mut buf = BufData::new();
        disk.read_block(sb.iblock(ROOTINO), &mut buf);
        let dinodes = LayoutVerified::<_, [Dinode]>::new_slice(&buf[..]).unwrap();
        assert_eq!(dinodes[ROOTINO as usize % IPB].typ, T_DIR);
        assert_eq!(
            dinodes[ROOTINO as usize % IPB].size,
            2 * DIRENT_SIZE as u32
        );
        assert_eq!(dinodes[0].typ, 0);
        assert_eq!(dinodes[2].typ, 0);

        // The root block holds "." and "..", both naming inode 1.
        let rootblk = dinodes[ROOTINO as usize % IPB].addr_direct[0];
        disk.read_block(rootblk, &mut buf);
        let dirents = LayoutVerified::<_, [Dirent]>::new_slice(&buf[..]).unwrap();
        assert_eq!(dirents[0].inum, ROOTINO as u16);
        assert_eq!(dirents[0].name().as_bytes(), b".");
        assert_eq!(dirents[1].inum, ROOTINO as u16);
        assert_eq!(dirents[1].name().as_bytes(), b"..");
        assert_eq!(dirents[2].inum, 0);

        // Metadata and log marked allocated; the first free bit is the block
        // right after the root data block.
        let bit = |b: u32| {
            let mut buf = BufData::new();
            disk.read_block(sb.bblock(b), &mut buf);
            buf[(b % BPB) as usize / 8] & (1 << (b % 8)) != 0
        };
        assert!(bit(0));
        assert!(bit(rootblk));
        assert!(!bit(rootblk + 1));
        assert!(bit(sb.logstart()));
        assert!(bit(sb.size - 1));

        // The log header block is zero: no committed transaction.
        disk.read_block(sb.logstart(), &mut buf);
        assert_eq!(&buf[..BSIZE], &[0u8; BSIZE]);
    }
}
