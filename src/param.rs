//! Compile-time tuning parameters.

/// Maximum number of in-memory inodes.
pub const NINODE: usize = 50;

/// Maximum major device number.
pub const NDEV: usize = 10;

/// Device number of the file system root disk.
pub const ROOTDEV: u32 = 1;

/// Block size.
pub const BSIZE: usize = 512;

/// Max # of blocks any FS op writes.
pub const MAXOPBLOCKS: usize = 10;

/// Max data blocks in on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Size of disk block cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;
