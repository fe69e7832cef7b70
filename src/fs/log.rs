//! Simple logging that allows concurrent FS operations.
//!
//! A log transaction contains the updates of multiple FS operations. The
//! logging system only commits when there are no FS operations active. Thus
//! there is never any reasoning required about whether a commit might write
//! an uncommitted operation's updates to disk.
//!
//! An operation should call `begin_op()`/`end_op()` to mark its start and
//! end; [`super::FileSystem::begin_transaction`] wraps the pair in a handle.
//! Usually `begin_op()` just increments the count of in-progress operations
//! and returns. But if it thinks the log is close to running out, it sleeps
//! until the last outstanding `end_op()` commits.
//!
//! The log is a physical re-do log containing disk blocks. The on-disk log
//! format:
//!   header block, containing block #s for block A, B, C, ...
//!   block A
//!   block B
//!   block C
//!   ...
//! Log appends are synchronous.

use std::mem;

use ::log::debug;
use arrayvec::ArrayVec;
use itertools::izip;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use crate::bio::{Bcache, Buf};
use crate::lock::SleepableLock;
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};

pub struct Log {
    dev: u32,
    start: u32,
    size: u32,

    /// How many FS operations are executing?
    outstanding: u32,

    /// In commit(), please wait.
    committing: bool,

    /// Home block numbers of the current transaction, in log slot order;
    /// the in-memory copy of the header block.
    lh: ArrayVec<u32, LOGSIZE>,
}

/// Contents of the header block, used for the on-disk header block.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

// The header must fit in a single block: writing it is the commit point.
const_assert!(mem::size_of::<LogHeader>() <= BSIZE);

impl Log {
    /// Set up the log over `size` blocks starting at block `start`, and
    /// recover any committed transaction left behind by a crash. Runs before
    /// any other filesystem operation.
    pub fn new(dev: u32, start: u32, size: u32, bcache: &Bcache) -> Self {
        let mut log = Self {
            dev,
            start,
            size,
            outstanding: 0,
            committing: false,
            lh: ArrayVec::new(),
        };
        log.recover(bcache);
        log
    }

    fn recover(&mut self, bcache: &Bcache) {
        self.read_head(bcache);
        if !self.lh.is_empty() {
            debug!("log: recovering {} blocks", self.lh.len());
        }
        // If committed, copy from log to disk.
        Self::install_trans(bcache, self.dev, self.start, &self.lh, true);
        self.lh.clear();
        // Clear the log.
        Self::write_head(bcache, self.dev, self.start, &self.lh);
    }

    /// Read the log header from disk into the in-memory log header.
    fn read_head(&mut self, bcache: &Bcache) {
        let buf = bcache.read(self.dev, self.start);
        let lh = LayoutVerified::<_, LogHeader>::new_from_prefix(&buf.data()[..])
            .expect("log: bad header layout")
            .0;
        for &b in &lh.block[..lh.n as usize] {
            self.lh.push(b);
        }
    }

    /// Write the in-memory header to disk. When `blocks` is non-empty this is
    /// the true point at which the current transaction commits.
    fn write_head(bcache: &Bcache, dev: u32, start: u32, blocks: &[u32]) {
        let mut buf = bcache.read(dev, start);
        let (mut lh, _) = LayoutVerified::<_, LogHeader>::new_from_prefix(&mut buf.data_mut()[..])
            .expect("log: bad header layout");
        lh.n = blocks.len() as u32;
        for (dst, b) in izip!(&mut lh.block, blocks) {
            *dst = *b;
        }
        bcache.write(&buf);
    }

    /// Copy modified blocks from the cache into the log region.
    fn write_log(bcache: &Bcache, dev: u32, start: u32, blocks: &[u32]) {
        for (tail, &blockno) in blocks.iter().enumerate() {
            // Cache block.
            let from = bcache.read(dev, blockno);
            // Log block.
            let mut to = bcache.read(dev, start + tail as u32 + 1);
            to.data_mut().copy_from(from.data());
            bcache.write(&to);
        }
    }

    /// Copy committed blocks from the log to their home locations.
    fn install_trans(bcache: &Bcache, dev: u32, start: u32, blocks: &[u32], recovering: bool) {
        for (tail, &blockno) in blocks.iter().enumerate() {
            // Read log block.
            let lbuf = bcache.read(dev, start + tail as u32 + 1);
            // Read dst.
            let mut dbuf = bcache.read(dev, blockno);
            // Copy block to dst.
            dbuf.data_mut().copy_from(lbuf.data());
            // Write dst to disk.
            bcache.write(&dbuf);
            drop(dbuf);
            if !recovering {
                bcache.unpin(dev, blockno);
            }
        }
    }

    fn commit(bcache: &Bcache, dev: u32, start: u32, blocks: &[u32]) {
        if !blocks.is_empty() {
            debug!("log: committing {} blocks", blocks.len());
            // Write modified blocks from cache to log.
            Self::write_log(bcache, dev, start, blocks);
            // Write header to disk -- the real commit.
            Self::write_head(bcache, dev, start, blocks);
            // Now install writes to home locations.
            Self::install_trans(bcache, dev, start, blocks, false);
            // Erase the transaction from the log.
            Self::write_head(bcache, dev, start, &[]);
        }
    }

    /// Record that `b` must go to its home location at commit, and pin it in
    /// the cache until then. Does not write the disk.
    ///
    /// This replaces a direct `Bcache::write`; a typical use is:
    ///   bp = bcache.read(...)
    ///   modify bp.data_mut()
    ///   log.write(bp)
    pub fn write(&mut self, b: Buf<'_>) {
        assert!(
            self.lh.len() < LOGSIZE && (self.lh.len() as u32) < self.size - 1,
            "too big a transaction"
        );
        assert!(self.outstanding >= 1, "write outside of trans");

        if self.lh.iter().all(|&blockno| blockno != b.blockno) {
            // Add new block to log.
            b.pin();
            self.lh.push(b.blockno);
        }
        // Otherwise the block is already logged: log absorption. The commit
        // will pick up whatever the cache holds by then.
    }
}

impl SleepableLock<Log> {
    /// Called at the start of each FS operation.
    pub fn begin_op(&self) {
        let mut guard = self.lock();
        loop {
            if guard.committing ||
                // This op might exhaust log space; wait for commit.
                guard.lh.len() + (guard.outstanding as usize + 1) * MAXOPBLOCKS > LOGSIZE
            {
                guard.sleep();
            } else {
                guard.outstanding += 1;
                break;
            }
        }
    }

    /// Called at the end of each FS operation.
    /// Commits if this was the last outstanding operation.
    pub fn end_op(&self, bcache: &Bcache) {
        let mut guard = self.lock();
        guard.outstanding -= 1;
        assert!(!guard.committing, "nested commit");

        if guard.outstanding == 0 {
            // No operation is in flight, and while `committing` is set none
            // can start: the logged blocks are ours alone to install.
            guard.committing = true;
            let blocks = mem::take(&mut guard.lh);
            let (dev, start) = (guard.dev, guard.start);
            // Commit without holding the lock, since it does block I/O.
            guard.reacquire_after(|| Log::commit(bcache, dev, start, &blocks));
            guard.committing = false;
        }

        // begin_op() may be waiting for log space: either `outstanding` or
        // the `committing` flag just went down.
        guard.wakeup();
    }
}
