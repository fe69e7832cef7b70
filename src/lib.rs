//! rufs: the classic Unix v6-family filesystem as a user-space crate.
//!
//! A layered, crash-safe, concurrent filesystem over a pluggable block
//! device, leaves first:
//!
//!   + [`block_dev`]: sector-sized reads and writes (in-memory or file
//!     backed).
//!   + [`bio`]: a read-through buffer cache with per-block locks.
//!   + [`fs`]: the filesystem proper; a write-ahead redo log with group
//!     commit, a bitmap block allocator, the inode layer with a fixed
//!     in-memory table, directories, and pathname resolution.
//!   + [`dev`]: the device switch for character device inodes.
//!   + [`mkfs`]: the formatter.
//!
//! All writes go through a transaction handle ([`fs::Tx`]): the updates of
//! the operations sharing a commit become durable atomically, and mounting
//! after a crash replays any committed group before anything else runs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rufs::block_dev::MemDisk;
//! use rufs::fs::{FileSystem, InodeType, Path};
//!
//! let disk = MemDisk::new(1000);
//! rufs::mkfs::mkfs(&disk, rufs::mkfs::Config::default()).unwrap();
//! let fs = FileSystem::mount(Arc::new(disk)).unwrap();
//!
//! let tx = fs.begin_transaction();
//! let root = fs.root();
//! let file = tx.create(Path::new("/hello"), InodeType::File, &root).unwrap();
//! let mut guard = file.lock();
//! guard.write_bytes(b"hello, disk", 0, &tx).unwrap();
//! drop(guard);
//! file.put(&tx);
//! root.put(&tx);
//! drop(tx); // commit
//! ```

#![warn(rust_2018_idioms)]

pub mod bio;
pub mod block_dev;
pub mod dev;
mod error;
pub mod fs;
pub mod lock;
pub mod mkfs;
pub mod param;

pub use error::{Error, Result};
