//! Errors surfaced to callers.
//!
//! Only expected conditions appear here. Broken invariants (double-free of a
//! block, a log write outside a transaction, running out of cache slots)
//! indicate that a design bound was exceeded or a caller broke a contract;
//! those panic instead, since continuing would propagate corruption.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("path component not found")]
    NotFound,

    #[error("not a directory")]
    NotADir,

    #[error("is a directory")]
    IsDir,

    #[error("name already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("invalid path")]
    InvalidPath,

    #[error("link crosses devices")]
    CrossDevice,

    #[error("offset out of range")]
    OutOfRange,

    #[error("no device registered for major number {0}")]
    NoDevice(u16),

    #[error("invalid superblock")]
    InvalidSuperblock,

    #[error("image too small for the requested geometry")]
    InvalidGeometry,
}

pub type Result<T> = core::result::Result<T, Error>;
