use super::inode::InodeType;

/// Snapshot of an inode's metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    /// Device the inode lives on.
    pub dev: u32,

    /// Inode number.
    pub ino: u32,

    /// Type of file.
    pub typ: InodeType,

    /// Number of links to the file.
    pub nlink: i16,

    /// Size of the file in bytes.
    pub size: u32,
}
