//! Pathnames.
//!
//! Resolution walks one component at a time, holding at most one inode lock
//! so lookups in different directories can proceed in parallel and lock
//! order cycles across arbitrary directory trees are impossible. References
//! (not locks) carry the walk from one component to the next.

use std::cmp;

use super::inode::{InodeType, RcInode, DIRSIZ};
use super::{Tx, ROOTINO};
use crate::error::{Error, Result};
use crate::param::ROOTDEV;

/// A file name of at most `DIRSIZ` bytes.
///
/// Longer inputs are silently truncated to their first `DIRSIZ` bytes. That
/// matches what a directory can store, and makes an over-long component
/// compare equal to its stored prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileName<'s> {
    bytes: &'s [u8],
}

impl<'s> FileName<'s> {
    pub fn new(bytes: &'s [u8]) -> Self {
        Self {
            bytes: &bytes[..cmp::min(DIRSIZ, bytes.len())],
        }
    }

    pub fn as_bytes(&self) -> &'s [u8] {
        self.bytes
    }
}

/// A borrowed, slash-separated path.
#[derive(Clone, Copy)]
pub struct Path<'s> {
    inner: &'s [u8],
}

impl<'s> Path<'s> {
    pub fn new(path: &'s str) -> Self {
        Self {
            inner: path.as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &'s [u8] {
        self.inner
    }

    /// Does the path start at the root directory?
    pub fn is_absolute(&self) -> bool {
        !self.inner.is_empty() && self.inner[0] == b'/'
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Split off the first path element.
    ///
    /// Returns `Some((rest, name))` where `name` is the next component and
    /// `rest` is the remainder with leading slashes removed, so the caller
    /// can check `rest.is_empty()` to see whether `name` is the last one.
    /// Returns `None` if no component remains.
    ///
    /// Examples:
    ///   skipelem("a/bb/c")  == Some(("bb/c", "a"))
    ///   skipelem("///a//bb") == Some(("bb", "a"))
    ///   skipelem("a")       == Some(("", "a"))
    ///   skipelem("")        == None
    ///   skipelem("////")    == None
    pub(crate) fn skipelem(self) -> Option<(Path<'s>, FileName<'s>)> {
        let mut bytes = self.inner;

        let name_start = bytes.iter().position(|&ch| ch != b'/')?;
        bytes = &bytes[name_start..];

        let len = bytes
            .iter()
            .position(|&ch| ch == b'/')
            .unwrap_or(bytes.len());
        let name = FileName::new(&bytes[..len]);

        bytes = &bytes[len..];
        let rest_start = bytes
            .iter()
            .position(|&ch| ch != b'/')
            .unwrap_or(bytes.len());
        Some((
            Path {
                inner: &bytes[rest_start..],
            },
            name,
        ))
    }
}

impl<'s> Tx<'s> {
    /// Resolve `path` to an inode reference. Relative paths start at `cwd`.
    pub fn namei(&self, path: Path<'_>, cwd: &RcInode<'s>) -> Result<RcInode<'s>> {
        Ok(self.namex(path, false, cwd)?.0)
    }

    /// Resolve `path` to its parent directory, also returning the final
    /// component. Fails on paths with no component, such as "/".
    pub fn nameiparent<'p>(
        &self,
        path: Path<'p>,
        cwd: &RcInode<'s>,
    ) -> Result<(RcInode<'s>, FileName<'p>)> {
        let (ip, name) = self.namex(path, true, cwd)?;
        match name {
            Some(name) => Ok((ip, name)),
            None => {
                ip.put(self);
                Err(Error::InvalidPath)
            }
        }
    }

    /// Walk the path. With `parent` set, stop one level early and hand back
    /// the last component. At most one inode is locked at a time.
    fn namex<'p>(
        &self,
        mut path: Path<'p>,
        parent: bool,
        cwd: &RcInode<'s>,
    ) -> Result<(RcInode<'s>, Option<FileName<'p>>)> {
        let mut ptr = if path.is_absolute() {
            self.fs.iget(ROOTDEV, ROOTINO)
        } else {
            cwd.clone()
        };

        while let Some((rest, name)) = path.skipelem() {
            path = rest;

            let mut ip = ptr.lock();
            if ip.deref_inner().typ != InodeType::Dir {
                drop(ip);
                ptr.put(self);
                return Err(Error::NotADir);
            }
            if parent && path.is_empty() {
                // Stop one level early.
                drop(ip);
                return Ok((ptr, Some(name)));
            }
            let next = ip.dirlookup(name);
            drop(ip);
            ptr.put(self);
            ptr = next?.0;
        }
        if parent {
            // The path ran out before yielding a final component.
            ptr.put(self);
            return Err(Error::InvalidPath);
        }
        Ok((ptr, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_fs;
    use crate::fs::InodeType;

    fn skip(path: &str) -> Option<(&[u8], &[u8])> {
        Path::new(path)
            .skipelem()
            .map(|(rest, name)| (rest.as_bytes(), name.as_bytes()))
    }

    #[test]
    fn skipelem_splits_components() {
        assert_eq!(skip("a/bb/c"), Some((&b"bb/c"[..], &b"a"[..])));
        assert_eq!(skip("///a//bb"), Some((&b"bb"[..], &b"a"[..])));
        assert_eq!(skip("a"), Some((&b""[..], &b"a"[..])));
        assert_eq!(skip("a///"), Some((&b""[..], &b"a"[..])));
        assert_eq!(skip(""), None);
        assert_eq!(skip("////"), None);
    }

    #[test]
    fn over_long_components_alias_their_prefix() {
        // A component of exactly DIRSIZ bytes survives whole; anything
        // longer collapses onto its first DIRSIZ bytes.
        let exact = "abcdefghijklmn";
        assert_eq!(exact.len(), DIRSIZ);
        assert_eq!(FileName::new(exact.as_bytes()).as_bytes(), exact.as_bytes());
        assert_eq!(
            FileName::new(b"abcdefghijklmnopq").as_bytes(),
            exact.as_bytes()
        );
        assert_eq!(
            FileName::new(b"abcdefghijklmnopq"),
            FileName::new(exact.as_bytes())
        );
    }

    #[test]
    fn namei_resolves_the_root() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let root = fs.root();
        let ip = tx.namei(Path::new("/"), &root).unwrap();
        assert_eq!(ip.inum, ROOTINO);
        ip.put(&tx);
        root.put(&tx);
        drop(tx);
    }

    #[test]
    fn namei_walks_and_reports_missing_components() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let root = fs.root();
        let dir = tx.create(Path::new("/d"), InodeType::Dir, &root).unwrap();
        let file = tx
            .create(Path::new("/d/f"), InodeType::File, &root)
            .unwrap();

        let found = tx.namei(Path::new("/d/f"), &root).unwrap();
        assert_eq!(found.inum, file.inum);
        found.put(&tx);

        // Relative resolution starts at cwd.
        let found = tx.namei(Path::new("f"), &dir).unwrap();
        assert_eq!(found.inum, file.inum);
        found.put(&tx);

        assert_eq!(
            tx.namei(Path::new("/d/missing"), &root).unwrap_err(),
            Error::NotFound
        );
        // A file in the middle of a path is not a directory.
        assert_eq!(
            tx.namei(Path::new("/d/f/g"), &root).unwrap_err(),
            Error::NotADir
        );

        file.put(&tx);
        dir.put(&tx);
        root.put(&tx);
        drop(tx);
    }

    #[test]
    fn nameiparent_stops_one_level_early() {
        let (_disk, fs) = test_fs();
        let tx = fs.begin_transaction();
        let root = fs.root();
        let dir = tx.create(Path::new("/sub"), InodeType::Dir, &root).unwrap();

        let (parent, name) = tx.nameiparent(Path::new("/sub/leaf"), &root).unwrap();
        assert_eq!(parent.inum, dir.inum);
        assert_eq!(name.as_bytes(), b"leaf");
        parent.put(&tx);

        // "/" has no final component to name.
        assert_eq!(
            tx.nameiparent(Path::new("/"), &root).unwrap_err(),
            Error::InvalidPath
        );

        dir.put(&tx);
        root.put(&tx);
        drop(tx);
    }
}
