//! Open-handle abstraction and the inode-backed handle kinds.
//!
//! `Handle` is the single dispatch surface for everything a descriptor can
//! do. Every operation has a default "unsupported" implementation and each
//! concrete kind overrides only what it actually supports, so adding a
//! handle kind never touches the dispatcher.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use crate::abi::{
    Advice, Dirent, Errno, Eventrwflags, Fdflags, Fdstat, Filestat, Filetype, Lookupflags, Oflags,
    Rights, Whence,
};
use crate::path::VirtualPath;
use crate::vfs::{self, DirNode, FileNode, NodeRef};

/// Readiness report from a non-blocking probe: `None` when not ready,
/// otherwise the byte count and flag hints for the event.
pub type Readiness = Option<(u64, Eventrwflags)>;

/// One open resource, addressed by a guest descriptor.
pub trait Handle: Send {
    fn filetype(&self) -> Filetype;

    /// Base and inheriting rights reported by `fd_fdstat_get`.
    fn rights(&self) -> (Rights, Rights);

    fn fdflags(&self) -> Fdflags {
        Fdflags::empty()
    }

    fn set_fdflags(&mut self, _flags: Fdflags) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn fdstat(&self) -> Fdstat {
        let (base, inheriting) = self.rights();
        Fdstat {
            filetype: self.filetype(),
            flags: self.fdflags(),
            rights_base: base,
            rights_inheriting: inheriting,
        }
    }

    fn filestat(&self) -> Result<Filestat, Errno> {
        Ok(Filestat {
            filetype: self.filetype() as u8,
            nlink: 1,
            ..Filestat::default()
        })
    }

    fn set_size(&mut self, _size: u64) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn set_times(&mut self, _atim: Option<u64>, _mtim: Option<u64>) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn pread(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn pwrite(&mut self, _bytes: &[u8], _offset: u64) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64, Errno> {
        Err(Errno::NotSup)
    }

    fn tell(&self) -> Result<u64, Errno> {
        Err(Errno::NotSup)
    }

    /// Everything is in memory; sync is trivially satisfied.
    fn sync(&mut self) -> Result<(), Errno> {
        Ok(())
    }

    fn datasync(&mut self) -> Result<(), Errno> {
        Ok(())
    }

    /// Advisory hint; accepted and ignored.
    fn advise(&mut self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Errno> {
        Ok(())
    }

    fn allocate(&mut self, _offset: u64, _len: u64) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    /// Next directory entry for the given cookie, with its name.
    fn readdir_entry(&self, _cookie: u64) -> Result<Option<(Dirent, String)>, Errno> {
        Err(Errno::NotDir)
    }

    /// Mount name, for pre-opened directories only.
    fn preopen_name(&self) -> Option<&str> {
        None
    }

    /// Backing directory node, for path operations addressed at this fd.
    fn dir_node(&self) -> Option<Arc<DirNode>> {
        None
    }

    /// Open a path relative to this handle.
    fn open_at(
        &self,
        _path: &VirtualPath,
        _lookup: Lookupflags,
        _oflags: Oflags,
        _fdflags: Fdflags,
    ) -> Result<Box<dyn Handle>, Errno> {
        Err(Errno::NotDir)
    }

    /// Non-blocking read-readiness probe. Most handles are always ready.
    fn poll_read(&self) -> Result<Readiness, Errno> {
        Ok(Some((0, Eventrwflags::empty())))
    }

    /// Non-blocking write-readiness probe.
    fn poll_write(&self) -> Result<Readiness, Errno> {
        Ok(Some((0, Eventrwflags::empty())))
    }

    /// Called once when the descriptor is closed.
    fn close(&mut self) -> Result<(), Errno> {
        Ok(())
    }
}

// ─── Regular files ─────────────────────────────────────────────────

/// A cursor-tracking view over a regular file.
pub struct OpenFile {
    node: Arc<FileNode>,
    cursor: u64,
    flags: Fdflags,
}

impl OpenFile {
    pub fn new(node: Arc<FileNode>, truncate: bool, flags: Fdflags) -> Result<Self, Errno> {
        if truncate {
            node.truncate()?;
        }
        Ok(OpenFile {
            node,
            cursor: 0,
            flags,
        })
    }

    pub fn node(&self) -> &Arc<FileNode> {
        &self.node
    }
}

impl Handle for OpenFile {
    fn filetype(&self) -> Filetype {
        Filetype::RegularFile
    }

    fn rights(&self) -> (Rights, Rights) {
        let mut base = Rights::FILE;
        if self.node.readonly() {
            base &= !(Rights::FD_WRITE | Rights::FD_ALLOCATE | Rights::FD_FILESTAT_SET_SIZE);
        }
        (base, Rights::empty())
    }

    fn fdflags(&self) -> Fdflags {
        self.flags
    }

    fn set_fdflags(&mut self, flags: Fdflags) -> Result<(), Errno> {
        self.flags = flags;
        Ok(())
    }

    fn filestat(&self) -> Result<Filestat, Errno> {
        Ok(self.node.filestat())
    }

    fn set_size(&mut self, size: u64) -> Result<(), Errno> {
        self.node.set_size(size)
    }

    fn set_times(&mut self, atim: Option<u64>, mtim: Option<u64>) -> Result<(), Errno> {
        self.node.set_times(atim, mtim);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        let n = self.node.read_at(buf, self.cursor);
        self.cursor += n as u64;
        Ok(n)
    }

    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        Ok(self.node.read_at(buf, offset))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        if self.flags.contains(Fdflags::APPEND) {
            let n = self.node.append(bytes)?;
            self.cursor = self.node.size();
            Ok(n)
        } else {
            let n = self.node.write_at(self.cursor, bytes)?;
            self.cursor += n as u64;
            Ok(n)
        }
    }

    fn pwrite(&mut self, bytes: &[u8], offset: u64) -> Result<usize, Errno> {
        self.node.write_at(offset, bytes)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => self.cursor as i64,
            Whence::End => self.node.size() as i64,
        };
        let target = base.checked_add(offset).ok_or(Errno::Inval)?;
        if target < 0 {
            return Err(Errno::Inval);
        }
        self.cursor = target as u64;
        Ok(self.cursor)
    }

    fn tell(&self) -> Result<u64, Errno> {
        Ok(self.cursor)
    }

    fn allocate(&mut self, offset: u64, len: u64) -> Result<(), Errno> {
        let end = offset.checked_add(len).ok_or(Errno::FBig)?;
        if end > self.node.size() {
            self.node.set_size(end)?;
        }
        Ok(())
    }

    fn poll_read(&self) -> Result<Readiness, Errno> {
        let remaining = self.node.size().saturating_sub(self.cursor);
        Ok(Some((remaining, Eventrwflags::empty())))
    }
}

// ─── Directories ───────────────────────────────────────────────────

/// An enumerating view over a directory.
///
/// Enumeration uses the cookie protocol: `.` and `..` are synthesized at
/// cookies 0 and 1, the directory's own entries follow at cookie 2
/// onward in mapping order.
pub struct OpenDirectory {
    node: Arc<DirNode>,
}

impl OpenDirectory {
    pub fn new(node: Arc<DirNode>) -> Self {
        OpenDirectory { node }
    }
}

impl Handle for OpenDirectory {
    fn filetype(&self) -> Filetype {
        Filetype::Directory
    }

    fn rights(&self) -> (Rights, Rights) {
        (Rights::DIRECTORY, Rights::DIRECTORY.union(Rights::FILE))
    }

    fn filestat(&self) -> Result<Filestat, Errno> {
        Ok(self.node.filestat())
    }

    fn set_times(&mut self, atim: Option<u64>, mtim: Option<u64>) -> Result<(), Errno> {
        self.node.set_times(atim, mtim);
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::IsDir)
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<usize, Errno> {
        Err(Errno::IsDir)
    }

    fn readdir_entry(&self, cookie: u64) -> Result<Option<(Dirent, String)>, Errno> {
        let entry = match cookie {
            0 => Some((String::from("."), self.node.ino(), Filetype::Directory)),
            1 => Some((String::from(".."), self.node.parent_ino(), Filetype::Directory)),
            n => self.node.entry_at((n - 2) as usize),
        };
        Ok(entry.map(|(name, ino, filetype)| {
            let dirent = Dirent {
                next: cookie + 1,
                ino,
                namlen: name.len() as u32,
                filetype,
            };
            (dirent, name)
        }))
    }

    fn dir_node(&self) -> Option<Arc<DirNode>> {
        Some(self.node.clone())
    }

    fn open_at(
        &self,
        path: &VirtualPath,
        _lookup: Lookupflags,
        oflags: Oflags,
        fdflags: Fdflags,
    ) -> Result<Box<dyn Handle>, Errno> {
        let node = match vfs::resolve(&self.node, path) {
            Ok(node) => {
                if oflags.contains(Oflags::EXCL) {
                    return Err(Errno::Exist);
                }
                node
            }
            Err(Errno::NoEnt) if oflags.contains(Oflags::CREAT) => {
                let want_dir = oflags.contains(Oflags::DIRECTORY) || path.must_be_dir();
                vfs::create_at(&self.node, path, want_dir)?
            }
            Err(e) => return Err(e),
        };

        if oflags.contains(Oflags::DIRECTORY) && !node.is_dir() {
            return Err(Errno::NotDir);
        }

        match node {
            NodeRef::Dir(dir) => {
                if oflags.contains(Oflags::TRUNC) {
                    return Err(Errno::IsDir);
                }
                Ok(Box::new(OpenDirectory::new(dir)))
            }
            NodeRef::File(file) => {
                let handle = OpenFile::new(file, oflags.contains(Oflags::TRUNC), fdflags)?;
                Ok(Box::new(handle))
            }
        }
    }
}

// ─── Pre-opened directories ────────────────────────────────────────

/// A directory handed to the guest at startup, carrying the mount name
/// it is known by.
pub struct PreopenDirectory {
    name: String,
    dir: OpenDirectory,
}

impl PreopenDirectory {
    pub fn new(name: impl Into<String>, node: Arc<DirNode>) -> Self {
        PreopenDirectory {
            name: name.into(),
            dir: OpenDirectory::new(node),
        }
    }
}

impl Handle for PreopenDirectory {
    fn filetype(&self) -> Filetype {
        Filetype::Directory
    }

    fn rights(&self) -> (Rights, Rights) {
        self.dir.rights()
    }

    fn filestat(&self) -> Result<Filestat, Errno> {
        self.dir.filestat()
    }

    fn set_times(&mut self, atim: Option<u64>, mtim: Option<u64>) -> Result<(), Errno> {
        self.dir.set_times(atim, mtim)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        self.dir.read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        self.dir.write(bytes)
    }

    fn readdir_entry(&self, cookie: u64) -> Result<Option<(Dirent, String)>, Errno> {
        self.dir.readdir_entry(cookie)
    }

    fn preopen_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn dir_node(&self) -> Option<Arc<DirNode>> {
        self.dir.dir_node()
    }

    fn open_at(
        &self,
        path: &VirtualPath,
        lookup: Lookupflags,
        oflags: Oflags,
        fdflags: Fdflags,
    ) -> Result<Box<dyn Handle>, Errno> {
        self.dir.open_at(path, lookup, oflags, fdflags)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::create_at;

    fn path(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    fn root_dir() -> (Arc<DirNode>, OpenDirectory) {
        let root = DirNode::new_root();
        let handle = OpenDirectory::new(root.clone());
        (root, handle)
    }

    #[test]
    fn read_advances_the_cursor() {
        let (root, dir) = root_dir();
        create_at(&root, &path("f"), false)
            .unwrap()
            .as_file()
            .unwrap()
            .write_at(0, b"abcdef")
            .unwrap();
        let mut fd = dir
            .open_at(&path("f"), Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
            .unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fd.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fd.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(fd.read(&mut buf).unwrap(), 0);
        assert_eq!(fd.tell().unwrap(), 6);
    }

    #[test]
    fn pread_and_pwrite_leave_the_cursor_alone() {
        let (root, dir) = root_dir();
        create_at(&root, &path("f"), false).unwrap();
        let mut fd = dir
            .open_at(&path("f"), Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
            .unwrap();
        fd.pwrite(b"xyz", 2).unwrap();
        assert_eq!(fd.tell().unwrap(), 0);
        let mut buf = [0u8; 3];
        assert_eq!(fd.pread(&mut buf, 2).unwrap(), 3);
        assert_eq!(&buf, b"xyz");
        assert_eq!(fd.tell().unwrap(), 0);
    }

    #[test]
    fn append_mode_always_writes_at_the_end() {
        let (root, dir) = root_dir();
        create_at(&root, &path("log"), false)
            .unwrap()
            .as_file()
            .unwrap()
            .write_at(0, b"one\n")
            .unwrap();
        let mut fd = dir
            .open_at(&path("log"), Lookupflags::empty(), Oflags::empty(), Fdflags::APPEND)
            .unwrap();
        fd.seek(0, Whence::Set).unwrap();
        fd.write(b"two\n").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fd.pread(&mut buf, 0).unwrap(), 8);
        assert_eq!(&buf, b"one\ntwo\n");
        assert_eq!(fd.tell().unwrap(), 8);
    }

    #[test]
    fn seek_validates_but_allows_past_eof() {
        let (root, dir) = root_dir();
        create_at(&root, &path("f"), false)
            .unwrap()
            .as_file()
            .unwrap()
            .write_at(0, b"12345")
            .unwrap();
        let mut fd = dir
            .open_at(&path("f"), Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
            .unwrap();
        assert_eq!(fd.seek(-2, Whence::End).unwrap(), 3);
        assert_eq!(fd.seek(100, Whence::Set).unwrap(), 100);
        assert_eq!(fd.seek(-1, Whence::Set).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn create_excl_fails_the_second_time() {
        let (_root, dir) = root_dir();
        let flags = Oflags::CREAT | Oflags::EXCL;
        dir.open_at(&path("once"), Lookupflags::empty(), flags, Fdflags::empty())
            .unwrap();
        assert_eq!(
            dir.open_at(&path("once"), Lookupflags::empty(), flags, Fdflags::empty())
                .err().unwrap(),
            Errno::Exist
        );
    }

    #[test]
    fn open_without_create_requires_existence() {
        let (_root, dir) = root_dir();
        assert_eq!(
            dir.open_at(&path("nope"), Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
                .err().unwrap(),
            Errno::NoEnt
        );
    }

    #[test]
    fn create_does_not_imply_missing_parents() {
        let (_root, dir) = root_dir();
        assert_eq!(
            dir.open_at(
                &path("a/b.txt"),
                Lookupflags::empty(),
                Oflags::CREAT,
                Fdflags::empty()
            )
            .err().unwrap(),
            Errno::NoEnt
        );
    }

    #[test]
    fn directory_flag_rejects_files() {
        let (root, dir) = root_dir();
        create_at(&root, &path("f"), false).unwrap();
        assert_eq!(
            dir.open_at(&path("f"), Lookupflags::empty(), Oflags::DIRECTORY, Fdflags::empty())
                .err().unwrap(),
            Errno::NotDir
        );
    }

    #[test]
    fn truncate_on_readonly_file_is_rejected() {
        let (root, dir) = root_dir();
        let file = Arc::new(FileNode::with_content(99, true, b"keep".to_vec()));
        root.insert("ro", NodeRef::File(file));
        assert_eq!(
            dir.open_at(&path("ro"), Lookupflags::empty(), Oflags::TRUNC, Fdflags::empty())
                .err().unwrap(),
            Errno::Acces
        );
    }

    #[test]
    fn readdir_synthesizes_dot_entries_first() {
        let (root, dir) = root_dir();
        create_at(&root, &path("a"), false).unwrap();
        create_at(&root, &path("b"), true).unwrap();

        let (d0, name0) = dir.readdir_entry(0).unwrap().unwrap();
        assert_eq!(name0, ".");
        assert_eq!(d0.ino, root.ino());
        assert_eq!(d0.next, 1);

        let (d1, name1) = dir.readdir_entry(1).unwrap().unwrap();
        assert_eq!(name1, "..");
        assert_eq!(d1.ino, crate::vfs::ROOT_PARENT_INO);

        let (d2, name2) = dir.readdir_entry(2).unwrap().unwrap();
        assert_eq!(name2, "a");
        assert_eq!(d2.filetype, Filetype::RegularFile);

        let (d3, name3) = dir.readdir_entry(3).unwrap().unwrap();
        assert_eq!(name3, "b");
        assert_eq!(d3.filetype, Filetype::Directory);
        assert_eq!(d3.next, 4);

        assert!(dir.readdir_entry(4).unwrap().is_none());
    }

    #[test]
    fn preopen_reports_its_mount_name() {
        let root = DirNode::new_root();
        let pre = PreopenDirectory::new("/sandbox", root);
        assert_eq!(pre.preopen_name(), Some("/sandbox"));
        assert_eq!(pre.filetype(), Filetype::Directory);
    }

    #[test]
    fn file_content_outlives_unlink_through_the_handle() {
        let (root, dir) = root_dir();
        create_at(&root, &path("doomed"), false).unwrap();
        let mut fd = dir
            .open_at(&path("doomed"), Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
            .unwrap();
        fd.write(b"payload").unwrap();
        vfs::unlink_file_at(&root, &path("doomed")).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(fd.pread(&mut buf, 0).unwrap(), 7);
        assert_eq!(&buf, b"payload");
    }
}
