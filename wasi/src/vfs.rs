//! In-memory virtual filesystem: inode graph and tree mutation.
//!
//! Nodes are reference-counted; ownership flows strictly parent→child
//! through directory entries, and a directory's back-reference to its
//! parent is a `Weak` used only to answer "what is my parent's ino".
//! Open handles clone the node `Arc`, so file content stays alive and
//! writable after the name is unlinked, until the last handle drops.
//!
//! Inode numbers are issued by a per-filesystem counter owned by the root
//! directory. They start at 1 and are never reused; ino 0 is reserved to
//! denote the root's synthetic parent.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::abi::{Errno, Filestat, Filetype};
use crate::path::VirtualPath;

/// Ino reported for the filesystem root's synthetic parent (`..` of `/`).
pub const ROOT_PARENT_INO: u64 = 0;

/// Per-filesystem inode number allocator.
pub struct InoCounter {
    next: AtomicU64,
}

impl InoCounter {
    pub fn new() -> Self {
        InoCounter {
            next: AtomicU64::new(1),
        }
    }

    /// Issue the next ino. Values are unique for the counter's lifetime.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InoCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Stat timestamps, nanoseconds. Only the set-times syscalls move these.
#[derive(Debug, Clone, Copy, Default)]
pub struct Times {
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

// ─── File nodes ────────────────────────────────────────────────────

/// A regular file: identity plus a mutable byte buffer.
pub struct FileNode {
    ino: u64,
    readonly: bool,
    data: Mutex<Vec<u8>>,
    times: Mutex<Times>,
}

impl FileNode {
    pub fn new(ino: u64, readonly: bool) -> Self {
        FileNode {
            ino,
            readonly,
            data: Mutex::new(Vec::new()),
            times: Mutex::new(Times::default()),
        }
    }

    pub fn with_content(ino: u64, readonly: bool, content: Vec<u8>) -> Self {
        FileNode {
            ino,
            readonly,
            data: Mutex::new(content),
            times: Mutex::new(Times::default()),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    /// Copy bytes out from `offset`; short reads at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        let data = self.data.lock();
        let start = offset.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n
    }

    /// Write bytes at `offset`, zero-filling any gap past the current end.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<usize, Errno> {
        if self.readonly {
            return Err(Errno::Acces);
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start.checked_add(bytes.len()).ok_or(Errno::FBig)?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Write at end of file; returns the bytes written.
    pub fn append(&self, bytes: &[u8]) -> Result<usize, Errno> {
        if self.readonly {
            return Err(Errno::Acces);
        }
        let mut data = self.data.lock();
        data.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    pub fn truncate(&self) -> Result<(), Errno> {
        self.set_size(0)
    }

    pub fn set_size(&self, size: u64) -> Result<(), Errno> {
        if self.readonly {
            return Err(Errno::Acces);
        }
        self.data.lock().resize(size as usize, 0);
        Ok(())
    }

    pub fn set_times(&self, atim: Option<u64>, mtim: Option<u64>) {
        let mut times = self.times.lock();
        if let Some(t) = atim {
            times.atim = t;
        }
        if let Some(t) = mtim {
            times.mtim = t;
        }
    }

    pub fn filestat(&self) -> Filestat {
        let times = *self.times.lock();
        Filestat {
            dev: 0,
            ino: self.ino,
            filetype: Filetype::RegularFile as u8,
            nlink: 1,
            size: self.size(),
            atim: times.atim,
            mtim: times.mtim,
            ctim: times.ctim,
        }
    }
}

// ─── Directory nodes ───────────────────────────────────────────────

/// A directory: identity plus an ordered name→node mapping.
///
/// Entries keep insertion order so enumeration is deterministic; names
/// are unique per directory.
pub struct DirNode {
    ino: u64,
    counter: Arc<InoCounter>,
    parent: Mutex<Weak<DirNode>>,
    entries: Mutex<Vec<(String, NodeRef)>>,
    times: Mutex<Times>,
}

impl DirNode {
    /// Create a filesystem root owning a fresh ino counter.
    pub fn new_root() -> Arc<DirNode> {
        let counter = Arc::new(InoCounter::new());
        Arc::new(DirNode {
            ino: counter.next(),
            counter,
            parent: Mutex::new(Weak::new()),
            entries: Mutex::new(Vec::new()),
            times: Mutex::new(Times::default()),
        })
    }

    fn new_child(counter: Arc<InoCounter>, parent: &Arc<DirNode>) -> Arc<DirNode> {
        Arc::new(DirNode {
            ino: counter.next(),
            counter,
            parent: Mutex::new(Arc::downgrade(parent)),
            entries: Mutex::new(Vec::new()),
            times: Mutex::new(Times::default()),
        })
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Ino of the parent directory; the root reports its synthetic parent.
    pub fn parent_ino(&self) -> u64 {
        match self.parent.lock().upgrade() {
            Some(parent) => parent.ino,
            None => ROOT_PARENT_INO,
        }
    }

    pub fn set_parent(&self, parent: &Arc<DirNode>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub fn lookup(&self, name: &str) -> Option<NodeRef> {
        self.entries
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node.clone())
    }

    /// Append a new entry. The caller has checked the name is free.
    pub fn insert(&self, name: &str, node: NodeRef) {
        self.entries.lock().push((String::from(name), node));
    }

    /// Swap the node behind an existing name, keeping its position.
    pub fn replace(&self, name: &str, node: NodeRef) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = node;
        }
    }

    pub fn remove(&self, name: &str) -> Option<NodeRef> {
        let mut entries = self.entries.lock();
        let idx = entries.iter().position(|(n, _)| n == name)?;
        Some(entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entry by enumeration position: (name, ino, filetype).
    pub fn entry_at(&self, index: usize) -> Option<(String, u64, Filetype)> {
        self.entries
            .lock()
            .get(index)
            .map(|(name, node)| (name.clone(), node.ino(), node.filetype()))
    }

    pub fn set_times(&self, atim: Option<u64>, mtim: Option<u64>) {
        let mut times = self.times.lock();
        if let Some(t) = atim {
            times.atim = t;
        }
        if let Some(t) = mtim {
            times.mtim = t;
        }
    }

    pub fn filestat(&self) -> Filestat {
        let times = *self.times.lock();
        Filestat {
            dev: 0,
            ino: self.ino,
            filetype: Filetype::Directory as u8,
            nlink: 1,
            size: 0,
            atim: times.atim,
            mtim: times.mtim,
            ctim: times.ctim,
        }
    }
}

// ─── Node references ───────────────────────────────────────────────

/// A shared reference to either node kind.
#[derive(Clone)]
pub enum NodeRef {
    File(Arc<FileNode>),
    Dir(Arc<DirNode>),
}

impl core::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NodeRef::File(node) => write!(f, "File(ino {})", node.ino()),
            NodeRef::Dir(node) => write!(f, "Dir(ino {})", node.ino()),
        }
    }
}

impl NodeRef {
    pub fn ino(&self) -> u64 {
        match self {
            NodeRef::File(f) => f.ino(),
            NodeRef::Dir(d) => d.ino(),
        }
    }

    pub fn filetype(&self) -> Filetype {
        match self {
            NodeRef::File(_) => Filetype::RegularFile,
            NodeRef::Dir(_) => Filetype::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NodeRef::Dir(_))
    }

    pub fn as_dir(&self) -> Option<&Arc<DirNode>> {
        match self {
            NodeRef::Dir(d) => Some(d),
            NodeRef::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<FileNode>> {
        match self {
            NodeRef::File(f) => Some(f),
            NodeRef::Dir(_) => None,
        }
    }

    pub fn filestat(&self) -> Filestat {
        match self {
            NodeRef::File(f) => f.filestat(),
            NodeRef::Dir(d) => d.filestat(),
        }
    }

    pub fn set_times(&self, atim: Option<u64>, mtim: Option<u64>) {
        match self {
            NodeRef::File(f) => f.set_times(atim, mtim),
            NodeRef::Dir(d) => d.set_times(atim, mtim),
        }
    }
}

// ─── Resolution and mutation ───────────────────────────────────────

/// Walk `path` from `start`. A non-directory before the final component
/// is `NotDir`; a missing component is `NoEnt`; a trailing slash demands
/// the target be a directory.
pub fn resolve(start: &Arc<DirNode>, path: &VirtualPath) -> Result<NodeRef, Errno> {
    let mut current = NodeRef::Dir(start.clone());
    for component in path.components() {
        let dir = current.as_dir().ok_or(Errno::NotDir)?.clone();
        current = dir.lookup(component).ok_or(Errno::NoEnt)?;
    }
    if path.must_be_dir() && !current.is_dir() {
        return Err(Errno::NotDir);
    }
    Ok(current)
}

/// Resolve the parent directory of the path's final component.
fn resolve_parent<'p>(
    start: &Arc<DirNode>,
    path: &'p VirtualPath,
) -> Result<(Arc<DirNode>, &'p str), Errno> {
    let (parents, name) = path.split_last().ok_or(Errno::NoEnt)?;
    let mut current = start.clone();
    for component in parents {
        let next = current.lookup(component).ok_or(Errno::NoEnt)?;
        current = next.as_dir().ok_or(Errno::NotDir)?.clone();
    }
    Ok((current, name))
}

/// Validate and return the parent directory the path's final component
/// lives in, without touching the entry itself.
pub fn parent_of(start: &Arc<DirNode>, path: &VirtualPath) -> Result<Arc<DirNode>, Errno> {
    resolve_parent(start, path).map(|(parent, _)| parent)
}

/// Create an empty file or directory at `path`. The parent must already
/// exist; the final name must not.
pub fn create_at(start: &Arc<DirNode>, path: &VirtualPath, is_dir: bool) -> Result<NodeRef, Errno> {
    if path.must_be_dir() && !is_dir {
        return Err(Errno::NoEnt);
    }
    let (parent, name) = resolve_parent(start, path)?;
    if parent.lookup(name).is_some() {
        return Err(Errno::Exist);
    }
    let node = if is_dir {
        NodeRef::Dir(DirNode::new_child(parent.counter.clone(), &parent))
    } else {
        NodeRef::File(Arc::new(FileNode::new(parent.counter.next(), false)))
    };
    parent.insert(name, node.clone());
    Ok(node)
}

/// Link `node` at `path`.
///
/// Ordered rules: a trailing slash naming a non-directory target is
/// `NoEnt`; directory-onto-directory needs `allow_directory` and an empty
/// destination; directory-onto-file and file-onto-directory are type
/// mismatches; linking a directory without `allow_directory` is `Perm`
/// (directory relinking is reserved for rename).
pub fn link_at(
    start: &Arc<DirNode>,
    path: &VirtualPath,
    node: NodeRef,
    allow_directory: bool,
) -> Result<(), Errno> {
    if path.must_be_dir() && !node.is_dir() {
        return Err(Errno::NoEnt);
    }
    let (parent, name) = resolve_parent(start, path)?;
    let linking_dir = node.is_dir();
    match parent.lookup(name) {
        Some(NodeRef::Dir(dst)) if linking_dir => {
            if !allow_directory {
                return Err(Errno::Exist);
            }
            if !dst.is_empty() {
                return Err(Errno::NotEmpty);
            }
            if let NodeRef::Dir(src) = &node {
                src.set_parent(&parent);
            }
            parent.replace(name, node);
            Ok(())
        }
        // file onto directory
        Some(NodeRef::Dir(_)) => Err(Errno::IsDir),
        // directory onto file
        Some(NodeRef::File(_)) if linking_dir => Err(Errno::NotDir),
        // regular file over regular file
        Some(NodeRef::File(_)) => {
            parent.replace(name, node);
            Ok(())
        }
        None => {
            if linking_dir {
                if !allow_directory {
                    return Err(Errno::Perm);
                }
                if let NodeRef::Dir(dir) = &node {
                    dir.set_parent(&parent);
                }
            }
            parent.insert(name, node);
            Ok(())
        }
    }
}

/// Remove and return the entry at `path`, whatever its type.
/// Used by rename; guest-facing removal goes through the typed variants.
pub fn unlink_at(start: &Arc<DirNode>, path: &VirtualPath) -> Result<NodeRef, Errno> {
    let (parent, name) = resolve_parent(start, path)?;
    let node = parent.lookup(name).ok_or(Errno::NoEnt)?;
    if path.must_be_dir() && !node.is_dir() {
        return Err(Errno::NotDir);
    }
    parent.remove(name).ok_or(Errno::NoEnt)?;
    Ok(node)
}

/// Remove a regular file; directories are rejected.
pub fn unlink_file_at(start: &Arc<DirNode>, path: &VirtualPath) -> Result<(), Errno> {
    let (parent, name) = resolve_parent(start, path)?;
    let node = parent.lookup(name).ok_or(Errno::NoEnt)?;
    if node.is_dir() {
        return Err(Errno::IsDir);
    }
    if path.must_be_dir() {
        return Err(Errno::NotDir);
    }
    parent.remove(name);
    Ok(())
}

/// Remove an empty directory; files and non-empty directories are rejected.
pub fn remove_dir_at(start: &Arc<DirNode>, path: &VirtualPath) -> Result<(), Errno> {
    let (parent, name) = resolve_parent(start, path)?;
    let node = parent.lookup(name).ok_or(Errno::NoEnt)?;
    let dir = node.as_dir().ok_or(Errno::NotDir)?;
    if !dir.is_empty() {
        return Err(Errno::NotEmpty);
    }
    parent.remove(name);
    Ok(())
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    #[test]
    fn inos_are_unique_and_increasing() {
        let root = DirNode::new_root();
        assert_eq!(root.ino(), 1);
        let a = create_at(&root, &path("a"), true).unwrap();
        let b = create_at(&root, &path("b.txt"), false).unwrap();
        assert_eq!(a.ino(), 2);
        assert_eq!(b.ino(), 3);
        // independent filesystems do not share counters
        let other = DirNode::new_root();
        assert_eq!(other.ino(), 1);
    }

    #[test]
    fn root_parent_is_the_synthetic_ino() {
        let root = DirNode::new_root();
        assert_eq!(root.parent_ino(), ROOT_PARENT_INO);
        let sub = create_at(&root, &path("sub"), true).unwrap();
        assert_eq!(sub.as_dir().unwrap().parent_ino(), root.ino());
    }

    #[test]
    fn create_requires_existing_parent() {
        let root = DirNode::new_root();
        assert_eq!(
            create_at(&root, &path("a/b.txt"), false).unwrap_err(),
            Errno::NoEnt
        );
        create_at(&root, &path("a"), true).unwrap();
        create_at(&root, &path("a/b.txt"), false).unwrap();
        let stat = resolve(&root, &path("a/b.txt")).unwrap().filestat();
        assert_eq!(stat.filetype, Filetype::RegularFile as u8);
    }

    #[test]
    fn create_rejects_existing_entry() {
        let root = DirNode::new_root();
        create_at(&root, &path("x"), false).unwrap();
        assert_eq!(create_at(&root, &path("x"), false).unwrap_err(), Errno::Exist);
    }

    #[test]
    fn resolve_distinguishes_noent_and_notdir() {
        let root = DirNode::new_root();
        create_at(&root, &path("f.txt"), false).unwrap();
        assert_eq!(resolve(&root, &path("missing")).unwrap_err(), Errno::NoEnt);
        assert_eq!(
            resolve(&root, &path("f.txt/deeper")).unwrap_err(),
            Errno::NotDir
        );
        assert_eq!(resolve(&root, &path("f.txt/")).unwrap_err(), Errno::NotDir);
    }

    #[test]
    fn empty_path_resolves_to_the_start_directory() {
        let root = DirNode::new_root();
        let node = resolve(&root, &path("")).unwrap();
        assert_eq!(node.ino(), root.ino());
    }

    #[test]
    fn file_content_round_trips() {
        let root = DirNode::new_root();
        let node = create_at(&root, &path("data.bin"), false).unwrap();
        let file = node.as_file().unwrap();
        file.write_at(0, b"hello").unwrap();
        let mut buf = [0u8; 8];
        let n = file.read_at(&mut buf, 0);
        assert_eq!(&buf[..n], b"hello");
        // sparse write zero-fills the gap
        file.write_at(7, b"x").unwrap();
        assert_eq!(file.size(), 8);
        let mut buf = [0u8; 8];
        file.read_at(&mut buf, 0);
        assert_eq!(&buf[5..], b"\0\0x");
    }

    #[test]
    fn readonly_files_reject_mutation() {
        let file = FileNode::with_content(9, true, b"fixed".to_vec());
        assert_eq!(file.write_at(0, b"no"), Err(Errno::Acces));
        assert_eq!(file.append(b"no"), Err(Errno::Acces));
        assert_eq!(file.truncate(), Err(Errno::Acces));
        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(&mut buf, 0), 5);
    }

    #[test]
    fn unlink_file_rejects_directories() {
        let root = DirNode::new_root();
        create_at(&root, &path("d"), true).unwrap();
        assert_eq!(unlink_file_at(&root, &path("d")).unwrap_err(), Errno::IsDir);
    }

    #[test]
    fn remove_dir_requires_empty() {
        let root = DirNode::new_root();
        create_at(&root, &path("d"), true).unwrap();
        create_at(&root, &path("d/f"), false).unwrap();
        assert_eq!(remove_dir_at(&root, &path("d")).unwrap_err(), Errno::NotEmpty);
        unlink_file_at(&root, &path("d/f")).unwrap();
        remove_dir_at(&root, &path("d")).unwrap();
        assert_eq!(resolve(&root, &path("d")).unwrap_err(), Errno::NoEnt);
    }

    #[test]
    fn remove_dir_rejects_files() {
        let root = DirNode::new_root();
        create_at(&root, &path("f"), false).unwrap();
        assert_eq!(remove_dir_at(&root, &path("f")).unwrap_err(), Errno::NotDir);
    }

    #[test]
    fn link_refuses_directories_without_permission() {
        let root = DirNode::new_root();
        let dir = create_at(&root, &path("d"), true).unwrap();
        assert_eq!(
            link_at(&root, &path("d2"), dir, false).unwrap_err(),
            Errno::Perm
        );
    }

    #[test]
    fn link_over_nonempty_directory_is_notempty() {
        let root = DirNode::new_root();
        create_at(&root, &path("src"), true).unwrap();
        create_at(&root, &path("dst"), true).unwrap();
        create_at(&root, &path("dst/keep"), false).unwrap();
        let src = unlink_at(&root, &path("src")).unwrap();
        assert_eq!(
            link_at(&root, &path("dst"), src, true).unwrap_err(),
            Errno::NotEmpty
        );
    }

    #[test]
    fn link_type_mismatches() {
        let root = DirNode::new_root();
        create_at(&root, &path("d"), true).unwrap();
        create_at(&root, &path("f"), false).unwrap();
        let file = resolve(&root, &path("f")).unwrap();
        assert_eq!(
            link_at(&root, &path("d"), file, false).unwrap_err(),
            Errno::IsDir
        );
        let dir = unlink_at(&root, &path("d")).unwrap();
        assert_eq!(
            link_at(&root, &path("f"), dir, true).unwrap_err(),
            Errno::NotDir
        );
    }

    #[test]
    fn relinked_directory_reports_its_new_parent() {
        let root = DirNode::new_root();
        create_at(&root, &path("a"), true).unwrap();
        create_at(&root, &path("b"), true).unwrap();
        let moved = unlink_at(&root, &path("a")).unwrap();
        link_at(&root, &path("b/a"), moved, true).unwrap();
        let b = resolve(&root, &path("b")).unwrap();
        let a = resolve(&root, &path("b/a")).unwrap();
        assert_eq!(a.as_dir().unwrap().parent_ino(), b.ino());
    }

    #[test]
    fn content_survives_unlink_while_referenced() {
        let root = DirNode::new_root();
        let node = create_at(&root, &path("ghost"), false).unwrap();
        let file = node.as_file().unwrap().clone();
        file.write_at(0, b"still here").unwrap();
        unlink_file_at(&root, &path("ghost")).unwrap();
        assert_eq!(resolve(&root, &path("ghost")).unwrap_err(), Errno::NoEnt);
        let mut buf = [0u8; 10];
        assert_eq!(file.read_at(&mut buf, 0), 10);
        assert_eq!(&buf, b"still here");
    }
}
