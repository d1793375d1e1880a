//! Synthetic device handles: console output, pollable input, dev sinks.
//!
//! None of these are backed by the inode tree. The console buffers
//! partial lines and hands complete lines to an external sink; the
//! pollable input stream is fed asynchronously by the embedder and wakes
//! a registered callback so the driving loop knows to poll again.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::abi::{
    Dirent, Errno, Eventrwflags, Fdflags, Filetype, Lookupflags, Oflags, Rights,
};
use crate::handle::{Handle, Readiness};
use crate::path::VirtualPath;

/// Receives complete console lines, without the trailing newline.
pub type LineSink = Box<dyn FnMut(&str) + Send>;

/// Receives raw bytes written to a dev sink.
pub type ByteSink = Box<dyn FnMut(&[u8]) + Send>;

// ─── Console output ────────────────────────────────────────────────

/// Line-buffered console output (stdout/stderr).
///
/// Bytes accumulate until a newline completes a line; closing the
/// descriptor flushes whatever partial line is left.
pub struct ConsoleStdout {
    sink: LineSink,
    pending: Vec<u8>,
}

impl ConsoleStdout {
    pub fn new(sink: LineSink) -> Self {
        ConsoleStdout {
            sink,
            pending: Vec::new(),
        }
    }
}

impl Handle for ConsoleStdout {
    fn filetype(&self) -> Filetype {
        Filetype::CharacterDevice
    }

    fn rights(&self) -> (Rights, Rights) {
        (Rights::CHARACTER_OUTPUT, Rights::empty())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            self.pending.pop(); // drop the newline
            let line = String::from_utf8_lossy(&self.pending);
            (self.sink)(&line);
            self.pending = rest;
        }
        Ok(bytes.len())
    }

    fn poll_read(&self) -> Result<Readiness, Errno> {
        // Write-only device: never read-ready.
        Ok(None)
    }

    fn close(&mut self) -> Result<(), Errno> {
        if !self.pending.is_empty() {
            let line = core::mem::take(&mut self.pending);
            (self.sink)(&String::from_utf8_lossy(&line));
        }
        Ok(())
    }
}

// ─── Pollable input ────────────────────────────────────────────────

struct StdinState {
    chunks: VecDeque<Vec<u8>>,
    pending: usize,
    closed: bool,
    waker: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Asynchronously-fed input stream (stdin).
///
/// The embedder keeps a clone and pushes chunks between guest calls;
/// every push and the final close invoke the registered wake callback.
/// Reads never block: an open, empty stream reports `Errno::Again`, a
/// closed and drained stream reports end of file.
#[derive(Clone)]
pub struct PollableStdin {
    state: Arc<Mutex<StdinState>>,
}

impl PollableStdin {
    pub fn new() -> Self {
        PollableStdin {
            state: Arc::new(Mutex::new(StdinState {
                chunks: VecDeque::new(),
                pending: 0,
                closed: false,
                waker: None,
            })),
        }
    }

    /// Register the callback invoked on every push and on close.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.state.lock().waker = Some(Arc::new(waker));
    }

    /// Queue a chunk of input. Ignored after close.
    pub fn push(&self, chunk: Vec<u8>) {
        let waker = {
            let mut state = self.state.lock();
            if state.closed || chunk.is_empty() {
                return;
            }
            state.pending += chunk.len();
            state.chunks.push_back(chunk);
            state.waker.clone()
        };
        if let Some(waker) = waker {
            waker();
        }
    }

    /// Close the stream: queued data stays readable, then end of file.
    pub fn close_stream(&self) {
        let waker = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waker.clone()
        };
        if let Some(waker) = waker {
            waker();
        }
    }

    /// Bytes currently queued.
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }
}

impl Default for PollableStdin {
    fn default() -> Self {
        Self::new()
    }
}

impl Handle for PollableStdin {
    fn filetype(&self) -> Filetype {
        Filetype::CharacterDevice
    }

    fn rights(&self) -> (Rights, Rights) {
        (Rights::CHARACTER_INPUT, Rights::empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut state = self.state.lock();
        if state.chunks.is_empty() {
            return if state.closed { Ok(0) } else { Err(Errno::Again) };
        }
        let mut filled = 0;
        while filled < buf.len() {
            let exhausted = {
                let Some(chunk) = state.chunks.front_mut() else {
                    break;
                };
                let n = chunk.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&chunk[..n]);
                filled += n;
                if n < chunk.len() {
                    chunk.drain(..n);
                    false
                } else {
                    true
                }
            };
            if exhausted {
                state.chunks.pop_front();
            }
        }
        state.pending -= filled;
        Ok(filled)
    }

    fn poll_read(&self) -> Result<Readiness, Errno> {
        let state = self.state.lock();
        if state.pending > 0 {
            Ok(Some((state.pending as u64, Eventrwflags::empty())))
        } else if state.closed {
            Ok(Some((0, Eventrwflags::HANGUP)))
        } else {
            Ok(None)
        }
    }

    fn poll_write(&self) -> Result<Readiness, Errno> {
        // Read-only device: never write-ready.
        Ok(None)
    }
}

// ─── Dev sinks ─────────────────────────────────────────────────────

/// A single-purpose write sink exposed under a [`DevDirectory`].
pub struct DevOut {
    sink: Arc<Mutex<ByteSink>>,
}

impl Handle for DevOut {
    fn filetype(&self) -> Filetype {
        Filetype::CharacterDevice
    }

    fn rights(&self) -> (Rights, Rights) {
        (Rights::CHARACTER_OUTPUT, Rights::empty())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Errno> {
        let mut sink = self.sink.lock();
        (*sink)(bytes);
        Ok(bytes.len())
    }

    fn poll_read(&self) -> Result<Readiness, Errno> {
        Ok(None)
    }
}

/// A synthetic pre-opened directory exposing exactly one named sink.
///
/// It has no inode tree behind it: enumeration and opening are answered
/// from the entry name alone, and all mutation is rejected.
#[derive(Clone)]
pub struct DevDirectory {
    name: String,
    entry: String,
    sink: Arc<Mutex<ByteSink>>,
}

impl DevDirectory {
    pub fn new(name: impl Into<String>, entry: impl Into<String>, sink: ByteSink) -> Self {
        DevDirectory {
            name: name.into(),
            entry: entry.into(),
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl Handle for DevDirectory {
    fn filetype(&self) -> Filetype {
        Filetype::Directory
    }

    fn rights(&self) -> (Rights, Rights) {
        (
            Rights::PATH_OPEN.union(Rights::FD_READDIR),
            Rights::CHARACTER_OUTPUT,
        )
    }

    fn readdir_entry(&self, cookie: u64) -> Result<Option<(Dirent, String)>, Errno> {
        let entry = match cookie {
            0 => Some((String::from("."), Filetype::Directory)),
            1 => Some((String::from(".."), Filetype::Directory)),
            2 => Some((self.entry.clone(), Filetype::CharacterDevice)),
            _ => None,
        };
        Ok(entry.map(|(name, filetype)| {
            let dirent = Dirent {
                next: cookie + 1,
                ino: 0,
                namlen: name.len() as u32,
                filetype,
            };
            (dirent, name)
        }))
    }

    fn preopen_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn open_at(
        &self,
        path: &VirtualPath,
        _lookup: Lookupflags,
        oflags: Oflags,
        _fdflags: Fdflags,
    ) -> Result<Box<dyn Handle>, Errno> {
        if path.is_empty() {
            return Ok(Box::new(self.clone()));
        }
        match path.components() {
            [name] if name == &self.entry => {
                if oflags.contains(Oflags::EXCL) {
                    return Err(Errno::Exist);
                }
                if oflags.contains(Oflags::DIRECTORY) || path.must_be_dir() {
                    return Err(Errno::NotDir);
                }
                Ok(Box::new(DevOut {
                    sink: self.sink.clone(),
                }))
            }
            [_] if oflags.contains(Oflags::CREAT) => Err(Errno::Acces),
            _ => Err(Errno::NoEnt),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn capture() -> (Arc<Mutex<Vec<String>>>, LineSink) {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        (
            lines,
            Box::new(move |line: &str| sink.lock().push(String::from(line))),
        )
    }

    #[test]
    fn console_flushes_only_complete_lines() {
        let (lines, sink) = capture();
        let mut console = ConsoleStdout::new(sink);
        console.write(b"hel").unwrap();
        console.write(b"lo\nwor").unwrap();
        assert_eq!(*lines.lock(), ["hello"]);
        console.write(b"ld\n\n").unwrap();
        assert_eq!(*lines.lock(), ["hello", "world", ""]);
    }

    #[test]
    fn console_close_flushes_the_partial_tail() {
        let (lines, sink) = capture();
        let mut console = ConsoleStdout::new(sink);
        console.write(b"no newline").unwrap();
        assert!(lines.lock().is_empty());
        console.close().unwrap();
        assert_eq!(*lines.lock(), ["no newline"]);
    }

    #[test]
    fn stdin_read_drains_across_chunks() {
        let stdin = PollableStdin::new();
        stdin.push(b"abc".to_vec());
        stdin.push(b"defg".to_vec());
        let mut handle = stdin.clone();
        let mut buf = [0u8; 5];
        assert_eq!(handle.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
        let mut buf = [0u8; 5];
        assert_eq!(handle.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"fg");
    }

    #[test]
    fn empty_open_stdin_is_again_then_eof_after_close() {
        let stdin = PollableStdin::new();
        let mut handle = stdin.clone();
        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf), Err(Errno::Again));
        stdin.close_stream();
        assert_eq!(handle.read(&mut buf), Ok(0));
    }

    #[test]
    fn push_wakes_exactly_once_per_push() {
        let stdin = PollableStdin::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        stdin.set_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        stdin.push(b"a".to_vec());
        stdin.push(b"b".to_vec());
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        stdin.close_stream();
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn push_after_close_is_dropped_without_waking() {
        let stdin = PollableStdin::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        stdin.set_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        stdin.close_stream();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        stdin.push(b"late".to_vec());
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(stdin.pending(), 0);
    }

    #[test]
    fn stdin_readiness_reports_bytes_then_hangup() {
        let stdin = PollableStdin::new();
        assert_eq!(stdin.poll_read().unwrap(), None);
        stdin.push(b"xyz".to_vec());
        assert_eq!(
            stdin.poll_read().unwrap(),
            Some((3, Eventrwflags::empty()))
        );
        let mut handle = stdin.clone();
        let mut buf = [0u8; 3];
        handle.read(&mut buf).unwrap();
        stdin.close_stream();
        assert_eq!(
            stdin.poll_read().unwrap(),
            Some((0, Eventrwflags::HANGUP))
        );
    }

    #[test]
    fn dev_directory_opens_only_its_entry() {
        let written: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let dev = DevDirectory::new(
            "/dev",
            "out",
            Box::new(move |bytes: &[u8]| sink.lock().extend_from_slice(bytes)),
        );
        assert_eq!(dev.preopen_name(), Some("/dev"));

        let path = VirtualPath::parse("out").unwrap();
        let mut out = dev
            .open_at(&path, Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
            .unwrap();
        out.write(b"ping").unwrap();
        assert_eq!(&*written.lock(), b"ping");

        let missing = VirtualPath::parse("other").unwrap();
        assert_eq!(
            dev.open_at(&missing, Lookupflags::empty(), Oflags::empty(), Fdflags::empty())
                .err().unwrap(),
            Errno::NoEnt
        );
    }

    #[test]
    fn dev_directory_enumerates_dot_dotdot_entry() {
        let dev = DevDirectory::new("/dev", "out", Box::new(|_: &[u8]| {}));
        let names: Vec<String> = (0..4)
            .filter_map(|c| dev.readdir_entry(c).unwrap())
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, [".", "..", "out"]);
    }
}
