//! Guestbox WASI host shim.
//!
//! This crate gives an untrusted, sandboxed guest a POSIX-like view of
//! files, directories, a console, and timers/polling over the WASI
//! Preview 1 ABI, without granting any access to the real host
//! filesystem. The guest sees an ordered descriptor table (conventionally
//! stdin, stdout, stderr, then pre-opened directories), backed by an
//! in-memory inode tree and a handful of synthetic devices.
//!
//! Execution is single-threaded and cooperative: every import call runs
//! to completion against the guest's linear memory before control
//! returns. The only entry point that may be driven from outside a guest
//! call is [`PollableStdin::push`], which queues input and wakes a
//! registered callback so an external loop knows to poll again.
//!
//! # Architecture
//!
//! - `abi`: wire types, errno values, and fixed little-endian layouts
//! - `path`: capability-checked path parsing (no absolute paths, no
//!   escapes past the pre-opened root)
//! - `memory`: bounds-checked view over the guest's linear memory
//! - `vfs`: inode graph, resolution, and directory mutation
//! - `handle`: the open-handle trait and file/directory handles
//! - `device`: console, pollable stdin, and dev sink handles
//! - `clock`: pluggable clock sources
//! - `poll`: one-shot readiness resolution
//! - `ctx`: descriptor table and the Preview 1 syscall dispatcher

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod abi;
pub mod clock;
pub mod ctx;
pub mod device;
pub mod handle;
pub mod memory;
pub mod path;
pub mod poll;
pub mod vfs;

use core::fmt;

pub use abi::Errno;
pub use clock::{ClockSource, TickClock};
pub use ctx::{import_names, HostConfig, WasiCtx, IMPORT_MODULE};
pub use device::{ConsoleStdout, DevDirectory, DevOut, PollableStdin};
pub use handle::{Handle, OpenDirectory, OpenFile, PreopenDirectory};
pub use memory::GuestMemory;
pub use path::VirtualPath;
pub use vfs::{DirNode, FileNode, InoCounter, NodeRef};

/// Abrupt termination of a guest call.
///
/// Ordinary failures are errno values; these unwind out of the syscall
/// as an explicit control-flow result that the driving loop must match
/// on, never as a language-level panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// The guest called `proc_exit` with this code.
    Exit(u32),
    /// The guest raised a signal; not expected in normal operation.
    Raise(u8),
    /// A rejected import (the socket family) was called.
    Unsupported(&'static str),
    /// The filesystem broke its own invariants (rename rollback failed).
    Corrupted(&'static str),
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::Exit(code) => write!(f, "guest exited with code {}", code),
            Trap::Raise(signal) => write!(f, "guest raised signal {}", signal),
            Trap::Unsupported(name) => write!(f, "unsupported import called: {}", name),
            Trap::Corrupted(what) => write!(f, "internal consistency violation: {}", what),
        }
    }
}
