//! Descriptor table and WASI Preview 1 syscall dispatch.
//!
//! `WasiCtx` owns the live descriptor table and translates each import
//! call into guest-memory reads, a dispatch to the addressed handle(s),
//! and guest-memory writes of the results. Every call runs to completion
//! on the calling thread; nothing here blocks or retries.
//!
//! Ordinary failures travel back to the guest as errno values. The only
//! abrupt exits are `proc_exit`/`proc_raise`, the rejected socket family,
//! and a failed rename rollback, which surface as [`Trap`] so the driving
//! loop can tell "terminate now" from "ordinary error".

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::abi::{
    Advice, ClockId, Errno, Fdflags, Fstflags, Lookupflags, Oflags, Prestat, Subscription,
    Whence, DIRENT_HEADER_SIZE, EVENT_SIZE, IOVEC_SIZE, SUBSCRIPTION_SIZE,
};
use crate::clock::{ClockSource, TickClock};
use crate::handle::Handle;
use crate::memory::GuestMemory;
use crate::path::VirtualPath;
use crate::poll::{self, FdProbe};
use crate::vfs::{self, DirNode};
use crate::Trap;

/// Return an errno to the guest from inside a syscall body.
macro_rules! guest_try {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(errno) => return Ok(errno),
        }
    };
}

// ─── Configuration ─────────────────────────────────────────────────

/// Host-side limits and seeds.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Maximum number of simultaneously open descriptors.
    pub max_fds: usize,
    /// Seed for the deterministic `random_get` generator.
    pub random_seed: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            max_fds: 4096,
            random_seed: 0xDEAD_BEEF_CAFE_BABE,
        }
    }
}

// ─── Descriptor table ──────────────────────────────────────────────

/// Sparse table of open handles, indexed by guest descriptor numbers.
/// Closed slots go on a free list and are reused before the table grows.
struct FdTable {
    entries: Vec<Option<Box<dyn Handle>>>,
    free: Vec<u32>,
    max: usize,
}

impl FdTable {
    fn new(handles: Vec<Box<dyn Handle>>, max: usize) -> Self {
        FdTable {
            entries: handles.into_iter().map(Some).collect(),
            free: Vec::new(),
            max,
        }
    }

    fn get(&self, fd: u32) -> Result<&dyn Handle, Errno> {
        self.entries
            .get(fd as usize)
            .and_then(|slot| slot.as_deref())
            .ok_or(Errno::BadF)
    }

    fn get_mut(&mut self, fd: u32) -> Result<&mut (dyn Handle + 'static), Errno> {
        self.entries
            .get_mut(fd as usize)
            .and_then(|slot| slot.as_deref_mut())
            .ok_or(Errno::BadF)
    }

    fn insert(&mut self, handle: Box<dyn Handle>) -> Result<u32, Errno> {
        if let Some(fd) = self.free.pop() {
            self.entries[fd as usize] = Some(handle);
            return Ok(fd);
        }
        if self.entries.len() >= self.max {
            return Err(Errno::NFile);
        }
        self.entries.push(Some(handle));
        Ok((self.entries.len() - 1) as u32)
    }

    fn remove(&mut self, fd: u32) -> Result<Box<dyn Handle>, Errno> {
        let slot = self.entries.get_mut(fd as usize).ok_or(Errno::BadF)?;
        let handle = slot.take().ok_or(Errno::BadF)?;
        self.free.push(fd);
        Ok(handle)
    }

    /// Move the handle at `fd` over `to`, closing whatever `to` held.
    /// Both descriptors must be live.
    fn renumber(&mut self, fd: u32, to: u32) -> Result<(), Errno> {
        if fd == to {
            self.get(fd)?;
            return Ok(());
        }
        self.get(to)?;
        let handle = self.remove(fd)?;
        if let Some(mut old) = self.entries[to as usize].replace(handle) {
            let _ = old.close();
        }
        Ok(())
    }
}

// ─── WASI context ──────────────────────────────────────────────────

/// The syscall dispatcher: descriptor table, process arguments and
/// environment, clock, and random state for one guest instance.
pub struct WasiCtx {
    fds: FdTable,
    args: Vec<String>,
    env: Vec<(String, String)>,
    clock: Box<dyn ClockSource>,
    random_state: u64,
}

impl WasiCtx {
    /// Build a context over the startup descriptor table, conventionally
    /// stdin, stdout, stderr, then pre-opened directories in order.
    pub fn new(handles: Vec<Box<dyn Handle>>) -> Self {
        Self::with_config(handles, HostConfig::default())
    }

    pub fn with_config(handles: Vec<Box<dyn Handle>>, config: HostConfig) -> Self {
        WasiCtx {
            fds: FdTable::new(handles, config.max_fds),
            args: Vec::new(),
            env: Vec::new(),
            clock: Box::new(TickClock::new()),
            random_state: config.random_seed,
        }
    }

    /// Set command line arguments.
    pub fn set_args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = args;
        self
    }

    /// Set an environment variable.
    pub fn set_env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.push((String::from(key), String::from(value)));
        self
    }

    /// Replace the clock source.
    pub fn set_clock(&mut self, clock: Box<dyn ClockSource>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Add a handle after startup; returns its descriptor number.
    pub fn push_handle(&mut self, handle: Box<dyn Handle>) -> Result<u32, Errno> {
        self.fds.insert(handle)
    }

    /// Backing directory for path operations addressed at `fd`.
    /// Synthetic directories expose no mutable tree.
    fn dir_of(&self, fd: u32) -> Result<Arc<DirNode>, Errno> {
        let handle = self.fds.get(fd)?;
        match handle.dir_node() {
            Some(dir) => Ok(dir),
            None if handle.filetype() == crate::abi::Filetype::Directory => Err(Errno::Acces),
            None => Err(Errno::NotDir),
        }
    }

    fn read_path(
        &self,
        mem: &GuestMemory<'_>,
        ptr: u32,
        len: u32,
    ) -> Result<VirtualPath, Errno> {
        let raw = mem.read_string(ptr, len)?;
        VirtualPath::parse(&raw)
    }

    /// Decode an iovec list: (pointer, length) pairs.
    fn read_iovecs(
        &self,
        mem: &GuestMemory<'_>,
        iovs_ptr: u32,
        iovs_len: u32,
    ) -> Result<Vec<(u32, u32)>, Errno> {
        let mut iovecs = Vec::with_capacity(iovs_len as usize);
        for i in 0..iovs_len {
            let base = iovs_ptr
                .checked_add(i.checked_mul(IOVEC_SIZE as u32).ok_or(Errno::Fault)?)
                .ok_or(Errno::Fault)?;
            let ptr = mem.read_u32(base)?;
            let len = mem.read_u32(base + 4)?;
            iovecs.push((ptr, len));
        }
        Ok(iovecs)
    }

    /// Resolve `*_filestat_set_times` arguments into concrete values.
    fn resolve_times(
        &mut self,
        atim: u64,
        mtim: u64,
        fst_flags: Fstflags,
    ) -> Result<(Option<u64>, Option<u64>), Errno> {
        if fst_flags.contains(Fstflags::ATIM | Fstflags::ATIM_NOW)
            || fst_flags.contains(Fstflags::MTIM | Fstflags::MTIM_NOW)
        {
            return Err(Errno::Inval);
        }
        let now = |clock: &mut dyn ClockSource| clock.now(ClockId::Realtime);
        let atim = if fst_flags.contains(Fstflags::ATIM) {
            Some(atim)
        } else if fst_flags.contains(Fstflags::ATIM_NOW) {
            Some(now(self.clock.as_mut()))
        } else {
            None
        };
        let mtim = if fst_flags.contains(Fstflags::MTIM) {
            Some(mtim)
        } else if fst_flags.contains(Fstflags::MTIM_NOW) {
            Some(now(self.clock.as_mut()))
        } else {
            None
        };
        Ok((atim, mtim))
    }

    // ─── Process arguments and environment ─────────────────────────

    pub fn args_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        argv_ptr: u32,
        argv_buf_ptr: u32,
    ) -> Result<Errno, Trap> {
        let mut ptr = argv_buf_ptr;
        for (i, arg) in self.args.iter().enumerate() {
            guest_try!(mem.write_u32(argv_ptr + (i as u32) * 4, ptr));
            guest_try!(mem.write_bytes(ptr, arg.as_bytes()));
            guest_try!(mem.write_u8(ptr + arg.len() as u32, 0));
            ptr += arg.len() as u32 + 1;
        }
        Ok(Errno::Success)
    }

    pub fn args_sizes_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        argc_ptr: u32,
        size_ptr: u32,
    ) -> Result<Errno, Trap> {
        let total: usize = self.args.iter().map(|a| a.len() + 1).sum();
        guest_try!(mem.write_u32(argc_ptr, self.args.len() as u32));
        guest_try!(mem.write_u32(size_ptr, total as u32));
        Ok(Errno::Success)
    }

    pub fn environ_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        environ_ptr: u32,
        environ_buf_ptr: u32,
    ) -> Result<Errno, Trap> {
        let mut ptr = environ_buf_ptr;
        for (i, (key, value)) in self.env.iter().enumerate() {
            let entry = format!("{}={}", key, value);
            guest_try!(mem.write_u32(environ_ptr + (i as u32) * 4, ptr));
            guest_try!(mem.write_bytes(ptr, entry.as_bytes()));
            guest_try!(mem.write_u8(ptr + entry.len() as u32, 0));
            ptr += entry.len() as u32 + 1;
        }
        Ok(Errno::Success)
    }

    pub fn environ_sizes_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        count_ptr: u32,
        size_ptr: u32,
    ) -> Result<Errno, Trap> {
        let total: usize = self
            .env
            .iter()
            .map(|(k, v)| k.len() + 1 + v.len() + 1)
            .sum();
        guest_try!(mem.write_u32(count_ptr, self.env.len() as u32));
        guest_try!(mem.write_u32(size_ptr, total as u32));
        Ok(Errno::Success)
    }

    // ─── Clocks and randomness ─────────────────────────────────────

    pub fn clock_res_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        clock_id: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let id = guest_try!(ClockId::from_u32(clock_id).ok_or(Errno::Inval));
        guest_try!(mem.write_u64(out_ptr, self.clock.resolution(id)));
        Ok(Errno::Success)
    }

    pub fn clock_time_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        clock_id: u32,
        _precision: u64,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let id = guest_try!(ClockId::from_u32(clock_id).ok_or(Errno::Inval));
        let now = self.clock.now(id);
        guest_try!(mem.write_u64(out_ptr, now));
        Ok(Errno::Success)
    }

    pub fn random_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        buf_ptr: u32,
        buf_len: u32,
    ) -> Result<Errno, Trap> {
        let buf = guest_try!(mem.slice_mut(buf_ptr, buf_len));
        for byte in buf.iter_mut() {
            // xorshift64
            self.random_state ^= self.random_state << 13;
            self.random_state ^= self.random_state >> 7;
            self.random_state ^= self.random_state << 17;
            *byte = (self.random_state & 0xFF) as u8;
        }
        Ok(Errno::Success)
    }

    // ─── Descriptor operations ─────────────────────────────────────

    pub fn fd_advise(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        offset: u64,
        len: u64,
        advice: u8,
    ) -> Result<Errno, Trap> {
        let advice = guest_try!(Advice::from_u8(advice).ok_or(Errno::Inval));
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.advise(offset, len, advice));
        Ok(Errno::Success)
    }

    pub fn fd_allocate(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        offset: u64,
        len: u64,
    ) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.allocate(offset, len));
        Ok(Errno::Success)
    }

    pub fn fd_close(&mut self, _mem: &mut GuestMemory<'_>, fd: u32) -> Result<Errno, Trap> {
        let mut handle = guest_try!(self.fds.remove(fd));
        guest_try!(handle.close());
        Ok(Errno::Success)
    }

    pub fn fd_datasync(&mut self, _mem: &mut GuestMemory<'_>, fd: u32) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.datasync());
        Ok(Errno::Success)
    }

    pub fn fd_sync(&mut self, _mem: &mut GuestMemory<'_>, fd: u32) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.sync());
        Ok(Errno::Success)
    }

    pub fn fd_fdstat_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let stat = guest_try!(self.fds.get(fd)).fdstat();
        guest_try!(mem.write_bytes(out_ptr, &stat.to_bytes()));
        Ok(Errno::Success)
    }

    pub fn fd_fdstat_set_flags(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        flags: u16,
    ) -> Result<Errno, Trap> {
        let flags = Fdflags::from_bits_truncate(flags);
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.set_fdflags(flags));
        Ok(Errno::Success)
    }

    /// Rights narrowing is accepted but not tracked; handles derive their
    /// rights from what they are.
    pub fn fd_fdstat_set_rights(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        _rights_base: u64,
        _rights_inheriting: u64,
    ) -> Result<Errno, Trap> {
        guest_try!(self.fds.get(fd));
        Ok(Errno::Success)
    }

    pub fn fd_filestat_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let stat = guest_try!(guest_try!(self.fds.get(fd)).filestat());
        guest_try!(mem.write_bytes(out_ptr, &stat.to_bytes()));
        Ok(Errno::Success)
    }

    pub fn fd_filestat_set_size(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        size: u64,
    ) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.set_size(size));
        Ok(Errno::Success)
    }

    pub fn fd_filestat_set_times(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        atim: u64,
        mtim: u64,
        fst_flags: u16,
    ) -> Result<Errno, Trap> {
        let flags = Fstflags::from_bits_truncate(fst_flags);
        let (atim, mtim) = guest_try!(self.resolve_times(atim, mtim, flags));
        let handle = guest_try!(self.fds.get_mut(fd));
        guest_try!(handle.set_times(atim, mtim));
        Ok(Errno::Success)
    }

    pub fn fd_prestat_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get(fd));
        let name = guest_try!(handle.preopen_name().ok_or(Errno::BadF));
        let prestat = Prestat {
            name_len: name.len() as u32,
        };
        guest_try!(mem.write_bytes(out_ptr, &prestat.to_bytes()));
        Ok(Errno::Success)
    }

    pub fn fd_prestat_dir_name(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<Errno, Trap> {
        let handle = guest_try!(self.fds.get(fd));
        let name = guest_try!(handle.preopen_name().ok_or(Errno::BadF));
        if (path_len as usize) < name.len() {
            return Ok(Errno::NameTooLong);
        }
        guest_try!(mem.write_bytes(path_ptr, name.as_bytes()));
        Ok(Errno::Success)
    }

    pub fn fd_read(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nread_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(nread_ptr, 0));
        let iovecs = guest_try!(self.read_iovecs(mem, iovs_ptr, iovs_len));
        let handle = guest_try!(self.fds.get_mut(fd));
        let mut total: u32 = 0;
        for (ptr, len) in iovecs {
            let buf = match mem.slice_mut(ptr, len) {
                Ok(buf) => buf,
                Err(errno) => {
                    let _ = mem.write_u32(nread_ptr, total);
                    return Ok(errno);
                }
            };
            match handle.read(buf) {
                Ok(n) => {
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                Err(errno) => {
                    let _ = mem.write_u32(nread_ptr, total);
                    return Ok(errno);
                }
            }
        }
        guest_try!(mem.write_u32(nread_ptr, total));
        Ok(Errno::Success)
    }

    pub fn fd_pread(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        offset: u64,
        nread_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(nread_ptr, 0));
        let iovecs = guest_try!(self.read_iovecs(mem, iovs_ptr, iovs_len));
        let handle = guest_try!(self.fds.get_mut(fd));
        let mut total: u32 = 0;
        for (ptr, len) in iovecs {
            let buf = match mem.slice_mut(ptr, len) {
                Ok(buf) => buf,
                Err(errno) => {
                    let _ = mem.write_u32(nread_ptr, total);
                    return Ok(errno);
                }
            };
            match handle.pread(buf, offset + total as u64) {
                Ok(n) => {
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                Err(errno) => {
                    let _ = mem.write_u32(nread_ptr, total);
                    return Ok(errno);
                }
            }
        }
        guest_try!(mem.write_u32(nread_ptr, total));
        Ok(Errno::Success)
    }

    pub fn fd_write(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nwritten_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(nwritten_ptr, 0));
        let iovecs = guest_try!(self.read_iovecs(mem, iovs_ptr, iovs_len));
        let handle = guest_try!(self.fds.get_mut(fd));
        let mut total: u32 = 0;
        for (ptr, len) in iovecs {
            let bytes = match mem.slice(ptr, len) {
                Ok(bytes) => bytes,
                Err(errno) => {
                    let _ = mem.write_u32(nwritten_ptr, total);
                    return Ok(errno);
                }
            };
            match handle.write(bytes) {
                Ok(n) => {
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                Err(errno) => {
                    let _ = mem.write_u32(nwritten_ptr, total);
                    return Ok(errno);
                }
            }
        }
        guest_try!(mem.write_u32(nwritten_ptr, total));
        Ok(Errno::Success)
    }

    pub fn fd_pwrite(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        offset: u64,
        nwritten_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(nwritten_ptr, 0));
        let iovecs = guest_try!(self.read_iovecs(mem, iovs_ptr, iovs_len));
        let handle = guest_try!(self.fds.get_mut(fd));
        let mut total: u32 = 0;
        for (ptr, len) in iovecs {
            let bytes = match mem.slice(ptr, len) {
                Ok(bytes) => bytes,
                Err(errno) => {
                    let _ = mem.write_u32(nwritten_ptr, total);
                    return Ok(errno);
                }
            };
            match handle.pwrite(bytes, offset + total as u64) {
                Ok(n) => {
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                Err(errno) => {
                    let _ = mem.write_u32(nwritten_ptr, total);
                    return Ok(errno);
                }
            }
        }
        guest_try!(mem.write_u32(nwritten_ptr, total));
        Ok(Errno::Success)
    }

    pub fn fd_readdir(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        buf_ptr: u32,
        buf_len: u32,
        cookie: u64,
        used_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(used_ptr, 0));
        let handle = guest_try!(self.fds.get(fd));
        let mut used: u32 = 0;
        let mut cookie = cookie;
        loop {
            let Some((dirent, name)) = guest_try!(handle.readdir_entry(cookie)) else {
                break;
            };
            let need = (DIRENT_HEADER_SIZE + name.len()) as u32;
            if used + need > buf_len {
                // An entry that only partially fits makes the buffer full;
                // its cookie stays unresolved for the next call.
                used = buf_len;
                break;
            }
            guest_try!(mem.write_bytes(buf_ptr + used, &dirent.to_bytes()));
            guest_try!(mem.write_bytes(
                buf_ptr + used + DIRENT_HEADER_SIZE as u32,
                name.as_bytes()
            ));
            used += need;
            cookie = dirent.next;
        }
        guest_try!(mem.write_u32(used_ptr, used));
        Ok(Errno::Success)
    }

    pub fn fd_renumber(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        fd: u32,
        to: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(self.fds.renumber(fd, to));
        Ok(Errno::Success)
    }

    pub fn fd_seek(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        offset: i64,
        whence: u8,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let whence = guest_try!(Whence::from_u8(whence).ok_or(Errno::Inval));
        let handle = guest_try!(self.fds.get_mut(fd));
        let position = guest_try!(handle.seek(offset, whence));
        guest_try!(mem.write_u64(out_ptr, position));
        Ok(Errno::Success)
    }

    pub fn fd_tell(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let position = guest_try!(guest_try!(self.fds.get(fd)).tell());
        guest_try!(mem.write_u64(out_ptr, position));
        Ok(Errno::Success)
    }

    // ─── Path operations ───────────────────────────────────────────

    pub fn path_create_directory(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<Errno, Trap> {
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let dir = guest_try!(self.dir_of(fd));
        guest_try!(vfs::create_at(&dir, &path, true));
        Ok(Errno::Success)
    }

    pub fn path_filestat_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        _flags: u32,
        path_ptr: u32,
        path_len: u32,
        out_ptr: u32,
    ) -> Result<Errno, Trap> {
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let dir = guest_try!(self.dir_of(fd));
        let node = guest_try!(vfs::resolve(&dir, &path));
        guest_try!(mem.write_bytes(out_ptr, &node.filestat().to_bytes()));
        Ok(Errno::Success)
    }

    pub fn path_filestat_set_times(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        _flags: u32,
        path_ptr: u32,
        path_len: u32,
        atim: u64,
        mtim: u64,
        fst_flags: u16,
    ) -> Result<Errno, Trap> {
        let flags = Fstflags::from_bits_truncate(fst_flags);
        let (atim, mtim) = guest_try!(self.resolve_times(atim, mtim, flags));
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let dir = guest_try!(self.dir_of(fd));
        let node = guest_try!(vfs::resolve(&dir, &path));
        node.set_times(atim, mtim);
        Ok(Errno::Success)
    }

    pub fn path_link(
        &mut self,
        mem: &mut GuestMemory<'_>,
        old_fd: u32,
        _old_flags: u32,
        old_path_ptr: u32,
        old_path_len: u32,
        new_fd: u32,
        new_path_ptr: u32,
        new_path_len: u32,
    ) -> Result<Errno, Trap> {
        let old_path = guest_try!(self.read_path(mem, old_path_ptr, old_path_len));
        let new_path = guest_try!(self.read_path(mem, new_path_ptr, new_path_len));
        let old_dir = guest_try!(self.dir_of(old_fd));
        let new_dir = guest_try!(self.dir_of(new_fd));
        let node = guest_try!(vfs::resolve(&old_dir, &old_path));
        guest_try!(vfs::link_at(&new_dir, &new_path, node, false));
        Ok(Errno::Success)
    }

    pub fn path_open(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        dirflags: u32,
        path_ptr: u32,
        path_len: u32,
        oflags: u16,
        _rights_base: u64,
        _rights_inheriting: u64,
        fdflags: u16,
        out_fd_ptr: u32,
    ) -> Result<Errno, Trap> {
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let lookup = Lookupflags::from_bits_truncate(dirflags);
        let oflags = Oflags::from_bits_truncate(oflags);
        let fdflags = Fdflags::from_bits_truncate(fdflags);
        let child = {
            let handle = guest_try!(self.fds.get(fd));
            guest_try!(handle.open_at(&path, lookup, oflags, fdflags))
        };
        let new_fd = guest_try!(self.fds.insert(child));
        guest_try!(mem.write_u32(out_fd_ptr, new_fd));
        Ok(Errno::Success)
    }

    pub fn path_readlink(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        _path_ptr: u32,
        _path_len: u32,
        _buf_ptr: u32,
        _buf_len: u32,
        used_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(used_ptr, 0));
        guest_try!(self.fds.get(fd));
        // No symlinks in this filesystem.
        Ok(Errno::NotSup)
    }

    pub fn path_remove_directory(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<Errno, Trap> {
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let dir = guest_try!(self.dir_of(fd));
        guest_try!(vfs::remove_dir_at(&dir, &path));
        Ok(Errno::Success)
    }

    /// Rename is unlink-then-link. If linking at the destination fails the
    /// source entry is restored; failure to restore means the tree already
    /// broke its own invariants, which is not reportable as an errno.
    pub fn path_rename(
        &mut self,
        mem: &mut GuestMemory<'_>,
        old_fd: u32,
        old_path_ptr: u32,
        old_path_len: u32,
        new_fd: u32,
        new_path_ptr: u32,
        new_path_len: u32,
    ) -> Result<Errno, Trap> {
        let old_path = guest_try!(self.read_path(mem, old_path_ptr, old_path_len));
        let new_path = guest_try!(self.read_path(mem, new_path_ptr, new_path_len));
        let old_dir = guest_try!(self.dir_of(old_fd));
        let new_dir = guest_try!(self.dir_of(new_fd));
        // Validate the destination parent before touching the source.
        guest_try!(vfs::parent_of(&new_dir, &new_path));
        let node = guest_try!(vfs::unlink_at(&old_dir, &old_path));
        match vfs::link_at(&new_dir, &new_path, node.clone(), true) {
            Ok(()) => Ok(Errno::Success),
            Err(errno) => match vfs::link_at(&old_dir, &old_path, node, true) {
                Ok(()) => Ok(errno),
                Err(_) => Err(Trap::Corrupted("rename rollback failed")),
            },
        }
    }

    pub fn path_symlink(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        _old_path_ptr: u32,
        _old_path_len: u32,
        fd: u32,
        _new_path_ptr: u32,
        _new_path_len: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(self.fds.get(fd));
        Ok(Errno::NotSup)
    }

    pub fn path_unlink_file(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<Errno, Trap> {
        let path = guest_try!(self.read_path(mem, path_ptr, path_len));
        let dir = guest_try!(self.dir_of(fd));
        guest_try!(vfs::unlink_file_at(&dir, &path));
        Ok(Errno::Success)
    }

    // ─── Polling ───────────────────────────────────────────────────

    pub fn poll_oneoff(
        &mut self,
        mem: &mut GuestMemory<'_>,
        in_ptr: u32,
        out_ptr: u32,
        nsubscriptions: u32,
        nevents_ptr: u32,
    ) -> Result<Errno, Trap> {
        guest_try!(mem.write_u32(nevents_ptr, 0));
        let mut subs = Vec::with_capacity(nsubscriptions as usize);
        for i in 0..nsubscriptions {
            let base = in_ptr + i * SUBSCRIPTION_SIZE as u32;
            let bytes = guest_try!(mem.slice(base, SUBSCRIPTION_SIZE as u32));
            let array: &[u8; SUBSCRIPTION_SIZE] = bytes.try_into().unwrap();
            subs.push(guest_try!(Subscription::from_bytes(array)));
        }
        let WasiCtx { fds, clock, .. } = self;
        let events = guest_try!(poll::poll_once(
            &subs,
            clock.as_mut(),
            |fd, is_write| match fds.get(fd) {
                Err(_) => FdProbe::Unknown,
                Ok(handle) => FdProbe::Probed(if is_write {
                    handle.poll_write()
                } else {
                    handle.poll_read()
                }),
            },
        ));
        for (i, event) in events.iter().enumerate() {
            let base = out_ptr + (i as u32) * EVENT_SIZE as u32;
            guest_try!(mem.write_bytes(base, &event.to_bytes()));
        }
        guest_try!(mem.write_u32(nevents_ptr, events.len() as u32));
        Ok(Errno::Success)
    }

    // ─── Process control ───────────────────────────────────────────

    /// Abrupt termination carrying the guest's exit code. Never returns
    /// an errno; the driving loop must catch [`Trap::Exit`] distinctly.
    pub fn proc_exit(&mut self, _mem: &mut GuestMemory<'_>, code: u32) -> Result<Errno, Trap> {
        log::debug!("guest requested exit with code {}", code);
        Err(Trap::Exit(code))
    }

    pub fn proc_raise(&mut self, _mem: &mut GuestMemory<'_>, signal: u8) -> Result<Errno, Trap> {
        log::warn!("guest raised signal {}", signal);
        Err(Trap::Raise(signal))
    }

    pub fn sched_yield(&mut self, _mem: &mut GuestMemory<'_>) -> Result<Errno, Trap> {
        // Cooperative execution: there is nobody to yield to.
        Ok(Errno::Success)
    }

    // ─── Sockets (rejected) ────────────────────────────────────────

    fn sock_reject(&self, name: &'static str) -> Result<Errno, Trap> {
        log::warn!("sandboxed guest called {}", name);
        Err(Trap::Unsupported(name))
    }

    pub fn sock_accept(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        _fd: u32,
        _flags: u16,
        _out_ptr: u32,
    ) -> Result<Errno, Trap> {
        self.sock_reject("sock_accept")
    }

    pub fn sock_recv(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        _fd: u32,
        _ri_data_ptr: u32,
        _ri_data_len: u32,
        _ri_flags: u16,
        _out_ptr: u32,
        _out_flags_ptr: u32,
    ) -> Result<Errno, Trap> {
        self.sock_reject("sock_recv")
    }

    pub fn sock_send(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        _fd: u32,
        _si_data_ptr: u32,
        _si_data_len: u32,
        _si_flags: u16,
        _out_ptr: u32,
    ) -> Result<Errno, Trap> {
        self.sock_reject("sock_send")
    }

    pub fn sock_shutdown(
        &mut self,
        _mem: &mut GuestMemory<'_>,
        _fd: u32,
        _how: u8,
    ) -> Result<Errno, Trap> {
        self.sock_reject("sock_shutdown")
    }
}

// ─── Import table ──────────────────────────────────────────────────

/// Import module name the guest links against.
pub const IMPORT_MODULE: &str = "wasi_snapshot_preview1";

/// Names of every import this context answers.
pub fn import_names() -> &'static [&'static str] {
    &[
        "args_get",
        "args_sizes_get",
        "environ_get",
        "environ_sizes_get",
        "clock_res_get",
        "clock_time_get",
        "fd_advise",
        "fd_allocate",
        "fd_close",
        "fd_datasync",
        "fd_fdstat_get",
        "fd_fdstat_set_flags",
        "fd_fdstat_set_rights",
        "fd_filestat_get",
        "fd_filestat_set_size",
        "fd_filestat_set_times",
        "fd_pread",
        "fd_prestat_get",
        "fd_prestat_dir_name",
        "fd_pwrite",
        "fd_read",
        "fd_readdir",
        "fd_renumber",
        "fd_seek",
        "fd_sync",
        "fd_tell",
        "fd_write",
        "path_create_directory",
        "path_filestat_get",
        "path_filestat_set_times",
        "path_link",
        "path_open",
        "path_readlink",
        "path_remove_directory",
        "path_rename",
        "path_symlink",
        "path_unlink_file",
        "poll_oneoff",
        "proc_exit",
        "proc_raise",
        "random_get",
        "sched_yield",
        "sock_accept",
        "sock_recv",
        "sock_send",
        "sock_shutdown",
    ]
}

impl WasiCtx {
    /// Name-keyed dispatch: the import-function table as one entry point.
    /// Arguments arrive as raw wasm integers in call order; the returned
    /// value is the errno the guest receives.
    pub fn dispatch(
        &mut self,
        mem: &mut GuestMemory<'_>,
        name: &str,
        args: &[u64],
    ) -> Result<u32, Trap> {
        let result = match (name, args) {
            ("args_get", &[a, b]) => self.args_get(mem, a as u32, b as u32),
            ("args_sizes_get", &[a, b]) => self.args_sizes_get(mem, a as u32, b as u32),
            ("environ_get", &[a, b]) => self.environ_get(mem, a as u32, b as u32),
            ("environ_sizes_get", &[a, b]) => self.environ_sizes_get(mem, a as u32, b as u32),
            ("clock_res_get", &[id, out]) => self.clock_res_get(mem, id as u32, out as u32),
            ("clock_time_get", &[id, precision, out]) => {
                self.clock_time_get(mem, id as u32, precision, out as u32)
            }
            ("fd_advise", &[fd, offset, len, advice]) => {
                self.fd_advise(mem, fd as u32, offset, len, advice as u8)
            }
            ("fd_allocate", &[fd, offset, len]) => self.fd_allocate(mem, fd as u32, offset, len),
            ("fd_close", &[fd]) => self.fd_close(mem, fd as u32),
            ("fd_datasync", &[fd]) => self.fd_datasync(mem, fd as u32),
            ("fd_fdstat_get", &[fd, out]) => self.fd_fdstat_get(mem, fd as u32, out as u32),
            ("fd_fdstat_set_flags", &[fd, flags]) => {
                self.fd_fdstat_set_flags(mem, fd as u32, flags as u16)
            }
            ("fd_fdstat_set_rights", &[fd, base, inheriting]) => {
                self.fd_fdstat_set_rights(mem, fd as u32, base, inheriting)
            }
            ("fd_filestat_get", &[fd, out]) => self.fd_filestat_get(mem, fd as u32, out as u32),
            ("fd_filestat_set_size", &[fd, size]) => {
                self.fd_filestat_set_size(mem, fd as u32, size)
            }
            ("fd_filestat_set_times", &[fd, atim, mtim, flags]) => {
                self.fd_filestat_set_times(mem, fd as u32, atim, mtim, flags as u16)
            }
            ("fd_pread", &[fd, iovs, iovs_len, offset, out]) => {
                self.fd_pread(mem, fd as u32, iovs as u32, iovs_len as u32, offset, out as u32)
            }
            ("fd_prestat_get", &[fd, out]) => self.fd_prestat_get(mem, fd as u32, out as u32),
            ("fd_prestat_dir_name", &[fd, path, len]) => {
                self.fd_prestat_dir_name(mem, fd as u32, path as u32, len as u32)
            }
            ("fd_pwrite", &[fd, iovs, iovs_len, offset, out]) => {
                self.fd_pwrite(mem, fd as u32, iovs as u32, iovs_len as u32, offset, out as u32)
            }
            ("fd_read", &[fd, iovs, iovs_len, out]) => {
                self.fd_read(mem, fd as u32, iovs as u32, iovs_len as u32, out as u32)
            }
            ("fd_readdir", &[fd, buf, buf_len, cookie, out]) => {
                self.fd_readdir(mem, fd as u32, buf as u32, buf_len as u32, cookie, out as u32)
            }
            ("fd_renumber", &[fd, to]) => self.fd_renumber(mem, fd as u32, to as u32),
            ("fd_seek", &[fd, offset, whence, out]) => {
                self.fd_seek(mem, fd as u32, offset as i64, whence as u8, out as u32)
            }
            ("fd_sync", &[fd]) => self.fd_sync(mem, fd as u32),
            ("fd_tell", &[fd, out]) => self.fd_tell(mem, fd as u32, out as u32),
            ("fd_write", &[fd, iovs, iovs_len, out]) => {
                self.fd_write(mem, fd as u32, iovs as u32, iovs_len as u32, out as u32)
            }
            ("path_create_directory", &[fd, path, len]) => {
                self.path_create_directory(mem, fd as u32, path as u32, len as u32)
            }
            ("path_filestat_get", &[fd, flags, path, len, out]) => self.path_filestat_get(
                mem,
                fd as u32,
                flags as u32,
                path as u32,
                len as u32,
                out as u32,
            ),
            ("path_filestat_set_times", &[fd, flags, path, len, atim, mtim, fst]) => self
                .path_filestat_set_times(
                    mem,
                    fd as u32,
                    flags as u32,
                    path as u32,
                    len as u32,
                    atim,
                    mtim,
                    fst as u16,
                ),
            ("path_link", &[old_fd, flags, old_path, old_len, new_fd, new_path, new_len]) => self
                .path_link(
                    mem,
                    old_fd as u32,
                    flags as u32,
                    old_path as u32,
                    old_len as u32,
                    new_fd as u32,
                    new_path as u32,
                    new_len as u32,
                ),
            ("path_open", &[fd, dirflags, path, len, oflags, base, inheriting, fdflags, out]) => {
                self.path_open(
                    mem,
                    fd as u32,
                    dirflags as u32,
                    path as u32,
                    len as u32,
                    oflags as u16,
                    base,
                    inheriting,
                    fdflags as u16,
                    out as u32,
                )
            }
            ("path_readlink", &[fd, path, path_len, buf, buf_len, out]) => self.path_readlink(
                mem,
                fd as u32,
                path as u32,
                path_len as u32,
                buf as u32,
                buf_len as u32,
                out as u32,
            ),
            ("path_remove_directory", &[fd, path, len]) => {
                self.path_remove_directory(mem, fd as u32, path as u32, len as u32)
            }
            ("path_rename", &[old_fd, old_path, old_len, new_fd, new_path, new_len]) => self
                .path_rename(
                    mem,
                    old_fd as u32,
                    old_path as u32,
                    old_len as u32,
                    new_fd as u32,
                    new_path as u32,
                    new_len as u32,
                ),
            ("path_symlink", &[old_path, old_len, fd, new_path, new_len]) => self.path_symlink(
                mem,
                old_path as u32,
                old_len as u32,
                fd as u32,
                new_path as u32,
                new_len as u32,
            ),
            ("path_unlink_file", &[fd, path, len]) => {
                self.path_unlink_file(mem, fd as u32, path as u32, len as u32)
            }
            ("poll_oneoff", &[in_ptr, out_ptr, nsubs, out]) => {
                self.poll_oneoff(mem, in_ptr as u32, out_ptr as u32, nsubs as u32, out as u32)
            }
            ("proc_exit", &[code]) => self.proc_exit(mem, code as u32),
            ("proc_raise", &[signal]) => self.proc_raise(mem, signal as u8),
            ("random_get", &[buf, len]) => self.random_get(mem, buf as u32, len as u32),
            ("sched_yield", &[]) => self.sched_yield(mem),
            ("sock_accept", &[fd, flags, out]) => {
                self.sock_accept(mem, fd as u32, flags as u16, out as u32)
            }
            ("sock_recv", &[fd, data, data_len, flags, out, out_flags]) => self.sock_recv(
                mem,
                fd as u32,
                data as u32,
                data_len as u32,
                flags as u16,
                out as u32,
                out_flags as u32,
            ),
            ("sock_send", &[fd, data, data_len, flags, out]) => self.sock_send(
                mem,
                fd as u32,
                data as u32,
                data_len as u32,
                flags as u16,
                out as u32,
            ),
            ("sock_shutdown", &[fd, how]) => self.sock_shutdown(mem, fd as u32, how as u8),
            (unknown, _) => {
                log::warn!("unknown or malformed import call: {}", unknown);
                Ok(Errno::NoSys)
            }
        };
        result.map(|errno| errno.raw() as u32)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
