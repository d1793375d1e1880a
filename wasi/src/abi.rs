//! WASI Preview 1 ABI types and binary codec.
//!
//! Everything the guest sees on the wire lives here: errno values, file
//! types, flag/right bitsets, and the fixed little-endian layouts for
//! `fdstat`, `filestat`, `prestat`, directory entries, poll subscriptions
//! and events. Encoding and decoding are pure byte-array conversions; no
//! state, no allocation beyond the decoded values themselves.

// ─── Error codes ───────────────────────────────────────────────────

/// WASI error codes (Preview 1 numeric assignments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    /// Success.
    Success = 0,
    /// Argument list too long.
    TooBig = 1,
    /// Permission denied.
    Acces = 2,
    /// Address in use.
    AddrInUse = 3,
    /// Address not available.
    AddrNotAvail = 4,
    /// Address family not supported.
    AfNoSupport = 5,
    /// Resource unavailable, try again.
    Again = 6,
    /// Connection already in progress.
    Already = 7,
    /// Bad file descriptor.
    BadF = 8,
    /// Bad message.
    BadMsg = 9,
    /// Device or resource busy.
    Busy = 10,
    /// Operation canceled.
    Canceled = 11,
    /// No child processes.
    Child = 12,
    /// Connection aborted.
    ConnAborted = 13,
    /// Connection refused.
    ConnRefused = 14,
    /// Connection reset.
    ConnReset = 15,
    /// Resource deadlock would occur.
    DeadLk = 16,
    /// Destination address required.
    DestAddrReq = 17,
    /// Mathematics argument out of domain.
    Dom = 18,
    /// File exists.
    Exist = 20,
    /// Bad address.
    Fault = 21,
    /// File too large.
    FBig = 22,
    /// Host unreachable.
    HostUnreach = 23,
    /// Identifier removed.
    IdRm = 24,
    /// Illegal byte sequence.
    IlSeq = 25,
    /// Operation in progress.
    InProgress = 26,
    /// Interrupted function.
    Intr = 27,
    /// Invalid argument.
    Inval = 28,
    /// I/O error.
    Io = 29,
    /// Socket is connected.
    IsConn = 30,
    /// Is a directory.
    IsDir = 31,
    /// Too many levels of symbolic links.
    Loop = 32,
    /// File descriptor value too large.
    MFile = 33,
    /// Too many links.
    MLink = 34,
    /// Message too large.
    MsgSize = 35,
    /// Filename too long.
    NameTooLong = 37,
    /// Network is down.
    NetDown = 38,
    /// Connection aborted by network.
    NetReset = 39,
    /// Network unreachable.
    NetUnreach = 40,
    /// Too many files open in system.
    NFile = 41,
    /// No buffer space available.
    NoBufs = 42,
    /// No such device.
    NoDev = 43,
    /// No such file or directory.
    NoEnt = 44,
    /// Executable file format error.
    NoExec = 45,
    /// No locks available.
    NoLck = 46,
    /// Not enough space.
    NoMem = 48,
    /// No message of the desired type.
    NoMsg = 49,
    /// Protocol not available.
    NoProtoOpt = 50,
    /// No space left on device.
    NoSpc = 51,
    /// Function not supported.
    NoSys = 52,
    /// Socket is not connected.
    NotConn = 53,
    /// Not a directory.
    NotDir = 54,
    /// Directory not empty.
    NotEmpty = 55,
    /// State not recoverable.
    NotRecoverable = 56,
    /// Not a socket.
    NotSock = 57,
    /// Not supported.
    NotSup = 58,
    /// Inappropriate I/O control operation.
    NoTty = 59,
    /// No such device or address.
    NxIo = 60,
    /// Value too large to be stored in data type.
    Overflow = 61,
    /// Previous owner died.
    OwnerDead = 62,
    /// Operation not permitted.
    Perm = 63,
    /// Broken pipe.
    Pipe = 64,
    /// Protocol error.
    Proto = 65,
    /// Protocol not supported.
    ProtoNoSupport = 66,
    /// Protocol wrong type for socket.
    ProtoType = 67,
    /// Result too large.
    Range = 68,
    /// Read-only file system.
    RoFs = 69,
    /// Invalid seek.
    SPipe = 70,
    /// No such process.
    SRch = 71,
    /// Connection timed out.
    TimedOut = 73,
    /// Text file busy.
    TxtBsy = 74,
    /// Cross-device link.
    XDev = 75,
    /// Capabilities insufficient.
    NotCapable = 76,
}

impl Errno {
    /// The numeric errno value returned to the guest.
    pub fn raw(self) -> u16 {
        self as u16
    }
}

// ─── Sizes ─────────────────────────────────────────────────────────

/// Encoded size of an `fdstat` structure.
pub const FDSTAT_SIZE: usize = 24;
/// Encoded size of a `filestat` structure.
pub const FILESTAT_SIZE: usize = 64;
/// Encoded size of a `prestat` structure.
pub const PRESTAT_SIZE: usize = 8;
/// Encoded size of a directory entry header (name bytes follow).
pub const DIRENT_HEADER_SIZE: usize = 24;
/// Encoded size of a poll subscription.
pub const SUBSCRIPTION_SIZE: usize = 48;
/// Encoded size of a poll event.
pub const EVENT_SIZE: usize = 32;
/// Encoded size of an I/O vector element (pointer + length).
pub const IOVEC_SIZE: usize = 8;

// ─── File types ────────────────────────────────────────────────────

/// File types (WASI Preview 1 `filetype` values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Filetype {
    /// Unknown.
    Unknown = 0,
    /// Block device.
    BlockDevice = 1,
    /// Character device.
    CharacterDevice = 2,
    /// Directory.
    Directory = 3,
    /// Regular file.
    RegularFile = 4,
    /// Socket (datagram).
    SocketDgram = 5,
    /// Socket (stream).
    SocketStream = 6,
    /// Symbolic link.
    SymbolicLink = 7,
}

/// Seek whence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    /// Seek from beginning.
    Set = 0,
    /// Seek from current position.
    Cur = 1,
    /// Seek from end.
    End = 2,
}

impl Whence {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Whence::Set),
            1 => Some(Whence::Cur),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

/// Clock identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockId {
    Realtime = 0,
    Monotonic = 1,
    ProcessCputime = 2,
    ThreadCputime = 3,
}

impl ClockId {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ClockId::Realtime),
            1 => Some(ClockId::Monotonic),
            2 => Some(ClockId::ProcessCputime),
            3 => Some(ClockId::ThreadCputime),
            _ => None,
        }
    }
}

/// File advisory hints for `fd_advise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Advice {
    Normal = 0,
    Sequential = 1,
    Random = 2,
    WillNeed = 3,
    DontNeed = 4,
    NoReuse = 5,
}

impl Advice {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Advice::Normal),
            1 => Some(Advice::Sequential),
            2 => Some(Advice::Random),
            3 => Some(Advice::WillNeed),
            4 => Some(Advice::DontNeed),
            5 => Some(Advice::NoReuse),
            _ => None,
        }
    }
}

// ─── Flag and rights bitsets ───────────────────────────────────────

bitflags::bitflags! {
    /// Per-descriptor rights (standard Preview 1 bit assignments).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

impl Rights {
    /// Rights reported for an open regular file.
    pub const FILE: Rights = Rights::FD_DATASYNC
        .union(Rights::FD_READ)
        .union(Rights::FD_SEEK)
        .union(Rights::FD_FDSTAT_SET_FLAGS)
        .union(Rights::FD_SYNC)
        .union(Rights::FD_TELL)
        .union(Rights::FD_WRITE)
        .union(Rights::FD_ADVISE)
        .union(Rights::FD_ALLOCATE)
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::FD_FILESTAT_SET_SIZE)
        .union(Rights::FD_FILESTAT_SET_TIMES)
        .union(Rights::POLL_FD_READWRITE);

    /// Rights reported for an open directory.
    pub const DIRECTORY: Rights = Rights::PATH_CREATE_DIRECTORY
        .union(Rights::PATH_CREATE_FILE)
        .union(Rights::PATH_LINK_SOURCE)
        .union(Rights::PATH_LINK_TARGET)
        .union(Rights::PATH_OPEN)
        .union(Rights::FD_READDIR)
        .union(Rights::PATH_RENAME_SOURCE)
        .union(Rights::PATH_RENAME_TARGET)
        .union(Rights::PATH_FILESTAT_GET)
        .union(Rights::PATH_FILESTAT_SET_TIMES)
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::PATH_REMOVE_DIRECTORY)
        .union(Rights::PATH_UNLINK_FILE);

    /// Rights reported for a read-side character device.
    pub const CHARACTER_INPUT: Rights = Rights::FD_READ
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::POLL_FD_READWRITE);

    /// Rights reported for a write-side character device.
    pub const CHARACTER_OUTPUT: Rights = Rights::FD_WRITE
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::POLL_FD_READWRITE);
}

bitflags::bitflags! {
    /// File descriptor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Open flags for `path_open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Oflags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Lookup flags for path operations. Symlinks are unsupported, so
    /// `SYMLINK_FOLLOW` is accepted and ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lookupflags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Which timestamps `*_filestat_set_times` should change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fstflags: u16 {
        const ATIM = 1 << 0;
        const ATIM_NOW = 1 << 1;
        const MTIM = 1 << 2;
        const MTIM_NOW = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Clock subscription flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Subclockflags: u16 {
        const ABSTIME = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Event flags reported for fd readiness.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Eventrwflags: u16 {
        const HANGUP = 1 << 0;
    }
}

// ─── Descriptor status ─────────────────────────────────────────────

/// File descriptor status, as returned by `fd_fdstat_get`.
#[derive(Debug, Clone, Copy)]
pub struct Fdstat {
    pub filetype: Filetype,
    pub flags: Fdflags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

impl Fdstat {
    /// Encode: type byte at 0, flags at 2, rights at 8 and 16.
    pub fn to_bytes(&self) -> [u8; FDSTAT_SIZE] {
        let mut buf = [0u8; FDSTAT_SIZE];
        buf[0] = self.filetype as u8;
        buf[2..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[8..16].copy_from_slice(&self.rights_base.bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.rights_inheriting.bits().to_le_bytes());
        buf
    }
}

// ─── File status ───────────────────────────────────────────────────

/// File status, as returned by `fd_filestat_get` / `path_filestat_get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: u8,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

impl Filestat {
    /// Encode: dev 0, ino 8, type 16, nlink 24, size 32, timestamps 40/48/56.
    pub fn to_bytes(&self) -> [u8; FILESTAT_SIZE] {
        let mut buf = [0u8; FILESTAT_SIZE];
        buf[0..8].copy_from_slice(&self.dev.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16] = self.filetype;
        buf[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        buf[32..40].copy_from_slice(&self.size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.atim.to_le_bytes());
        buf[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        buf[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        buf
    }
}

// ─── Pre-open info ─────────────────────────────────────────────────

/// Pre-open info for `fd_prestat_get`: tag byte + directory name length.
#[derive(Debug, Clone, Copy)]
pub struct Prestat {
    pub name_len: u32,
}

impl Prestat {
    pub fn to_bytes(&self) -> [u8; PRESTAT_SIZE] {
        let mut buf = [0u8; PRESTAT_SIZE];
        // tag 0 = preopentype::dir, the only variant
        buf[4..8].copy_from_slice(&self.name_len.to_le_bytes());
        buf
    }
}

// ─── Directory entries ─────────────────────────────────────────────

/// A single directory entry header; the name bytes follow it raw.
#[derive(Debug, Clone)]
pub struct Dirent {
    /// Cookie that resumes enumeration after this entry.
    pub next: u64,
    /// Inode of the entry.
    pub ino: u64,
    /// Length of the name in bytes.
    pub namlen: u32,
    /// Entry file type.
    pub filetype: Filetype,
}

impl Dirent {
    /// Encode: next 0, ino 8, namlen 16, type 20, three pad bytes.
    pub fn to_bytes(&self) -> [u8; DIRENT_HEADER_SIZE] {
        let mut buf = [0u8; DIRENT_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.next.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16..20].copy_from_slice(&self.namlen.to_le_bytes());
        buf[20] = self.filetype as u8;
        buf
    }
}

// ─── Poll subscriptions and events ─────────────────────────────────

/// Event type tags shared by subscriptions and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Eventtype {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

/// The request half of a poll subscription.
#[derive(Debug, Clone, Copy)]
pub enum SubscriptionKind {
    Clock {
        id: ClockId,
        timeout: u64,
        precision: u64,
        flags: Subclockflags,
    },
    FdRead {
        fd: u32,
    },
    FdWrite {
        fd: u32,
    },
}

/// A decoded poll subscription.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    /// Opaque caller data echoed back in the matching event.
    pub userdata: u64,
    pub kind: SubscriptionKind,
}

impl Subscription {
    /// Decode: userdata 0, tag 8, union payload at 16
    /// (clock: id 16, timeout 24, precision 32, flags 40; fd: number 16).
    pub fn from_bytes(buf: &[u8; SUBSCRIPTION_SIZE]) -> Result<Self, Errno> {
        let userdata = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let kind = match buf[8] {
            0 => {
                let raw_id = u32::from_le_bytes(buf[16..20].try_into().unwrap());
                let id = ClockId::from_u32(raw_id).ok_or(Errno::Inval)?;
                SubscriptionKind::Clock {
                    id,
                    timeout: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
                    precision: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
                    flags: Subclockflags::from_bits_truncate(u16::from_le_bytes(
                        buf[40..42].try_into().unwrap(),
                    )),
                }
            }
            1 => SubscriptionKind::FdRead {
                fd: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            },
            2 => SubscriptionKind::FdWrite {
                fd: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            },
            _ => return Err(Errno::Inval),
        };
        Ok(Subscription { userdata, kind })
    }
}

/// A readiness event produced by `poll_oneoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub userdata: u64,
    pub errno: Errno,
    pub kind: Eventtype,
    /// Bytes available for fd events; zero for clock events.
    pub nbytes: u64,
    pub flags: Eventrwflags,
}

impl Event {
    /// Encode: userdata 0, error 8, type 10, nbytes 16, flags 24.
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut buf = [0u8; EVENT_SIZE];
        buf[0..8].copy_from_slice(&self.userdata.to_le_bytes());
        buf[8..10].copy_from_slice(&(self.errno as u16).to_le_bytes());
        buf[10] = self.kind as u8;
        buf[16..24].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[24..26].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_the_standard_assignments() {
        assert_eq!(Errno::Success as u16, 0);
        assert_eq!(Errno::Acces as u16, 2);
        assert_eq!(Errno::Again as u16, 6);
        assert_eq!(Errno::BadF as u16, 8);
        assert_eq!(Errno::Exist as u16, 20);
        assert_eq!(Errno::Fault as u16, 21);
        assert_eq!(Errno::Inval as u16, 28);
        assert_eq!(Errno::IsDir as u16, 31);
        assert_eq!(Errno::NameTooLong as u16, 37);
        assert_eq!(Errno::NFile as u16, 41);
        assert_eq!(Errno::NoEnt as u16, 44);
        assert_eq!(Errno::NoSys as u16, 52);
        assert_eq!(Errno::NotDir as u16, 54);
        assert_eq!(Errno::NotEmpty as u16, 55);
        assert_eq!(Errno::NotSup as u16, 58);
        assert_eq!(Errno::Perm as u16, 63);
        assert_eq!(Errno::NotCapable as u16, 76);
    }

    #[test]
    fn fdstat_layout() {
        let stat = Fdstat {
            filetype: Filetype::RegularFile,
            flags: Fdflags::APPEND,
            rights_base: Rights::FD_READ,
            rights_inheriting: Rights::FD_WRITE,
        };
        let buf = stat.to_bytes();
        assert_eq!(buf[0], 4);
        assert_eq!(u16::from_le_bytes(buf[2..4].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(buf[8..16].try_into().unwrap()), 1 << 1);
        assert_eq!(u64::from_le_bytes(buf[16..24].try_into().unwrap()), 1 << 6);
    }

    #[test]
    fn filestat_layout() {
        let stat = Filestat {
            dev: 1,
            ino: 42,
            filetype: Filetype::Directory as u8,
            nlink: 1,
            size: 512,
            atim: 7,
            mtim: 8,
            ctim: 9,
        };
        let buf = stat.to_bytes();
        assert_eq!(u64::from_le_bytes(buf[8..16].try_into().unwrap()), 42);
        assert_eq!(buf[16], 3);
        assert_eq!(u64::from_le_bytes(buf[24..32].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(buf[32..40].try_into().unwrap()), 512);
        assert_eq!(u64::from_le_bytes(buf[56..64].try_into().unwrap()), 9);
    }

    #[test]
    fn prestat_layout() {
        let buf = Prestat { name_len: 5 }.to_bytes();
        assert_eq!(buf[0], 0);
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 5);
    }

    #[test]
    fn dirent_header_layout() {
        let d = Dirent {
            next: 3,
            ino: 9,
            namlen: 4,
            filetype: Filetype::RegularFile,
        };
        let buf = d.to_bytes();
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 3);
        assert_eq!(u64::from_le_bytes(buf[8..16].try_into().unwrap()), 9);
        assert_eq!(u32::from_le_bytes(buf[16..20].try_into().unwrap()), 4);
        assert_eq!(buf[20], 4);
        assert_eq!(&buf[21..24], &[0, 0, 0]);
    }

    #[test]
    fn subscription_decode_clock() {
        let mut buf = [0u8; SUBSCRIPTION_SIZE];
        buf[0..8].copy_from_slice(&0xAABBu64.to_le_bytes());
        buf[8] = 0; // clock
        buf[16..20].copy_from_slice(&1u32.to_le_bytes()); // monotonic
        buf[24..32].copy_from_slice(&1_000u64.to_le_bytes());
        buf[40..42].copy_from_slice(&1u16.to_le_bytes()); // abstime
        let sub = Subscription::from_bytes(&buf).unwrap();
        assert_eq!(sub.userdata, 0xAABB);
        match sub.kind {
            SubscriptionKind::Clock { id, timeout, flags, .. } => {
                assert_eq!(id, ClockId::Monotonic);
                assert_eq!(timeout, 1_000);
                assert!(flags.contains(Subclockflags::ABSTIME));
            }
            _ => panic!("expected clock subscription"),
        }
    }

    #[test]
    fn subscription_decode_fd_read() {
        let mut buf = [0u8; SUBSCRIPTION_SIZE];
        buf[8] = 1; // fd_read
        buf[16..20].copy_from_slice(&7u32.to_le_bytes());
        let sub = Subscription::from_bytes(&buf).unwrap();
        match sub.kind {
            SubscriptionKind::FdRead { fd } => assert_eq!(fd, 7),
            _ => panic!("expected fd_read subscription"),
        }
    }

    #[test]
    fn subscription_decode_rejects_bad_tag() {
        let mut buf = [0u8; SUBSCRIPTION_SIZE];
        buf[8] = 9;
        assert_eq!(Subscription::from_bytes(&buf).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn event_layout() {
        let ev = Event {
            userdata: 0x1122,
            errno: Errno::BadF,
            kind: Eventtype::FdRead,
            nbytes: 10,
            flags: Eventrwflags::HANGUP,
        };
        let buf = ev.to_bytes();
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 0x1122);
        assert_eq!(u16::from_le_bytes(buf[8..10].try_into().unwrap()), 8);
        assert_eq!(buf[10], 1);
        assert_eq!(u64::from_le_bytes(buf[16..24].try_into().unwrap()), 10);
        assert_eq!(u16::from_le_bytes(buf[24..26].try_into().unwrap()), 1);
    }
}
