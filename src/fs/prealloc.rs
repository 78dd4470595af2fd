//! Space preallocation requests.
//!
//! On macOS the request mode carries the Darwin allocation bits from
//! `sys/vnode.h`. The Linux kernel forwards `fallocate(2)` modes and offsets
//! unchanged, so they go straight back to the host.

use std::io;
use std::os::unix::io::RawFd;

use tracing::debug;

use super::passthrough::check;

pub const PREALLOCATE: i32 = 0x0000_0001;
pub const ALLOCATECONTIG: i32 = 0x0000_0002;
pub const ALLOCATEALL: i32 = 0x0000_0004;
pub const ALLOCATEFROMPEOF: i32 = 0x0000_0010;
pub const ALLOCATEFROMVOL: i32 = 0x0000_0020;

/// Where the requested range is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosMode {
    /// Relative to the physical end of file.
    EndOfFile,
    /// Relative to the start of the volume.
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreallocMode {
    /// Only contiguous space is acceptable.
    pub contiguous: bool,
    /// Allocate the whole range or nothing.
    pub all: bool,
    pub position: PosMode,
}

impl PreallocMode {
    /// Decode a raw request mode. Fails with ENOTSUP unless the
    /// preallocation bit is set.
    pub fn from_bits(mode: i32) -> io::Result<Self> {
        if mode & PREALLOCATE == 0 {
            return Err(io::Error::from_raw_os_error(libc::ENOTSUP));
        }
        let position = if mode & ALLOCATEFROMVOL != 0 && mode & ALLOCATEFROMPEOF == 0 {
            PosMode::Volume
        } else {
            PosMode::EndOfFile
        };
        Ok(Self {
            contiguous: mode & ALLOCATECONTIG != 0,
            all: mode & ALLOCATEALL != 0,
            position,
        })
    }
}

/// Reserve `length` bytes for the file open as `fd`.
#[cfg(target_os = "macos")]
pub fn preallocate(fd: RawFd, mode: i32, offset: u64, length: u64) -> io::Result<()> {
    let mode = PreallocMode::from_bits(mode)?;
    debug!("preallocate(fd={}, mode={:?}, offset={}, length={})", fd, mode, offset, length);
    host_preallocate(fd, mode, offset, length)
}

/// Run `fallocate(2)` for the file open as `fd`. `offset` is absolute and
/// `mode` is a set of `FALLOC_FL_*` flags.
#[cfg(target_os = "linux")]
pub fn preallocate(fd: RawFd, mode: i32, offset: u64, length: u64) -> io::Result<()> {
    debug!("fallocate(fd={}, mode={:#x}, offset={}, length={})", fd, mode, offset, length);
    check(unsafe { libc::fallocate(fd, mode, offset as libc::off_t, length as libc::off_t) })
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn preallocate(fd: RawFd, mode: i32, offset: u64, length: u64) -> io::Result<()> {
    let mode = PreallocMode::from_bits(mode)?;
    debug!("preallocate(fd={}, mode={:?}, offset={}, length={})", fd, mode, offset, length);
    Err(io::Error::from_raw_os_error(libc::ENOTSUP))
}

#[cfg(target_os = "macos")]
fn host_preallocate(fd: RawFd, mode: PreallocMode, offset: u64, length: u64) -> io::Result<()> {
    let mut flags = 0;
    if mode.contiguous {
        flags |= libc::F_ALLOCATECONTIG;
    }
    if mode.all {
        flags |= libc::F_ALLOCATEALL;
    }
    let mut store = libc::fstore_t {
        fst_flags: flags as _,
        fst_posmode: match mode.position {
            PosMode::EndOfFile => libc::F_PEOFPOSMODE,
            PosMode::Volume => libc::F_VOLPOSMODE,
        },
        fst_offset: offset as libc::off_t,
        fst_length: length as libc::off_t,
        fst_bytesalloc: 0,
    };
    check(unsafe { libc::fcntl(fd, libc::F_PREALLOCATE, &mut store as *mut libc::fstore_t) })
}
