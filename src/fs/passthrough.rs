/// Host-call helpers shared by the translation components.
/// These convert between Rust and libc types and wrap the raw calls.
use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Either a path (resolved without following a final symlink) or an already
/// open descriptor.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Path(&'a Path),
    Handle(RawFd),
}

/// Signed status for the result of an operation: 0 on success, the negated
/// host errno on failure.
pub fn status<T>(res: &io::Result<T>) -> i32 {
    match res {
        Ok(_) => 0,
        Err(e) => -e.raw_os_error().unwrap_or(libc::EIO),
    }
}

/// Map a libc return code to `io::Result`.
pub(crate) fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Map a libc ssize_t return to a byte count.
pub(crate) fn check_len(rc: libc::ssize_t) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

pub fn path_to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))
}

pub fn bytes_to_cstring(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains null byte"))
}

/// Perform lstat() on a path.
pub fn lstat(path: &Path) -> io::Result<libc::stat> {
    let c_path = path_to_cstring(path)?;
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        check(libc::lstat(c_path.as_ptr(), &mut st))?;
        Ok(st)
    }
}

/// Perform fstat() on a file descriptor.
pub fn fstat(fd: RawFd) -> io::Result<libc::stat> {
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        check(libc::fstat(fd, &mut st))?;
        Ok(st)
    }
}

/// Perform fstatat() relative to `dirfd`, not following a final symlink.
pub fn fstatat(dirfd: RawFd, name: &CStr) -> io::Result<libc::stat> {
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        check(libc::fstatat(
            dirfd,
            name.as_ptr(),
            &mut st,
            libc::AT_SYMLINK_NOFOLLOW,
        ))?;
        Ok(st)
    }
}

pub fn stat_target(target: Target<'_>) -> io::Result<libc::stat> {
    match target {
        Target::Path(p) => lstat(p),
        Target::Handle(fd) => fstat(fd),
    }
}

pub fn system_time_from_parts(sec: i64, nsec: i64) -> SystemTime {
    if sec >= 0 {
        UNIX_EPOCH + Duration::new(sec as u64, nsec as u32)
    } else {
        UNIX_EPOCH
    }
}

pub fn timespec_from_system_time(t: SystemTime) -> libc::timespec {
    let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

pub fn mode_to_filetype(mode: u32) -> fuser::FileType {
    let fmt = mode & (libc::S_IFMT as u32);
    match fmt {
        x if x == libc::S_IFREG as u32 => fuser::FileType::RegularFile,
        x if x == libc::S_IFDIR as u32 => fuser::FileType::Directory,
        x if x == libc::S_IFLNK as u32 => fuser::FileType::Symlink,
        x if x == libc::S_IFBLK as u32 => fuser::FileType::BlockDevice,
        x if x == libc::S_IFCHR as u32 => fuser::FileType::CharDevice,
        x if x == libc::S_IFIFO as u32 => fuser::FileType::NamedPipe,
        x if x == libc::S_IFSOCK as u32 => fuser::FileType::Socket,
        _ => fuser::FileType::RegularFile,
    }
}
