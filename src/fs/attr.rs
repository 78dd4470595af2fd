//! Host status records to FUSE attribute records.
//!
//! The status query itself is the authoritative part; creation and backup
//! times come from a separate host call and are zero-filled when the host
//! cannot supply them.

use std::ffi::CStr;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType, INodeNo};
use tracing::trace;

use super::passthrough::{fstatat, mode_to_filetype, stat_target, system_time_from_parts, Target};

/// Snapshot of a filesystem object's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRecord {
    pub ino: u64,
    /// File type and permission bits, as in `st_mode`.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: u64,
    pub blocks: u64,
    /// Always 0 so the kernel falls back to the mount-wide I/O size.
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub bkuptime: SystemTime,
    pub flags: u32,
}

/// Creation and backup timestamps. `UNIX_EPOCH` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XTimes {
    pub crtime: SystemTime,
    pub bkuptime: SystemTime,
}

impl XTimes {
    pub const ZERO: XTimes = XTimes {
        crtime: UNIX_EPOCH,
        bkuptime: UNIX_EPOCH,
    };
}

/// Where a status lookup is resolved.
#[derive(Debug, Clone, Copy)]
enum Lookup<'a> {
    Target(Target<'a>),
    At(RawFd, &'a CStr),
}

impl AttrRecord {
    fn from_stat(st: &libc::stat, xtimes: XTimes) -> Self {
        AttrRecord {
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u32,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as u32,
            size: st.st_size as u64,
            blocks: st.st_blocks as u64,
            blksize: 0,
            atime: system_time_from_parts(st.st_atime as i64, st.st_atime_nsec as i64),
            mtime: system_time_from_parts(st.st_mtime as i64, st.st_mtime_nsec as i64),
            ctime: system_time_from_parts(st.st_ctime as i64, st.st_ctime_nsec as i64),
            crtime: xtimes.crtime,
            bkuptime: xtimes.bkuptime,
            flags: stat_flags(st),
        }
    }

    pub fn kind(&self) -> FileType {
        mode_to_filetype(self.mode)
    }

    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    pub fn to_file_attr(&self) -> FileAttr {
        FileAttr {
            ino: INodeNo(self.ino),
            size: self.size,
            blocks: self.blocks,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
            kind: self.kind(),
            perm: self.perm(),
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: self.flags,
        }
    }
}

/// Query attributes by handle (`fstat`) or by path (`lstat`), enriched with
/// creation and backup times when available.
pub fn query(target: Target<'_>) -> io::Result<AttrRecord> {
    let st = stat_target(target)?;
    Ok(AttrRecord::from_stat(&st, xtimes_or_zero(Lookup::Target(target))))
}

/// Query attributes of `name` inside the directory open as `dirfd`.
pub fn query_at(dirfd: RawFd, name: &CStr) -> io::Result<AttrRecord> {
    let st = fstatat(dirfd, name)?;
    Ok(AttrRecord::from_stat(&st, xtimes_or_zero(Lookup::At(dirfd, name))))
}

/// Creation and backup times alone, zero-filled on failure.
pub fn xtimes(target: Target<'_>) -> XTimes {
    xtimes_or_zero(Lookup::Target(target))
}

fn xtimes_or_zero(lookup: Lookup<'_>) -> XTimes {
    match fetch_xtimes(lookup) {
        Ok(x) => x,
        Err(e) => {
            trace!("extended times unavailable: {}", e);
            XTimes::ZERO
        }
    }
}

#[cfg(target_os = "macos")]
fn stat_flags(st: &libc::stat) -> u32 {
    st.st_flags
}

#[cfg(not(target_os = "macos"))]
fn stat_flags(_st: &libc::stat) -> u32 {
    0
}

#[cfg(target_os = "macos")]
fn fetch_xtimes(lookup: Lookup<'_>) -> io::Result<XTimes> {
    use super::passthrough::{check, path_to_cstring};

    #[repr(C, packed(4))]
    struct XTimesBuf {
        length: u32,
        crtime: libc::timespec,
        bkuptime: libc::timespec,
    }

    let mut attrs = libc::attrlist {
        bitmapcount: libc::ATTR_BIT_MAP_COUNT,
        reserved: 0,
        commonattr: libc::ATTR_CMN_CRTIME | libc::ATTR_CMN_BKUPTIME,
        volattr: 0,
        dirattr: 0,
        fileattr: 0,
        forkattr: 0,
    };
    let mut buf: XTimesBuf = unsafe { std::mem::zeroed() };
    let attrs_ptr = &mut attrs as *mut libc::attrlist as *mut libc::c_void;
    let buf_ptr = &mut buf as *mut XTimesBuf as *mut libc::c_void;
    let buf_len = std::mem::size_of::<XTimesBuf>();

    let rc = match lookup {
        Lookup::Target(Target::Handle(fd)) => unsafe {
            libc::fgetattrlist(fd, attrs_ptr, buf_ptr, buf_len, 0)
        },
        Lookup::Target(Target::Path(p)) => {
            let c_path = path_to_cstring(p)?;
            unsafe {
                libc::getattrlist(
                    c_path.as_ptr(),
                    attrs_ptr,
                    buf_ptr,
                    buf_len,
                    libc::FSOPT_NOFOLLOW as _,
                )
            }
        }
        Lookup::At(dirfd, name) => unsafe {
            libc::getattrlistat(
                dirfd,
                name.as_ptr(),
                attrs_ptr,
                buf_ptr,
                buf_len,
                libc::FSOPT_NOFOLLOW as _,
            )
        },
    };
    check(rc)?;

    let crtime = buf.crtime;
    let bkuptime = buf.bkuptime;
    Ok(XTimes {
        crtime: system_time_from_parts(crtime.tv_sec as i64, crtime.tv_nsec as i64),
        bkuptime: system_time_from_parts(bkuptime.tv_sec as i64, bkuptime.tv_nsec as i64),
    })
}

/// Linux has creation time through statx but no backup time.
#[cfg(target_os = "linux")]
fn fetch_xtimes(lookup: Lookup<'_>) -> io::Result<XTimes> {
    use super::passthrough::{check, path_to_cstring};

    let empty = c"";
    let owned;
    let (dirfd, name, flags) = match lookup {
        Lookup::Target(Target::Handle(fd)) => (fd, empty, libc::AT_EMPTY_PATH),
        Lookup::Target(Target::Path(p)) => {
            owned = path_to_cstring(p)?;
            (libc::AT_FDCWD, owned.as_c_str(), libc::AT_SYMLINK_NOFOLLOW)
        }
        Lookup::At(dirfd, name) => (dirfd, name, libc::AT_SYMLINK_NOFOLLOW),
    };

    let mut stx: libc::statx = unsafe { std::mem::zeroed() };
    check(unsafe { libc::statx(dirfd, name.as_ptr(), flags, libc::STATX_BTIME, &mut stx) })?;

    if stx.stx_mask & libc::STATX_BTIME == 0 {
        return Err(io::Error::from_raw_os_error(libc::ENOTSUP));
    }
    Ok(XTimes {
        crtime: system_time_from_parts(stx.stx_btime.tv_sec, stx.stx_btime.tv_nsec as i64),
        bkuptime: UNIX_EPOCH,
    })
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn fetch_xtimes(_lookup: Lookup<'_>) -> io::Result<XTimes> {
    Err(io::Error::from_raw_os_error(libc::ENOTSUP))
}
