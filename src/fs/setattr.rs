//! Combined attribute updates.
//!
//! Fields are applied in a fixed order and the first failure stops the
//! update. Earlier fields are not rolled back.

use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::error::{AttrField, SetattrError};

use super::passthrough::{check, path_to_cstring, timespec_from_system_time, Target};

/// Requested attribute changes. `None` leaves the attribute untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrUpdate {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub atime: Option<SystemTime>,
    pub chgtime: Option<SystemTime>,
    pub crtime: Option<SystemTime>,
    pub bkuptime: Option<SystemTime>,
    pub flags: Option<u32>,
}

impl AttrUpdate {
    pub fn is_empty(&self) -> bool {
        *self == AttrUpdate::default()
    }

    /// The step that runs first for this update.
    pub fn first_field(&self) -> AttrField {
        if self.mode.is_some() {
            AttrField::Mode
        } else if self.uid.is_some() || self.gid.is_some() {
            AttrField::Owner
        } else if self.size.is_some() {
            AttrField::Size
        } else if self.mtime.is_some() || self.atime.is_some() {
            AttrField::Times
        } else if self.chgtime.is_some() {
            AttrField::ChangeTime
        } else if self.crtime.is_some() {
            AttrField::CreationTime
        } else if self.bkuptime.is_some() {
            AttrField::BackupTime
        } else {
            AttrField::Flags
        }
    }
}

/// Apply `update` to `target`.
pub fn apply(target: Target<'_>, update: &AttrUpdate) -> Result<(), SetattrError> {
    let target = Resolved::new(target).map_err(|e| SetattrError::new(update.first_field(), e))?;

    if let Some(mode) = update.mode {
        step(AttrField::Mode, target.chmod(mode))?;
    }

    if update.uid.is_some() || update.gid.is_some() {
        // -1 leaves that id unchanged.
        let uid = update.uid.unwrap_or(u32::MAX);
        let gid = update.gid.unwrap_or(u32::MAX);
        step(AttrField::Owner, target.chown(uid, gid))?;
    }

    if let Some(size) = update.size {
        step(AttrField::Size, target.truncate(size))?;
    }

    if update.mtime.is_some() || update.atime.is_some() {
        let atime = match (update.atime, update.mtime) {
            (Some(a), _) => Some(a),
            (None, Some(_)) => Some(SystemTime::now()),
            (None, None) => None,
        };
        step(AttrField::Times, target.utimes(atime, update.mtime))?;
    }

    if let Some(t) = update.chgtime {
        step(AttrField::ChangeTime, target.set_xtime(XTime::Change, t))?;
    }
    if let Some(t) = update.crtime {
        step(AttrField::CreationTime, target.set_xtime(XTime::Creation, t))?;
    }
    if let Some(t) = update.bkuptime {
        step(AttrField::BackupTime, target.set_xtime(XTime::Backup, t))?;
    }

    if let Some(flags) = update.flags {
        step(AttrField::Flags, target.chflags(flags))?;
    }

    Ok(())
}

fn step(field: AttrField, res: io::Result<()>) -> Result<(), SetattrError> {
    res.map_err(|e| {
        debug!("setattr stopped at {}: {}", field, e);
        SetattrError::new(field, e)
    })
}

#[derive(Debug, Clone, Copy)]
enum XTime {
    Change,
    Creation,
    Backup,
}

/// A target with its path already converted for libc.
enum Resolved<'a> {
    Path(&'a Path, std::ffi::CString),
    Handle(RawFd),
}

impl<'a> Resolved<'a> {
    fn new(target: Target<'a>) -> io::Result<Self> {
        Ok(match target {
            Target::Path(p) => Resolved::Path(p, path_to_cstring(p)?),
            Target::Handle(fd) => Resolved::Handle(fd),
        })
    }

    fn chmod(&self, mode: u32) -> io::Result<()> {
        match self {
            Resolved::Handle(fd) => check(unsafe { libc::fchmod(*fd, mode as libc::mode_t) }),
            Resolved::Path(p, c) => lchmod(p, c, mode),
        }
    }

    fn chown(&self, uid: u32, gid: u32) -> io::Result<()> {
        check(unsafe {
            match self {
                Resolved::Handle(fd) => libc::fchown(*fd, uid, gid),
                Resolved::Path(_, c) => libc::lchown(c.as_ptr(), uid, gid),
            }
        })
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        check(unsafe {
            match self {
                Resolved::Handle(fd) => libc::ftruncate(*fd, size as libc::off_t),
                Resolved::Path(_, c) => libc::truncate(c.as_ptr(), size as libc::off_t),
            }
        })
    }

    fn utimes(&self, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> io::Result<()> {
        let spec = |t: Option<SystemTime>| match t {
            Some(t) => timespec_from_system_time(t),
            None => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
        };
        let times = [spec(atime), spec(mtime)];
        check(unsafe {
            match self {
                Resolved::Handle(fd) => libc::futimens(*fd, times.as_ptr()),
                Resolved::Path(_, c) => libc::utimensat(
                    libc::AT_FDCWD,
                    c.as_ptr(),
                    times.as_ptr(),
                    libc::AT_SYMLINK_NOFOLLOW,
                ),
            }
        })
    }

    #[cfg(target_os = "macos")]
    fn set_xtime(&self, which: XTime, t: SystemTime) -> io::Result<()> {
        let commonattr = match which {
            XTime::Change => libc::ATTR_CMN_CHGTIME,
            XTime::Creation => libc::ATTR_CMN_CRTIME,
            XTime::Backup => libc::ATTR_CMN_BKUPTIME,
        };
        let mut attrs = libc::attrlist {
            bitmapcount: libc::ATTR_BIT_MAP_COUNT,
            reserved: 0,
            commonattr,
            volattr: 0,
            dirattr: 0,
            fileattr: 0,
            forkattr: 0,
        };
        let mut ts = timespec_from_system_time(t);
        let attrs_ptr = &mut attrs as *mut libc::attrlist as *mut libc::c_void;
        let ts_ptr = &mut ts as *mut libc::timespec as *mut libc::c_void;
        let len = std::mem::size_of::<libc::timespec>();
        check(unsafe {
            match self {
                Resolved::Handle(fd) => {
                    libc::fsetattrlist(*fd, attrs_ptr, ts_ptr, len, libc::FSOPT_NOFOLLOW as _)
                }
                Resolved::Path(_, c) => {
                    libc::setattrlist(c.as_ptr(), attrs_ptr, ts_ptr, len, libc::FSOPT_NOFOLLOW as _)
                }
            }
        })
    }

    /// The kernel advances ctime on every metadata change and keeps no
    /// settable creation or backup time.
    #[cfg(not(target_os = "macos"))]
    fn set_xtime(&self, which: XTime, _t: SystemTime) -> io::Result<()> {
        match which {
            XTime::Change => Ok(()),
            XTime::Creation | XTime::Backup => Err(io::Error::from_raw_os_error(libc::ENOTSUP)),
        }
    }

    #[cfg(target_os = "macos")]
    fn chflags(&self, flags: u32) -> io::Result<()> {
        check(unsafe {
            match self {
                Resolved::Handle(fd) => libc::fchflags(*fd, flags as _),
                Resolved::Path(_, c) => libc::lchflags(c.as_ptr(), flags as _),
            }
        })
    }

    #[cfg(not(target_os = "macos"))]
    fn chflags(&self, _flags: u32) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::ENOTSUP))
    }
}

#[cfg(target_os = "macos")]
fn lchmod(_path: &Path, c_path: &std::ffi::CStr, mode: u32) -> io::Result<()> {
    check(unsafe { libc::lchmod(c_path.as_ptr(), mode as libc::mode_t) })
}

/// Linux symlinks carry no mode of their own.
#[cfg(not(target_os = "macos"))]
fn lchmod(path: &Path, c_path: &std::ffi::CStr, mode: u32) -> io::Result<()> {
    let st = super::passthrough::lstat(path)?;
    if st.st_mode & libc::S_IFMT == libc::S_IFLNK {
        return Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP));
    }
    check(unsafe { libc::chmod(c_path.as_ptr(), mode as libc::mode_t) })
}
