//! Resumable directory enumeration over a host `DIR*` stream.
//!
//! Offsets handed to the caller are `telldir() + 1`. The caller treats offset
//! 0 as "start from the beginning", and some hosts report 0 as the first
//! position, so the shift is applied on every report and undone on every
//! seek.

use std::ffi::{CStr, OsStr, OsString};
use std::io;
use std::ops::ControlFlow;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use tracing::trace;

use super::attr::{self, AttrRecord};
use super::passthrough::path_to_cstring;

/// One entry produced by [`DirStream::enumerate`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    /// File type bits only (`d_type << 12`).
    pub mode: u32,
    pub name: OsString,
    /// Offset to resume from to continue after this entry.
    pub offset: u64,
    /// Full attributes, present only for "plus" enumeration when the
    /// lookup succeeded.
    pub attr: Option<AttrRecord>,
}

impl DirEntry {
    pub fn kind(&self) -> fuser::FileType {
        super::passthrough::mode_to_filetype(self.mode)
    }
}

#[derive(Debug, Clone)]
struct RawEntry {
    ino: u64,
    d_type: u8,
    name: OsString,
}

/// A directory stream owned by a single open-directory handle.
pub struct DirStream {
    dp: NonNull<libc::DIR>,
    /// Last offset the caller accepted. 0 until the first entry is consumed.
    offset: u64,
    /// Entry read from the host but refused by the caller.
    pending: Option<RawEntry>,
    /// Directory path relative to the source root.
    rel: PathBuf,
}

// The DIR pointer is only touched through `&mut self`, and the stream is
// owned by exactly one handle.
unsafe impl Send for DirStream {}

impl DirStream {
    /// Open `path` for enumeration. `rel` is kept for the caller's
    /// bookkeeping.
    pub fn open(path: &Path, rel: PathBuf) -> io::Result<Self> {
        let c_path = path_to_cstring(path)?;
        let dp = unsafe { libc::opendir(c_path.as_ptr()) };
        let dp = NonNull::new(dp).ok_or_else(io::Error::last_os_error)?;
        Ok(Self {
            dp,
            offset: 0,
            pending: None,
            rel,
        })
    }

    pub fn rel_path(&self) -> &Path {
        &self.rel
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn fd(&self) -> RawFd {
        unsafe { libc::dirfd(self.dp.as_ptr()) }
    }

    /// Stream entries starting at `resume_offset` into `emit` until the
    /// directory is exhausted or `emit` breaks.
    ///
    /// `resume_offset` is 0 to restart, or an offset previously carried by a
    /// [`DirEntry`]. Reaching the end of the directory is not an error.
    pub fn enumerate<F>(&mut self, resume_offset: u64, plus: bool, mut emit: F) -> io::Result<()>
    where
        F: FnMut(&DirEntry) -> ControlFlow<()>,
    {
        if resume_offset == 0 {
            unsafe { libc::rewinddir(self.dp.as_ptr()) };
            self.pending = None;
            self.offset = 0;
        } else if resume_offset != self.offset {
            trace!("seekdir {} -> {}", self.offset, resume_offset);
            unsafe { libc::seekdir(self.dp.as_ptr(), resume_offset.wrapping_sub(1) as _) };
            self.pending = None;
            self.offset = resume_offset;
        }

        loop {
            let raw = match self.pending.take() {
                Some(raw) => raw,
                None => match self.read_entry()? {
                    Some(raw) => raw,
                    None => return Ok(()),
                },
            };

            let pos = unsafe { libc::telldir(self.dp.as_ptr()) };
            let next = (pos as u64).wrapping_add(1);
            let entry = self.build_entry(&raw, next, plus);

            match emit(&entry) {
                ControlFlow::Continue(()) => self.offset = next,
                ControlFlow::Break(()) => {
                    self.pending = Some(raw);
                    return Ok(());
                }
            }
        }
    }

    fn read_entry(&mut self) -> io::Result<Option<RawEntry>> {
        // readdir signals errors only through errno, so clear it first.
        nix::errno::Errno::clear();
        let ent = unsafe { libc::readdir(self.dp.as_ptr()) };
        if ent.is_null() {
            let errno = nix::errno::Errno::last_raw();
            return if errno == 0 {
                Ok(None)
            } else {
                Err(io::Error::from_raw_os_error(errno))
            };
        }
        let ent = unsafe { &*ent };
        let name = unsafe { CStr::from_ptr(ent.d_name.as_ptr()) };
        Ok(Some(RawEntry {
            ino: ent.d_ino as u64,
            d_type: ent.d_type,
            name: OsStr::from_bytes(name.to_bytes()).to_os_string(),
        }))
    }

    fn build_entry(&self, raw: &RawEntry, offset: u64, plus: bool) -> DirEntry {
        let attr = if plus {
            match CStr::from_bytes_with_nul(&[raw.name.as_bytes(), b"\0"].concat()) {
                Ok(name) => attr::query_at(self.fd(), name).ok(),
                Err(_) => None,
            }
        } else {
            None
        };
        DirEntry {
            ino: attr.map_or(raw.ino, |a| a.ino),
            mode: attr.map_or((raw.d_type as u32) << 12, |a| a.mode),
            name: raw.name.clone(),
            offset,
            attr,
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.dp.as_ptr());
        }
    }
}

impl std::fmt::Debug for DirStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStream")
            .field("rel", &self.rel)
            .field("offset", &self.offset)
            .field("pending", &self.pending.as_ref().map(|e| &e.name))
            .finish()
    }
}
