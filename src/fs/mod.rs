pub mod attr;
pub mod dirstream;
pub mod handles;
pub mod inodes;
pub mod passthrough;
pub mod prealloc;
pub mod setattr;
pub mod statfs;
pub mod xattr;

use std::ffi::OsStr;
use std::io;
use std::ops::ControlFlow;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileAttr, FileHandle, Filesystem, FopenFlags, Generation,
    INodeNo, KernelConfig, LockOwner, OpenFlags, RenameFlags, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs,
    ReplyWrite, ReplyXattr, Request, TimeOrNow, WriteFlags,
};
use tracing::{debug, info, warn};

use self::attr::AttrRecord;
use self::dirstream::{DirEntry, DirStream};
use self::handles::{DirHandleTable, HandleTable};
use self::inodes::{InodeTable, ROOT_INO};
use self::passthrough::{check, path_to_cstring, Target};
use self::setattr::AttrUpdate;
use self::statfs::VolumeStats;
use self::xattr::XattrMapper;
use crate::config::FsOptions;

const TTL: Duration = Duration::from_secs(1);

pub struct LoopbackFs {
    /// The mirrored directory root.
    pub source: PathBuf,
    pub options: FsOptions,
    /// Inode table mapping inodes <-> paths (relative to the source root).
    pub inodes: InodeTable,
    /// File handle table.
    pub file_handles: Arc<HandleTable>,
    /// Directory handle table.
    pub dir_handles: DirHandleTable,
    pub xattrs: XattrMapper,
}

impl LoopbackFs {
    pub fn new(source: PathBuf, options: FsOptions) -> Self {
        Self {
            source,
            options,
            inodes: InodeTable::new(),
            file_handles: Arc::new(HandleTable::new()),
            dir_handles: DirHandleTable::new(),
            xattrs: XattrMapper::default(),
        }
    }

    /// Convert a relative path (from inode table) to full source path.
    fn source_path(&self, rel: &Path) -> PathBuf {
        self.source.join(rel)
    }

    /// Relative and full path of a known inode.
    fn paths_of(&self, ino: INodeNo) -> Result<(PathBuf, PathBuf), Errno> {
        let ino = u64::from(ino);
        let rel = self.inodes.get_path(ino).ok_or(Errno::ENOENT)?;
        let full = self.source_path(&rel);
        Ok((rel, full))
    }

    /// Relative and full path of `name` inside directory `parent`.
    fn child_paths(&self, parent: INodeNo, name: &OsStr) -> Result<(PathBuf, PathBuf), Errno> {
        let (parent_rel, _) = self.paths_of(parent)?;
        let rel = parent_rel.join(name);
        let full = self.source_path(&rel);
        Ok((rel, full))
    }

    /// Descriptor for an open file handle, if the kernel supplied one.
    fn handle_fd(&self, fh: Option<FileHandle>) -> Option<i32> {
        fh.and_then(|fh| self.file_handles.fd(u64::from(fh)))
    }

    /// Attributes as reported for `ino`; the root always carries inode 1.
    fn file_attr(rec: &AttrRecord, ino: u64) -> FileAttr {
        let mut attr = rec.to_file_attr();
        attr.ino = INodeNo(ino);
        attr
    }

    /// Stat a path and register in inode table.
    fn lookup_and_register(&self, rel: &Path, full: &Path) -> io::Result<FileAttr> {
        let rec = attr::query(Target::Path(full))?;
        if rel.as_os_str().is_empty() {
            return Ok(Self::file_attr(&rec, ROOT_INO));
        }
        self.inodes.insert(rec.ino, rel.to_path_buf());
        Ok(rec.to_file_attr())
    }

    fn reply_entry(&self, rel: &Path, full: &Path, reply: ReplyEntry) {
        match self.lookup_and_register(rel, full) {
            Ok(attr) => reply.entry(&TTL, &attr, Generation(0)),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    /// Preallocate on behalf of open handle `fh`.
    pub fn allocate(&self, fh: u64, mode: i32, offset: u64, length: u64) -> io::Result<()> {
        let fd = self
            .file_handles
            .fd(fh)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        prealloc::preallocate(fd, mode, offset, length)
    }

    /// Register the inode of a "plus" entry so later requests can resolve it.
    fn register_entry(&self, dir_rel: &Path, entry: &DirEntry) {
        let name = entry.name.as_bytes();
        if name == b"." || name == b".." {
            return;
        }
        self.inodes.insert(entry.ino, dir_rel.join(&entry.name));
    }
}

fn time_or_now(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(st) => st,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Attributes for a "plus" entry whose lookup failed. Zero TTLs make the
/// kernel look the name up again before trusting them.
fn placeholder_attr(entry: &DirEntry) -> FileAttr {
    FileAttr {
        ino: INodeNo(entry.ino),
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: entry.kind(),
        perm: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 0,
        flags: 0,
    }
}

#[cfg(target_os = "linux")]
fn rename_with_flags(from: &std::ffi::CStr, to: &std::ffi::CStr, flags: u32) -> io::Result<()> {
    check(unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            from.as_ptr(),
            libc::AT_FDCWD,
            to.as_ptr(),
            flags as libc::c_uint,
        )
    })
}

#[cfg(target_os = "macos")]
fn rename_with_flags(from: &std::ffi::CStr, to: &std::ffi::CStr, flags: u32) -> io::Result<()> {
    check(unsafe { libc::renamex_np(from.as_ptr(), to.as_ptr(), flags as libc::c_uint) })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn rename_with_flags(_from: &std::ffi::CStr, _to: &std::ffi::CStr, _flags: u32) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::EINVAL))
}

impl Filesystem for LoopbackFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::io::Result<()> {
        info!(
            "loopfs initialized, source={}, fsblocksize={}",
            self.source.display(),
            self.options.block_size()
        );
        if self.options.case_insensitive() {
            warn!("case-insensitive lookups requested but not advertised by this session; ignoring");
        }
        Ok(())
    }

    fn destroy(&mut self) {
        info!("loopfs shutting down");
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", u64::from(parent), name);
        match self.child_paths(parent, name) {
            Ok((rel, full)) => self.reply_entry(&rel, &full, reply),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, fh: Option<FileHandle>, reply: ReplyAttr) {
        debug!("getattr(ino={})", u64::from(ino));
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let target = match self.handle_fd(fh) {
            Some(fd) => Target::Handle(fd),
            None => Target::Path(&full),
        };
        match attr::query(target) {
            Ok(rec) => reply.attr(&TTL, &Self::file_attr(&rec, u64::from(ino))),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<FileHandle>,
        crtime: Option<SystemTime>,
        chgtime: Option<SystemTime>,
        bkuptime: Option<SystemTime>,
        flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        debug!("setattr(ino={})", u64::from(ino));

        let (rel, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let target = match self.handle_fd(fh) {
            Some(fd) => Target::Handle(fd),
            None => Target::Path(&full),
        };

        let update = AttrUpdate {
            mode,
            uid,
            gid,
            size,
            mtime: mtime.map(time_or_now),
            atime: atime.map(time_or_now),
            chgtime: chgtime.or(ctime),
            crtime,
            bkuptime,
            flags: flags.map(|f| f.bits()),
        };

        if let Err(e) = setattr::apply(target, &update) {
            warn!("setattr on {} stopped at {}: {}", rel.display(), e.field, e.source);
            reply.error(Errno::from(e.source));
            return;
        }

        match attr::query(target) {
            Ok(rec) => reply.attr(&TTL, &Self::file_attr(&rec, u64::from(ino))),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
        debug!("readlink(ino={})", u64::from(ino));
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match std::fs::read_link(&full) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn mknod(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);
        let (rel, full) = match self.child_paths(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        let is_fifo = mode & (libc::S_IFMT as u32) == libc::S_IFIFO as u32;
        let rc = unsafe {
            if is_fifo {
                libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t)
            } else {
                libc::mknod(c_path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t)
            }
        };
        if let Err(e) = check(rc) {
            reply.error(Errno::from(e));
            return;
        }
        self.reply_entry(&rel, &full, reply);
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);
        let (rel, full) = match self.child_paths(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        if let Err(e) = check(unsafe { libc::mkdir(c_path.as_ptr(), mode as libc::mode_t) }) {
            reply.error(Errno::from(e));
            return;
        }
        self.reply_entry(&rel, &full, reply);
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", u64::from(parent), name);
        let (rel, full) = match self.child_paths(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        if let Err(e) = check(unsafe { libc::unlink(c_path.as_ptr()) }) {
            reply.error(Errno::from(e));
            return;
        }
        self.inodes.remove_by_path(&rel);
        reply.ok();
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", u64::from(parent), name);
        let (rel, full) = match self.child_paths(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        if let Err(e) = check(unsafe { libc::rmdir(c_path.as_ptr()) }) {
            reply.error(Errno::from(e));
            return;
        }
        self.inodes.remove_by_path(&rel);
        reply.ok();
    }

    fn symlink(
        &self,
        _req: &Request,
        parent: INodeNo,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!("symlink(parent={}, name={:?}, target={:?})", u64::from(parent), link_name, target);
        let (rel, full) = match self.child_paths(parent, link_name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let (c_target, c_link) = match (path_to_cstring(target), path_to_cstring(&full)) {
            (Ok(t), Ok(l)) => (t, l),
            _ => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        if let Err(e) = check(unsafe { libc::symlink(c_target.as_ptr(), c_link.as_ptr()) }) {
            reply.error(Errno::from(e));
            return;
        }
        self.reply_entry(&rel, &full, reply);
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            u64::from(parent),
            name,
            u64::from(newparent),
            newname
        );
        let paths = self
            .child_paths(parent, name)
            .and_then(|old| self.child_paths(newparent, newname).map(|new| (old, new)));
        let ((old_rel, old_full), (new_rel, new_full)) = match paths {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let (old_c, new_c) = match (path_to_cstring(&old_full), path_to_cstring(&new_full)) {
            (Ok(o), Ok(n)) => (o, n),
            _ => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        let raw_flags = flags.bits() as u32;
        let res = if raw_flags == 0 {
            check(unsafe { libc::rename(old_c.as_ptr(), new_c.as_ptr()) })
        } else {
            rename_with_flags(&old_c, &new_c, raw_flags)
        };
        if let Err(e) = res {
            reply.error(Errno::from(e));
            return;
        }

        self.inodes.rename(&old_rel, &new_rel);
        reply.ok();
    }

    fn link(
        &self,
        _req: &Request,
        ino: INodeNo,
        newparent: INodeNo,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", u64::from(ino), u64::from(newparent), newname);
        let paths = self
            .paths_of(ino)
            .and_then(|old| self.child_paths(newparent, newname).map(|new| (old, new)));
        let ((_, old_full), (new_rel, new_full)) = match paths {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let (old_c, new_c) = match (path_to_cstring(&old_full), path_to_cstring(&new_full)) {
            (Ok(o), Ok(n)) => (o, n),
            _ => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        if let Err(e) = check(unsafe { libc::link(old_c.as_ptr(), new_c.as_ptr()) }) {
            reply.error(Errno::from(e));
            return;
        }
        self.reply_entry(&new_rel, &new_full, reply);
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let raw_flags = flags.0;
        debug!("open(ino={}, flags={:#x})", u64::from(ino), raw_flags);

        let (rel, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        let fd = unsafe { libc::open(c_path.as_ptr(), raw_flags) };
        if fd < 0 {
            reply.error(Errno::from(io::Error::last_os_error()));
            return;
        }

        let fh = self.file_handles.alloc(fd, rel, raw_flags);
        reply.opened(FileHandle(fh), FopenFlags::empty());
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);
        let (rel, full) = match self.child_paths(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        let fd = unsafe { libc::open(c_path.as_ptr(), flags | libc::O_CREAT, mode as libc::c_uint) };
        if fd < 0 {
            reply.error(Errno::from(io::Error::last_os_error()));
            return;
        }

        let rec = match attr::query(Target::Handle(fd)) {
            Ok(rec) => rec,
            Err(e) => {
                unsafe {
                    libc::close(fd);
                }
                reply.error(Errno::from(e));
                return;
            }
        };
        self.inodes.insert(rec.ino, rel.clone());

        let fh = self.file_handles.alloc(fd, rel, flags);
        reply.created(&TTL, &rec.to_file_attr(), Generation(0), FileHandle(fh), FopenFlags::empty());
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let fh = u64::from(fh);
        debug!("read(ino={}, fh={}, offset={}, size={})", u64::from(ino), fh, offset, size);

        let fd = match self.file_handles.fd(fh) {
            Some(fd) => fd,
            None => {
                reply.error(Errno::EBADF);
                return;
            }
        };

        let mut buf = vec![0u8; size as usize];
        let n = unsafe {
            libc::pread(fd, buf.as_mut_ptr() as *mut libc::c_void, size as usize, offset as libc::off_t)
        };
        if n < 0 {
            reply.error(Errno::from(io::Error::last_os_error()));
        } else {
            buf.truncate(n as usize);
            reply.data(&buf);
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let fh = u64::from(fh);
        debug!("write(ino={}, fh={}, offset={}, size={})", u64::from(ino), fh, offset, data.len());

        let fd = match self.file_handles.fd(fh) {
            Some(fd) => fd,
            None => {
                reply.error(Errno::EBADF);
                return;
            }
        };

        let n = unsafe {
            libc::pwrite(fd, data.as_ptr() as *const libc::c_void, data.len(), offset as libc::off_t)
        };
        if n < 0 {
            reply.error(Errno::from(io::Error::last_os_error()));
        } else {
            reply.written(n as u32);
        }
    }

    fn flush(&self, _req: &Request, ino: INodeNo, fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("flush(ino={}, fh={})", u64::from(ino), fh);

        let fd = match self.file_handles.fd(fh) {
            Some(fd) => fd,
            None => {
                reply.error(Errno::EBADF);
                return;
            }
        };

        // Closing a duplicate reports deferred write errors without
        // releasing the handle.
        let dup = unsafe { libc::dup(fd) };
        let res = if dup < 0 {
            Err(io::Error::last_os_error())
        } else {
            check(unsafe { libc::close(dup) })
        };
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let fh = u64::from(fh);
        debug!("release(fh={})", fh);

        if let Some(handle) = self.file_handles.remove(fh) {
            unsafe {
                libc::close(handle.real_fd);
            }
        }
        reply.ok();
    }

    fn fsync(&self, _req: &Request, ino: INodeNo, fh: FileHandle, datasync: bool, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("fsync(ino={}, fh={}, datasync={})", u64::from(ino), fh, datasync);

        match self.file_handles.fd(fh) {
            Some(fd) => match check(unsafe { libc::fsync(fd) }) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(Errno::from(e)),
            },
            None => reply.error(Errno::EBADF),
        }
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        debug!("opendir(ino={})", u64::from(ino));

        let (rel, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        match DirStream::open(&full, rel) {
            Ok(stream) => {
                let fh = self.dir_handles.alloc(stream);
                reply.opened(FileHandle(fh), FopenFlags::empty());
            }
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let fh = u64::from(fh);
        debug!("readdir(ino={}, fh={}, offset={})", u64::from(ino), fh, offset);

        let stream = match self.dir_handles.get(fh) {
            Some(s) => s,
            None => {
                reply.error(Errno::EBADF);
                return;
            }
        };
        let mut stream = stream.lock();

        let res = stream.enumerate(offset, false, |entry| {
            if reply.add(INodeNo(entry.ino), entry.offset, entry.kind(), &entry.name) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn readdirplus(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectoryPlus,
    ) {
        let fh = u64::from(fh);
        debug!("readdirplus(ino={}, fh={}, offset={})", u64::from(ino), fh, offset);

        let stream = match self.dir_handles.get(fh) {
            Some(s) => s,
            None => {
                reply.error(Errno::EBADF);
                return;
            }
        };
        let mut stream = stream.lock();
        let dir_rel = stream.rel_path().to_path_buf();

        let res = stream.enumerate(offset, true, |entry| {
            let buffer_full = match &entry.attr {
                Some(rec) => {
                    self.register_entry(&dir_rel, entry);
                    reply.add(
                        INodeNo(entry.ino),
                        entry.offset,
                        &entry.name,
                        &TTL,
                        &rec.to_file_attr(),
                        Generation(0),
                    )
                }
                None => reply.add(
                    INodeNo(entry.ino),
                    entry.offset,
                    &entry.name,
                    &Duration::ZERO,
                    &placeholder_attr(entry),
                    Generation(0),
                ),
            };
            if buffer_full {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("releasedir(fh={})", fh);
        self.dir_handles.remove(fh);
        reply.ok();
    }

    fn statfs(&self, _req: &Request, ino: INodeNo, reply: ReplyStatfs) {
        debug!("statfs(ino={})", u64::from(ino));
        let full = match self.paths_of(ino) {
            Ok((_, full)) => full,
            Err(_) => self.source.clone(),
        };
        match VolumeStats::query(&full, self.options.block_size()) {
            Ok(st) => reply.statfs(
                st.blocks,
                st.blocks_free,
                st.blocks_available,
                st.files,
                st.files_free,
                st.block_size,
                st.name_max,
                st.fragment_size,
            ),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn setxattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr(ino={}, name={:?}, size={})", u64::from(ino), name, value.len());
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.xattrs.set(&full, name.as_bytes(), value, flags, position) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn getxattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?}, size={})", u64::from(ino), name, size);
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let mut buf = vec![0u8; size as usize];
        match self.xattrs.get(&full, name.as_bytes(), &mut buf, 0) {
            Ok(n) if size == 0 => reply.size(n as u32),
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn listxattr(&self, _req: &Request, ino: INodeNo, size: u32, reply: ReplyXattr) {
        debug!("listxattr(ino={}, size={})", u64::from(ino), size);
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        if size == 0 {
            match self.xattrs.list(&full, None) {
                Ok(n) => reply.size(n as u32),
                Err(e) => reply.error(Errno::from(e)),
            }
            return;
        }
        let mut buf = vec![0u8; size as usize];
        match self.xattrs.list(&full, Some(&mut buf)) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn removexattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr(ino={}, name={:?})", u64::from(ino), name);
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.xattrs.remove(&full, name.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={:?})", u64::from(ino), mask);
        let (_, full) = match self.paths_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let c_path = match path_to_cstring(&full) {
            Ok(p) => p,
            Err(_) => {
                reply.error(Errno::EINVAL);
                return;
            }
        };

        let mask = mask.bits() & (libc::F_OK | libc::R_OK | libc::W_OK | libc::X_OK);
        match check(unsafe { libc::access(c_path.as_ptr(), mask) }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    fn fallocate(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        length: u64,
        mode: i32,
        reply: ReplyEmpty,
    ) {
        let fh = u64::from(fh);
        debug!(
            "fallocate(ino={}, fh={}, offset={}, length={}, mode={:#x})",
            u64::from(ino),
            fh,
            offset,
            length,
            mode
        );
        match self.allocate(fh, mode, offset, length) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(e)),
        }
    }

    #[cfg(target_os = "macos")]
    fn getxtimes(&self, _req: &Request, ino: INodeNo, reply: fuser::ReplyXTimes) {
        debug!("getxtimes(ino={})", u64::from(ino));
        match self.paths_of(ino) {
            Ok((_, full)) => {
                let x = attr::xtimes(Target::Path(&full));
                reply.xtimes(x.bkuptime, x.crtime);
            }
            Err(e) => reply.error(e),
        }
    }
}
