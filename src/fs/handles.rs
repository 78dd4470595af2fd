use dashmap::DashMap;
use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::dirstream::DirStream;

#[derive(Debug, Clone)]
pub struct HandleState {
    /// The file handle ID handed to the kernel.
    pub fh: u64,
    /// The real file descriptor in the source tree.
    pub real_fd: RawFd,
    /// Path relative to the source root.
    pub path: PathBuf,
    /// Open flags.
    pub flags: i32,
}

/// Open files, keyed by the handle number given to the kernel.
pub struct HandleTable {
    handles: DashMap<u64, HandleState>,
    next_fh: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, real_fd: RawFd, path: PathBuf, flags: i32) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let state = HandleState {
            fh,
            real_fd,
            path,
            flags,
        };
        self.handles.insert(fh, state);
        fh
    }

    pub fn fd(&self, fh: u64) -> Option<RawFd> {
        self.handles.get(&fh).map(|h| h.real_fd)
    }

    pub fn remove(&self, fh: u64) -> Option<HandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }

    /// Snapshot of all open handles, for shutdown diagnostics.
    pub fn list_open(&self) -> Vec<HandleState> {
        let mut open: Vec<HandleState> = self.handles.iter().map(|e| e.value().clone()).collect();
        open.sort_by_key(|h| h.fh);
        open
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Open directory streams. Each stream sits behind its own mutex so that
/// enumeration never holds a table shard across blocking host calls.
pub struct DirHandleTable {
    handles: DashMap<u64, Arc<Mutex<DirStream>>>,
    next_fh: AtomicU64,
}

impl DirHandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, stream: DirStream) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, Arc::new(Mutex::new(stream)));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Arc<Mutex<DirStream>>> {
        self.handles.get(&fh).map(|r| Arc::clone(r.value()))
    }

    /// Forget a handle. The stream closes once the last in-flight user
    /// drops it.
    pub fn remove(&self, fh: u64) -> Option<Arc<Mutex<DirStream>>> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }
}

impl Default for DirHandleTable {
    fn default() -> Self {
        Self::new()
    }
}
