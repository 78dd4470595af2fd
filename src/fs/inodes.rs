use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Inode number the kernel uses for the mount root.
pub const ROOT_INO: u64 = 1;

/// Maps host inode numbers to paths relative to the source root. A hard
/// linked inode keeps one path per link the kernel has looked up; the first
/// entry is the one requests resolve through.
pub struct InodeTable {
    ino_to_paths: DashMap<u64, Vec<PathBuf>>,
    path_to_ino: DashMap<PathBuf, u64>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            ino_to_paths: DashMap::new(),
            path_to_ino: DashMap::new(),
        };
        table.insert(ROOT_INO, PathBuf::new());
        table
    }

    /// Record that `path` names `ino`, using the real inode from stat().
    /// The most recently seen path becomes the primary one.
    pub fn insert(&self, ino: u64, path: PathBuf) {
        // The path may have named a different inode before.
        if let Some(old_ino) = self.path_to_ino.insert(path.clone(), ino) {
            if old_ino != ino {
                self.drop_path(old_ino, &path);
            }
        }
        let mut paths = self.ino_to_paths.entry(ino).or_default();
        paths.retain(|p| p != &path);
        paths.insert(0, path);
    }

    pub fn get_path(&self, ino: u64) -> Option<PathBuf> {
        self.ino_to_paths.get(&ino).and_then(|r| r.value().first().cloned())
    }

    /// Forget one name. The inode stays reachable through its other links.
    pub fn remove_by_path(&self, path: &Path) {
        if path.as_os_str().is_empty() {
            return;
        }
        if let Some((_, ino)) = self.path_to_ino.remove(path) {
            self.drop_path(ino, path);
        }
    }

    /// Rename a path, and every path below it, in the inode table.
    pub fn rename(&self, old_path: &Path, new_path: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .path_to_ino
            .iter()
            .filter(|e| e.key().starts_with(old_path))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for (path, ino) in moved {
            let suffix = path.strip_prefix(old_path).unwrap_or(Path::new(""));
            let renamed = if suffix.as_os_str().is_empty() {
                new_path.to_path_buf()
            } else {
                new_path.join(suffix)
            };
            self.remove_by_path(&path);
            self.insert(ino, renamed);
        }
    }

    fn drop_path(&self, ino: u64, path: &Path) {
        let now_empty = match self.ino_to_paths.get_mut(&ino) {
            Some(mut paths) => {
                paths.retain(|p| p != path);
                paths.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.ino_to_paths.remove_if(&ino, |_, paths| paths.is_empty());
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
