use std::fs;
use std::os::unix::fs::{symlink, MetadataExt};
use std::os::unix::io::AsRawFd;

use fuser::FileType;
use loopfs::fs::attr;
use loopfs::fs::passthrough::Target;

#[test]
fn path_and_handle_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, b"twelve bytes").unwrap();
    let file = fs::File::open(&path).unwrap();

    let by_path = attr::query(Target::Path(&path)).unwrap();
    let by_handle = attr::query(Target::Handle(file.as_raw_fd())).unwrap();
    assert_eq!(by_path.ino, by_handle.ino);
    assert_eq!(by_path.size, 12);
    assert_eq!(by_path.mode, by_handle.mode);
    assert_eq!(by_path.mtime, by_handle.mtime);
}

#[test]
fn record_mirrors_host_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, vec![0u8; 5000]).unwrap();
    let meta = fs::metadata(&path).unwrap();

    let rec = attr::query(Target::Path(&path)).unwrap();
    assert_eq!(rec.ino, meta.ino());
    assert_eq!(rec.uid, meta.uid());
    assert_eq!(rec.gid, meta.gid());
    assert_eq!(rec.nlink, meta.nlink() as u32);
    assert_eq!(rec.blocks, meta.blocks());
    assert_eq!(rec.blksize, 0);
    assert_eq!(rec.kind(), FileType::RegularFile);

    let fa = rec.to_file_attr();
    assert_eq!(fa.size, 5000);
    assert_eq!(fa.blksize, 0);
    assert_eq!(u32::from(fa.perm), meta.mode() & 0o7777);
}

#[test]
fn symlinks_are_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    fs::create_dir(&target).unwrap();
    let link = dir.path().join("link");
    symlink(&target, &link).unwrap();

    let rec = attr::query(Target::Path(&link)).unwrap();
    assert_eq!(rec.kind(), FileType::Symlink);
}

#[test]
fn missing_object_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = attr::query(Target::Path(&dir.path().join("missing"))).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn xtimes_never_fail() {
    let dir = tempfile::tempdir().unwrap();
    // An unreadable target degrades to zeroed times.
    let x = attr::xtimes(Target::Path(&dir.path().join("missing")));
    assert_eq!(x, attr::XTimes::ZERO);
}
