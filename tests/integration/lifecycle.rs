//! Filesystem behavior through a live mount. These need a working FUSE
//! installation and are ignored by default:
//!
//!     cargo test --test integration -- --ignored --test-threads=1

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};

use crate::helpers::TestMount;

#[test]
#[ignore]
fn reads_and_writes_reach_the_source() {
    let m = TestMount::new();

    assert_eq!(fs::read_to_string(m.mount_path().join("seed.txt")).unwrap(), "seed\n");

    fs::write(m.mount_path().join("new.txt"), b"through the mount").unwrap();
    assert_eq!(
        fs::read(m.source_path().join("new.txt")).unwrap(),
        b"through the mount"
    );

    let mut f = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(m.mount_path().join("new.txt"))
        .unwrap();
    f.seek(SeekFrom::Start(8)).unwrap();
    f.write_all(b"THE").unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    let mut s = String::new();
    f.read_to_string(&mut s).unwrap();
    assert_eq!(s, "through THE mount");
}

#[test]
#[ignore]
fn large_directory_lists_every_entry_once() {
    let m = TestMount::new();
    for i in 0..500 {
        fs::write(m.source_path().join(format!("entry-{:04}", i)), b"").unwrap();
    }

    let mut names: Vec<String> = fs::read_dir(m.mount_path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    let total = names.len();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), total);
    assert_eq!(total, 501);
}

#[test]
#[ignore]
fn namespace_operations() {
    let m = TestMount::new();
    let mp = m.mount_path();

    fs::create_dir(mp.join("dir")).unwrap();
    fs::write(mp.join("dir/a"), b"a").unwrap();
    fs::rename(mp.join("dir"), mp.join("moved")).unwrap();
    assert_eq!(fs::read(mp.join("moved/a")).unwrap(), b"a");
    assert!(m.source_path().join("moved/a").exists());

    symlink("moved/a", mp.join("link")).unwrap();
    assert_eq!(fs::read_link(mp.join("link")).unwrap().to_str(), Some("moved/a"));

    fs::hard_link(mp.join("moved/a"), mp.join("hard")).unwrap();
    assert_eq!(fs::metadata(mp.join("hard")).unwrap().nlink(), 2);

    fs::remove_file(mp.join("hard")).unwrap();
    fs::remove_file(mp.join("link")).unwrap();
    fs::remove_file(mp.join("moved/a")).unwrap();
    fs::remove_dir(mp.join("moved")).unwrap();
    assert!(!m.source_path().join("moved").exists());
}

#[test]
#[ignore]
fn attribute_changes_pass_through() {
    let m = TestMount::new();
    let file = m.mount_path().join("seed.txt");

    fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
    let host = fs::metadata(m.source_path().join("seed.txt")).unwrap();
    assert_eq!(host.permissions().mode() & 0o7777, 0o600);

    fs::OpenOptions::new().write(true).open(&file).unwrap().set_len(2).unwrap();
    assert_eq!(fs::read(m.source_path().join("seed.txt")).unwrap(), b"se");
}

#[test]
#[ignore]
fn new_files_keep_requested_mode() {
    let m = TestMount::new();
    fs::create_dir(m.mount_path().join("open")).unwrap();
    fs::set_permissions(m.mount_path().join("open"), fs::Permissions::from_mode(0o777)).unwrap();
    let mode = fs::metadata(m.source_path().join("open")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o777);
}

#[test]
#[ignore]
fn statfs_uses_configured_block_size() {
    let m = TestMount::with_options(&["fsblocksize=512"]);
    let c_path = std::ffi::CString::new(m.mount_path().to_str().unwrap()).unwrap();
    let st = unsafe {
        let mut st: libc::statvfs = std::mem::zeroed();
        assert_eq!(libc::statvfs(c_path.as_ptr(), &mut st), 0);
        st
    };
    assert_eq!(st.f_bsize, 512);
}

#[test]
#[ignore]
fn surviving_hard_link_stays_usable() {
    let m = TestMount::new();
    let mp = m.mount_path();

    fs::write(mp.join("a"), b"shared").unwrap();
    fs::hard_link(mp.join("a"), mp.join("b")).unwrap();
    fs::remove_file(mp.join("b")).unwrap();

    let f = fs::OpenOptions::new().write(true).open(mp.join("a")).unwrap();
    f.set_len(3).unwrap();
    assert_eq!(fs::read(mp.join("a")).unwrap(), b"sha");
    assert_eq!(fs::metadata(mp.join("a")).unwrap().nlink(), 1);
}
