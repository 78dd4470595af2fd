use std::fs;
use std::io;
use std::path::Path;

use loopfs::fs::xattr::XattrMapper;

/// A mapper whose prefixes both live in the unprivileged `user.` namespace,
/// so the round trips work on any host that supports user xattrs.
fn mapper() -> XattrMapper {
    XattrMapper::new(b"user.com.", b"user.org.").unwrap()
}

fn unsupported(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOTSUP) | Some(libc::EOPNOTSUPP))
}

/// Set `name`, or return false when the host filesystem has no xattrs.
fn try_set(m: &XattrMapper, path: &Path, name: &[u8], value: &[u8]) -> bool {
    match m.set(path, name, value, 0, 0) {
        Ok(()) => true,
        Err(e) if unsupported(&e) => {
            eprintln!("skipping: host filesystem does not support user xattrs");
            false
        }
        Err(e) => panic!("setxattr failed: {}", e),
    }
}

fn split_names(list: &[u8]) -> Vec<Vec<u8>> {
    list.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_vec())
        .collect()
}

#[test]
fn reserved_name_is_stored_under_alternate_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f");
    fs::write(&file, b"data").unwrap();
    let m = mapper();

    if !try_set(&m, &file, b"user.com.tag", b"blue") {
        return;
    }

    // The host sees the rewritten name.
    let mut raw = vec![0u8; 1024];
    let plain = XattrMapper::new(b"user.xyz.", b"user.abc.").unwrap();
    let n = plain.list(&file, Some(&mut raw)).unwrap();
    assert!(split_names(&raw[..n]).contains(&b"user.org.tag".to_vec()));

    // Callers see the original name and value.
    let n = m.list(&file, Some(&mut raw)).unwrap();
    assert!(split_names(&raw[..n]).contains(&b"user.com.tag".to_vec()));

    let mut value = vec![0u8; 16];
    let n = m.get(&file, b"user.com.tag", &mut value, 0).unwrap();
    assert_eq!(&value[..n], b"blue");
}

#[test]
fn size_probe_matches_full_listing() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f");
    fs::write(&file, b"").unwrap();
    let m = mapper();

    if !try_set(&m, &file, b"user.com.one", b"1") {
        return;
    }
    assert!(try_set(&m, &file, b"user.plain", b"22"));

    let probed = m.list(&file, None).unwrap();
    let mut buf = vec![0u8; probed];
    let listed = m.list(&file, Some(&mut buf)).unwrap();
    assert_eq!(probed, listed);

    let names = split_names(&buf[..listed]);
    assert!(names.contains(&b"user.com.one".to_vec()));
    assert!(names.contains(&b"user.plain".to_vec()));
}

#[test]
fn value_probe_reports_length() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f");
    fs::write(&file, b"").unwrap();
    let m = mapper();

    if !try_set(&m, &file, b"user.com.long", b"0123456789") {
        return;
    }
    assert_eq!(m.get(&file, b"user.com.long", &mut [], 0).unwrap(), 10);
}

#[test]
fn remove_uses_mapped_name() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f");
    fs::write(&file, b"").unwrap();
    let m = mapper();

    if !try_set(&m, &file, b"user.com.gone", b"x") {
        return;
    }
    m.remove(&file, b"user.com.gone").unwrap();
    let err = m.get(&file, b"user.com.gone", &mut [0u8; 4], 0).unwrap_err();
    #[cfg(target_os = "linux")]
    assert_eq!(err.raw_os_error(), Some(libc::ENODATA));
    #[cfg(target_os = "macos")]
    assert_eq!(err.raw_os_error(), Some(libc::ENOATTR));
}

#[cfg(target_os = "linux")]
#[test]
fn nonzero_position_is_rejected_on_linux() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f");
    fs::write(&file, b"").unwrap();

    let err = mapper().set(&file, b"user.x", b"v", 0, 4).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
}
