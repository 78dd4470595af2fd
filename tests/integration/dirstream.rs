use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::ops::ControlFlow;
use std::path::PathBuf;

use loopfs::fs::dirstream::{DirEntry, DirStream};
use rand::Rng;

fn populate(count: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..count {
        fs::write(dir.path().join(format!("file-{:03}", i)), b"x").unwrap();
    }
    fs::create_dir(dir.path().join("subdir")).unwrap();
    dir
}

/// Drain the stream in batches of at most `batch` entries, always resuming
/// from the offset of the last accepted entry.
fn drain(stream: &mut DirStream, mut batch: impl FnMut() -> usize) -> Vec<DirEntry> {
    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let limit = batch();
        let mut got = Vec::new();
        stream
            .enumerate(offset, false, |e| {
                if got.len() == limit {
                    return ControlFlow::Break(());
                }
                got.push(e.clone());
                ControlFlow::Continue(())
            })
            .unwrap();
        if got.is_empty() {
            return seen;
        }
        offset = got.last().unwrap().offset;
        seen.extend(got);
    }
}

fn names(entries: &[DirEntry]) -> Vec<OsString> {
    entries.iter().map(|e| e.name.clone()).collect()
}

#[test]
fn every_entry_exactly_once_with_random_batches() {
    let dir = populate(200);
    let mut rng = rand::thread_rng();

    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();
    let entries = drain(&mut stream, || rng.gen_range(1..=17));
    let listed = names(&entries);

    let unique: HashSet<_> = listed.iter().cloned().collect();
    assert_eq!(unique.len(), listed.len(), "duplicate entries: {:?}", listed);
    // 200 files, one subdirectory, "." and ".."
    assert_eq!(listed.len(), 203);
    assert!(unique.contains(&OsString::from(".")));
    assert!(unique.contains(&OsString::from("subdir")));
}

#[test]
fn batch_of_one_matches_single_pass() {
    let dir = populate(40);

    let mut one_pass = DirStream::open(dir.path(), PathBuf::new()).unwrap();
    let all = drain(&mut one_pass, || usize::MAX);

    let mut stepped = DirStream::open(dir.path(), PathBuf::new()).unwrap();
    let single = drain(&mut stepped, || 1);

    assert_eq!(names(&all), names(&single));
}

#[test]
fn refused_entry_is_offered_again() {
    let dir = populate(5);
    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();

    let mut accepted = None;
    let mut refused = None;
    stream
        .enumerate(0, false, |e| {
            if accepted.is_none() {
                accepted = Some(e.clone());
                ControlFlow::Continue(())
            } else {
                refused = Some(e.clone());
                ControlFlow::Break(())
            }
        })
        .unwrap();
    let accepted = accepted.unwrap();
    let refused = refused.unwrap();
    assert_eq!(stream.offset(), accepted.offset);

    let mut again = None;
    stream
        .enumerate(accepted.offset, false, |e| {
            again = Some(e.clone());
            ControlFlow::Break(())
        })
        .unwrap();
    assert_eq!(again.unwrap().name, refused.name);
}

#[test]
fn offset_zero_rewinds_after_exhaustion() {
    let dir = populate(10);
    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();

    let first = drain(&mut stream, || 4);
    let second = drain(&mut stream, || 3);
    assert_eq!(first.len(), 13);
    assert_eq!(names(&first), names(&second));
}

#[test]
fn stale_offset_seeks() {
    let dir = populate(20);
    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();
    let all = drain(&mut stream, || usize::MAX);

    // Resume from the fifth entry after the stream has moved elsewhere.
    let resume = all[4].offset;
    let mut rest = Vec::new();
    stream
        .enumerate(resume, false, |e| {
            rest.push(e.name.clone());
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(rest, names(&all[5..]));
}

#[test]
fn plus_enumeration_carries_attributes() {
    let dir = populate(3);
    fs::write(dir.path().join("sized"), vec![0u8; 1234]).unwrap();
    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();

    let mut found = None;
    stream
        .enumerate(0, true, |e| {
            if e.name == "sized" {
                found = Some(e.clone());
            }
            ControlFlow::Continue(())
        })
        .unwrap();

    let entry = found.expect("entry listed");
    let attr = entry.attr.expect("attributes present");
    assert_eq!(attr.size, 1234);
    assert_eq!(attr.ino, entry.ino);
    assert_eq!(attr.blksize, 0);
    assert_eq!(entry.kind(), fuser::FileType::RegularFile);
}

#[test]
fn directory_types_come_through() {
    let dir = populate(0);
    let mut stream = DirStream::open(dir.path(), PathBuf::new()).unwrap();
    let entries = drain(&mut stream, || usize::MAX);
    let sub = entries.iter().find(|e| e.name == "subdir").unwrap();
    assert_eq!(sub.kind(), fuser::FileType::Directory);
}

#[test]
fn opening_a_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = DirStream::open(&dir.path().join("missing"), PathBuf::new()).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}
