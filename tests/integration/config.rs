use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;
use loopfs::config::{Cli, Command, FsOptions, LoopbackConfig, MountOptions, DEFAULT_BLOCK_SIZE};
use loopfs::error::LoopbackError;

#[test]
fn defaults() {
    let opts = MountOptions::parse::<&str>(&[]).unwrap();
    assert_eq!(opts.fs.block_size(), DEFAULT_BLOCK_SIZE);
    assert!(!opts.fs.case_insensitive());
    assert!(!opts.allow_other);
    assert_eq!(opts.fuse, vec![MountOption::FSName("loopfs".to_string())]);
}

#[test]
fn recognized_options() {
    let opts = MountOptions::parse(&[
        "fsblocksize=512",
        "case_insensitive",
        "allow_other",
        "ro",
        "fsname=mirror",
        "noatime",
    ])
    .unwrap();
    assert_eq!(opts.fs.block_size(), 512);
    assert!(opts.fs.case_insensitive());
    assert!(opts.allow_other);
    assert_eq!(
        opts.fuse,
        vec![
            MountOption::FSName("mirror".to_string()),
            MountOption::RO,
            MountOption::CUSTOM("noatime".to_string()),
        ]
    );
}

#[test]
fn zero_block_size_is_rejected() {
    assert!(matches!(
        MountOptions::parse(&["fsblocksize=0"]),
        Err(LoopbackError::Config(_))
    ));
    assert!(FsOptions::new(0, false).is_err());
}

#[test]
fn malformed_block_size_is_rejected() {
    assert!(MountOptions::parse(&["fsblocksize=big"]).is_err());
    assert!(MountOptions::parse(&["fsblocksize"]).is_err());
}

#[test]
fn flags_override_dash_o() {
    let config = LoopbackConfig::new(
        PathBuf::from("/src"),
        PathBuf::from("/mnt"),
        PathBuf::from("/tmp/loopfs.log"),
        &["fsblocksize=512"],
        Some(8192),
        true,
    )
    .unwrap();
    assert_eq!(config.fs.block_size(), 8192);
    assert!(config.fs.case_insensitive());
}

#[test]
fn cli_parses_mount() {
    let cli = Cli::try_parse_from([
        "loopfs",
        "mount",
        "/src",
        "/mnt",
        "-o",
        "ro,fsblocksize=1024",
        "--case-insensitive",
    ])
    .unwrap();
    match cli.command {
        Command::Mount {
            source,
            mountpoint,
            options,
            fsblocksize,
            case_insensitive,
            log_file,
        } => {
            assert_eq!(source, PathBuf::from("/src"));
            assert_eq!(mountpoint, PathBuf::from("/mnt"));
            assert_eq!(options, vec!["ro", "fsblocksize=1024"]);
            assert_eq!(fsblocksize, None);
            assert!(case_insensitive);
            assert_eq!(log_file, PathBuf::from("/tmp/loopfs.log"));
        }
        Command::Unmount { .. } => panic!("expected mount"),
    }
}
