use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{LoopbackError, Result};

/// Logical block size reported by statfs unless overridden.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

#[derive(Parser, Debug)]
#[command(name = "loopfs", about = "FUSE loopback filesystem mirroring an existing directory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a loopback view of a directory
    Mount {
        /// Directory to mirror
        source: PathBuf,

        /// Path to the mount point
        mountpoint: PathBuf,

        /// Mount options, comma separated (fsblocksize=N, case_insensitive,
        /// allow_other, ro, ...)
        #[arg(short = 'o', value_delimiter = ',')]
        options: Vec<String>,

        /// Logical block size reported in volume statistics
        #[arg(long)]
        fsblocksize: Option<u32>,

        /// Ask the kernel for case-insensitive name lookups
        #[arg(long)]
        case_insensitive: bool,

        /// Log file path
        #[arg(long, default_value = "/tmp/loopfs.log")]
        log_file: PathBuf,
    },
    /// Unmount a loopback filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
}

/// Process-wide filesystem options. Fixed once the filesystem is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsOptions {
    block_size: u32,
    case_insensitive: bool,
}

impl FsOptions {
    pub fn new(block_size: u32, case_insensitive: bool) -> Result<Self> {
        if block_size == 0 {
            return Err(LoopbackError::Config(
                "fsblocksize must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            block_size,
            case_insensitive,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            case_insensitive: false,
        }
    }
}

/// Result of splitting `-o` options into ours and fuser's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub fs: FsOptions,
    pub allow_other: bool,
    pub fuse: Vec<fuser::MountOption>,
}

impl MountOptions {
    /// Parse `-o` style options. `fsblocksize` and `case_insensitive` are
    /// consumed here; the rest become fuser mount options.
    pub fn parse<S: AsRef<str>>(options: &[S]) -> Result<Self> {
        let mut block_size = DEFAULT_BLOCK_SIZE;
        let mut case_insensitive = false;
        let mut allow_other = false;
        let mut fsname = None;
        let mut fuse = Vec::new();

        for opt in options {
            let opt = opt.as_ref().trim();
            if opt.is_empty() {
                continue;
            }
            let (key, value) = match opt.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (opt, None),
            };
            match (key, value) {
                ("fsblocksize", Some(v)) => {
                    block_size = v.parse().map_err(|_| {
                        LoopbackError::Config(format!("invalid fsblocksize: {:?}", v))
                    })?;
                }
                ("fsblocksize", None) => {
                    return Err(LoopbackError::Config(
                        "fsblocksize requires a value".to_string(),
                    ));
                }
                ("case_insensitive", None) => case_insensitive = true,
                ("allow_other", None) => allow_other = true,
                ("ro", None) => fuse.push(fuser::MountOption::RO),
                ("default_permissions", None) => fuse.push(fuser::MountOption::DefaultPermissions),
                ("auto_unmount", None) => fuse.push(fuser::MountOption::AutoUnmount),
                ("fsname", Some(v)) => fsname = Some(v.to_string()),
                _ => fuse.push(fuser::MountOption::CUSTOM(opt.to_string())),
            }
        }

        fuse.insert(
            0,
            fuser::MountOption::FSName(fsname.unwrap_or_else(|| "loopfs".to_string())),
        );

        Ok(Self {
            fs: FsOptions::new(block_size, case_insensitive)?,
            allow_other,
            fuse,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub source: PathBuf,
    pub mountpoint: PathBuf,
    pub log_file: PathBuf,
    pub fs: FsOptions,
    pub allow_other: bool,
    pub mount_options: Vec<fuser::MountOption>,
}

impl LoopbackConfig {
    /// Combine `-o` options with the dedicated flags. Flags win over the
    /// equivalent `-o` entries.
    pub fn new<S: AsRef<str>>(
        source: PathBuf,
        mountpoint: PathBuf,
        log_file: PathBuf,
        options: &[S],
        fsblocksize: Option<u32>,
        case_insensitive: bool,
    ) -> Result<Self> {
        let parsed = MountOptions::parse(options)?;
        let fs = FsOptions::new(
            fsblocksize.unwrap_or(parsed.fs.block_size()),
            case_insensitive || parsed.fs.case_insensitive(),
        )?;
        Ok(Self {
            source,
            mountpoint,
            log_file,
            fs,
            allow_other: parsed.allow_other,
            mount_options: parsed.fuse,
        })
    }
}
