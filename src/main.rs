use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use loopfs::config::{Cli, Command, LoopbackConfig};
use loopfs::error::{LoopbackError, Result};
use loopfs::fs::handles::HandleTable;
use loopfs::fs::LoopbackFs;

/// Write-end of the self-pipe used for signal notification.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

enum ShutdownAction {
    /// Second signal, force unmount.
    ForceUnmount,
    /// Session ended on its own, or the first-signal unmount went through.
    ExternalUnmount,
}

/// Plain (non-forced) unmount. True if the mount is gone.
fn try_unmount(mountpoint: &Path) -> bool {
    std::process::Command::new("umount")
        .arg(mountpoint)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn report_busy(file_handles: &HandleTable) {
    let open_files = file_handles.list_open();
    if open_files.is_empty() {
        eprintln!("loopfs: mount is busy, processes are using the mountpoint");
    } else {
        eprintln!("loopfs: mount is busy, {} open file(s):", open_files.len());
        let display_cap = 10;
        for handle in open_files.iter().take(display_cap) {
            eprintln!("  {}  (fh {})", handle.path.display(), handle.fh);
        }
        if open_files.len() > display_cap {
            eprintln!("  and {} more...", open_files.len() - display_cap);
        }
    }
    eprintln!("Close open files to unmount cleanly, or press ctrl-C again to force unmount.");
}

/// Block until the mount should go away. The first SIGINT/SIGTERM unmounts
/// if nothing holds the mount, otherwise it lists open files and waits. A
/// second signal forces the unmount.
fn wait_for_shutdown(
    guard: &std::thread::JoinHandle<std::io::Result<()>>,
    file_handles: &HandleTable,
    mountpoint: &Path,
) -> std::io::Result<ShutdownAction> {
    let (read_fd, write_fd) = nix::unistd::pipe().map_err(std::io::Error::from)?;

    SIGNAL_PIPE.store(write_fd.as_raw_fd(), Ordering::Relaxed);

    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        signal(Signal::SIGINT, SigHandler::Handler(signal_handler)).ok();
        signal(Signal::SIGTERM, SigHandler::Handler(signal_handler)).ok();
    }

    let mut first_signal_received = false;
    let mut poll_ticks: u32 = 0;

    let action = loop {
        let mut pfd = libc::pollfd {
            fd: read_fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 200) };

        if ret > 0 {
            let mut buf = [0u8; 1];
            unsafe {
                libc::read(read_fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, 1);
            }

            if first_signal_received {
                eprintln!("loopfs: force unmounting...");
                break ShutdownAction::ForceUnmount;
            }
            if guard.is_finished() {
                break ShutdownAction::ExternalUnmount;
            }
            if try_unmount(mountpoint) {
                eprintln!("loopfs: unmounting (received signal)...");
                break ShutdownAction::ExternalUnmount;
            }

            first_signal_received = true;
            report_busy(file_handles);
            continue;
        }

        if guard.is_finished() {
            break ShutdownAction::ExternalUnmount;
        }

        if first_signal_received {
            poll_ticks += 1;
            // Retry roughly once a second.
            if poll_ticks % 5 == 0 && try_unmount(mountpoint) {
                eprintln!("loopfs: all clear, unmounting...");
                break ShutdownAction::ExternalUnmount;
            }
        }
    };

    SIGNAL_PIPE.store(-1, Ordering::Relaxed);
    Ok(action)
}

fn init_logging(log_file: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_name = log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("loopfs.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("loopfs: a tracing subscriber is already installed");
    }
    guard
}

fn canonical_dir(path: &Path, what: &str) -> PathBuf {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|e| {
        eprintln!("Error: {} {:?}: {}", what, path, e);
        std::process::exit(1);
    });
    if !canonical.is_dir() {
        eprintln!("Error: {} is not a directory: {:?}", what, canonical);
        std::process::exit(1);
    }
    canonical
}

fn mount(config: LoopbackConfig) -> Result<()> {
    info!(
        "loopfs starting: source={}, mountpoint={}, fsblocksize={}",
        config.source.display(),
        config.mountpoint.display(),
        config.fs.block_size()
    );

    // The kernel has already applied the caller's umask to incoming modes.
    nix::sys::stat::umask(nix::sys::stat::Mode::empty());

    let fs = LoopbackFs::new(config.source.clone(), config.fs);
    let mut file_handles = Arc::clone(&fs.file_handles);

    let mut fuse_config = fuser::Config::default();
    fuse_config.mount_options = config.mount_options.clone();
    fuse_config.acl = if config.allow_other {
        fuser::SessionACL::All
    } else {
        fuser::SessionACL::Owner
    };

    let session = match fuser::spawn_mount2(fs, &config.mountpoint, &fuse_config) {
        Ok(session) => session,
        Err(e) if config.allow_other && e.raw_os_error() == Some(libc::EPERM) => {
            info!("Retrying mount without allow_other...");
            fuse_config.acl = fuser::SessionACL::Owner;
            let retry = LoopbackFs::new(config.source.clone(), config.fs);
            file_handles = Arc::clone(&retry.file_handles);
            fuser::spawn_mount2(retry, &config.mountpoint, &fuse_config)
                .map_err(|e| LoopbackError::Mount(e.to_string()))?
        }
        Err(e) => return Err(LoopbackError::Mount(e.to_string())),
    };

    info!("loopfs mounted at {}", config.mountpoint.display());

    let action = match wait_for_shutdown(&session.guard, &file_handles, &config.mountpoint) {
        Ok(action) => action,
        Err(e) => {
            error!("Signal handling unavailable ({}), forcing unmount", e);
            ShutdownAction::ForceUnmount
        }
    };

    match action {
        ShutdownAction::ForceUnmount => {
            if let Err(e) = session.umount_and_join() {
                error!("Error during unmount, trying force unmount: {}", e);
                let mp = config.mountpoint.to_string_lossy();
                let _ = std::process::Command::new("umount")
                    .args(["-f", &*mp])
                    .status();
            }
        }
        ShutdownAction::ExternalUnmount => {
            if let Err(e) = session.join() {
                error!("Error joining FUSE session: {}", e);
            }
        }
    }

    eprintln!("loopfs: unmounted {}", config.mountpoint.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            source,
            mountpoint,
            options,
            fsblocksize,
            case_insensitive,
            log_file,
        } => {
            let source = canonical_dir(&source, "source directory");
            let mountpoint = canonical_dir(&mountpoint, "mountpoint");
            if source == mountpoint || mountpoint.starts_with(&source) {
                eprintln!("Error: mountpoint must not lie inside the source directory");
                std::process::exit(1);
            }

            let _log_guard = init_logging(&log_file);

            let config = match LoopbackConfig::new(
                source,
                mountpoint,
                log_file,
                &options,
                fsblocksize,
                case_insensitive,
            ) {
                Ok(config) => config,
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = mount(config) {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Command::Unmount { mountpoint } => {
            unmount(&mountpoint);
        }
    }
}

fn unmount(mountpoint: &Path) {
    let mountpoint = std::fs::canonicalize(mountpoint).unwrap_or_else(|e| {
        eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
        std::process::exit(1);
    });
    let mp = mountpoint.to_string_lossy();
    eprintln!("Unmounting {}...", mp);

    let output = std::process::Command::new("umount").arg(&*mp).output();
    if matches!(&output, Ok(o) if o.status.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }
    if let Ok(ref o) = output {
        if String::from_utf8_lossy(&o.stderr).contains("busy") {
            eprintln!(
                "Mount point is busy. Make sure no shells or processes are using {}, then try again.",
                mp
            );
            std::process::exit(1);
        }
    }

    // fusermount covers unprivileged Linux mounts.
    let status = std::process::Command::new("fusermount")
        .args(["-u", &*mp])
        .status();
    if matches!(status, Ok(s) if s.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }

    let status = std::process::Command::new("umount").args(["-f", &*mp]).status();
    if matches!(status, Ok(s) if s.success()) {
        eprintln!("Successfully unmounted {} (forced)", mp);
        return;
    }

    eprintln!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp);
    std::process::exit(1);
}
