use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// A running `loopfs mount` over a fresh source directory.
pub struct TestMount {
    pub source: tempfile::TempDir,
    pub mount_dir: tempfile::TempDir,
    pub process: Option<Child>,
}

impl TestMount {
    /// Start loopfs in the background with extra `-o` options.
    pub fn with_options(options: &[&str]) -> Self {
        let source = tempfile::tempdir().expect("failed to create source dir");
        let mount_dir = tempfile::tempdir().expect("failed to create mount dir");
        std::fs::write(source.path().join("seed.txt"), "seed\n").expect("write seed file");

        let mut args = vec![
            "mount".to_string(),
            source.path().to_str().unwrap().to_string(),
            mount_dir.path().to_str().unwrap().to_string(),
            "--log-file".to_string(),
            "/tmp/loopfs-test.log".to_string(),
        ];
        if !options.is_empty() {
            args.push("-o".to_string());
            args.push(options.join(","));
        }

        let child = Command::new(loopfs_binary())
            .args(&args)
            .stdout(Stdio::null())
            .spawn()
            .expect("failed to start loopfs");

        let mount = TestMount {
            source,
            mount_dir,
            process: Some(child),
        };
        wait_for_mount(mount.mount_path(), Duration::from_secs(10));
        mount
    }

    pub fn new() -> Self {
        Self::with_options(&[])
    }

    pub fn source_path(&self) -> &Path {
        self.source.path()
    }

    pub fn mount_path(&self) -> &Path {
        self.mount_dir.path()
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let mp = self.mount_dir.path().to_str().unwrap();
            let _ = Command::new(loopfs_binary()).args(["unmount", mp]).status();
            std::thread::sleep(Duration::from_millis(500));
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

pub fn loopfs_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_loopfs"))
}

/// Check whether `path` appears in the output of the `mount` command.
pub fn is_mounted(path: &Path) -> bool {
    let output = match Command::new("mount").output() {
        Ok(o) => o,
        Err(_) => return false,
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path_str = path.to_string_lossy();
    stdout.lines().any(|line| line.contains(path_str.as_ref()))
}

/// The seed file shows up once the mount serves the source tree.
fn wait_for_mount(mount_path: &Path, timeout: Duration) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if mount_path.join("seed.txt").exists() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("loopfs did not mount at {:?} within {:?}", mount_path, timeout);
}
