use std::io;
use std::path::Path;

use super::passthrough::{check, path_to_cstring};

/// Longest file name reported to the kernel.
pub const NAME_MAX: u32 = 255;

/// Volume statistics expressed in the configured logical block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

impl VolumeStats {
    /// Query the host volume holding `path` and rescale block counts from
    /// the host block size to `block_size`.
    pub fn query(path: &Path, block_size: u32) -> io::Result<Self> {
        let c_path = path_to_cstring(path)?;
        let st = unsafe {
            let mut st: libc::statfs = std::mem::zeroed();
            check(libc::statfs(c_path.as_ptr(), &mut st))?;
            st
        };
        Ok(Self::from_host(
            st.f_blocks as u64,
            st.f_bfree as u64,
            st.f_bavail as u64,
            st.f_files as u64,
            st.f_ffree as u64,
            st.f_bsize as u64,
            block_size,
        ))
    }

    /// Rescale raw host counts. `block_size` must be non-zero.
    pub fn from_host(
        blocks: u64,
        blocks_free: u64,
        blocks_available: u64,
        files: u64,
        files_free: u64,
        host_block_size: u64,
        block_size: u32,
    ) -> Self {
        let rescale = |count: u64| -> u64 {
            (count as u128 * host_block_size as u128 / block_size as u128) as u64
        };
        VolumeStats {
            blocks: rescale(blocks),
            blocks_free: rescale(blocks_free),
            blocks_available: rescale(blocks_available),
            files,
            files_free,
            block_size,
            name_max: NAME_MAX,
            fragment_size: block_size,
        }
    }
}
