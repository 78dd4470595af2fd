//! Extended attribute passthrough with a reserved-prefix rename.
//!
//! Names under the reserved prefix are stored on the host under an alternate
//! prefix of the same length, so a listing can be rewritten in place without
//! changing any name length.

use std::borrow::Cow;
use std::io;
use std::path::Path;

use crate::error::{LoopbackError, Result};

use super::passthrough::{bytes_to_cstring, check, check_len, path_to_cstring};

pub const RESERVED_PREFIX: &[u8] = b"com.apple.";
pub const ALTERNATE_PREFIX: &[u8] = b"org.apple.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrMapper {
    reserved: Vec<u8>,
    alternate: Vec<u8>,
}

impl Default for XattrMapper {
    fn default() -> Self {
        Self {
            reserved: RESERVED_PREFIX.to_vec(),
            alternate: ALTERNATE_PREFIX.to_vec(),
        }
    }
}

impl XattrMapper {
    pub fn new(reserved: &[u8], alternate: &[u8]) -> Result<Self> {
        if reserved.len() != alternate.len() {
            return Err(LoopbackError::Config(format!(
                "xattr prefixes must have equal length ({} vs {})",
                reserved.len(),
                alternate.len()
            )));
        }
        if reserved.is_empty() || reserved.contains(&0) || alternate.contains(&0) {
            return Err(LoopbackError::Config(
                "xattr prefixes must be non-empty and NUL free".to_string(),
            ));
        }
        Ok(Self {
            reserved: reserved.to_vec(),
            alternate: alternate.to_vec(),
        })
    }

    /// The name the host stores for caller-visible `name`.
    pub fn host_name<'a>(&self, name: &'a [u8]) -> Cow<'a, [u8]> {
        match name.strip_prefix(self.reserved.as_slice()) {
            Some(rest) => {
                let mut mapped = Vec::with_capacity(name.len());
                mapped.extend_from_slice(&self.alternate);
                mapped.extend_from_slice(rest);
                Cow::Owned(mapped)
            }
            None => Cow::Borrowed(name),
        }
    }

    /// Rewrite a NUL-separated host listing back to caller-visible names.
    pub fn unmap_list(&self, list: &mut [u8]) {
        let prefix_len = self.alternate.len();
        let mut start = 0;
        while start < list.len() {
            let end = list[start..]
                .iter()
                .position(|&b| b == 0)
                .map_or(list.len(), |p| start + p);
            if list[start..end].starts_with(&self.alternate) {
                list[start..start + prefix_len].copy_from_slice(&self.reserved);
            }
            start = end + 1;
        }
    }

    pub fn set(&self, path: &Path, name: &[u8], value: &[u8], flags: i32, position: u32) -> io::Result<()> {
        let c_path = path_to_cstring(path)?;
        let c_name = bytes_to_cstring(&self.host_name(name))?;
        host::set(&c_path, &c_name, value, flags, position)
    }

    /// Fetch into `buf`. An empty `buf` asks for the value size only.
    pub fn get(&self, path: &Path, name: &[u8], buf: &mut [u8], position: u32) -> io::Result<usize> {
        let c_path = path_to_cstring(path)?;
        let c_name = bytes_to_cstring(&self.host_name(name))?;
        host::get(&c_path, &c_name, buf, position)
    }

    /// List names into `buf`, or probe the listing size when `buf` is `None`.
    pub fn list(&self, path: &Path, buf: Option<&mut [u8]>) -> io::Result<usize> {
        let c_path = path_to_cstring(path)?;
        match buf {
            None => host::list(&c_path, &mut []),
            Some(buf) => {
                let n = host::list(&c_path, buf)?;
                if n > 0 {
                    self.unmap_list(&mut buf[..n]);
                }
                Ok(n)
            }
        }
    }

    pub fn remove(&self, path: &Path, name: &[u8]) -> io::Result<()> {
        let c_path = path_to_cstring(path)?;
        let c_name = bytes_to_cstring(&self.host_name(name))?;
        host::remove(&c_path, &c_name)
    }
}

fn buf_ptr(buf: &mut [u8]) -> *mut libc::c_void {
    if buf.is_empty() {
        std::ptr::null_mut()
    } else {
        buf.as_mut_ptr() as *mut libc::c_void
    }
}

#[cfg(target_os = "macos")]
mod host {
    use super::*;
    use std::ffi::CStr;

    pub fn set(path: &CStr, name: &CStr, value: &[u8], flags: i32, position: u32) -> io::Result<()> {
        check(unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                position,
                flags | libc::XATTR_NOFOLLOW,
            )
        })
    }

    pub fn get(path: &CStr, name: &CStr, buf: &mut [u8], position: u32) -> io::Result<usize> {
        check_len(unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf_ptr(buf),
                buf.len(),
                position,
                libc::XATTR_NOFOLLOW,
            )
        })
    }

    pub fn list(path: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        check_len(unsafe {
            libc::listxattr(
                path.as_ptr(),
                buf_ptr(buf) as *mut libc::c_char,
                buf.len(),
                libc::XATTR_NOFOLLOW,
            )
        })
    }

    pub fn remove(path: &CStr, name: &CStr) -> io::Result<()> {
        check(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), libc::XATTR_NOFOLLOW) })
    }
}

#[cfg(not(target_os = "macos"))]
mod host {
    use super::*;
    use std::ffi::CStr;

    fn no_position(position: u32) -> io::Result<()> {
        if position != 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }

    pub fn set(path: &CStr, name: &CStr, value: &[u8], flags: i32, position: u32) -> io::Result<()> {
        no_position(position)?;
        check(unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                flags,
            )
        })
    }

    pub fn get(path: &CStr, name: &CStr, buf: &mut [u8], position: u32) -> io::Result<usize> {
        no_position(position)?;
        check_len(unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), buf_ptr(buf), buf.len()) })
    }

    pub fn list(path: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        check_len(unsafe {
            libc::llistxattr(path.as_ptr(), buf_ptr(buf) as *mut libc::c_char, buf.len())
        })
    }

    pub fn remove(path: &CStr, name: &CStr) -> io::Result<()> {
        check(unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) })
    }
}
