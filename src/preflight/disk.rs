//! Free-space probe

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{ManagerError, ManagerResult};

/// Reports bytes available to unprivileged writers below a path
pub trait SpaceProbe {
    fn available_bytes(&self, path: &Path) -> ManagerResult<u64>;
}

/// `statvfs(3)`-backed probe
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> ManagerResult<u64> {
        available_bytes(path)
    }
}

/// Bytes available on the filesystem holding `path`
pub fn available_bytes(path: &Path) -> ManagerResult<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ManagerError::Validation(format!("Path contains NUL: {}", path.display())))?;

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ManagerError::Io(format!(
            "statvfs failed for {}: {}",
            path.display(),
            err
        )));
    }

    #[allow(clippy::unnecessary_cast)]
    let bytes = (stats.f_bavail as u64).saturating_mul(stats.f_frsize as u64);
    Ok(bytes)
}
