//! Tunable client backed by `/proc/sys`.
//!
//! Keys use the dotted `sysctl(8)` notation (`net.ipv4.conf.all.rp_filter`)
//! and map straight onto procfs paths. Values are plain strings: the kernel
//! does its own validation on write, and reads are trimmed of the trailing
//! newline procfs appends.

use std::{io, path::PathBuf};

use super::{KernelError, Result, SysctlOps};

/// [`SysctlOps`] implementation reading and writing `/proc/sys` entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcSysctl;

impl SysctlOps for ProcSysctl {
    fn read(&self, key: &str) -> Result<String> {
        std::fs::read_to_string(sysctl_path(key))
            .map(|value| value.trim().to_owned())
            .map_err(from_io)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!(key, value, "writing sysctl");
        std::fs::write(sysctl_path(key), value).map_err(from_io)
    }
}

/// Maps a dotted sysctl key onto its procfs path.
fn sysctl_path(key: &str) -> PathBuf {
    PathBuf::from("/proc/sys").join(key.replace('.', "/"))
}

fn from_io(err: io::Error) -> KernelError {
    if err.kind() == io::ErrorKind::NotFound {
        KernelError::NotFound
    } else {
        KernelError::Operation(err.to_string())
    }
}
