//! Kernel resource limits for script processes
//!
//! Limits are installed with `setrlimit` in the forked child right before
//! `exec`, so they bind the script and everything it spawns, never the runner.

use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Runner-wide limits that do not come from the script descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// RLIMIT_FSIZE in bytes
    pub max_file_size: u64,
    /// RLIMIT_NPROC
    pub max_processes: u64,
    /// Added to the wall-clock timeout to derive RLIMIT_CPU
    pub cpu_buffer: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * MIB,
            max_processes: 50,
            cpu_buffer: Duration::from_secs(10),
        }
    }
}

/// Concrete limits for one script process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub address_space: u64,
    pub cpu_seconds: u64,
    pub file_size: u64,
    pub processes: u64,
}

impl ProcessLimits {
    pub fn new(memory_bytes: u64, timeout: Duration, limits: &ResourceLimits) -> Self {
        Self {
            address_space: memory_bytes,
            cpu_seconds: timeout.as_secs() + limits.cpu_buffer.as_secs(),
            file_size: limits.max_file_size,
            processes: limits.max_processes,
        }
    }

    /// Installs the limits on the calling process
    ///
    /// Runs between `fork` and `exec`: only async-signal-safe calls, no
    /// allocation.
    pub fn apply(&self) -> std::io::Result<()> {
        set_limit(libc::RLIMIT_AS, self.address_space)?;
        set_limit(libc::RLIMIT_CPU, self.cpu_seconds)?;
        set_limit(libc::RLIMIT_FSIZE, self.file_size)?;
        set_limit(libc::RLIMIT_NPROC, self.processes)?;
        Ok(())
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

fn set_limit(resource: Resource, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Parses a memory ceiling such as `512MB`, `1.5GB`, `64kb` or `4096B`
///
/// Units are binary and case-insensitive. Returns `None` for anything else,
/// including a bare number.
pub fn parse_memory_limit(spec: &str) -> Option<u64> {
    let spec = spec.trim();
    let upper = spec.to_ascii_uppercase();

    // Longest suffix first so "MB" is never read as "M" + "B"
    for (unit, multiplier) in [("GB", GIB), ("MB", MIB), ("KB", KIB), ("B", 1)] {
        if let Some(number) = upper.strip_suffix(unit) {
            let value: f64 = number.trim().parse().ok()?;
            if !value.is_finite() || value <= 0.0 {
                return None;
            }
            return Some((value * multiplier as f64) as u64);
        }
    }
    None
}
