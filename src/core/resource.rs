//! Resource requirements for task execution.
//!
//! Tasks declare how many CPUs, how much memory, and how much scratch disk
//! they need. The executor reserves these against a [`HostCapacity`] before
//! launching the task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZero;
use std::path::Path;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Resource request of a single task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Whole CPU cores.
    pub cpu_count: u32,
    /// Memory limit in bytes.
    pub memory_bytes: u64,
    /// Scratch disk in bytes.
    pub disk_bytes: u64,
}

impl ResourceRequirements {
    /// Create empty requirements (no constraints).
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder: set CPU cores requirement.
    pub fn with_cpu(mut self, cores: u32) -> Self {
        self.cpu_count = cores;
        self
    }

    /// Builder: set memory requirement in bytes.
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Builder: set disk requirement in bytes.
    pub fn with_disk(mut self, bytes: u64) -> Self {
        self.disk_bytes = bytes;
        self
    }

    /// Check if this has any requirements.
    pub fn is_empty(&self) -> bool {
        self.cpu_count == 0 && self.memory_bytes == 0 && self.disk_bytes == 0
    }
}

impl fmt::Display for ResourceRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu, {} memory, {} disk",
            self.cpu_count,
            format_bytes(self.memory_bytes),
            format_bytes(self.disk_bytes)
        )
    }
}

/// Total resources available to concurrently running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub cpu_count: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

impl HostCapacity {
    pub fn new(cpu_count: u32, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_count,
            memory_bytes,
            disk_bytes,
        }
    }

    /// Capacity that never constrains anything.
    pub fn unbounded() -> Self {
        Self::new(u32::MAX, u64::MAX, u64::MAX)
    }

    /// Whether a single request could ever be satisfied.
    pub fn admits(&self, request: &ResourceRequirements) -> bool {
        request.cpu_count <= self.cpu_count
            && request.memory_bytes <= self.memory_bytes
            && request.disk_bytes <= self.disk_bytes
    }
}

impl fmt::Display for HostCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu, {} memory, {} disk",
            self.cpu_count,
            format_bytes(self.memory_bytes),
            format_bytes(self.disk_bytes)
        )
    }
}

/// Logical CPUs this process may use.
pub fn available_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1)
        .try_into()
        .unwrap_or(u32::MAX)
}

/// Physical memory of the host, when the platform reports it.
#[cfg(unix)]
pub fn physical_memory() -> Option<u64> {
    // SAFETY: sysconf only reads system configuration values.
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    (pages as u64).checked_mul(page_size as u64)
}

#[cfg(not(unix))]
pub fn physical_memory() -> Option<u64> {
    None
}

/// Space available to unprivileged writers on the filesystem that holds
/// `path`, or its nearest existing ancestor.
#[cfg(unix)]
pub fn available_disk(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let existing = path
        .ancestors()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.exists())?;
    let c_path = CString::new(existing.as_os_str().as_bytes()).ok()?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` is only read after
    // statvfs reports that it filled it in.
    let stat = unsafe {
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return None;
        }
        stat.assume_init()
    };
    (stat.f_bavail as u64).checked_mul(stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn available_disk(_path: &Path) -> Option<u64> {
    None
}

/// Parse a byte size such as `512`, `"64MiB"`, `"8G"` or `"1.5GiB"`.
///
/// Both decimal (`KB`, `MB`, `GB`, `TB`) and binary (`KiB`, ..., and the bare
/// `K`, `M`, `G`, `T` shorthands) units are accepted.
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1000,
        "mb" => 1000 * 1000,
        "gb" => 1000 * 1000 * 1000,
        "tb" => 1000 * 1000 * 1000 * 1000,
        "k" | "kib" => KIB,
        "m" | "mib" => MIB,
        "g" | "gib" => GIB,
        "t" | "tib" => 1024 * GIB,
        _ => return None,
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

fn format_bytes(bytes: u64) -> String {
    if bytes == u64::MAX {
        "unbounded".to_string()
    } else if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GiB", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MiB", bytes / MIB)
    } else {
        format!("{}B", bytes)
    }
}
