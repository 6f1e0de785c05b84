//! System resource sampling for the health monitor
//!
//! Sampling is a pluggable trait so the monitor can be driven by scripted
//! values in tests and by whatever telemetry source the embedder prefers in
//! production. [`SystemResourceSampler`] is the built-in implementation:
//! disk usage through platform filesystem statistics, CPU and memory from
//! /proc on Linux (zero elsewhere).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Point-in-time resource usage percentages (0-100)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResourceUsage {
    /// CPU utilization percent
    pub cpu_percent: f64,
    /// Memory utilization percent
    pub memory_percent: f64,
    /// Disk utilization percent of the storage path
    pub disk_percent: f64,
}

/// Source of resource usage readings
pub trait ResourceSampler: Send + Sync {
    /// Sample current usage
    fn sample(&self) -> std::io::Result<ResourceUsage>;
}

/// Built-in sampler reading real system statistics
pub struct SystemResourceSampler {
    storage_path: PathBuf,
}

impl SystemResourceSampler {
    /// Create a sampler; `storage_path` is the filesystem whose disk usage
    /// is reported (typically the download directory).
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }
}

impl ResourceSampler for SystemResourceSampler {
    fn sample(&self) -> std::io::Result<ResourceUsage> {
        let (total, available) = disk_stats(&self.storage_path)?;
        let disk_percent = if total > 0 {
            100.0 * (1.0 - available as f64 / total as f64)
        } else {
            0.0
        };

        Ok(ResourceUsage {
            cpu_percent: cpu_percent(),
            memory_percent: memory_percent(),
            disk_percent,
        })
    }
}

/// Total and available bytes of the filesystem containing `path`.
///
/// Uses platform-specific APIs:
/// - Unix: statvfs
/// - Windows: GetDiskFreeSpaceExW
fn disk_stats(path: &Path) -> std::io::Result<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid null-terminated C string, stat is zeroed
        // before the call, and only read after the call succeeds.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let total = stat.f_blocks.saturating_mul(stat.f_frsize);
            let available = stat.f_bavail.saturating_mul(stat.f_frsize);
            Ok((total, available))
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is null-terminated and the output pointers are
        // valid aligned u64 variables only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok((total_bytes, free_bytes_available))
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "disk usage checking is not supported on this platform",
        ))
    }
}

/// One-minute load average normalized by core count, as a rough CPU percent.
#[cfg(target_os = "linux")]
fn cpu_percent() -> f64 {
    let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") else {
        return 0.0;
    };
    let Some(one_minute) = loadavg
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
    else {
        return 0.0;
    };

    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0);
    (100.0 * one_minute / cores).clamp(0.0, 100.0)
}

#[cfg(not(target_os = "linux"))]
fn cpu_percent() -> f64 {
    0.0
}

/// Memory utilization from /proc/meminfo (MemTotal vs MemAvailable).
#[cfg(target_os = "linux")]
fn memory_percent() -> f64 {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return 0.0;
    };

    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<f64>()
            .ok()
    };

    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => {
            (100.0 * (1.0 - available / total)).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

#[cfg(not(target_os = "linux"))]
fn memory_percent() -> f64 {
    0.0
}

/// Scripted sampler for tests and for embedders with external telemetry.
pub struct StaticResourceSampler {
    usage: Mutex<ResourceUsage>,
}

impl StaticResourceSampler {
    /// Create a sampler that always reports `usage`
    pub fn new(usage: ResourceUsage) -> Self {
        Self {
            usage: Mutex::new(usage),
        }
    }

    /// Replace the reported usage
    pub fn set(&self, usage: ResourceUsage) {
        if let Ok(mut guard) = self.usage.lock() {
            *guard = usage;
        }
    }
}

impl ResourceSampler for StaticResourceSampler {
    fn sample(&self) -> std::io::Result<ResourceUsage> {
        self.usage
            .lock()
            .map(|guard| *guard)
            .map_err(|_| std::io::Error::other("sampler mutex poisoned"))
    }
}
