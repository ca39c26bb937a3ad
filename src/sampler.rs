#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

//! Where the controller gets its usage figures from.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};

use crate::domain::{DiskSample, MemorySample, ResourceKind};
use crate::error::{OccupyError, OccupyResult};

/// Synchronous usage queries. Implementations must be free of side effects
/// on the occupancy pools; the controller calls them without holding any
/// pool lock.
pub trait ResourceSampler: Send + Sync {
    fn sample_memory(&self) -> OccupyResult<MemorySample>;
    /// Global CPU usage in percent.
    fn sample_cpu(&self) -> OccupyResult<f64>;
    /// Usage of the filesystem that holds `path`.
    fn sample_disk(&self, path: &Path) -> OccupyResult<DiskSample>;
}

/// [`ResourceSampler`] backed by `sysinfo`.
///
/// CPU usage is measured between consecutive calls, so with one call per
/// tick it is the average over the last interval.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    used as f64 / total as f64 * 100.0
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

impl ResourceSampler for SystemSampler {
    fn sample_memory(&self) -> OccupyResult<MemorySample> {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(OccupyError::sampling(ResourceKind::Memory, "total memory reported as 0"));
        }
        Ok(MemorySample {
            used_percent: percent(sys.used_memory(), total),
            total_bytes: total,
        })
    }

    fn sample_cpu(&self) -> OccupyResult<f64> {
        let mut sys = self.system.lock();
        sys.refresh_cpu_all();
        let usage = f64::from(sys.global_cpu_usage());
        if usage.is_finite() {
            Ok(usage)
        } else {
            Err(OccupyError::sampling(ResourceKind::Cpu, "cpu usage is not a number"))
        }
    }

    fn sample_disk(&self, path: &Path) -> OccupyResult<DiskSample> {
        let target = absolute(path);
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                OccupyError::sampling(
                    ResourceKind::Disk,
                    format!("no mounted disk holds {}", target.display()),
                )
            })?;
        let total = disk.total_space();
        if total == 0 {
            return Err(OccupyError::sampling(
                ResourceKind::Disk,
                format!("{} reports zero capacity", disk.mount_point().display()),
            ));
        }
        let used = total.saturating_sub(disk.available_space());
        Ok(DiskSample {
            used_percent: percent(used, total),
            total_bytes: total,
        })
    }
}
