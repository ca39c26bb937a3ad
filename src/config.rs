#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment override for where padding files are written.
pub const DISK_DIR_ENV: &str = "CHIMP_OCCUPY_DISK_DIR";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Target utilization the controller steers toward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyConfig {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub interval: Duration,
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            memory_percent: 50.0,
            cpu_percent: 30.0,
            disk_percent: 40.0,
            interval: Duration::from_secs(5),
            disk_dir: None,
        }
    }
}

impl OccupancyConfig {
    /// Explicit directory, then `CHIMP_OCCUPY_DISK_DIR`, then the OS temp dir.
    pub fn resolve_disk_dir(&self) -> PathBuf {
        if let Some(dir) = &self.disk_dir {
            return dir.clone();
        }
        match std::env::var_os(DISK_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir(),
        }
    }
}

/// Knobs that are not part of the user-facing target but bound how the
/// pools and the loop behave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuning {
    pub memory_chunk_bytes: u64,
    pub disk_write_chunk_bytes: u64,
    pub disk_file_cap_bytes: u64,
    pub cpu_stop_timeout: Duration,
    pub settle_delay: Duration,
    pub stop_timeout: Duration,
    pub logical_cores: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            memory_chunk_bytes: 100 * MIB,
            disk_write_chunk_bytes: 10 * MIB,
            disk_file_cap_bytes: 5 * GIB,
            cpu_stop_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(60),
            logical_cores: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}
