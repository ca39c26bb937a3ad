#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Memory,
    Cpu,
    Disk,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Memory => f.write_str("MEMORY"),
            ResourceKind::Cpu => f.write_str("CPU"),
            ResourceKind::Disk => f.write_str("DISK"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> AnyResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MEMORY" => Ok(Self::Memory),
            "CPU" => Ok(Self::Cpu),
            "DISK" => Ok(Self::Disk),
            other => bail!("unsupported resource: {other}"),
        }
    }
}

/// Controller lifecycle. Moves strictly forward:
/// `Idle -> Running -> Stopping -> Stopped`, or `Idle -> Stopped` when
/// stopped before it ever ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => f.write_str("idle"),
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Stopping => f.write_str("stopping"),
            LifecycleState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_percent: f64,
    pub total_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    pub used_percent: f64,
    pub total_bytes: u64,
}

/// One reading of all three resources, taken at the start of a tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub memory: MemorySample,
    pub cpu_percent: f64,
    pub disk: DiskSample,
    pub taken_ts_seconds: i64,
}

/// What the controller currently holds, for `/status` and logs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub state: LifecycleState,
    pub memory_held_bytes: u64,
    pub memory_chunks: usize,
    pub cpu_workers: usize,
    pub disk_files: usize,
    pub disk_bytes: u64,
    pub ticks: u64,
    pub cleanup_passes: u64,
    pub last_sample: Option<UsageSample>,
}

#[derive(Clone)]
pub struct AppState {
    pub ctrl: crate::service::OccupancyController,
    pub metrics: crate::metrics::Metrics,
}
