#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use crate::config::{OccupancyConfig, Tuning};

fn check_percent(name: &str, value: f64) -> AnyResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        bail!("{name} must be within 0..=100, got {value}");
    }
    Ok(())
}

pub fn validate_config(cfg: &OccupancyConfig) -> AnyResult<()> {
    check_percent("memory_percent", cfg.memory_percent)?;
    check_percent("cpu_percent", cfg.cpu_percent)?;
    check_percent("disk_percent", cfg.disk_percent)?;
    if cfg.interval.is_zero() { bail!("interval must be > 0"); }
    if let Some(dir) = &cfg.disk_dir {
        if dir.as_os_str().is_empty() { bail!("disk_dir is empty"); }
    }
    Ok(())
}

pub fn validate_tuning(t: &Tuning) -> AnyResult<()> {
    if t.memory_chunk_bytes == 0 { bail!("memory_chunk_bytes must be > 0"); }
    if t.disk_write_chunk_bytes == 0 { bail!("disk_write_chunk_bytes must be > 0"); }
    if t.disk_file_cap_bytes == 0 { bail!("disk_file_cap_bytes must be > 0"); }
    if t.logical_cores == 0 { bail!("logical_cores must be > 0"); }
    Ok(())
}
