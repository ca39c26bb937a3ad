#![forbid(unsafe_code)]
#![allow(dead_code)]

use chimp_occupy_agent::domain::{DiskSample, MemorySample, ResourceKind};
use chimp_occupy_agent::{OccupyError, OccupyResult, ResourceSampler};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct Reading {
    pub memory: f64,
    pub memory_total: u64,
    pub cpu: f64,
    pub disk: f64,
    pub disk_total: u64,
}

/// Sampler that reports whatever the test sets.
pub struct ScriptedSampler {
    reading: Mutex<Reading>,
    failing: Mutex<bool>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSampler {
    pub fn new(reading: Reading) -> Self {
        Self {
            reading: Mutex::new(reading),
            failing: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, reading: Reading) {
        *self.reading.lock() = reading;
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Every sampling call blocks this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Sampling calls entered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, kind: ResourceKind) -> OccupyResult<Reading> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if *self.failing.lock() {
            return Err(OccupyError::sampling(kind, "scripted failure"));
        }
        Ok(*self.reading.lock())
    }
}

impl ResourceSampler for ScriptedSampler {
    fn sample_memory(&self) -> OccupyResult<MemorySample> {
        let r = self.check(ResourceKind::Memory)?;
        Ok(MemorySample {
            used_percent: r.memory,
            total_bytes: r.memory_total,
        })
    }

    fn sample_cpu(&self) -> OccupyResult<f64> {
        Ok(self.check(ResourceKind::Cpu)?.cpu)
    }

    fn sample_disk(&self, _path: &Path) -> OccupyResult<DiskSample> {
        let r = self.check(ResourceKind::Disk)?;
        Ok(DiskSample {
            used_percent: r.disk,
            total_bytes: r.disk_total,
        })
    }
}

pub fn padding_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out: Vec<_> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(chimp_occupy_agent::lib_disk::is_padding_file)
                })
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}
