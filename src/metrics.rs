#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use prometheus::core::Collector;
use prometheus::{Encoder, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::config::OccupancyConfig;
use crate::domain::{OccupancySnapshot, ResourceKind, UsageSample};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub running: IntGauge,
    pub memory_held_bytes: IntGauge,
    pub cpu_workers: IntGauge,
    pub disk_files: IntGauge,
    pub disk_bytes: IntGauge,
    pub ticks_total: IntCounter,
    pub sampling_errors_total: IntCounter,
    pub adjust_errors_total: IntCounter,
    pub cleanup_passes_total: IntCounter,
    pub sampled_percent: GaugeVec,
    pub target_percent: GaugeVec,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, c: &C, name: &str) -> AnyResult<()> {
    registry
        .register(Box::new(c.clone()))
        .with_context(|| format!("register {name}"))
}

fn gauge(registry: &Registry, name: &str, help: &str) -> AnyResult<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    register(registry, &g, name)?;
    Ok(g)
}

fn counter(registry: &Registry, name: &str, help: &str) -> AnyResult<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    register(registry, &c, name)?;
    Ok(c)
}

fn per_resource(registry: &Registry, name: &str, help: &str) -> AnyResult<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), &["resource"]).with_context(|| format!("create {name}"))?;
    register(registry, &g, name)?;
    Ok(g)
}

fn as_i64<T: TryInto<i64>>(v: T) -> i64 {
    v.try_into().unwrap_or(i64::MAX)
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        Ok(Self {
            running: gauge(&registry, "agent_occupy_running", "1 while the occupancy loop runs")?,
            memory_held_bytes: gauge(&registry, "agent_occupy_memory_held_bytes", "bytes held by the memory pool")?,
            cpu_workers: gauge(&registry, "agent_occupy_cpu_workers", "live cpu spinner workers")?,
            disk_files: gauge(&registry, "agent_occupy_disk_files", "padding files on disk")?,
            disk_bytes: gauge(&registry, "agent_occupy_disk_bytes", "bytes held in padding files")?,
            ticks_total: counter(&registry, "agent_occupy_ticks_total", "completed adjustment ticks")?,
            sampling_errors_total: counter(
                &registry,
                "agent_occupy_sampling_errors_total",
                "ticks skipped because sampling failed",
            )?,
            adjust_errors_total: counter(
                &registry,
                "agent_occupy_adjust_errors_total",
                "pool adjustments that failed",
            )?,
            cleanup_passes_total: counter(
                &registry,
                "agent_occupy_cleanup_passes_total",
                "full cleanup passes run",
            )?,
            sampled_percent: per_resource(&registry, "agent_occupy_sampled_percent", "last sampled usage")?,
            target_percent: per_resource(&registry, "agent_occupy_target_percent", "configured target usage")?,
            registry,
        })
    }

    pub fn set_targets(&self, cfg: &OccupancyConfig) {
        for (kind, value) in [
            (ResourceKind::Memory, cfg.memory_percent),
            (ResourceKind::Cpu, cfg.cpu_percent),
            (ResourceKind::Disk, cfg.disk_percent),
        ] {
            let label = kind.to_string();
            self.target_percent.with_label_values(&[label.as_str()]).set(value);
        }
    }

    pub fn record_sample(&self, sample: &UsageSample) {
        for (kind, value) in [
            (ResourceKind::Memory, sample.memory.used_percent),
            (ResourceKind::Cpu, sample.cpu_percent),
            (ResourceKind::Disk, sample.disk.used_percent),
        ] {
            let label = kind.to_string();
            self.sampled_percent.with_label_values(&[label.as_str()]).set(value);
        }
    }

    pub fn observe(&self, snap: &OccupancySnapshot) {
        self.memory_held_bytes.set(as_i64(snap.memory_held_bytes));
        self.cpu_workers.set(as_i64(snap.cpu_workers));
        self.disk_files.set(as_i64(snap.disk_files));
        self.disk_bytes.set(as_i64(snap.disk_bytes));
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }
}
