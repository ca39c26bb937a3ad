#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use anyhow::Result as AnyResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adjust::{self, Decision, CPU_BAND, DISK_BAND, MEMORY_BAND};
use crate::config::{OccupancyConfig, Tuning};
use crate::domain::{LifecycleState, OccupancySnapshot, UsageSample};
use crate::error::{OccupyError, OccupyResult};
use crate::lib_cpu::SpinnerPool;
use crate::lib_disk::DiskPadding;
use crate::lib_mem::MemoryPool;
use crate::metrics::Metrics;
use crate::sampler::{ResourceSampler, SystemSampler};
use crate::validation::{validate_config, validate_tuning};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    /// This call ran the shutdown and cleanup finished in time.
    Completed,
    /// This call ran the shutdown but cleanup outlived the stop timeout.
    TimedOut,
    /// Another call already requested shutdown.
    AlreadyStopping,
}

struct Inner {
    config: OccupancyConfig,
    tuning: Tuning,
    sampler: Arc<dyn ResourceSampler>,
    metrics: Metrics,
    memory: MemoryPool,
    cpu: SpinnerPool,
    disk: DiskPadding,
    state: Mutex<LifecycleState>,
    stop: CancellationToken,
    cleaned: CancellationToken,
    ticks: AtomicU64,
    cleanup_passes: AtomicU64,
    last_sample: Mutex<Option<UsageSample>>,
}

impl Inner {
    fn check_stop(&self) -> OccupyResult<()> {
        if self.stop.is_cancelled() {
            Err(OccupyError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn sample_all(&self) -> OccupyResult<UsageSample> {
        self.check_stop()?;
        let memory = self.sampler.sample_memory()?;
        self.check_stop()?;
        let cpu_percent = self.sampler.sample_cpu()?;
        self.check_stop()?;
        let disk = self.sampler.sample_disk(self.disk.dir())?;
        self.check_stop()?;
        Ok(UsageSample {
            memory,
            cpu_percent,
            disk,
            taken_ts_seconds: chrono::Utc::now().timestamp(),
        })
    }

    fn apply_disk(&self, decision: Decision) {
        match decision {
            Decision::Grow(bytes) => match self.disk.grow(bytes, &self.stop) {
                Ok(report) if report.failed_files > 0 => {
                    self.metrics.adjust_errors_total.inc();
                    warn!(
                        written = report.bytes_written,
                        failed = report.failed_files,
                        "disk padding fell short"
                    );
                }
                Ok(report) => debug!(written = report.bytes_written, "disk padding applied"),
                Err(OccupyError::Cancelled) => {}
                Err(e) => {
                    self.metrics.adjust_errors_total.inc();
                    warn!(error = %e, "disk padding failed");
                }
            },
            Decision::Shrink(_) => {
                if let Err(e) = self.disk.shrink_all() {
                    self.metrics.adjust_errors_total.inc();
                    warn!(error = %e, "removing padding files failed");
                }
            }
            Decision::NoOp => {}
        }
    }

    fn apply_cpu(&self, decision: Decision) {
        match decision {
            Decision::Grow(workers) => {
                self.cpu.set_worker_count(usize::try_from(workers).unwrap_or(usize::MAX));
            }
            Decision::Shrink(_) => self.cpu.set_worker_count(0),
            Decision::NoOp => {}
        }
    }

    /// `excess` is how far usage sits above the target, in points.
    fn apply_memory(&self, decision: Decision, excess: f64) {
        match decision {
            Decision::Grow(bytes) => {
                if let Err(e) = self.memory.grow(bytes) {
                    self.metrics.adjust_errors_total.inc();
                    warn!(error = %e, "memory grow stopped early");
                }
            }
            Decision::Shrink(_) => {
                self.memory
                    .release_fraction(adjust::memory_release_ratio(excess));
            }
            Decision::NoOp => {}
        }
    }

    /// Second half of a tick: runs after the settle delay with a fresh
    /// memory reading, since disk writes move the page cache.
    fn adjust_cpu_and_memory(&self, sample: &UsageSample) -> OccupyResult<()> {
        self.check_stop()?;
        let memory = self.sampler.sample_memory()?;
        self.check_stop()?;

        let cpu = adjust::cpu(
            sample.cpu_percent,
            self.config.cpu_percent,
            CPU_BAND,
            self.tuning.logical_cores,
            self.cpu.active_workers(),
        );
        debug!(?cpu, "cpu decision");
        self.apply_cpu(cpu);
        self.check_stop()?;

        let mem = adjust::memory(
            memory.used_percent,
            self.config.memory_percent,
            MEMORY_BAND,
            memory.total_bytes,
            self.memory.total_bytes(),
        );
        debug!(?mem, used_percent = memory.used_percent, "memory decision");
        self.apply_memory(mem, memory.used_percent - self.config.memory_percent);
        Ok(())
    }

    fn cleanup(&self) {
        info!("releasing all occupied resources");
        if let Err(e) = self.cpu.shutdown() {
            warn!(error = %e, "cpu spinners not fully stopped");
        }
        let released = self.memory.release_all();
        let removed = match self.disk.shrink_all() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "padding cleanup incomplete");
                0
            }
        };
        self.cleanup_passes.fetch_add(1, Ordering::SeqCst);
        self.metrics.cleanup_passes_total.inc();
        self.publish();
        info!(released_bytes = released, removed_files = removed, "cleanup complete");
    }

    fn snapshot(&self) -> OccupancySnapshot {
        OccupancySnapshot {
            state: *self.state.lock(),
            memory_held_bytes: self.memory.total_bytes(),
            memory_chunks: self.memory.chunk_count(),
            cpu_workers: self.cpu.active_workers(),
            disk_files: self.disk.file_count(),
            disk_bytes: self.disk.padded_bytes(),
            ticks: self.ticks.load(Ordering::SeqCst),
            cleanup_passes: self.cleanup_passes.load(Ordering::SeqCst),
            last_sample: *self.last_sample.lock(),
        }
    }

    fn publish(&self) {
        self.metrics.observe(&self.snapshot());
    }
}

/// Samples usage on an interval and drives the memory, CPU and disk pools
/// toward the configured targets.
///
/// Cloning is cheap and every clone controls the same engine, so one clone
/// can run [`start`](Self::start) on its own task while another calls
/// [`stop`](Self::stop).
#[derive(Clone)]
pub struct OccupancyController {
    inner: Arc<Inner>,
}

impl OccupancyController {
    /// Controller with the `sysinfo` sampler and default tuning.
    pub fn new(config: OccupancyConfig) -> AnyResult<Self> {
        Self::with_parts(
            config,
            Tuning::default(),
            Arc::new(SystemSampler::new()),
            Metrics::new()?,
        )
    }

    pub fn with_parts(
        config: OccupancyConfig,
        tuning: Tuning,
        sampler: Arc<dyn ResourceSampler>,
        metrics: Metrics,
    ) -> AnyResult<Self> {
        validate_config(&config)?;
        validate_tuning(&tuning)?;
        metrics.set_targets(&config);
        let disk = DiskPadding::new(
            config.resolve_disk_dir(),
            tuning.disk_write_chunk_bytes,
            tuning.disk_file_cap_bytes,
        );
        Ok(Self {
            inner: Arc::new(Inner {
                memory: MemoryPool::new(tuning.memory_chunk_bytes),
                cpu: SpinnerPool::new(tuning.cpu_stop_timeout),
                disk,
                config,
                tuning,
                sampler,
                metrics,
                state: Mutex::new(LifecycleState::Idle),
                stop: CancellationToken::new(),
                cleaned: CancellationToken::new(),
                ticks: AtomicU64::new(0),
                cleanup_passes: AtomicU64::new(0),
                last_sample: Mutex::new(None),
            }),
        })
    }

    /// Runs the adjustment loop until [`stop`](Self::stop) is called, then
    /// releases everything. Only valid from `Idle`.
    pub async fn start(&self) -> OccupyResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != LifecycleState::Idle {
                return Err(OccupyError::Lifecycle {
                    action: "start",
                    state: *state,
                });
            }
            *state = LifecycleState::Running;
        }
        let cfg = &self.inner.config;
        info!(
            memory = cfg.memory_percent,
            cpu = cfg.cpu_percent,
            disk = cfg.disk_percent,
            interval = ?cfg.interval,
            disk_dir = %self.inner.disk.dir().display(),
            "occupancy loop started"
        );
        self.inner.metrics.running.set(1);

        let mut ticker = interval_at(Instant::now() + cfg.interval, cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.inner.stop.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("occupancy loop stopping");
        self.finish().await;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        match tokio::task::spawn_blocking(move || f(&inner)).await {
            Ok(v) => Some(v),
            Err(e) => {
                error!(error = %e, "blocking occupancy work failed");
                None
            }
        }
    }

    async fn tick(&self) {
        let sample = match self.blocking(Inner::sample_all).await {
            Some(Ok(sample)) => sample,
            Some(Err(OccupyError::Cancelled)) | None => return,
            Some(Err(e)) => {
                self.inner.metrics.sampling_errors_total.inc();
                warn!(error = %e, "sampling failed, skipping tick");
                return;
            }
        };
        info!(
            memory = format_args!("{:.1}", sample.memory.used_percent),
            cpu = format_args!("{:.1}", sample.cpu_percent),
            disk = format_args!("{:.1}", sample.disk.used_percent),
            "current usage"
        );
        self.inner.metrics.record_sample(&sample);
        *self.inner.last_sample.lock() = Some(sample);

        let disk = adjust::disk(
            sample.disk.used_percent,
            self.inner.config.disk_percent,
            DISK_BAND,
            sample.disk.total_bytes,
            self.inner.disk.padded_bytes(),
        );
        debug!(?disk, "disk decision");
        if self.blocking(move |inner| inner.apply_disk(disk)).await.is_none() {
            return;
        }

        tokio::select! {
            biased;
            () = self.inner.stop.cancelled() => return,
            () = sleep(self.inner.tuning.settle_delay) => {}
        }

        match self.blocking(move |inner| inner.adjust_cpu_and_memory(&sample)).await {
            Some(Ok(())) => {}
            Some(Err(OccupyError::Cancelled)) | None => return,
            Some(Err(e)) => {
                self.inner.metrics.sampling_errors_total.inc();
                warn!(error = %e, "re-sampling memory failed, cpu and memory left as is");
                return;
            }
        }

        self.inner.ticks.fetch_add(1, Ordering::SeqCst);
        self.inner.metrics.ticks_total.inc();
        self.inner.publish();
    }

    /// Runs the single cleanup pass and marks the controller stopped.
    async fn finish(&self) {
        if self.blocking(Inner::cleanup).await.is_none() {
            error!("cleanup pass aborted");
        }
        *self.inner.state.lock() = LifecycleState::Stopped;
        self.inner.metrics.running.set(0);
        self.inner.cleaned.cancel();
    }

    /// Requests shutdown and waits, at most the stop timeout, for cleanup.
    ///
    /// Only the first call does anything; concurrent and later calls
    /// return [`StopOutcome::AlreadyStopping`] straight away.
    pub async fn stop(&self) -> StopOutcome {
        let prior = {
            let mut state = self.inner.state.lock();
            let prior = *state;
            if matches!(prior, LifecycleState::Idle | LifecycleState::Running) {
                *state = LifecycleState::Stopping;
            }
            prior
        };
        match prior {
            LifecycleState::Running => {
                info!("stop requested");
                self.inner.stop.cancel();
            }
            LifecycleState::Idle => {
                info!("stop requested before start");
                self.inner.stop.cancel();
                let ctrl = self.clone();
                tokio::spawn(async move { ctrl.finish().await });
            }
            LifecycleState::Stopping | LifecycleState::Stopped => {
                debug!(state = %prior, "stop already requested");
                return StopOutcome::AlreadyStopping;
            }
        }

        let timeout = self.inner.tuning.stop_timeout;
        if tokio::time::timeout(timeout, self.inner.cleaned.cancelled())
            .await
            .is_ok()
        {
            info!("resource cleanup finished");
            StopOutcome::Completed
        } else {
            let err = OccupyError::ShutdownTimeout {
                component: "occupancy controller",
                waited: timeout,
            };
            warn!(error = %err, "giving up waiting for cleanup");
            StopOutcome::TimedOut
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn snapshot(&self) -> OccupancySnapshot {
        self.inner.snapshot()
    }

    pub fn config(&self) -> &OccupancyConfig {
        &self.inner.config
    }

    pub fn disk_dir(&self) -> &Path {
        self.inner.disk.dir()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Resolves once cleanup has run, whoever triggered it.
    pub async fn stopped(&self) {
        self.inner.cleaned.cancelled().await;
    }
}

/// Removes padding files left behind in `dir` by earlier runs.
pub fn sweep_padding(dir: impl Into<PathBuf>) -> OccupyResult<usize> {
    let tuning = Tuning::default();
    DiskPadding::new(dir, tuning.disk_write_chunk_bytes, tuning.disk_file_cap_bytes).shrink_all()
}
