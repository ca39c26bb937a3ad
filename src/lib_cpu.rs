#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OccupyError, OccupyResult};

/// Spinners look at their generation this often.
const CHECK_EVERY: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SpinnerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One epoch of spinner threads. Workers only ever see the generation they
/// were spawned with, so a worker that outlives its epoch cannot disturb
/// the counts of the next one.
struct Generation {
    id: u64,
    cancelled: AtomicBool,
    live: Mutex<usize>,
    exited: Condvar,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: AtomicBool::new(false),
            live: Mutex::new(0),
            exited: Condvar::new(),
        }
    }

    fn invalidate(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_invalidated(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Waits until every worker of this generation has exited.
    fn wait_drained(&self, timeout: Duration) -> bool {
        let mut live = self.live.lock();
        let _waited = self.exited.wait_while_for(&mut live, |live| *live > 0, timeout);
        *live == 0
    }
}

/// Decrements the live count even if the spinner unwinds.
struct LiveGuard(Arc<Generation>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.0.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.0.exited.notify_all();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn spin(generation: &Arc<Generation>) {
    let _guard = LiveGuard(Arc::clone(generation));
    let mut acc = 0.0f64;
    let mut i = 0u64;
    loop {
        acc = std::hint::black_box((acc + (i % 1024) as f64 * std::f64::consts::PI).sqrt());
        i = i.wrapping_add(1);
        if i % CHECK_EVERY == 0 && generation.is_invalidated() {
            break;
        }
    }
    debug!(generation = generation.id, "spinner exited");
}

struct Spinners {
    state: SpinnerState,
    desired: usize,
    generation: Option<Arc<Generation>>,
    // Generations that outlived the stop timeout. Still counted as active
    // until their last worker exits.
    abandoned: Vec<Arc<Generation>>,
    next_generation: u64,
}

/// Busy-loop worker threads used to raise CPU utilization.
pub struct SpinnerPool {
    stop_timeout: Duration,
    inner: Mutex<Spinners>,
}

impl SpinnerPool {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            stop_timeout,
            inner: Mutex::new(Spinners {
                state: SpinnerState::Stopped,
                desired: 0,
                generation: None,
                abandoned: Vec::new(),
                next_generation: 0,
            }),
        }
    }

    /// Brings the pool to `n` workers. A change between two non-zero counts
    /// restarts the whole pool under a fresh generation.
    pub fn set_worker_count(&self, n: usize) {
        let mut s = self.inner.lock();
        if n == s.desired {
            return;
        }
        let previous = s.desired;
        s.desired = n;
        if s.state == SpinnerState::Running {
            info!(from = previous, to = n, "stopping spinners");
            self.stop_locked(&mut s);
        }
        if n > 0 {
            Self::start_locked(&mut s, n);
        }
    }

    /// Stops every worker. Unlike `set_worker_count(0)` this reports
    /// workers that did not exit in time.
    pub fn shutdown(&self) -> OccupyResult<()> {
        let mut s = self.inner.lock();
        s.desired = 0;
        if s.state != SpinnerState::Running {
            return Ok(());
        }
        if self.stop_locked(&mut s) {
            Ok(())
        } else {
            Err(OccupyError::ShutdownTimeout {
                component: "cpu spinner pool",
                waited: self.stop_timeout,
            })
        }
    }

    fn start_locked(s: &mut Spinners, n: usize) {
        s.state = SpinnerState::Starting;
        s.next_generation += 1;
        let generation = Arc::new(Generation::new(s.next_generation));
        let mut spawned = 0usize;
        for idx in 0..n {
            *generation.live.lock() += 1;
            let held = Arc::clone(&generation);
            let res = std::thread::Builder::new()
                .name(format!("occupy-spin-{}-{idx}", generation.id))
                .spawn(move || spin(&held));
            match res {
                Ok(_) => spawned += 1,
                Err(e) => {
                    *generation.live.lock() -= 1;
                    warn!(error = %e, worker = idx, "failed to spawn spinner");
                }
            }
        }
        info!(generation = generation.id, workers = spawned, "spinners started");
        if spawned == 0 {
            s.state = SpinnerState::Stopped;
            s.desired = 0;
            return;
        }
        s.generation = Some(generation);
        s.state = SpinnerState::Running;
    }

    /// Returns false when some workers were abandoned after the timeout.
    fn stop_locked(&self, s: &mut Spinners) -> bool {
        s.state = SpinnerState::Stopping;
        let mut drained = true;
        if let Some(generation) = s.generation.take() {
            generation.invalidate();
            drained = generation.wait_drained(self.stop_timeout);
            if drained {
                info!(generation = generation.id, "spinners stopped");
            } else {
                warn!(
                    generation = generation.id,
                    remaining = generation.live(),
                    timeout = ?self.stop_timeout,
                    "spinners did not stop in time, abandoning them"
                );
                s.abandoned.push(generation);
            }
        }
        s.state = SpinnerState::Stopped;
        drained
    }

    /// Live workers, including abandoned ones that have not exited yet.
    pub fn active_workers(&self) -> usize {
        let mut s = self.inner.lock();
        s.abandoned.retain(|g| g.live() > 0);
        let stale: usize = s.abandoned.iter().map(|g| g.live()).sum();
        stale + s.generation.as_ref().map_or(0, |g| g.live())
    }

    pub fn desired_workers(&self) -> usize {
        self.inner.lock().desired
    }

    pub fn state(&self) -> SpinnerState {
        self.inner.lock().state
    }
}

impl Drop for SpinnerPool {
    fn drop(&mut self) {
        if let Some(generation) = self.inner.get_mut().generation.take() {
            generation.invalidate();
        }
    }
}
