#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use chimp_occupy_agent::adjust::{self, Decision, MEMORY_BAND};
use chimp_occupy_agent::lib_cpu::SpinnerState;
use chimp_occupy_agent::{MemoryPool, OccupyError, SpinnerPool};
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

fn wait_for(mut cond: impl FnMut() -> bool, within: Duration) -> bool {
    let end = Instant::now() + within;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn mem_grow_holds_exact_bytes() {
    let pool = MemoryPool::new(MIB);
    let grown = pool.grow(2 * MIB + 123).expect("ok");
    assert_eq!(grown, 2 * MIB + 123);
    assert_eq!(pool.total_bytes(), 2 * MIB + 123);
    assert_eq!(pool.chunk_count(), 3);
}

#[test]
fn mem_grow_zero_is_noop() {
    let pool = MemoryPool::new(MIB);
    assert_eq!(pool.grow(0).expect("ok"), 0);
    assert_eq!(pool.chunk_count(), 0);
}

#[test]
fn mem_shrink_is_lifo_and_exact() {
    let pool = MemoryPool::new(MIB);
    pool.grow(4 * MIB).expect("ok");
    let released = pool.shrink(MIB + MIB / 2);
    assert_eq!(released, MIB + MIB / 2);
    assert_eq!(pool.total_bytes(), 4 * MIB - (MIB + MIB / 2));
    // one chunk dropped, the next one cut in half
    assert_eq!(pool.chunk_count(), 3);
}

#[test]
fn mem_shrink_more_than_held_releases_everything() {
    let pool = MemoryPool::new(MIB);
    pool.grow(3 * MIB).expect("ok");
    assert_eq!(pool.shrink(10 * MIB), 3 * MIB);
    assert_eq!(pool.total_bytes(), 0);
    assert_eq!(pool.chunk_count(), 0);
}

#[test]
fn mem_large_overshoot_releases_seventy_percent() {
    let pool = MemoryPool::new(MIB);
    pool.grow(10 * MIB).expect("ok");
    assert_eq!(pool.chunk_count(), 10);

    let decision = adjust::memory(90.0, 50.0, MEMORY_BAND, 64 * 1024 * MIB, pool.total_bytes());
    let Decision::Shrink(bytes) = decision else {
        panic!("expected shrink, got {decision:?}");
    };
    pool.shrink(bytes);
    assert!(pool.chunk_count() <= 3);
}

#[test]
fn mem_release_fraction_and_all() {
    let pool = MemoryPool::new(MIB);
    pool.grow(10 * MIB).expect("ok");
    assert_eq!(pool.release_fraction(0.5), 5 * MIB);
    assert_eq!(pool.total_bytes(), 5 * MIB);
    assert_eq!(pool.release_all(), 5 * MIB);
    assert_eq!(pool.total_bytes(), 0);
    assert_eq!(pool.release_all(), 0);
}

#[test]
fn cpu_pool_reaches_requested_workers() {
    let pool = SpinnerPool::new(Duration::from_secs(10));
    assert_eq!(pool.state(), SpinnerState::Stopped);
    pool.set_worker_count(2);
    assert!(wait_for(|| pool.active_workers() == 2, Duration::from_secs(5)));
    assert_eq!(pool.state(), SpinnerState::Running);
    assert_eq!(pool.desired_workers(), 2);

    pool.set_worker_count(0);
    assert_eq!(pool.active_workers(), 0);
    assert_eq!(pool.state(), SpinnerState::Stopped);
}

#[test]
fn cpu_pool_restarts_on_new_count() {
    let pool = SpinnerPool::new(Duration::from_secs(10));
    pool.set_worker_count(1);
    assert!(wait_for(|| pool.active_workers() == 1, Duration::from_secs(5)));
    pool.set_worker_count(3);
    assert!(wait_for(|| pool.active_workers() == 3, Duration::from_secs(5)));
    // same count again is a no-op
    pool.set_worker_count(3);
    assert_eq!(pool.active_workers(), 3);
    pool.shutdown().expect("workers stop in time");
    assert_eq!(pool.active_workers(), 0);
}

#[test]
fn cpu_pool_shutdown_when_idle() {
    let pool = SpinnerPool::new(Duration::from_secs(1));
    pool.shutdown().expect("nothing to stop");
    pool.set_worker_count(0);
    assert_eq!(pool.state(), SpinnerState::Stopped);
}

#[test]
fn cpu_pool_shutdown_gives_up_after_timeout() {
    let pool = SpinnerPool::new(Duration::ZERO);
    pool.set_worker_count(4);
    assert_eq!(pool.active_workers(), 4);

    let started = Instant::now();
    let res = pool.shutdown();
    assert!(matches!(res, Err(OccupyError::ShutdownTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(pool.state(), SpinnerState::Stopped);

    // abandoned spinners still see the invalidated generation and exit
    assert!(wait_for(|| pool.active_workers() == 0, Duration::from_secs(5)));
}
