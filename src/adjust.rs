#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

//! Per-resource grow/shrink decisions.
//!
//! Everything here is a pure function of the sampled percentage, the target
//! and what the pools currently hold. Within `target ± band` nothing moves,
//! which keeps measurement noise from making the pools oscillate.

use serde::Serialize;

/// Hysteresis bands in percentage points.
pub const MEMORY_BAND: f64 = 2.0;
pub const CPU_BAND: f64 = 5.0;
pub const DISK_BAND: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// Bytes to add, or for CPU the desired worker count.
    Grow(u64),
    /// Bytes to release, or for CPU the workers to stop.
    Shrink(u64),
    NoOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Below,
    Within,
    Above,
}

pub fn position(current: f64, target: f64, band: f64) -> Position {
    if current < target - band {
        Position::Below
    } else if current > target + band {
        Position::Above
    } else {
        Position::Within
    }
}

/// Bytes needed to lift `current` up to `target` on a resource of `capacity`.
/// Never zero, so a Grow always carries a positive magnitude.
pub fn bytes_to_target(current: f64, target: f64, capacity: u64) -> u64 {
    let delta = (target - current).max(0.0) * capacity as f64 / 100.0;
    (delta as u64).max(1)
}

/// Share of held memory to give back, stepping up with the overshoot.
pub fn memory_release_ratio(excess_points: f64) -> f64 {
    if excess_points <= 5.0 {
        0.3
    } else if excess_points <= 10.0 {
        0.5
    } else {
        0.7
    }
}

pub fn memory(current: f64, target: f64, band: f64, capacity: u64, held: u64) -> Decision {
    match position(current, target, band) {
        Position::Below => Decision::Grow(bytes_to_target(current, target, capacity)),
        Position::Above => {
            let ratio = memory_release_ratio(current - target);
            Decision::Shrink((held as f64 * ratio).round() as u64)
        }
        Position::Within => Decision::NoOp,
    }
}

/// Worker count for a CPU target: `target% of cores`, kept in `[1, cores]`.
pub fn cpu_workers_for(target: f64, cores: usize) -> usize {
    let cores = cores.max(1);
    let wanted = (target.max(0.0) / 100.0 * cores as f64) as usize;
    wanted.clamp(1, cores)
}

/// CPU control is binary: either the full computed pool or nothing.
pub fn cpu(current: f64, target: f64, band: f64, cores: usize, active: usize) -> Decision {
    match position(current, target, band) {
        Position::Below => Decision::Grow(cpu_workers_for(target, cores) as u64),
        Position::Above => Decision::Shrink(active as u64),
        Position::Within => Decision::NoOp,
    }
}

/// Disk shrink always means dropping every padding file.
pub fn disk(current: f64, target: f64, band: f64, capacity: u64, padded: u64) -> Decision {
    match position(current, target, band) {
        Position::Below => Decision::Grow(bytes_to_target(current, target, capacity)),
        Position::Above => Decision::Shrink(padded),
        Position::Within => Decision::NoOp,
    }
}
