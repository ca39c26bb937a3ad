#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use std::collections::TryReserveError;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{LifecycleState, ResourceKind};

/// Failures inside the occupancy engine.
///
/// None of these are fatal to the tick loop: the controller logs them and
/// tries again on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum OccupyError {
    #[error("sampling {resource} failed: {reason}")]
    Sampling {
        resource: ResourceKind,
        reason: String,
    },

    #[error("allocating {requested} bytes failed after {appended} bytes were held")]
    Allocation {
        requested: u64,
        appended: u64,
        #[source]
        source: TryReserveError,
    },

    #[error("padding file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled by stop signal")]
    Cancelled,

    #[error("{component} did not release within {waited:?}")]
    ShutdownTimeout {
        component: &'static str,
        waited: Duration,
    },

    #[error("cannot {action} while {state}")]
    Lifecycle {
        action: &'static str,
        state: LifecycleState,
    },
}

impl OccupyError {
    pub fn sampling(resource: ResourceKind, reason: impl std::fmt::Display) -> Self {
        Self::Sampling {
            resource,
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type OccupyResult<T> = Result<T, OccupyError>;
