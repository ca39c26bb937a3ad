#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod adjust;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod lib_cpu;
pub mod lib_disk;
pub mod lib_mem;
pub mod metrics;
pub mod sampler;
pub mod service;
pub mod validation;

pub use adjust::Decision;
pub use config::{OccupancyConfig, Tuning};
pub use domain::{AppState, LifecycleState, OccupancySnapshot, ResourceKind};
pub use error::{OccupyError, OccupyResult};
pub use http::serve;
pub use http::{healthz, scrape_metrics, status, stop};
pub use lib_cpu::SpinnerPool;
pub use lib_disk::DiskPadding;
pub use lib_mem::MemoryPool;
pub use metrics::Metrics;
pub use sampler::{ResourceSampler, SystemSampler};
pub use service::{sweep_padding, OccupancyController, StopOutcome};
pub use validation::validate_config;
