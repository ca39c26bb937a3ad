#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use chimp_occupy_agent::config::DISK_DIR_ENV;
use chimp_occupy_agent::{serve, sweep_padding, AppState, OccupancyConfig, OccupancyController};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Hold memory, CPU and disk usage at target percentages.
#[derive(Debug, Parser)]
#[command(name = "chimp-occupy-agent", version)]
struct Cli {
    /// Target memory usage percent
    #[arg(short, long, default_value_t = 50.0)]
    memory: f64,
    /// Target CPU usage percent
    #[arg(short, long, default_value_t = 30.0)]
    cpu: f64,
    /// Target disk usage percent
    #[arg(short, long, default_value_t = 40.0)]
    disk: f64,
    /// Sampling interval, e.g. `5s` or `1m`
    #[arg(short, long, default_value = "5s", value_parser = humantime::parse_duration)]
    interval: Duration,
    /// Directory for padding files (defaults to the OS temp dir)
    #[arg(long, env = DISK_DIR_ENV)]
    disk_dir: Option<PathBuf>,
    /// Serve /healthz, /status, /metrics and POST /stop on this address
    #[arg(long)]
    http_bind: Option<String>,
    /// Remove padding files left by earlier runs and exit
    #[arg(long)]
    cleanup: bool,
}

impl Cli {
    fn config(&self) -> OccupancyConfig {
        OccupancyConfig {
            memory_percent: self.memory,
            cpu_percent: self.cpu,
            disk_percent: self.disk,
            interval: self.interval,
            disk_dir: self.disk_dir.clone(),
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    fmt.json().init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config();

    if cli.cleanup {
        let dir = config.resolve_disk_dir();
        let removed = sweep_padding(&dir)?;
        info!(removed, dir = %dir.display(), "stale padding files removed");
        return Ok(());
    }

    let ctrl = OccupancyController::new(config)?;
    let runner = ctrl.clone();
    let loop_task = tokio::spawn(async move { runner.start().await });

    let state = AppState {
        ctrl: ctrl.clone(),
        metrics: ctrl.metrics().clone(),
    };
    let server = async move {
        match cli.http_bind {
            Some(bind) => serve(&bind, state).await,
            None => std::future::pending::<std::io::Result<()>>().await,
        }
    };

    tokio::select! {
        () = shutdown_signal() => {
            let outcome = ctrl.stop().await;
            info!(?outcome, "shutdown finished");
        }
        () = ctrl.stopped() => info!("stopped over http"),
        res = server => {
            if let Err(e) = res {
                error!(error = %e, "status server failed, shutting down");
            }
            let outcome = ctrl.stop().await;
            info!(?outcome, "shutdown finished");
        }
    }

    if loop_task.is_finished() {
        match loop_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "occupancy loop refused to start"),
            Err(e) => error!(error = %e, "occupancy loop panicked"),
        }
    } else {
        warn!("occupancy loop still busy, exiting anyway");
    }
    Ok(())
}
