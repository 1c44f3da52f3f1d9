//! Headless SPH runner.
//!
//! Loads a scene configuration, runs it to completion on the selected backend
//! and prints a summary of the final frame.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sph_orchestrator::{
    create_kernel, prepare_scene, BackendType, RunnerOptions, SimulationConfig, SimulationRunner,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run a cell-sorted SPH simulation without a viewer.
#[derive(Parser)]
#[command(name = "sph-run")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Scene configuration (.json)
    config: PathBuf,

    /// Number of ticks to run (overrides max_ticks in the config)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Compute backend (overrides the config)
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Write the final particle buffer as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Cpu,
    Gpu,
    Auto,
}

impl From<Backend> for BackendType {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Cpu => BackendType::Cpu,
            Backend::Gpu => BackendType::Gpu,
            Backend::Auto => BackendType::Auto,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sph_run=info,sph_orchestrator=info,sph_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = SimulationConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    let max_ticks = cli.ticks.or(config.max_ticks).unwrap_or(1000);

    tracing::info!(name = %config.name, max_ticks, backend = ?config.backend, "starting");
    let kernel = create_kernel(config.backend, prepare_scene(&config)?)?;
    let runner = SimulationRunner::new(
        kernel,
        RunnerOptions {
            max_ticks: Some(max_ticks),
            log_interval: config.log_interval,
            snapshot_interval: config.log_interval,
        },
    );

    let started = Instant::now();
    runner.start();
    let snapshot = runner
        .join()?
        .context("runner finished without publishing a snapshot")?;
    let elapsed = started.elapsed().as_secs_f64();

    let stats = snapshot.stats();
    println!(
        "{}: {} ticks in {:.2}s ({:.1} ticks/s)",
        config.name,
        snapshot.tick,
        elapsed,
        snapshot.tick as f64 / elapsed.max(1e-9)
    );
    println!(
        "live {}  max speed {:.4} m/s  mean height {:.4} m  lowest {:.4} m",
        stats.live_count, stats.max_speed, stats.mean_height, stats.lowest
    );

    if let Some(path) = cli.output {
        let json = serde_json::to_string(&snapshot.particles)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("particles written to {}", path.display());
    }
    Ok(())
}
