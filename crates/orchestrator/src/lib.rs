//! Orchestration Layer
//!
//! This crate turns a JSON scene description into a running SPH simulation:
//! - configuration parsing and validation
//! - initial particle placement (lattice or gradual spawning)
//! - backend selection (CPU, GPU, or auto-detect with CPU fallback)
//! - simulation runner with lifecycle management

#![warn(missing_docs)]

pub mod config;
pub mod domain;
pub mod runner;

pub use config::{BackendType, ConfigError, SimulationConfig};
pub use runner::{RunnerOptions, RunnerState, SimulationRunner};

use sph_kernel::{
    CpuKernel, Particle, SetupError, SimulationConstants, SimulationKernel, SolverOptions,
    SpawnSchedule,
};
use std::path::Path;

/// Errors raised while setting up or running a simulation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The kernel rejected the scene.
    #[error("simulation setup failed: {0}")]
    Setup(#[from] SetupError),
    /// The GPU backend was requested but is not compiled in.
    #[error("GPU backend requested but the 'gpu' feature is not enabled")]
    GpuDisabled,
    /// A tick panicked on the runner thread.
    #[error("simulation tick failed: {0}")]
    TickFailed(String),
    /// The runner thread itself panicked.
    #[error("simulation thread panicked")]
    RunnerPanicked,
}

/// Everything needed to build a kernel, derived from a configuration.
#[derive(Debug, Clone)]
pub struct PreparedScene {
    /// Derived constants.
    pub constants: SimulationConstants,
    /// Initial particle slots.
    pub particles: Vec<Particle>,
    /// Gradual spawn schedule, if any.
    pub spawn: Option<SpawnSchedule>,
    /// Solver knobs.
    pub solver: SolverOptions,
}

/// Derive constants and lay out the initial particles.
pub fn prepare_scene(config: &SimulationConfig) -> Result<PreparedScene, OrchestratorError> {
    let scene = &config.scene;
    let constants = SimulationConstants::derive(
        &scene.container,
        scene.spawn.grid,
        scene.particle_radius,
        &config.physics,
    )?;
    tracing::info!(
        particles = constants.particle_count,
        h = constants.h,
        mass = constants.mass,
        grid = ?constants.grid.dims(),
        "constants derived"
    );
    let particles = domain::initial_particles(&scene.spawn, &constants);
    Ok(PreparedScene {
        constants,
        particles,
        spawn: scene.spawn.schedule(),
        solver: config.solver,
    })
}

/// Create a complete simulation from a configuration file
///
/// Loads and validates the configuration, derives the constants, lays out the
/// particles, builds the kernel for the configured backend and wraps it in a
/// [`SimulationRunner`] waiting to be started.
///
/// # Example
/// ```no_run
/// use sph_orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/dam_break.json")?;
/// runner.start();
/// let last = runner.join()?;
/// # Ok::<(), sph_orchestrator::OrchestratorError>(())
/// ```
pub fn create_simulation(config_path: impl AsRef<Path>) -> Result<SimulationRunner, OrchestratorError> {
    let config_path = config_path.as_ref();
    tracing::info!("Creating simulation from config: {}", config_path.display());

    let config = SimulationConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let kernel = create_kernel(config.backend, prepare_scene(&config)?)?;
    let runner = SimulationRunner::new(
        kernel,
        RunnerOptions {
            max_ticks: config.max_ticks,
            log_interval: config.log_interval,
            snapshot_interval: config.log_interval,
        },
    );

    tracing::info!("Simulation ready to start");
    Ok(runner)
}

/// Create a simulation kernel based on the backend configuration.
///
/// For `Auto`, attempts GPU first and falls back to CPU if unavailable.
/// For `Gpu`, fails if the GPU cannot be initialized.
/// For `Cpu`, always returns a CPU kernel.
pub fn create_kernel(
    backend: BackendType,
    scene: PreparedScene,
) -> Result<Box<dyn SimulationKernel>, OrchestratorError> {
    let PreparedScene {
        constants,
        particles,
        spawn,
        solver,
    } = scene;

    match backend {
        BackendType::Cpu => {
            tracing::info!("Creating CPU simulation kernel...");
            Ok(Box::new(CpuKernel::new(constants, particles, spawn, solver)?))
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("Creating GPU simulation kernel...");
            Ok(Box::new(sph_kernel::GpuKernel::new(constants, particles, spawn, solver)?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(OrchestratorError::GpuDisabled),
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            tracing::info!("Auto-detecting backend...");
            if sph_kernel::gpu::gpu_available() {
                match sph_kernel::GpuKernel::new(constants, particles.clone(), spawn, solver) {
                    Ok(gpu) => return Ok(Box::new(gpu)),
                    Err(e) => tracing::warn!("GPU init failed ({e}), falling back to CPU"),
                }
            } else {
                tracing::info!("No GPU available, using CPU kernel");
            }
            Ok(Box::new(CpuKernel::new(constants, particles, spawn, solver)?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using CPU kernel");
            Ok(Box::new(CpuKernel::new(constants, particles, spawn, solver)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SceneConfig, SpawnConfig, SpawnMode};
    use sph_kernel::{BoxGeometry, IntegrationMethod, PhysicalParams};

    fn config(backend: BackendType) -> SimulationConfig {
        SimulationConfig {
            name: "test".to_string(),
            scene: SceneConfig {
                container: BoxGeometry {
                    min: [0.0; 3],
                    size: [1.0; 3],
                    wall_thickness: 0.0,
                },
                particle_radius: 0.02,
                spawn: SpawnConfig {
                    grid: [3, 3, 3],
                    origin: None,
                    spacing: Some(0.1),
                    jitter: 0.0,
                    mode: SpawnMode::Cube,
                    seed: 0,
                },
            },
            physics: PhysicalParams {
                stiffness: 1.0,
                rest_density: 1000.0,
                viscosity: 0.1,
                integration: IntegrationMethod::Leapfrog,
                timestep: 0.001,
                damping: 0.0,
                smoothing_length: None,
                support_factor: 1.0,
            },
            solver: SolverOptions::default(),
            backend,
            max_ticks: Some(5),
            log_interval: 100,
        }
    }

    #[test]
    fn cpu_backend_builds_a_kernel() {
        let scene = prepare_scene(&config(BackendType::Cpu)).unwrap();
        let mut kernel = create_kernel(BackendType::Cpu, scene).unwrap();
        kernel.step();
        assert_eq!(kernel.tick(), 1);
        assert_eq!(kernel.particle_count(), 27);
    }

    #[test]
    fn auto_backend_always_yields_a_kernel() {
        let scene = prepare_scene(&config(BackendType::Auto)).unwrap();
        let kernel = create_kernel(BackendType::Auto, scene).unwrap();
        assert_eq!(kernel.live_count(), 27);
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_backend_without_feature_is_an_error() {
        let scene = prepare_scene(&config(BackendType::Gpu)).unwrap();
        assert!(matches!(
            create_kernel(BackendType::Gpu, scene),
            Err(OrchestratorError::GpuDisabled)
        ));
    }

    #[test]
    fn setup_errors_surface() {
        let mut cfg = config(BackendType::Cpu);
        cfg.scene.particle_radius = 0.6;
        assert!(matches!(
            prepare_scene(&cfg),
            Err(OrchestratorError::Setup(SetupError::InvalidGeometry(_)))
        ));
    }
}
