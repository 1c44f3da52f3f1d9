//! Configuration parsing and validation for SPH simulations

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use sph_kernel::{BoxGeometry, PhysicalParams, SolverOptions, SpawnSchedule};

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Container and initial particles
    pub scene: SceneConfig,
    /// Fluid and integration parameters
    pub physics: PhysicalParams,
    /// Sort block size and dispatcher batch size
    #[serde(default)]
    pub solver: SolverOptions,
    /// Compute backend
    #[serde(default)]
    pub backend: BackendType,
    /// Stop after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,
    /// Ticks between progress log lines
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
}

/// Container box and particle layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Container box
    #[serde(rename = "box")]
    pub container: BoxGeometry,
    /// Particle radius, kept clear of every wall
    #[serde(default = "default_particle_radius")]
    pub particle_radius: f32,
    /// Initial layout
    pub spawn: SpawnConfig,
}

/// How the particle slots are filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Lattice resolution `[w, h, d]`; the particle count is `w * h * d`
    pub grid: [u32; 3],
    /// Lattice corner (defaults to the lowest admissible position)
    #[serde(default)]
    pub origin: Option<[f32; 3]>,
    /// Lattice spacing (defaults to the particle diameter)
    #[serde(default)]
    pub spacing: Option<f32>,
    /// Uniform positional jitter per axis
    #[serde(default)]
    pub jitter: f32,
    /// All alive at once or one after another
    #[serde(default)]
    pub mode: SpawnMode,
    /// Seed of the jitter generator
    #[serde(default)]
    pub seed: u64,
}

/// Spawn mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SpawnMode {
    /// Every slot alive on a jittered lattice from the first tick
    #[default]
    Cube,
    /// Slots start dormant and are born one at a time at a fixed point
    Gradual {
        /// Birth point
        point: [f32; 3],
        /// Ticks between births
        #[serde(default = "default_spawn_interval")]
        interval: u32,
        /// Velocity of every newborn particle
        #[serde(default)]
        initial_velocity: [f32; 3],
    },
}

/// Compute backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// CPU (rayon batches)
    Cpu,
    /// GPU via wgpu; fails when no adapter is available
    Gpu,
    /// GPU when available, otherwise CPU
    #[default]
    Auto,
}

// Default values
fn default_log_interval() -> u64 {
    100
}

fn default_particle_radius() -> f32 {
    0.01
}

fn default_spawn_interval() -> u32 {
    1
}

impl SpawnConfig {
    /// Number of particle slots.
    pub fn particle_count(&self) -> usize {
        self.grid.iter().map(|&d| d as usize).product()
    }

    /// Kernel spawn schedule for gradual mode.
    pub fn schedule(&self) -> Option<SpawnSchedule> {
        match self.mode {
            SpawnMode::Cube => None,
            SpawnMode::Gradual {
                point,
                interval,
                initial_velocity,
            } => Some(SpawnSchedule {
                point,
                jitter: self.jitter,
                interval,
                initial_velocity,
                seed: self.seed,
            }),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimulationConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let container = &self.scene.container;

        // Box
        if container.size.iter().any(|&s| !(s > 0.0)) {
            return invalid(format!("box size must be positive, got {:?}", container.size));
        }
        if container.wall_thickness < 0.0 {
            return invalid("wall_thickness must be non-negative".into());
        }
        if !(self.scene.particle_radius >= 0.0) {
            return invalid("particle_radius must be non-negative".into());
        }
        let inner = container.inner_bounds().extent();
        if inner.min_element() <= 2.0 * self.scene.particle_radius {
            return invalid(format!(
                "inner box {inner:?} leaves no room for particles of radius {}",
                self.scene.particle_radius
            ));
        }

        // Spawn
        let spawn = &self.scene.spawn;
        if spawn.particle_count() == 0 {
            return invalid(format!("spawn grid {:?} contains no particles", spawn.grid));
        }
        if let Some(spacing) = spawn.spacing {
            if !(spacing > 0.0) {
                return invalid("spawn spacing must be positive".into());
            }
        }
        if spawn.jitter < 0.0 {
            return invalid("spawn jitter must be non-negative".into());
        }
        if let SpawnMode::Gradual { interval, .. } = spawn.mode {
            if interval == 0 {
                return invalid("spawn interval must be at least 1".into());
            }
        }

        // Physics
        let p = &self.physics;
        if !(p.timestep > 0.0) {
            return invalid("timestep must be positive".into());
        }
        if !(p.rest_density > 0.0) {
            return invalid("rest_density must be positive".into());
        }
        if p.stiffness < 0.0 || p.viscosity < 0.0 {
            return invalid("stiffness and viscosity must be non-negative".into());
        }
        if !(0.0..1.0).contains(&p.damping) {
            return invalid("damping must lie in [0, 1)".into());
        }
        if let Some(h) = p.smoothing_length {
            if !(h > 0.0) {
                return invalid("smoothing_length must be positive".into());
            }
        }
        if !(p.support_factor > 0.0) {
            return invalid("support_factor must be positive".into());
        }

        // Solver
        let block = self.solver.sort_block_size;
        if block < 2 || !block.is_power_of_two() {
            return invalid(format!("sort_block_size must be a power of two >= 2, got {block}"));
        }
        if self.solver.batch_size == 0 {
            return invalid("batch_size must be at least 1".into());
        }

        if self.max_ticks == Some(0) {
            return invalid("max_ticks must be at least 1".into());
        }
        if self.log_interval == 0 {
            return invalid("log_interval must be at least 1".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "name": "minimal",
        "scene": {
            "box": { "min": [0, 0, 0], "size": [1, 1, 1] },
            "spawn": { "grid": [4, 4, 4] }
        },
        "physics": {
            "stiffness": 1.0,
            "rest_density": 1000.0,
            "viscosity": 0.1,
            "timestep": 0.001
        }
    }"#;

    fn minimal() -> SimulationConfig {
        serde_json::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = minimal();
        assert_eq!(config.backend, BackendType::Auto);
        assert_eq!(config.solver, SolverOptions::default());
        assert_eq!(config.scene.spawn.mode, SpawnMode::Cube);
        assert_eq!(config.scene.container.wall_thickness, 0.0);
        assert_eq!(config.physics.support_factor, 1.0);
        assert_eq!(config.log_interval, 100);
        assert!(config.scene.spawn.schedule().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn gradual_mode_builds_schedule() {
        let json = MINIMAL.replace(
            r#""grid": [4, 4, 4]"#,
            r#""grid": [4, 4, 4], "jitter": 0.01, "seed": 3,
               "mode": { "Gradual": { "point": [0.5, 0.9, 0.5] } }"#,
        );
        let config: SimulationConfig = serde_json::from_str(&json).unwrap();
        let schedule = config.scene.spawn.schedule().unwrap();
        assert_eq!(schedule.point, [0.5, 0.9, 0.5]);
        assert_eq!(schedule.interval, 1);
        assert_eq!(schedule.jitter, 0.01);
        assert_eq!(schedule.seed, 3);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = minimal();
        config.physics.damping = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = minimal();
        config.scene.spawn.grid = [4, 0, 4];
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.solver.sort_block_size = 48;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.scene.container.wall_thickness = 0.5;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.max_ticks = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_radius_reports_the_radius() {
        let mut config = minimal();
        config.scene.particle_radius = -0.01;
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("particle_radius"), "{msg}"),
            other => panic!("expected invalid radius, got {other:?}"),
        }
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = SimulationConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "minimal");
        assert_eq!(config.scene.spawn.particle_count(), 64);
    }

    #[test]
    fn load_reports_missing_file_and_bad_json() {
        let err = SimulationConfig::load("/nonexistent/sph.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = SimulationConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
