//! Cell-sorted SPH fluid kernel.
//!
//! Every tick rebuilds a uniform-grid spatial hash, orders particles by cell
//! with a bitonic sorting network, derives a cell offset table, evaluates
//! density/pressure and pressure/viscosity/gravity forces over the 27-cell
//! neighborhood, and integrates against a static box. Stages run strictly in
//! that order with a barrier between them.
//!
//! # Modules
//! - [`particle`] -- `Particle` record with leapfrog shadow state.
//! - [`constants`] -- Scene inputs and derived `SimulationConstants`.
//! - [`sort`] -- Bitonic sort network (block-local passes + transposes).
//! - [`neighbor`] -- Cell grid, spatial hash and cell offset table.
//! - [`sph`] -- Smoothing kernels, density and force evaluators.
//! - [`eos`] -- Tait equation of state.
//! - [`integrate`] -- Forward Euler / leapfrog and box collision.
//! - [`spawn`] -- Gradual particle birth.
//! - [`stage`] -- Stage list, tick plan and program resolution.
//! - [`dispatch`] -- Batched parallel-for.

#![warn(missing_docs)]

pub mod constants;
pub mod dispatch;
pub mod eos;
pub mod error;
pub mod integrate;
pub mod neighbor;
pub mod particle;
pub mod sort;
pub mod spawn;
pub mod sph;
pub mod stage;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub use constants::{
    BoxBounds, BoxGeometry, PhysicalParams, SimulationConstants, GRAVITY, MAX_GRID_CELLS,
};
pub use dispatch::{Dispatcher, DEFAULT_BATCH_SIZE};
pub use eos::tait_eos;
pub use error::{SetupError, SortError};
pub use integrate::IntegrationMethod;
pub use neighbor::{CellGrid, CellKey, SpatialHash, EMPTY_OFFSET, SENTINEL_KEY};
pub use particle::{FluidSample, Particle, PositionField};
pub use sort::{BitonicSorter, DEFAULT_BLOCK_SIZE};
pub use spawn::{GradualSpawner, SpawnSchedule};
pub use stage::{tick_plan, ProgramLoader, Stage, StageTable, TickStep};

#[cfg(feature = "gpu")]
pub use gpu::{EmbeddedShaders, GpuKernel, ShaderDirectory, ShaderLoader};

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// Read-only copy of the particle buffer after a tick.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    /// Ticks completed when the snapshot was taken.
    pub tick: u64,
    /// Every particle slot, dormant ones included.
    pub particles: Vec<Particle>,
}

impl FrameSnapshot {
    /// Live particles only.
    pub fn live(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter().filter(|p| p.is_alive())
    }

    /// Number of live particles.
    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Summary statistics over the live particles.
    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            live_count: 0,
            max_speed: 0.0,
            mean_height: 0.0,
            lowest: f32::INFINITY,
        };
        for p in self.live() {
            stats.live_count += 1;
            stats.max_speed = stats.max_speed.max(Vec3::from_array(p.vel).length());
            stats.mean_height += p.pos[1];
            stats.lowest = stats.lowest.min(p.pos[1]);
        }
        if stats.live_count > 0 {
            stats.mean_height /= stats.live_count as f32;
        }
        stats
    }
}

/// Aggregate values for progress logging and scenario checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Number of live particles.
    pub live_count: usize,
    /// Largest velocity magnitude.
    pub max_speed: f32,
    /// Mean y coordinate.
    pub mean_height: f32,
    /// Smallest y coordinate (infinite when nothing is alive).
    pub lowest: f32,
}

/// Intermediate buffers of the last tick, for debugging.
#[derive(Debug, Clone, Default)]
pub struct StageReadback {
    /// Slot -> particle permutation after sorting.
    pub permutation: Vec<u32>,
    /// Unsorted cell keys (`SENTINEL_KEY` for dead/padding slots).
    pub cell_keys: Vec<u32>,
    /// Sorted cell keys.
    pub sorted_keys: Vec<u32>,
    /// Cell offset table (`EMPTY_OFFSET` for empty cells).
    pub offsets: Vec<u32>,
    /// Density and pressure per particle.
    pub fluid: Vec<FluidSample>,
    /// Total force per particle.
    pub forces: Vec<[f32; 3]>,
}

impl StageReadback {
    /// Cell key at sort slot `slot`, `None` for the sentinel.
    pub fn cell_key(&self, slot: usize) -> Option<CellKey> {
        self.cell_keys.get(slot).copied().and_then(CellKey::from_raw)
    }
}

/// Trait that every simulation backend implements.
///
/// A `SimulationKernel` owns the particle buffers and advances them through
/// the stage plan of [`tick_plan`] each time [`step`](Self::step) is called.
/// The time step is fixed by the constants.
pub trait SimulationKernel: Send {
    /// Run one complete tick (all stages plus gradual spawning).
    fn step(&mut self);

    /// Copy of the particle buffer.
    fn snapshot(&self) -> FrameSnapshot;

    /// Intermediate buffers of the last tick.
    fn readback(&self) -> StageReadback;

    /// Constants this kernel was built with.
    fn constants(&self) -> &SimulationConstants;

    /// Number of live particles.
    fn live_count(&self) -> usize;

    /// Ticks completed so far.
    fn tick(&self) -> u64;

    /// Number of particle slots.
    fn particle_count(&self) -> usize {
        self.constants().particle_count
    }
}

/// Solver knobs that do not change the physics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Block size of the bitonic sort network.
    #[serde(default = "default_block_size")]
    pub sort_block_size: usize,
    /// Items per dispatcher batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            sort_block_size: DEFAULT_BLOCK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Wall-clock time spent per stage during one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepProfile {
    /// Hash builder (microseconds).
    pub hash_us: u64,
    /// Sort network (microseconds).
    pub sort_us: u64,
    /// Offset table (microseconds).
    pub offsets_us: u64,
    /// Density evaluations (microseconds).
    pub density_us: u64,
    /// Force evaluations (microseconds).
    pub forces_us: u64,
    /// Integration steps (microseconds).
    pub integrate_us: u64,
    /// Gradual spawning (microseconds).
    pub spawn_us: u64,
    /// Entire tick (microseconds).
    pub total_us: u64,
}

impl StepProfile {
    pub(crate) fn record(&mut self, stage: Stage, us: u64) {
        let slot = match stage {
            Stage::HashCells => &mut self.hash_us,
            Stage::Sort => &mut self.sort_us,
            Stage::BuildOffsets => &mut self.offsets_us,
            Stage::Density => &mut self.density_us,
            Stage::Force => &mut self.forces_us,
            Stage::IntegrateEuler | Stage::LeapfrogHalf | Stage::LeapfrogFull => {
                &mut self.integrate_us
            }
        };
        *slot += us;
    }
}

// ---------------------------------------------------------------------------
// CpuKernel -- data-parallel CPU implementation of SimulationKernel
// ---------------------------------------------------------------------------

/// Buffers owned by [`CpuKernel`] and lent to one stage at a time.
pub struct CpuBuffers {
    /// Particle records.
    pub particles: Vec<Particle>,
    /// Spatial hash and offset table.
    pub hash: SpatialHash,
    /// Density and pressure per particle.
    pub fluid: Vec<FluidSample>,
    /// Total force per particle.
    pub forces: Vec<Vec3>,
}

/// Executable form of a stage on the CPU.
pub type CpuProgram = fn(&mut CpuBuffers, &SimulationConstants, &Dispatcher, PositionField);

/// Loader for the stage programs compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPrograms;

impl ProgramLoader<CpuProgram> for BuiltinPrograms {
    fn load(&self, stage: Stage) -> Option<CpuProgram> {
        let program: CpuProgram = match stage {
            Stage::HashCells => |b, c, d, _| b.hash.assign_keys(d, &c.grid, &b.particles),
            Stage::Sort => |b, _, d, _| b.hash.sort(d),
            Stage::BuildOffsets => |b, _, d, _| b.hash.build_offsets(d),
            Stage::Density => |b, c, d, field| {
                sph::compute_density(d, c, &b.particles, &b.hash, field, &mut b.fluid)
            },
            Stage::Force => |b, c, d, field| {
                sph::compute_forces(d, c, &b.particles, &b.fluid, &b.hash, field, &mut b.forces)
            },
            Stage::IntegrateEuler => |b, c, d, _| {
                integrate::integrate_all(d, c, &mut b.particles, &b.forces, integrate::euler_step)
            },
            Stage::LeapfrogHalf => |b, c, d, _| {
                integrate::integrate_all(
                    d,
                    c,
                    &mut b.particles,
                    &b.forces,
                    integrate::leapfrog_half_step,
                )
            },
            Stage::LeapfrogFull => |b, c, d, _| {
                integrate::integrate_all(
                    d,
                    c,
                    &mut b.particles,
                    &b.forces,
                    integrate::leapfrog_full_step,
                )
            },
        };
        Some(program)
    }
}

/// Data-parallel CPU implementation of the solver.
pub struct CpuKernel {
    constants: SimulationConstants,
    dispatcher: Dispatcher,
    programs: StageTable<CpuProgram>,
    buffers: CpuBuffers,
    spawner: Option<GradualSpawner>,
    live: usize,
    tick: u64,
}

impl CpuKernel {
    /// Build a kernel with the built-in stage programs.
    ///
    /// # Arguments
    /// * `constants` - Derived simulation constants.
    /// * `particles` - Initial particle slots (`constants.particle_count` of them).
    /// * `spawn` - Gradual spawn schedule; births fill the first dormant slot onwards.
    /// * `options` - Sort block size and dispatcher batch size.
    pub fn new(
        constants: SimulationConstants,
        particles: Vec<Particle>,
        spawn: Option<SpawnSchedule>,
        options: SolverOptions,
    ) -> Result<Self, SetupError> {
        Self::with_programs(&BuiltinPrograms, constants, particles, spawn, options)
    }

    /// Build a kernel resolving stage programs through `loader`.
    pub fn with_programs<L: ProgramLoader<CpuProgram> + ?Sized>(
        loader: &L,
        constants: SimulationConstants,
        particles: Vec<Particle>,
        spawn: Option<SpawnSchedule>,
        options: SolverOptions,
    ) -> Result<Self, SetupError> {
        let n = constants.particle_count;
        if particles.len() != n {
            return Err(SetupError::InvalidParameter(format!(
                "expected {n} particle slots, got {}",
                particles.len()
            )));
        }
        let programs = StageTable::resolve(loader)?;
        let hash = SpatialHash::new(n, &constants.grid, options.sort_block_size)?;
        let live = particles.iter().filter(|p| p.is_alive()).count();
        let spawner = spawn.map(|s| GradualSpawner::new(s, &particles));

        tracing::info!(
            particles = n,
            live,
            h = constants.h,
            mass = constants.mass,
            cells = constants.grid.total_cells(),
            sort_len = hash.capacity(),
            integration = ?constants.integration,
            "CPU kernel initialized"
        );

        Ok(Self {
            constants,
            dispatcher: Dispatcher::new(options.batch_size),
            programs,
            buffers: CpuBuffers {
                particles,
                hash,
                fluid: vec![FluidSample::default(); n],
                forces: vec![Vec3::ZERO; n],
            },
            spawner,
            live,
            tick: 0,
        })
    }

    /// Particle slots.
    pub fn particles(&self) -> &[Particle] {
        &self.buffers.particles
    }

    /// Spatial hash of the last tick.
    pub fn spatial_hash(&self) -> &SpatialHash {
        &self.buffers.hash
    }

    /// Density and pressure of the last evaluation.
    pub fn fluid(&self) -> &[FluidSample] {
        &self.buffers.fluid
    }

    /// Forces of the last evaluation.
    pub fn forces(&self) -> &[Vec3] {
        &self.buffers.forces
    }

    /// Run a single stage outside the tick plan.
    pub fn run_stage(&mut self, stage: Stage, field: PositionField) {
        let program = *self.programs.get(stage);
        program(&mut self.buffers, &self.constants, &self.dispatcher, field);
    }

    /// Run one tick and report where the time went.
    pub fn step_profiled(&mut self) -> StepProfile {
        let total_start = Instant::now();
        let mut profile = StepProfile::default();

        for step in tick_plan(self.constants.integration) {
            let t0 = Instant::now();
            self.run_stage(step.stage, step.field);
            profile.record(step.stage, t0.elapsed().as_micros() as u64);
            tracing::trace!(stage = %step.stage, field = ?step.field, "stage retired");
        }

        let t0 = Instant::now();
        self.spawn_one();
        profile.spawn_us = t0.elapsed().as_micros() as u64;

        self.tick += 1;
        profile.total_us = total_start.elapsed().as_micros() as u64;
        profile
    }

    fn spawn_one(&mut self) {
        let Some(spawner) = self.spawner.as_mut() else {
            return;
        };
        if let Some((slot, particle)) = spawner.tick(self.constants.clamp_min, self.constants.clamp_max) {
            let target = &mut self.buffers.particles[slot];
            if target.is_alive() {
                return;
            }
            *target = particle;
            self.live += 1;
            tracing::trace!(slot, live = self.live, "particle spawned");
        }
    }
}

impl SimulationKernel for CpuKernel {
    fn step(&mut self) {
        self.step_profiled();
    }

    fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            tick: self.tick,
            particles: self.buffers.particles.clone(),
        }
    }

    fn readback(&self) -> StageReadback {
        let hash = &self.buffers.hash;
        StageReadback {
            permutation: hash.permutation().to_vec(),
            cell_keys: hash.cell_keys().to_vec(),
            sorted_keys: hash.sorted_keys().to_vec(),
            offsets: hash.offsets(),
            fluid: self.buffers.fluid.clone(),
            forces: self.buffers.forces.iter().map(|f| f.to_array()).collect(),
        }
    }

    fn constants(&self) -> &SimulationConstants {
        &self.constants
    }

    fn live_count(&self) -> usize {
        self.live
    }

    fn tick(&self) -> u64 {
        self.tick
    }
}
