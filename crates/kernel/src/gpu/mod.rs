//! GPU (Vulkan/Metal/DX12 via wgpu) implementation of the SPH kernel.
//!
//! `GpuKernel` runs the same tick plan as `CpuKernel` with one compute pass
//! per dispatch, so each pass boundary is the barrier between stages.
//! Particle data lives on the GPU between ticks; readback only on demand.
//!
//! # Bind group layout
//! - Stage shaders: group 0 = SimParams (uniform) + particles, perm, cell keys,
//!   sorted keys, offsets, fluid, forces (7 storage buffers).
//! - Sort shader: group 0 = SortParams (uniform, dynamic offset) + target pairs,
//!   source pairs, cell keys, perm, sorted keys. Two bind groups swap the pair
//!   buffers for the transposes.

pub mod buffers;
mod shaders;

use std::time::Instant;

use buffers::{GpuBuffers, SortPassParams};
pub use shaders::{shader_file, EmbeddedShaders, ShaderDirectory, ShaderLoader};

use crate::constants::SimulationConstants;
use crate::error::SetupError;
use crate::particle::{FluidSample, Particle, PositionField};
use crate::sort::{self, BitonicSorter};
use crate::spawn::{GradualSpawner, SpawnSchedule};
use crate::stage::{tick_plan, ProgramLoader, Stage, StageTable, TickStep};
use crate::{FrameSnapshot, SimulationKernel, SolverOptions, StageReadback, StepProfile};

/// Largest workgroup the default device limits allow.
const MAX_WORKGROUP: u32 = 256;

/// Entry points of each stage, in the order the pipelines are stored.
pub fn entry_points(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::HashCells => &["clear_offsets", "assign_keys"],
        Stage::Sort => &["pack_pairs", "bitonic_sort", "transpose", "unpack_pairs"],
        Stage::BuildOffsets => &["build_offsets"],
        Stage::Density => &["density_committed", "density_midpoint"],
        Stage::Force => &["force_committed", "force_midpoint"],
        Stage::IntegrateEuler => &["integrate_euler"],
        Stage::LeapfrogHalf => &["leapfrog_half"],
        Stage::LeapfrogFull => &["leapfrog_full"],
    }
}

/// Compiled pipelines of one stage, indexed like [`entry_points`].
pub struct GpuProgram {
    pipelines: Vec<wgpu::ComputePipeline>,
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

// ---------------------------------------------------------------------------
// Sort schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortPassKind {
    Pack = 0,
    Local = 1,
    Transpose = 2,
    Unpack = 3,
}

/// Which pair buffer a sort pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairTarget {
    /// `pairs` written, `pairs_tmp` read.
    Pairs = 0,
    /// `pairs_tmp` written, `pairs` read.
    Scratch = 1,
}

#[derive(Debug, Clone, Copy)]
struct SortPass {
    kind: SortPassKind,
    target: PairTarget,
    params: SortPassParams,
}

/// The full pass list of the bitonic network for `len` pairs, mirroring
/// [`sort::bitonic_sort`].
fn sort_schedule(len: u32, block: u32) -> Vec<SortPass> {
    let pass = |kind, target, level, level_mask, width, height| SortPass {
        kind,
        target,
        params: SortPassParams {
            level,
            level_mask,
            width,
            height,
        },
    };
    let mut passes = vec![pass(SortPassKind::Pack, PairTarget::Pairs, 0, 0, 0, 0)];

    let mut level = 2;
    while level <= block {
        passes.push(pass(SortPassKind::Local, PairTarget::Pairs, level, level, 0, 0));
        level <<= 1;
    }

    let width = block;
    let height = len / block;
    let mut level = block << 1;
    while level <= len {
        passes.push(pass(SortPassKind::Transpose, PairTarget::Scratch, 0, 0, width, height));
        passes.push(pass(
            SortPassKind::Local,
            PairTarget::Scratch,
            level / block,
            (level & !len) / block,
            0,
            0,
        ));
        passes.push(pass(SortPassKind::Transpose, PairTarget::Pairs, 0, 0, height, width));
        passes.push(pass(SortPassKind::Local, PairTarget::Pairs, block, level, 0, 0));
        level <<= 1;
    }

    passes.push(pass(SortPassKind::Unpack, PairTarget::Pairs, 0, 0, 0, 0));
    passes
}

// ---------------------------------------------------------------------------
// Pipeline compilation
// ---------------------------------------------------------------------------

struct PipelineCompiler<'a> {
    device: &'a wgpu::Device,
    shaders: &'a dyn ShaderLoader,
    stage_layout: &'a wgpu::PipelineLayout,
    sort_layout: &'a wgpu::PipelineLayout,
    workgroup_size: u32,
    block_size: u32,
}

impl PipelineCompiler<'_> {
    fn specialize(&self, stage: Stage, source: &str) -> String {
        if stage == Stage::Sort {
            source
                .replace("const BLOCK: u32 = 64u;", &format!("const BLOCK: u32 = {}u;", self.block_size))
                .replace("@workgroup_size(64)", &format!("@workgroup_size({})", self.block_size))
        } else {
            source.replace("@workgroup_size(256)", &format!("@workgroup_size({})", self.workgroup_size))
        }
    }
}

impl ProgramLoader<GpuProgram> for PipelineCompiler<'_> {
    fn load(&self, stage: Stage) -> Option<GpuProgram> {
        let source = self.shaders.load_source(stage)?;
        let source = self.specialize(stage, &source);
        let layout = if stage == Stage::Sort {
            self.sort_layout
        } else {
            self.stage_layout
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage.name()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipelines = entry_points(stage)
            .iter()
            .map(|entry| {
                self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
            .collect();
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            tracing::error!(stage = %stage, "shader compilation failed: {err}");
            return None;
        }
        Some(GpuProgram { pipelines })
    }
}

// ---------------------------------------------------------------------------
// GpuKernel
// ---------------------------------------------------------------------------

/// GPU-accelerated SPH simulation kernel using wgpu compute shaders.
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: StageTable<GpuProgram>,
    stage_bind_group: wgpu::BindGroup,
    /// Indexed by [`PairTarget`].
    sort_bind_groups: [wgpu::BindGroup; 2],
    sort_passes: Vec<SortPass>,
    bufs: GpuBuffers,
    constants: SimulationConstants,
    spawner: Option<GradualSpawner>,
    live: usize,
    tick: u64,
    workgroup_size: u32,
    block_size: u32,
}

impl GpuKernel {
    /// Create a GPU kernel with the embedded shaders.
    ///
    /// Returns `Err(SetupError::Gpu)` if no suitable adapter is found, allowing
    /// callers to fall back to `CpuKernel`.
    pub fn new(
        constants: SimulationConstants,
        particles: Vec<Particle>,
        spawn: Option<SpawnSchedule>,
        options: SolverOptions,
    ) -> Result<Self, SetupError> {
        Self::with_shaders(&EmbeddedShaders, constants, particles, spawn, options)
    }

    /// Create a GPU kernel compiling stage programs from `shaders`.
    pub fn with_shaders(
        shaders: &dyn ShaderLoader,
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
        let block = options.sort_block_size;
        if block as u32 > MAX_WORKGROUP {
            return Err(SetupError::InvalidParameter(format!(
                "GPU sort block size {block} exceeds the workgroup limit {MAX_WORKGROUP}"
            )));
        }
        let capacity = BitonicSorter::padded_len(n, block);
        sort::validate(capacity, block)?;
        let workgroup_size = (options.batch_size as u32).clamp(1, MAX_WORKGROUP);

        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| SetupError::Gpu("no suitable GPU adapter found".into()))?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SetupError::Gpu(format!("failed to create device: {e}")))?;

        // --- Buffers ---
        let sort_passes = sort_schedule(capacity as u32, block as u32);
        let pass_params: Vec<SortPassParams> = sort_passes.iter().map(|p| p.params).collect();
        let bufs = GpuBuffers::new(&device, &constants, &particles, capacity, &pass_params);

        // --- Layouts ---
        let stage_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stage_bgl"),
            entries: &[
                bgl_uniform(0),    // params
                bgl_storage_rw(1), // particles
                bgl_storage_rw(2), // perm
                bgl_storage_rw(3), // cell_keys
                bgl_storage_rw(4), // sorted_keys
                bgl_storage_rw(5), // offsets
                bgl_storage_rw(6), // fluid
                bgl_storage_rw(7), // forces
            ],
        });
        let sort_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sort_bgl"),
            entries: &[
                bgl_uniform_dynamic(0, std::mem::size_of::<SortPassParams>() as u64),
                bgl_storage_rw(1), // target pairs
                bgl_storage_rw(2), // source pairs
                bgl_storage_rw(3), // cell_keys
                bgl_storage_rw(4), // perm
                bgl_storage_rw(5), // sorted_keys
            ],
        });
        let stage_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stage_pl"),
            bind_group_layouts: &[&stage_bgl],
            push_constant_ranges: &[],
        });
        let sort_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sort_pl"),
            bind_group_layouts: &[&sort_bgl],
            push_constant_ranges: &[],
        });

        // --- Programs ---
        let compiler = PipelineCompiler {
            device: &device,
            shaders,
            stage_layout: &stage_layout,
            sort_layout: &sort_layout,
            workgroup_size,
            block_size: block as u32,
        };
        let programs = StageTable::resolve(&compiler)?;

        // --- Bind groups ---
        let stage_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage_bg"),
            layout: &stage_bgl,
            entries: &[
                bg_entry(0, &bufs.params),
                bg_entry(1, &bufs.particles),
                bg_entry(2, &bufs.perm),
                bg_entry(3, &bufs.cell_keys),
                bg_entry(4, &bufs.sorted_keys),
                bg_entry(5, &bufs.offsets),
                bg_entry(6, &bufs.fluid),
                bg_entry(7, &bufs.forces),
            ],
        });
        let sort_bg = |label, target: &wgpu::Buffer, source: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &sort_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &bufs.sort_params,
                            offset: 0,
                            size: wgpu::BufferSize::new(std::mem::size_of::<SortPassParams>() as u64),
                        }),
                    },
                    bg_entry(1, target),
                    bg_entry(2, source),
                    bg_entry(3, &bufs.cell_keys),
                    bg_entry(4, &bufs.perm),
                    bg_entry(5, &bufs.sorted_keys),
                ],
            })
        };
        let sort_bind_groups = [
            sort_bg("sort_bg_pairs", &bufs.pairs, &bufs.pairs_tmp),
            sort_bg("sort_bg_scratch", &bufs.pairs_tmp, &bufs.pairs),
        ];

        let live = particles.iter().filter(|p| p.is_alive()).count();
        let spawner = spawn.map(|s| GradualSpawner::new(s, &particles));

        tracing::info!(
            particles = n,
            live,
            sort_len = capacity,
            sort_passes = sort_passes.len(),
            workgroup_size,
            "GPU kernel initialized"
        );

        Ok(Self {
            device,
            queue,
            programs,
            stage_bind_group,
            sort_bind_groups,
            sort_passes,
            bufs,
            constants,
            spawner,
            live,
            tick: 0,
            workgroup_size,
            block_size: block as u32,
        })
    }

    /// Run one tick and report the wall-clock time of the whole submission.
    ///
    /// Stages are not timed individually on the GPU.
    pub fn step_profiled(&mut self) -> StepProfile {
        let total_start = Instant::now();
        let mut profile = StepProfile::default();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tick"),
        });
        for step in tick_plan(self.constants.integration) {
            self.encode_step(&mut encoder, *step);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        let t0 = Instant::now();
        self.spawn_one();
        profile.spawn_us = t0.elapsed().as_micros() as u64;

        self.tick += 1;
        profile.total_us = total_start.elapsed().as_micros() as u64;
        profile
    }

    fn encode_step(&self, encoder: &mut wgpu::CommandEncoder, step: TickStep) {
        let n = self.bufs.n_particles;
        let capacity = self.bufs.capacity;
        let wg = self.workgroup_size;
        let pipelines = &self.programs.get(step.stage).pipelines;
        let variant = match step.field {
            PositionField::Committed => 0,
            PositionField::Midpoint => 1,
        };

        match step.stage {
            Stage::HashCells => {
                self.dispatch(encoder, "clear_offsets", &pipelines[0], dispatch_size(self.bufs.total_cells, wg));
                self.dispatch(encoder, "assign_keys", &pipelines[1], dispatch_size(capacity, wg));
            }
            Stage::Sort => self.encode_sort(encoder, pipelines),
            Stage::BuildOffsets => {
                self.dispatch(encoder, "build_offsets", &pipelines[0], dispatch_size(capacity, wg));
            }
            Stage::Density | Stage::Force => {
                self.dispatch(encoder, step.stage.name(), &pipelines[variant], dispatch_size(n, wg));
            }
            Stage::IntegrateEuler | Stage::LeapfrogHalf | Stage::LeapfrogFull => {
                self.dispatch(encoder, step.stage.name(), &pipelines[0], dispatch_size(n, wg));
            }
        }
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        workgroups: u32,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.stage_bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    fn encode_sort(&self, encoder: &mut wgpu::CommandEncoder, pipelines: &[wgpu::ComputePipeline]) {
        let capacity = self.bufs.capacity;
        let block = self.block_size;
        for (k, pass_desc) in self.sort_passes.iter().enumerate() {
            let offset = (k as u64 * self.bufs.sort_params_stride) as u32;
            let workgroups = match pass_desc.kind {
                SortPassKind::Local => capacity / block,
                _ => dispatch_size(capacity, block),
            };
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("sort"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipelines[pass_desc.kind as usize]);
            pass.set_bind_group(0, &self.sort_bind_groups[pass_desc.target as usize], &[offset]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
    }

    fn spawn_one(&mut self) {
        let Some(spawner) = self.spawner.as_mut() else {
            return;
        };
        if let Some((slot, particle)) = spawner.tick(self.constants.clamp_min, self.constants.clamp_max) {
            self.bufs.write_particle(&self.queue, slot, &particle);
            self.live += 1;
            tracing::trace!(slot, live = self.live, "particle spawned");
        }
    }
}

impl SimulationKernel for GpuKernel {
    fn step(&mut self) {
        self.step_profiled();
    }

    fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            tick: self.tick,
            particles: self.bufs.readback_particles(&self.device, &self.queue),
        }
    }

    fn readback(&self) -> StageReadback {
        let (d, q, b) = (&self.device, &self.queue, &self.bufs);
        let n = b.n_particles as usize;
        let capacity = b.capacity as usize;
        let forces: Vec<[f32; 4]> = b.readback(d, q, &b.forces, n);
        let cell_keys: Vec<u32> = b.readback(d, q, &b.cell_keys, capacity);
        StageReadback {
            permutation: b.readback(d, q, &b.perm, capacity),
            cell_keys,
            sorted_keys: b.readback(d, q, &b.sorted_keys, capacity),
            offsets: b.readback(d, q, &b.offsets, b.total_cells as usize),
            fluid: b.readback::<FluidSample>(d, q, &b.fluid, n),
            forces: forces.into_iter().map(|f| [f[0], f[1], f[2]]).collect(),
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

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size).max(1)
}

// ---- Bind group helpers ----

fn bg_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_uniform_dynamic(binding: u32, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: wgpu::BufferSize::new(size),
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays the GPU pass list on the CPU and checks it sorts.
    #[test]
    fn schedule_sorts_like_the_cpu_network() {
        let len = 256u32;
        let block = 16u32;
        let mut pairs: Vec<(u32, u32)> = (0..len).map(|i| ((i * 7919) % 61, i)).collect();
        let mut scratch = pairs.clone();
        for pass in sort_schedule(len, block) {
            let p = pass.params;
            let (target, source) = match pass.target {
                PairTarget::Pairs => (&mut pairs, &scratch),
                PairTarget::Scratch => (&mut scratch, &pairs),
            };
            match pass.kind {
                SortPassKind::Pack | SortPassKind::Unpack => {}
                SortPassKind::Transpose => {
                    let src = source.clone();
                    for o in 0..len as usize {
                        let x = o / p.height as usize;
                        let y = o % p.height as usize;
                        target[o] = src[y * p.width as usize + x];
                    }
                }
                SortPassKind::Local => {
                    for (b, chunk) in target.chunks_mut(block as usize).enumerate() {
                        let mut shared = chunk.to_vec();
                        let mut j = (p.level >> 1) as usize;
                        while j > 0 {
                            for gi in 0..chunk.len() {
                                let i = b * block as usize + gi;
                                let descending = (p.level_mask as usize & i) != 0;
                                let le = shared[gi & !j] <= shared[gi | j];
                                chunk[gi] = if le == descending { shared[gi ^ j] } else { shared[gi] };
                            }
                            shared.copy_from_slice(chunk);
                            j >>= 1;
                        }
                    }
                }
            }
        }
        assert!(pairs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn entry_points_cover_sort_kinds() {
        let sort = entry_points(Stage::Sort);
        assert_eq!(sort[SortPassKind::Local as usize], "bitonic_sort");
        assert_eq!(sort[SortPassKind::Transpose as usize], "transpose");
    }
}
