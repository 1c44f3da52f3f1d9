//! GPU buffer management for the SPH pipeline.
//!
//! Creates the storage buffers every stage shares, the uniform blocks, and
//! the staging round-trip used for snapshots and debug readback.

use wgpu::util::DeviceExt;

use crate::constants::{SimulationConstants, MIN_PAIR_DIST_SQ};
use crate::neighbor::{EMPTY_OFFSET, SENTINEL_KEY};
use crate::particle::{FluidSample, Particle};

/// Smallest buffer ever allocated; zero-sized bindings are invalid.
const MIN_BUF_SIZE: u64 = 16;

/// Simulation constants uniform.
/// Must match the `SimParams` struct in `shaders/common.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSimParams {
    pub n_particles: u32,
    pub capacity: u32,
    pub total_cells: u32,
    pub _pad0: u32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub grid_dim_z: u32,
    pub _pad1: u32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub origin_z: f32,
    pub cell_size: f32,
    pub h: f32,
    pub h2: f32,
    pub mass: f32,
    pub poly6: f32,
    pub spiky: f32,
    pub visc_lap: f32,
    pub stiffness: f32,
    pub rest_density: f32,
    pub viscosity: f32,
    pub gamma: f32,
    pub dt: f32,
    pub damping: f32,
    pub clamp_min_x: f32,
    pub clamp_min_y: f32,
    pub clamp_min_z: f32,
    pub gravity_x: f32,
    pub clamp_max_x: f32,
    pub clamp_max_y: f32,
    pub clamp_max_z: f32,
    pub gravity_y: f32,
    pub gravity_z: f32,
    pub min_pair_dist_sq: f32,
    pub _pad2: u32,
    pub _pad3: u32,
}

impl GpuSimParams {
    pub fn new(c: &SimulationConstants, capacity: usize) -> Self {
        let [gx, gy, gz] = c.grid.dims();
        let origin = c.grid.origin();
        Self {
            n_particles: c.particle_count as u32,
            capacity: capacity as u32,
            total_cells: c.grid.total_cells() as u32,
            _pad0: 0,
            grid_dim_x: gx,
            grid_dim_y: gy,
            grid_dim_z: gz,
            _pad1: 0,
            origin_x: origin.x,
            origin_y: origin.y,
            origin_z: origin.z,
            cell_size: c.grid.cell_size(),
            h: c.h,
            h2: c.h2,
            mass: c.mass,
            poly6: c.poly6,
            spiky: c.spiky,
            visc_lap: c.viscosity_laplacian,
            stiffness: c.stiffness,
            rest_density: c.rest_density,
            viscosity: c.viscosity,
            gamma: c.gamma,
            dt: c.timestep,
            damping: c.damping,
            clamp_min_x: c.clamp_min.x,
            clamp_min_y: c.clamp_min.y,
            clamp_min_z: c.clamp_min.z,
            gravity_x: c.gravity.x,
            clamp_max_x: c.clamp_max.x,
            clamp_max_y: c.clamp_max.y,
            clamp_max_z: c.clamp_max.z,
            gravity_y: c.gravity.y,
            gravity_z: c.gravity.z,
            min_pair_dist_sq: MIN_PAIR_DIST_SQ,
            _pad2: 0,
            _pad3: 0,
        }
    }
}

/// Per-pass constants of the sort network, bound with a dynamic offset.
/// Must match `SortParams` in `shaders/sort.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortPassParams {
    pub level: u32,
    pub level_mask: u32,
    pub width: u32,
    pub height: u32,
}

/// All GPU buffers needed for one simulation.
pub struct GpuBuffers {
    pub params: wgpu::Buffer,
    pub particles: wgpu::Buffer,
    pub perm: wgpu::Buffer,
    pub cell_keys: wgpu::Buffer,
    pub sorted_keys: wgpu::Buffer,
    pub offsets: wgpu::Buffer,
    pub fluid: wgpu::Buffer,
    pub forces: wgpu::Buffer,
    /// Packed `(key, particle)` pairs.
    pub pairs: wgpu::Buffer,
    /// Transpose target for `pairs`.
    pub pairs_tmp: wgpu::Buffer,
    /// One `SortPassParams` per pass, `sort_params_stride` bytes apart.
    pub sort_params: wgpu::Buffer,
    pub sort_params_stride: u64,

    pub n_particles: u32,
    pub capacity: u32,
    pub total_cells: u32,
}

impl GpuBuffers {
    pub fn new(
        device: &wgpu::Device,
        constants: &SimulationConstants,
        particles: &[Particle],
        capacity: usize,
        sort_passes: &[SortPassParams],
    ) -> Self {
        let n = particles.len();
        let total_cells = constants.grid.total_cells();
        let params = GpuSimParams::new(constants, capacity);

        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let stride = device.limits().min_uniform_buffer_offset_alignment as u64;
        let mut sort_bytes = vec![0u8; (sort_passes.len().max(1) as u64 * stride) as usize];
        for (k, pass) in sort_passes.iter().enumerate() {
            let at = k * stride as usize;
            sort_bytes[at..at + std::mem::size_of::<SortPassParams>()]
                .copy_from_slice(bytemuck::bytes_of(pass));
        }
        let sort_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_params"),
            contents: &sort_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let identity: Vec<u32> = (0..capacity as u32).collect();
        Self {
            params: params_buf,
            particles: create_storage_buf(device, "particles", bytemuck::cast_slice(particles)),
            perm: create_storage_buf(device, "perm", bytemuck::cast_slice(&identity)),
            cell_keys: create_storage_buf(
                device,
                "cell_keys",
                bytemuck::cast_slice(&vec![SENTINEL_KEY; capacity]),
            ),
            sorted_keys: create_storage_buf(
                device,
                "sorted_keys",
                bytemuck::cast_slice(&vec![SENTINEL_KEY; capacity]),
            ),
            offsets: create_storage_buf(
                device,
                "offsets",
                bytemuck::cast_slice(&vec![EMPTY_OFFSET; total_cells]),
            ),
            fluid: create_storage_buf(
                device,
                "fluid",
                bytemuck::cast_slice(&vec![FluidSample::default(); n]),
            ),
            forces: create_storage_buf(device, "forces", bytemuck::cast_slice(&vec![[0.0f32; 4]; n])),
            pairs: create_storage_buf(device, "pairs", bytemuck::cast_slice(&vec![[0u32; 2]; capacity])),
            pairs_tmp: create_storage_buf(
                device,
                "pairs_tmp",
                bytemuck::cast_slice(&vec![[0u32; 2]; capacity]),
            ),
            sort_params,
            sort_params_stride: stride,
            n_particles: n as u32,
            capacity: capacity as u32,
            total_cells: total_cells as u32,
        }
    }

    /// Overwrite one particle slot (gradual spawning).
    pub fn write_particle(&self, queue: &wgpu::Queue, slot: usize, particle: &Particle) {
        let offset = (slot * std::mem::size_of::<Particle>()) as u64;
        queue.write_buffer(&self.particles, offset, bytemuck::bytes_of(particle));
    }

    /// Read back the particle buffer.
    pub fn readback_particles(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<Particle> {
        read_buffer(device, queue, &self.particles, self.n_particles as usize)
    }

    /// Read back a buffer of `count` elements of `T`.
    pub fn readback<T: bytemuck::Pod>(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> Vec<T> {
        read_buffer(device, queue, buffer, count)
    }
}

/// Create a storage buffer initialized with `contents`.
fn create_storage_buf(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    let usage = wgpu::BufferUsages::STORAGE
        | wgpu::BufferUsages::COPY_SRC
        | wgpu::BufferUsages::COPY_DST;
    if contents.is_empty() {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: MIN_BUF_SIZE,
            usage,
            mapped_at_creation: false,
        })
    } else {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }
}

/// Create a staging (MAP_READ) buffer for readback.
fn create_staging_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Copy `count` elements of `buffer` into a staging buffer, block on the map,
/// and decode them.
fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Vec<T> {
    if count == 0 {
        return Vec::new();
    }
    let byte_len = (count * std::mem::size_of::<T>()) as u64;
    let staging = create_staging_buf(device, "readback_staging", byte_len);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..byte_len);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("readback map failed: {e}");
            return Vec::new();
        }
        Err(_) => {
            tracing::error!("readback callback dropped");
            return Vec::new();
        }
    }

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    result
}
