//! GPU vs CPU parity.
//!
//! Runs the same scene on `CpuKernel` and `GpuKernel` and compares the stage
//! buffers and final positions. Skips quietly when no adapter is present.

#![cfg(feature = "gpu")]

use glam::Vec3;
use sph_kernel::gpu::gpu_available;
use sph_kernel::{
    BoxGeometry, CpuKernel, GpuKernel, IntegrationMethod, Particle, PhysicalParams,
    SimulationConstants, SimulationKernel, SolverOptions, SpawnSchedule,
};

fn constants(method: IntegrationMethod) -> SimulationConstants {
    let geometry = BoxGeometry {
        min: [0.0; 3],
        size: [1.0; 3],
        wall_thickness: 0.0,
    };
    let params = PhysicalParams {
        stiffness: 1.0,
        rest_density: 1000.0,
        viscosity: 0.1,
        integration: method,
        timestep: 0.002,
        damping: 0.0,
        smoothing_length: None,
        support_factor: 1.0,
    };
    SimulationConstants::derive(&geometry, [6, 6, 6], 0.01, &params).unwrap()
}

fn lattice() -> Vec<Particle> {
    let mut out = Vec::new();
    for z in 0..6 {
        for y in 0..6 {
            for x in 0..6 {
                let pos = Vec3::new(x as f32, y as f32, z as f32) * 0.1 + Vec3::splat(0.2);
                out.push(Particle::spawned(pos, Vec3::ZERO));
            }
        }
    }
    out
}

fn assert_close(a: &[f32], b: &[f32], tol: f32, what: &str) {
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let scale = x.abs().max(y.abs()).max(1.0);
        assert!((x - y).abs() <= tol * scale, "{what}[{i}]: cpu {x} gpu {y}");
    }
}

fn compare(method: IntegrationMethod, ticks: usize) {
    if !gpu_available() {
        eprintln!("no GPU adapter, skipping parity test");
        return;
    }
    let c = constants(method);
    let mut cpu = CpuKernel::new(c, lattice(), None, SolverOptions::default()).unwrap();
    let mut gpu = GpuKernel::new(c, lattice(), None, SolverOptions::default()).unwrap();

    for _ in 0..ticks {
        cpu.step();
        gpu.step();
    }

    let rc = cpu.readback();
    let rg = gpu.readback();
    assert_eq!(rc.cell_keys, rg.cell_keys);
    assert_eq!(rc.sorted_keys, rg.sorted_keys);
    assert_eq!(rc.offsets, rg.offsets);

    let densities = |r: &sph_kernel::StageReadback| -> Vec<f32> {
        r.fluid.iter().map(|s| s.density).collect()
    };
    assert_close(&densities(&rc), &densities(&rg), 1e-3, "density");

    let positions = |s: sph_kernel::FrameSnapshot| -> Vec<f32> {
        s.particles.iter().flat_map(|p| p.pos).collect()
    };
    assert_close(&positions(cpu.snapshot()), &positions(gpu.snapshot()), 1e-3, "position");
}

#[test]
fn euler_parity() {
    compare(IntegrationMethod::ForwardEuler, 5);
}

#[test]
fn leapfrog_parity() {
    compare(IntegrationMethod::Leapfrog, 5);
}

#[test]
fn gpu_gradual_spawn_counts_births() {
    if !gpu_available() {
        return;
    }
    let c = constants(IntegrationMethod::Leapfrog);
    let particles = vec![Particle::dormant(Vec3::splat(0.5)); c.particle_count];
    let schedule = SpawnSchedule {
        point: [0.5, 0.8, 0.5],
        jitter: 0.02,
        interval: 2,
        initial_velocity: [0.0; 3],
        seed: 11,
    };
    let mut gpu = GpuKernel::new(c, particles, Some(schedule), SolverOptions::default()).unwrap();
    for _ in 0..10 {
        gpu.step();
    }
    assert_eq!(gpu.live_count(), 5);
    assert_eq!(gpu.snapshot().live_count(), 5);
}

#[test]
fn gpu_gradual_spawn_skips_live_slots() {
    if !gpu_available() {
        return;
    }
    let c = constants(IntegrationMethod::ForwardEuler);
    let mut particles = lattice();
    for slot in (0..particles.len()).step_by(2) {
        particles[slot] = Particle::dormant(Vec3::splat(0.5));
    }
    let schedule = SpawnSchedule {
        point: [0.5, 0.9, 0.5],
        jitter: 0.0,
        interval: 1,
        initial_velocity: [0.0; 3],
        seed: 0,
    };
    let mut cpu =
        CpuKernel::new(c, particles.clone(), Some(schedule), SolverOptions::default()).unwrap();
    let mut gpu = GpuKernel::new(c, particles, Some(schedule), SolverOptions::default()).unwrap();
    let total = c.particle_count;
    for _ in 0..total {
        cpu.step();
        gpu.step();
        assert_eq!(gpu.live_count(), cpu.live_count());
    }
    assert_eq!(cpu.live_count(), total);
    assert_eq!(gpu.live_count(), total);
    assert_eq!(gpu.snapshot().live_count(), total);
}
