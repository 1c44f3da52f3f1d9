//! Containment: whatever the initial velocities, every live particle stays
//! inside `[clamp_min, clamp_max]` and the state stays finite.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::{
    BoxGeometry, CpuKernel, IntegrationMethod, Particle, PhysicalParams, SimulationConstants,
    SimulationKernel, SolverOptions,
};

fn constants(method: IntegrationMethod) -> SimulationConstants {
    let geometry = BoxGeometry {
        min: [-0.05; 3],
        size: [1.1; 3],
        wall_thickness: 0.05,
    };
    let params = PhysicalParams {
        stiffness: 1.0,
        rest_density: 1000.0,
        viscosity: 0.1,
        integration: method,
        timestep: 0.002,
        damping: 0.001,
        smoothing_length: None,
        support_factor: 1.0,
    };
    SimulationConstants::derive(&geometry, [4, 4, 4], 0.02, &params).unwrap()
}

fn agitated_lattice(seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                let pos = (Vec3::new(x as f32, y as f32, z as f32) + Vec3::splat(0.5)) * 0.25;
                let vel = Vec3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                );
                out.push(Particle::spawned(pos, vel));
            }
        }
    }
    out
}

fn run(method: IntegrationMethod) {
    let c = constants(method);
    assert!((c.h - 0.25).abs() < 1e-6, "derived h = {}", c.h);
    let mut kernel = CpuKernel::new(c, agitated_lattice(42), None, SolverOptions::default())
        .unwrap();

    for tick in 0..150 {
        kernel.step();
        for (i, p) in kernel.particles().iter().enumerate() {
            let pos = Vec3::from_array(p.pos);
            assert!(pos.is_finite() && Vec3::from_array(p.vel).is_finite());
            assert!(
                pos.cmpge(c.clamp_min).all() && pos.cmple(c.clamp_max).all(),
                "{method:?} tick {tick} particle {i} escaped: {pos:?}"
            );
        }
    }
    assert_eq!(kernel.snapshot().live_count(), 64);
}

#[test]
fn euler_keeps_particles_in_box() {
    run(IntegrationMethod::ForwardEuler);
}

#[test]
fn leapfrog_keeps_particles_in_box() {
    run(IntegrationMethod::Leapfrog);
}

#[test]
fn wall_thickness_shrinks_clamp_range() {
    let c = constants(IntegrationMethod::Leapfrog);
    assert!((c.clamp_min - Vec3::splat(0.02)).abs().max_element() < 1e-6);
    assert!((c.clamp_max - Vec3::splat(0.98)).abs().max_element() < 1e-6);
}
