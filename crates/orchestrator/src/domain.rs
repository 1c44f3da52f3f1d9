//! Domain setup: initial particle placement

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::{Particle, SimulationConstants};

use crate::config::{SpawnConfig, SpawnMode};

/// Fill every particle slot according to `spawn`.
///
/// `Cube` places a `w x h x d` lattice starting at `origin` with `spacing`
/// between neighbors, adds uniform jitter and clamps into the admissible
/// range. `Gradual` leaves every slot dormant at the birth point.
pub fn initial_particles(spawn: &SpawnConfig, constants: &SimulationConstants) -> Vec<Particle> {
    let count = spawn.particle_count();
    let particles = match spawn.mode {
        SpawnMode::Cube => lattice(spawn, constants),
        SpawnMode::Gradual { point, .. } => {
            let at = Vec3::from_array(point).clamp(constants.clamp_min, constants.clamp_max);
            vec![Particle::dormant(at); count]
        }
    };
    debug_assert_eq!(particles.len(), constants.particle_count);

    tracing::info!(
        particles = particles.len(),
        alive = particles.iter().filter(|p| p.is_alive()).count(),
        mode = ?spawn.mode,
        "domain setup complete"
    );
    particles
}

fn lattice(spawn: &SpawnConfig, c: &SimulationConstants) -> Vec<Particle> {
    let origin = spawn.origin.map(Vec3::from_array).unwrap_or(c.clamp_min);
    let spacing = spawn.spacing.unwrap_or(2.0 * c.radius);
    let [w, h, d] = spawn.grid;
    let mut rng = StdRng::seed_from_u64(spawn.seed);
    let a = spawn.jitter;

    let mut out = Vec::with_capacity(spawn.particle_count());
    let mut clamped = 0usize;
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let mut pos = origin + Vec3::new(x as f32, y as f32, z as f32) * spacing;
                if a > 0.0 {
                    pos += Vec3::new(
                        rng.gen_range(-a..=a),
                        rng.gen_range(-a..=a),
                        rng.gen_range(-a..=a),
                    );
                }
                let inside = pos.clamp(c.clamp_min, c.clamp_max);
                if inside != pos {
                    clamped += 1;
                }
                out.push(Particle::spawned(inside, Vec3::ZERO));
            }
        }
    }
    if clamped > 0 {
        tracing::warn!(clamped, "lattice extends past the box; particles clamped to the walls");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sph_kernel::{BoxGeometry, IntegrationMethod, PhysicalParams};

    fn constants(grid: [u32; 3]) -> SimulationConstants {
        let geometry = BoxGeometry {
            min: [0.0; 3],
            size: [1.0; 3],
            wall_thickness: 0.0,
        };
        let params = PhysicalParams {
            stiffness: 1.0,
            rest_density: 1000.0,
            viscosity: 0.1,
            integration: IntegrationMethod::Leapfrog,
            timestep: 0.001,
            damping: 0.0,
            smoothing_length: None,
            support_factor: 1.0,
        };
        SimulationConstants::derive(&geometry, grid, 0.02, &params).unwrap()
    }

    fn spawn(grid: [u32; 3], mode: SpawnMode) -> SpawnConfig {
        SpawnConfig {
            grid,
            origin: Some([0.1, 0.2, 0.1]),
            spacing: Some(0.05),
            jitter: 0.0,
            mode,
            seed: 0,
        }
    }

    #[test]
    fn cube_lattice_is_x_major() {
        let c = constants([3, 2, 2]);
        let particles = initial_particles(&spawn([3, 2, 2], SpawnMode::Cube), &c);
        assert_eq!(particles.len(), 12);
        assert!(particles.iter().all(|p| p.is_alive()));
        assert_eq!(particles[0].pos, [0.1, 0.2, 0.1]);
        let p1 = Vec3::from_array(particles[1].pos);
        assert!((p1 - Vec3::new(0.15, 0.2, 0.1)).length() < 1e-6);
        let p3 = Vec3::from_array(particles[3].pos);
        assert!((p3 - Vec3::new(0.1, 0.25, 0.1)).length() < 1e-6);
    }

    #[test]
    fn jittered_lattice_stays_in_box() {
        let c = constants([4, 4, 4]);
        let mut cfg = spawn([4, 4, 4], SpawnMode::Cube);
        cfg.origin = None;
        cfg.jitter = 0.05;
        cfg.seed = 17;
        let particles = initial_particles(&cfg, &c);
        for p in &particles {
            let pos = Vec3::from_array(p.pos);
            assert!(pos.cmpge(c.clamp_min).all() && pos.cmple(c.clamp_max).all());
        }
        assert_eq!(particles, initial_particles(&cfg, &c), "seeded jitter is reproducible");
    }

    #[test]
    fn gradual_mode_starts_dormant() {
        let c = constants([2, 2, 2]);
        let mode = SpawnMode::Gradual {
            point: [0.5, 0.9, 0.5],
            interval: 1,
            initial_velocity: [0.0; 3],
        };
        let particles = initial_particles(&spawn([2, 2, 2], mode), &c);
        assert_eq!(particles.len(), 8);
        assert!(particles.iter().all(|p| !p.is_alive()));
    }
}
