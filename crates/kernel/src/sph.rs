//! Smoothing kernels and the two SPH evaluators.
//!
//! Kernels (Müller et al. 2003):
//!
//! ```text
//! W_poly6(r)       = 315 / (64 pi h^9) * (h^2 - r^2)^3          density
//! grad W_spiky(r)  = -45 / (pi h^6) * (h - |r|)^2 * r / |r|     pressure
//! lap  W_visc(r)   =  45 / (pi h^6) * (h - |r|)                 viscosity
//! ```
//!
//! All three vanish outside the support radius h. Normalizations come
//! precomputed in [`SimulationConstants`].

use glam::Vec3;

use crate::constants::{SimulationConstants, MIN_PAIR_DIST_SQ};
use crate::dispatch::Dispatcher;
use crate::eos::tait_eos;
use crate::neighbor::SpatialHash;
use crate::particle::{FluidSample, Particle, PositionField};

/// Poly6 kernel evaluated on the squared distance `r2`.
#[inline]
pub fn poly6(r2: f32, c: &SimulationConstants) -> f32 {
    if r2 >= c.h2 {
        return 0.0;
    }
    let d = c.h2 - r2;
    c.poly6 * d * d * d
}

/// Spiky kernel gradient for displacement `r` with length `len`.
///
/// Zero at coincident positions and outside the support.
#[inline]
pub fn spiky_gradient(r: Vec3, len: f32, c: &SimulationConstants) -> Vec3 {
    if len >= c.h || len * len < MIN_PAIR_DIST_SQ {
        return Vec3::ZERO;
    }
    let d = c.h - len;
    r * (c.spiky * d * d / len)
}

/// Laplacian of the viscosity kernel at distance `len`.
#[inline]
pub fn viscosity_laplacian(len: f32, c: &SimulationConstants) -> f32 {
    if len >= c.h {
        return 0.0;
    }
    c.viscosity_laplacian * (c.h - len)
}

// ---------------------------------------------------------------------------
// Density / pressure evaluator
// ---------------------------------------------------------------------------

/// Density and pressure of a single live particle.
///
/// Sums `mass * W_poly6` over every particle within `h` in the 27 surrounding
/// cells, the particle itself included, so an isolated particle ends up with
/// exactly `mass * W_poly6(0)`.
pub fn density_at(
    i: usize,
    c: &SimulationConstants,
    particles: &[Particle],
    hash: &SpatialHash,
    field: PositionField,
) -> FluidSample {
    let (xi, _) = particles[i].state(field);
    let mut density = 0.0;
    hash.for_each_in_radius(&c.grid, particles, field, xi, c.h2, |_, _, r2| {
        density += c.mass * poly6(r2, c);
    });
    FluidSample {
        density,
        pressure: tait_eos(density, c.rest_density, c.stiffness, c.gamma),
    }
}

/// Evaluate density and pressure for every particle. Dead particles get zeros.
pub fn compute_density(
    dispatcher: &Dispatcher,
    c: &SimulationConstants,
    particles: &[Particle],
    hash: &SpatialHash,
    field: PositionField,
    out: &mut [FluidSample],
) {
    dispatcher.for_each_slot(out, |i, sample| {
        *sample = if particles[i].is_alive() {
            density_at(i, c, particles, hash, field)
        } else {
            FluidSample::default()
        };
    });
}

// ---------------------------------------------------------------------------
// Force evaluator
// ---------------------------------------------------------------------------

/// Total force on a single live particle: symmetric pressure, viscosity and
/// gravity.
///
/// ```text
/// F_p = -m^2 * sum_j (P_i / rho_i^2 + P_j / rho_j^2) grad W_spiky(r_ij)
/// F_v =  e m^2 * sum_j (v_j - v_i) / (rho_i rho_j) lap W_visc(|r_ij|)
/// F_g =  m g
/// ```
///
/// Pairs closer than [`MIN_PAIR_DIST_SQ`] (the particle itself, coincident
/// particles) are skipped.
pub fn force_at(
    i: usize,
    c: &SimulationConstants,
    particles: &[Particle],
    fluid: &[FluidSample],
    hash: &SpatialHash,
    field: PositionField,
) -> Vec3 {
    let (xi, vi) = particles[i].state(field);
    let si = fluid[i];
    let pi_term = si.pressure / (si.density * si.density);
    let m2 = c.mass * c.mass;

    let mut pressure = Vec3::ZERO;
    let mut viscous = Vec3::ZERO;
    hash.for_each_in_radius(&c.grid, particles, field, xi, c.h2, |j, r, r2| {
        if j == i || r2 < MIN_PAIR_DIST_SQ {
            return;
        }
        let sj = fluid[j];
        let len = r2.sqrt();

        let pj_term = sj.pressure / (sj.density * sj.density);
        pressure -= spiky_gradient(r, len, c) * (m2 * (pi_term + pj_term));

        let (_, vj) = particles[j].state(field);
        viscous += (vj - vi) * (m2 * viscosity_laplacian(len, c) / (si.density * sj.density));
    });

    pressure + viscous * c.viscosity + c.gravity * c.mass
}

/// Evaluate the total force on every particle. Dead particles get zero.
pub fn compute_forces(
    dispatcher: &Dispatcher,
    c: &SimulationConstants,
    particles: &[Particle],
    fluid: &[FluidSample],
    hash: &SpatialHash,
    field: PositionField,
    out: &mut [Vec3],
) {
    dispatcher.for_each_slot(out, |i, force| {
        *force = if particles[i].is_alive() {
            force_at(i, c, particles, fluid, hash, field)
        } else {
            Vec3::ZERO
        };
    });
}
