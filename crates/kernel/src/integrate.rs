//! Time integration and box collision.
//!
//! Two schemes, chosen once per run:
//!
//! - **Forward Euler** (semi-implicit): `v += dt F/m`, `x += dt v`.
//! - **Leapfrog**: a half step from the committed state writes the midpoint
//!   estimate into the shadow fields; the forces evaluated there drive the full
//!   step, after which the shadow is re-synchronized.
//!
//! After every position update the particle is clamped into
//! `[clamp_min, clamp_max]` and the velocity component along a clamped axis is
//! zeroed (perfectly inelastic wall).

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::constants::SimulationConstants;
use crate::dispatch::Dispatcher;
use crate::particle::Particle;

/// Time integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// One density/force evaluation per tick.
    ForwardEuler,
    /// Two evaluations per tick, midpoint stored in the shadow state.
    #[default]
    Leapfrog,
}

/// Clamp `pos` into the box and zero `vel` on every clamped axis.
#[inline]
pub fn collide_with_box(pos: &mut Vec3, vel: &mut Vec3, lo: Vec3, hi: Vec3) {
    for axis in 0..3 {
        if pos[axis] < lo[axis] {
            pos[axis] = lo[axis];
            vel[axis] = 0.0;
        } else if pos[axis] > hi[axis] {
            pos[axis] = hi[axis];
            vel[axis] = 0.0;
        }
    }
}

#[inline]
fn damp(vel: Vec3, c: &SimulationConstants) -> Vec3 {
    vel * (1.0 - c.damping)
}

/// Forward Euler step for one particle.
pub fn euler_step(p: &mut Particle, force: Vec3, c: &SimulationConstants) {
    if !p.is_alive() {
        return;
    }
    let dt = c.timestep;
    let mut vel = damp(Vec3::from_array(p.vel) + force * (dt / c.mass), c);
    let mut pos = Vec3::from_array(p.pos) + vel * dt;
    collide_with_box(&mut pos, &mut vel, c.clamp_min, c.clamp_max);
    p.pos = pos.to_array();
    p.vel = vel.to_array();
    p.sync_shadow();
}

/// Leapfrog half step: midpoint estimate from the committed state.
///
/// ```text
/// v_lf = v + dt/2 * F/m
/// x_lf = x + dt/2 * v_lf
/// ```
pub fn leapfrog_half_step(p: &mut Particle, force: Vec3, c: &SimulationConstants) {
    if !p.is_alive() {
        return;
    }
    let half_dt = 0.5 * c.timestep;
    let vel_lf = Vec3::from_array(p.vel) + force * (half_dt / c.mass);
    let pos_lf = Vec3::from_array(p.pos) + vel_lf * half_dt;
    p.vel_lf = vel_lf.to_array();
    p.pos_lf = pos_lf.to_array();
}

/// Leapfrog full step from the midpoint force, then re-sync the shadow.
///
/// ```text
/// x += dt * v_lf
/// v += dt * F_mid / m
/// ```
pub fn leapfrog_full_step(p: &mut Particle, midpoint_force: Vec3, c: &SimulationConstants) {
    if !p.is_alive() {
        return;
    }
    let dt = c.timestep;
    let mut pos = Vec3::from_array(p.pos) + Vec3::from_array(p.vel_lf) * dt;
    let mut vel = damp(Vec3::from_array(p.vel) + midpoint_force * (dt / c.mass), c);
    collide_with_box(&mut pos, &mut vel, c.clamp_min, c.clamp_max);
    p.pos = pos.to_array();
    p.vel = vel.to_array();
    p.sync_shadow();
}

/// Apply `step` to every particle with its force.
pub fn integrate_all(
    dispatcher: &Dispatcher,
    c: &SimulationConstants,
    particles: &mut [Particle],
    forces: &[Vec3],
    step: fn(&mut Particle, Vec3, &SimulationConstants),
) {
    dispatcher.for_each_slot(particles, |i, p| step(p, forces[i], c));
}
