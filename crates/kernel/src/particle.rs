//! Particle record shared by every backend.
//!
//! Particles are stored array-of-structs so a single slice maps one-to-one
//! onto the GPU storage buffer. The buffer is allocated once for the target
//! particle count; particles that have not been spawned yet keep their slot
//! with `alive == 0`.

use glam::Vec3;

/// A single fluid particle.
///
/// `pos`/`vel` hold the committed state at the start of a tick. `pos_lf`/`vel_lf`
/// are the leapfrog shadow copies (midpoint estimate). Under forward Euler the
/// shadow simply mirrors the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
#[repr(C)]
pub struct Particle {
    /// Committed position (m).
    pub pos: [f32; 3],
    /// Committed velocity (m/s).
    pub vel: [f32; 3],
    /// Leapfrog midpoint position (m).
    pub pos_lf: [f32; 3],
    /// Leapfrog midpoint velocity (m/s).
    pub vel_lf: [f32; 3],
    /// 1 when the particle takes part in the simulation, 0 otherwise.
    pub alive: u32,
}

impl Particle {
    /// A live particle at `pos` moving with `vel`, shadow state mirrored.
    pub fn spawned(pos: Vec3, vel: Vec3) -> Self {
        Self {
            pos: pos.to_array(),
            vel: vel.to_array(),
            pos_lf: pos.to_array(),
            vel_lf: vel.to_array(),
            alive: 1,
        }
    }

    /// A placeholder slot that does not participate until spawned.
    pub fn dormant(pos: Vec3) -> Self {
        Self {
            alive: 0,
            ..Self::spawned(pos, Vec3::ZERO)
        }
    }

    /// Whether the particle takes part in the simulation.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive != 0
    }

    /// Copy the committed state into the leapfrog shadow.
    #[inline]
    pub fn sync_shadow(&mut self) {
        self.pos_lf = self.pos;
        self.vel_lf = self.vel;
    }

    /// Position and velocity read from the requested field.
    #[inline]
    pub fn state(&self, field: PositionField) -> (Vec3, Vec3) {
        match field {
            PositionField::Committed => (Vec3::from_array(self.pos), Vec3::from_array(self.vel)),
            PositionField::Midpoint => {
                (Vec3::from_array(self.pos_lf), Vec3::from_array(self.vel_lf))
            }
        }
    }
}

/// Which particle state an evaluator reads.
///
/// Density and force evaluators exist in two variants that differ only in this
/// choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionField {
    /// `pos` / `vel`.
    Committed,
    /// `pos_lf` / `vel_lf`.
    Midpoint,
}

/// Per-particle density and pressure, overwritten every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
#[repr(C)]
pub struct FluidSample {
    /// Summed density (kg/m^3).
    pub density: f32,
    /// Pressure from the Tait equation of state.
    pub pressure: f32,
}
