//! Scene inputs and the constants derived from them once per simulation.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::eos::TAIT_GAMMA;
use crate::error::SetupError;
use crate::integrate::IntegrationMethod;
use crate::neighbor::CellGrid;

/// Gravitational acceleration applied to every live particle (m/s^2).
pub const GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Pairs closer than this squared distance are skipped by the force evaluator.
pub const MIN_PAIR_DIST_SQ: f32 = 1.0e-12;

/// Largest cell grid a scene may allocate an offset table for.
pub const MAX_GRID_CELLS: usize = 1 << 24;

/// Axis-aligned container box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    /// Outer minimum corner.
    pub min: [f32; 3],
    /// Outer extent along each axis.
    pub size: [f32; 3],
    /// Thickness of the walls, subtracted from every face.
    #[serde(default)]
    pub wall_thickness: f32,
}

impl BoxGeometry {
    /// Inner faces of the box.
    pub fn inner_bounds(&self) -> BoxBounds {
        let min = Vec3::from_array(self.min) + Vec3::splat(self.wall_thickness);
        let max = Vec3::from_array(self.min) + Vec3::from_array(self.size)
            - Vec3::splat(self.wall_thickness);
        BoxBounds { min, max }
    }
}

/// Inner box faces after wall thickness is removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxBounds {
    /// Minimum inner corner.
    pub min: Vec3,
    /// Maximum inner corner.
    pub max: Vec3,
}

impl BoxBounds {
    /// Inner extent along each axis.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Inner volume.
    pub fn volume(&self) -> f32 {
        let e = self.extent();
        e.x * e.y * e.z
    }
}

/// Physical and integration parameters supplied by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    /// Gas stiffness K of the equation of state.
    pub stiffness: f32,
    /// Rest density p0.
    pub rest_density: f32,
    /// Viscosity coefficient e.
    pub viscosity: f32,
    /// Time integration scheme.
    #[serde(default)]
    pub integration: IntegrationMethod,
    /// Fixed time step (s).
    pub timestep: f32,
    /// Linear velocity damping factor in `[0, 1)`.
    #[serde(default)]
    pub damping: f32,
    /// Explicit smoothing length. Derived from the box when absent.
    #[serde(default)]
    pub smoothing_length: Option<f32>,
    /// Multiplier applied to the derived smoothing length.
    #[serde(default = "default_support_factor")]
    pub support_factor: f32,
}

fn default_support_factor() -> f32 {
    1.0
}

/// Constants shared by every stage, immutable for the simulation's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConstants {
    /// Target particle count (buffer size).
    pub particle_count: usize,
    /// Mass of every particle.
    pub mass: f32,
    /// Smoothing length h.
    pub h: f32,
    /// 1 / h.
    pub h_inv: f32,
    /// h^2.
    pub h2: f32,
    /// Poly6 normalization, 315 / (64 pi h^9).
    pub poly6: f32,
    /// Spiky gradient normalization, -45 / (pi h^6).
    pub spiky: f32,
    /// Viscosity Laplacian normalization, 45 / (pi h^6).
    pub viscosity_laplacian: f32,
    /// Gas stiffness K.
    pub stiffness: f32,
    /// Rest density p0.
    pub rest_density: f32,
    /// Viscosity coefficient e.
    pub viscosity: f32,
    /// Tait exponent.
    pub gamma: f32,
    /// Fixed time step.
    pub timestep: f32,
    /// Linear velocity damping factor.
    pub damping: f32,
    /// Gravity vector.
    pub gravity: Vec3,
    /// Particle radius used for wall clamping.
    pub radius: f32,
    /// Inner box faces.
    pub bounds: BoxBounds,
    /// Lowest admissible particle position.
    pub clamp_min: Vec3,
    /// Highest admissible particle position.
    pub clamp_max: Vec3,
    /// Uniform cell grid covering the inner box.
    pub grid: CellGrid,
    /// Time integration scheme.
    pub integration: IntegrationMethod,
}

impl SimulationConstants {
    /// Derive every constant from the box, the spawn grid resolution and the
    /// physical parameters.
    ///
    /// `spawn_grid` is the `[w, h, d]` particle lattice used for the initial
    /// layout. It sets the default smoothing length; the particle count is
    /// `w * h * d`.
    pub fn derive(
        geometry: &BoxGeometry,
        spawn_grid: [u32; 3],
        radius: f32,
        params: &PhysicalParams,
    ) -> Result<Self, SetupError> {
        let particle_count = spawn_grid.iter().map(|&d| d as usize).product::<usize>();
        if particle_count == 0 {
            return Err(SetupError::InvalidGeometry(format!(
                "spawn grid {spawn_grid:?} contains no particles"
            )));
        }
        if !(radius >= 0.0) {
            return Err(SetupError::InvalidGeometry(format!(
                "particle radius must be non-negative, got {radius}"
            )));
        }

        let bounds = geometry.inner_bounds();
        let extent = bounds.extent();
        if extent.min_element() <= 2.0 * radius {
            return Err(SetupError::InvalidGeometry(format!(
                "inner box extent {extent:?} cannot hold particles of radius {radius}"
            )));
        }

        if !(params.rest_density > 0.0) {
            return Err(SetupError::InvalidParameter(format!(
                "rest_density must be positive, got {}",
                params.rest_density
            )));
        }
        if !(params.timestep > 0.0) {
            return Err(SetupError::InvalidParameter(format!(
                "timestep must be positive, got {}",
                params.timestep
            )));
        }
        if !(0.0..1.0).contains(&params.damping) {
            return Err(SetupError::InvalidParameter(format!(
                "damping must lie in [0, 1), got {}",
                params.damping
            )));
        }
        if params.stiffness < 0.0 || params.viscosity < 0.0 {
            return Err(SetupError::InvalidParameter(
                "stiffness and viscosity must be non-negative".into(),
            ));
        }

        let h = match params.smoothing_length {
            Some(h) => h,
            None => {
                let resolution = spawn_grid.iter().map(|&d| d as f32).sum::<f32>();
                params.support_factor * (extent.x + extent.y + extent.z) / resolution
            }
        };
        if !(h > 0.0) || !h.is_finite() {
            return Err(SetupError::InvalidParameter(format!(
                "smoothing length must be positive, got {h}"
            )));
        }

        let mass = params.rest_density * bounds.volume() / particle_count as f32;
        let h2 = h * h;
        let h6 = h2 * h2 * h2;
        let h9 = h6 * h2 * h;
        let grid = CellGrid::new(bounds.min, bounds.max, h)?;
        if grid.total_cells() > MAX_GRID_CELLS {
            return Err(SetupError::InvalidParameter(format!(
                "smoothing length {h} gives {} cells (limit {MAX_GRID_CELLS})",
                grid.total_cells()
            )));
        }

        Ok(Self {
            particle_count,
            mass,
            h,
            h_inv: 1.0 / h,
            h2,
            poly6: 315.0 / (64.0 * PI * h9),
            spiky: -45.0 / (PI * h6),
            viscosity_laplacian: 45.0 / (PI * h6),
            stiffness: params.stiffness,
            rest_density: params.rest_density,
            viscosity: params.viscosity,
            gamma: TAIT_GAMMA,
            timestep: params.timestep,
            damping: params.damping,
            gravity: Vec3::from_array(GRAVITY),
            radius,
            bounds,
            clamp_min: bounds.min + Vec3::splat(radius),
            clamp_max: bounds.max - Vec3::splat(radius),
            grid,
            integration: params.integration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PhysicalParams {
        PhysicalParams {
            stiffness: 3.0,
            rest_density: 1000.0,
            viscosity: 0.5,
            integration: IntegrationMethod::Leapfrog,
            timestep: 0.01,
            damping: 0.0,
            smoothing_length: None,
            support_factor: 1.0,
        }
    }

    fn unit_box() -> BoxGeometry {
        BoxGeometry {
            min: [0.0, 0.0, 0.0],
            size: [4.0, 4.0, 4.0],
            wall_thickness: 0.0,
        }
    }

    #[test]
    fn mass_spreads_rest_density_over_box() {
        let c = SimulationConstants::derive(&unit_box(), [8, 8, 8], 0.1, &params()).unwrap();
        let expected = 1000.0 * 64.0 / 512.0;
        assert!((c.mass - expected).abs() < 1e-4, "mass {} != {expected}", c.mass);
    }

    #[test]
    fn smoothing_length_from_perimeter_and_resolution() {
        let c = SimulationConstants::derive(&unit_box(), [8, 8, 8], 0.1, &params()).unwrap();
        assert!((c.h - 12.0 / 24.0).abs() < 1e-6, "h = {}", c.h);
        assert!((c.h_inv * c.h - 1.0).abs() < 1e-6);
        assert_eq!(c.grid.dims(), [8, 8, 8]);
    }

    #[test]
    fn explicit_smoothing_length_wins() {
        let mut p = params();
        p.smoothing_length = Some(0.25);
        let c = SimulationConstants::derive(&unit_box(), [8, 8, 8], 0.1, &p).unwrap();
        assert_eq!(c.h, 0.25);
        let expected_poly6 = 315.0 / (64.0 * PI * 0.25_f32.powi(9));
        assert!((c.poly6 - expected_poly6).abs() / expected_poly6 < 1e-5);
        assert!(c.spiky < 0.0);
        assert!((c.spiky + c.viscosity_laplacian).abs() < 1e-3);
    }

    #[test]
    fn clamp_range_respects_wall_and_radius() {
        let geometry = BoxGeometry {
            wall_thickness: 0.5,
            ..unit_box()
        };
        let c = SimulationConstants::derive(&geometry, [4, 4, 4], 0.25, &params()).unwrap();
        assert_eq!(c.clamp_min, Vec3::splat(0.75));
        assert_eq!(c.clamp_max, Vec3::splat(3.25));
        assert!((c.bounds.volume() - 27.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(matches!(
            SimulationConstants::derive(&unit_box(), [0, 4, 4], 0.1, &params()),
            Err(SetupError::InvalidGeometry(_))
        ));
        assert!(matches!(
            SimulationConstants::derive(&unit_box(), [4, 4, 4], 2.5, &params()),
            Err(SetupError::InvalidGeometry(_))
        ));
        let mut p = params();
        p.timestep = 0.0;
        assert!(matches!(
            SimulationConstants::derive(&unit_box(), [4, 4, 4], 0.1, &p),
            Err(SetupError::InvalidParameter(_))
        ));
        p = params();
        p.damping = 1.0;
        assert!(SimulationConstants::derive(&unit_box(), [4, 4, 4], 0.1, &p).is_err());
    }

    #[test]
    fn tiny_smoothing_length_is_rejected() {
        let geometry = BoxGeometry {
            size: [10.0; 3],
            ..unit_box()
        };
        let mut p = params();
        p.smoothing_length = Some(1e-9);
        assert!(matches!(
            SimulationConstants::derive(&geometry, [2, 2, 2], 0.1, &p),
            Err(SetupError::InvalidGeometry(_))
        ));

        // fits in 32-bit keys but the offset table would be huge
        p.smoothing_length = Some(0.007);
        assert!(matches!(
            SimulationConstants::derive(&geometry, [2, 2, 2], 0.1, &p),
            Err(SetupError::InvalidParameter(_))
        ));
    }

    #[test]
    fn params_fill_defaults_from_json() {
        let p: PhysicalParams = serde_json::from_str(
            r#"{ "stiffness": 1.0, "rest_density": 1000.0, "viscosity": 0.1, "timestep": 0.001 }"#,
        )
        .unwrap();
        assert_eq!(p.integration, IntegrationMethod::Leapfrog);
        assert_eq!(p.damping, 0.0);
        assert_eq!(p.smoothing_length, None);
        assert_eq!(p.support_factor, 1.0);
    }
}
