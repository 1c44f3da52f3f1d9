//! Equation of state relating summed density to pressure.

/// Tait exponent used for every run.
pub const TAIT_GAMMA: f32 = 7.0;

/// Tait equation of state in stiffness form.
///
/// ```text
/// P = K * ((rho / rho0)^gamma - 1)
/// ```
///
/// # Arguments
/// * `density` - Current density rho.
/// * `rest_density` - Reference rest density rho0.
/// * `stiffness` - Gas stiffness K.
/// * `gamma` - Tait exponent (7 for water-like fluids).
///
/// # Returns
/// Pressure. Negative (tension) when `density < rest_density`.
#[inline]
pub fn tait_eos(density: f32, rest_density: f32, stiffness: f32, gamma: f32) -> f32 {
    let ratio = density / rest_density;
    stiffness * (ratio.powf(gamma) - 1.0)
}
