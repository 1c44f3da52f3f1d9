//! Closed-form expectations for the reference scenarios.
//!
//! Semi-implicit Euler under constant acceleration `a` with step `dt`:
//!
//! ```text
//! v_n = v_0 + n a dt
//! y_n = y_0 + n v_0 dt + a dt^2 n (n + 1) / 2
//! ```
//!
//! Leapfrog reproduces the continuous solution `y_0 + v_0 t + a t^2 / 2`.

/// Velocity after `n` Euler steps.
pub fn euler_velocity(v0: f64, accel: f64, dt: f64, n: u64) -> f64 {
    v0 + n as f64 * accel * dt
}

/// Position after `n` semi-implicit Euler steps.
pub fn euler_position(y0: f64, v0: f64, accel: f64, dt: f64, n: u64) -> f64 {
    let n = n as f64;
    y0 + n * v0 * dt + accel * dt * dt * n * (n + 1.0) / 2.0
}

/// Continuous ballistic position at time `t`.
pub fn ballistic_position(y0: f64, v0: f64, accel: f64, t: f64) -> f64 {
    y0 + v0 * t + 0.5 * accel * t * t
}

/// Ticks until a body released at rest from height `drop` reaches the floor
/// under semi-implicit Euler.
pub fn euler_ticks_to_floor(drop: f64, accel: f64, dt: f64) -> u64 {
    let g = accel.abs();
    let mut n = 0u64;
    while euler_position(drop, 0.0, -g, dt, n) > 0.0 {
        n += 1;
    }
    n
}
