//! Reference scenarios for the cell-sorted SPH solver.
//!
//! Each [`ReferenceTest`] loads a scene configuration, runs it for a fixed
//! number of ticks on the configured backend and validates the final (and,
//! where needed, per-tick) state against [`ExpectedResult`].

pub mod analytical;
pub mod scenarios;


#[cfg(test)]
mod gpu_tests;

use glam::Vec3;
use sph_kernel::{FrameSnapshot, SimulationConstants, SimulationKernel};
use sph_orchestrator::{
    create_kernel, prepare_scene, BackendType, OrchestratorError, SimulationConfig,
};
use std::path::{Path, PathBuf};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Every live particle inside the clamp range after every tick
    pub containment: bool,
    /// Free fall under gravity alone, checked tick by tick
    pub free_fall: Option<FreeFallCheck>,
    /// Exact number of live particles at the end
    pub live_count: Option<usize>,
    /// Particles have moved down towards the floor
    pub settling: Option<SettlingCheck>,
}

/// Free-fall expectations for a forward Euler run without interactions.
#[derive(Debug, Clone)]
pub struct FreeFallCheck {
    /// Allowed absolute error on velocity increments (m/s)
    pub tolerance: f32,
}

/// Check that the fluid column has dropped
#[derive(Debug, Clone)]
pub struct SettlingCheck {
    /// Minimum decrease of the mean height (m)
    pub min_drop: f32,
    /// Lowest particle within this distance of the floor clamp (m)
    pub floor_tolerance: f32,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Ticks executed
    pub ticks: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: Some(message),
        }
    }

    fn fail(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: Some(message),
        }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: PathBuf,
    /// Number of ticks to run
    pub ticks: u64,
    /// Backend override (`None` keeps the one in the config)
    pub backend: Option<BackendType>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// Resolve a scenario config shipped with this crate.
pub fn config_path(file: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("configs").join(file)
}

/// Per-tick tracker for the checks that need more than the final frame.
struct Tracker<'a> {
    expected: &'a ExpectedResult,
    constants: SimulationConstants,
    previous: FrameSnapshot,
    containment_violations: usize,
    worst_excursion: f32,
    free_fall_error: f32,
    lateral_drift: f32,
}

impl<'a> Tracker<'a> {
    fn new(expected: &'a ExpectedResult, constants: SimulationConstants, first: FrameSnapshot) -> Self {
        Self {
            expected,
            constants,
            previous: first,
            containment_violations: 0,
            worst_excursion: 0.0,
            free_fall_error: 0.0,
            lateral_drift: 0.0,
        }
    }

    fn observe(&mut self, frame: FrameSnapshot) {
        let c = &self.constants;
        if self.expected.containment {
            for p in frame.live() {
                let pos = Vec3::from_array(p.pos);
                let excursion = (c.clamp_min - pos).max(pos - c.clamp_max).max_element();
                if excursion > 0.0 {
                    self.containment_violations += 1;
                    self.worst_excursion = self.worst_excursion.max(excursion);
                }
            }
        }
        if self.expected.free_fall.is_some() {
            let dv = c.gravity.y * c.timestep;
            for (before, after) in self.previous.particles.iter().zip(&frame.particles) {
                if !after.is_alive() {
                    continue;
                }
                // Resting on the floor: the clamp zeroes the velocity instead.
                let grounded = after.pos[1] <= c.clamp_min.y;
                if !grounded {
                    let err = (after.vel[1] - before.vel[1] - dv).abs();
                    self.free_fall_error = self.free_fall_error.max(err);
                } else if after.vel[1] != 0.0 {
                    self.free_fall_error = f32::INFINITY;
                }
                let moved = Vec3::from_array(after.pos) - Vec3::from_array(before.pos);
                self.lateral_drift = self.lateral_drift.max(moved.x.abs()).max(moved.z.abs());
            }
        }
        self.previous = frame;
    }
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, OrchestratorError> {
        tracing::info!("Running reference test: {}", self.name);

        let config = SimulationConfig::load(&self.config_path)?;
        let backend = self.backend.unwrap_or(config.backend);
        let scene = prepare_scene(&config)?;
        let constants = scene.constants;
        let mut kernel = create_kernel(backend, scene)?;
        let initial = kernel.snapshot();
        let mut tracker = Tracker::new(&self.expected, constants, initial.clone());

        let per_tick = self.expected.containment || self.expected.free_fall.is_some();
        for tick in 0..self.ticks {
            kernel.step();
            if per_tick {
                tracker.observe(kernel.snapshot());
            }
            if (tick + 1) % (self.ticks / 10).max(1) == 0 {
                let progress = (tick + 1) as f32 / self.ticks as f32 * 100.0;
                tracing::info!("Progress: {:.0}% ({}/{})", progress, tick + 1, self.ticks);
            }
        }
        let last = kernel.snapshot();
        let sim_time = kernel.tick() as f64 * constants.timestep as f64;

        let mut checks = Vec::new();
        if self.expected.containment {
            checks.push(if tracker.containment_violations == 0 {
                CheckResult::pass("Containment", format!("{} live particles", last.live_count()))
            } else {
                CheckResult::fail(
                    "Containment",
                    format!(
                        "{} escapes (worst {:.6} m)",
                        tracker.containment_violations, tracker.worst_excursion
                    ),
                )
            });
        }
        if let Some(ref check) = self.expected.free_fall {
            checks.push(validate_free_fall(&tracker, check));
        }
        if let Some(expected) = self.expected.live_count {
            let live = last.live_count();
            checks.push(if live == expected {
                CheckResult::pass("Live Count", format!("{live} live"))
            } else {
                CheckResult::fail("Live Count", format!("expected {expected}, got {live}"))
            });
        }
        if let Some(ref check) = self.expected.settling {
            checks.push(validate_settling(&initial, &last, &constants, check));
        }

        let finite = last
            .live()
            .all(|p| p.pos.iter().chain(&p.vel).all(|v| v.is_finite()));
        checks.push(if finite {
            CheckResult::pass("Finite State", "all positions and velocities finite".into())
        } else {
            CheckResult::fail("Finite State", "non-finite particle state".into())
        });

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            ticks: kernel.tick(),
            sim_time,
        })
    }
}

fn validate_free_fall(tracker: &Tracker<'_>, check: &FreeFallCheck) -> CheckResult {
    let err = tracker.free_fall_error;
    let drift = tracker.lateral_drift;
    if err <= check.tolerance && drift == 0.0 {
        CheckResult::pass(
            "Free Fall",
            format!("max dv error {err:.2e} m/s, no lateral drift"),
        )
    } else {
        CheckResult::fail(
            "Free Fall",
            format!(
                "max dv error {err:.2e} m/s (limit {:.2e}), lateral drift {drift:.2e} m",
                check.tolerance
            ),
        )
    }
}

fn validate_settling(
    initial: &FrameSnapshot,
    last: &FrameSnapshot,
    constants: &SimulationConstants,
    check: &SettlingCheck,
) -> CheckResult {
    let before = initial.stats();
    let after = last.stats();
    let drop = before.mean_height - after.mean_height;
    let floor_gap = after.lowest - constants.clamp_min.y;
    let message = format!(
        "mean height {:.4} -> {:.4} m, lowest {:.4} m above floor",
        before.mean_height, after.mean_height, floor_gap
    );
    if drop >= check.min_drop && floor_gap <= check.floor_tolerance {
        CheckResult::pass("Settling", message)
    } else {
        CheckResult::fail("Settling", message)
    }
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ticks: {}", self.ticks);
        println!("Simulated time: {:.6} s", self.sim_time);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
