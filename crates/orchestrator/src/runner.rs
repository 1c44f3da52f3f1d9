//! Simulation runner with lifecycle management
//!
//! `SimulationRunner` owns a kernel on a background thread and exposes start,
//! pause, resume and stop controls plus progress queries. The latest particle
//! snapshot is published into the shared state every `snapshot_interval`
//! ticks and once more when the run ends.

use sph_kernel::{FrameSnapshot, SimulationKernel};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::OrchestratorError;

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (reached stopping condition or stopped)
    Finished,
    /// A tick panicked; see [`SimulationRunner::error_message`]
    Error,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    tick: u64,
    sim_time: f64,
    live_count: usize,
    error_message: Option<String>,
    snapshot: Option<FrameSnapshot>,
}

/// Run limits and publishing cadence.
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Stop after this many ticks (`None` runs until stopped).
    pub max_ticks: Option<u64>,
    /// Ticks between progress log lines.
    pub log_interval: u64,
    /// Ticks between published snapshots.
    pub snapshot_interval: u64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_ticks: None,
            log_interval: 100,
            snapshot_interval: 100,
        }
    }
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulationRunner {
    /// Create a new simulation runner with the given kernel.
    ///
    /// The background thread starts immediately but waits in `Created` until
    /// [`start`](Self::start) is called.
    pub fn new(kernel: Box<dyn SimulationKernel>, options: RunnerOptions) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            tick: kernel.tick(),
            sim_time: 0.0,
            live_count: kernel.live_count(),
            error_message: None,
            snapshot: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            run_simulation_loop(kernel, shared_clone, options);
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Ticks completed
    pub fn tick(&self) -> u64 {
        lock(&self.shared).tick
    }

    /// Simulated time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Live particles after the last tick
    pub fn live_count(&self) -> usize {
        lock(&self.shared).live_count
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Most recently published snapshot
    pub fn latest_snapshot(&self) -> Option<FrameSnapshot> {
        lock(&self.shared).snapshot.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Running {
            state.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Paused {
            state.state = RunnerState::Running;
        }
    }

    /// Ask the thread to finish after the current tick
    pub fn stop(&self) {
        let mut state = lock(&self.shared);
        if state.state != RunnerState::Error {
            state.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread and return the final snapshot.
    pub fn join(mut self) -> Result<Option<FrameSnapshot>, OrchestratorError> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| OrchestratorError::RunnerPanicked)?;
        }
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Error {
            let message = state.error_message.clone().unwrap_or_default();
            return Err(OrchestratorError::TickFailed(message));
        }
        Ok(state.snapshot.take())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit
        let mut state = lock(&self.shared);
        if matches!(
            state.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            state.state = RunnerState::Finished;
        }
    }
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(
    mut kernel: Box<dyn SimulationKernel>,
    shared: Arc<Mutex<SharedState>>,
    options: RunnerOptions,
) {
    // Wait for start signal
    loop {
        match lock(&shared).state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    let dt = kernel.constants().timestep as f64;
    let log_interval = options.log_interval.max(1);
    let snapshot_interval = options.snapshot_interval.max(1);
    let start_wall_time = Instant::now();

    loop {
        match lock(&shared).state {
            RunnerState::Running => {}
            RunnerState::Paused => {
                thread::sleep(Duration::from_millis(20));
                continue;
            }
            RunnerState::Created | RunnerState::Finished | RunnerState::Error => break,
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| kernel.step())) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "tick panicked".to_string());
            tracing::error!(tick = kernel.tick(), "simulation tick failed: {message}");
            let mut guard = lock(&shared);
            guard.state = RunnerState::Error;
            guard.error_message = Some(message);
            return;
        }

        let tick = kernel.tick();
        let sim_time = tick as f64 * dt;
        let finished = options.max_ticks.is_some_and(|max| tick >= max);
        let snapshot = (finished || tick % snapshot_interval == 0).then(|| kernel.snapshot());

        {
            let mut guard = lock(&shared);
            guard.tick = tick;
            guard.sim_time = sim_time;
            guard.live_count = kernel.live_count();
            if let Some(snapshot) = snapshot {
                guard.snapshot = Some(snapshot);
            }
            if finished {
                guard.state = RunnerState::Finished;
            }
        }

        if tick % log_interval == 0 {
            tracing::debug!(
                tick,
                sim_time,
                live = kernel.live_count(),
                wall_time = start_wall_time.elapsed().as_secs_f64(),
                "progress"
            );
        }
        if finished {
            tracing::info!(tick, "simulation finished: reached max_ticks");
            break;
        }
    }

    // Publish the final state for join()
    let snapshot = kernel.snapshot();
    let mut guard = lock(&shared);
    guard.tick = snapshot.tick;
    guard.live_count = kernel.live_count();
    guard.snapshot = Some(snapshot);
    tracing::info!(
        ticks = guard.tick,
        sim_time = guard.sim_time,
        wall_time = start_wall_time.elapsed().as_secs_f64(),
        "simulation thread exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use sph_kernel::{
        BoxGeometry, CpuKernel, IntegrationMethod, Particle, PhysicalParams,
        SimulationConstants, SolverOptions,
    };

    fn kernel() -> Box<dyn SimulationKernel> {
        let geometry = BoxGeometry {
            min: [0.0; 3],
            size: [1.0; 3],
            wall_thickness: 0.0,
        };
        let params = PhysicalParams {
            stiffness: 1.0,
            rest_density: 1000.0,
            viscosity: 0.1,
            integration: IntegrationMethod::ForwardEuler,
            timestep: 0.001,
            damping: 0.0,
            smoothing_length: None,
            support_factor: 1.0,
        };
        let c = SimulationConstants::derive(&geometry, [2, 2, 2], 0.02, &params).unwrap();
        let particles = (0..8)
            .map(|i| {
                let pos = Vec3::new((i % 2) as f32, ((i / 2) % 2) as f32, (i / 4) as f32) * 0.3
                    + Vec3::splat(0.3);
                Particle::spawned(pos, Vec3::ZERO)
            })
            .collect();
        Box::new(CpuKernel::new(c, particles, None, SolverOptions::default()).unwrap())
    }

    fn options(max_ticks: Option<u64>) -> RunnerOptions {
        RunnerOptions {
            max_ticks,
            log_interval: 10,
            snapshot_interval: 5,
        }
    }

    #[test]
    fn test_runner_lifecycle() {
        let runner = SimulationRunner::new(kernel(), options(Some(20)));
        assert_eq!(runner.state(), RunnerState::Created);
        assert_eq!(runner.live_count(), 8);

        runner.start();
        let snapshot = runner.join().unwrap().unwrap();
        assert_eq!(snapshot.tick, 20);
        assert_eq!(snapshot.live_count(), 8);
    }

    #[test]
    fn test_runner_pause_resume() {
        let runner = SimulationRunner::new(kernel(), options(None));
        runner.start();
        thread::sleep(Duration::from_millis(30));

        runner.pause();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(runner.state(), RunnerState::Paused);

        let ticks_paused = runner.tick();
        thread::sleep(Duration::from_millis(60));
        let ticks_after = runner.tick();
        assert!(
            ticks_after <= ticks_paused + 1,
            "ticks advanced while paused: before={ticks_paused}, after={ticks_after}"
        );

        runner.resume();
        assert_eq!(runner.state(), RunnerState::Running);
        thread::sleep(Duration::from_millis(30));
        runner.stop();
        let snapshot = runner.join().unwrap().unwrap();
        assert!(snapshot.tick >= ticks_after);
    }

    #[test]
    fn publishes_snapshots_while_running() {
        let runner = SimulationRunner::new(kernel(), options(Some(10)));
        assert!(runner.latest_snapshot().is_none());
        runner.start();
        while runner.state() == RunnerState::Running {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.state(), RunnerState::Finished);
        assert!((runner.sim_time() - 0.01).abs() < 1e-9);
        assert_eq!(runner.latest_snapshot().map(|s| s.tick), Some(10));
    }

    #[test]
    fn dropping_an_unstarted_runner_ends_the_thread() {
        let runner = SimulationRunner::new(kernel(), options(Some(10)));
        drop(runner);
    }
}
