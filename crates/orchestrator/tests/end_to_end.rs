//! Configuration file to final frame through the public entry points.

use std::io::Write;

use sph_orchestrator::{create_simulation, OrchestratorError, RunnerState};

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

const DAM_BREAK: &str = r#"{
    "name": "dam break",
    "backend": "Cpu",
    "max_ticks": 40,
    "scene": {
        "box": { "min": [0, 0, 0], "size": [1, 0.6, 0.4], "wall_thickness": 0.02 },
        "particle_radius": 0.01,
        "spawn": { "grid": [6, 6, 4], "spacing": 0.1, "jitter": 0.002, "seed": 4 }
    },
    "physics": {
        "stiffness": 0.5,
        "rest_density": 1000.0,
        "viscosity": 0.2,
        "integration": "Leapfrog",
        "timestep": 0.001
    }
}"#;

#[test]
fn dam_break_runs_to_completion() {
    let file = write_config(DAM_BREAK);
    let runner = create_simulation(file.path()).unwrap();
    assert_eq!(runner.state(), RunnerState::Created);
    runner.start();
    let snapshot = runner.join().unwrap().unwrap();

    assert_eq!(snapshot.tick, 40);
    assert_eq!(snapshot.live_count(), 144);
    let stats = snapshot.stats();
    assert!(stats.lowest >= 0.02 + 0.01 - 1e-6, "lowest = {}", stats.lowest);
    assert!(stats.max_speed.is_finite());
}

#[test]
fn gradual_fill_adds_one_particle_per_interval() {
    let json = DAM_BREAK
        .replace(
            r#""jitter": 0.002, "seed": 4"#,
            r#""jitter": 0.01, "seed": 4,
               "mode": { "Gradual": { "point": [0.5, 0.5, 0.2], "interval": 2 } }"#,
        )
        .replace(r#""max_ticks": 40"#, r#""max_ticks": 30"#);
    let file = write_config(&json);
    let runner = create_simulation(file.path()).unwrap();
    runner.start();
    let snapshot = runner.join().unwrap().unwrap();
    assert_eq!(snapshot.live_count(), 15);
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let json = DAM_BREAK.replace(r#""timestep": 0.001"#, r#""timestep": -0.001"#);
    let file = write_config(&json);
    match create_simulation(file.path()) {
        Err(OrchestratorError::Config(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("negative timestep accepted"),
    }
}
