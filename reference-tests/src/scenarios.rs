//! The shipped reference scenarios.

use crate::{config_path, ExpectedResult, FreeFallCheck, ReferenceTest, SettlingCheck};

/// Eight isolated particles dropped in a large box with forward Euler.
///
/// Without neighbors the only force is gravity, so every tick must change
/// `v_y` by exactly `g * dt` until a particle reaches the floor, where the
/// clamp holds it with zero vertical velocity.
pub fn free_fall() -> ReferenceTest {
    ReferenceTest {
        name: "Free Fall".to_string(),
        config_path: config_path("free-fall-2x2x2.json"),
        ticks: 40,
        backend: None,
        expected: ExpectedResult {
            containment: true,
            free_fall: Some(FreeFallCheck { tolerance: 1e-4 }),
            live_count: Some(8),
            settling: None,
        },
    }
}

/// A block of fluid released in one corner of a shallow tank.
pub fn dam_break() -> ReferenceTest {
    ReferenceTest {
        name: "Dam Break".to_string(),
        config_path: config_path("dam-break.json"),
        ticks: 400,
        backend: None,
        expected: ExpectedResult {
            containment: true,
            free_fall: None,
            live_count: Some(384),
            settling: Some(SettlingCheck {
                min_drop: 0.01,
                floor_tolerance: 0.01,
            }),
        },
    }
}

/// Particles born one every other tick from a single emitter.
pub fn gradual_fill() -> ReferenceTest {
    ReferenceTest {
        name: "Gradual Fill".to_string(),
        config_path: config_path("gradual-fill.json"),
        ticks: 100,
        backend: None,
        expected: ExpectedResult {
            containment: true,
            live_count: Some(50),
            ..Default::default()
        },
    }
}

/// Every scenario, in run order.
pub fn all() -> Vec<ReferenceTest> {
    vec![free_fall(), dam_break(), gradual_fill()]
}
