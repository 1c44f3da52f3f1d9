//! Reference scenarios re-run on the GPU backend.
//!
//! Skipped at runtime when no adapter is present.

#![cfg(feature = "gpu")]

use crate::{scenarios, ReferenceTest};
use sph_orchestrator::BackendType;

fn run_on_gpu(mut test: ReferenceTest) {
    if !sph_kernel::gpu::gpu_available() {
        eprintln!("Skipping GPU reference test {}: no adapter", test.name);
        return;
    }
    test.backend = Some(BackendType::Gpu);
    let result = test.run().expect("scenario failed to run");
    result.print_summary();
    assert!(result.passed, "{} failed on GPU: {:?}", result.name, result.checks);
}

#[test]
fn gpu_free_fall() {
    run_on_gpu(scenarios::free_fall());
}

#[test]
fn gpu_dam_break() {
    run_on_gpu(scenarios::dam_break());
}

#[test]
fn gpu_gradual_fill() {
    run_on_gpu(scenarios::gradual_fill());
}
