//! Runs every reference scenario and prints a summary.
//!
//! Pass `--gpu` to force the GPU backend.

use sph_orchestrator::BackendType;
use sph_reference_tests::{scenarios, TestResult};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let gpu = std::env::args().skip(1).any(|a| a == "--gpu");

    tracing::info!("SPH Reference Test Suite");
    let mut tests = scenarios::all();
    if gpu {
        for test in &mut tests {
            test.backend = Some(BackendType::Gpu);
        }
    }
    tracing::info!("Found {} reference tests", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut failed_count = 0;
    for test in tests {
        match test.run() {
            Ok(result) => {
                if !result.passed {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    for result in &results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!("  [{}] {} ({} ticks)", status, result.name, result.ticks);
    }
    println!("Failed: {}", failed_count);

    if failed_count > 0 {
        std::process::exit(1);
    }
}
