/// Scenario runner: executes every in-process scenario in sequence and
/// produces an aggregated pass/fail report.
use std::time::Instant;

use serde::Serialize;

use crate::events::emit;
use crate::scenario_common::ScenarioResult;
use crate::{scenario_channel_state, scenario_coalesce, scenario_outage};

#[derive(Serialize)]
struct RunnerSummary {
    event: &'static str,
    scenarios: Vec<ScenarioLine>,
    total_passed: usize,
    total_failed: usize,
    total_elapsed_s: f64,
    overall_status: &'static str,
}

#[derive(Serialize)]
struct ScenarioLine {
    scenario: String,
    status: &'static str,
    passed: usize,
    failed: usize,
    elapsed_ms: f64,
}

/// Returns whether every scenario passed.
pub async fn run() -> anyhow::Result<bool> {
    let runner_start = Instant::now();

    let scenarios: Vec<(&str, anyhow::Result<ScenarioResult>)> = vec![
        ("coalesce", scenario_coalesce::run().await),
        ("outage", scenario_outage::run().await),
        ("channel-state", scenario_channel_state::run().await),
    ];

    let mut lines = Vec::new();
    let mut total_passed = 0usize;
    let mut total_failed = 0usize;

    for (name, result) in &scenarios {
        match result {
            Ok(r) => {
                r.print_summary();
                emit(r);
                total_passed += r.passed;
                total_failed += r.failed;
                lines.push(ScenarioLine {
                    scenario: name.to_string(),
                    status: if r.success() { "PASS" } else { "FAIL" },
                    passed: r.passed,
                    failed: r.failed,
                    elapsed_ms: r.total_ms,
                });
            }
            Err(e) => {
                eprintln!("\n[FAIL] Scenario {name}: {e}");
                total_failed += 1;
                lines.push(ScenarioLine {
                    scenario: name.to_string(),
                    status: "ERROR",
                    passed: 0,
                    failed: 1,
                    elapsed_ms: 0.0,
                });
            }
        }
    }

    let ok = total_failed == 0;
    emit(&RunnerSummary {
        event: "runner_summary",
        scenarios: lines,
        total_passed,
        total_failed,
        total_elapsed_s: runner_start.elapsed().as_secs_f64(),
        overall_status: if ok { "PASS" } else { "FAIL" },
    });
    eprintln!(
        "\n{total_passed} steps passed, {total_failed} failed ({:.1}s)",
        runner_start.elapsed().as_secs_f64()
    );
    Ok(ok)
}
