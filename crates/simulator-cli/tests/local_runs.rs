//! Local fleet run tests for simulator-cli.
// crates/simulator-cli/tests/local_runs.rs
// =============================================================================
// Module: Local Run Tests
// Description: Run builtin suites on an in-process fleet end to end.
// Purpose: Ensure phase progression, failure propagation and reports hold.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use simulator_cli::CliError;
use simulator_cli::commands::report_json;
use simulator_cli::commands::run_suite;
use simulator_config::SimulatorConfig;
use simulator_core::FailureKind;
use simulator_core::SharedLogSink;
use simulator_core::TestPhase;
use simulator_core::TestStatus;
use simulator_core::TestSuite;
use simulator_core::telemetry::MemoryLogSink;
use simulator_core::telemetry::NoopLogSink;

/// Two workers on one agent with short timers.
fn fleet_config(fleet_extra: &str) -> SimulatorConfig {
    SimulatorConfig::parse(&format!(
        r#"
[fleet]
agents = 1
workers_per_agent = 2
run_duration_ms = 0
{fleet_extra}

[timeouts]
request_timeout_ms = 5000
heartbeat_interval_ms = 50
worker_lost_timeout_ms = 2000
reaper_interval_ms = 20

[performance]
monitor_interval_ms = 50

[logging]
sink = "none"
"#
    ))
    .unwrap()
}

fn silent() -> SharedLogSink {
    Arc::new(NoopLogSink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kv_load_completes_and_counts_every_operation() {
    let suite = TestSuite::parse("load@class = KvLoad\nload@threadCount = 2\nload@iterations = 200\n").unwrap();
    let report = run_suite(&suite, &fleet_config(""), silent()).await.unwrap();

    assert!(report.all_completed());
    let test = report.test("load").unwrap();
    assert_eq!(test.status, TestStatus::Completed);
    assert!(test.first_failure.is_none());
    assert_eq!(test.operations, 2 * 2 * 200);
    assert!(test.probes.contains_key("put"));
    assert!(test.probes.contains_key("get"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_duration_bounds_paced_run() {
    let suite = TestSuite::parse("timed@class = KvLoad\ntimed@ratePerSecond = 2000\n").unwrap();
    let mut config = fleet_config("");
    config.fleet.run_duration_ms = 200;
    let report = run_suite(&suite, &config, silent()).await.unwrap();
    assert_eq!(report.test("timed").unwrap().status, TestStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kv_fault_fails_in_run_and_still_reports() {
    let sink = Arc::new(MemoryLogSink::new());
    let log: SharedLogSink = sink.clone();
    let suite = TestSuite::parse("fault@class = KvFault\nfault@iterations = 1000\nfault@failAfter = 10\n").unwrap();
    let report = run_suite(&suite, &fleet_config(""), log).await.unwrap();

    assert!(!report.all_completed());
    let test = report.test("fault").unwrap();
    assert_eq!(test.status, TestStatus::Failed(FailureKind::Exception));
    let failure = test.first_failure.as_ref().unwrap();
    assert_eq!(failure.phase, Some(TestPhase::Run));
    assert!(failure.detail.message.contains("injected fault"));
    assert!(!sink.events_named("test_failed").is_empty());

    let json = String::from_utf8(report_json(&report).unwrap()).unwrap();
    assert!(json.contains("FAILED(exception)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_aborts_queued_tests() {
    let suite = TestSuite::parse(
        "fault@class = KvFault\nfault@iterations = 1000\nload@class = KvLoad\nload@iterations = 10\n",
    )
    .unwrap();
    let report = run_suite(&suite, &fleet_config("fail_fast = true"), silent()).await.unwrap();

    assert_eq!(report.tests.len(), 2);
    assert_eq!(report.test("fault").unwrap().status, TestStatus::Failed(FailureKind::Exception));
    assert_eq!(report.test("load").unwrap().status, TestStatus::Failed(FailureKind::Aborted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequential_suite_continues_after_failure_without_fail_fast() {
    let suite = TestSuite::parse(
        "fault@class = KvFault\nfault@iterations = 1000\nload@class = KvLoad\nload@iterations = 10\n",
    )
    .unwrap();
    let report = run_suite(&suite, &fleet_config(""), silent()).await.unwrap();

    assert_eq!(report.tests[0].test_id.as_str(), "fault");
    assert_eq!(report.tests[1].test_id.as_str(), "load");
    assert_eq!(report.test("load").unwrap().status, TestStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_run_duration_without_iterations_fails_creation() {
    let suite = TestSuite::parse("open@class = KvLoad\n").unwrap();
    let report = run_suite(&suite, &fleet_config(""), silent()).await.unwrap();
    assert_eq!(report.test("open").unwrap().status, TestStatus::Failed(FailureKind::Creation));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_driver_fails_tests_instead_of_hanging() {
    let mut config = fleet_config("");
    config.timeouts.worker_lost_timeout_ms = 300;
    config.driver.insert("failCreate".to_string(), "true".to_string());
    let suite = TestSuite::parse("load@class = KvLoad\nload@iterations = 10\n").unwrap();
    let report = run_suite(&suite, &config, silent()).await.unwrap();
    assert!(matches!(report.test("load").unwrap().status, TestStatus::Failed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_class_is_rejected_before_the_fleet_starts() {
    let suite = TestSuite::parse("x@class = Missing\n").unwrap();
    assert!(matches!(
        run_suite(&suite, &fleet_config(""), silent()).await,
        Err(CliError::TestLoad { .. })
    ));
}
