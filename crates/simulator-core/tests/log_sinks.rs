//! Structured log sink tests for simulator-core.
// crates/simulator-core/tests/log_sinks.rs
// =============================================================================
// Module: Log Sink Tests
// Description: Validate JSON-line output and level filtering of log sinks.
// Purpose: Ensure events are written append-only with their context fields.
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

use std::fs;

use serde_json::Value;
use simulator_core::LogEvent;
use simulator_core::LogLevel;
use simulator_core::LogSink;
use simulator_core::SimulatorAddress;
use simulator_core::TestId;
use simulator_core::TestPhase;
use simulator_core::telemetry::FileLogSink;
use simulator_core::telemetry::MemoryLogSink;
use tempfile::TempDir;

#[test]
fn file_sink_appends_filtered_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("simulator.log");
    let sink = FileLogSink::new(&path, LogLevel::Info).unwrap();

    let worker = SimulatorAddress::worker(1, 2);
    sink.record(&LogEvent::new("probe_tick", LogLevel::Debug, worker, "dropped"));
    sink.record(
        &LogEvent::new("phase_started", LogLevel::Info, worker, "starting")
            .with_test(&TestId::new("load"))
            .with_phase(TestPhase::LocalWarmup),
    );
    sink.record(&LogEvent::new("link_failed", LogLevel::Error, SimulatorAddress::coordinator(), "closed"));
    drop(sink);

    let reopened = FileLogSink::new(&path, LogLevel::Info).unwrap();
    reopened.record(&LogEvent::new("run_finished", LogLevel::Warn, "C", "again"));

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = text.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["event"], "phase_started");
    assert_eq!(lines[0]["source"], "C_A1_W2");
    assert_eq!(lines[0]["level"], "info");
    assert_eq!(lines[0]["test_id"], "load");
    assert_eq!(lines[0]["phase"], "LOCAL_WARMUP");
    assert!(lines[1].get("test_id").is_none());
    assert_eq!(lines[2]["event"], "run_finished");
}

#[test]
fn memory_sink_keeps_every_level_in_order() {
    let sink = MemoryLogSink::new();
    sink.record(&LogEvent::new("a", LogLevel::Debug, "C", "first"));
    sink.record(&LogEvent::new("b", LogLevel::Error, "C", "second"));
    sink.record(&LogEvent::new("a", LogLevel::Info, "C", "third"));

    let names: Vec<&str> = sink.events().iter().map(|event| event.event).collect();
    assert_eq!(names, vec!["a", "b", "a"]);
    let repeated = sink.events_named("a");
    assert_eq!(repeated.len(), 2);
    assert_eq!(repeated[1].message, "third");
}
