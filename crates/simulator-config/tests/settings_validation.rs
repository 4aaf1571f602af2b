//! Config semantics tests for simulator-config.
// crates/simulator-config/tests/settings_validation.rs
// =============================================================================
// Module: Config Settings Validation Tests
// Description: Validate section rules and conversion into runtime settings.
// Purpose: Ensure invalid fleets fail closed and valid ones map faithfully.
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

use std::time::Duration;

use simulator_config::ConfigError;
use simulator_config::LogSinkKind;
use simulator_config::SimulatorConfig;
use simulator_core::LogLevel;
use simulator_core::MetronomeKind;

fn invalid_message(content: &str) -> String {
    match SimulatorConfig::parse(content) {
        Err(ConfigError::Invalid(message)) => message,
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn full_config_maps_to_runtime_settings() {
    let config = SimulatorConfig::parse(
        r#"
[fleet]
agents = 2
workers_per_agent = 3
parallel = true
fail_fast = true
verify_enabled = false
run_duration_ms = 1500
seed = 42
worker_start_delay_ms = 20

[timeouts]
request_timeout_ms = 2000
heartbeat_interval_ms = 250
worker_lost_timeout_ms = 1000
reaper_interval_ms = 50

[pacing]
metronome = "busy_spin"
spin_threshold_us = 10
account_for_coordinated_omission = false

[performance]
monitor_interval_ms = 100

[wire]
max_frame_bytes = 65536

[logging]
sink = "none"
min_level = "warn"

[report]
output_dir = "out/reports"

[driver]
capacity = "1024"
"#,
    )
    .unwrap();
    let settings = config.runtime_settings();
    assert_eq!(settings.agents, 2);
    assert_eq!(settings.workers_per_agent, 3);
    assert!(settings.parallel);
    assert!(settings.fail_fast);
    assert!(!settings.verify_enabled);
    assert_eq!(settings.run_duration, Duration::from_millis(1500));
    assert_eq!(settings.seed, 42);
    assert_eq!(settings.worker_start_delay, Duration::from_millis(20));
    assert_eq!(settings.request_timeout, Duration::from_secs(2));
    assert_eq!(settings.heartbeat_interval, Duration::from_millis(250));
    assert_eq!(settings.worker_lost_timeout, Duration::from_secs(1));
    assert_eq!(settings.reaper_interval, Duration::from_millis(50));
    assert_eq!(settings.pacing.metronome, MetronomeKind::BusySpin);
    assert_eq!(settings.pacing.spin_threshold_us, 10);
    assert!(!settings.pacing.account_for_coordinated_omission);
    assert_eq!(settings.performance_interval, Duration::from_millis(100));
    assert_eq!(settings.max_frame_bytes, 65_536);
    assert_eq!(settings.driver_properties.get("capacity").map(String::as_str), Some("1024"));
    assert_eq!(config.logging.sink, LogSinkKind::None);
    assert_eq!(config.logging.min_level, LogLevel::Warn);
    assert_eq!(config.report_dir(), std::path::PathBuf::from("out/reports"));
}

#[test]
fn defaults_match_core_runtime_defaults() {
    let settings = SimulatorConfig::default().runtime_settings();
    assert_eq!(settings, simulator_core::RuntimeSettings::default());
}

#[test]
fn zero_agents_are_rejected() {
    assert!(invalid_message("[fleet]\nagents = 0\n").contains("fleet.agents"));
}

#[test]
fn zero_workers_are_rejected() {
    assert!(invalid_message("[fleet]\nworkers_per_agent = 0\n").contains("fleet.workers_per_agent"));
}

#[test]
fn worker_lost_timeout_must_exceed_heartbeat() {
    let message = invalid_message("[timeouts]\nheartbeat_interval_ms = 500\nworker_lost_timeout_ms = 500\n");
    assert!(message.contains("worker_lost_timeout_ms"));
}

#[test]
fn reaper_interval_is_bounded_by_request_timeout() {
    let message = invalid_message("[timeouts]\nrequest_timeout_ms = 100\nreaper_interval_ms = 200\n");
    assert!(message.contains("reaper_interval_ms"));
}

#[test]
fn frame_limit_is_bounded() {
    assert!(invalid_message("[wire]\nmax_frame_bytes = 16\n").contains("wire.max_frame_bytes"));
}

#[test]
fn file_sink_requires_path() {
    assert!(invalid_message("[logging]\nsink = \"file\"\n").contains("logging.path"));
}

#[test]
fn empty_report_dir_is_rejected() {
    assert!(invalid_message("[report]\noutput_dir = \"  \"\n").contains("report.output_dir"));
}

#[test]
fn unknown_metronome_is_a_parse_error() {
    assert!(matches!(
        SimulatorConfig::parse("[pacing]\nmetronome = \"tickless\"\n"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulator.log");
    let config = SimulatorConfig::parse(&format!(
        "[logging]\nsink = \"file\"\npath = \"{}\"\nmin_level = \"info\"\n",
        path.display()
    ))
    .unwrap();
    let sink = config.logging.open_sink().unwrap();
    sink.record(&simulator_core::LogEvent::new("kept", LogLevel::Info, "C", "hello"));
    sink.record(&simulator_core::LogEvent::new("dropped", LogLevel::Debug, "C", "noise"));
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);
    let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(event["event"], "kept");
    assert_eq!(event["source"], "C");
}
