//! Suite loading and check tests for simulator-cli.
// crates/simulator-cli/tests/suite_commands.rs
// =============================================================================
// Module: Suite Command Tests
// Description: Validate suite loading, overrides, checks and report output.
// Purpose: Ensure bad input fails closed before any fleet is started.
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

use std::collections::BTreeMap;
use std::fs;

use simulator_cli::CliError;
use simulator_cli::commands::MAX_SUITE_FILE_SIZE;
use simulator_cli::commands::REPORT_FILE_NAME;
use simulator_cli::commands::check_suite;
use simulator_cli::commands::load_suite;
use simulator_cli::commands::parse_overrides;
use simulator_cli::commands::write_report;
use simulator_config::SimulatorConfig;
use simulator_core::TestSuite;
use tempfile::TempDir;

fn write_suite(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("suite.properties");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn overrides_parse_key_value_pairs() {
    let overrides =
        parse_overrides(&["threadCount = 4".to_string(), "keyDomain=10".to_string()]).unwrap();
    assert_eq!(overrides.get("threadCount").map(String::as_str), Some("4"));
    assert_eq!(overrides.get("keyDomain").map(String::as_str), Some("10"));
}

#[test]
fn overrides_reject_missing_separator_and_empty_key() {
    assert!(matches!(parse_overrides(&["threadCount".to_string()]), Err(CliError::Override(_))));
    assert!(matches!(parse_overrides(&[" =4".to_string()]), Err(CliError::Override(_))));
}

#[test]
fn load_suite_applies_overrides_to_every_test() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(&dir, "a@class = KvLoad\nb@class = KvLoad\nb@threadCount = 2\n");
    let mut overrides = BTreeMap::new();
    overrides.insert("threadCount".to_string(), "3".to_string());
    let suite = load_suite(&path, &overrides).unwrap();
    assert_eq!(suite.len(), 2);
    for test in suite.tests() {
        assert_eq!(test.property("threadCount"), Some("3"));
    }
}

#[test]
fn load_suite_rejects_missing_and_oversized_files() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.properties");
    assert!(matches!(load_suite(&missing, &BTreeMap::new()), Err(CliError::SuiteRead { .. })));

    let big = "#".repeat(MAX_SUITE_FILE_SIZE + 1);
    let path = write_suite(&dir, &big);
    match load_suite(&path, &BTreeMap::new()) {
        Err(CliError::SuiteRead {
            reason, ..
        }) => assert!(reason.contains("size limit")),
        other => panic!("expected size error, got {other:?}"),
    }
}

#[test]
fn load_suite_rejects_test_without_class() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(&dir, "a@threadCount = 2\n");
    assert!(matches!(load_suite(&path, &BTreeMap::new()), Err(CliError::Suite(_))));
}

#[test]
fn check_suite_reports_threads_and_groups() {
    let suite = TestSuite::parse("load@class = KvLoad\nload@threadCount = 3\nfault@class = KvFault\n").unwrap();
    let checked = check_suite(&suite, &SimulatorConfig::default()).unwrap();
    assert_eq!(checked.len(), 2);
    assert_eq!(checked[0].test_id, "load");
    assert_eq!(checked[0].class, "KvLoad");
    assert_eq!(checked[0].threads, 3);
    assert_eq!(checked[0].groups, vec![String::new()]);
    assert_eq!(checked[1].class, "KvFault");
    assert_eq!(checked[1].threads, 1);
}

#[test]
fn check_suite_rejects_unknown_class_and_bad_properties() {
    let unknown = TestSuite::parse("x@class = Missing\n").unwrap();
    match check_suite(&unknown, &SimulatorConfig::default()) {
        Err(CliError::TestLoad {
            test_id, ..
        }) => assert_eq!(test_id, "x"),
        other => panic!("expected load error, got {other:?}"),
    }

    let conflicting =
        TestSuite::parse("y@class = KvLoad\ny@ratePerSecond = 10\ny@interval = 5ms\n").unwrap();
    assert!(matches!(
        check_suite(&conflicting, &SimulatorConfig::default()),
        Err(CliError::TestLoad { .. })
    ));
}

#[test]
fn write_report_creates_directory_and_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested").join("reports");
    let path = write_report(&target, b"{\"tests\":[]}").unwrap();
    assert_eq!(path, target.join(REPORT_FILE_NAME));
    assert_eq!(fs::read(&path).unwrap(), b"{\"tests\":[]}");
}
