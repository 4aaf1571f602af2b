// simulator-cli/src/commands.rs
// ============================================================================
// Module: CLI Commands
// Description: Suite loading, local fleet runs and report output.
// Purpose: Implement the `simulator` subcommands independently of argv.
// Dependencies: serde, serde_json, simulator-config, simulator-core, thiserror
// ============================================================================

//! ## Overview
//! Commands are plain functions over typed inputs so they can be tested
//! without a process boundary. `main.rs` only parses arguments and writes
//! output streams.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use simulator_config::ConfigError;
use simulator_config::SimulatorConfig;
use simulator_core::InProcessFleet;
use simulator_core::OrchestrationContext;
use simulator_core::RunReport;
use simulator_core::RuntimeError;
use simulator_core::SharedLogSink;
use simulator_core::TestCaseError;
use simulator_core::TestSuite;
use simulator_core::runtime::TestLoadError;
use thiserror::Error;

use crate::builtin::KvDriver;
use crate::builtin::builtin_registry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum test suite file size in bytes.
pub const MAX_SUITE_FILE_SIZE: usize = 1024 * 1024;
/// File name of the run report.
pub const REPORT_FILE_NAME: &str = "report.json";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The suite file could not be read.
    #[error("suite file {path}: {reason}")]
    SuiteRead {
        /// Suite path.
        path: PathBuf,
        /// Failure reason.
        reason: String,
    },
    /// The suite text is invalid.
    #[error("invalid suite: {0}")]
    Suite(#[from] TestCaseError),
    /// A test does not match any builtin class or has invalid properties.
    #[error("test `{test_id}`: {source}")]
    TestLoad {
        /// Offending test.
        test_id: String,
        /// Underlying error.
        source: TestLoadError,
    },
    /// A `--property` argument is malformed.
    #[error("property override `{0}` must be KEY=VALUE")]
    Override(String),
    /// The fleet failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// A runtime could not be built or the report could not be written.
    #[error("output error: {0}")]
    Output(String),
}

// ============================================================================
// SECTION: Suite Loading
// ============================================================================

/// Reads and parses a suite file, then applies property overrides.
///
/// # Errors
///
/// Returns [`CliError`] when the file is unreadable, oversized or invalid.
pub fn load_suite(path: &Path, overrides: &BTreeMap<String, String>) -> Result<TestSuite, CliError> {
    let read_error = |reason: String| CliError::SuiteRead {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|err| read_error(err.to_string()))?;
    let limit = u64::try_from(MAX_SUITE_FILE_SIZE).unwrap_or(u64::MAX);
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(|err| read_error(err.to_string()))?;
    if bytes.len() > MAX_SUITE_FILE_SIZE {
        return Err(read_error("suite file exceeds size limit".to_string()));
    }
    let text = std::str::from_utf8(&bytes).map_err(|_| read_error("suite file must be utf-8".to_string()))?;
    let suite = TestSuite::parse(text)?;
    Ok(if overrides.is_empty() { suite } else { suite.with_overrides(overrides) })
}

/// Parses `KEY=VALUE` override arguments.
///
/// # Errors
///
/// Returns [`CliError::Override`] for arguments without `=` or with an empty key.
pub fn parse_overrides(arguments: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    let mut overrides = BTreeMap::new();
    for argument in arguments {
        let Some((key, value)) = argument.split_once('=') else {
            return Err(CliError::Override(argument.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Override(argument.clone()));
        }
        overrides.insert(key.to_string(), value.trim().to_string());
    }
    Ok(overrides)
}

// ============================================================================
// SECTION: Suite Check
// ============================================================================

/// Validation summary of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckedTest {
    /// Test identifier.
    pub test_id: String,
    /// Test class.
    pub class: String,
    /// Threads per worker.
    pub threads: u32,
    /// Execution groups.
    pub groups: Vec<String>,
}

/// Validates every test of `suite` against the builtin classes.
///
/// # Errors
///
/// Returns [`CliError::TestLoad`] for the first invalid test.
pub fn check_suite(suite: &TestSuite, config: &SimulatorConfig) -> Result<Vec<CheckedTest>, CliError> {
    let registry = builtin_registry().map_err(|source| CliError::TestLoad {
        test_id: String::new(),
        source,
    })?;
    let defaults = config.runtime_settings().pacing;
    let mut checked = Vec::with_capacity(suite.len());
    for test_case in suite.tests() {
        let load_error = |source: TestLoadError| CliError::TestLoad {
            test_id: test_case.id().to_string(),
            source,
        };
        let plan = registry.validate(test_case, &defaults).map_err(load_error)?;
        let class = test_case.class_name().map_err(|err| load_error(err.into()))?;
        checked.push(CheckedTest {
            test_id: test_case.id().to_string(),
            class: class.to_string(),
            threads: plan.thread_count(),
            groups: plan.groups.iter().map(|group| group.name.clone()).collect(),
        });
    }
    Ok(checked)
}

// ============================================================================
// SECTION: Run
// ============================================================================

/// Runs `suite` on an in-process fleet against the builtin target.
///
/// # Errors
///
/// Returns [`CliError`] when a test is invalid or the fleet fails.
pub async fn run_suite(
    suite: &TestSuite,
    config: &SimulatorConfig,
    log: SharedLogSink,
) -> Result<RunReport, CliError> {
    check_suite(suite, config)?;
    let registry = builtin_registry().map_err(|source| CliError::TestLoad {
        test_id: String::new(),
        source,
    })?;
    let context = OrchestrationContext::new(config.runtime_settings(), log);
    let fleet = InProcessFleet::with_driver(context, Arc::new(KvDriver), Arc::new(registry))?;
    Ok(fleet.run(suite).await?)
}

/// Serializes the report as pretty JSON.
///
/// # Errors
///
/// Returns [`CliError::Output`] when serialization fails.
pub fn report_json(report: &RunReport) -> Result<Vec<u8>, CliError> {
    serde_json::to_vec_pretty(report).map_err(|err| CliError::Output(err.to_string()))
}

/// Writes `report.json` into `directory` and returns its path.
///
/// # Errors
///
/// Returns [`CliError::Output`] when the directory or file cannot be written.
pub fn write_report(directory: &Path, payload: &[u8]) -> Result<PathBuf, CliError> {
    fs::create_dir_all(directory).map_err(|err| CliError::Output(format!("{}: {err}", directory.display())))?;
    let path = directory.join(REPORT_FILE_NAME);
    fs::write(&path, payload).map_err(|err| CliError::Output(format!("{}: {err}", path.display())))?;
    Ok(path)
}
