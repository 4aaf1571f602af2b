// simulator-config/src/config.rs
// ============================================================================
// Module: Simulator Configuration
// Description: Configuration loading and validation for simulator runs.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: simulator-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional and falls back to the defaults of
//! [`RuntimeSettings`]; unknown keys are rejected. Durations are written as
//! whole milliseconds (`*_ms`) or microseconds (`*_us`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use simulator_core::LogLevel;
use simulator_core::MetronomeKind;
use simulator_core::PacingDefaults;
use simulator_core::RuntimeSettings;
use simulator_core::SharedLogSink;
use simulator_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use simulator_core::runtime::settings::duration_ms;
use simulator_core::telemetry::FileLogSink;
use simulator_core::telemetry::NoopLogSink;
use simulator_core::telemetry::StderrLogSink;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "simulator.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SIMULATOR_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of agents.
pub const MAX_AGENTS: u32 = 1024;
/// Maximum number of workers per agent.
pub const MAX_WORKERS_PER_AGENT: u32 = 1024;
/// Maximum sleeping-metronome spin window in microseconds.
pub(crate) const MAX_SPIN_THRESHOLD_US: u64 = 1_000_000;
/// Smallest accepted frame limit.
pub const MIN_FRAME_BYTES: usize = 1024;
/// Largest accepted frame limit.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;
/// Maximum number of driver properties.
pub(crate) const MAX_DRIVER_PROPERTIES: usize = 256;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Root configuration of a simulator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Fleet shape and run policy.
    pub fleet: FleetConfig,
    /// Request and liveness timeouts.
    pub timeouts: TimeoutConfig,
    /// Pacing defaults.
    pub pacing: PacingConfig,
    /// Performance monitoring.
    pub performance: PerformanceConfig,
    /// Wire protocol limits.
    pub wire: WireConfig,
    /// Structured log sink.
    pub logging: LoggingConfig,
    /// Report output.
    pub report: ReportConfig,
    /// Raw properties passed to the driver on every worker.
    pub driver: BTreeMap<String, String>,
}

/// `[fleet]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    /// Number of agents.
    pub agents: u32,
    /// Workers started by each agent.
    pub workers_per_agent: u32,
    /// Run the suite's tests together instead of one after another.
    pub parallel: bool,
    /// Abort every other test once one fails.
    pub fail_fast: bool,
    /// Run the verify phases.
    pub verify_enabled: bool,
    /// RUN duration in milliseconds; zero defers to each test's `iterations`.
    pub run_duration_ms: u64,
    /// Base random seed.
    pub seed: u64,
    /// Delay between consecutive worker launches on an agent.
    pub worker_start_delay_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let settings = RuntimeSettings::default();
        Self {
            agents: settings.agents,
            workers_per_agent: settings.workers_per_agent,
            parallel: settings.parallel,
            fail_fast: settings.fail_fast,
            verify_enabled: settings.verify_enabled,
            run_duration_ms: duration_ms(settings.run_duration),
            seed: settings.seed,
            worker_start_delay_ms: duration_ms(settings.worker_start_delay),
        }
    }
}

impl FleetConfig {
    /// Validates fleet bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agents == 0 || self.agents > MAX_AGENTS {
            return Err(ConfigError::Invalid(format!("fleet.agents must be between 1 and {MAX_AGENTS}")));
        }
        if self.workers_per_agent == 0 || self.workers_per_agent > MAX_WORKERS_PER_AGENT {
            return Err(ConfigError::Invalid(format!(
                "fleet.workers_per_agent must be between 1 and {MAX_WORKERS_PER_AGENT}"
            )));
        }
        Ok(())
    }
}

/// `[timeouts]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Deadline for every request/response exchange.
    pub request_timeout_ms: u64,
    /// Interval between worker heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a worker is declared lost.
    pub worker_lost_timeout_ms: u64,
    /// Interval at which expired pending requests are reaped.
    pub reaper_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let settings = RuntimeSettings::default();
        Self {
            request_timeout_ms: duration_ms(settings.request_timeout),
            heartbeat_interval_ms: duration_ms(settings.heartbeat_interval),
            worker_lost_timeout_ms: duration_ms(settings.worker_lost_timeout),
            reaper_interval_ms: duration_ms(settings.reaper_interval),
        }
    }
}

impl TimeoutConfig {
    /// Validates timeout relations.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts.request_timeout_ms must be greater than zero".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.worker_lost_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(
                "timeouts.worker_lost_timeout_ms must exceed timeouts.heartbeat_interval_ms".to_string(),
            ));
        }
        if self.reaper_interval_ms == 0 || self.reaper_interval_ms > self.request_timeout_ms {
            return Err(ConfigError::Invalid(
                "timeouts.reaper_interval_ms must be between 1 and timeouts.request_timeout_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[pacing]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingConfig {
    /// Metronome used when a test does not choose one.
    pub metronome: MetronomeKind,
    /// Busy-spin window of the sleeping metronome in microseconds.
    pub spin_threshold_us: u64,
    /// Measure latency from the scheduled tick.
    pub account_for_coordinated_omission: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        let pacing = RuntimeSettings::default().pacing;
        Self {
            metronome: pacing.metronome,
            spin_threshold_us: pacing.spin_threshold_us,
            account_for_coordinated_omission: pacing.account_for_coordinated_omission,
        }
    }
}

impl PacingConfig {
    /// Validates pacing bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.spin_threshold_us > MAX_SPIN_THRESHOLD_US {
            return Err(ConfigError::Invalid(format!(
                "pacing.spin_threshold_us must not exceed {MAX_SPIN_THRESHOLD_US}"
            )));
        }
        Ok(())
    }
}

/// `[performance]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceConfig {
    /// Interval between worker performance snapshots.
    pub monitor_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: duration_ms(RuntimeSettings::default().performance_interval),
        }
    }
}

/// `[wire]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WireConfig {
    /// Largest accepted frame payload.
    pub max_frame_bytes: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Log sink selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `logging.path`.
    File,
    /// Discard every event.
    None,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Sink kind.
    pub sink: LogSinkKind,
    /// Log file path for the file sink.
    pub path: Option<String>,
    /// Minimum level written.
    pub min_level: LogLevel,
}

impl LoggingConfig {
    /// Validates sink settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (LogSinkKind::File, None) => {
                Err(ConfigError::Invalid("logging.path is required for the file sink".to_string()))
            }
            (_, Some(path)) => validate_path_string("logging.path", path),
            _ => Ok(()),
        }
    }

    /// Opens the configured sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the log file cannot be opened.
    pub fn open_sink(&self) -> Result<SharedLogSink, ConfigError> {
        match (self.sink, &self.path) {
            (LogSinkKind::Stderr, _) => Ok(Arc::new(StderrLogSink::new(self.min_level))),
            (LogSinkKind::None, _) => Ok(Arc::new(NoopLogSink)),
            (LogSinkKind::File, Some(path)) => {
                let sink = FileLogSink::new(Path::new(path.trim()), self.min_level)
                    .map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
            (LogSinkKind::File, None) => {
                Err(ConfigError::Invalid("logging.path is required for the file sink".to_string()))
            }
        }
    }
}

/// `[report]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Directory receiving `report.json`.
    pub output_dir: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "simulator-report".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Loading & Validation
// ============================================================================

impl SimulatorConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// explicit path, else `SIMULATOR_CONFIG`, else `simulator.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::parse(content)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fleet.validate()?;
        self.timeouts.validate()?;
        self.pacing.validate()?;
        if self.performance.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "performance.monitor_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(MIN_FRAME_BYTES..=MAX_FRAME_BYTES).contains(&self.wire.max_frame_bytes) {
            return Err(ConfigError::Invalid(format!(
                "wire.max_frame_bytes must be between {MIN_FRAME_BYTES} and {MAX_FRAME_BYTES}"
            )));
        }
        self.logging.validate()?;
        validate_path_string("report.output_dir", &self.report.output_dir)?;
        if self.driver.len() > MAX_DRIVER_PROPERTIES {
            return Err(ConfigError::Invalid(format!(
                "driver accepts at most {MAX_DRIVER_PROPERTIES} properties"
            )));
        }
        if self.driver.keys().any(|key| key.trim().is_empty()) {
            return Err(ConfigError::Invalid("driver property keys must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Converts into core runtime settings.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            agents: self.fleet.agents,
            workers_per_agent: self.fleet.workers_per_agent,
            parallel: self.fleet.parallel,
            fail_fast: self.fleet.fail_fast,
            verify_enabled: self.fleet.verify_enabled,
            run_duration: Duration::from_millis(self.fleet.run_duration_ms),
            seed: self.fleet.seed,
            request_timeout: Duration::from_millis(self.timeouts.request_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.timeouts.heartbeat_interval_ms),
            worker_lost_timeout: Duration::from_millis(self.timeouts.worker_lost_timeout_ms),
            reaper_interval: Duration::from_millis(self.timeouts.reaper_interval_ms),
            worker_start_delay: Duration::from_millis(self.fleet.worker_start_delay_ms),
            pacing: PacingDefaults {
                metronome: self.pacing.metronome,
                spin_threshold_us: self.pacing.spin_threshold_us,
                account_for_coordinated_omission: self.pacing.account_for_coordinated_omission,
            },
            performance_interval: Duration::from_millis(self.performance.monitor_interval_ms),
            max_frame_bytes: self.wire.max_frame_bytes,
            driver_properties: self.driver.clone(),
        }
    }

    /// Returns the report output directory.
    #[must_use]
    pub fn report_dir(&self) -> PathBuf {
        PathBuf::from(self.report.output_dir.trim())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}
