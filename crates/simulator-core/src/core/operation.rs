// simulator-core/src/core/operation.rs
// ============================================================================
// Module: Simulator Operations
// Description: Tagged payload variants carried by protocol envelopes.
// Purpose: Define every operation exchanged by coordinator, agents, workers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`SimulatorOperation`] is an internally tagged sum type (`"type"` field).
//! Tags are stable wire identifiers; a peer receiving a tag outside
//! [`SimulatorOperation::KNOWN_TAGS`] skips the operation instead of failing
//! the channel (see the protocol codec).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::error::Error;

use serde::Deserialize;
use serde::Serialize;

use crate::core::address::SimulatorAddress;
use crate::core::identifiers::TestId;
use crate::core::phase::TestPhase;
use crate::core::test_case::TestCase;
use crate::pacing::MetronomeKind;
use crate::telemetry::LogLevel;

// ============================================================================
// SECTION: Operation Payloads
// ============================================================================

/// Pacing defaults handed to a new worker; test properties may override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingDefaults {
    /// Metronome strategy used when a test does not choose one.
    pub metronome: MetronomeKind,
    /// Busy-spin window before a tick for the sleeping metronome, in microseconds.
    pub spin_threshold_us: u64,
    /// Measure latency from the scheduled tick instead of the actual start.
    pub account_for_coordinated_omission: bool,
}

/// Parameters an agent needs to start one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerParameters {
    /// Worker index under the agent.
    pub worker_index: u32,
    /// Base random seed for the worker's execution threads.
    pub seed: u64,
    /// Interval between heartbeats, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Interval between performance snapshots, in milliseconds.
    pub performance_interval_ms: u64,
    /// Pacing defaults.
    pub pacing: PacingDefaults,
    /// Raw properties passed to the driver's typed configuration loader.
    #[serde(default)]
    pub driver_properties: BTreeMap<String, String>,
}

/// Portable description of an error and its cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Short error classification (for example `assertion` or `panic`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    #[serde(default)]
    pub causes: Vec<String>,
}

impl ErrorDetail {
    /// Creates a detail without causes.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Builds a detail from an error, walking its `source()` chain.
    #[must_use]
    pub fn from_error(kind: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: kind.into(),
            message: error.to_string(),
            causes,
        }
    }
}

/// Failure report travelling from a worker to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionReport {
    /// Test the failure belongs to, absent for worker-level failures.
    pub test_id: Option<TestId>,
    /// Phase executing when the failure happened.
    pub phase: Option<TestPhase>,
    /// Worker that observed the failure.
    pub worker: SimulatorAddress,
    /// Error description.
    pub error: ErrorDetail,
    /// True when the worker is about to exit.
    #[serde(default)]
    pub fatal: bool,
}

/// Interval histogram in transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedIntervalHistogram {
    /// Window start, milliseconds since the Unix epoch.
    pub start_ms: u64,
    /// Window end, milliseconds since the Unix epoch.
    pub end_ms: u64,
    /// Operations recorded in the window.
    pub operation_count: u64,
    /// Base64 of the `HdrHistogram` V2 encoding.
    pub histogram: String,
}

/// One probe's interval in a performance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStats {
    /// Whether the probe's operations count toward test throughput.
    pub part_of_throughput: bool,
    /// Interval histogram.
    pub interval: EncodedIntervalHistogram,
}

/// Result carried by a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    /// The request was accepted and handled.
    Success,
    /// The request was handled and failed.
    Failure,
    /// The receiver does not understand the operation.
    UnsupportedOperation,
}

// ============================================================================
// SECTION: Simulator Operation
// ============================================================================

/// Operation payload of a [`crate::SimulatorMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulatorOperation {
    /// Ask an agent to start a worker after `delay_ms`.
    CreateWorker {
        /// Worker start parameters.
        parameters: WorkerParameters,
        /// Delay before launching, in milliseconds.
        delay_ms: u64,
    },
    /// Install a test on the receiving workers under `test_index`.
    CreateTest {
        /// Index used for the test-level address.
        test_index: u32,
        /// Test definition with overrides applied.
        test_case: TestCase,
    },
    /// Start executing `phase` of a test.
    PhaseTransition {
        /// Test identifier.
        test_id: TestId,
        /// Phase to execute.
        phase: TestPhase,
    },
    /// A worker finished executing `phase` (successfully or not).
    PhaseCompleted {
        /// Test identifier.
        test_id: TestId,
        /// Phase that finished.
        phase: TestPhase,
    },
    /// Cooperatively stop the RUN phase of a test.
    StopRun {
        /// Test identifier.
        test_id: TestId,
    },
    /// Failure raised on a worker.
    ExceptionReport(ExceptionReport),
    /// Log line shipped to the coordinator.
    Log {
        /// Log message.
        message: String,
        /// Severity.
        level: LogLevel,
    },
    /// Worker liveness signal.
    Heartbeat {
        /// Milliseconds since the worker started.
        uptime_ms: u64,
    },
    /// Interval latency/throughput snapshot per probe.
    PerformanceStats {
        /// Test identifier.
        test_id: TestId,
        /// Probe intervals keyed by probe name.
        probes: BTreeMap<String, ProbeStats>,
    },
    /// Stop the receiving process and its children.
    Shutdown,
    /// Reply to a request.
    Response {
        /// Handling result.
        result: ResponseResult,
        /// Optional detail (usually the failure reason).
        message: Option<String>,
    },
}

impl SimulatorOperation {
    /// Wire tags this build understands.
    pub const KNOWN_TAGS: [&'static str; 11] = [
        "create_worker",
        "create_test",
        "phase_transition",
        "phase_completed",
        "stop_run",
        "exception_report",
        "log",
        "heartbeat",
        "performance_stats",
        "shutdown",
        "response",
    ];

    /// Returns the stable wire tag of this operation.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::CreateWorker {
                ..
            } => "create_worker",
            Self::CreateTest {
                ..
            } => "create_test",
            Self::PhaseTransition {
                ..
            } => "phase_transition",
            Self::PhaseCompleted {
                ..
            } => "phase_completed",
            Self::StopRun {
                ..
            } => "stop_run",
            Self::ExceptionReport(_) => "exception_report",
            Self::Log {
                ..
            } => "log",
            Self::Heartbeat {
                ..
            } => "heartbeat",
            Self::PerformanceStats {
                ..
            } => "performance_stats",
            Self::Shutdown => "shutdown",
            Self::Response {
                ..
            } => "response",
        }
    }

    /// Returns true when `tag` names a known operation.
    #[must_use]
    pub fn is_known_tag(tag: &str) -> bool {
        Self::KNOWN_TAGS.contains(&tag)
    }
}
