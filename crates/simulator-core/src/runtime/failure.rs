// simulator-core/src/runtime/failure.rs
// ============================================================================
// Module: Failures
// Description: Worker-side test failures and coordinator-side failure records.
// Purpose: Capture errors with test/phase/worker context for propagation.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Hooks and timesteps return [`TestFailure`]; panics are converted into
//! [`TestFailure::Panicked`] at the point of execution. The worker ships a
//! failure as an [`crate::ExceptionReport`]; the coordinator turns reports,
//! timeouts and lost workers into [`FailureRecord`]s and keeps the first one
//! per test.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::error::Error;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::ErrorDetail;
use crate::core::ExceptionReport;
use crate::core::SimulatorAddress;
use crate::core::TestId;
use crate::core::TestPhase;

// ============================================================================
// SECTION: Test Failure
// ============================================================================

/// Failure raised by test code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestFailure {
    /// An assertion did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// An operation against the system under test failed.
    #[error("{message}")]
    Error {
        /// Error message.
        message: String,
        /// Underlying causes, outermost first.
        causes: Vec<String>,
    },
    /// Test code panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    /// The test is not in a state to run the phase.
    #[error("invalid test state: {0}")]
    State(String),
    /// Recording a measurement failed.
    #[error("probe failure: {0}")]
    Probe(String),
}

impl TestFailure {
    /// Creates an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Creates an operation failure from a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Creates an operation failure from an error and its cause chain.
    #[must_use]
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let detail = ErrorDetail::from_error("error", error);
        Self::Error {
            message: detail.message,
            causes: detail.causes,
        }
    }

    /// Converts a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }

    /// Returns the short classification used in reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Assertion(_) => "assertion",
            Self::Error {
                ..
            } => "error",
            Self::Panicked(_) => "panic",
            Self::State(_) => "state",
            Self::Probe(_) => "probe",
        }
    }

    /// Converts into a portable error detail.
    #[must_use]
    pub fn to_detail(&self) -> ErrorDetail {
        let causes = match self {
            Self::Error {
                causes,
                ..
            } => causes.clone(),
            _ => Vec::new(),
        };
        ErrorDetail {
            kind: self.kind().to_string(),
            message: self.to_string(),
            causes,
        }
    }
}

/// Returns an assertion failure unless `condition` holds.
///
/// # Errors
///
/// Returns [`TestFailure::Assertion`] with `message` when `condition` is false.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), TestFailure> {
    if condition { Ok(()) } else { Err(TestFailure::Assertion(message())) }
}

// ============================================================================
// SECTION: Failure Records
// ============================================================================

/// Classification of a recorded test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Test code reported an error.
    Exception,
    /// A request to a worker timed out or was rejected.
    Timeout,
    /// A worker stopped responding or exited.
    WorkerLost,
    /// Another test failed with fail-fast enabled.
    Aborted,
    /// The test could not be installed.
    Creation,
}

impl FailureKind {
    /// Returns the label used in `FAILED(...)` statuses.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Exception => "exception",
            Self::Timeout => "timeout",
            Self::WorkerLost => "worker-lost",
            Self::Aborted => "aborted",
            Self::Creation => "creation",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure attributed to one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Failed test.
    pub test_id: TestId,
    /// Phase in which the failure happened, when known.
    pub phase: Option<TestPhase>,
    /// Worker that reported or caused the failure, when known.
    pub worker: Option<SimulatorAddress>,
    /// Classification.
    pub kind: FailureKind,
    /// Error description.
    pub detail: ErrorDetail,
}

impl FailureRecord {
    /// Creates a record.
    #[must_use]
    pub const fn new(
        test_id: TestId,
        phase: Option<TestPhase>,
        worker: Option<SimulatorAddress>,
        kind: FailureKind,
        detail: ErrorDetail,
    ) -> Self {
        Self {
            test_id,
            phase,
            worker,
            kind,
            detail,
        }
    }

    /// Builds a record from a worker's exception report for `test_id`.
    #[must_use]
    pub fn from_report(test_id: TestId, report: &ExceptionReport) -> Self {
        let kind = if report.fatal { FailureKind::WorkerLost } else { FailureKind::Exception };
        Self::new(test_id, report.phase, Some(report.worker), kind, report.error.clone())
    }
}
