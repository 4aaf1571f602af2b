// simulator-core/src/runtime/supervisor.rs
// ============================================================================
// Module: Test Supervisor
// Description: Coordinator-side phase state machine of one test.
// Purpose: Enforce fleet-wide phase barriers and failure-driven teardown.
// Dependencies: crate::core, crate::runtime::failure, serde, thiserror
// ============================================================================

//! ## Overview
//! A [`TestSupervisor`] owns no I/O: it consumes acknowledgements, failures
//! and timer signals, and returns the [`SupervisorCommand`]s the coordinator
//! must carry out.
//!
//! Invariants:
//! - A phase starts only after every target of the previous phase has
//!   acknowledged it, been lost, or been rejected.
//! - Global phases target the elected worker only (lowest address).
//! - The first recorded failure is kept; later ones never replace it.
//! - After a failure the remaining non-teardown phases are skipped, and
//!   both teardown phases still run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

use crate::core::ErrorDetail;
use crate::core::SimulatorAddress;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::runtime::failure::FailureKind;
use crate::runtime::failure::FailureRecord;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Lifecycle state of a supervised test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started.
    Pending,
    /// Waiting for acknowledgements of a phase.
    Running(TestPhase),
    /// Finished without failure.
    Completed,
    /// Finished with a recorded failure.
    Failed,
}

/// Final status of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// All phases completed without failure.
    Completed,
    /// The test failed; the kind names the first cause.
    Failed(FailureKind),
}

impl TestStatus {
    /// Returns true for [`TestStatus::Completed`].
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("COMPLETED"),
            Self::Failed(kind) => write!(f, "FAILED({kind})"),
        }
    }
}

impl Serialize for TestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Action the coordinator must perform for a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Send a phase transition to each target.
    StartPhase {
        /// Phase to start.
        phase: TestPhase,
        /// Workers that must acknowledge it.
        targets: Vec<SimulatorAddress>,
    },
    /// Ask the targets to stop their RUN phase.
    StopRun {
        /// Workers still running.
        targets: Vec<SimulatorAddress>,
    },
    /// The test reached a terminal state.
    Finished {
        /// Final status.
        status: TestStatus,
    },
}

/// Events the supervisor rejects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// `start` was called twice.
    #[error("test `{0}` already started")]
    AlreadyStarted(TestId),
    /// An acknowledgement does not match the phase being awaited.
    #[error("unexpected {phase} completion from {worker}")]
    UnexpectedCompletion {
        /// Acknowledging worker.
        worker: SimulatorAddress,
        /// Acknowledged phase.
        phase: TestPhase,
    },
}

// ============================================================================
// SECTION: Supervisor
// ============================================================================

/// Phase state machine of one test across its workers.
#[derive(Debug, Clone)]
pub struct TestSupervisor {
    /// Supervised test.
    test_id: TestId,
    /// Index used in test-level addresses.
    test_index: u32,
    /// Workers still assigned to the test.
    workers: BTreeSet<SimulatorAddress>,
    /// Run the verify phases when no failure is recorded.
    verify_enabled: bool,
    /// Current state.
    state: SupervisorState,
    /// Targets of the current phase that have not acknowledged it.
    awaiting: BTreeSet<SimulatorAddress>,
    /// First recorded failure.
    first_failure: Option<FailureRecord>,
    /// Set once `StopRun` was issued for the current RUN phase.
    run_stopped: bool,
}

impl TestSupervisor {
    /// Creates a supervisor for `workers`.
    #[must_use]
    pub fn new(
        test_id: TestId,
        test_index: u32,
        workers: impl IntoIterator<Item = SimulatorAddress>,
        verify_enabled: bool,
    ) -> Self {
        Self {
            test_id,
            test_index,
            workers: workers.into_iter().collect(),
            verify_enabled,
            state: SupervisorState::Pending,
            awaiting: BTreeSet::new(),
            first_failure: None,
            run_stopped: false,
        }
    }

    /// Returns the test identifier.
    #[must_use]
    pub const fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// Returns the test index.
    #[must_use]
    pub const fn test_index(&self) -> u32 {
        self.test_index
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Returns the workers still assigned to the test.
    #[must_use]
    pub const fn workers(&self) -> &BTreeSet<SimulatorAddress> {
        &self.workers
    }

    /// Returns the workers whose acknowledgement is outstanding.
    #[must_use]
    pub const fn awaiting(&self) -> &BTreeSet<SimulatorAddress> {
        &self.awaiting
    }

    /// Returns the worker that executes global phases.
    #[must_use]
    pub fn elected(&self) -> Option<SimulatorAddress> {
        self.workers.first().copied()
    }

    /// Returns the first recorded failure.
    #[must_use]
    pub const fn first_failure(&self) -> Option<&FailureRecord> {
        self.first_failure.as_ref()
    }

    /// Returns true once the test reached a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, SupervisorState::Completed | SupervisorState::Failed)
    }

    /// Returns the final status once finished.
    #[must_use]
    pub fn status(&self) -> Option<TestStatus> {
        match self.state {
            SupervisorState::Completed => Some(TestStatus::Completed),
            SupervisorState::Failed => Some(TestStatus::Failed(
                self.first_failure.as_ref().map_or(FailureKind::Exception, |record| record.kind),
            )),
            SupervisorState::Pending | SupervisorState::Running(_) => None,
        }
    }

    /// Starts the test. A test with a recorded failure starts at
    /// `LOCAL_TEARDOWN`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyStarted`] when called twice.
    pub fn start(&mut self) -> Result<Vec<SupervisorCommand>, SupervisorError> {
        if self.state != SupervisorState::Pending {
            return Err(SupervisorError::AlreadyStarted(self.test_id.clone()));
        }
        if self.workers.is_empty() {
            self.record_failure(FailureRecord::new(
                self.test_id.clone(),
                None,
                None,
                FailureKind::WorkerLost,
                ErrorDetail::new("no-workers", "no workers assigned to the test"),
            ));
        }
        let first = if self.first_failure.is_some() { TestPhase::LocalTeardown } else { TestPhase::Setup };
        Ok(self.enter(Some(first)))
    }

    /// Records a worker's acknowledgement of `phase`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnexpectedCompletion`] when the phase is
    /// not being awaited from `worker`.
    pub fn on_phase_completed(
        &mut self,
        worker: SimulatorAddress,
        phase: TestPhase,
    ) -> Result<Vec<SupervisorCommand>, SupervisorError> {
        if self.state != SupervisorState::Running(phase) || !self.awaiting.remove(&worker) {
            return Err(SupervisorError::UnexpectedCompletion {
                worker,
                phase,
            });
        }
        Ok(self.advance_if_done())
    }

    /// Records the first failure; later failures are ignored. Returns true
    /// when `record` became the first failure.
    pub fn record_failure(&mut self, record: FailureRecord) -> bool {
        if self.first_failure.is_some() || self.is_finished() {
            return false;
        }
        self.first_failure = Some(record);
        true
    }

    /// Records a failure and stops the RUN phase on the other workers.
    pub fn on_failure(&mut self, record: FailureRecord) -> Vec<SupervisorCommand> {
        let reporter = record.worker;
        if !self.record_failure(record) {
            return Vec::new();
        }
        self.stop_run_except(reporter).into_iter().collect()
    }

    /// Treats a rejected or unanswered transition as that worker's
    /// acknowledgement after recording the failure.
    pub fn on_transition_failed(
        &mut self,
        worker: SimulatorAddress,
        phase: TestPhase,
        record: FailureRecord,
    ) -> Vec<SupervisorCommand> {
        let mut commands = self.on_failure(record);
        if self.state == SupervisorState::Running(phase) && self.awaiting.remove(&worker) {
            commands.extend(self.advance_if_done());
        }
        commands
    }

    /// Removes a lost worker from the test and records the loss.
    pub fn on_worker_lost(&mut self, worker: SimulatorAddress, detail: ErrorDetail) -> Vec<SupervisorCommand> {
        if self.is_finished() || !self.workers.remove(&worker) {
            return Vec::new();
        }
        let phase = match self.state {
            SupervisorState::Running(phase) => Some(phase),
            _ => None,
        };
        let mut commands = self.on_failure(FailureRecord::new(
            self.test_id.clone(),
            phase,
            Some(worker),
            FailureKind::WorkerLost,
            detail,
        ));
        if self.awaiting.remove(&worker) {
            commands.extend(self.advance_if_done());
        }
        commands
    }

    /// Stops the RUN phase when its configured duration elapsed.
    pub fn on_run_deadline(&mut self) -> Vec<SupervisorCommand> {
        if self.state != SupervisorState::Running(TestPhase::Run) {
            return Vec::new();
        }
        self.stop_run_except(None).into_iter().collect()
    }

    /// Aborts the test because another test failed. A test that has not
    /// started finishes immediately.
    pub fn abort(&mut self, reason: &str) -> Vec<SupervisorCommand> {
        if self.is_finished() {
            return Vec::new();
        }
        let phase = match self.state {
            SupervisorState::Running(phase) => Some(phase),
            _ => None,
        };
        let recorded = self.record_failure(FailureRecord::new(
            self.test_id.clone(),
            phase,
            None,
            FailureKind::Aborted,
            ErrorDetail::new("aborted", reason),
        ));
        if self.state == SupervisorState::Pending {
            return self.finish();
        }
        if recorded { self.stop_run_except(None).into_iter().collect() } else { Vec::new() }
    }

    /// Issues `StopRun` once per RUN phase to every awaited worker except
    /// `skip`.
    fn stop_run_except(&mut self, skip: Option<SimulatorAddress>) -> Option<SupervisorCommand> {
        if self.state != SupervisorState::Running(TestPhase::Run) || self.run_stopped {
            return None;
        }
        self.run_stopped = true;
        let targets: Vec<SimulatorAddress> =
            self.awaiting.iter().copied().filter(|worker| Some(*worker) != skip).collect();
        if targets.is_empty() {
            return None;
        }
        Some(SupervisorCommand::StopRun {
            targets,
        })
    }

    /// Advances once the current phase has no outstanding acknowledgements.
    fn advance_if_done(&mut self) -> Vec<SupervisorCommand> {
        match self.state {
            SupervisorState::Running(phase) if self.awaiting.is_empty() => {
                let next = self.next_phase(phase);
                self.enter(next)
            }
            _ => Vec::new(),
        }
    }

    /// Returns the phase following `after`, honoring the verify toggle and
    /// recorded failures.
    fn next_phase(&self, after: TestPhase) -> Option<TestPhase> {
        let mut candidate = after.next();
        while let Some(phase) = candidate {
            let skip = if self.first_failure.is_some() {
                !phase.is_teardown()
            } else {
                phase.is_verify() && !self.verify_enabled
            };
            if !skip {
                return Some(phase);
            }
            candidate = phase.next();
        }
        None
    }

    /// Enters `phase`, skipping phases without targets, or finishes.
    fn enter(&mut self, mut phase: Option<TestPhase>) -> Vec<SupervisorCommand> {
        while let Some(current) = phase {
            let targets: Vec<SimulatorAddress> = if current.is_global() {
                self.elected().into_iter().collect()
            } else {
                self.workers.iter().copied().collect()
            };
            if targets.is_empty() {
                phase = self.next_phase(current);
                continue;
            }
            self.state = SupervisorState::Running(current);
            self.awaiting = targets.iter().copied().collect();
            self.run_stopped = false;
            return vec![SupervisorCommand::StartPhase {
                phase: current,
                targets,
            }];
        }
        self.finish()
    }

    /// Moves to the terminal state.
    fn finish(&mut self) -> Vec<SupervisorCommand> {
        self.awaiting.clear();
        self.state = if self.first_failure.is_some() {
            SupervisorState::Failed
        } else {
            SupervisorState::Completed
        };
        self.status()
            .into_iter()
            .map(|status| SupervisorCommand::Finished {
                status,
            })
            .collect()
    }
}
