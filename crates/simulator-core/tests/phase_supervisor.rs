//! Phase barrier and failure propagation tests for simulator-core.
// crates/simulator-core/tests/phase_supervisor.rs
// =============================================================================
// Module: Phase Supervisor Tests
// Description: Drive the test supervisor through barriers, failures and loss.
// Purpose: Ensure phases advance fleet-wide and teardown always runs.
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

use simulator_core::ErrorDetail;
use simulator_core::FailureKind;
use simulator_core::FailureRecord;
use simulator_core::SimulatorAddress;
use simulator_core::TestId;
use simulator_core::TestPhase;
use simulator_core::TestStatus;
use simulator_core::runtime::SupervisorCommand;
use simulator_core::runtime::SupervisorError;
use simulator_core::runtime::SupervisorState;
use simulator_core::runtime::TestSupervisor;

const W1: SimulatorAddress = SimulatorAddress::worker(1, 1);
const W2: SimulatorAddress = SimulatorAddress::worker(1, 2);
const W3: SimulatorAddress = SimulatorAddress::worker(2, 1);

fn supervisor(verify_enabled: bool) -> TestSupervisor {
    TestSupervisor::new(TestId::new("t"), 1, [W3, W2, W1], verify_enabled)
}

fn started_phase(commands: &[SupervisorCommand]) -> Option<(TestPhase, Vec<SimulatorAddress>)> {
    commands.iter().find_map(|command| match command {
        SupervisorCommand::StartPhase {
            phase,
            targets,
        } => Some((*phase, targets.clone())),
        _ => None,
    })
}

fn exception(worker: SimulatorAddress, phase: TestPhase) -> FailureRecord {
    FailureRecord::new(
        TestId::new("t"),
        Some(phase),
        Some(worker),
        FailureKind::Exception,
        ErrorDetail::new("assertion", format!("{phase} failed on {worker}")),
    )
}

/// Acknowledges the current phase on every awaited worker and returns the
/// commands produced by the last acknowledgement.
fn ack_all(supervisor: &mut TestSupervisor, phase: TestPhase) -> Vec<SupervisorCommand> {
    let awaiting: Vec<SimulatorAddress> = supervisor.awaiting().iter().copied().collect();
    let mut last = Vec::new();
    for worker in awaiting {
        last = supervisor.on_phase_completed(worker, phase).unwrap();
    }
    last
}

#[test]
fn phases_advance_only_after_every_worker_acknowledges() {
    let mut supervisor = supervisor(true);
    let commands = supervisor.start().unwrap();
    assert_eq!(started_phase(&commands), Some((TestPhase::Setup, vec![W1, W2, W3])));

    assert!(supervisor.on_phase_completed(W1, TestPhase::Setup).unwrap().is_empty());
    assert!(supervisor.on_phase_completed(W3, TestPhase::Setup).unwrap().is_empty());
    assert_eq!(supervisor.state(), SupervisorState::Running(TestPhase::Setup));
    let commands = supervisor.on_phase_completed(W2, TestPhase::Setup).unwrap();
    assert_eq!(started_phase(&commands), Some((TestPhase::LocalWarmup, vec![W1, W2, W3])));
}

#[test]
fn full_lifecycle_visits_every_phase_in_order() {
    let mut supervisor = supervisor(true);
    let mut commands = supervisor.start().unwrap();
    let mut visited = Vec::new();
    while let Some((phase, targets)) = started_phase(&commands) {
        if phase.is_global() {
            assert_eq!(targets, vec![W1]);
        }
        visited.push(phase);
        commands = ack_all(&mut supervisor, phase);
    }
    assert_eq!(visited, TestPhase::ALL.to_vec());
    assert_eq!(commands, vec![SupervisorCommand::Finished {
        status: TestStatus::Completed
    }]);
    assert_eq!(supervisor.status(), Some(TestStatus::Completed));
}

#[test]
fn verify_phases_are_skipped_when_disabled() {
    let mut supervisor = supervisor(false);
    let mut commands = supervisor.start().unwrap();
    let mut visited = Vec::new();
    while let Some((phase, _)) = started_phase(&commands) {
        visited.push(phase);
        commands = ack_all(&mut supervisor, phase);
    }
    assert!(!visited.contains(&TestPhase::LocalVerify));
    assert!(!visited.contains(&TestPhase::GlobalVerify));
    assert!(visited.contains(&TestPhase::LocalTeardown));
}

#[test]
fn run_failure_stops_other_workers_and_jumps_to_teardown() {
    let mut supervisor = supervisor(true);
    let mut commands = supervisor.start().unwrap();
    while let Some((phase, _)) = started_phase(&commands) {
        if phase == TestPhase::Run {
            break;
        }
        commands = ack_all(&mut supervisor, phase);
    }
    assert_eq!(supervisor.state(), SupervisorState::Running(TestPhase::Run));

    let commands = supervisor.on_failure(exception(W2, TestPhase::Run));
    assert_eq!(commands, vec![SupervisorCommand::StopRun {
        targets: vec![W1, W3]
    }]);
    assert!(supervisor.on_failure(exception(W1, TestPhase::Run)).is_empty());

    assert!(supervisor.on_phase_completed(W1, TestPhase::Run).unwrap().is_empty());
    assert!(supervisor.on_phase_completed(W2, TestPhase::Run).unwrap().is_empty());
    let commands = supervisor.on_phase_completed(W3, TestPhase::Run).unwrap();
    assert_eq!(started_phase(&commands), Some((TestPhase::LocalTeardown, vec![W1, W2, W3])));

    let commands = ack_all(&mut supervisor, TestPhase::LocalTeardown);
    assert_eq!(started_phase(&commands), Some((TestPhase::GlobalTeardown, vec![W1])));
    let commands = ack_all(&mut supervisor, TestPhase::GlobalTeardown);
    assert_eq!(commands, vec![SupervisorCommand::Finished {
        status: TestStatus::Failed(FailureKind::Exception)
    }]);
    let first = supervisor.first_failure().unwrap();
    assert_eq!(first.worker, Some(W2));
    assert_eq!(first.phase, Some(TestPhase::Run));
}

#[test]
fn lost_worker_releases_the_barrier_and_global_phases_move_on() {
    let mut supervisor = supervisor(true);
    supervisor.start().unwrap();
    supervisor.on_phase_completed(W2, TestPhase::Setup).unwrap();
    supervisor.on_phase_completed(W3, TestPhase::Setup).unwrap();

    let commands = supervisor.on_worker_lost(W1, ErrorDetail::new("worker-lost", "link closed"));
    assert_eq!(started_phase(&commands), Some((TestPhase::LocalTeardown, vec![W2, W3])));
    assert_eq!(supervisor.elected(), Some(W2));
    assert!(supervisor.on_worker_lost(W1, ErrorDetail::new("worker-lost", "again")).is_empty());

    let commands = ack_all(&mut supervisor, TestPhase::LocalTeardown);
    assert_eq!(started_phase(&commands), Some((TestPhase::GlobalTeardown, vec![W2])));
    ack_all(&mut supervisor, TestPhase::GlobalTeardown);
    assert_eq!(supervisor.status(), Some(TestStatus::Failed(FailureKind::WorkerLost)));
}

#[test]
fn rejected_transition_counts_as_acknowledgement() {
    let mut supervisor = supervisor(true);
    supervisor.start().unwrap();
    supervisor.on_phase_completed(W1, TestPhase::Setup).unwrap();
    supervisor.on_phase_completed(W2, TestPhase::Setup).unwrap();
    let record = FailureRecord::new(
        TestId::new("t"),
        Some(TestPhase::Setup),
        Some(W3),
        FailureKind::Timeout,
        ErrorDetail::new("timeout", "no reply"),
    );
    let commands = supervisor.on_transition_failed(W3, TestPhase::Setup, record);
    assert_eq!(started_phase(&commands), Some((TestPhase::LocalTeardown, vec![W1, W2, W3])));
}

#[test]
fn run_deadline_stops_every_worker_once() {
    let mut supervisor = TestSupervisor::new(TestId::new("t"), 1, [W1, W2], true);
    let mut commands = supervisor.start().unwrap();
    while let Some((phase, _)) = started_phase(&commands) {
        if phase == TestPhase::Run {
            break;
        }
        commands = ack_all(&mut supervisor, phase);
    }
    assert_eq!(supervisor.on_run_deadline(), vec![SupervisorCommand::StopRun {
        targets: vec![W1, W2]
    }]);
    assert!(supervisor.on_run_deadline().is_empty());
    let commands = ack_all(&mut supervisor, TestPhase::Run);
    assert_eq!(started_phase(&commands).map(|(phase, _)| phase), Some(TestPhase::LocalVerify));
}

#[test]
fn unexpected_and_duplicate_acknowledgements_are_rejected() {
    let mut supervisor = supervisor(true);
    assert!(matches!(
        supervisor.on_phase_completed(W1, TestPhase::Setup),
        Err(SupervisorError::UnexpectedCompletion { .. })
    ));
    supervisor.start().unwrap();
    assert!(matches!(supervisor.start(), Err(SupervisorError::AlreadyStarted(_))));
    supervisor.on_phase_completed(W1, TestPhase::Setup).unwrap();
    assert!(supervisor.on_phase_completed(W1, TestPhase::Setup).is_err());
    assert!(supervisor.on_phase_completed(W2, TestPhase::Run).is_err());
}

#[test]
fn pending_test_aborts_immediately_and_empty_test_fails() {
    let mut pending = supervisor(true);
    let commands = pending.abort("other test failed");
    assert_eq!(commands, vec![SupervisorCommand::Finished {
        status: TestStatus::Failed(FailureKind::Aborted)
    }]);

    let mut empty = TestSupervisor::new(TestId::new("e"), 2, Vec::new(), true);
    let commands = empty.start().unwrap();
    assert_eq!(commands, vec![SupervisorCommand::Finished {
        status: TestStatus::Failed(FailureKind::WorkerLost)
    }]);
}
