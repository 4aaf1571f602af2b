// simulator-core/src/runtime/mod.rs
// ============================================================================
// Module: Simulator Runtime
// Description: Coordinator, agent and worker runtimes plus test execution.
// Purpose: Drive tests through their phases across the fleet.
// Dependencies: crate::{core, interfaces, pacing, probe, protocol}
// ============================================================================

//! ## Overview
//! The runtime splits into three layers:
//! - test execution on workers: [`TestDefinition`], [`TestContainer`] and
//!   the timestep [`run_workload`] loop;
//! - the coordinator's phase state machine: [`TestSupervisor`], driven by
//!   the [`Coordinator`] dispatcher together with the [`FleetView`];
//! - process entry points for each tier, with [`InProcessFleet`] wiring all
//!   of them over in-memory links.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod agent;
pub mod context;
pub mod coordinator;
pub mod definition;
pub mod failure;
pub mod fleet;
pub mod in_process;
pub mod report;
pub mod run_loop;
pub mod selector;
pub mod settings;
pub mod stop;
pub mod supervisor;
pub mod test_container;
pub mod worker;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::TestCaseError;
use crate::interfaces::DriverError;
use crate::interfaces::LaunchError;
use crate::probe::ProbeError;
use crate::protocol::ProtocolError;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use agent::run_agent;
pub use context::OrchestrationContext;
pub use coordinator::Coordinator;
pub use definition::HookPoint;
pub use definition::RunPlan;
pub use definition::TestDefinition;
pub use definition::TestEnvironment;
pub use definition::TestFactory;
pub use definition::TestInstance;
pub use definition::TestLoadError;
pub use definition::TestRegistry;
pub use definition::TestSetup;
pub use definition::TimestepOptions;
pub use failure::FailureKind;
pub use failure::FailureRecord;
pub use failure::TestFailure;
pub use failure::ensure;
pub use fleet::FleetView;
pub use in_process::InProcessFleet;
pub use in_process::InProcessLauncher;
pub use report::ProbeSummary;
pub use report::RunReport;
pub use report::TestReport;
pub use run_loop::PhaseControl;
pub use run_loop::ThreadContext;
pub use run_loop::run_workload;
pub use selector::TimestepSelector;
pub use settings::RuntimeSettings;
pub use stop::StopToken;
pub use supervisor::SupervisorCommand;
pub use supervisor::SupervisorError;
pub use supervisor::SupervisorState;
pub use supervisor::TestStatus;
pub use supervisor::TestSupervisor;
pub use test_container::PhaseRejected;
pub use test_container::TestContainer;
pub use worker::run_worker;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors that stop a fleet process.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Routing or link failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Worker launch failure.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// Probe or histogram failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// Phase state machine misuse.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// Test class registration or planning failure.
    #[error(transparent)]
    TestLoad(#[from] TestLoadError),
    /// Test case property failure.
    #[error(transparent)]
    TestCase(#[from] TestCaseError),
    /// The coordinator has no agent attached.
    #[error("no agent attached to the coordinator")]
    NoAgents,
    /// The suite holds more tests than can be addressed.
    #[error("suite holds more tests than can be addressed")]
    TooManyTests,
}
