// simulator-core/src/runtime/in_process.rs
// ============================================================================
// Module: In-Process Fleet
// Description: Coordinator, agents and workers wired over in-memory streams.
// Purpose: Run a complete fleet inside one Tokio runtime.
// Dependencies: tokio, crate::runtime
// ============================================================================

//! ## Overview
//! Every link of the fleet is a [`tokio::io::duplex`] pair, so the full wire
//! protocol is exercised without sockets or child processes. The CLI uses
//! this for local runs and the integration tests use it end to end.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::core::SimulatorAddress;
use crate::core::TestSuite;
use crate::core::WorkerParameters;
use crate::interfaces::BoxedStream;
use crate::interfaces::Driver;
use crate::interfaces::LaunchError;
use crate::interfaces::WorkerLauncher;
use crate::runtime::RuntimeError;
use crate::runtime::agent::run_agent;
use crate::runtime::context::OrchestrationContext;
use crate::runtime::coordinator::Coordinator;
use crate::runtime::definition::TestRegistry;
use crate::runtime::report::RunReport;
use crate::runtime::worker::run_worker;
use crate::telemetry::LogLevel;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Buffer size of each in-memory link direction.
pub const DUPLEX_BUFFER_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Launcher
// ============================================================================

/// Launches workers as Tokio tasks of the current runtime.
pub struct InProcessLauncher<D: Driver> {
    /// Driver shared by every worker.
    driver: Arc<D>,
    /// Test classes available to workers.
    registry: Arc<TestRegistry<D::Instance>>,
    /// Context handed to each worker.
    context: OrchestrationContext,
}

impl<D: Driver> InProcessLauncher<D> {
    /// Creates a launcher.
    #[must_use]
    pub const fn new(
        driver: Arc<D>,
        registry: Arc<TestRegistry<D::Instance>>,
        context: OrchestrationContext,
    ) -> Self {
        Self {
            driver,
            registry,
            context,
        }
    }
}

impl<D: Driver> WorkerLauncher for InProcessLauncher<D> {
    fn launch(
        &self,
        address: SimulatorAddress,
        parameters: &WorkerParameters,
    ) -> Result<BoxedStream, LaunchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| LaunchError::Failed {
            address,
            reason: err.to_string(),
        })?;
        let (agent_end, worker_end) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
        let parameters = parameters.clone();
        let driver = Arc::clone(&self.driver);
        let registry = Arc::clone(&self.registry);
        let context = self.context.clone();
        runtime.spawn(async move {
            let result =
                run_worker(address, parameters, Box::new(worker_end), driver, registry, context.clone())
                    .await;
            if let Err(err) = result {
                context.log("worker_exited", LogLevel::Error, address, err.to_string());
            }
        });
        Ok(Box::new(agent_end))
    }
}

// ============================================================================
// SECTION: Fleet
// ============================================================================

/// A coordinator with its agents running as local tasks.
pub struct InProcessFleet {
    /// Coordinator with every agent attached.
    coordinator: Coordinator,
    /// Agent tasks.
    agents: Vec<(SimulatorAddress, JoinHandle<Result<(), RuntimeError>>)>,
    /// Coordinator context.
    context: OrchestrationContext,
}

impl InProcessFleet {
    /// Starts `settings.agents` agents that launch workers through
    /// `launcher`. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when an agent link cannot be attached.
    pub fn start<L: WorkerLauncher>(
        context: OrchestrationContext,
        launcher: Arc<L>,
    ) -> Result<Self, RuntimeError> {
        let mut coordinator = Coordinator::new(context.clone());
        let mut agents = Vec::new();
        for agent_index in 1..=context.settings().agents {
            let (coordinator_end, agent_end) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
            let address = coordinator.attach_agent(agent_index, Box::new(coordinator_end))?;
            let handle =
                tokio::spawn(run_agent(address, Box::new(agent_end), Arc::clone(&launcher), context.clone()));
            agents.push((address, handle));
        }
        Ok(Self {
            coordinator,
            agents,
            context,
        })
    }

    /// Starts a fleet whose workers use `driver` and `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when an agent link cannot be attached.
    pub fn with_driver<D: Driver>(
        context: OrchestrationContext,
        driver: Arc<D>,
        registry: Arc<TestRegistry<D::Instance>>,
    ) -> Result<Self, RuntimeError> {
        let launcher = Arc::new(InProcessLauncher::new(driver, registry, context.clone()));
        Self::start(context, launcher)
    }

    /// Runs `suite` and waits for every agent to exit.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the coordinator cannot run the suite.
    pub async fn run(self, suite: &TestSuite) -> Result<RunReport, RuntimeError> {
        let Self {
            coordinator,
            agents,
            context,
        } = self;
        let report = coordinator.run(suite).await;
        for (address, handle) in agents {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => context.log("agent_exited", LogLevel::Error, address, err.to_string()),
                Err(err) => context.log("agent_exited", LogLevel::Error, address, err.to_string()),
            }
        }
        report
    }
}
