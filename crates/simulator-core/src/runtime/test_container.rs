// simulator-core/src/runtime/test_container.rs
// ============================================================================
// Module: Test Container
// Description: Worker-side holder of one installed test.
// Purpose: Guard phase execution, hold the RUN stop token and the probes.
// Dependencies: crate::runtime, thiserror
// ============================================================================

//! ## Overview
//! A [`TestContainer`] executes at most one phase at a time. Starting a phase
//! while another is executing is rejected. A RUN phase gets a fresh
//! [`StopToken`] only once the previous RUN has finished, so a `StopRun`
//! that overtakes its RUN transition is latched and honored when that RUN
//! begins, and never leaks into a later run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::core::SimulatorAddress;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::probe::ProbeRegistry;
use crate::runtime::definition::TestInstance;
use crate::runtime::failure::TestFailure;
use crate::runtime::run_loop::PhaseControl;
use crate::runtime::stop::StopToken;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reasons a phase cannot start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseRejected {
    /// Another phase of the test is still executing.
    #[error("test `{test_id}` is busy executing {running}")]
    Busy {
        /// Test identifier.
        test_id: TestId,
        /// Phase currently executing.
        running: TestPhase,
    },
    /// Internal lock poisoned.
    #[error("test container lock poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Container
// ============================================================================

/// Stop token of the pending or current RUN phase.
#[derive(Debug, Default)]
struct RunStop {
    /// Token handed to the RUN threads.
    token: StopToken,
    /// Set once the RUN that owned `token` has finished.
    finished: bool,
}

/// One test installed on a worker.
pub struct TestContainer {
    /// Test identifier.
    test_id: TestId,
    /// Test-level address on this worker.
    address: SimulatorAddress,
    /// Installed test.
    instance: Box<dyn TestInstance>,
    /// Set while a phase is executing.
    busy: AtomicBool,
    /// Phase currently executing.
    current: Mutex<Option<TestPhase>>,
    /// Stop token of the pending or current RUN phase.
    run_stop: Mutex<RunStop>,
    /// Probes registered by RUN threads.
    probes: Arc<ProbeRegistry>,
}

impl TestContainer {
    /// Wraps an installed test.
    #[must_use]
    pub fn new(address: SimulatorAddress, instance: Box<dyn TestInstance>) -> Self {
        Self {
            test_id: instance.test_id().clone(),
            address,
            instance,
            busy: AtomicBool::new(false),
            current: Mutex::new(None),
            run_stop: Mutex::new(RunStop::default()),
            probes: Arc::new(ProbeRegistry::new()),
        }
    }

    /// Returns the test identifier.
    #[must_use]
    pub const fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// Returns the test-level address.
    #[must_use]
    pub const fn address(&self) -> SimulatorAddress {
        self.address
    }

    /// Returns the probe registry.
    #[must_use]
    pub const fn probes(&self) -> &Arc<ProbeRegistry> {
        &self.probes
    }

    /// Returns the executing phase, if any.
    #[must_use]
    pub fn current_phase(&self) -> Option<TestPhase> {
        self.current.lock().ok().and_then(|current| *current)
    }

    /// Marks `phase` as executing and returns its controls.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseRejected::Busy`] when another phase is executing.
    pub fn begin_phase(&self, phase: TestPhase) -> Result<PhaseControl, PhaseRejected> {
        let mut current = self.current.lock().map_err(|_| PhaseRejected::Poisoned)?;
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(PhaseRejected::Busy {
                test_id: self.test_id.clone(),
                running: current.unwrap_or(phase),
            });
        }
        *current = Some(phase);
        drop(current);
        let mut run_stop = self.run_stop.lock().map_err(|_| PhaseRejected::Poisoned)?;
        if phase == TestPhase::Run && run_stop.finished {
            *run_stop = RunStop::default();
        }
        Ok(PhaseControl::new(run_stop.token.clone(), Arc::clone(&self.probes)))
    }

    /// Executes a phase started with [`TestContainer::begin_phase`] and
    /// releases the busy guard. Panics are converted into failures.
    ///
    /// # Errors
    ///
    /// Returns the [`TestFailure`] raised by the phase.
    pub fn execute(&self, phase: TestPhase, control: &PhaseControl) -> Result<(), TestFailure> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.instance.execute(phase, control)));
        if phase == TestPhase::Run
            && let Ok(mut run_stop) = self.run_stop.lock()
        {
            run_stop.finished = true;
        }
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        self.busy.store(false, Ordering::Release);
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(TestFailure::from_panic(payload.as_ref())),
        }
    }

    /// Signals the current RUN phase to stop, or the next one if it has not
    /// begun yet.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseRejected::Poisoned`] when the token lock is poisoned.
    pub fn stop_run(&self) -> Result<(), PhaseRejected> {
        self.run_stop.lock().map_err(|_| PhaseRejected::Poisoned)?.token.stop();
        Ok(())
    }
}
