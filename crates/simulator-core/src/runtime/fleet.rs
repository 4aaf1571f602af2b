// simulator-core/src/runtime/fleet.rs
// ============================================================================
// Module: Fleet View
// Description: Coordinator-side runtime state of every worker.
// Purpose: Track phases, heartbeats and outstanding failures per worker.
// Dependencies: crate::core, crate::runtime::failure
// ============================================================================

//! ## Overview
//! The [`FleetView`] is owned by the coordinator's dispatcher task and is
//! mutated only there, so it needs no locking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use crate::core::SimulatorAddress;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::runtime::failure::FailureRecord;

// ============================================================================
// SECTION: Worker State
// ============================================================================

/// Coordinator view of one worker.
#[derive(Debug, Clone)]
pub struct WorkerRuntimeState {
    /// Worker address.
    address: SimulatorAddress,
    /// Last phase started per test on this worker.
    phases: BTreeMap<TestId, TestPhase>,
    /// Time of the last heartbeat or message.
    last_heartbeat: Instant,
    /// First failure attributed to this worker.
    outstanding_failure: Option<FailureRecord>,
}

impl WorkerRuntimeState {
    /// Returns the worker address.
    #[must_use]
    pub const fn address(&self) -> SimulatorAddress {
        self.address
    }

    /// Returns the current phase of `test_id` on this worker.
    #[must_use]
    pub fn current_phase(&self, test_id: &TestId) -> Option<TestPhase> {
        self.phases.get(test_id).copied()
    }

    /// Returns the tests assigned to this worker.
    pub fn tests(&self) -> impl Iterator<Item = &TestId> {
        self.phases.keys()
    }

    /// Returns the time of the last heartbeat.
    #[must_use]
    pub const fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Returns the failure attributed to this worker.
    #[must_use]
    pub const fn outstanding_failure(&self) -> Option<&FailureRecord> {
        self.outstanding_failure.as_ref()
    }
}

// ============================================================================
// SECTION: Fleet View
// ============================================================================

/// Runtime state of all known workers.
#[derive(Debug, Clone, Default)]
pub struct FleetView {
    /// Workers keyed by address.
    workers: BTreeMap<SimulatorAddress, WorkerRuntimeState>,
}

impl FleetView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker seen at `now`; returns false when already known.
    pub fn register(&mut self, address: SimulatorAddress, now: Instant) -> bool {
        if self.workers.contains_key(&address) {
            return false;
        }
        self.workers.insert(address, WorkerRuntimeState {
            address,
            phases: BTreeMap::new(),
            last_heartbeat: now,
            outstanding_failure: None,
        });
        true
    }

    /// Refreshes a worker's liveness; returns false for unknown workers.
    pub fn heartbeat(&mut self, address: &SimulatorAddress, now: Instant) -> bool {
        self.workers.get_mut(address).is_some_and(|worker| {
            worker.last_heartbeat = now;
            true
        })
    }

    /// Records that `test_id` entered `phase` on the worker.
    pub fn set_phase(&mut self, address: &SimulatorAddress, test_id: &TestId, phase: TestPhase) {
        if let Some(worker) = self.workers.get_mut(address) {
            worker.phases.insert(test_id.clone(), phase);
        }
    }

    /// Forgets `test_id` on every worker.
    pub fn clear_test(&mut self, test_id: &TestId) {
        for worker in self.workers.values_mut() {
            worker.phases.remove(test_id);
        }
    }

    /// Marks the worker's outstanding failure unless one is already set.
    pub fn mark_failure(&mut self, address: &SimulatorAddress, record: FailureRecord) {
        if let Some(worker) = self.workers.get_mut(address)
            && worker.outstanding_failure.is_none()
        {
            worker.outstanding_failure = Some(record);
        }
    }

    /// Returns the workers silent for longer than `timeout`.
    #[must_use]
    pub fn lost_workers(&self, now: Instant, timeout: Duration) -> Vec<SimulatorAddress> {
        self.workers
            .values()
            .filter(|worker| now.saturating_duration_since(worker.last_heartbeat) > timeout)
            .map(|worker| worker.address)
            .collect()
    }

    /// Removes a worker and returns its final state.
    pub fn remove(&mut self, address: &SimulatorAddress) -> Option<WorkerRuntimeState> {
        self.workers.remove(address)
    }

    /// Returns a worker's state.
    #[must_use]
    pub fn get(&self, address: &SimulatorAddress) -> Option<&WorkerRuntimeState> {
        self.workers.get(address)
    }

    /// Returns the known worker addresses in order.
    #[must_use]
    pub fn addresses(&self) -> Vec<SimulatorAddress> {
        self.workers.keys().copied().collect()
    }

    /// Returns the number of known workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns true when no worker is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
