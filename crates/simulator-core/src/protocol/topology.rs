// simulator-core/src/protocol/topology.rs
// ============================================================================
// Module: Fleet Topology
// Description: Registry of known concrete endpoints.
// Purpose: Expand wildcard destinations into the expected responder set.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The topology lists every concrete agent, worker and test address a
//! sender knows about. Fan-out requests use [`Topology::expand`] to learn
//! which responders to wait for; removing an endpoint removes its subtree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use crate::core::SimulatorAddress;

// ============================================================================
// SECTION: Topology
// ============================================================================

/// Set of concrete endpoints below the local process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Registered concrete addresses.
    endpoints: BTreeSet<SimulatorAddress>,
}

impl Topology {
    /// Creates an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a concrete endpoint; patterns are ignored.
    pub fn register(&mut self, address: SimulatorAddress) -> bool {
        address.is_concrete() && self.endpoints.insert(address)
    }

    /// Removes an endpoint and everything below it; returns removed addresses.
    pub fn remove(&mut self, address: &SimulatorAddress) -> Vec<SimulatorAddress> {
        let removed: Vec<SimulatorAddress> = self
            .endpoints
            .iter()
            .filter(|known| *known == address || address.is_ancestor_of(known))
            .copied()
            .collect();
        for known in &removed {
            self.endpoints.remove(known);
        }
        removed
    }

    /// Returns true when `address` is registered.
    #[must_use]
    pub fn contains(&self, address: &SimulatorAddress) -> bool {
        self.endpoints.contains(address)
    }

    /// Returns every registered address matched by `pattern`, in order.
    #[must_use]
    pub fn expand(&self, pattern: &SimulatorAddress) -> Vec<SimulatorAddress> {
        if pattern.is_concrete() {
            return if self.endpoints.contains(pattern) { vec![*pattern] } else { Vec::new() };
        }
        self.endpoints.iter().filter(|known| pattern.matches(known)).copied().collect()
    }

    /// Returns every registered address.
    pub fn endpoints(&self) -> impl Iterator<Item = &SimulatorAddress> {
        self.endpoints.iter()
    }
}
