// simulator-core/src/core/address.rs
// ============================================================================
// Module: Simulator Addresses
// Description: Hierarchical coordinator/agent/worker/test addresses.
// Purpose: Name every endpoint in the fleet and express fan-out patterns.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`SimulatorAddress`] names one level of the tree rooted at the
//! coordinator: `C`, `C_A2`, `C_A2_W1`, `C_A2_W1_T3`. Any index at or above
//! the address level may be a wildcard (`*`), which turns the address into a
//! pattern matching every concrete address of that level below the fixed
//! components. Addresses are immutable, totally ordered and usable as map
//! keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;
use thiserror::Error;

// ============================================================================
// SECTION: Address Level
// ============================================================================

/// Depth of an address in the fleet tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressLevel {
    /// The fleet root.
    Coordinator,
    /// A per-machine agent.
    Agent,
    /// A worker process under an agent.
    Worker,
    /// A test instance hosted by a worker.
    Test,
}

impl AddressLevel {
    /// Returns the next level down, if any.
    #[must_use]
    pub const fn child(self) -> Option<Self> {
        match self {
            Self::Coordinator => Some(Self::Agent),
            Self::Agent => Some(Self::Worker),
            Self::Worker => Some(Self::Test),
            Self::Test => None,
        }
    }

    /// Returns the numeric depth (coordinator = 0).
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Coordinator => 0,
            Self::Agent => 1,
            Self::Worker => 2,
            Self::Test => 3,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Address construction and parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The text form could not be parsed.
    #[error("invalid address `{0}`")]
    Invalid(String),
    /// A component below the address level was supplied.
    #[error("address component below level {0:?} must be absent")]
    ComponentBelowLevel(AddressLevel),
}

// ============================================================================
// SECTION: Simulator Address
// ============================================================================

/// Hierarchical fleet address; `None` components at or above the level are
/// wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimulatorAddress {
    /// Agent index.
    agent: Option<u32>,
    /// Worker index within the agent.
    worker: Option<u32>,
    /// Test index within the worker.
    test: Option<u32>,
    /// Level named by this address.
    level: AddressLevel,
}

impl SimulatorAddress {
    /// Builds an address (or pattern) from raw components.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::ComponentBelowLevel`] when a component deeper
    /// than `level` is present.
    pub fn new(
        level: AddressLevel,
        agent: Option<u32>,
        worker: Option<u32>,
        test: Option<u32>,
    ) -> Result<Self, AddressError> {
        let depth = level.depth();
        if (depth < 1 && agent.is_some())
            || (depth < 2 && worker.is_some())
            || (depth < 3 && test.is_some())
        {
            return Err(AddressError::ComponentBelowLevel(level));
        }
        Ok(Self {
            agent,
            worker,
            test,
            level,
        })
    }

    /// The coordinator (fleet root).
    #[must_use]
    pub const fn coordinator() -> Self {
        Self {
            agent: None,
            worker: None,
            test: None,
            level: AddressLevel::Coordinator,
        }
    }

    /// A concrete agent.
    #[must_use]
    pub const fn agent(agent: u32) -> Self {
        Self {
            agent: Some(agent),
            worker: None,
            test: None,
            level: AddressLevel::Agent,
        }
    }

    /// A concrete worker.
    #[must_use]
    pub const fn worker(agent: u32, worker: u32) -> Self {
        Self {
            agent: Some(agent),
            worker: Some(worker),
            test: None,
            level: AddressLevel::Worker,
        }
    }

    /// A concrete test instance.
    #[must_use]
    pub const fn test(agent: u32, worker: u32, test: u32) -> Self {
        Self {
            agent: Some(agent),
            worker: Some(worker),
            test: Some(test),
            level: AddressLevel::Test,
        }
    }

    /// Pattern matching every agent.
    #[must_use]
    pub const fn all_agents() -> Self {
        Self {
            agent: None,
            worker: None,
            test: None,
            level: AddressLevel::Agent,
        }
    }

    /// Pattern matching every worker, optionally restricted to one agent.
    #[must_use]
    pub const fn all_workers(agent: Option<u32>) -> Self {
        Self {
            agent,
            worker: None,
            test: None,
            level: AddressLevel::Worker,
        }
    }

    /// Pattern matching test `test` on every worker of the fleet.
    #[must_use]
    pub const fn test_on_all_workers(test: u32) -> Self {
        Self {
            agent: None,
            worker: None,
            test: Some(test),
            level: AddressLevel::Test,
        }
    }

    /// Returns the level named by this address.
    #[must_use]
    pub const fn level(&self) -> AddressLevel {
        self.level
    }

    /// Returns the agent index, `None` for a wildcard or the coordinator.
    #[must_use]
    pub const fn agent_index(&self) -> Option<u32> {
        self.agent
    }

    /// Returns the worker index, `None` for a wildcard or a shallower level.
    #[must_use]
    pub const fn worker_index(&self) -> Option<u32> {
        self.worker
    }

    /// Returns the test index, `None` for a wildcard or a shallower level.
    #[must_use]
    pub const fn test_index(&self) -> Option<u32> {
        self.test
    }

    /// Returns the component stored at `level` (`None` = wildcard/absent).
    const fn component(&self, level: AddressLevel) -> Option<u32> {
        match level {
            AddressLevel::Coordinator => None,
            AddressLevel::Agent => self.agent,
            AddressLevel::Worker => self.worker,
            AddressLevel::Test => self.test,
        }
    }

    /// Returns true when no wildcard is present.
    #[must_use]
    pub const fn is_concrete(&self) -> bool {
        let depth = self.level.depth();
        (depth < 1 || self.agent.is_some())
            && (depth < 2 || self.worker.is_some())
            && (depth < 3 || self.test.is_some())
    }

    /// Returns true when `concrete` is one of the addresses this pattern
    /// names. A concrete address matches only itself.
    #[must_use]
    pub fn matches(&self, concrete: &Self) -> bool {
        if self.level != concrete.level || !concrete.is_concrete() {
            return false;
        }
        LEVELS_BELOW_ROOT.iter().take(self.level.depth()).all(|level| {
            self.component(*level).is_none() || self.component(*level) == concrete.component(*level)
        })
    }

    /// Returns true when a message for `destination` may have to pass
    /// through (or end at) the subtree rooted at this concrete address.
    #[must_use]
    pub fn covers(&self, destination: &Self) -> bool {
        if destination.level < self.level {
            return false;
        }
        LEVELS_BELOW_ROOT.iter().take(self.level.depth()).all(|level| {
            destination.component(*level).is_none()
                || destination.component(*level) == self.component(*level)
        })
    }

    /// Returns true when this address is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.level < other.level && self.covers(other) && other.ancestor_at(self.level) == Some(*self)
    }

    /// Truncates this address to `level`; `None` when `level` is deeper.
    #[must_use]
    pub const fn ancestor_at(&self, level: AddressLevel) -> Option<Self> {
        if level.depth() > self.level.depth() {
            return None;
        }
        let depth = level.depth();
        Some(Self {
            agent: if depth >= 1 { self.agent } else { None },
            worker: if depth >= 2 { self.worker } else { None },
            test: if depth >= 3 { self.test } else { None },
            level,
        })
    }

    /// Returns the direct parent, `None` for the coordinator.
    #[must_use]
    pub const fn parent(&self) -> Option<Self> {
        match self.level {
            AddressLevel::Coordinator => None,
            AddressLevel::Agent => self.ancestor_at(AddressLevel::Coordinator),
            AddressLevel::Worker => self.ancestor_at(AddressLevel::Agent),
            AddressLevel::Test => self.ancestor_at(AddressLevel::Worker),
        }
    }

    /// Returns the concrete child at `index` one level down.
    #[must_use]
    pub const fn child(&self, index: u32) -> Option<Self> {
        match self.level {
            AddressLevel::Coordinator => Some(Self::agent(index)),
            AddressLevel::Agent => match self.agent {
                Some(agent) => Some(Self::worker(agent, index)),
                None => None,
            },
            AddressLevel::Worker => match (self.agent, self.worker) {
                (Some(agent), Some(worker)) => Some(Self::test(agent, worker, index)),
                _ => None,
            },
            AddressLevel::Test => None,
        }
    }
}

/// Levels that carry an index, in tree order.
const LEVELS_BELOW_ROOT: [AddressLevel; 3] =
    [AddressLevel::Agent, AddressLevel::Worker, AddressLevel::Test];

// ============================================================================
// SECTION: Text Form
// ============================================================================

impl fmt::Display for SimulatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("C")?;
        for (level, prefix) in LEVELS_BELOW_ROOT.iter().zip(["A", "W", "T"]) {
            if level.depth() > self.level.depth() {
                break;
            }
            match self.component(*level) {
                Some(index) => write!(f, "_{prefix}{index}")?,
                None => write!(f, "_{prefix}*")?,
            }
        }
        Ok(())
    }
}

impl FromStr for SimulatorAddress {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::Invalid(text.to_string());
        let mut parts = text.split('_');
        if parts.next() != Some("C") {
            return Err(invalid());
        }
        let mut components: [Option<u32>; 3] = [None; 3];
        let mut level = AddressLevel::Coordinator;
        for (slot, part) in parts.enumerate() {
            let (expected_level, prefix) = match slot {
                0 => (AddressLevel::Agent, 'A'),
                1 => (AddressLevel::Worker, 'W'),
                2 => (AddressLevel::Test, 'T'),
                _ => return Err(invalid()),
            };
            let index = part.strip_prefix(prefix).ok_or_else(invalid)?;
            components[slot] = if index == "*" {
                None
            } else {
                Some(index.parse::<u32>().map_err(|_| invalid())?)
            };
            level = expected_level;
        }
        Self::new(level, components[0], components[1], components[2])
    }
}

impl Serialize for SimulatorAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SimulatorAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
