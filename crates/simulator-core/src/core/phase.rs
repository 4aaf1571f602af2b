// simulator-core/src/core/phase.rs
// ============================================================================
// Module: Test Phases
// Description: The fixed, totally ordered test lifecycle.
// Purpose: Name each lifecycle stage and whether one or all workers run it.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A test moves through [`TestPhase`] values strictly in declaration order.
//! Global phases are executed by a single elected worker, local phases by
//! every worker assigned to the test.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Test Phase
// ============================================================================

/// Lifecycle phase of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPhase {
    /// Test state construction on every worker.
    Setup,
    /// Per-worker preparation.
    LocalWarmup,
    /// Preparation performed once for the whole fleet.
    GlobalWarmup,
    /// Measured, rate-controlled execution.
    Run,
    /// Per-worker verification.
    LocalVerify,
    /// Verification performed once for the whole fleet.
    GlobalVerify,
    /// Per-worker cleanup.
    LocalTeardown,
    /// Cleanup performed once for the whole fleet.
    GlobalTeardown,
}

impl TestPhase {
    /// All phases in execution order.
    pub const ALL: [Self; 8] = [
        Self::Setup,
        Self::LocalWarmup,
        Self::GlobalWarmup,
        Self::Run,
        Self::LocalVerify,
        Self::GlobalVerify,
        Self::LocalTeardown,
        Self::GlobalTeardown,
    ];

    /// Returns true when only one elected worker executes this phase.
    #[must_use]
    pub const fn is_global(self) -> bool {
        matches!(self, Self::GlobalWarmup | Self::GlobalVerify | Self::GlobalTeardown)
    }

    /// Returns true for the two verify phases.
    #[must_use]
    pub const fn is_verify(self) -> bool {
        matches!(self, Self::LocalVerify | Self::GlobalVerify)
    }

    /// Returns true for the two teardown phases.
    #[must_use]
    pub const fn is_teardown(self) -> bool {
        matches!(self, Self::LocalTeardown | Self::GlobalTeardown)
    }

    /// Returns the following phase, `None` after the last one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Setup => Some(Self::LocalWarmup),
            Self::LocalWarmup => Some(Self::GlobalWarmup),
            Self::GlobalWarmup => Some(Self::Run),
            Self::Run => Some(Self::LocalVerify),
            Self::LocalVerify => Some(Self::GlobalVerify),
            Self::GlobalVerify => Some(Self::LocalTeardown),
            Self::LocalTeardown => Some(Self::GlobalTeardown),
            Self::GlobalTeardown => None,
        }
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::LocalWarmup => "LOCAL_WARMUP",
            Self::GlobalWarmup => "GLOBAL_WARMUP",
            Self::Run => "RUN",
            Self::LocalVerify => "LOCAL_VERIFY",
            Self::GlobalVerify => "GLOBAL_VERIFY",
            Self::LocalTeardown => "LOCAL_TEARDOWN",
            Self::GlobalTeardown => "GLOBAL_TEARDOWN",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of a lifecycle hook: per worker or once per fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseScope {
    /// Runs on every worker.
    Local,
    /// Runs on the elected worker only.
    Global,
}
