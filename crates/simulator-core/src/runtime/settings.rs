// simulator-core/src/runtime/settings.rs
// ============================================================================
// Module: Runtime Settings
// Description: Resolved fleet, timing, pacing and transport settings.
// Purpose: Hand every process one immutable settings value.
// Dependencies: crate::core, crate::pacing, crate::protocol
// ============================================================================

//! ## Overview
//! [`RuntimeSettings`] is the validated, unit-resolved form of the TOML
//! configuration. Defaults match the configuration defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::PacingDefaults;
use crate::core::WorkerParameters;
use crate::pacing::MetronomeKind;
use crate::protocol::ConnectorSettings;
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Settings shared by coordinator, agents and workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Number of agents.
    pub agents: u32,
    /// Workers started per agent.
    pub workers_per_agent: u32,
    /// Run suite tests concurrently.
    pub parallel: bool,
    /// Abort remaining tests after the first failed test.
    pub fail_fast: bool,
    /// Execute the verify phases.
    pub verify_enabled: bool,
    /// Coordinator-driven RUN duration; zero means tests bound RUN by `iterations`.
    pub run_duration: Duration,
    /// Base random seed.
    pub seed: u64,
    /// Deadline for request replies.
    pub request_timeout: Duration,
    /// Worker heartbeat period.
    pub heartbeat_interval: Duration,
    /// Silence after which a worker is declared lost.
    pub worker_lost_timeout: Duration,
    /// Pending-table sweep period.
    pub reaper_interval: Duration,
    /// Stagger between worker launches on one agent.
    pub worker_start_delay: Duration,
    /// Pacing defaults for tests.
    pub pacing: PacingDefaults,
    /// Performance snapshot period.
    pub performance_interval: Duration,
    /// Maximum frame payload size.
    pub max_frame_bytes: usize,
    /// Raw driver properties passed to every worker.
    pub driver_properties: BTreeMap<String, String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            agents: 1,
            workers_per_agent: 1,
            parallel: false,
            fail_fast: false,
            verify_enabled: true,
            run_duration: Duration::from_secs(60),
            seed: 0,
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            worker_lost_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_millis(100),
            worker_start_delay: Duration::ZERO,
            pacing: PacingDefaults {
                metronome: MetronomeKind::Sleeping,
                spin_threshold_us: 100,
                account_for_coordinated_omission: true,
            },
            performance_interval: Duration::from_secs(1),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            driver_properties: BTreeMap::new(),
        }
    }
}

impl RuntimeSettings {
    /// Connector tuning derived from these settings.
    #[must_use]
    pub const fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            max_frame_bytes: self.max_frame_bytes,
            reaper_interval: self.reaper_interval,
        }
    }

    /// Parameters for worker `worker_index` (1-based) of an agent.
    #[must_use]
    pub fn worker_parameters(&self, worker_index: u32) -> WorkerParameters {
        WorkerParameters {
            worker_index,
            seed: self.seed,
            heartbeat_interval_ms: duration_ms(self.heartbeat_interval),
            performance_interval_ms: duration_ms(self.performance_interval),
            pacing: self.pacing.clone(),
            driver_properties: self.driver_properties.clone(),
        }
    }

    /// Launch delay for worker `worker_index` (1-based).
    #[must_use]
    pub fn worker_delay_ms(&self, worker_index: u32) -> u64 {
        duration_ms(self.worker_start_delay).saturating_mul(u64::from(worker_index.saturating_sub(1)))
    }
}

/// Converts a duration to whole milliseconds, saturating.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
