// simulator-core/src/probe/mod.rs
// ============================================================================
// Module: Probes
// Description: Latency/throughput recording and interval histograms.
// Purpose: Measure the RUN phase and merge results across the fleet.
// Dependencies: hdrhistogram, base64, thiserror
// ============================================================================

//! ## Overview
//! Each benchmark thread owns one [`Probe`] per timestep. The worker's
//! performance monitor snapshots them periodically and merges the
//! [`IntervalHistogram`]s per timestep before shipping them upward.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod histogram;
pub mod recorder;
pub mod registry;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use histogram::HIGHEST_TRACKABLE_NANOS;
pub use histogram::IntervalHistogram;
pub use recorder::Probe;
pub use recorder::ProbeKind;
pub use recorder::duration_nanos;
pub use registry::ProbeRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Probe and histogram errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Histogram allocation or merge failed.
    #[error("histogram error: {0}")]
    Histogram(String),
    /// Histogram encoding failed.
    #[error("histogram encode failed: {0}")]
    Encode(String),
    /// Histogram decoding failed.
    #[error("histogram decode failed: {0}")]
    Decode(String),
    /// A probe lock was poisoned by a panicking thread.
    #[error("probe lock poisoned")]
    Poisoned,
    /// `record_stop` without a matching `record_start`.
    #[error("probe `{0}` stopped without a start")]
    StopWithoutStart(String),
}

// ============================================================================
// SECTION: Merging
// ============================================================================

/// Snapshots every probe and merges the intervals by probe name.
///
/// # Errors
///
/// Returns [`ProbeError`] when a snapshot or merge fails.
pub fn snapshot_by_name(
    probes: &[Arc<Probe>],
) -> Result<BTreeMap<String, IntervalHistogram>, ProbeError> {
    let mut merged: BTreeMap<String, IntervalHistogram> = BTreeMap::new();
    for probe in probes {
        let interval = probe.snapshot_and_reset()?;
        match merged.get_mut(probe.name()) {
            Some(existing) => existing.combine(&interval)?,
            None => {
                merged.insert(probe.name().to_string(), interval);
            }
        }
    }
    Ok(merged)
}
