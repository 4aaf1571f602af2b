// simulator-core/src/probe/registry.rs
// ============================================================================
// Module: Probe Registry
// Description: Collection of the probes created for one test on one worker.
// Purpose: Let the performance monitor reach every per-thread probe.
// Dependencies: crate::probe
// ============================================================================

//! ## Overview
//! Benchmark threads register their probes when the RUN phase starts. The
//! monitor takes snapshots through the registry and merges them by probe
//! name into transport-ready [`ProbeStats`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::ProbeStats;
use crate::probe::IntervalHistogram;
use crate::probe::Probe;
use crate::probe::ProbeError;
use crate::probe::snapshot_by_name;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Thread-safe list of probes.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    /// Registered probes.
    probes: Mutex<Vec<Arc<Probe>>>,
}

impl ProbeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a probe and returns the shared handle.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Poisoned`] when the registry lock is poisoned.
    pub fn register(&self, probe: Probe) -> Result<Arc<Probe>, ProbeError> {
        let probe = Arc::new(probe);
        self.probes.lock().map_err(|_| ProbeError::Poisoned)?.push(Arc::clone(&probe));
        Ok(probe)
    }

    /// Returns the number of registered probes.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Poisoned`] when the registry lock is poisoned.
    pub fn probe_count(&self) -> Result<usize, ProbeError> {
        Ok(self.probes.lock().map_err(|_| ProbeError::Poisoned)?.len())
    }

    /// Snapshots every probe and merges intervals by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when a snapshot or merge fails.
    pub fn snapshot(&self) -> Result<BTreeMap<String, (bool, IntervalHistogram)>, ProbeError> {
        let probes = self.probes.lock().map_err(|_| ProbeError::Poisoned)?.clone();
        let throughput: BTreeMap<&str, bool> =
            probes.iter().map(|probe| (probe.name(), probe.is_part_of_throughput())).collect();
        let merged = snapshot_by_name(&probes)?;
        Ok(merged
            .into_iter()
            .map(|(name, interval)| {
                let part = throughput.get(name.as_str()).copied().unwrap_or(true);
                (name, (part, interval))
            })
            .collect())
    }

    /// Snapshots every probe and encodes the non-empty intervals.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when a snapshot, merge or encoding fails.
    pub fn snapshot_stats(&self) -> Result<BTreeMap<String, ProbeStats>, ProbeError> {
        let mut stats = BTreeMap::new();
        for (name, (part_of_throughput, interval)) in self.snapshot()? {
            if interval.operation_count() == 0 {
                continue;
            }
            stats.insert(name, ProbeStats {
                part_of_throughput,
                interval: interval.encode()?,
            });
        }
        Ok(stats)
    }
}
