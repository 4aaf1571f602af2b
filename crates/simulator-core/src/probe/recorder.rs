// simulator-core/src/probe/recorder.rs
// ============================================================================
// Module: Probe Recorder
// Description: Per-thread latency/throughput recorder with snapshot-and-reset.
// Purpose: Record benchmark samples without contention on the hot path.
// Dependencies: crate::probe::histogram
// ============================================================================

//! ## Overview
//! A [`Probe`] is usually owned by one benchmark thread. The performance
//! monitor holds a second handle only to call [`Probe::snapshot_and_reset`],
//! which swaps in a fresh buffer under the same lock the recording path
//! takes, so a snapshot never splits a sample. Pending
//! [`Probe::record_start`] marks are kept per calling thread, so threads
//! sharing a probe never consume each other's start.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::mem;
use std::sync::Mutex;
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;
use std::time::Instant;

use crate::probe::ProbeError;
use crate::probe::histogram::IntervalHistogram;
use crate::telemetry::timestamp_ms;

// ============================================================================
// SECTION: Probe
// ============================================================================

/// Whether a probe records latencies or bare operation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Latency samples into a histogram.
    Latency,
    /// Operation counts only.
    Counter,
}

/// Latency/throughput recorder.
#[derive(Debug)]
pub struct Probe {
    /// Probe name (usually the timestep name).
    name: String,
    /// Recording mode.
    kind: ProbeKind,
    /// Whether operations count toward reported throughput.
    part_of_throughput: bool,
    /// Current interval buffer.
    current: Mutex<IntervalHistogram>,
    /// Pending `record_start` instants by calling thread.
    pending_starts: Mutex<HashMap<ThreadId, Instant>>,
}

impl Probe {
    /// Creates a latency probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the histogram cannot be allocated.
    pub fn latency(name: impl Into<String>, part_of_throughput: bool) -> Result<Self, ProbeError> {
        Self::with_kind(name, ProbeKind::Latency, part_of_throughput)
    }

    /// Creates a counting probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the histogram cannot be allocated.
    pub fn counter(name: impl Into<String>, part_of_throughput: bool) -> Result<Self, ProbeError> {
        Self::with_kind(name, ProbeKind::Counter, part_of_throughput)
    }

    /// Creates a probe of `kind`.
    fn with_kind(
        name: impl Into<String>,
        kind: ProbeKind,
        part_of_throughput: bool,
    ) -> Result<Self, ProbeError> {
        Ok(Self {
            name: name.into(),
            kind,
            part_of_throughput,
            current: Mutex::new(IntervalHistogram::new(now_ms())?),
            pending_starts: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the probe name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the recording mode.
    #[must_use]
    pub const fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Returns true when operations count toward throughput.
    #[must_use]
    pub const fn is_part_of_throughput(&self) -> bool {
        self.part_of_throughput
    }

    /// Records a latency in nanoseconds; negative values are clamped to zero.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Poisoned`] when the buffer lock is poisoned.
    pub fn record_latency(&self, nanos: i64) -> Result<(), ProbeError> {
        let value = u64::try_from(nanos).unwrap_or(0);
        let mut current = self.current.lock().map_err(|_| ProbeError::Poisoned)?;
        match self.kind {
            ProbeKind::Latency => current.record(value),
            ProbeKind::Counter => current.record_operation(),
        }
        Ok(())
    }

    /// Records the elapsed time between `start` and now.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Poisoned`] when the buffer lock is poisoned.
    pub fn record_since(&self, start: Instant) -> Result<(), ProbeError> {
        self.record_latency(duration_nanos(start.elapsed()))
    }

    /// Records one operation without latency.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Poisoned`] when the buffer lock is poisoned.
    pub fn record_operation(&self) -> Result<(), ProbeError> {
        self.current.lock().map_err(|_| ProbeError::Poisoned)?.record_operation();
        Ok(())
    }

    /// Marks the start of a measured operation on the calling thread.
    /// A poisoned start table drops the mark; the matching
    /// [`Probe::record_stop`] then reports the poisoning.
    pub fn record_start(&self) {
        let started = Instant::now();
        if let Ok(mut pending) = self.pending_starts.lock() {
            pending.insert(thread::current().id(), started);
        }
    }

    /// Records the latency since the calling thread's last
    /// [`Probe::record_start`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StopWithoutStart`] when this thread has no
    /// pending start, or [`ProbeError::Poisoned`] on a poisoned lock.
    pub fn record_stop(&self) -> Result<(), ProbeError> {
        let started = self
            .pending_starts
            .lock()
            .map_err(|_| ProbeError::Poisoned)?
            .remove(&thread::current().id())
            .ok_or_else(|| ProbeError::StopWithoutStart(self.name.clone()))?;
        self.record_since(started)
    }

    /// Swaps the current buffer for an empty one and returns the filled
    /// buffer with its window closed at the swap time.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the lock is poisoned or allocation fails.
    pub fn snapshot_and_reset(&self) -> Result<IntervalHistogram, ProbeError> {
        let now = now_ms();
        let fresh = IntervalHistogram::new(now)?;
        let mut current = self.current.lock().map_err(|_| ProbeError::Poisoned)?;
        let mut filled = mem::replace(&mut *current, fresh);
        drop(current);
        filled.close(now);
        Ok(filled)
    }
}

/// Converts a duration to nanoseconds, saturating at `i64::MAX`.
#[must_use]
pub fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Current wall-clock milliseconds as `u64`.
pub(crate) fn now_ms() -> u64 {
    u64::try_from(timestamp_ms()).unwrap_or(u64::MAX)
}
