// simulator-core/src/runtime/stop.rs
// ============================================================================
// Module: Stop Token
// Description: Cooperative cancellation flag.
// Purpose: Stop issuing workload without interrupting in-flight calls.
// ============================================================================

//! ## Overview
//! A [`StopToken`] is checked between workload invocations; setting it
//! never preempts a call already in progress.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Shared, one-way cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    /// Set once stop is requested.
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Returns true once stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
