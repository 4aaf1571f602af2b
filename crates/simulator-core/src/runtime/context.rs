// simulator-core/src/runtime/context.rs
// ============================================================================
// Module: Orchestration Context
// Description: Explicit per-process context instead of global state.
// Purpose: Carry settings and the log sink to every component.
// Dependencies: crate::telemetry
// ============================================================================

//! ## Overview
//! An [`OrchestrationContext`] is built once at process start and cloned
//! into each component. It replaces process-wide flags and loggers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::runtime::settings::RuntimeSettings;
use crate::telemetry::LogEvent;
use crate::telemetry::LogLevel;
use crate::telemetry::NoopLogSink;
use crate::telemetry::SharedLogSink;

// ============================================================================
// SECTION: Context
// ============================================================================

/// Settings and logging handle shared by one process's components.
#[derive(Clone)]
pub struct OrchestrationContext {
    /// Immutable settings.
    settings: Arc<RuntimeSettings>,
    /// Log destination.
    log: SharedLogSink,
}

impl OrchestrationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(settings: RuntimeSettings, log: SharedLogSink) -> Self {
        Self {
            settings: Arc::new(settings),
            log,
        }
    }

    /// Creates a context that discards logs.
    #[must_use]
    pub fn silent(settings: RuntimeSettings) -> Self {
        Self::new(settings, Arc::new(NoopLogSink))
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Returns the shared log sink.
    #[must_use]
    pub fn log_sink(&self) -> SharedLogSink {
        Arc::clone(&self.log)
    }

    /// Records an event.
    pub fn record(&self, event: &LogEvent) {
        self.log.record(event);
    }

    /// Records a plain event.
    pub fn log(
        &self,
        event: &'static str,
        level: LogLevel,
        source: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.log.record(&LogEvent::new(event, level, source, message));
    }
}
