// simulator-core/src/telemetry.rs
// ============================================================================
// Module: Simulator Telemetry
// Description: Structured log events and sinks.
// Purpose: Emit JSON-line logs without a process-wide logger.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every component logs through the [`LogSink`] carried by its
//! [`crate::OrchestrationContext`]. Events are JSON lines so they can be
//! shipped to any log pipeline. Sinks filter by a minimum [`LogLevel`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::core::TestId;
use crate::core::TestPhase;

// ============================================================================
// SECTION: Levels
// ============================================================================

/// Log severity, ordered from most to least verbose.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Fine-grained diagnostics.
    Debug,
    /// Normal lifecycle events.
    #[default]
    Info,
    /// Unexpected but recoverable conditions.
    Warn,
    /// Failures.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Structured log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Event identifier (for example `phase_started`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Emitting endpoint, usually an address in text form.
    pub source: String,
    /// Human-readable message.
    pub message: String,
    /// Test identifier when the event concerns one test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<TestId>,
    /// Phase when the event concerns one phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<TestPhase>,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        event: &'static str,
        level: LogLevel,
        source: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event,
            timestamp_ms: timestamp_ms(),
            level,
            source: source.to_string(),
            message: message.into(),
            test_id: None,
            phase: None,
        }
    }

    /// Attaches a test identifier.
    #[must_use]
    pub fn with_test(mut self, test_id: &TestId) -> Self {
        self.test_id = Some(test_id.clone());
        self
    }

    /// Attaches a phase.
    #[must_use]
    pub const fn with_phase(mut self, phase: TestPhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for structured log events.
pub trait LogSink: Send + Sync {
    /// Records an event.
    fn record(&self, event: &LogEvent);
}

/// Shared log sink handle.
pub type SharedLogSink = Arc<dyn LogSink>;

/// Sink that writes JSON lines to stderr.
pub struct StderrLogSink {
    /// Minimum level written.
    min_level: LogLevel,
}

impl StderrLogSink {
    /// Creates a stderr sink.
    #[must_use]
    pub const fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
        }
    }
}

impl LogSink for StderrLogSink {
    fn record(&self, event: &LogEvent) {
        if event.level < self.min_level {
            return;
        }
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
    /// Minimum level written.
    min_level: LogLevel,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path, min_level: LogLevel) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            min_level,
        })
    }
}

impl LogSink for FileLogSink {
    fn record(&self, event: &LogEvent) {
        if event.level < self.min_level {
            return;
        }
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink that drops every event.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn record(&self, _event: &LogEvent) {}
}

/// Sink that keeps events in memory, used by embedders and tests.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Recorded events.
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the recorded events with identifier `event`.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<LogEvent> {
        self.events().into_iter().filter(|item| item.event == event).collect()
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
