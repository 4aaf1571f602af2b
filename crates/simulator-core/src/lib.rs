// simulator-core/src/lib.rs
// ============================================================================
// Module: Simulator Core Library
// Description: Public API surface for the distributed load-test simulator.
// Purpose: Expose addressing, protocol, pacing, probes and the fleet runtime.
// Dependencies: crate::{core, interfaces, pacing, probe, protocol, runtime, telemetry}
// ============================================================================

//! ## Overview
//! Simulator core orchestrates load tests across a fleet of one coordinator,
//! many agents and many workers per agent. Tests move through a fixed phase
//! sequence under a barrier per phase; workers pace operations with
//! metronomes, record latency into interval histograms and report failures
//! and stats back over a length-prefixed JSON wire protocol.
//!
//! The crate is driver-agnostic: systems under test plug in through
//! [`Driver`], and worker processes are started through [`WorkerLauncher`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod pacing;
pub mod probe;
pub mod protocol;
pub mod runtime;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::BoxedStream;
pub use interfaces::ByteStream;
pub use interfaces::Driver;
pub use interfaces::DriverError;
pub use interfaces::LaunchError;
pub use interfaces::WorkerLauncher;
pub use pacing::Metronome;
pub use pacing::MetronomeKind;
pub use pacing::MetronomeSettings;
pub use pacing::build_metronome;
pub use probe::IntervalHistogram;
pub use probe::Probe;
pub use probe::ProbeError;
pub use probe::ProbeRegistry;
pub use protocol::Connector;
pub use protocol::ProtocolError;
pub use runtime::Coordinator;
pub use runtime::FailureKind;
pub use runtime::FailureRecord;
pub use runtime::InProcessFleet;
pub use runtime::OrchestrationContext;
pub use runtime::RunReport;
pub use runtime::RuntimeError;
pub use runtime::RuntimeSettings;
pub use runtime::TestDefinition;
pub use runtime::TestFailure;
pub use runtime::TestRegistry;
pub use runtime::TestStatus;
pub use runtime::ThreadContext;
pub use telemetry::LogEvent;
pub use telemetry::LogLevel;
pub use telemetry::LogSink;
pub use telemetry::SharedLogSink;
