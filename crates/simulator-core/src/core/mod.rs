// simulator-core/src/core/mod.rs
// ============================================================================
// Module: Simulator Core Types
// Description: Addresses, identifiers, phases, test cases and protocol payloads.
// Purpose: Provide stable, serializable types shared by every fleet process.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Core types are plain data: they carry no I/O and no clocks. Runtime
//! components build on them to route messages and sequence test phases.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod address;
pub mod identifiers;
pub mod message;
pub mod operation;
pub mod phase;
pub mod test_case;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use address::AddressError;
pub use address::AddressLevel;
pub use address::SimulatorAddress;
pub use identifiers::MessageId;
pub use identifiers::MessageIdSequence;
pub use identifiers::TestId;
pub use message::ResponseOutcome;
pub use message::SimulatorMessage;
pub use operation::EncodedIntervalHistogram;
pub use operation::ErrorDetail;
pub use operation::ExceptionReport;
pub use operation::PacingDefaults;
pub use operation::ProbeStats;
pub use operation::ResponseResult;
pub use operation::SimulatorOperation;
pub use operation::WorkerParameters;
pub use phase::PhaseScope;
pub use phase::TestPhase;
pub use test_case::CLASS_PROPERTY;
pub use test_case::DEFAULT_TEST_ID;
pub use test_case::TestCase;
pub use test_case::TestCaseError;
pub use test_case::TestSuite;
