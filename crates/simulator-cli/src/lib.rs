// simulator-cli/src/lib.rs
// ============================================================================
// Module: Simulator CLI Library
// Description: Builtin target and command implementations for `simulator`.
// Purpose: Keep command logic testable outside the binary entry point.
// Dependencies: simulator-config, simulator-core
// ============================================================================

//! ## Overview
//! The `simulator` binary runs suites on an in-process fleet against the
//! builtin in-memory key/value target. This library holds that target and
//! the command implementations.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod builtin;
pub mod commands;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builtin::KvDriver;
pub use builtin::KvStore;
pub use builtin::builtin_registry;
pub use commands::CliError;
