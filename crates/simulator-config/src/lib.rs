// simulator-config/src/lib.rs
// ============================================================================
// Module: Simulator Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for simulator.toml semantics.
// Dependencies: simulator-core, serde, toml
// ============================================================================

//! ## Overview
//! `simulator-config` defines the TOML configuration of a simulator run. It
//! loads with strict size and path limits, validates fail-closed and converts
//! into the core [`simulator_core::RuntimeSettings`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
