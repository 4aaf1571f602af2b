// simulator-core/src/interfaces/mod.rs
// ============================================================================
// Module: Simulator Interfaces
// Description: Collaborator seams for drivers and worker provisioning.
// Purpose: Keep target-specific clients and process launch out of the core.
// Dependencies: crate::core, thiserror, tokio
// ============================================================================

//! ## Overview
//! The orchestration core talks to a system under test only through a
//! [`Driver`], and starts workers only through a [`WorkerLauncher`]. Both
//! are plain traits so embedders can plug in real clients and real process
//! provisioning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use crate::core::SimulatorAddress;
use crate::core::WorkerParameters;

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Driver errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Driver properties are invalid.
    #[error("invalid driver configuration: {0}")]
    Config(String),
    /// The client instance could not be created.
    #[error("driver instance creation failed: {0}")]
    Create(String),
    /// The client instance could not be closed cleanly.
    #[error("driver instance close failed: {0}")]
    Close(String),
}

/// Client factory for one system under test.
pub trait Driver: Send + Sync + 'static {
    /// Typed driver configuration.
    type Config: Send + Sync;
    /// Client handle shared by every test on a worker.
    type Instance: Send + Sync + 'static;

    /// Parses raw properties into typed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] for invalid properties.
    fn load_properties(&self, raw: &BTreeMap<String, String>) -> Result<Self::Config, DriverError>;

    /// Creates a client instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Create`] when the instance cannot be created.
    fn create_instance(&self, config: &Self::Config) -> Result<Self::Instance, DriverError>;

    /// Closes a client instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Close`] when shutdown fails.
    fn close_instance(&self, instance: &Self::Instance) -> Result<(), DriverError>;
}

// ============================================================================
// SECTION: Worker Launcher
// ============================================================================

/// Bidirectional byte stream connecting two fleet processes.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed byte stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Worker launch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// The worker could not be started.
    #[error("worker {address} launch failed: {reason}")]
    Failed {
        /// Worker address.
        address: SimulatorAddress,
        /// Failure reason.
        reason: String,
    },
}

/// Starts worker processes for an agent.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Starts a worker at `address` and returns the agent's end of its
    /// byte stream. Called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the worker cannot be started.
    fn launch(
        &self,
        address: SimulatorAddress,
        parameters: &WorkerParameters,
    ) -> Result<BoxedStream, LaunchError>;
}
