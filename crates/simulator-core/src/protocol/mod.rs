// simulator-core/src/protocol/mod.rs
// ============================================================================
// Module: Message Protocol
// Description: Framing, routing and request/response correlation.
// Purpose: Connect coordinator, agents and workers over byte streams.
// Dependencies: serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! The protocol layer turns byte streams into routed [`crate::SimulatorMessage`]s.
//! Ordering is only guaranteed within one request/response pair; the
//! per-link FIFO order of the underlying stream is an implementation detail
//! callers may rely on only for messages from the same sender.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod codec;
pub mod connector;
pub mod pending;
pub mod topology;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::MessageId;
use crate::core::SimulatorAddress;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use codec::CodecError;
pub use codec::DEFAULT_MAX_FRAME_BYTES;
pub use codec::DecodedFrame;
pub use codec::PROTOCOL_VERSION;
pub use codec::UnsupportedFrame;
pub use codec::decode_message;
pub use codec::encode_message;
pub use codec::read_frame;
pub use codec::write_frame;
pub use connector::Connector;
pub use connector::ConnectorSettings;
pub use connector::FanOutResponse;
pub use connector::Inbound;
pub use connector::delivers_locally;
pub use pending::PendingTable;
pub use topology::Topology;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Routing and correlation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A reply arrived for a request that is no longer pending.
    #[error("late or unmatched response {id} from {responder}")]
    LateResponse {
        /// Replying endpoint.
        responder: SimulatorAddress,
        /// Request id.
        id: MessageId,
    },
    /// A pending entry for the same responder and id already exists.
    #[error("request {id} to {responder} is already pending")]
    DuplicatePending {
        /// Expected responder.
        responder: SimulatorAddress,
        /// Request id.
        id: MessageId,
    },
    /// A wildcard destination matched no known endpoint.
    #[error("no responders for {0}")]
    NoResponders(SimulatorAddress),
    /// No route to the destination exists.
    #[error("no route to {0}")]
    Unroutable(SimulatorAddress),
    /// Shared connector state was poisoned.
    #[error("connector state poisoned")]
    Poisoned,
}
