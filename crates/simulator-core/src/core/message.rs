// simulator-core/src/core/message.rs
// ============================================================================
// Module: Simulator Messages
// Description: Protocol envelope and sender-side response outcomes.
// Purpose: Correlate requests and responses across the fleet tree.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`SimulatorMessage`] moves an operation from a source address to a
//! (possibly wildcard) destination. A reply reuses the request `id`, swaps
//! the direction, and names the concrete responder as its source, so the
//! sender can match it by `(responder, id)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::address::SimulatorAddress;
use crate::core::identifiers::MessageId;
use crate::core::operation::ResponseResult;
use crate::core::operation::SimulatorOperation;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorMessage {
    /// Sender-local sequence number.
    pub id: MessageId,
    /// Sending endpoint.
    pub source: SimulatorAddress,
    /// Receiving endpoint or pattern.
    pub destination: SimulatorAddress,
    /// Payload.
    pub operation: SimulatorOperation,
    /// True for replies.
    pub is_response: bool,
    /// True when the sender waits for a reply.
    pub expects_reply: bool,
}

impl SimulatorMessage {
    /// Creates a request that expects a reply.
    #[must_use]
    pub const fn request(
        id: MessageId,
        source: SimulatorAddress,
        destination: SimulatorAddress,
        operation: SimulatorOperation,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            operation,
            is_response: false,
            expects_reply: true,
        }
    }

    /// Creates a fire-and-forget message.
    #[must_use]
    pub const fn post(
        id: MessageId,
        source: SimulatorAddress,
        destination: SimulatorAddress,
        operation: SimulatorOperation,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            operation,
            is_response: false,
            expects_reply: false,
        }
    }

    /// Builds the reply sent by `responder` for this request.
    #[must_use]
    pub const fn reply(
        &self,
        responder: SimulatorAddress,
        result: ResponseResult,
        message: Option<String>,
    ) -> Self {
        Self {
            id: self.id,
            source: responder,
            destination: self.source,
            operation: SimulatorOperation::Response {
                result,
                message,
            },
            is_response: true,
            expects_reply: false,
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Terminal outcome of one request as observed by its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The responder handled the request.
    Success,
    /// The responder reported a failure.
    Failure(String),
    /// The responder does not support the operation.
    UnsupportedOperation,
    /// No reply arrived before the deadline.
    Timeout,
    /// No route to the responder exists.
    Unreachable,
}

impl ResponseOutcome {
    /// Maps a reply payload into an outcome.
    #[must_use]
    pub fn from_response(result: ResponseResult, message: Option<String>) -> Self {
        match result {
            ResponseResult::Success => Self::Success,
            ResponseResult::Failure => Self::Failure(message.unwrap_or_default()),
            ResponseResult::UnsupportedOperation => Self::UnsupportedOperation,
        }
    }

    /// Returns true for [`ResponseOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResponseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure(message) => write!(f, "failure: {message}"),
            Self::UnsupportedOperation => f.write_str("unsupported operation"),
            Self::Timeout => f.write_str("timeout"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}
