// simulator-core/src/protocol/codec.rs
// ============================================================================
// Module: Wire Codec
// Description: Length-prefixed JSON framing for protocol envelopes.
// Purpose: Serialize envelopes and tolerate unknown operation tags.
// Dependencies: serde_json, tokio
// ============================================================================

//! ## Overview
//! Each frame is a 4-byte big-endian length followed by a JSON envelope.
//! The operation is decoded in two steps: the envelope first, with the
//! operation kept as a raw value, then the operation by its `type` tag. An
//! unknown tag yields [`DecodedFrame::Unsupported`] instead of an error so
//! mixed-version peers keep the channel open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::core::MessageId;
use crate::core::SimulatorAddress;
use crate::core::SimulatorMessage;
use crate::core::SimulatorOperation;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Envelope version written by this build.
pub const PROTOCOL_VERSION: u32 = 1;
/// Default maximum frame payload size (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("frame io failed: {0}")]
    Io(#[from] std::io::Error),
    /// A frame exceeded the configured limit; the channel must be closed.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced or actual payload size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The payload is not a valid envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl CodecError {
    /// Returns true when the channel cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::FrameTooLarge { .. })
    }
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Envelope as written on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    /// Writer protocol version.
    version: u32,
    /// Sender-local sequence number.
    id: MessageId,
    /// Sending endpoint.
    source: SimulatorAddress,
    /// Receiving endpoint or pattern.
    destination: SimulatorAddress,
    /// True for replies.
    #[serde(default)]
    is_response: bool,
    /// True when the sender waits for a reply.
    #[serde(default)]
    expects_reply: bool,
    /// Tagged operation payload.
    operation: Value,
}

/// Envelope whose operation tag this build does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFrame {
    /// Writer protocol version.
    pub version: u32,
    /// Sender-local sequence number.
    pub id: MessageId,
    /// Sending endpoint.
    pub source: SimulatorAddress,
    /// Receiving endpoint or pattern.
    pub destination: SimulatorAddress,
    /// True when the sender waits for a reply.
    pub expects_reply: bool,
    /// Unknown operation tag.
    pub tag: String,
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A fully decoded message.
    Message(SimulatorMessage),
    /// An envelope with an unknown operation.
    Unsupported(UnsupportedFrame),
}

// ============================================================================
// SECTION: Encoding
// ============================================================================

/// Serializes a message into a frame payload.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] when serialization fails.
pub fn encode_message(message: &SimulatorMessage) -> Result<Vec<u8>, CodecError> {
    let operation = serde_json::to_value(&message.operation)
        .map_err(|err| CodecError::Malformed(err.to_string()))?;
    let envelope = WireEnvelope {
        version: PROTOCOL_VERSION,
        id: message.id,
        source: message.source,
        destination: message.destination,
        is_response: message.is_response,
        expects_reply: message.expects_reply,
        operation,
    };
    serde_json::to_vec(&envelope).map_err(|err| CodecError::Malformed(err.to_string()))
}

/// Decodes a frame payload.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for invalid JSON, a bad envelope, a
/// missing tag, or a known tag with an invalid body.
pub fn decode_message(payload: &[u8]) -> Result<DecodedFrame, CodecError> {
    let envelope: WireEnvelope =
        serde_json::from_slice(payload).map_err(|err| CodecError::Malformed(err.to_string()))?;
    let tag = envelope
        .operation
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed("operation has no type tag".to_string()))?
        .to_string();
    if !SimulatorOperation::is_known_tag(&tag) {
        return Ok(DecodedFrame::Unsupported(UnsupportedFrame {
            version: envelope.version,
            id: envelope.id,
            source: envelope.source,
            destination: envelope.destination,
            expects_reply: envelope.expects_reply,
            tag,
        }));
    }
    let operation: SimulatorOperation = serde_json::from_value(envelope.operation)
        .map_err(|err| CodecError::Malformed(format!("{tag}: {err}")))?;
    Ok(DecodedFrame::Message(SimulatorMessage {
        id: envelope.id,
        source: envelope.source,
        destination: envelope.destination,
        operation,
        is_response: envelope.is_response,
        expects_reply: envelope.expects_reply,
    }))
}

// ============================================================================
// SECTION: Framing
// ============================================================================

/// Reads one length-prefixed frame; `Ok(None)` on clean end of stream.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] before reading an oversized body,
/// or [`CodecError::Io`] on stream failure.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(CodecError::Io(err)),
    }
    let size = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
    if size > max_bytes {
        return Err(CodecError::FrameTooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut payload = vec![0_u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one length-prefixed frame and flushes.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] when `payload` exceeds `max_bytes`,
/// or [`CodecError::Io`] on stream failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_bytes: usize) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let size = u32::try_from(payload.len()).ok().filter(|_| payload.len() <= max_bytes).ok_or(
        CodecError::FrameTooLarge {
            size: payload.len(),
            limit: max_bytes,
        },
    )?;
    writer.write_all(&size.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
