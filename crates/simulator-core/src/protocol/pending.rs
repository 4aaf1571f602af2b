// simulator-core/src/protocol/pending.rs
// ============================================================================
// Module: Pending Requests
// Description: Correlation table for outstanding requests.
// Purpose: Resolve every request exactly once: reply, timeout or unreachable.
// Dependencies: tokio (oneshot)
// ============================================================================

//! ## Overview
//! Entries are keyed by `(responder, id)`. Resolving an entry removes it,
//! so a reply arriving after the deadline finds nothing and is reported as
//! late instead of completing a second time. Ids come from a 64-bit
//! monotonic sequence and are never reused, so a late reply can never match
//! a newer request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::core::MessageId;
use crate::core::ResponseOutcome;
use crate::core::SimulatorAddress;
use crate::protocol::ProtocolError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Pending-request key.
pub type PendingKey = (SimulatorAddress, MessageId);

/// One outstanding request.
#[derive(Debug)]
struct PendingEntry {
    /// Instant after which the entry resolves as a timeout.
    deadline: Instant,
    /// Completion channel.
    reply: oneshot::Sender<ResponseOutcome>,
}

/// Table of outstanding requests.
#[derive(Debug, Default)]
pub struct PendingTable {
    /// Entries by responder and message id.
    entries: HashMap<PendingKey, PendingEntry>,
}

impl PendingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request awaiting `responder`'s reply to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DuplicatePending`] if the key is already present.
    pub fn register(
        &mut self,
        responder: SimulatorAddress,
        id: MessageId,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<ResponseOutcome>, ProtocolError> {
        let key = (responder, id);
        if self.entries.contains_key(&key) {
            return Err(ProtocolError::DuplicatePending {
                responder,
                id,
            });
        }
        let (reply, receiver) = oneshot::channel();
        self.entries.insert(
            key,
            PendingEntry {
                deadline,
                reply,
            },
        );
        Ok(receiver)
    }

    /// Resolves the entry for `(responder, id)` with `outcome`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LateResponse`] when no entry exists (already
    /// resolved, expired, or never registered).
    pub fn complete(
        &mut self,
        responder: SimulatorAddress,
        id: MessageId,
        outcome: ResponseOutcome,
    ) -> Result<(), ProtocolError> {
        let entry = self.entries.remove(&(responder, id)).ok_or(ProtocolError::LateResponse {
            responder,
            id,
        })?;
        let _ = entry.reply.send(outcome);
        Ok(())
    }

    /// Resolves every entry whose deadline is at or before `now` as
    /// [`ResponseOutcome::Timeout`]; returns the expired keys.
    pub fn expire_due(&mut self, now: Instant) -> Vec<PendingKey> {
        let due: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &due {
            if let Some(entry) = self.entries.remove(key) {
                let _ = entry.reply.send(ResponseOutcome::Timeout);
            }
        }
        due
    }

    /// Resolves every entry as [`ResponseOutcome::Unreachable`].
    pub fn fail_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(ResponseOutcome::Unreachable);
        }
    }

    /// Returns true when `(responder, id)` is outstanding.
    #[must_use]
    pub fn contains(&self, responder: &SimulatorAddress, id: MessageId) -> bool {
        self.entries.contains_key(&(*responder, id))
    }

    /// Returns the number of outstanding entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
