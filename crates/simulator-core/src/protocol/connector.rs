// simulator-core/src/protocol/connector.rs
// ============================================================================
// Module: Connector
// Description: Per-process message router over parent and child byte streams.
// Purpose: Send, forward, fan out and correlate protocol messages.
// Dependencies: tokio, crate::protocol::{codec, pending, topology}
// ============================================================================

//! ## Overview
//! A [`Connector`] owns one process's links: at most one parent and any
//! number of children, each a framed byte stream served by a reader and a
//! writer task. Incoming messages are routed in three ways: replies for this
//! process complete pending requests, messages for other subtrees are
//! forwarded, and requests for this process land in the inbox returned by
//! [`Connector::new`]. Handlers never block on a child; they reply through
//! [`Connector::reply`] or issue their own requests from spawned tasks.
//!
//! Wildcard requests are expanded through the connector's [`Topology`] into
//! the expected responders; one pending entry is registered per responder
//! and one copy of the message goes to each distinct next hop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::core::AddressLevel;
use crate::core::MessageIdSequence;
use crate::core::ResponseOutcome;
use crate::core::ResponseResult;
use crate::core::SimulatorAddress;
use crate::core::SimulatorMessage;
use crate::core::SimulatorOperation;
use crate::protocol::ProtocolError;
use crate::protocol::codec::DecodedFrame;
use crate::protocol::codec::UnsupportedFrame;
use crate::protocol::codec::decode_message;
use crate::protocol::codec::encode_message;
use crate::protocol::codec::read_frame;
use crate::protocol::codec::write_frame;
use crate::protocol::pending::PendingTable;
use crate::protocol::topology::Topology;
use crate::telemetry::LogEvent;
use crate::telemetry::LogLevel;
use crate::telemetry::SharedLogSink;

// ============================================================================
// SECTION: Public Types
// ============================================================================

/// Event delivered to the owning process.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A request or post addressed to this process.
    Message(SimulatorMessage),
    /// The link to `peer` closed.
    LinkClosed(SimulatorAddress),
}

/// Connector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Maximum frame payload size.
    pub max_frame_bytes: usize,
    /// Interval between pending-table expiry sweeps.
    pub reaper_interval: Duration,
}

/// Per-responder outcomes of one (possibly fanned-out) request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutResponse {
    /// Outcome per concrete responder.
    outcomes: BTreeMap<SimulatorAddress, ResponseOutcome>,
}

impl FanOutResponse {
    /// Returns the outcome map.
    #[must_use]
    pub const fn outcomes(&self) -> &BTreeMap<SimulatorAddress, ResponseOutcome> {
        &self.outcomes
    }

    /// Returns the outcome for one responder.
    #[must_use]
    pub fn outcome(&self, responder: &SimulatorAddress) -> Option<&ResponseOutcome> {
        self.outcomes.get(responder)
    }

    /// Returns responders that succeeded.
    #[must_use]
    pub fn successes(&self) -> Vec<SimulatorAddress> {
        self.outcomes.iter().filter(|(_, outcome)| outcome.is_success()).map(|(key, _)| *key).collect()
    }

    /// Returns responders that did not succeed, with their outcomes.
    #[must_use]
    pub fn failures(&self) -> Vec<(SimulatorAddress, ResponseOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(key, outcome)| (*key, outcome.clone()))
            .collect()
    }

    /// Returns true when every responder failed (partial failure is not failure).
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcomes.values().all(|outcome| !outcome.is_success())
    }
}

// ============================================================================
// SECTION: Internal Types
// ============================================================================

/// Frame queued on a link writer.
#[derive(Debug)]
enum Outbound {
    /// Message to encode.
    Message(SimulatorMessage),
    /// Already encoded frame forwarded unchanged.
    Raw(Vec<u8>),
}

/// Link direction relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRole {
    /// Toward the coordinator.
    Parent,
    /// Away from the coordinator.
    Child,
}

/// Writer handle for one peer.
#[derive(Debug, Clone)]
struct Link {
    /// Peer address.
    peer: SimulatorAddress,
    /// Writer queue.
    sender: mpsc::UnboundedSender<Outbound>,
}

/// All links of a process.
#[derive(Debug, Default)]
struct Links {
    /// Link toward the coordinator.
    parent: Option<Link>,
    /// Links to children by address.
    children: BTreeMap<SimulatorAddress, Link>,
}

/// Shared connector state.
struct ConnectorInner {
    /// Local address.
    address: SimulatorAddress,
    /// Message id source.
    ids: MessageIdSequence,
    /// Outstanding requests.
    pending: Mutex<PendingTable>,
    /// Peer links.
    links: Mutex<Links>,
    /// Known endpoints below this process.
    topology: Mutex<Topology>,
    /// Local delivery queue.
    inbox: mpsc::UnboundedSender<Inbound>,
    /// Log sink.
    log: SharedLogSink,
    /// Tuning.
    settings: ConnectorSettings,
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Cloneable handle to a process's router.
#[derive(Clone)]
pub struct Connector {
    /// Shared state.
    inner: Arc<ConnectorInner>,
}

impl Connector {
    /// Creates a connector and its inbox, and starts the pending-table reaper.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        address: SimulatorAddress,
        settings: ConnectorSettings,
        log: SharedLogSink,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectorInner {
            address,
            ids: MessageIdSequence::new(),
            pending: Mutex::new(PendingTable::new()),
            links: Mutex::new(Links::default()),
            topology: Mutex::new(Topology::new()),
            inbox,
            log,
            settings,
        });
        spawn_reaper(Arc::downgrade(&inner), settings.reaper_interval);
        (
            Self {
                inner,
            },
            receiver,
        )
    }

    /// Returns the local address.
    #[must_use]
    pub fn address(&self) -> SimulatorAddress {
        self.inner.address
    }

    /// Attaches the link toward the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when link state is poisoned.
    pub fn attach_parent<S>(&self, peer: SimulatorAddress, stream: S) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.attach(peer, LinkRole::Parent, stream)
    }

    /// Attaches a link to a child process and registers it in the topology.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when link state is poisoned.
    pub fn attach_child<S>(&self, peer: SimulatorAddress, stream: S) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.attach(peer, LinkRole::Child, stream)?;
        self.register(peer)?;
        Ok(())
    }

    /// Registers a concrete endpoint for wildcard expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when the topology lock is poisoned.
    pub fn register(&self, address: SimulatorAddress) -> Result<bool, ProtocolError> {
        Ok(self.inner.topology.lock().map_err(|_| ProtocolError::Poisoned)?.register(address))
    }

    /// Removes an endpoint and its subtree from wildcard expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when the topology lock is poisoned.
    pub fn deregister(
        &self,
        address: &SimulatorAddress,
    ) -> Result<Vec<SimulatorAddress>, ProtocolError> {
        Ok(self.inner.topology.lock().map_err(|_| ProtocolError::Poisoned)?.remove(address))
    }

    /// Expands `pattern` against the registered endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when the topology lock is poisoned.
    pub fn expand(&self, pattern: &SimulatorAddress) -> Result<Vec<SimulatorAddress>, ProtocolError> {
        Ok(self.inner.topology.lock().map_err(|_| ProtocolError::Poisoned)?.expand(pattern))
    }

    /// Sends a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when no route exists or state is poisoned.
    pub fn post(
        &self,
        destination: SimulatorAddress,
        operation: SimulatorOperation,
    ) -> Result<(), ProtocolError> {
        let message =
            SimulatorMessage::post(self.inner.ids.next_id(), self.inner.address, destination, operation);
        if self.inner.route(message, None)? == 0 {
            return Err(ProtocolError::Unroutable(destination));
        }
        Ok(())
    }

    /// Sends a request and waits for every expected responder to resolve.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NoResponders`] when a wildcard expands to
    /// nothing, or [`ProtocolError::Poisoned`] on poisoned state.
    pub async fn request(
        &self,
        destination: SimulatorAddress,
        operation: SimulatorOperation,
        timeout: Duration,
    ) -> Result<FanOutResponse, ProtocolError> {
        let inner = &self.inner;
        let id = inner.ids.next_id();
        let message = SimulatorMessage::request(id, inner.address, destination, operation);
        let expected = if destination.is_concrete() {
            vec![destination]
        } else {
            self.expand(&destination)?
        };
        if expected.is_empty() {
            return Err(ProtocolError::NoResponders(destination));
        }
        let deadline = Instant::now() + timeout;
        let mut outcomes = BTreeMap::new();
        let mut waiting = Vec::new();
        {
            let links = inner.links.lock().map_err(|_| ProtocolError::Poisoned)?;
            let mut pending = inner.pending.lock().map_err(|_| ProtocolError::Poisoned)?;
            for responder in expected {
                if inner.has_route(&links, &responder) {
                    waiting.push((responder, pending.register(responder, id, deadline)?));
                } else {
                    outcomes.insert(responder, ResponseOutcome::Unreachable);
                }
            }
        }
        if !waiting.is_empty() {
            inner.route(message, None)?;
        }
        for (responder, receiver) in waiting {
            let outcome = receiver.await.unwrap_or(ResponseOutcome::Unreachable);
            outcomes.insert(responder, outcome);
        }
        Ok(FanOutResponse {
            outcomes,
        })
    }

    /// Replies to `request` on behalf of `responder`; no-op for posts.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the reply cannot be routed.
    pub fn reply(
        &self,
        request: &SimulatorMessage,
        responder: SimulatorAddress,
        result: ResponseResult,
        message: Option<String>,
    ) -> Result<(), ProtocolError> {
        if !request.expects_reply {
            return Ok(());
        }
        self.inner.accept(request.reply(responder, result, message), None);
        Ok(())
    }

    /// Resolves overdue requests as timeouts; returns how many expired.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when the pending lock is poisoned.
    pub fn expire_pending(&self, now: Instant) -> Result<usize, ProtocolError> {
        self.inner.expire_pending(now)
    }

    /// Returns the number of outstanding requests.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Poisoned`] when the pending lock is poisoned.
    pub fn pending_len(&self) -> Result<usize, ProtocolError> {
        Ok(self.inner.pending.lock().map_err(|_| ProtocolError::Poisoned)?.len())
    }

    /// Drops every link and resolves outstanding requests as unreachable.
    pub fn close(&self) {
        if let Ok(mut links) = self.inner.links.lock() {
            links.parent = None;
            links.children.clear();
        }
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.fail_all();
        }
    }

    /// Logs an event from this process.
    pub fn log(&self, event: LogEvent) {
        self.inner.log.record(&event);
    }

    /// Spawns the reader and writer tasks of one link.
    fn attach<S>(&self, peer: SimulatorAddress, role: LinkRole, stream: S) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (sender, mut queue) = mpsc::unbounded_channel::<Outbound>();
        {
            let mut links = self.inner.links.lock().map_err(|_| ProtocolError::Poisoned)?;
            let link = Link {
                peer,
                sender,
            };
            match role {
                LinkRole::Parent => links.parent = Some(link),
                LinkRole::Child => {
                    links.children.insert(peer, link);
                }
            }
        }

        let max_frame_bytes = self.inner.settings.max_frame_bytes;
        let writer_log = Arc::clone(&self.inner.log);
        let local = self.inner.address;
        tokio::spawn(async move {
            while let Some(outbound) = queue.recv().await {
                let payload = match outbound {
                    Outbound::Message(message) => match encode_message(&message) {
                        Ok(payload) => payload,
                        Err(err) => {
                            writer_log.record(&LogEvent::new(
                                "encode_failed",
                                LogLevel::Error,
                                local,
                                err.to_string(),
                            ));
                            continue;
                        }
                    },
                    Outbound::Raw(payload) => payload,
                };
                if let Err(err) = write_frame(&mut writer, &payload, max_frame_bytes).await {
                    writer_log.record(&LogEvent::new(
                        "write_failed",
                        LogLevel::Warn,
                        local,
                        format!("link to {peer}: {err}"),
                    ));
                    if err.is_fatal() {
                        break;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader, max_frame_bytes).await {
                    Ok(Some(payload)) => match decode_message(&payload) {
                        Ok(DecodedFrame::Message(message)) => inner.accept(message, Some(peer)),
                        Ok(DecodedFrame::Unsupported(frame)) => {
                            inner.accept_unsupported(&frame, payload, peer);
                        }
                        Err(err) => inner.log_event(
                            "malformed_frame",
                            LogLevel::Warn,
                            format!("dropped frame from {peer}: {err}"),
                        ),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        inner.log_event(
                            "link_failed",
                            LogLevel::Error,
                            format!("closing link to {peer}: {err}"),
                        );
                        break;
                    }
                }
            }
            inner.detach(peer, role);
            let _ = inner.inbox.send(Inbound::LinkClosed(peer));
        });
        Ok(())
    }
}

// ============================================================================
// SECTION: Routing
// ============================================================================

impl ConnectorInner {
    /// Handles a decoded message arriving from `from`.
    fn accept(&self, message: SimulatorMessage, from: Option<SimulatorAddress>) {
        let local = delivers_locally(&self.address, &message.destination);
        if message.is_response && local {
            let SimulatorOperation::Response {
                result,
                message: detail,
            } = message.operation
            else {
                self.log_event(
                    "malformed_response",
                    LogLevel::Warn,
                    format!("response {} from {} carries no result", message.id, message.source),
                );
                return;
            };
            let outcome = ResponseOutcome::from_response(result, detail);
            let completed = self
                .pending
                .lock()
                .map_err(|_| ProtocolError::Poisoned)
                .and_then(|mut pending| pending.complete(message.source, message.id, outcome));
            if let Err(err) = completed {
                self.log_event("late_response", LogLevel::Warn, err.to_string());
            }
            return;
        }
        match self.route(message, from) {
            Ok(0) => self.log_event(
                "unroutable",
                LogLevel::Debug,
                "message dropped: no local handler or next hop".to_string(),
            ),
            Ok(_) => {}
            Err(err) => self.log_event("route_failed", LogLevel::Warn, err.to_string()),
        }
    }

    /// Handles a frame with an unknown operation tag.
    fn accept_unsupported(&self, frame: &UnsupportedFrame, payload: Vec<u8>, from: SimulatorAddress) {
        if !delivers_locally(&self.address, &frame.destination) {
            let forwarded = self.links.lock().map(|links| {
                self.next_hops(&links, &frame.destination, Some(from))
                    .into_iter()
                    .filter(|link| link.sender.send(Outbound::Raw(payload.clone())).is_ok())
                    .count()
            });
            if matches!(forwarded, Ok(count) if count > 0) {
                return;
            }
        }
        self.log_event(
            "unsupported_operation",
            LogLevel::Warn,
            format!(
                "skipped `{}` from {} (protocol version {})",
                frame.tag, frame.source, frame.version
            ),
        );
        if frame.expects_reply {
            let responder =
                if frame.destination.is_concrete() { frame.destination } else { self.address };
            let reply = SimulatorMessage {
                id: frame.id,
                source: responder,
                destination: frame.source,
                operation: SimulatorOperation::Response {
                    result: ResponseResult::UnsupportedOperation,
                    message: Some(format!("unsupported operation `{}`", frame.tag)),
                },
                is_response: true,
                expects_reply: false,
            };
            self.accept(reply, None);
        }
    }

    /// Delivers locally and/or forwards; returns the number of deliveries.
    fn route(
        &self,
        message: SimulatorMessage,
        from: Option<SimulatorAddress>,
    ) -> Result<usize, ProtocolError> {
        let hops = {
            let links = self.links.lock().map_err(|_| ProtocolError::Poisoned)?;
            self.next_hops(&links, &message.destination, from)
        };
        let local = delivers_locally(&self.address, &message.destination);
        let mut delivered = 0;
        for link in hops {
            if link.sender.send(Outbound::Message(message.clone())).is_ok() {
                delivered += 1;
            }
        }
        if local && !message.is_response && self.inbox.send(Inbound::Message(message)).is_ok() {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Returns the links a message for `destination` must be copied to.
    fn next_hops(
        &self,
        links: &Links,
        destination: &SimulatorAddress,
        from: Option<SimulatorAddress>,
    ) -> Vec<Link> {
        let mut hops: Vec<Link> = links
            .children
            .values()
            .filter(|link| Some(link.peer) != from && link.peer.covers(destination))
            .cloned()
            .collect();
        if let Some(parent) = &links.parent
            && Some(parent.peer) != from
            && !self.address.covers(destination)
        {
            hops.push(parent.clone());
        }
        hops
    }

    /// Returns true when a reply from `responder` can reach this process.
    fn has_route(&self, links: &Links, responder: &SimulatorAddress) -> bool {
        delivers_locally(&self.address, responder) || !self.next_hops(links, responder, None).is_empty()
    }

    /// Removes the link to `peer`.
    fn detach(&self, peer: SimulatorAddress, role: LinkRole) {
        if let Ok(mut links) = self.links.lock() {
            match role {
                LinkRole::Parent => {
                    if links.parent.as_ref().is_some_and(|link| link.peer == peer) {
                        links.parent = None;
                    }
                }
                LinkRole::Child => {
                    links.children.remove(&peer);
                }
            }
        }
    }

    /// Expires overdue pending entries.
    fn expire_pending(&self, now: Instant) -> Result<usize, ProtocolError> {
        let expired = self.pending.lock().map_err(|_| ProtocolError::Poisoned)?.expire_due(now);
        for (responder, id) in &expired {
            self.log_event(
                "request_timeout",
                LogLevel::Warn,
                format!("request {id} to {responder} timed out"),
            );
        }
        Ok(expired.len())
    }

    /// Records a log event with this process as source.
    fn log_event(&self, event: &'static str, level: LogLevel, message: String) {
        self.log.record(&LogEvent::new(event, level, self.address, message));
    }
}

/// Returns true when a message for `destination` is handled by the process
/// at `local` (workers also handle their test-level addresses).
#[must_use]
pub fn delivers_locally(local: &SimulatorAddress, destination: &SimulatorAddress) -> bool {
    destination.matches(local)
        || (local.level() == AddressLevel::Worker
            && destination.level() == AddressLevel::Test
            && local.covers(destination))
}

/// Periodically expires pending requests until the connector is dropped.
fn spawn_reaper(inner: Weak<ConnectorInner>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let _ = inner.expire_pending(Instant::now());
        }
    });
}
