//! Wire codec and connector routing tests for simulator-core.
// crates/simulator-core/tests/wire_protocol.rs
// =============================================================================
// Module: Wire Protocol Tests
// Description: Exercise framing, unknown operations and multi-hop routing.
// Purpose: Ensure requests resolve exactly once and bad frames fail closed.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::time::Duration;

use simulator_core::MessageId;
use simulator_core::ProtocolError;
use simulator_core::ResponseOutcome;
use simulator_core::ResponseResult;
use simulator_core::SharedLogSink;
use simulator_core::SimulatorAddress;
use simulator_core::SimulatorMessage;
use simulator_core::SimulatorOperation;
use simulator_core::TestId;
use simulator_core::TestPhase;
use simulator_core::protocol::CodecError;
use simulator_core::protocol::Connector;
use simulator_core::protocol::ConnectorSettings;
use simulator_core::protocol::DecodedFrame;
use simulator_core::protocol::Inbound;
use simulator_core::protocol::decode_message;
use simulator_core::protocol::encode_message;
use simulator_core::protocol::read_frame;
use simulator_core::protocol::write_frame;
use simulator_core::telemetry::MemoryLogSink;
use simulator_core::telemetry::NoopLogSink;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const MAX_FRAME: usize = 64 * 1024;
const C: SimulatorAddress = SimulatorAddress::coordinator();
const A1: SimulatorAddress = SimulatorAddress::agent(1);
const A2: SimulatorAddress = SimulatorAddress::agent(2);
const W11: SimulatorAddress = SimulatorAddress::worker(1, 1);
const W12: SimulatorAddress = SimulatorAddress::worker(1, 2);

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        max_frame_bytes: MAX_FRAME,
        reaper_interval: Duration::from_millis(10),
    }
}

fn silent() -> SharedLogSink {
    Arc::new(NoopLogSink)
}

fn connector(address: SimulatorAddress) -> (Connector, UnboundedReceiver<Inbound>) {
    Connector::new(address, settings(), silent())
}

fn link(parent: &Connector, child: &Connector) {
    let (upper, lower) = tokio::io::duplex(MAX_FRAME);
    parent.attach_child(child.address(), upper).unwrap();
    child.attach_parent(parent.address(), lower).unwrap();
}

/// Answers every request arriving at `connector` with `result`.
fn answer(connector: Connector, mut inbox: UnboundedReceiver<Inbound>, result: ResponseResult) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = inbox.recv().await {
            if let Inbound::Message(message) = inbound {
                let responder =
                    if message.destination.is_concrete() { message.destination } else { connector.address() };
                let _ = connector.reply(&message, responder, result, Some(format!("{responder} says no")));
            }
        }
    })
}

async fn next_inbound(inbox: &mut UnboundedReceiver<Inbound>) -> Inbound {
    tokio::time::timeout(Duration::from_secs(5), inbox.recv()).await.unwrap().unwrap()
}

fn heartbeat(id: u64, source: SimulatorAddress) -> Vec<u8> {
    encode_message(&SimulatorMessage::post(MessageId::new(id), source, C, SimulatorOperation::Heartbeat {
        uptime_ms: 5,
    }))
    .unwrap()
}

/// A coordinator connector with a raw child stream standing in for agent 1.
fn coordinator_with_raw_agent() -> (Connector, UnboundedReceiver<Inbound>, DuplexStream) {
    let (coordinator, inbox) = connector(C);
    let (upper, raw) = tokio::io::duplex(MAX_FRAME);
    coordinator.attach_child(A1, upper).unwrap();
    (coordinator, inbox, raw)
}

// ============================================================================
// SECTION: Codec
// ============================================================================

#[test]
fn unknown_tag_decodes_as_unsupported_frame() {
    let payload = br#"{"version":2,"id":7,"source":"C_A1","destination":"C","expects_reply":true,"operation":{"type":"teleport","to":"mars"}}"#;
    match decode_message(payload).unwrap() {
        DecodedFrame::Unsupported(frame) => {
            assert_eq!(frame.tag, "teleport");
            assert_eq!(frame.version, 2);
            assert_eq!(frame.source, A1);
            assert!(frame.expects_reply);
        }
        DecodedFrame::Message(message) => panic!("expected unsupported frame, got {message:?}"),
    }
}

#[test]
fn malformed_payloads_are_rejected_without_being_fatal() {
    let cases: [&[u8]; 3] = [
        b"not json",
        br#"{"version":1,"id":1,"source":"C","destination":"C_A1","operation":{"no_type":true}}"#,
        br#"{"version":1,"id":1,"source":"C","destination":"C_A1","operation":{"type":"heartbeat"}}"#,
    ];
    for payload in cases {
        let err = decode_message(payload).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)), "{err}");
        assert!(!err.is_fatal());
    }
}

#[test]
fn encoded_message_carries_wire_tag_and_text_addresses() {
    let message = SimulatorMessage::request(MessageId::new(3), C, W11, SimulatorOperation::PhaseTransition {
        test_id: TestId::new("t"),
        phase: TestPhase::LocalWarmup,
    });
    let json: serde_json::Value = serde_json::from_slice(&encode_message(&message).unwrap()).unwrap();
    assert_eq!(json["operation"]["type"], "phase_transition");
    assert_eq!(json["operation"]["phase"], "LOCAL_WARMUP");
    assert_eq!(json["destination"], "C_A1_W1");
    assert_eq!(json["expects_reply"], true);
}

#[tokio::test]
async fn frames_respect_the_size_limit() {
    let (mut writer, mut reader) = tokio::io::duplex(1024);
    let err = write_frame(&mut writer, &[0_u8; 300], 256).await.unwrap_err();
    assert!(matches!(err, CodecError::FrameTooLarge { size: 300, limit: 256 }));

    write_frame(&mut writer, b"hello", 256).await.unwrap();
    assert_eq!(read_frame(&mut reader, 256).await.unwrap(), Some(b"hello".to_vec()));

    writer.write_all(&4096_u32.to_be_bytes()).await.unwrap();
    let err = read_frame(&mut reader, 256).await.unwrap_err();
    assert!(err.is_fatal());

    drop(writer);
    assert_eq!(read_frame(&mut reader, 256).await.unwrap(), None);
}

// ============================================================================
// SECTION: Connector
// ============================================================================

#[tokio::test]
async fn wildcard_request_collects_partial_failures() {
    let (coordinator, _inbox) = connector(C);
    let (agent1, inbox1) = connector(A1);
    let (agent2, inbox2) = connector(A2);
    link(&coordinator, &agent1);
    link(&coordinator, &agent2);
    let _one = answer(agent1, inbox1, ResponseResult::Success);
    let _two = answer(agent2, inbox2, ResponseResult::Failure);

    let response = coordinator
        .request(SimulatorAddress::all_agents(), SimulatorOperation::Shutdown, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.outcomes().len(), 2);
    assert_eq!(response.outcome(&A1), Some(&ResponseOutcome::Success));
    assert_eq!(response.outcome(&A2), Some(&ResponseOutcome::Failure("C_A2 says no".to_string())));
    assert!(!response.is_failure());
    assert_eq!(response.successes(), vec![A1]);
    assert_eq!(response.failures().len(), 1);
}

#[tokio::test]
async fn requests_are_forwarded_through_agents_in_both_directions() {
    let (coordinator, _inbox) = connector(C);
    let (agent, _agent_inbox) = connector(A1);
    let (worker1, inbox1) = connector(W11);
    let (worker2, inbox2) = connector(W12);
    link(&coordinator, &agent);
    link(&agent, &worker1);
    link(&agent, &worker2);
    coordinator.register(W11).unwrap();
    coordinator.register(W12).unwrap();
    let _one = answer(worker1, inbox1, ResponseResult::Success);
    let _two = answer(worker2, inbox2, ResponseResult::UnsupportedOperation);

    let single = coordinator
        .request(W11, SimulatorOperation::StopRun { test_id: TestId::new("t") }, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(single.outcome(&W11), Some(&ResponseOutcome::Success));

    let fan_out = coordinator
        .request(SimulatorAddress::all_workers(Some(1)), SimulatorOperation::Shutdown, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(fan_out.outcome(&W11), Some(&ResponseOutcome::Success));
    assert_eq!(fan_out.outcome(&W12), Some(&ResponseOutcome::UnsupportedOperation));
    assert_eq!(coordinator.pending_len().unwrap(), 0);
}

#[tokio::test]
async fn silent_responder_times_out_once_and_late_reply_is_logged() {
    let sink = Arc::new(MemoryLogSink::new());
    let (coordinator, _inbox) = Connector::new(C, settings(), sink.clone());
    let (agent, mut agent_inbox) = connector(A1);
    link(&coordinator, &agent);

    let response =
        coordinator.request(A1, SimulatorOperation::Shutdown, Duration::from_millis(50)).await.unwrap();
    assert_eq!(response.outcome(&A1), Some(&ResponseOutcome::Timeout));
    assert_eq!(coordinator.pending_len().unwrap(), 0);

    let Inbound::Message(request) = next_inbound(&mut agent_inbox).await else {
        panic!("expected the request");
    };
    agent.reply(&request, A1, ResponseResult::Success, None).unwrap();
    for _ in 0..100 {
        if !sink.events_named("late_response").is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("late reply was not logged");
}

#[tokio::test]
async fn unknown_and_unrouted_destinations_fail_fast() {
    let (coordinator, _inbox) = connector(C);
    let err = coordinator
        .request(SimulatorAddress::all_workers(None), SimulatorOperation::Shutdown, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NoResponders(_)));

    let response = coordinator
        .request(SimulatorAddress::agent(3), SimulatorOperation::Shutdown, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(response.outcome(&SimulatorAddress::agent(3)), Some(&ResponseOutcome::Unreachable));
    assert!(matches!(
        coordinator.post(SimulatorAddress::agent(3), SimulatorOperation::Shutdown),
        Err(ProtocolError::Unroutable(_))
    ));
}

#[tokio::test]
async fn unknown_operation_gets_unsupported_reply() {
    let (_coordinator, _inbox, mut raw) = coordinator_with_raw_agent();
    let payload = br#"{"version":9,"id":7,"source":"C_A1","destination":"C","expects_reply":true,"operation":{"type":"teleport"}}"#;
    write_frame(&mut raw, payload, MAX_FRAME).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut raw, MAX_FRAME))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let DecodedFrame::Message(reply) = decode_message(&frame).unwrap() else {
        panic!("expected a response");
    };
    assert!(reply.is_response);
    assert_eq!(reply.id, MessageId::new(7));
    assert_eq!(reply.source, C);
    assert_eq!(reply.destination, A1);
    assert!(matches!(reply.operation, SimulatorOperation::Response {
        result: ResponseResult::UnsupportedOperation,
        ..
    }));
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_link_stays_open() {
    let (_coordinator, mut inbox, mut raw) = coordinator_with_raw_agent();
    write_frame(&mut raw, b"{ broken", MAX_FRAME).await.unwrap();
    write_frame(&mut raw, &heartbeat(2, A1), MAX_FRAME).await.unwrap();

    match next_inbound(&mut inbox).await {
        Inbound::Message(message) => {
            assert_eq!(message.source, A1);
            assert!(matches!(message.operation, SimulatorOperation::Heartbeat { uptime_ms: 5 }));
        }
        Inbound::LinkClosed(peer) => panic!("link to {peer} closed"),
    }
}

#[tokio::test]
async fn oversized_frame_closes_the_link() {
    let (_coordinator, mut inbox, mut raw) = coordinator_with_raw_agent();
    let announced = u32::try_from(MAX_FRAME + 1).unwrap();
    raw.write_all(&announced.to_be_bytes()).await.unwrap();
    assert_eq!(next_inbound(&mut inbox).await, Inbound::LinkClosed(A1));
}

#[tokio::test]
async fn closing_resolves_outstanding_requests_as_unreachable() {
    let (coordinator, _inbox) = connector(C);
    let (agent, _agent_inbox) = connector(A1);
    link(&coordinator, &agent);
    let pending = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.request(A1, SimulatorOperation::Shutdown, Duration::from_secs(30)).await
        })
    };
    for _ in 0..100 {
        if coordinator.pending_len().unwrap() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.close();
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.outcome(&A1), Some(&ResponseOutcome::Unreachable));
}
