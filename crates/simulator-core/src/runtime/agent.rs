// simulator-core/src/runtime/agent.rs
// ============================================================================
// Module: Agent Runtime
// Description: Per-machine process that launches and routes to workers.
// Purpose: Start workers on request and relay traffic between tiers.
// Dependencies: tokio, crate::interfaces, crate::protocol
// ============================================================================

//! ## Overview
//! An agent sits between the coordinator and its workers. Routing is done by
//! its [`Connector`]; the agent itself only handles `CreateWorker` (launch
//! through the [`WorkerLauncher`] seam, then attach the worker link) and
//! `Shutdown` (forwarded to its workers). A worker link that closes before
//! shutdown is reported to the coordinator as a fatal worker error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::ErrorDetail;
use crate::core::ExceptionReport;
use crate::core::ResponseResult;
use crate::core::SimulatorAddress;
use crate::core::SimulatorMessage;
use crate::core::SimulatorOperation;
use crate::core::WorkerParameters;
use crate::interfaces::BoxedStream;
use crate::interfaces::WorkerLauncher;
use crate::protocol::Connector;
use crate::protocol::Inbound;
use crate::runtime::RuntimeError;
use crate::runtime::context::OrchestrationContext;
use crate::telemetry::LogLevel;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Runs an agent until shutdown completes or its parent link closes.
///
/// # Errors
///
/// Returns [`RuntimeError`] when the parent link cannot be attached.
pub async fn run_agent<L: WorkerLauncher>(
    address: SimulatorAddress,
    stream: BoxedStream,
    launcher: Arc<L>,
    context: OrchestrationContext,
) -> Result<(), RuntimeError> {
    let (connector, mut inbox) =
        Connector::new(address, context.settings().connector_settings(), context.log_sink());
    let parent = SimulatorAddress::coordinator();
    connector.attach_parent(parent, stream)?;
    context.log("agent_started", LogLevel::Info, address, "agent ready");

    let (launched, mut launches) = tokio::sync::mpsc::unbounded_channel::<SimulatorAddress>();
    let grace = context.settings().request_timeout;
    let mut workers: BTreeSet<SimulatorAddress> = BTreeSet::new();
    let mut shutdown_deadline: Option<Instant> = None;
    loop {
        if shutdown_deadline.is_some() && workers.is_empty() {
            break;
        }
        let deadline = async move {
            match shutdown_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::select! {
            inbound = inbox.recv() => match inbound {
                Some(Inbound::Message(message)) => match &message.operation {
                    SimulatorOperation::CreateWorker { parameters, delay_ms } => {
                        spawn_launch(
                            connector.clone(),
                            Arc::clone(&launcher),
                            context.clone(),
                            message.clone(),
                            parameters.clone(),
                            Duration::from_millis(*delay_ms),
                            launched.clone(),
                        );
                    }
                    SimulatorOperation::Shutdown => {
                        forward_shutdown(&connector, &context);
                        reply(&connector, &context, &message, ResponseResult::Success, None);
                        shutdown_deadline.get_or_insert_with(|| Instant::now() + grace);
                    }
                    other => {
                        context.log(
                            "unexpected_operation",
                            LogLevel::Debug,
                            address,
                            format!("ignored `{}` from {}", other.tag(), message.source),
                        );
                        reply(
                            &connector,
                            &context,
                            &message,
                            ResponseResult::UnsupportedOperation,
                            Some(format!("agent does not handle `{}`", other.tag())),
                        );
                    }
                },
                Some(Inbound::LinkClosed(peer)) if peer == parent => {
                    context.log("parent_lost", LogLevel::Warn, address, "coordinator link closed");
                    forward_shutdown(&connector, &context);
                    shutdown_deadline.get_or_insert_with(|| Instant::now() + grace);
                }
                Some(Inbound::LinkClosed(peer)) => {
                    workers.remove(&peer);
                    if let Err(err) = connector.deregister(&peer) {
                        context.log("deregister_failed", LogLevel::Warn, address, err.to_string());
                    }
                    if shutdown_deadline.is_none() {
                        report_worker_lost(&connector, &context, peer);
                    }
                }
                None => break,
            },
            Some(worker) = launches.recv() => {
                workers.insert(worker);
            }
            () = deadline => {
                context.log(
                    "shutdown_timeout",
                    LogLevel::Warn,
                    address,
                    format!("{} workers did not exit in time", workers.len()),
                );
                break;
            }
        }
    }
    context.log("agent_stopped", LogLevel::Info, address, "agent exiting");
    connector.close();
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Launches a worker after `delay` and answers the `CreateWorker` request.
fn spawn_launch<L: WorkerLauncher>(
    connector: Connector,
    launcher: Arc<L>,
    context: OrchestrationContext,
    request: SimulatorMessage,
    parameters: WorkerParameters,
    delay: Duration,
    launched: tokio::sync::mpsc::UnboundedSender<SimulatorAddress>,
) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let agent = connector.address();
        let outcome = match agent.child(parameters.worker_index) {
            Some(worker) => launcher
                .launch(worker, &parameters)
                .map_err(|err| err.to_string())
                .and_then(|stream| connector.attach_child(worker, stream).map_err(|err| err.to_string()))
                .map(|()| worker),
            None => Err(format!("{agent} cannot host workers")),
        };
        match outcome {
            Ok(worker) => {
                let _ = launched.send(worker);
                context.log("worker_launched", LogLevel::Info, agent, format!("launched {worker}"));
                reply(&connector, &context, &request, ResponseResult::Success, None);
            }
            Err(reason) => {
                context.log("worker_launch_failed", LogLevel::Error, agent, reason.clone());
                reply(&connector, &context, &request, ResponseResult::Failure, Some(reason));
            }
        }
    });
}

/// Forwards `Shutdown` to every worker of this agent.
fn forward_shutdown(connector: &Connector, context: &OrchestrationContext) {
    let agent = connector.address();
    let workers = SimulatorAddress::all_workers(agent.agent_index());
    if connector.post(workers, SimulatorOperation::Shutdown).is_err() {
        context.log("shutdown_forward_skipped", LogLevel::Debug, agent, "no workers attached");
    }
}

/// Reports a worker whose link closed unexpectedly.
fn report_worker_lost(connector: &Connector, context: &OrchestrationContext, worker: SimulatorAddress) {
    let agent = connector.address();
    context.log("worker_lost", LogLevel::Error, agent, format!("link to {worker} closed"));
    let report = ExceptionReport {
        test_id: None,
        phase: None,
        worker,
        error: ErrorDetail::new("worker-lost", format!("link to {worker} closed unexpectedly")),
        fatal: true,
    };
    if let Err(err) =
        connector.post(SimulatorAddress::coordinator(), SimulatorOperation::ExceptionReport(report))
    {
        context.log("post_failed", LogLevel::Warn, agent, err.to_string());
    }
}

/// Answers a request, logging routing failures.
fn reply(
    connector: &Connector,
    context: &OrchestrationContext,
    request: &SimulatorMessage,
    result: ResponseResult,
    message: Option<String>,
) {
    if let Err(err) = connector.reply(request, connector.address(), result, message) {
        context.log("reply_failed", LogLevel::Warn, connector.address(), err.to_string());
    }
}
