// simulator-core/src/runtime/worker.rs
// ============================================================================
// Module: Worker Runtime
// Description: Worker process dispatcher hosting installed tests.
// Purpose: Execute phases, report failures, heartbeats and performance stats.
// Dependencies: tokio, crate::protocol, crate::runtime
// ============================================================================

//! ## Overview
//! A worker owns one driver client instance and any number of installed
//! tests. Its dispatcher never blocks: phase bodies run on the blocking pool
//! and report back through a channel. When a phase finishes the worker posts,
//! in this order on the same link, the final performance snapshot (RUN
//! only), an `ExceptionReport` if the phase failed, and `PhaseCompleted`.
//!
//! A driver that cannot create its client instance is fatal: the worker
//! reports it with `fatal = true` and exits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::core::ErrorDetail;
use crate::core::ExceptionReport;
use crate::core::ResponseResult;
use crate::core::SimulatorAddress;
use crate::core::SimulatorMessage;
use crate::core::SimulatorOperation;
use crate::core::TestCase;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::core::WorkerParameters;
use crate::interfaces::BoxedStream;
use crate::interfaces::Driver;
use crate::protocol::Connector;
use crate::protocol::Inbound;
use crate::runtime::RuntimeError;
use crate::runtime::context::OrchestrationContext;
use crate::runtime::definition::TestEnvironment;
use crate::runtime::definition::TestRegistry;
use crate::runtime::failure::TestFailure;
use crate::runtime::settings::duration_ms;
use crate::runtime::test_container::TestContainer;
use crate::telemetry::LogEvent;
use crate::telemetry::LogLevel;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Runs a worker until `Shutdown`, or until its parent link closes.
///
/// # Errors
///
/// Returns [`RuntimeError`] when the link cannot be attached or the driver
/// fails to produce a client instance.
pub async fn run_worker<D: Driver>(
    address: SimulatorAddress,
    parameters: WorkerParameters,
    stream: BoxedStream,
    driver: Arc<D>,
    registry: Arc<TestRegistry<D::Instance>>,
    context: OrchestrationContext,
) -> Result<(), RuntimeError> {
    let (connector, mut inbox) =
        Connector::new(address, context.settings().connector_settings(), context.log_sink());
    let parent = address.parent().unwrap_or_else(SimulatorAddress::coordinator);
    connector.attach_parent(parent, stream)?;

    let instance = match driver
        .load_properties(&parameters.driver_properties)
        .and_then(|config| driver.create_instance(&config))
    {
        Ok(instance) => Arc::new(instance),
        Err(err) => {
            context.log("worker_fatal", LogLevel::Error, address, err.to_string());
            let report = ExceptionReport {
                test_id: None,
                phase: None,
                worker: address,
                error: ErrorDetail::from_error("driver", &err),
                fatal: true,
            };
            connector.post(SimulatorAddress::coordinator(), SimulatorOperation::ExceptionReport(report))?;
            connector.close();
            return Err(err.into());
        }
    };

    let (done, mut completions) = mpsc::unbounded_channel();
    let mut worker = WorkerProcess::<D> {
        address,
        parameters,
        connector,
        context,
        registry,
        instance: Arc::clone(&instance),
        containers: BTreeMap::new(),
        done,
        started: Instant::now(),
    };
    worker.log(LogLevel::Info, "worker_started", "worker ready".to_string());

    let mut heartbeat = ticker(worker.parameters.heartbeat_interval_ms);
    let mut performance = ticker(worker.parameters.performance_interval_ms);
    loop {
        tokio::select! {
            inbound = inbox.recv() => match inbound {
                Some(Inbound::Message(message)) => {
                    if worker.handle(&message) == Flow::Exit {
                        break;
                    }
                }
                Some(Inbound::LinkClosed(peer)) if peer == parent => {
                    worker.log(LogLevel::Warn, "parent_lost", format!("link to {peer} closed"));
                    worker.stop_all_runs();
                    break;
                }
                Some(Inbound::LinkClosed(_)) => {}
                None => break,
            },
            Some(completion) = completions.recv() => worker.complete(completion),
            _ = heartbeat.tick() => worker.heartbeat(),
            _ = performance.tick() => worker.publish_performance(),
        }
    }

    if let Err(err) = driver.close_instance(&instance) {
        worker.log(LogLevel::Warn, "driver_close_failed", err.to_string());
    }
    worker.log(LogLevel::Info, "worker_stopped", "worker exiting".to_string());
    worker.connector.close();
    Ok(())
}

/// Builds a delayed-tick interval with a millisecond period.
fn ticker(period_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Derives the seed of a test on a worker.
fn test_seed(base: u64, worker: SimulatorAddress, test_index: u32) -> u64 {
    let agent = u64::from(worker.agent_index().unwrap_or(0));
    let worker = u64::from(worker.worker_index().unwrap_or(0));
    base ^ (agent << 40 | worker << 20 | u64::from(test_index)).wrapping_mul(0x2545_F491_4F6C_DD1D)
}

// ============================================================================
// SECTION: Worker Process
// ============================================================================

/// Whether the dispatcher keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Keep dispatching.
    Continue,
    /// Leave the dispatch loop.
    Exit,
}

/// Result of a phase executed on the blocking pool.
#[derive(Debug)]
struct PhaseCompletion {
    /// Test identifier.
    test_id: TestId,
    /// Executed phase.
    phase: TestPhase,
    /// Phase outcome.
    result: Result<(), TestFailure>,
}

/// Dispatcher state of a worker.
struct WorkerProcess<D: Driver> {
    /// Worker address.
    address: SimulatorAddress,
    /// Start parameters.
    parameters: WorkerParameters,
    /// Router handle.
    connector: Connector,
    /// Process context.
    context: OrchestrationContext,
    /// Test definitions.
    registry: Arc<TestRegistry<D::Instance>>,
    /// Driver client instance.
    instance: Arc<D::Instance>,
    /// Installed tests.
    containers: BTreeMap<TestId, Arc<TestContainer>>,
    /// Phase completion channel.
    done: mpsc::UnboundedSender<PhaseCompletion>,
    /// Process start time.
    started: Instant,
}

impl<D: Driver> WorkerProcess<D> {
    /// Handles one inbound message.
    fn handle(&mut self, message: &SimulatorMessage) -> Flow {
        match &message.operation {
            SimulatorOperation::CreateTest {
                test_index,
                test_case,
            } => {
                let outcome = self.create_test(*test_index, test_case);
                self.respond(message, self.address, outcome);
                Flow::Continue
            }
            SimulatorOperation::PhaseTransition {
                test_id,
                phase,
            } => {
                let responder = self
                    .containers
                    .get(test_id)
                    .map_or_else(|| self.responder_for(message), |container| container.address());
                let outcome = self.start_phase(test_id, *phase);
                self.respond(message, responder, outcome);
                Flow::Continue
            }
            SimulatorOperation::StopRun {
                test_id,
            } => {
                let outcome = match self.containers.get(test_id) {
                    Some(container) => container.stop_run().map_err(|err| err.to_string()),
                    None => Err(format!("unknown test `{test_id}`")),
                };
                if let Err(reason) = &outcome {
                    self.log(LogLevel::Warn, "stop_run_failed", reason.clone());
                }
                self.respond(message, self.responder_for(message), outcome);
                Flow::Continue
            }
            SimulatorOperation::Shutdown => {
                self.stop_all_runs();
                self.respond(message, self.address, Ok(()));
                Flow::Exit
            }
            other => {
                self.context.log(
                    "unexpected_operation",
                    LogLevel::Debug,
                    self.address,
                    format!("ignored `{}` from {}", other.tag(), message.source),
                );
                if message.expects_reply
                    && let Err(err) = self.connector.reply(
                        message,
                        self.responder_for(message),
                        ResponseResult::UnsupportedOperation,
                        Some(format!("worker does not handle `{}`", other.tag())),
                    )
                {
                    self.log(LogLevel::Warn, "reply_failed", err.to_string());
                }
                Flow::Continue
            }
        }
    }

    /// Returns the responder address for a reply to `message`.
    fn responder_for(&self, message: &SimulatorMessage) -> SimulatorAddress {
        if message.destination.is_concrete() { message.destination } else { self.address }
    }

    /// Sends a success or failure response.
    fn respond(&self, message: &SimulatorMessage, responder: SimulatorAddress, outcome: Result<(), String>) {
        let (result, detail) = match outcome {
            Ok(()) => (ResponseResult::Success, None),
            Err(reason) => (ResponseResult::Failure, Some(reason)),
        };
        if let Err(err) = self.connector.reply(message, responder, result, detail) {
            self.log(LogLevel::Warn, "reply_failed", err.to_string());
        }
    }

    /// Installs a test.
    fn create_test(&mut self, test_index: u32, test_case: &TestCase) -> Result<(), String> {
        if self.containers.contains_key(test_case.id()) {
            return Err(format!("test `{}` is already installed", test_case.id()));
        }
        let address = self
            .address
            .child(test_index)
            .ok_or_else(|| format!("{} cannot host tests", self.address))?;
        let environment = TestEnvironment {
            worker: self.address,
            address,
            instance: Arc::clone(&self.instance),
            pacing: self.parameters.pacing.clone(),
            seed: test_seed(self.parameters.seed, self.address, test_index),
        };
        let instance = self.registry.create(test_case, environment).map_err(|err| err.to_string())?;
        self.containers.insert(test_case.id().clone(), Arc::new(TestContainer::new(address, instance)));
        self.context.record(
            &LogEvent::new("test_created", LogLevel::Info, self.address, format!("installed at {address}"))
                .with_test(test_case.id()),
        );
        Ok(())
    }

    /// Starts `phase` of a test on the blocking pool.
    fn start_phase(&self, test_id: &TestId, phase: TestPhase) -> Result<(), String> {
        let container = self
            .containers
            .get(test_id)
            .map(Arc::clone)
            .ok_or_else(|| format!("unknown test `{test_id}`"))?;
        let control = container.begin_phase(phase).map_err(|err| err.to_string())?;
        self.context.record(
            &LogEvent::new("phase_started", LogLevel::Info, self.address, format!("{phase} started"))
                .with_test(test_id)
                .with_phase(phase),
        );
        let done = self.done.clone();
        let test_id = test_id.clone();
        tokio::spawn(async move {
            let joined = tokio::task::spawn_blocking(move || container.execute(phase, &control)).await;
            let result = joined.unwrap_or_else(|err| Err(TestFailure::Panicked(err.to_string())));
            let _ = done.send(PhaseCompletion {
                test_id,
                phase,
                result,
            });
        });
        Ok(())
    }

    /// Reports a finished phase.
    fn complete(&self, completion: PhaseCompletion) {
        let PhaseCompletion {
            test_id,
            phase,
            result,
        } = completion;
        if phase == TestPhase::Run
            && let Some(container) = self.containers.get(&test_id)
        {
            self.publish_test_performance(&test_id, container);
        }
        if let Err(failure) = result {
            self.context.record(
                &LogEvent::new("phase_failed", LogLevel::Error, self.address, failure.to_string())
                    .with_test(&test_id)
                    .with_phase(phase),
            );
            let report = ExceptionReport {
                test_id: Some(test_id.clone()),
                phase: Some(phase),
                worker: self.address,
                error: failure.to_detail(),
                fatal: false,
            };
            self.post(SimulatorOperation::ExceptionReport(report));
        }
        self.context.record(
            &LogEvent::new("phase_completed", LogLevel::Info, self.address, format!("{phase} completed"))
                .with_test(&test_id)
                .with_phase(phase),
        );
        self.post(SimulatorOperation::PhaseCompleted {
            test_id,
            phase,
        });
    }

    /// Posts a heartbeat.
    fn heartbeat(&self) {
        let uptime_ms = duration_ms(self.started.elapsed());
        self.post(SimulatorOperation::Heartbeat {
            uptime_ms,
        });
    }

    /// Publishes interval stats of every test in RUN.
    fn publish_performance(&self) {
        for (test_id, container) in &self.containers {
            if container.current_phase() == Some(TestPhase::Run) {
                self.publish_test_performance(test_id, container);
            }
        }
    }

    /// Snapshots and posts one test's probes.
    fn publish_test_performance(&self, test_id: &TestId, container: &TestContainer) {
        match container.probes().snapshot_stats() {
            Ok(probes) if probes.is_empty() => {}
            Ok(probes) => self.post(SimulatorOperation::PerformanceStats {
                test_id: test_id.clone(),
                probes,
            }),
            Err(err) => self.log(LogLevel::Warn, "probe_snapshot_failed", err.to_string()),
        }
    }

    /// Stops every RUN phase in progress.
    fn stop_all_runs(&self) {
        for container in self.containers.values() {
            if let Err(err) = container.stop_run() {
                self.log(LogLevel::Warn, "stop_run_failed", err.to_string());
            }
        }
    }

    /// Posts an operation to the coordinator.
    fn post(&self, operation: SimulatorOperation) {
        if let Err(err) = self.connector.post(SimulatorAddress::coordinator(), operation) {
            self.context.log("post_failed", LogLevel::Warn, self.address, err.to_string());
        }
    }

    /// Records a log line and ships warnings and errors to the coordinator.
    fn log(&self, level: LogLevel, event: &'static str, message: String) {
        self.context.record(&LogEvent::new(event, level, self.address, message.clone()));
        if level >= LogLevel::Warn {
            self.post(SimulatorOperation::Log {
                message: format!("{event}: {message}"),
                level,
            });
        }
    }
}
