// simulator-core/src/runtime/coordinator.rs
// ============================================================================
// Module: Coordinator Runtime
// Description: Fleet root driving every test through its phases.
// Purpose: Start workers, run test supervisors, collect failures and stats.
// Dependencies: tokio, crate::protocol, crate::runtime
// ============================================================================

//! ## Overview
//! The coordinator owns the fleet view, one [`TestSupervisor`] per test and
//! the performance aggregator, all mutated only by its dispatcher loop.
//! Requests are issued from spawned tasks that report back through an
//! internal channel, so the dispatcher never waits on a worker.
//!
//! Failure handling:
//! - A non-fatal `ExceptionReport` fails its test; the first one is kept.
//! - A fatal report, a closed agent link or a missed heartbeat removes the
//!   worker and fails every test it was assigned to.
//! - A rejected or unanswered phase transition fails the test and counts as
//!   that worker's acknowledgement.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::core::ErrorDetail;
use crate::core::ExceptionReport;
use crate::core::ResponseOutcome;
use crate::core::ResponseResult;
use crate::core::SimulatorAddress;
use crate::core::SimulatorMessage;
use crate::core::SimulatorOperation;
use crate::core::TestCase;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::core::TestSuite;
use crate::interfaces::BoxedStream;
use crate::protocol::Connector;
use crate::protocol::FanOutResponse;
use crate::protocol::Inbound;
use crate::protocol::ProtocolError;
use crate::runtime::RuntimeError;
use crate::runtime::context::OrchestrationContext;
use crate::runtime::failure::FailureKind;
use crate::runtime::failure::FailureRecord;
use crate::runtime::fleet::FleetView;
use crate::runtime::report::PerformanceAggregator;
use crate::runtime::report::RunReport;
use crate::runtime::report::TestReport;
use crate::runtime::settings::duration_ms;
use crate::runtime::supervisor::SupervisorCommand;
use crate::runtime::supervisor::TestStatus;
use crate::runtime::supervisor::TestSupervisor;
use crate::telemetry::LogEvent;
use crate::telemetry::LogLevel;

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Root process of the fleet.
pub struct Coordinator {
    /// Process context.
    context: OrchestrationContext,
    /// Router handle.
    connector: Connector,
    /// Inbound messages and link events.
    inbox: mpsc::UnboundedReceiver<Inbound>,
    /// Attached agents.
    agents: Vec<SimulatorAddress>,
}

impl Coordinator {
    /// Creates a coordinator. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(context: OrchestrationContext) -> Self {
        let (connector, inbox) = Connector::new(
            SimulatorAddress::coordinator(),
            context.settings().connector_settings(),
            context.log_sink(),
        );
        Self {
            context,
            connector,
            inbox,
            agents: Vec::new(),
        }
    }

    /// Returns the router handle.
    #[must_use]
    pub const fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Attaches the link to agent `agent_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the link cannot be attached.
    pub fn attach_agent(&mut self, agent_index: u32, stream: BoxedStream) -> Result<SimulatorAddress, RuntimeError> {
        let agent = SimulatorAddress::agent(agent_index);
        self.connector.attach_child(agent, stream)?;
        self.agents.push(agent);
        Ok(agent)
    }

    /// Starts the workers, runs every test of `suite` and shuts the fleet
    /// down.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoAgents`] when no agent is attached, or
    /// [`RuntimeError::Protocol`] on poisoned routing state.
    pub async fn run(self, suite: &TestSuite) -> Result<RunReport, RuntimeError> {
        if self.agents.is_empty() {
            return Err(RuntimeError::NoAgents);
        }
        let started = Instant::now();
        let Self {
            context,
            connector,
            inbox,
            agents,
        } = self;
        let (events, internal) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher {
            context,
            connector,
            fleet: FleetView::new(),
            aggregator: PerformanceAggregator::new(),
            entries: Vec::with_capacity(suite.len()),
            queue: VecDeque::new(),
            events,
        };
        dispatcher.start_workers(&agents).await?;
        dispatcher.load_suite(suite)?;
        dispatcher.dispatch(inbox, internal).await;
        dispatcher.shutdown().await;
        Ok(dispatcher.report(duration_ms(started.elapsed())))
    }
}

// ============================================================================
// SECTION: Dispatcher State
// ============================================================================

/// Event produced by a coordinator task.
#[derive(Debug)]
enum Internal {
    /// `CreateTest` answered.
    TestCreated {
        /// Entry index.
        entry: usize,
        /// Fan-out result.
        response: Result<FanOutResponse, ProtocolError>,
    },
    /// `PhaseTransition` requests answered.
    Transition {
        /// Entry index.
        entry: usize,
        /// Phase requested.
        phase: TestPhase,
        /// Outcome per test-level responder.
        outcomes: BTreeMap<SimulatorAddress, ResponseOutcome>,
    },
    /// The RUN duration of an entry elapsed.
    RunDeadline {
        /// Entry index.
        entry: usize,
    },
}

/// Progress of one test.
#[derive(Debug)]
enum Slot {
    /// Waiting for its turn.
    Queued,
    /// `CreateTest` in flight.
    Creating,
    /// Supervised by the phase state machine.
    Active(Box<TestSupervisor>),
    /// Finished.
    Done {
        /// Final status.
        status: TestStatus,
        /// First recorded failure.
        failure: Option<FailureRecord>,
    },
}

/// One test of the suite.
#[derive(Debug)]
struct TestEntry {
    /// Test case with overrides applied.
    test_case: TestCase,
    /// Index used in test-level addresses.
    index: u32,
    /// Progress.
    slot: Slot,
    /// Abort requested while creating.
    abort_reason: Option<String>,
}

/// Mutable coordinator state owned by the dispatcher loop.
struct Dispatcher {
    /// Process context.
    context: OrchestrationContext,
    /// Router handle.
    connector: Connector,
    /// Worker runtime states.
    fleet: FleetView,
    /// Merged performance stats.
    aggregator: PerformanceAggregator,
    /// Tests in suite order.
    entries: Vec<TestEntry>,
    /// Entries waiting to start.
    queue: VecDeque<usize>,
    /// Internal event sender.
    events: mpsc::UnboundedSender<Internal>,
}

impl Dispatcher {
    /// Logs a coordinator event.
    fn log(&self, event: &'static str, level: LogLevel, message: impl Into<String>) {
        self.context.log(event, level, SimulatorAddress::coordinator(), message);
    }

    /// Logs a coordinator event about one test.
    fn log_test(&self, event: &'static str, level: LogLevel, test_id: &TestId, message: impl Into<String>) {
        self.context.record(
            &LogEvent::new(event, level, SimulatorAddress::coordinator(), message).with_test(test_id),
        );
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Asks every agent to start its workers and registers those that came up.
    async fn start_workers(&mut self, agents: &[SimulatorAddress]) -> Result<(), RuntimeError> {
        let settings = self.context.settings();
        let mut launches = JoinSet::new();
        for agent in agents {
            for worker_index in 1..=settings.workers_per_agent {
                let Some(worker) = agent.child(worker_index) else {
                    continue;
                };
                let delay_ms = settings.worker_delay_ms(worker_index);
                let operation = SimulatorOperation::CreateWorker {
                    parameters: settings.worker_parameters(worker_index),
                    delay_ms,
                };
                let timeout = settings.request_timeout + Duration::from_millis(delay_ms);
                let connector = self.connector.clone();
                let agent = *agent;
                launches.spawn(async move { (worker, connector.request(agent, operation, timeout).await) });
            }
        }
        while let Some(joined) = launches.join_next().await {
            let Ok((worker, response)) = joined else {
                continue;
            };
            let outcome = response.map(|response| {
                response.outcomes().values().next().cloned().unwrap_or(ResponseOutcome::Unreachable)
            });
            match outcome {
                Ok(outcome) if outcome.is_success() => {
                    self.connector.register(worker)?;
                    self.fleet.register(worker, Instant::now());
                    self.log("worker_registered", LogLevel::Info, format!("{worker} is up"));
                }
                Ok(outcome) => {
                    self.log("worker_start_failed", LogLevel::Error, format!("{worker}: {outcome}"));
                }
                Err(err) => {
                    self.log("worker_start_failed", LogLevel::Error, format!("{worker}: {err}"));
                }
            }
        }
        if self.fleet.is_empty() {
            self.log("no_workers", LogLevel::Error, "no worker started; every test will fail");
        }
        Ok(())
    }

    /// Builds the test entries and starts the first test(s).
    fn load_suite(&mut self, suite: &TestSuite) -> Result<(), RuntimeError> {
        for (position, test_case) in suite.tests().iter().enumerate() {
            let index = u32::try_from(position + 1).map_err(|_| RuntimeError::TooManyTests)?;
            self.entries.push(TestEntry {
                test_case: test_case.clone(),
                index,
                slot: Slot::Queued,
                abort_reason: None,
            });
            self.queue.push_back(position);
        }
        let parallel = self.context.settings().parallel;
        while let Some(entry) = self.queue.pop_front() {
            self.create_test(entry);
            if !parallel {
                break;
            }
        }
        Ok(())
    }

    /// Starts the next queued test in sequential mode.
    fn start_next(&mut self) {
        if self.context.settings().parallel {
            return;
        }
        if let Some(entry) = self.queue.pop_front() {
            self.create_test(entry);
        }
    }

    /// Installs a test on every worker.
    fn create_test(&mut self, entry: usize) {
        let Some(test) = self.entries.get_mut(entry) else {
            return;
        };
        let test_id = test.test_case.id().clone();
        let run_bounded = !self.context.settings().run_duration.is_zero()
            || matches!(test.test_case.u64_property("iterations"), Ok(Some(_)));
        if !run_bounded {
            let record = FailureRecord::new(
                test_id.clone(),
                None,
                None,
                FailureKind::Creation,
                ErrorDetail::new("creation", "zero run duration requires the `iterations` property"),
            );
            test.slot = Slot::Done {
                status: TestStatus::Failed(FailureKind::Creation),
                failure: Some(record),
            };
            self.log_test("test_rejected", LogLevel::Error, &test_id, "RUN would never end");
            self.on_finished(entry, TestStatus::Failed(FailureKind::Creation));
            return;
        }
        test.slot = Slot::Creating;
        let operation = SimulatorOperation::CreateTest {
            test_index: test.index,
            test_case: test.test_case.clone(),
        };
        let connector = self.connector.clone();
        let events = self.events.clone();
        let timeout = self.context.settings().request_timeout;
        self.log_test("test_creating", LogLevel::Info, &test_id, "installing test on workers");
        tokio::spawn(async move {
            let response = connector.request(SimulatorAddress::all_workers(None), operation, timeout).await;
            let _ = events.send(Internal::TestCreated {
                entry,
                response,
            });
        });
    }

    // ------------------------------------------------------------------------
    // Dispatch Loop
    // ------------------------------------------------------------------------

    /// Processes events until every test finished.
    async fn dispatch(
        &mut self,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let period = self.context.settings().heartbeat_interval.max(Duration::from_millis(10));
        let mut liveness = tokio::time::interval(period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.all_finished() {
            tokio::select! {
                Some(inbound) = inbox.recv() => self.on_inbound(inbound),
                Some(event) = internal.recv() => self.on_internal(event),
                _ = liveness.tick() => self.check_liveness(),
            }
        }
    }

    /// Returns true when every entry is done.
    fn all_finished(&self) -> bool {
        self.entries.iter().all(|entry| matches!(entry.slot, Slot::Done { .. }))
    }

    /// Handles an inbound message or link event.
    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message(message) => self.on_message(message),
            Inbound::LinkClosed(agent) => {
                self.log("agent_lost", LogLevel::Error, format!("link to {agent} closed"));
                let lost: Vec<SimulatorAddress> = self
                    .fleet
                    .addresses()
                    .into_iter()
                    .filter(|worker| worker.agent_index() == agent.agent_index())
                    .collect();
                for worker in lost {
                    self.worker_lost(worker, ErrorDetail::new("worker-lost", format!("agent {agent} disconnected")));
                }
            }
        }
    }

    /// Handles a message addressed to the coordinator.
    fn on_message(&mut self, message: SimulatorMessage) {
        let source = message.source;
        self.fleet.heartbeat(&source, Instant::now());
        match &message.operation {
            SimulatorOperation::PhaseCompleted {
                test_id,
                phase,
            } => self.on_phase_completed(source, test_id, *phase),
            SimulatorOperation::ExceptionReport(report) => self.on_exception(report),
            SimulatorOperation::Heartbeat {
                ..
            } => {}
            SimulatorOperation::Log {
                message: text,
                level,
            } => self.context.record(&LogEvent::new("worker_log", *level, source, text.clone())),
            SimulatorOperation::PerformanceStats {
                test_id,
                probes,
            } => match self.aggregator.record(test_id, probes) {
                Ok(operations) => self.log_test(
                    "performance_interval",
                    LogLevel::Debug,
                    test_id,
                    format!("{source}: {operations} operations"),
                ),
                Err(err) => self.log_test("performance_rejected", LogLevel::Warn, test_id, err.to_string()),
            },
            other => {
                self.log("unexpected_operation", LogLevel::Debug, format!("ignored `{}` from {source}", other.tag()));
                if message.expects_reply
                    && let Err(err) = self.connector.reply(
                        &message,
                        SimulatorAddress::coordinator(),
                        ResponseResult::UnsupportedOperation,
                        Some(format!("coordinator does not handle `{}`", other.tag())),
                    )
                {
                    self.log("reply_failed", LogLevel::Warn, err.to_string());
                }
            }
        }
    }

    /// Handles an internal event.
    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::TestCreated {
                entry,
                response,
            } => self.on_test_created(entry, response),
            Internal::Transition {
                entry,
                phase,
                outcomes,
            } => self.on_transition(entry, phase, &outcomes),
            Internal::RunDeadline {
                entry,
            } => {
                if let Some(commands) = self.supervisor(entry).map(TestSupervisor::on_run_deadline) {
                    self.apply(entry, commands);
                }
            }
        }
    }

    /// Returns the supervisor of an active entry.
    fn supervisor(&mut self, entry: usize) -> Option<&mut TestSupervisor> {
        match self.entries.get_mut(entry).map(|test| &mut test.slot) {
            Some(Slot::Active(supervisor)) => Some(supervisor.as_mut()),
            _ => None,
        }
    }

    /// Returns the entry index of `test_id`.
    fn entry_of(&self, test_id: &TestId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.test_case.id() == test_id)
    }

    // ------------------------------------------------------------------------
    // Test Lifecycle
    // ------------------------------------------------------------------------

    /// Creates the supervisor once `CreateTest` was answered and starts it.
    fn on_test_created(&mut self, entry: usize, response: Result<FanOutResponse, ProtocolError>) {
        let Some(test) = self.entries.get(entry) else {
            return;
        };
        let test_id = test.test_case.id().clone();
        let index = test.index;
        let abort_reason = test.abort_reason.clone();
        let mut created = Vec::new();
        let mut failures = Vec::new();
        match response {
            Ok(response) => {
                for (worker, outcome) in response.outcomes() {
                    if outcome.is_success() {
                        created.push(*worker);
                    } else {
                        failures.push((*worker, outcome.to_string()));
                    }
                }
            }
            Err(err) => {
                self.log_test("test_create_failed", LogLevel::Error, &test_id, err.to_string());
            }
        }
        for worker in &created {
            if let Some(address) = worker.child(index)
                && let Err(err) = self.connector.register(address)
            {
                self.log("register_failed", LogLevel::Warn, err.to_string());
            }
        }

        let mut supervisor = TestSupervisor::new(
            test_id.clone(),
            index,
            created,
            self.context.settings().verify_enabled,
        );
        for (worker, reason) in failures {
            self.log_test("test_create_failed", LogLevel::Error, &test_id, format!("{worker}: {reason}"));
            supervisor.record_failure(FailureRecord::new(
                test_id.clone(),
                None,
                Some(worker),
                FailureKind::Creation,
                ErrorDetail::new("creation", reason),
            ));
        }
        let mut commands = match supervisor.start() {
            Ok(commands) => commands,
            Err(err) => {
                self.log_test("supervisor_rejected", LogLevel::Error, &test_id, err.to_string());
                Vec::new()
            }
        };
        if let Some(reason) = abort_reason {
            commands.extend(supervisor.abort(&reason));
        }
        if let Some(test) = self.entries.get_mut(entry) {
            test.slot = Slot::Active(Box::new(supervisor));
        }
        self.apply(entry, commands);
    }

    /// Applies the outcome of phase transition requests.
    fn on_transition(&mut self, entry: usize, phase: TestPhase, outcomes: &BTreeMap<SimulatorAddress, ResponseOutcome>) {
        let Some(test_id) = self.entries.get(entry).map(|test| test.test_case.id().clone()) else {
            return;
        };
        for (responder, outcome) in outcomes {
            if outcome.is_success() {
                continue;
            }
            let worker = responder.parent().unwrap_or(*responder);
            let kind = match outcome {
                ResponseOutcome::Timeout | ResponseOutcome::Unreachable => FailureKind::Timeout,
                _ => FailureKind::Exception,
            };
            let record = FailureRecord::new(
                test_id.clone(),
                Some(phase),
                Some(worker),
                kind,
                ErrorDetail::new("transition", format!("{phase} on {worker}: {outcome}")),
            );
            self.log_test("transition_failed", LogLevel::Error, &test_id, record.detail.message.clone());
            self.fleet.mark_failure(&worker, record.clone());
            if let Some(commands) =
                self.supervisor(entry).map(|supervisor| supervisor.on_transition_failed(worker, phase, record))
            {
                self.apply(entry, commands);
            }
        }
    }

    /// Handles a phase acknowledgement.
    fn on_phase_completed(&mut self, worker: SimulatorAddress, test_id: &TestId, phase: TestPhase) {
        let Some(entry) = self.entry_of(test_id) else {
            self.log("unknown_test", LogLevel::Warn, format!("{phase} completion for unknown test `{test_id}`"));
            return;
        };
        match self.supervisor(entry).map(|supervisor| supervisor.on_phase_completed(worker, phase)) {
            Some(Ok(commands)) => {
                self.context.record(
                    &LogEvent::new("phase_acknowledged", LogLevel::Debug, worker, format!("{phase} done"))
                        .with_test(test_id)
                        .with_phase(phase),
                );
                self.apply(entry, commands);
            }
            Some(Err(err)) => self.log_test("unexpected_completion", LogLevel::Warn, test_id, err.to_string()),
            None => self.log_test("unexpected_completion", LogLevel::Warn, test_id, "test is not active"),
        }
    }

    /// Handles a failure report from a worker.
    fn on_exception(&mut self, report: &ExceptionReport) {
        if report.fatal {
            self.log("worker_fatal", LogLevel::Error, format!("{}: {}", report.worker, report.error.message));
            self.worker_lost(report.worker, report.error.clone());
            return;
        }
        let Some(test_id) = &report.test_id else {
            self.log("worker_error", LogLevel::Error, format!("{}: {}", report.worker, report.error.message));
            return;
        };
        let record = FailureRecord::from_report(test_id.clone(), report);
        self.fleet.mark_failure(&report.worker, record.clone());
        let Some(entry) = self.entry_of(test_id) else {
            self.log("unknown_test", LogLevel::Warn, format!("failure for unknown test `{test_id}`"));
            return;
        };
        let first = self.supervisor(entry).is_some_and(|supervisor| supervisor.first_failure().is_none());
        let mut event = LogEvent::new(
            if first { "test_failed" } else { "additional_failure" },
            if first { LogLevel::Error } else { LogLevel::Warn },
            report.worker,
            report.error.message.clone(),
        )
        .with_test(test_id);
        if let Some(phase) = report.phase {
            event = event.with_phase(phase);
        }
        self.context.record(&event);
        if let Some(commands) = self.supervisor(entry).map(|supervisor| supervisor.on_failure(record)) {
            self.apply(entry, commands);
        }
    }

    /// Removes a worker and fails every test assigned to it.
    fn worker_lost(&mut self, worker: SimulatorAddress, detail: ErrorDetail) {
        if self.fleet.remove(&worker).is_none() {
            return;
        }
        if let Err(err) = self.connector.deregister(&worker) {
            self.log("deregister_failed", LogLevel::Warn, err.to_string());
        }
        self.log("worker_lost", LogLevel::Error, format!("{worker}: {}", detail.message));
        for entry in 0..self.entries.len() {
            if let Some(commands) =
                self.supervisor(entry).map(|supervisor| supervisor.on_worker_lost(worker, detail.clone()))
            {
                self.apply(entry, commands);
            }
        }
    }

    /// Declares workers lost after missed heartbeats.
    fn check_liveness(&mut self) {
        let timeout = self.context.settings().worker_lost_timeout;
        for worker in self.fleet.lost_workers(Instant::now(), timeout) {
            let detail = ErrorDetail::new(
                "worker-lost",
                format!("no heartbeat for more than {} ms", duration_ms(timeout)),
            );
            self.worker_lost(worker, detail);
        }
    }

    /// Carries out supervisor commands for an entry.
    fn apply(&mut self, entry: usize, commands: Vec<SupervisorCommand>) {
        let Some((test_id, index)) =
            self.entries.get(entry).map(|test| (test.test_case.id().clone(), test.index))
        else {
            return;
        };
        for command in commands {
            match command {
                SupervisorCommand::StartPhase {
                    phase,
                    targets,
                } => {
                    for worker in &targets {
                        self.fleet.set_phase(worker, &test_id, phase);
                    }
                    self.log_test("phase_started", LogLevel::Info, &test_id, format!("{phase} on {} workers", targets.len()));
                    self.spawn_transition(entry, &test_id, index, phase, targets);
                    let run_duration = self.context.settings().run_duration;
                    if phase == TestPhase::Run && !run_duration.is_zero() {
                        let events = self.events.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(run_duration).await;
                            let _ = events.send(Internal::RunDeadline {
                                entry,
                            });
                        });
                    }
                }
                SupervisorCommand::StopRun {
                    targets,
                } => {
                    for worker in targets {
                        let destination = worker.child(index).unwrap_or(worker);
                        let operation = SimulatorOperation::StopRun {
                            test_id: test_id.clone(),
                        };
                        if let Err(err) = self.connector.post(destination, operation) {
                            self.log_test("stop_run_failed", LogLevel::Warn, &test_id, err.to_string());
                        }
                    }
                }
                SupervisorCommand::Finished {
                    status,
                } => {
                    let failure = self.supervisor(entry).and_then(|supervisor| supervisor.first_failure().cloned());
                    if let Some(test) = self.entries.get_mut(entry) {
                        test.slot = Slot::Done {
                            status,
                            failure,
                        };
                    }
                    self.fleet.clear_test(&test_id);
                    self.log_test("test_finished", LogLevel::Info, &test_id, status.to_string());
                    self.on_finished(entry, status);
                }
            }
        }
    }

    /// Reacts to a finished test: fail-fast aborts and the next test.
    fn on_finished(&mut self, entry: usize, status: TestStatus) {
        let failed_cause = !status.is_completed() && status != TestStatus::Failed(FailureKind::Aborted);
        if failed_cause && self.context.settings().fail_fast {
            let reason = self
                .entries
                .get(entry)
                .map_or_else(String::new, |test| format!("test `{}` failed", test.test_case.id()));
            self.abort_others(entry, &reason);
        }
        self.start_next();
    }

    /// Aborts every unfinished entry except `failed`.
    fn abort_others(&mut self, failed: usize, reason: &str) {
        while let Some(entry) = self.queue.pop_front() {
            if let Some(test) = self.entries.get_mut(entry) {
                let record = FailureRecord::new(
                    test.test_case.id().clone(),
                    None,
                    None,
                    FailureKind::Aborted,
                    ErrorDetail::new("aborted", reason),
                );
                test.slot = Slot::Done {
                    status: TestStatus::Failed(FailureKind::Aborted),
                    failure: Some(record),
                };
            }
        }
        for entry in 0..self.entries.len() {
            if entry == failed {
                continue;
            }
            let commands = match self.entries.get_mut(entry).map(|test| (&mut test.slot, &mut test.abort_reason)) {
                Some((Slot::Creating, abort_reason)) => {
                    *abort_reason = Some(reason.to_string());
                    continue;
                }
                Some((Slot::Active(supervisor), _)) => supervisor.abort(reason),
                _ => continue,
            };
            self.apply(entry, commands);
        }
    }

    /// Sends a phase transition to the targets from a background task.
    fn spawn_transition(
        &self,
        entry: usize,
        test_id: &TestId,
        index: u32,
        phase: TestPhase,
        targets: Vec<SimulatorAddress>,
    ) {
        let destinations: Vec<SimulatorAddress> = targets.iter().filter_map(|worker| worker.child(index)).collect();
        let pattern = SimulatorAddress::test_on_all_workers(index);
        let fan_out = !phase.is_global()
            && self.connector.expand(&pattern).is_ok_and(|mut expanded| {
                expanded.sort();
                let mut wanted = destinations.clone();
                wanted.sort();
                expanded == wanted
            });
        let connector = self.connector.clone();
        let events = self.events.clone();
        let timeout = self.context.settings().request_timeout;
        let test_id = test_id.clone();
        tokio::spawn(async move {
            let operation = SimulatorOperation::PhaseTransition {
                test_id,
                phase,
            };
            let mut outcomes = BTreeMap::new();
            if fan_out {
                match connector.request(pattern, operation, timeout).await {
                    Ok(response) => outcomes.extend(response.outcomes().clone()),
                    Err(err) => {
                        for destination in destinations {
                            outcomes.insert(destination, ResponseOutcome::Failure(err.to_string()));
                        }
                    }
                }
            } else {
                let mut requests = JoinSet::new();
                for destination in destinations {
                    let connector = connector.clone();
                    let operation = operation.clone();
                    requests.spawn(async move {
                        (destination, connector.request(destination, operation, timeout).await)
                    });
                }
                while let Some(joined) = requests.join_next().await {
                    let Ok((destination, response)) = joined else {
                        continue;
                    };
                    match response {
                        Ok(response) => outcomes.extend(response.outcomes().clone()),
                        Err(err) => {
                            outcomes.insert(destination, ResponseOutcome::Failure(err.to_string()));
                        }
                    }
                }
            }
            let _ = events.send(Internal::Transition {
                entry,
                phase,
                outcomes,
            });
        });
    }

    // ------------------------------------------------------------------------
    // Shutdown & Report
    // ------------------------------------------------------------------------

    /// Shuts the fleet down and closes every link.
    async fn shutdown(&self) {
        let timeout = self.context.settings().request_timeout;
        match self.connector.request(SimulatorAddress::all_agents(), SimulatorOperation::Shutdown, timeout).await {
            Ok(response) => {
                for (agent, outcome) in response.failures() {
                    self.log("shutdown_failed", LogLevel::Warn, format!("{agent}: {outcome}"));
                }
            }
            Err(err) => self.log("shutdown_failed", LogLevel::Warn, err.to_string()),
        }
        self.connector.close();
    }

    /// Builds the final report.
    fn report(&self, duration_ms: u64) -> RunReport {
        let tests: Vec<TestReport> = self
            .entries
            .iter()
            .map(|entry| {
                let (status, failure) = match &entry.slot {
                    Slot::Done {
                        status,
                        failure,
                    } => (*status, failure.clone()),
                    _ => (TestStatus::Failed(FailureKind::Aborted), None),
                };
                self.aggregator.test_report(entry.test_case.id(), status, failure)
            })
            .collect();
        for test in &tests {
            self.log_test(
                "test_report",
                LogLevel::Info,
                &test.test_id,
                format!("{} ops={} throughput={:.1}/s", test.status, test.operations, test.throughput_per_second),
            );
        }
        RunReport {
            duration_ms,
            tests,
        }
    }
}
