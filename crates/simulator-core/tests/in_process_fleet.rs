//! In-process fleet tests for simulator-core.
// crates/simulator-core/tests/in_process_fleet.rs
// =============================================================================
// Module: In-Process Fleet Tests
// Description: Run a counting driver across agents and workers over duplex links.
// Purpose: Ensure local phases run everywhere and global phases run once.
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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use simulator_core::Driver;
use simulator_core::DriverError;
use simulator_core::FailureKind;
use simulator_core::InProcessFleet;
use simulator_core::OrchestrationContext;
use simulator_core::PhaseScope;
use simulator_core::RuntimeSettings;
use simulator_core::TestDefinition;
use simulator_core::TestFailure;
use simulator_core::TestPhase;
use simulator_core::TestRegistry;
use simulator_core::TestStatus;
use simulator_core::TestSuite;

/// Hook and timestep counts shared by every worker of the fleet.
#[derive(Debug, Default)]
struct Tally {
    local_warmups: AtomicU64,
    global_warmups: AtomicU64,
    global_verifies: AtomicU64,
    global_teardowns: AtomicU64,
    local_teardowns: AtomicU64,
    operations: AtomicU64,
    instances: AtomicU64,
}

/// Driver handing every worker the same tally.
struct TallyDriver {
    tally: Arc<Tally>,
}

impl Driver for TallyDriver {
    type Config = ();
    type Instance = Arc<Tally>;

    fn load_properties(&self, _raw: &BTreeMap<String, String>) -> Result<Self::Config, DriverError> {
        Ok(())
    }

    fn create_instance(&self, _config: &Self::Config) -> Result<Self::Instance, DriverError> {
        self.tally.instances.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(&self.tally))
    }

    fn close_instance(&self, _instance: &Self::Instance) -> Result<(), DriverError> {
        Ok(())
    }
}

fn bump(counter: &AtomicU64) -> Result<(), TestFailure> {
    counter.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

fn registry(fail_global_verify: bool) -> TestRegistry<Arc<Tally>> {
    let definition =
        TestDefinition::<Arc<Tally>, Arc<Tally>>::new("Tally", |setup| Ok(Arc::clone(setup.instance.as_ref())))
            .prepare(PhaseScope::Local, |tally| bump(&tally.local_warmups))
            .prepare(PhaseScope::Global, |tally| bump(&tally.global_warmups))
            .verify(PhaseScope::Global, move |tally| {
                bump(&tally.global_verifies)?;
                if fail_global_verify {
                    return Err(TestFailure::assertion("totals disagree"));
                }
                Ok(())
            })
            .teardown(PhaseScope::Local, |tally| bump(&tally.local_teardowns))
            .teardown(PhaseScope::Global, |tally| bump(&tally.global_teardowns))
            .timestep("op", None, |tally, _context| bump(&tally.operations));
    let mut registry = TestRegistry::new();
    registry.register(definition).unwrap();
    registry
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        agents: 2,
        workers_per_agent: 2,
        run_duration: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(50),
        worker_lost_timeout: Duration::from_secs(2),
        reaper_interval: Duration::from_millis(20),
        performance_interval: Duration::from_millis(50),
        ..RuntimeSettings::default()
    }
}

async fn run(tally: &Arc<Tally>, fail_global_verify: bool) -> simulator_core::RunReport {
    let driver = Arc::new(TallyDriver {
        tally: Arc::clone(tally),
    });
    let fleet = InProcessFleet::with_driver(
        OrchestrationContext::silent(settings()),
        driver,
        Arc::new(registry(fail_global_verify)),
    )
    .unwrap();
    let suite = TestSuite::parse("tally@class = Tally\ntally@iterations = 50\n").unwrap();
    fleet.run(&suite).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn global_phases_run_once_and_local_phases_everywhere() {
    let tally = Arc::new(Tally::default());
    let report = run(&tally, false).await;

    assert_eq!(report.test("tally").unwrap().status, TestStatus::Completed);
    assert_eq!(tally.instances.load(Ordering::Relaxed), 4);
    assert_eq!(tally.local_warmups.load(Ordering::Relaxed), 4);
    assert_eq!(tally.local_teardowns.load(Ordering::Relaxed), 4);
    assert_eq!(tally.global_warmups.load(Ordering::Relaxed), 1);
    assert_eq!(tally.global_verifies.load(Ordering::Relaxed), 1);
    assert_eq!(tally.global_teardowns.load(Ordering::Relaxed), 1);
    assert_eq!(tally.operations.load(Ordering::Relaxed), 4 * 50);
    assert_eq!(report.test("tally").unwrap().operations, 4 * 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_global_verify_still_tears_down() {
    let tally = Arc::new(Tally::default());
    let report = run(&tally, true).await;

    let test = report.test("tally").unwrap();
    assert_eq!(test.status, TestStatus::Failed(FailureKind::Exception));
    let failure = test.first_failure.as_ref().unwrap();
    assert_eq!(failure.phase, Some(TestPhase::GlobalVerify));
    assert!(failure.detail.message.contains("totals disagree"));
    assert_eq!(tally.local_teardowns.load(Ordering::Relaxed), 4);
    assert_eq!(tally.global_teardowns.load(Ordering::Relaxed), 1);
}
