//! Probe, pacing and workload tests for simulator-core.
// crates/simulator-core/tests/measurement.rs
// =============================================================================
// Module: Measurement Tests
// Description: Validate interval histograms, probes, metronomes and run loops.
// Purpose: Ensure measurements are lossless and pacing holds its schedule.
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
use std::sync::Barrier;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use proptest::prelude::*;
use simulator_core::IntervalHistogram;
use simulator_core::MetronomeKind;
use simulator_core::MetronomeSettings;
use simulator_core::PacingDefaults;
use simulator_core::PhaseScope;
use simulator_core::Probe;
use simulator_core::ProbeRegistry;
use simulator_core::SimulatorAddress;
use simulator_core::TestCase;
use simulator_core::TestDefinition;
use simulator_core::TestFailure;
use simulator_core::TestPhase;
use simulator_core::TestRegistry;
use simulator_core::build_metronome;
use simulator_core::runtime::PhaseRejected;
use simulator_core::runtime::TestContainer;
use simulator_core::runtime::TestEnvironment;
use simulator_core::runtime::TestLoadError;
use simulator_core::runtime::TimestepOptions;

// ============================================================================
// SECTION: Histograms
// ============================================================================

proptest! {
    #[test]
    fn merged_intervals_equal_a_single_recording(
        samples in proptest::collection::vec(1_u64..50_000_000, 1..200),
        split in 0_usize..200,
    ) {
        let split = split.min(samples.len());
        let mut whole = IntervalHistogram::new(100).unwrap();
        let mut left = IntervalHistogram::new(100).unwrap();
        let mut right = IntervalHistogram::new(140).unwrap();
        for (index, sample) in samples.iter().enumerate() {
            whole.record(*sample);
            if index < split { left.record(*sample) } else { right.record(*sample) }
        }
        left.close(120);
        right.close(180);
        left.combine(&right).unwrap();

        prop_assert_eq!(left.operation_count(), whole.operation_count());
        prop_assert_eq!(left.max(), whole.max());
        prop_assert_eq!(left.value_at_quantile(0.5), whole.value_at_quantile(0.5));
        prop_assert_eq!(left.value_at_quantile(0.99), whole.value_at_quantile(0.99));
        prop_assert_eq!(left.start_ms(), 100);
        prop_assert_eq!(left.end_ms(), 180);
    }
}

fn interval_of(samples: &[u64], start_ms: u64, end_ms: u64) -> IntervalHistogram {
    let mut interval = IntervalHistogram::new(start_ms).unwrap();
    for sample in samples {
        interval.record(*sample);
    }
    interval.close(end_ms);
    interval
}

fn samples() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::vec(1_u64..10_000_000, 0..60)
}

proptest! {
    #[test]
    fn combining_is_associative_and_commutative(a in samples(), b in samples(), c in samples()) {
        let (x, y, z) = (interval_of(&a, 10, 20), interval_of(&b, 5, 15), interval_of(&c, 30, 40));

        let mut left = x.clone();
        left.combine(&y).unwrap();
        left.combine(&z).unwrap();

        let mut right = z.clone();
        let mut inner = y.clone();
        inner.combine(&x).unwrap();
        right.combine(&inner).unwrap();

        prop_assert_eq!(left.bucket_counts(), right.bucket_counts());
        prop_assert_eq!(left.operation_count(), right.operation_count());
        prop_assert_eq!((left.start_ms(), left.end_ms()), (5, 40));
        prop_assert_eq!((right.start_ms(), right.end_ms()), (5, 40));
    }
}

#[test]
fn encoded_interval_keeps_counts_window_and_distribution() {
    let mut interval = IntervalHistogram::new(1_000).unwrap();
    for value in [1_000_u64, 2_000, 3_000, 1_000_000] {
        interval.record(value);
    }
    interval.record_operation();
    interval.close(2_000);

    let decoded = IntervalHistogram::decode(&interval.encode().unwrap()).unwrap();
    assert_eq!(decoded.operation_count(), 5);
    assert_eq!(decoded.sample_count(), 4);
    assert_eq!(decoded.start_ms(), 1_000);
    assert_eq!(decoded.end_ms(), 2_000);
    assert_eq!(decoded.max(), interval.max());
    assert_eq!(decoded.bucket_counts(), interval.bucket_counts());
}

// ============================================================================
// SECTION: Probes
// ============================================================================

#[test]
fn probe_snapshots_lose_nothing_under_concurrent_recording() {
    let probe = Arc::new(Probe::latency("op", true).unwrap());
    let snapshotted = Arc::new(AtomicU64::new(0));
    let per_thread = 5_000_u64;

    thread::scope(|scope| {
        for _ in 0..4 {
            let probe = Arc::clone(&probe);
            scope.spawn(move || {
                for value in 1..=per_thread {
                    probe.record_latency(i64::try_from(value).unwrap()).unwrap();
                }
            });
        }
        let probe = Arc::clone(&probe);
        let snapshotted = Arc::clone(&snapshotted);
        scope.spawn(move || {
            for _ in 0..50 {
                let interval = probe.snapshot_and_reset().unwrap();
                snapshotted.fetch_add(interval.operation_count(), Ordering::Relaxed);
                thread::yield_now();
            }
        });
    });
    let rest = probe.snapshot_and_reset().unwrap().operation_count();
    assert_eq!(snapshotted.load(Ordering::Relaxed) + rest, 4 * per_thread);
    assert_eq!(probe.snapshot_and_reset().unwrap().operation_count(), 0);
}

#[test]
fn snapshot_counts_exactly_the_samples_recorded_since_the_last_one() {
    let probe = Probe::latency("op", true).unwrap();
    probe.record_latency(-5).unwrap();
    probe.snapshot_and_reset().unwrap();
    assert!(probe.snapshot_and_reset().unwrap().is_empty());

    let values = [3_000_i64, 7_000, 11_000, 2_000_000];
    for value in values {
        probe.record_latency(value).unwrap();
    }
    let interval = probe.snapshot_and_reset().unwrap();
    assert_eq!(interval.sample_count(), 4);
    let direct = interval_of(&[3_000, 7_000, 11_000, 2_000_000], 0, 0);
    assert_eq!(interval.bucket_counts(), direct.bucket_counts());
    assert!(interval.end_ms() >= interval.start_ms());
}

#[test]
fn start_stop_pairs_and_unmatched_stop() {
    let probe = Probe::latency("pair", true).unwrap();
    assert!(probe.record_stop().is_err());
    probe.record_start();
    probe.record_stop().unwrap();
    assert!(probe.record_stop().is_err());
    assert_eq!(probe.snapshot_and_reset().unwrap().operation_count(), 1);
}

#[test]
fn interleaved_start_stop_on_a_shared_probe_keeps_both_samples() {
    let probe = Arc::new(Probe::latency("shared", true).unwrap());
    let steps = Arc::new(Barrier::new(2));

    let first = {
        let probe = Arc::clone(&probe);
        let steps = Arc::clone(&steps);
        thread::spawn(move || {
            probe.record_start();
            steps.wait();
            steps.wait();
            let stopped = probe.record_stop();
            steps.wait();
            stopped
        })
    };
    let second = {
        let probe = Arc::clone(&probe);
        let steps = Arc::clone(&steps);
        thread::spawn(move || {
            steps.wait();
            probe.record_start();
            steps.wait();
            steps.wait();
            probe.record_stop()
        })
    };

    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();
    assert_eq!(probe.snapshot_and_reset().unwrap().operation_count(), 2);
    assert!(probe.record_stop().is_err());
}

#[test]
fn registry_merges_same_named_probes_and_skips_empty_stats() {
    let registry = ProbeRegistry::new();
    let first = registry.register(Probe::latency("put", true).unwrap()).unwrap();
    let second = registry.register(Probe::latency("put", true).unwrap()).unwrap();
    let idle = registry.register(Probe::counter("evict", false).unwrap()).unwrap();
    first.record_latency(10).unwrap();
    second.record_latency(20).unwrap();
    second.record_latency(30).unwrap();
    drop(idle);

    let stats = registry.snapshot_stats().unwrap();
    assert_eq!(registry.probe_count().unwrap(), 3);
    assert_eq!(stats.len(), 1);
    let put = &stats["put"];
    assert!(put.part_of_throughput);
    assert_eq!(put.interval.operation_count, 3);
}

// ============================================================================
// SECTION: Pacing
// ============================================================================

#[test]
fn metronome_ticks_follow_an_absolute_schedule() {
    for kind in [MetronomeKind::Sleeping, MetronomeKind::BusySpin] {
        let settings = MetronomeSettings::for_rate(1_000.0, kind, Duration::from_micros(100));
        let mut metronome = build_metronome(settings);
        assert_eq!(metronome.interval(), Some(Duration::from_millis(1)));

        let started = Instant::now();
        let first = metronome.wait_for_next();
        let mut last = first;
        for _ in 0..19 {
            let next = metronome.wait_for_next();
            assert_eq!(next - last, Duration::from_millis(1));
            last = next;
        }
        assert!(Instant::now() >= last);
        assert!(started.elapsed() >= Duration::from_millis(19));
    }
}

#[test]
fn slow_iterations_do_not_skew_the_long_run_rate() {
    let settings = MetronomeSettings::for_rate(1_000.0, MetronomeKind::Sleeping, Duration::from_micros(100));
    let mut metronome = build_metronome(settings);
    let first = metronome.wait_for_next();
    let mut last = first;
    for tick in 1..1_000_u32 {
        if tick % 100 == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        last = metronome.wait_for_next();
    }
    assert_eq!(last - first, Duration::from_millis(999));
    assert!(first.elapsed() >= Duration::from_millis(999));
}

#[test]
fn unthrottled_settings_build_a_pass_through_metronome() {
    let spin = Duration::from_micros(100);
    for rate in [0.0, -5.0, f64::INFINITY, f64::NAN] {
        let settings = MetronomeSettings::for_rate(rate, MetronomeKind::Sleeping, spin);
        assert_eq!(settings.interval_nanos, 0);
        assert_eq!(build_metronome(settings).interval(), None);
    }
    let disabled = MetronomeSettings::for_rate(10.0, MetronomeKind::None, spin);
    assert_eq!(build_metronome(disabled).interval(), None);
    assert_eq!("busy_spin".parse::<MetronomeKind>(), Ok(MetronomeKind::BusySpin));
    assert!("warp".parse::<MetronomeKind>().is_err());
}

// ============================================================================
// SECTION: Workloads
// ============================================================================

/// Counters shared by every phase of the counting test.
#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    warmups: AtomicU64,
    teardowns: AtomicU64,
}

fn pacing() -> PacingDefaults {
    PacingDefaults {
        metronome: MetronomeKind::Sleeping,
        spin_threshold_us: 100,
        account_for_coordinated_omission: true,
    }
}

fn counting_registry() -> TestRegistry<()> {
    let definition = TestDefinition::<(), Counters>::new("Counting", |_setup| Ok(Counters::default()))
        .prepare(PhaseScope::Local, |state: &Counters| {
            state.warmups.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .timestep("read", Some(0.75), |state: &Counters, _context| {
            state.reads.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .timestep_with("write", TimestepOptions::default().in_group("writer"), |state: &Counters, context| {
            state.writes.fetch_add(1, Ordering::Relaxed);
            if context.group() == "writer" {
                Ok(())
            } else {
                Err(TestFailure::assertion("write ran outside its group"))
            }
        })
        .timestep("scan", None, |_state: &Counters, _context| Ok(()))
        .teardown(PhaseScope::Local, |state: &Counters| {
            state.teardowns.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    let mut registry = TestRegistry::new();
    registry.register(definition).unwrap();
    registry
}

fn container(registry: &TestRegistry<()>, test_case: &TestCase) -> TestContainer {
    let worker = SimulatorAddress::worker(1, 1);
    let address = worker.child(1).unwrap();
    let environment = TestEnvironment {
        worker,
        address,
        instance: Arc::new(()),
        pacing: pacing(),
        seed: 7,
    };
    TestContainer::new(address, registry.create(test_case, environment).unwrap())
}

fn run_phase(container: &TestContainer, phase: TestPhase) -> Result<(), TestFailure> {
    let control = container.begin_phase(phase).unwrap();
    container.execute(phase, &control)
}

#[test]
fn plans_split_groups_and_thread_counts() {
    let registry = counting_registry();
    let mut properties = TestCase::with_class("c", "Counting").properties().clone();
    properties.insert("threadCount".to_string(), "3".to_string());
    properties.insert("writerThreadCount".to_string(), "2".to_string());
    properties.insert("writerRatePerSecond".to_string(), "100".to_string());
    let case = TestCase::new("c", properties);

    let plan = registry.validate(&case, &pacing()).unwrap();
    assert_eq!(plan.thread_count(), 5);
    let names: Vec<&str> = plan.groups.iter().map(|group| group.name.as_str()).collect();
    assert_eq!(names, vec!["", "writer"]);
    assert_eq!(plan.groups[1].metronome.interval_nanos, 20_000_000);
    assert_eq!(plan.groups[0].metronome.interval_nanos, 0);
}

#[test]
fn invalid_probability_tables_are_rejected_at_load() {
    let registry = counting_registry();
    let mut properties = TestCase::with_class("c", "Counting").properties().clone();
    properties.insert("readProb".to_string(), "1.5".to_string());
    let case = TestCase::new("c", properties);
    assert!(matches!(registry.validate(&case, &pacing()), Err(TestLoadError::Probabilities { .. })));

    let unknown = TestCase::with_class("u", "Nope");
    assert!(matches!(registry.validate(&unknown, &pacing()), Err(TestLoadError::UnknownClass(_))));
}

#[test]
fn iteration_bound_runs_every_thread_exactly_that_often() {
    let registry = counting_registry();
    let mut properties = TestCase::with_class("c", "Counting").properties().clone();
    properties.insert("threadCount".to_string(), "2".to_string());
    properties.insert("iterations".to_string(), "500".to_string());
    let case = TestCase::new("c", properties);
    let container = container(&registry, &case);

    run_phase(&container, TestPhase::Setup).unwrap();
    run_phase(&container, TestPhase::LocalWarmup).unwrap();
    run_phase(&container, TestPhase::Run).unwrap();
    let stats = container.probes().snapshot_stats().unwrap();
    let total: u64 = stats.values().map(|probe| probe.interval.operation_count).sum();
    assert_eq!(total, 2 * 500 + 500);
    assert_eq!(stats["write"].interval.operation_count, 500);
    assert!(stats["read"].interval.operation_count > stats["scan"].interval.operation_count);
    run_phase(&container, TestPhase::LocalTeardown).unwrap();
}

#[test]
fn stop_token_ends_an_unbounded_run() {
    let registry = counting_registry();
    let case = TestCase::with_class("c", "Counting");
    let container = Arc::new(container(&registry, &case));
    run_phase(&container, TestPhase::Setup).unwrap();

    let control = container.begin_phase(TestPhase::Run).unwrap();
    assert!(matches!(container.begin_phase(TestPhase::LocalVerify), Err(PhaseRejected::Busy { .. })));
    let running = {
        let container = Arc::clone(&container);
        thread::spawn(move || container.execute(TestPhase::Run, &control))
    };
    thread::sleep(Duration::from_millis(30));
    container.stop_run().unwrap();
    running.join().unwrap().unwrap();
    assert_eq!(container.current_phase(), None);
}

#[test]
fn stop_arriving_before_run_begins_is_honored_once() {
    let registry = counting_registry();
    let case = TestCase::with_class("c", "Counting");
    let container = container(&registry, &case);
    run_phase(&container, TestPhase::Setup).unwrap();

    container.stop_run().unwrap();
    let control = container.begin_phase(TestPhase::Run).unwrap();
    assert!(control.stop_token().is_stopped());
    container.execute(TestPhase::Run, &control).unwrap();
    let stats = container.probes().snapshot_stats().unwrap();
    assert!(stats.values().all(|probe| probe.interval.operation_count == 0));

    let next = container.begin_phase(TestPhase::Run).unwrap();
    assert!(!next.stop_token().is_stopped());
    container.stop_run().unwrap();
    let _ = container.execute(TestPhase::Run, &next);
    assert_eq!(container.current_phase(), None);
}

#[test]
fn phases_before_setup_fail_but_teardown_is_tolerated() {
    let registry = counting_registry();
    let case = TestCase::with_class("c", "Counting");
    let container = container(&registry, &case);
    assert!(matches!(run_phase(&container, TestPhase::LocalWarmup), Err(TestFailure::State(_))));
    run_phase(&container, TestPhase::LocalTeardown).unwrap();
    run_phase(&container, TestPhase::Setup).unwrap();
    assert!(matches!(run_phase(&container, TestPhase::Setup), Err(TestFailure::State(_))));
}
