// simulator-core/src/runtime/run_loop.rs
// ============================================================================
// Module: Run Loop
// Description: Rate-controlled, multi-threaded timestep execution.
// Purpose: Drive the RUN phase workload with pacing and latency recording.
// Dependencies: rand, crate::pacing, crate::probe
// ============================================================================

//! ## Overview
//! [`run_workload`] starts one OS thread per configured execution thread
//! inside a [`std::thread::scope`]. Every thread owns its metronome, random
//! generator and one probe per timestep of its group. The loop checks the
//! stop token before and after each tick wait and never interrupts an
//! invocation in flight. The first failure on any thread is kept, stops the
//! remaining threads and is returned once all of them have finished.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::thread;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::pacing::build_metronome;
use crate::probe::Probe;
use crate::probe::ProbeError;
use crate::probe::ProbeRegistry;
use crate::runtime::definition::GroupPlan;
use crate::runtime::definition::RunPlan;
use crate::runtime::definition::Timestep;
use crate::runtime::failure::TestFailure;
use crate::runtime::stop::StopToken;

// ============================================================================
// SECTION: Controls
// ============================================================================

/// Per-phase controls handed to a test instance.
#[derive(Debug, Clone)]
pub struct PhaseControl {
    /// Cooperative stop signal for the phase.
    stop: StopToken,
    /// Probes of the executing test.
    probes: Arc<ProbeRegistry>,
}

impl PhaseControl {
    /// Creates controls from a stop token and the test's probe registry.
    #[must_use]
    pub const fn new(stop: StopToken, probes: Arc<ProbeRegistry>) -> Self {
        Self {
            stop,
            probes,
        }
    }

    /// Returns the stop token.
    #[must_use]
    pub const fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Returns the probe registry.
    #[must_use]
    pub const fn probes(&self) -> &Arc<ProbeRegistry> {
        &self.probes
    }
}

/// State visible to a timestep invocation.
#[derive(Debug)]
pub struct ThreadContext {
    /// Thread-local random generator.
    rng: StdRng,
    /// Index of the thread within the test on this worker.
    thread_index: u32,
    /// Execution group of the thread.
    group: String,
    /// Completed invocations on this thread.
    iteration: u64,
    /// Stop signal of the RUN phase.
    stop: StopToken,
}

impl ThreadContext {
    /// Creates a context seeded for `thread_index`.
    #[must_use]
    pub fn new(seed: u64, thread_index: u32, group: impl Into<String>, stop: StopToken) -> Self {
        Self {
            rng: StdRng::seed_from_u64(thread_seed(seed, thread_index)),
            thread_index,
            group: group.into(),
            iteration: 0,
            stop,
        }
    }

    /// Returns the thread's random generator.
    pub const fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Returns the thread index.
    #[must_use]
    pub const fn thread_index(&self) -> u32 {
        self.thread_index
    }

    /// Returns the execution group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the number of completed invocations.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Returns true once the RUN phase is stopping.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// Derives a per-thread seed.
fn thread_seed(seed: u64, thread_index: u32) -> u64 {
    seed ^ (u64::from(thread_index) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Runs the workload described by `plan` until stopped, the iteration bound
/// is reached, or a timestep fails.
///
/// # Errors
///
/// Returns the first [`TestFailure`] raised by any thread.
pub fn run_workload<S: Sync>(
    state: &S,
    timesteps: &[Timestep<S>],
    plan: &RunPlan,
    seed: u64,
    control: &PhaseControl,
) -> Result<(), TestFailure> {
    let failure: OnceLock<TestFailure> = OnceLock::new();
    thread::scope(|scope| {
        let mut thread_index = 0_u32;
        for group in &plan.groups {
            for _ in 0..group.thread_count {
                let mut context =
                    ThreadContext::new(seed, thread_index, group.name.clone(), control.stop.clone());
                let failure = &failure;
                scope.spawn(move || {
                    if let Err(err) = run_thread(state, timesteps, group, plan, control, &mut context) {
                        let _ = failure.set(err);
                        control.stop.stop();
                    }
                });
                thread_index = thread_index.saturating_add(1);
            }
        }
    });
    failure.into_inner().map_or(Ok(()), Err)
}

/// Maps a probe error into a test failure.
fn probe_failure(err: ProbeError) -> TestFailure {
    TestFailure::Probe(err.to_string())
}

/// Loop executed by one benchmark thread.
fn run_thread<S>(
    state: &S,
    timesteps: &[Timestep<S>],
    group: &GroupPlan,
    plan: &RunPlan,
    control: &PhaseControl,
    context: &mut ThreadContext,
) -> Result<(), TestFailure> {
    let mut steps = Vec::with_capacity(group.timesteps.len());
    for index in &group.timesteps {
        let step = timesteps
            .get(*index)
            .ok_or_else(|| TestFailure::State(format!("timestep index {index} out of range")))?;
        let probe = Probe::latency(step.name(), step.is_part_of_throughput())
            .and_then(|probe| control.probes.register(probe))
            .map_err(probe_failure)?;
        steps.push((step, probe));
    }

    let mut metronome = build_metronome(group.metronome);
    let measure_from_tick = plan.account_for_coordinated_omission && metronome.interval().is_some();
    loop {
        if control.stop.is_stopped() || plan.iterations.is_some_and(|limit| context.iteration >= limit) {
            break;
        }
        let scheduled = metronome.wait_for_next();
        if control.stop.is_stopped() {
            break;
        }
        let choice = group.selector.select(&mut context.rng);
        let Some((step, probe)) = steps.get(choice) else {
            break;
        };
        let started = if measure_from_tick { scheduled } else { Instant::now() };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| step.invoke(state, context)));
        probe.record_since(started).map_err(probe_failure)?;
        match outcome {
            Ok(result) => result?,
            Err(payload) => return Err(TestFailure::from_panic(payload.as_ref())),
        }
        context.iteration = context.iteration.saturating_add(1);
    }
    Ok(())
}
