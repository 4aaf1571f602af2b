// simulator-core/src/runtime/definition.rs
// ============================================================================
// Module: Test Definitions
// Description: Builder API, hook table and registry for test implementations.
// Purpose: Bind test classes to setup, lifecycle hooks and weighted timesteps.
// Dependencies: crate::core, crate::pacing, crate::runtime, thiserror
// ============================================================================

//! ## Overview
//! A test implementation is authored once with [`TestDefinition`]:
//! a setup closure that builds the per-worker state, optional hooks bound to
//! explicit [`HookPoint`]s, and one or more weighted timesteps grouped into
//! execution groups. A [`TestRegistry`] maps class names to definitions and
//! instantiates a [`TestInstance`] for a [`TestCase`], resolving the run plan
//! (threads, pacing, probabilities) from the case properties at load time.
//!
//! Run-plan properties, where `{g}` is the group prefix (empty for the
//! default group, so `threadCount` rather than `ThreadCount`):
//! `{g}ThreadCount`, `{g}RatePerSecond` or `{g}Interval`, `{timestep}Prob`,
//! `iterations`, `metronome`, `accountForCoordinatedOmission`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::core::PacingDefaults;
use crate::core::PhaseScope;
use crate::core::SimulatorAddress;
use crate::core::TestCase;
use crate::core::TestCaseError;
use crate::core::TestId;
use crate::core::TestPhase;
use crate::pacing::MetronomeKind;
use crate::pacing::MetronomeSettings;
use crate::runtime::failure::TestFailure;
use crate::runtime::run_loop::PhaseControl;
use crate::runtime::run_loop::ThreadContext;
use crate::runtime::run_loop::run_workload;
use crate::runtime::selector::TimestepSelector;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Threads per execution group when the test does not configure a count.
pub const DEFAULT_THREAD_COUNT: u32 = 1;
/// Name of the execution group for timesteps without an explicit group.
pub const DEFAULT_GROUP: &str = "";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while registering or instantiating test definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestLoadError {
    /// No definition is registered for the class.
    #[error("unknown test class `{0}`")]
    UnknownClass(String),
    /// Two definitions share a class name.
    #[error("test class `{0}` is already registered")]
    DuplicateClass(String),
    /// A definition declares no timesteps.
    #[error("test class `{0}` declares no timesteps")]
    NoTimesteps(String),
    /// Two timesteps share a name.
    #[error("test class `{class}` declares timestep `{name}` twice")]
    DuplicateTimestep {
        /// Test class.
        class: String,
        /// Timestep name.
        name: String,
    },
    /// A group's probability table is invalid.
    #[error("group `{group}` probabilities: {reason}")]
    Probabilities {
        /// Execution group.
        group: String,
        /// Reason the table was rejected.
        reason: String,
    },
    /// A test property is malformed.
    #[error(transparent)]
    Property(#[from] TestCaseError),
}

// ============================================================================
// SECTION: Hook Table
// ============================================================================

/// Point in the lifecycle at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Warm-up work, per worker or once per fleet.
    Warmup(PhaseScope),
    /// Runs on every worker before the timestep threads start.
    BeforeRun,
    /// Runs on every worker after the timestep threads finish.
    AfterRun,
    /// Verification, per worker or once per fleet.
    Verify(PhaseScope),
    /// Teardown, per worker or once per fleet.
    Teardown(PhaseScope),
}

impl HookPoint {
    /// Returns the hook point that makes up the body of `phase`, if any.
    ///
    /// `SETUP` and `RUN` have dedicated bodies and return `None`.
    #[must_use]
    pub const fn for_phase(phase: TestPhase) -> Option<Self> {
        match phase {
            TestPhase::Setup | TestPhase::Run => None,
            TestPhase::LocalWarmup => Some(Self::Warmup(PhaseScope::Local)),
            TestPhase::GlobalWarmup => Some(Self::Warmup(PhaseScope::Global)),
            TestPhase::LocalVerify => Some(Self::Verify(PhaseScope::Local)),
            TestPhase::GlobalVerify => Some(Self::Verify(PhaseScope::Global)),
            TestPhase::LocalTeardown => Some(Self::Teardown(PhaseScope::Local)),
            TestPhase::GlobalTeardown => Some(Self::Teardown(PhaseScope::Global)),
        }
    }
}

/// Inputs handed to a test's setup closure.
#[derive(Debug)]
pub struct TestSetup<'a, I> {
    /// Test case with overrides applied.
    pub test_case: &'a TestCase,
    /// Driver client instance of the worker.
    pub instance: &'a Arc<I>,
    /// Worker hosting the test.
    pub worker: SimulatorAddress,
    /// Test-level address on that worker.
    pub address: SimulatorAddress,
}

/// Setup closure building the per-worker test state.
pub type SetupFn<I, S> = dyn Fn(&TestSetup<'_, I>) -> Result<S, TestFailure> + Send + Sync;
/// Lifecycle hook closure.
pub type HookFn<S> = dyn Fn(&S) -> Result<(), TestFailure> + Send + Sync;
/// Timestep closure invoked once per iteration.
pub type TimestepFn<S> = dyn Fn(&S, &mut ThreadContext) -> Result<(), TestFailure> + Send + Sync;

// ============================================================================
// SECTION: Timesteps
// ============================================================================

/// Authoring options of a timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestepOptions {
    /// Selection probability; `None` takes the group's remainder.
    pub probability: Option<f64>,
    /// Execution group name.
    pub group: String,
    /// Whether the timestep counts toward reported throughput.
    pub part_of_throughput: bool,
}

impl Default for TimestepOptions {
    fn default() -> Self {
        Self {
            probability: None,
            group: DEFAULT_GROUP.to_string(),
            part_of_throughput: true,
        }
    }
}

impl TimestepOptions {
    /// Sets the selection probability.
    #[must_use]
    pub const fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Places the timestep in an execution group.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Excludes the timestep from throughput.
    #[must_use]
    pub const fn not_part_of_throughput(mut self) -> Self {
        self.part_of_throughput = false;
        self
    }
}

/// A named, weighted unit of work.
pub struct Timestep<S> {
    /// Timestep name, also the probe name.
    name: String,
    /// Authoring options.
    options: TimestepOptions,
    /// Work performed per invocation.
    body: Box<TimestepFn<S>>,
}

impl<S> Timestep<S> {
    /// Returns the timestep name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when the timestep counts toward throughput.
    #[must_use]
    pub const fn is_part_of_throughput(&self) -> bool {
        self.options.part_of_throughput
    }

    /// Invokes the timestep body.
    ///
    /// # Errors
    ///
    /// Returns the [`TestFailure`] raised by the body.
    pub fn invoke(&self, state: &S, context: &mut ThreadContext) -> Result<(), TestFailure> {
        (self.body)(state, context)
    }
}

// ============================================================================
// SECTION: Run Plan
// ============================================================================

/// Resolved execution plan of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    /// Group name.
    pub name: String,
    /// Threads executing the group.
    pub thread_count: u32,
    /// Per-thread pacing.
    pub metronome: MetronomeSettings,
    /// Weighted choice among the group's timesteps.
    pub selector: TimestepSelector,
    /// Indices into the definition's timesteps, aligned with `selector`.
    pub timesteps: Vec<usize>,
}

/// Resolved RUN-phase plan of a test.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Execution groups.
    pub groups: Vec<GroupPlan>,
    /// Per-thread iteration bound.
    pub iterations: Option<u64>,
    /// Measure latency from the scheduled tick.
    pub account_for_coordinated_omission: bool,
}

impl RunPlan {
    /// Returns the total number of execution threads.
    #[must_use]
    pub fn thread_count(&self) -> u32 {
        self.groups.iter().map(|group| group.thread_count).sum()
    }
}

/// Builds the property key for `suffix` in `group`.
fn group_key(group: &str, suffix: &str) -> String {
    if !group.is_empty() {
        return format!("{group}{suffix}");
    }
    let mut chars = suffix.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_ascii_lowercase().to_string() + chars.as_str()
    })
}

/// Builds a property error for `test_case`.
fn invalid_property(test_case: &TestCase, key: &str, reason: impl Into<String>) -> TestLoadError {
    TestLoadError::Property(TestCaseError::InvalidProperty {
        test_id: test_case.id().to_string(),
        key: key.to_string(),
        reason: reason.into(),
    })
}

// ============================================================================
// SECTION: Test Definition
// ============================================================================

/// Declarative test implementation over driver instance `I` and state `S`.
pub struct TestDefinition<I, S> {
    /// Class name used in test cases.
    class_name: String,
    /// State constructor.
    setup: Box<SetupFn<I, S>>,
    /// Hooks in registration order.
    hooks: Vec<(HookPoint, Box<HookFn<S>>)>,
    /// Timesteps in registration order.
    timesteps: Vec<Timestep<S>>,
}

impl<I, S> TestDefinition<I, S>
where
    I: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Starts a definition for `class_name` with its setup closure.
    #[must_use]
    pub fn new<F>(class_name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&TestSetup<'_, I>) -> Result<S, TestFailure> + Send + Sync + 'static,
    {
        Self {
            class_name: class_name.into(),
            setup: Box::new(setup),
            hooks: Vec::new(),
            timesteps: Vec::new(),
        }
    }

    /// Registers a hook at `point`.
    #[must_use]
    pub fn hook<F>(mut self, point: HookPoint, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hooks.push((point, Box::new(hook)));
        self
    }

    /// Registers a warm-up hook.
    #[must_use]
    pub fn prepare<F>(self, scope: PhaseScope, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hook(HookPoint::Warmup(scope), hook)
    }

    /// Registers a hook that runs before the timestep threads start.
    #[must_use]
    pub fn before_run<F>(self, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hook(HookPoint::BeforeRun, hook)
    }

    /// Registers a hook that runs after the timestep threads finish.
    #[must_use]
    pub fn after_run<F>(self, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hook(HookPoint::AfterRun, hook)
    }

    /// Registers a verification hook.
    #[must_use]
    pub fn verify<F>(self, scope: PhaseScope, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hook(HookPoint::Verify(scope), hook)
    }

    /// Registers a teardown hook.
    #[must_use]
    pub fn teardown<F>(self, scope: PhaseScope, hook: F) -> Self
    where
        F: Fn(&S) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.hook(HookPoint::Teardown(scope), hook)
    }

    /// Registers a timestep in the default group.
    #[must_use]
    pub fn timestep<F>(self, name: impl Into<String>, probability: Option<f64>, body: F) -> Self
    where
        F: Fn(&S, &mut ThreadContext) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        let options = TimestepOptions {
            probability,
            ..TimestepOptions::default()
        };
        self.timestep_with(name, options, body)
    }

    /// Registers a timestep with explicit options.
    #[must_use]
    pub fn timestep_with<F>(mut self, name: impl Into<String>, options: TimestepOptions, body: F) -> Self
    where
        F: Fn(&S, &mut ThreadContext) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.timesteps.push(Timestep {
            name: name.into(),
            options,
            body: Box::new(body),
        });
        self
    }

    /// Returns the class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the registered timesteps.
    #[must_use]
    pub fn timesteps(&self) -> &[Timestep<S>] {
        &self.timesteps
    }

    /// Resolves the run plan for `test_case`.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the definition or a property is invalid.
    pub fn plan(&self, test_case: &TestCase, defaults: &PacingDefaults) -> Result<RunPlan, TestLoadError> {
        if self.timesteps.is_empty() {
            return Err(TestLoadError::NoTimesteps(self.class_name.clone()));
        }
        let mut names = BTreeSet::new();
        let mut grouped: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, step) in self.timesteps.iter().enumerate() {
            if !names.insert(step.name.as_str()) {
                return Err(TestLoadError::DuplicateTimestep {
                    class: self.class_name.clone(),
                    name: step.name.clone(),
                });
            }
            grouped.entry(step.options.group.as_str()).or_default().push(index);
        }

        let kind = match test_case.property("metronome") {
            Some(value) => value
                .trim()
                .parse::<MetronomeKind>()
                .map_err(|reason| invalid_property(test_case, "metronome", reason))?,
            None => defaults.metronome,
        };
        let spin_threshold = Duration::from_micros(defaults.spin_threshold_us);

        let mut groups = Vec::with_capacity(grouped.len());
        for (group, indices) in grouped {
            let mut probabilities = Vec::with_capacity(indices.len());
            for index in &indices {
                let step = &self.timesteps[*index];
                let key = format!("{}Prob", step.name);
                let probability = test_case.f64_property(&key)?.or(step.options.probability);
                probabilities.push(probability);
            }
            let selector = TimestepSelector::new(&probabilities).map_err(|reason| {
                TestLoadError::Probabilities {
                    group: group.to_string(),
                    reason,
                }
            })?;

            let threads_key = group_key(group, "ThreadCount");
            let thread_count = match test_case.u64_property(&threads_key)? {
                Some(count) => u32::try_from(count)
                    .map_err(|_| invalid_property(test_case, &threads_key, "thread count too large"))?,
                None => DEFAULT_THREAD_COUNT,
            };
            let metronome = Self::group_metronome(test_case, group, thread_count, kind, spin_threshold)?;
            groups.push(GroupPlan {
                name: group.to_string(),
                thread_count,
                metronome,
                selector,
                timesteps: indices,
            });
        }

        Ok(RunPlan {
            groups,
            iterations: test_case.u64_property("iterations")?,
            account_for_coordinated_omission: test_case
                .bool_property("accountForCoordinatedOmission")?
                .unwrap_or(defaults.account_for_coordinated_omission),
        })
    }

    /// Resolves per-thread pacing for a group; the group rate is divided
    /// evenly across its threads.
    fn group_metronome(
        test_case: &TestCase,
        group: &str,
        thread_count: u32,
        kind: MetronomeKind,
        spin_threshold: Duration,
    ) -> Result<MetronomeSettings, TestLoadError> {
        let rate_key = group_key(group, "RatePerSecond");
        let interval_key = group_key(group, "Interval");
        let rate = test_case.f64_property(&rate_key)?;
        let interval = test_case.duration_property(&interval_key)?;
        let threads = thread_count.max(1);
        match (rate, interval) {
            (Some(_), Some(_)) => Err(invalid_property(
                test_case,
                &rate_key,
                format!("cannot be combined with `{interval_key}`"),
            )),
            (Some(rate), None) => {
                if rate < 0.0 {
                    return Err(invalid_property(test_case, &rate_key, "rate must not be negative"));
                }
                Ok(MetronomeSettings::for_rate(rate / f64::from(threads), kind, spin_threshold))
            }
            (None, Some(interval)) => {
                let per_thread = interval.saturating_mul(threads);
                let interval_nanos = i64::try_from(per_thread.as_nanos())
                    .map_err(|_| invalid_property(test_case, &interval_key, "interval too large"))?;
                Ok(MetronomeSettings {
                    interval_nanos,
                    kind,
                    start_immediately: false,
                    spin_threshold,
                })
            }
            (None, None) => Ok(MetronomeSettings {
                interval_nanos: 0,
                kind,
                start_immediately: false,
                spin_threshold,
            }),
        }
    }

    /// Runs every hook registered at `point`, stopping at the first failure.
    fn run_hooks(&self, point: HookPoint, state: &S) -> Result<(), TestFailure> {
        for (_, hook) in self.hooks.iter().filter(|(registered, _)| *registered == point) {
            hook(state)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Instances
// ============================================================================

/// Worker-side context for instantiating a test.
#[derive(Debug)]
pub struct TestEnvironment<I> {
    /// Worker hosting the test.
    pub worker: SimulatorAddress,
    /// Test-level address on that worker.
    pub address: SimulatorAddress,
    /// Driver client instance.
    pub instance: Arc<I>,
    /// Pacing defaults of the worker.
    pub pacing: PacingDefaults,
    /// Seed for the test's execution threads.
    pub seed: u64,
}

impl<I> Clone for TestEnvironment<I> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker,
            address: self.address,
            instance: Arc::clone(&self.instance),
            pacing: self.pacing.clone(),
            seed: self.seed,
        }
    }
}

/// Installed test executing phases on one worker.
pub trait TestInstance: Send + Sync {
    /// Returns the test identifier.
    fn test_id(&self) -> &TestId;

    /// Executes `phase`, blocking until it finishes.
    ///
    /// # Errors
    ///
    /// Returns the first [`TestFailure`] raised while executing the phase.
    fn execute(&self, phase: TestPhase, control: &PhaseControl) -> Result<(), TestFailure>;
}

/// Type-erased constructor of test instances.
pub trait TestFactory<I>: Send + Sync {
    /// Returns the class name.
    fn class_name(&self) -> &str;

    /// Resolves the run plan of `test_case` without instantiating it.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the definition or properties are invalid.
    fn resolve_plan(&self, test_case: &TestCase, defaults: &PacingDefaults) -> Result<RunPlan, TestLoadError>;

    /// Instantiates the test for `test_case`.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the definition or properties are invalid.
    fn create(
        self: Arc<Self>,
        test_case: &TestCase,
        environment: TestEnvironment<I>,
    ) -> Result<Box<dyn TestInstance>, TestLoadError>;
}

impl<I, S> TestFactory<I> for TestDefinition<I, S>
where
    I: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn resolve_plan(&self, test_case: &TestCase, defaults: &PacingDefaults) -> Result<RunPlan, TestLoadError> {
        self.plan(test_case, defaults)
    }

    fn create(
        self: Arc<Self>,
        test_case: &TestCase,
        environment: TestEnvironment<I>,
    ) -> Result<Box<dyn TestInstance>, TestLoadError> {
        let plan = self.plan(test_case, &environment.pacing)?;
        Ok(Box::new(LoadedTest {
            definition: self,
            test_case: test_case.clone(),
            environment,
            plan,
            state: Mutex::new(None),
        }))
    }
}

/// A definition bound to a test case on one worker.
struct LoadedTest<I, S> {
    /// Shared definition.
    definition: Arc<TestDefinition<I, S>>,
    /// Test case with overrides applied.
    test_case: TestCase,
    /// Worker-side environment.
    environment: TestEnvironment<I>,
    /// Resolved run plan.
    plan: RunPlan,
    /// State built by setup.
    state: Mutex<Option<Arc<S>>>,
}

impl<I, S> LoadedTest<I, S>
where
    I: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Returns the current state, if setup has run.
    fn current_state(&self) -> Result<Option<Arc<S>>, TestFailure> {
        let guard = self
            .state
            .lock()
            .map_err(|_| TestFailure::State("test state lock poisoned".to_string()))?;
        Ok(guard.as_ref().map(Arc::clone))
    }

    /// Returns the state or a failure naming `phase`.
    fn require_state(&self, phase: TestPhase) -> Result<Arc<S>, TestFailure> {
        self.current_state()?.ok_or_else(|| TestFailure::State(format!("{phase} requested before SETUP")))
    }

    /// Builds and stores the test state.
    fn setup(&self) -> Result<(), TestFailure> {
        if self.current_state()?.is_some() {
            return Err(TestFailure::State("SETUP already executed".to_string()));
        }
        let setup = TestSetup {
            test_case: &self.test_case,
            instance: &self.environment.instance,
            worker: self.environment.worker,
            address: self.environment.address,
        };
        let state = (self.definition.setup)(&setup)?;
        let mut guard = self
            .state
            .lock()
            .map_err(|_| TestFailure::State("test state lock poisoned".to_string()))?;
        *guard = Some(Arc::new(state));
        Ok(())
    }
}

impl<I, S> TestInstance for LoadedTest<I, S>
where
    I: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn test_id(&self) -> &TestId {
        self.test_case.id()
    }

    fn execute(&self, phase: TestPhase, control: &PhaseControl) -> Result<(), TestFailure> {
        match phase {
            TestPhase::Setup => self.setup(),
            TestPhase::Run => {
                let state = self.require_state(phase)?;
                self.definition.run_hooks(HookPoint::BeforeRun, &state)?;
                run_workload(
                    state.as_ref(),
                    self.definition.timesteps(),
                    &self.plan,
                    self.environment.seed,
                    control,
                )?;
                self.definition.run_hooks(HookPoint::AfterRun, &state)
            }
            _ if phase.is_teardown() => match (self.current_state()?, HookPoint::for_phase(phase)) {
                (Some(state), Some(point)) => self.definition.run_hooks(point, &state),
                _ => Ok(()),
            },
            _ => {
                let state = self.require_state(phase)?;
                match HookPoint::for_phase(phase) {
                    Some(point) => self.definition.run_hooks(point, &state),
                    None => Ok(()),
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Class-name keyed table of test definitions for driver instance `I`.
pub struct TestRegistry<I> {
    /// Registered factories.
    factories: BTreeMap<String, Arc<dyn TestFactory<I>>>,
}

impl<I> Default for TestRegistry<I> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<I: Send + Sync + 'static> TestRegistry<I> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under its class name.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError::DuplicateClass`] when the class is taken.
    pub fn register<S: Send + Sync + 'static>(
        &mut self,
        definition: TestDefinition<I, S>,
    ) -> Result<(), TestLoadError> {
        let class = definition.class_name().to_string();
        if self.factories.contains_key(&class) {
            return Err(TestLoadError::DuplicateClass(class));
        }
        self.factories.insert(class, Arc::new(definition));
        Ok(())
    }

    /// Returns the registered class names.
    #[must_use]
    pub fn classes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Returns the factory for a test case's class.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the class is missing or unknown.
    pub fn factory(&self, test_case: &TestCase) -> Result<Arc<dyn TestFactory<I>>, TestLoadError> {
        let class = test_case.class_name()?;
        self.factories
            .get(class)
            .map(Arc::clone)
            .ok_or_else(|| TestLoadError::UnknownClass(class.to_string()))
    }

    /// Validates a test case without instantiating it and returns its plan.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the class or properties are invalid.
    pub fn validate(&self, test_case: &TestCase, defaults: &PacingDefaults) -> Result<RunPlan, TestLoadError> {
        self.factory(test_case)?.resolve_plan(test_case, defaults)
    }

    /// Instantiates the test described by `test_case`.
    ///
    /// # Errors
    ///
    /// Returns [`TestLoadError`] when the class or properties are invalid.
    pub fn create(
        &self,
        test_case: &TestCase,
        environment: TestEnvironment<I>,
    ) -> Result<Box<dyn TestInstance>, TestLoadError> {
        self.factory(test_case)?.create(test_case, environment)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::group_key;

    #[test]
    fn default_group_keys_are_lower_camel_case() {
        assert_eq!(group_key("", "ThreadCount"), "threadCount");
        assert_eq!(group_key("reader", "ThreadCount"), "readerThreadCount");
        assert_eq!(group_key("", "RatePerSecond"), "ratePerSecond");
    }
}
