// simulator-cli/src/builtin.rs
// ============================================================================
// Module: Builtin Target
// Description: In-memory key/value driver and demo test classes.
// Purpose: Exercise the driver seam and the full phase lifecycle locally.
// Dependencies: rand, simulator-core, thiserror
// ============================================================================

//! ## Overview
//! The builtin target is a bounded in-memory key/value map shared by every
//! test on a worker. Two test classes run against it:
//! - `KvLoad`: a put/get mix over a fixed key domain with verification;
//! - `KvFault`: a load that fails deliberately, for rehearsing failure
//!   propagation.
//!
//! Driver properties: `capacity` (maximum entries, default 100000) and
//! `failCreate` (`true` makes instance creation fail).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rand::Rng;
use simulator_core::Driver;
use simulator_core::DriverError;
use simulator_core::PhaseScope;
use simulator_core::TestCase;
use simulator_core::TestDefinition;
use simulator_core::TestFailure;
use simulator_core::TestRegistry;
use simulator_core::runtime::TestLoadError;
use simulator_core::runtime::TestSetup;
use simulator_core::runtime::ensure;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default store capacity.
pub const DEFAULT_CAPACITY: usize = 100_000;
/// Default number of distinct keys touched by `KvLoad`.
pub const DEFAULT_KEY_DOMAIN: u64 = 1_000;
/// Class name of the load test.
pub const KV_LOAD_CLASS: &str = "KvLoad";
/// Class name of the fault test.
pub const KV_FAULT_CLASS: &str = "KvFault";

// ============================================================================
// SECTION: Store
// ============================================================================

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// Inserting would exceed the capacity.
    #[error("store capacity {0} exceeded")]
    CapacityExceeded(usize),
    /// The store lock is poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Bounded in-memory key/value map.
#[derive(Debug)]
pub struct KvStore {
    /// Entries.
    entries: Mutex<BTreeMap<String, u64>>,
    /// Maximum number of entries.
    capacity: usize,
}

impl KvStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Inserts or replaces a value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when full or poisoned.
    pub fn put(&self, key: &str, value: u64) -> Result<(), KvError> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            return Err(KvError::CapacityExceeded(self.capacity));
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Poisoned`] when the lock is poisoned.
    pub fn get(&self, key: &str) -> Result<Option<u64>, KvError> {
        Ok(self.entries.lock().map_err(|_| KvError::Poisoned)?.get(key).copied())
    }

    /// Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Poisoned`] when the lock is poisoned.
    pub fn entry_count(&self) -> Result<usize, KvError> {
        Ok(self.entries.lock().map_err(|_| KvError::Poisoned)?.len())
    }

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Poisoned`] when the lock is poisoned.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize, KvError> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Typed builtin driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvConfig {
    /// Store capacity.
    pub capacity: usize,
    /// Fail instance creation.
    pub fail_create: bool,
}

/// Driver creating one [`KvStore`] per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct KvDriver;

impl Driver for KvDriver {
    type Config = KvConfig;
    type Instance = KvStore;

    fn load_properties(&self, raw: &BTreeMap<String, String>) -> Result<KvConfig, DriverError> {
        let capacity = match raw.get("capacity") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|err| DriverError::Config(format!("capacity `{value}`: {err}")))?,
            None => DEFAULT_CAPACITY,
        };
        if capacity == 0 {
            return Err(DriverError::Config("capacity must be greater than zero".to_string()));
        }
        let fail_create = match raw.get("failCreate").map(|value| value.trim()) {
            Some("true") => true,
            Some("false") | None => false,
            Some(other) => return Err(DriverError::Config(format!("failCreate `{other}` is not a boolean"))),
        };
        Ok(KvConfig {
            capacity,
            fail_create,
        })
    }

    fn create_instance(&self, config: &KvConfig) -> Result<KvStore, DriverError> {
        if config.fail_create {
            return Err(DriverError::Create("store creation disabled by failCreate".to_string()));
        }
        Ok(KvStore::new(config.capacity))
    }

    fn close_instance(&self, instance: &KvStore) -> Result<(), DriverError> {
        instance.remove_prefix("").map(|_| ()).map_err(|err| DriverError::Close(err.to_string()))
    }
}

// ============================================================================
// SECTION: KvLoad
// ============================================================================

/// Per-worker state of a `KvLoad` test.
#[derive(Debug)]
pub struct KvLoadState {
    /// Shared store.
    store: Arc<KvStore>,
    /// Key prefix unique to the test.
    prefix: String,
    /// Distinct keys touched.
    key_domain: u64,
    /// Successful puts.
    puts: AtomicU64,
    /// Gets issued.
    gets: AtomicU64,
    /// Gets that found a value.
    hits: AtomicU64,
}

impl KvLoadState {
    /// Builds the state from the test's properties.
    fn from_setup(setup: &TestSetup<'_, KvStore>) -> Result<Self, TestFailure> {
        let key_domain = positive_property(setup.test_case, "keyDomain", DEFAULT_KEY_DOMAIN)?;
        Ok(Self {
            store: Arc::clone(setup.instance),
            prefix: format!("{}/", setup.test_case.id()),
            key_domain,
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        })
    }

    /// Returns the key for index `index`.
    fn key(&self, index: u64) -> String {
        format!("{}{index}", self.prefix)
    }

    /// Stores a random key.
    fn put(&self, rng: &mut impl Rng) -> Result<(), TestFailure> {
        let index = rng.gen_range(0..self.key_domain);
        self.store.put(&self.key(index), index).map_err(|err| TestFailure::from_error(&err))?;
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a random key and checks the stored value.
    fn get(&self, rng: &mut impl Rng) -> Result<(), TestFailure> {
        let index = rng.gen_range(0..self.key_domain);
        let value = self.store.get(&self.key(index)).map_err(|err| TestFailure::from_error(&err))?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(value) = value {
            ensure(value == index, || format!("key {index} holds {value}"))?;
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Checks the store against the counters.
    fn verify(&self) -> Result<(), TestFailure> {
        let hits = self.hits.load(Ordering::Relaxed);
        let gets = self.gets.load(Ordering::Relaxed);
        ensure(hits <= gets, || format!("{hits} hits exceed {gets} gets"))?;
        let stored = self.store.entry_count().map_err(|err| TestFailure::from_error(&err))?;
        let stored = u64::try_from(stored).unwrap_or(u64::MAX);
        let puts = self.puts.load(Ordering::Relaxed);
        ensure(puts == 0 || stored > 0, || format!("{puts} puts left an empty store"))
    }

    /// Removes the test's keys.
    fn clear(&self) -> Result<(), TestFailure> {
        self.store.remove_prefix(&self.prefix).map(|_| ()).map_err(|err| TestFailure::from_error(&err))
    }
}

/// Builds the `KvLoad` test class.
#[must_use]
pub fn kv_load_definition() -> TestDefinition<KvStore, KvLoadState> {
    TestDefinition::new(KV_LOAD_CLASS, KvLoadState::from_setup)
        .prepare(PhaseScope::Local, |state: &KvLoadState| {
            for index in 0..state.key_domain / 2 {
                state.store.put(&state.key(index), index).map_err(|err| TestFailure::from_error(&err))?;
            }
            Ok(())
        })
        .timestep("put", Some(0.2), |state: &KvLoadState, context| state.put(context.rng()))
        .timestep("get", None, |state: &KvLoadState, context| state.get(context.rng()))
        .verify(PhaseScope::Local, KvLoadState::verify)
        .teardown(PhaseScope::Local, KvLoadState::clear)
}

// ============================================================================
// SECTION: KvFault
// ============================================================================

/// Per-worker state of a `KvFault` test.
#[derive(Debug)]
pub struct KvFaultState {
    /// Shared store.
    store: Arc<KvStore>,
    /// Key written by every operation.
    key: String,
    /// Operations after which the test fails.
    fail_after: u64,
    /// Operations issued.
    operations: AtomicU64,
}

/// Builds the `KvFault` test class. It fails with an assertion once
/// `failAfter` operations (default 10) ran on a worker.
#[must_use]
pub fn kv_fault_definition() -> TestDefinition<KvStore, KvFaultState> {
    TestDefinition::new(KV_FAULT_CLASS, |setup: &TestSetup<'_, KvStore>| {
        Ok(KvFaultState {
            store: Arc::clone(setup.instance),
            key: format!("{}/fault", setup.test_case.id()),
            fail_after: positive_property(setup.test_case, "failAfter", 10)?,
            operations: AtomicU64::new(0),
        })
    })
    .timestep("write", None, |state: &KvFaultState, _context| {
        let count = state.operations.fetch_add(1, Ordering::Relaxed) + 1;
        state.store.put(&state.key, count).map_err(|err| TestFailure::from_error(&err))?;
        ensure(count < state.fail_after, || format!("injected fault after {count} operations"))
    })
    .teardown(PhaseScope::Local, |state: &KvFaultState| {
        state.store.remove_prefix(&state.key).map(|_| ()).map_err(|err| TestFailure::from_error(&err))
    })
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Returns a registry holding every builtin test class.
///
/// # Errors
///
/// Returns [`TestLoadError`] when a class is registered twice.
pub fn builtin_registry() -> Result<TestRegistry<KvStore>, TestLoadError> {
    let mut registry = TestRegistry::new();
    registry.register(kv_load_definition())?;
    registry.register(kv_fault_definition())?;
    Ok(registry)
}

/// Reads a positive integer property.
fn positive_property(test_case: &TestCase, key: &str, default: u64) -> Result<u64, TestFailure> {
    let value = test_case.u64_property(key).map_err(|err| TestFailure::from_error(&err))?.unwrap_or(default);
    ensure(value > 0, || format!("`{key}` must be greater than zero"))?;
    Ok(value)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::collections::BTreeMap;

    use simulator_core::Driver;

    use super::KvDriver;
    use super::KvError;
    use super::KvStore;

    #[test]
    fn store_enforces_capacity_for_new_keys_only() {
        let store = KvStore::new(1);
        store.put("a", 1).unwrap();
        store.put("a", 2).unwrap();
        assert_eq!(store.put("b", 3), Err(KvError::CapacityExceeded(1)));
        assert_eq!(store.get("a").unwrap(), Some(2));
    }

    #[test]
    fn remove_prefix_only_touches_matching_keys() {
        let store = KvStore::new(10);
        store.put("t1/1", 1).unwrap();
        store.put("t1/2", 2).unwrap();
        store.put("t2/1", 3).unwrap();
        assert_eq!(store.remove_prefix("t1/").unwrap(), 2);
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[test]
    fn driver_rejects_bad_properties() {
        let mut raw = BTreeMap::new();
        raw.insert("capacity".to_string(), "zero".to_string());
        assert!(KvDriver.load_properties(&raw).is_err());
        raw.insert("capacity".to_string(), "10".to_string());
        raw.insert("failCreate".to_string(), "maybe".to_string());
        assert!(KvDriver.load_properties(&raw).is_err());
    }

    #[test]
    fn fail_create_blocks_instance_creation() {
        let mut raw = BTreeMap::new();
        raw.insert("failCreate".to_string(), "true".to_string());
        let config = KvDriver.load_properties(&raw).unwrap();
        assert!(KvDriver.create_instance(&config).is_err());
    }
}
