// simulator-core/src/core/test_case.rs
// ============================================================================
// Module: Test Cases and Suites
// Description: Test definitions loaded from properties text.
// Purpose: Carry the test class name and its property overrides.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`TestCase`] is an id plus an ordered property map. `class` names the
//! registered test implementation; every other key is a field override read
//! by the test or by the run loop (`threadCount`, `ratePerSecond`, ...).
//! Test cases are immutable; [`TestCase::with_overrides`] returns a copy.
//!
//! A [`TestSuite`] is parsed from properties text:
//!
//! ```text
//! # comment
//! putGet@class = KvPutGetTest
//! putGet@threadCount = 4
//! class = NoopTest          # belongs to the test named "default"
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::TestId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Property naming the test implementation.
pub const CLASS_PROPERTY: &str = "class";
/// Test id used for suite lines without an `id@` prefix.
pub const DEFAULT_TEST_ID: &str = "default";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while reading test cases and suites.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestCaseError {
    /// A suite line is not `key = value`.
    #[error("line {line}: expected `key = value`")]
    MalformedLine {
        /// One-based line number.
        line: usize,
    },
    /// A test id or property key is empty.
    #[error("line {line}: empty test id or property name")]
    EmptyName {
        /// One-based line number.
        line: usize,
    },
    /// A test case has no `class` property.
    #[error("test `{0}` has no class property")]
    MissingClass(String),
    /// A property value has the wrong shape.
    #[error("test `{test_id}` property `{key}`: {reason}")]
    InvalidProperty {
        /// Test identifier.
        test_id: String,
        /// Property name.
        key: String,
        /// Reason the value was rejected.
        reason: String,
    },
    /// The suite contains no tests.
    #[error("test suite is empty")]
    EmptySuite,
    /// Two tests share an identifier.
    #[error("duplicate test id `{0}`")]
    DuplicateTest(String),
}

// ============================================================================
// SECTION: Test Case
// ============================================================================

/// A single test definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test identifier.
    id: TestId,
    /// Ordered property map.
    properties: BTreeMap<String, String>,
}

impl TestCase {
    /// Creates a test case.
    #[must_use]
    pub fn new(id: impl Into<TestId>, properties: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            properties,
        }
    }

    /// Creates a test case with just a class name.
    #[must_use]
    pub fn with_class(id: impl Into<TestId>, class_name: &str) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(CLASS_PROPERTY.to_string(), class_name.to_string());
        Self::new(id, properties)
    }

    /// Returns the test identifier.
    #[must_use]
    pub const fn id(&self) -> &TestId {
        &self.id
    }

    /// Returns the property map.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns a raw property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns the implementation class name.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError::MissingClass`] when `class` is absent or blank.
    pub fn class_name(&self) -> Result<&str, TestCaseError> {
        self.property(CLASS_PROPERTY)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| TestCaseError::MissingClass(self.id.to_string()))
    }

    /// Returns a copy with `overrides` applied on top of the properties.
    #[must_use]
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut properties = self.properties.clone();
        for (key, value) in overrides {
            properties.insert(key.clone(), value.clone());
        }
        Self {
            id: self.id.clone(),
            properties,
        }
    }

    /// Reads an unsigned integer property.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError::InvalidProperty`] when the value is not a `u64`.
    pub fn u64_property(&self, key: &str) -> Result<Option<u64>, TestCaseError> {
        self.parse_property(key, |value| value.parse::<u64>().map_err(|err| err.to_string()))
    }

    /// Reads a floating point property.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError::InvalidProperty`] when the value is not a finite number.
    pub fn f64_property(&self, key: &str) -> Result<Option<f64>, TestCaseError> {
        self.parse_property(key, |value| {
            let parsed = value.parse::<f64>().map_err(|err| err.to_string())?;
            if parsed.is_finite() { Ok(parsed) } else { Err("not a finite number".to_string()) }
        })
    }

    /// Reads a boolean property (`true`/`false`).
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError::InvalidProperty`] when the value is not a boolean.
    pub fn bool_property(&self, key: &str) -> Result<Option<bool>, TestCaseError> {
        self.parse_property(key, |value| value.parse::<bool>().map_err(|err| err.to_string()))
    }

    /// Reads a duration property such as `10ms`, `250us`, `2s` or `500ns`.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError::InvalidProperty`] when the value has no known unit.
    pub fn duration_property(&self, key: &str) -> Result<Option<Duration>, TestCaseError> {
        self.parse_property(key, parse_duration)
    }

    /// Parses a property through `parse`, attaching context on failure.
    fn parse_property<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<Option<T>, TestCaseError> {
        let Some(value) = self.property(key) else {
            return Ok(None);
        };
        parse(value.trim()).map(Some).map_err(|reason| TestCaseError::InvalidProperty {
            test_id: self.id.to_string(),
            key: key.to_string(),
            reason,
        })
    }
}

/// Parses `<integer><unit>` durations.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount = digits.parse::<u64>().map_err(|_| format!("invalid duration `{value}`"))?;
    match unit.trim() {
        "ns" => Ok(Duration::from_nanos(amount)),
        "us" => Ok(Duration::from_micros(amount)),
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        other => Err(format!("unknown duration unit `{other}`")),
    }
}

// ============================================================================
// SECTION: Test Suite
// ============================================================================

/// Ordered collection of test cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuite {
    /// Test cases in first-appearance order.
    tests: Vec<TestCase>,
}

impl TestSuite {
    /// Creates a suite from explicit test cases.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError`] when the suite is empty or a test lacks a class.
    pub fn new(tests: Vec<TestCase>) -> Result<Self, TestCaseError> {
        if tests.is_empty() {
            return Err(TestCaseError::EmptySuite);
        }
        let mut seen = BTreeSet::new();
        for test in &tests {
            test.class_name()?;
            if !seen.insert(test.id()) {
                return Err(TestCaseError::DuplicateTest(test.id().to_string()));
            }
        }
        Ok(Self {
            tests,
        })
    }

    /// Parses suite properties text.
    ///
    /// # Errors
    ///
    /// Returns [`TestCaseError`] for malformed lines, empty names, missing
    /// classes, or an empty suite.
    pub fn parse(text: &str) -> Result<Self, TestCaseError> {
        let mut order: Vec<String> = Vec::new();
        let mut properties: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or(TestCaseError::MalformedLine {
                line: line_number,
            })?;
            let (test_id, property) = match key.trim().split_once('@') {
                Some((test_id, property)) => (test_id.trim(), property.trim()),
                None => (DEFAULT_TEST_ID, key.trim()),
            };
            if test_id.is_empty() || property.is_empty() {
                return Err(TestCaseError::EmptyName {
                    line: line_number,
                });
            }
            if !properties.contains_key(test_id) {
                order.push(test_id.to_string());
            }
            properties
                .entry(test_id.to_string())
                .or_default()
                .insert(property.to_string(), value.trim().to_string());
        }
        let tests = order
            .into_iter()
            .map(|test_id| {
                let props = properties.remove(&test_id).unwrap_or_default();
                TestCase::new(test_id, props)
            })
            .collect();
        Self::new(tests)
    }

    /// Returns the test cases in order.
    #[must_use]
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Returns the number of tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true when the suite has no tests (never true once built).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns a copy with `overrides` applied to every test.
    #[must_use]
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        Self {
            tests: self.tests.iter().map(|test| test.with_overrides(overrides)).collect(),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
