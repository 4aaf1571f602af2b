// simulator-core/src/runtime/report.rs
// ============================================================================
// Module: Run Report
// Description: Performance aggregation and the final per-test report.
// Purpose: Merge worker intervals and summarize status, failures and latency.
// Dependencies: crate::probe, serde
// ============================================================================

//! ## Overview
//! The coordinator feeds every `PerformanceStats` payload into a
//! [`PerformanceAggregator`], which decodes and merges the intervals per
//! test and per probe. At the end of the run the totals are summarized into
//! a [`RunReport`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::ProbeStats;
use crate::core::TestId;
use crate::probe::IntervalHistogram;
use crate::probe::ProbeError;
use crate::runtime::failure::FailureRecord;
use crate::runtime::supervisor::TestStatus;

// ============================================================================
// SECTION: Report Types
// ============================================================================

/// Latency and throughput summary of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSummary {
    /// Operations recorded.
    pub operations: u64,
    /// Operations per second over the merged window.
    pub throughput_per_second: f64,
    /// Whether the probe counts toward test throughput.
    pub part_of_throughput: bool,
    /// Median latency in microseconds.
    pub p50_us: f64,
    /// 90th percentile latency in microseconds.
    pub p90_us: f64,
    /// 99th percentile latency in microseconds.
    pub p99_us: f64,
    /// 99.9th percentile latency in microseconds.
    pub p999_us: f64,
    /// Maximum latency in microseconds.
    pub max_us: f64,
    /// Mean latency in microseconds.
    pub mean_us: f64,
}

/// Final outcome of one test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    /// Test identifier.
    pub test_id: TestId,
    /// Final status.
    pub status: TestStatus,
    /// First recorded failure.
    pub first_failure: Option<FailureRecord>,
    /// Throughput-relevant operations.
    pub operations: u64,
    /// Throughput-relevant operations per second.
    pub throughput_per_second: f64,
    /// Per-probe summaries.
    pub probes: BTreeMap<String, ProbeSummary>,
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
    /// Reports in suite order.
    pub tests: Vec<TestReport>,
}

impl RunReport {
    /// Returns true when every test completed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.tests.iter().all(|test| test.status.is_completed())
    }

    /// Returns the report of `test_id`.
    #[must_use]
    pub fn test(&self, test_id: &str) -> Option<&TestReport> {
        self.tests.iter().find(|test| test.test_id.as_str() == test_id)
    }
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Merged probe totals of one test.
#[derive(Debug, Default)]
struct TestTotals {
    /// Merged histogram and throughput flag per probe.
    probes: BTreeMap<String, (bool, IntervalHistogram)>,
}

/// Merges performance intervals per test and probe.
#[derive(Debug, Default)]
pub struct PerformanceAggregator {
    /// Totals per test.
    tests: BTreeMap<TestId, TestTotals>,
}

impl PerformanceAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one worker's interval stats and returns the number of
    /// throughput-relevant operations they contain.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when a histogram cannot be decoded or merged.
    pub fn record(&mut self, test_id: &TestId, probes: &BTreeMap<String, ProbeStats>) -> Result<u64, ProbeError> {
        let totals = self.tests.entry(test_id.clone()).or_default();
        let mut operations = 0_u64;
        for (name, stats) in probes {
            let interval = IntervalHistogram::decode(&stats.interval)?;
            if stats.part_of_throughput {
                operations = operations.saturating_add(interval.operation_count());
            }
            match totals.probes.get_mut(name) {
                Some((_, merged)) => merged.combine(&interval)?,
                None => {
                    totals.probes.insert(name.clone(), (stats.part_of_throughput, interval));
                }
            }
        }
        Ok(operations)
    }

    /// Summarizes the merged probes of `test_id`.
    #[must_use]
    pub fn summarize(&self, test_id: &TestId) -> BTreeMap<String, ProbeSummary> {
        self.tests
            .get(test_id)
            .map(|totals| {
                totals
                    .probes
                    .iter()
                    .map(|(name, (part, histogram))| (name.clone(), summarize_probe(*part, histogram)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds the report entry of one test.
    #[must_use]
    pub fn test_report(
        &self,
        test_id: &TestId,
        status: TestStatus,
        first_failure: Option<FailureRecord>,
    ) -> TestReport {
        let probes = self.summarize(test_id);
        let operations = probes
            .values()
            .filter(|probe| probe.part_of_throughput)
            .map(|probe| probe.operations)
            .fold(0_u64, u64::saturating_add);
        let throughput_per_second = probes
            .values()
            .filter(|probe| probe.part_of_throughput)
            .map(|probe| probe.throughput_per_second)
            .sum();
        TestReport {
            test_id: test_id.clone(),
            status,
            first_failure,
            operations,
            throughput_per_second,
            probes,
        }
    }
}

/// Summarizes one merged histogram.
#[allow(clippy::cast_precision_loss, reason = "Report values are approximate by nature.")]
fn summarize_probe(part_of_throughput: bool, histogram: &IntervalHistogram) -> ProbeSummary {
    let micros = |nanos: u64| nanos as f64 / 1_000.0;
    let window_ms = histogram.end_ms().saturating_sub(histogram.start_ms());
    let operations = histogram.operation_count();
    let throughput_per_second =
        if window_ms == 0 { 0.0 } else { operations as f64 * 1_000.0 / window_ms as f64 };
    ProbeSummary {
        operations,
        throughput_per_second,
        part_of_throughput,
        p50_us: micros(histogram.value_at_quantile(0.5)),
        p90_us: micros(histogram.value_at_quantile(0.9)),
        p99_us: micros(histogram.value_at_quantile(0.99)),
        p999_us: micros(histogram.value_at_quantile(0.999)),
        max_us: micros(histogram.max()),
        mean_us: histogram.mean() / 1_000.0,
    }
}
