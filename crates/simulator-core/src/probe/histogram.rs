// simulator-core/src/probe/histogram.rs
// ============================================================================
// Module: Interval Histograms
// Description: Windowed latency distributions with lossless merge.
// Purpose: Carry one probe interval from a thread up to the coordinator.
// Dependencies: hdrhistogram, base64
// ============================================================================

//! ## Overview
//! An [`IntervalHistogram`] pairs an `HdrHistogram` of nanosecond latencies
//! with the `[start_ms, end_ms]` window it covers and an operation count.
//! Combining adds bucket counts (same bounds, so no re-binning), widens the
//! window to `[min(starts), max(ends)]` and sums the counts; the operation
//! is associative and commutative.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hdrhistogram::Histogram;
use hdrhistogram::serialization::Deserializer;
use hdrhistogram::serialization::Serializer;
use hdrhistogram::serialization::V2Serializer;

use crate::core::EncodedIntervalHistogram;
use crate::probe::ProbeError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Smallest distinguishable latency, in nanoseconds.
pub const LOWEST_TRACKABLE_NANOS: u64 = 1;
/// Largest recordable latency (one hour), in nanoseconds.
pub const HIGHEST_TRACKABLE_NANOS: u64 = 3_600_000_000_000;
/// Significant decimal digits kept per bucket.
pub const SIGNIFICANT_DIGITS: u8 = 3;

// ============================================================================
// SECTION: Interval Histogram
// ============================================================================

/// Latency distribution for one time window.
#[derive(Debug, Clone)]
pub struct IntervalHistogram {
    /// Window start, milliseconds since the Unix epoch.
    start_ms: u64,
    /// Window end, milliseconds since the Unix epoch.
    end_ms: u64,
    /// Recorded latencies in nanoseconds.
    histogram: Histogram<u64>,
    /// Operations recorded in the window, with or without latency.
    operation_count: u64,
}

impl IntervalHistogram {
    /// Creates an empty histogram whose window starts (and ends) at `start_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Histogram`] if the histogram cannot be allocated.
    pub fn new(start_ms: u64) -> Result<Self, ProbeError> {
        let histogram = Histogram::new_with_bounds(
            LOWEST_TRACKABLE_NANOS,
            HIGHEST_TRACKABLE_NANOS,
            SIGNIFICANT_DIGITS,
        )
        .map_err(|err| ProbeError::Histogram(err.to_string()))?;
        Ok(Self {
            start_ms,
            end_ms: start_ms,
            histogram,
            operation_count: 0,
        })
    }

    /// Records one latency sample; values outside the trackable range are
    /// clamped to zero.
    pub fn record(&mut self, nanos: u64) {
        let value = if nanos > HIGHEST_TRACKABLE_NANOS { 0 } else { nanos };
        if self.histogram.record(value).is_ok() {
            self.operation_count += 1;
        }
    }

    /// Records one operation without a latency sample.
    pub const fn record_operation(&mut self) {
        self.operation_count += 1;
    }

    /// Closes the window at `end_ms`.
    pub fn close(&mut self, end_ms: u64) {
        self.end_ms = end_ms.max(self.start_ms);
    }

    /// Merges `other` into this histogram.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Histogram`] when the bucket layouts differ.
    pub fn combine(&mut self, other: &Self) -> Result<(), ProbeError> {
        self.histogram.add(&other.histogram).map_err(|err| ProbeError::Histogram(err.to_string()))?;
        self.start_ms = self.start_ms.min(other.start_ms);
        self.end_ms = self.end_ms.max(other.end_ms);
        self.operation_count += other.operation_count;
        Ok(())
    }

    /// Returns the window start.
    #[must_use]
    pub const fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Returns the window end.
    #[must_use]
    pub const fn end_ms(&self) -> u64 {
        self.end_ms
    }

    /// Returns the operation count.
    #[must_use]
    pub const fn operation_count(&self) -> u64 {
        self.operation_count
    }

    /// Returns the number of latency samples.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.histogram.len()
    }

    /// Returns true when neither samples nor operations were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operation_count == 0 && self.histogram.is_empty()
    }

    /// Returns the latency at `quantile` (0.0..=1.0), in nanoseconds.
    #[must_use]
    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        self.histogram.value_at_quantile(quantile)
    }

    /// Returns the largest recorded latency, in nanoseconds.
    #[must_use]
    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    /// Returns the mean latency, in nanoseconds.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    /// Returns `(bucket value, count)` pairs for every non-empty bucket.
    #[must_use]
    pub fn bucket_counts(&self) -> Vec<(u64, u64)> {
        self.histogram
            .iter_recorded()
            .map(|bucket| (bucket.value_iterated_to(), bucket.count_at_value()))
            .collect()
    }

    /// Encodes into transport form.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Encode`] when serialization fails.
    pub fn encode(&self) -> Result<EncodedIntervalHistogram, ProbeError> {
        let mut bytes = Vec::new();
        V2Serializer::new()
            .serialize(&self.histogram, &mut bytes)
            .map_err(|err| ProbeError::Encode(err.to_string()))?;
        Ok(EncodedIntervalHistogram {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            operation_count: self.operation_count,
            histogram: STANDARD.encode(bytes),
        })
    }

    /// Decodes from transport form.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Decode`] for invalid base64 or histogram bytes.
    pub fn decode(encoded: &EncodedIntervalHistogram) -> Result<Self, ProbeError> {
        let bytes =
            STANDARD.decode(&encoded.histogram).map_err(|err| ProbeError::Decode(err.to_string()))?;
        let decoded: Histogram<u64> = Deserializer::new()
            .deserialize(&mut Cursor::new(bytes))
            .map_err(|err| ProbeError::Decode(err.to_string()))?;
        let mut interval = Self::new(encoded.start_ms)?;
        interval
            .histogram
            .add(&decoded)
            .map_err(|err| ProbeError::Decode(err.to_string()))?;
        interval.end_ms = encoded.end_ms.max(encoded.start_ms);
        interval.operation_count = encoded.operation_count;
        Ok(interval)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::HIGHEST_TRACKABLE_NANOS;
    use super::IntervalHistogram;

    #[test]
    fn out_of_range_samples_clamp_to_zero() {
        let mut histogram = IntervalHistogram::new(0).unwrap();
        histogram.record(HIGHEST_TRACKABLE_NANOS + 1);
        histogram.record(u64::MAX);
        assert_eq!(histogram.sample_count(), 2);
        assert_eq!(histogram.max(), 0);
    }

    #[test]
    fn counter_operations_do_not_add_samples() {
        let mut histogram = IntervalHistogram::new(0).unwrap();
        histogram.record_operation();
        histogram.record_operation();
        assert_eq!(histogram.operation_count(), 2);
        assert_eq!(histogram.sample_count(), 0);
        assert!(!histogram.is_empty());
    }
}
