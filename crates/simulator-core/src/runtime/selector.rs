// simulator-core/src/runtime/selector.rs
// ============================================================================
// Module: Timestep Selector
// Description: Cumulative-probability table for weighted timestep choice.
// Purpose: Pick the next timestep of an execution group at random.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Probabilities within a group must sum to 1 (within `1e-6`). At most one
//! timestep may leave its probability unset; it receives the remainder.
//! Selection draws `r` in `[0, 1)` and returns the first entry whose
//! cumulative probability exceeds `r`, so zero-probability entries are
//! never chosen.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::Rng;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Allowed deviation of a probability sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

// ============================================================================
// SECTION: Selector
// ============================================================================

/// Weighted selector over a fixed number of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestepSelector {
    /// Resolved probability per entry.
    probabilities: Vec<f64>,
    /// Running sums; the last entry is exactly 1.
    cumulative: Vec<f64>,
}

impl TimestepSelector {
    /// Builds a selector from per-entry probabilities (`None` = remainder).
    ///
    /// # Errors
    ///
    /// Returns a reason string when the table is empty, a probability is out
    /// of range, more than one entry is unset, or the sum is not 1.
    pub fn new(probabilities: &[Option<f64>]) -> Result<Self, String> {
        if probabilities.is_empty() {
            return Err("no timesteps".to_string());
        }
        let mut fixed_sum = 0.0;
        let mut unset = None;
        for (index, probability) in probabilities.iter().enumerate() {
            match probability {
                Some(value) if !value.is_finite() || *value < 0.0 || *value > 1.0 => {
                    return Err(format!("probability {value} is outside [0, 1]"));
                }
                Some(value) => fixed_sum += value,
                None if unset.is_some() => {
                    return Err("more than one timestep without a probability".to_string());
                }
                None => unset = Some(index),
            }
        }
        let remainder = 1.0 - fixed_sum;
        if unset.is_none() && remainder.abs() > PROBABILITY_TOLERANCE {
            return Err(format!("probabilities sum to {fixed_sum}, expected 1"));
        }
        if unset.is_some() && remainder < -PROBABILITY_TOLERANCE {
            return Err(format!("probabilities sum to {fixed_sum}, exceeding 1"));
        }
        let resolved: Vec<f64> = probabilities
            .iter()
            .map(|probability| probability.unwrap_or_else(|| remainder.max(0.0)))
            .collect();
        let mut cumulative = Vec::with_capacity(resolved.len());
        let mut running = 0.0;
        for value in &resolved {
            running += value;
            cumulative.push(running);
        }
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }
        Ok(Self {
            probabilities: resolved,
            cumulative,
        })
    }

    /// Returns the resolved probabilities.
    #[must_use]
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    /// Returns true when the selector has no entries (never after `new`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Returns the entry for a draw `r` in `[0, 1)`.
    #[must_use]
    pub fn index_for(&self, draw: f64) -> usize {
        let index = self.cumulative.partition_point(|bound| *bound <= draw);
        index.min(self.cumulative.len().saturating_sub(1))
    }

    /// Draws an entry index.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.index_for(rng.gen_range(0.0..1.0))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
