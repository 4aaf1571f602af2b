// simulator-core/src/pacing/mod.rs
// ============================================================================
// Module: Pacing Engine
// Description: Fixed-rate tick generators ("metronomes").
// Purpose: Release a benchmark thread at a target operations-per-second rate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Metronome`] blocks the calling thread until the next tick of an
//! absolute schedule `epoch + n * interval`. The epoch is captured on the
//! first call, so a slow iteration never shifts later ticks: the loop simply
//! catches up. Each call returns the scheduled instant of the released tick,
//! which lets callers measure latency from the intended start time.
//!
//! A non-positive interval produces an unthrottled [`EmptyMetronome`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::hint;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Metronome strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetronomeKind {
    /// Re-check the clock without yielding.
    BusySpin,
    /// Park until shortly before the tick, then spin.
    #[default]
    Sleeping,
    /// No throttling.
    None,
}

impl FromStr for MetronomeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "busy_spin" => Ok(Self::BusySpin),
            "sleeping" => Ok(Self::Sleeping),
            "none" => Ok(Self::None),
            other => Err(format!("unknown metronome `{other}`")),
        }
    }
}

impl fmt::Display for MetronomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusySpin => "busy_spin",
            Self::Sleeping => "sleeping",
            Self::None => "none",
        };
        f.write_str(label)
    }
}

/// Construction parameters for a metronome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetronomeSettings {
    /// Tick interval in nanoseconds; `<= 0` disables throttling.
    pub interval_nanos: i64,
    /// Strategy.
    pub kind: MetronomeKind,
    /// Release the first call immediately instead of waiting for tick 1.
    pub start_immediately: bool,
    /// Busy-spin window used by the sleeping strategy.
    pub spin_threshold: Duration,
}

impl MetronomeSettings {
    /// Settings for a target rate in operations per second; a non-positive
    /// or non-finite rate disables throttling.
    #[must_use]
    pub fn for_rate(rate_per_second: f64, kind: MetronomeKind, spin_threshold: Duration) -> Self {
        let nanos = (1_000_000_000.0 / rate_per_second).round();
        #[allow(clippy::cast_possible_truncation, reason = "Range checked before the cast.")]
        let interval_nanos = if rate_per_second.is_finite() && (1.0..9.0e18).contains(&nanos) {
            nanos as i64
        } else {
            0
        };
        Self {
            interval_nanos,
            kind,
            start_immediately: false,
            spin_threshold,
        }
    }
}

/// Builds the metronome described by `settings`.
#[must_use]
pub fn build_metronome(settings: MetronomeSettings) -> Box<dyn Metronome> {
    let interval = match u64::try_from(settings.interval_nanos) {
        Ok(nanos) if nanos > 0 => Duration::from_nanos(nanos),
        _ => return Box::new(EmptyMetronome),
    };
    let schedule = TickSchedule::new(interval, settings.start_immediately);
    match settings.kind {
        MetronomeKind::None => Box::new(EmptyMetronome),
        MetronomeKind::BusySpin => Box::new(BusySpinMetronome {
            schedule,
        }),
        MetronomeKind::Sleeping => Box::new(SleepingMetronome {
            schedule,
            spin_threshold: settings.spin_threshold,
        }),
    }
}

// ============================================================================
// SECTION: Metronome Trait
// ============================================================================

/// Fixed-rate tick generator owned by one benchmark thread.
pub trait Metronome: Send {
    /// Blocks until the next tick and returns its scheduled instant.
    fn wait_for_next(&mut self) -> Instant;

    /// Returns the tick interval, `None` when unthrottled.
    fn interval(&self) -> Option<Duration>;
}

/// Absolute tick schedule shared by the throttling strategies.
#[derive(Debug, Clone, Copy)]
struct TickSchedule {
    /// Tick spacing.
    interval: Duration,
    /// Release tick 0 immediately.
    start_immediately: bool,
    /// Instant of tick 0, captured on first use.
    epoch: Option<Instant>,
    /// Index of the last released tick.
    tick: u64,
}

impl TickSchedule {
    /// Creates a schedule that starts on first use.
    const fn new(interval: Duration, start_immediately: bool) -> Self {
        Self {
            interval,
            start_immediately,
            epoch: None,
            tick: 0,
        }
    }

    /// Advances to the next tick and returns its scheduled instant.
    fn advance(&mut self) -> Instant {
        let epoch = match self.epoch {
            Some(epoch) => {
                self.tick = self.tick.saturating_add(1);
                epoch
            }
            None => {
                let epoch = Instant::now();
                self.epoch = Some(epoch);
                self.tick = u64::from(!self.start_immediately);
                epoch
            }
        };
        let interval_nanos = u64::try_from(self.interval.as_nanos()).unwrap_or(u64::MAX);
        epoch + Duration::from_nanos(interval_nanos.saturating_mul(self.tick))
    }
}

// ============================================================================
// SECTION: Strategies
// ============================================================================

/// Pass-through metronome for unbounded rate.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyMetronome;

impl Metronome for EmptyMetronome {
    fn wait_for_next(&mut self) -> Instant {
        Instant::now()
    }

    fn interval(&self) -> Option<Duration> {
        None
    }
}

/// Metronome that spins on the clock until the tick.
#[derive(Debug)]
pub struct BusySpinMetronome {
    /// Tick schedule.
    schedule: TickSchedule,
}

impl Metronome for BusySpinMetronome {
    fn wait_for_next(&mut self) -> Instant {
        let scheduled = self.schedule.advance();
        while Instant::now() < scheduled {
            hint::spin_loop();
        }
        scheduled
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.schedule.interval)
    }
}

/// Metronome that sleeps until `spin_threshold` before the tick, then spins.
#[derive(Debug)]
pub struct SleepingMetronome {
    /// Tick schedule.
    schedule: TickSchedule,
    /// Busy-spin window before the tick.
    spin_threshold: Duration,
}

impl Metronome for SleepingMetronome {
    fn wait_for_next(&mut self) -> Instant {
        let scheduled = self.schedule.advance();
        let now = Instant::now();
        if let Some(remaining) = scheduled.checked_duration_since(now)
            && remaining > self.spin_threshold
        {
            thread::sleep(remaining - self.spin_threshold);
        }
        while Instant::now() < scheduled {
            hint::spin_loop();
        }
        scheduled
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.schedule.interval)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use std::time::Instant;

    use super::TickSchedule;

    #[test]
    fn schedule_is_absolute_from_first_use() {
        let mut schedule = TickSchedule::new(Duration::from_millis(5), false);
        let first = schedule.advance();
        let epoch = schedule.epoch.unwrap_or_else(Instant::now);
        assert_eq!(first, epoch + Duration::from_millis(5));
        let second = schedule.advance();
        assert_eq!(second, epoch + Duration::from_millis(10));
    }

    #[test]
    fn start_immediately_releases_tick_zero() {
        let mut schedule = TickSchedule::new(Duration::from_millis(5), true);
        let first = schedule.advance();
        assert_eq!(Some(first), schedule.epoch);
    }
}
