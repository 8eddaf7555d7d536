//! Tick pacing: how much guest time passes between two host ticks.
//!
//! The scheduler keeps a `last_time` mark in divided time units. Each tick
//! derives a new mark from the pacing source, hands the difference to the
//! engine as `elapsed_us`, and advances `last_time` by exactly that amount,
//! so `last_time` never moves backwards.

use std::time::Instant;

use crate::state::CpuState;

/// Default number of instructions per engine call.
pub const DEFAULT_INSTRUCTIONS_PER_TICK: u32 = 2048;
/// Default divisor applied to the pacing source.
pub const DEFAULT_TIME_DIVISOR: u32 = 1;

/// Source of the per-tick time mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Pacing {
    /// Guest time follows the retired-cycle counter, one cycle per
    /// microsecond. Deterministic across hosts.
    #[default]
    CycleCounter,
    /// Guest time follows a host monotonic clock in microseconds.
    WallClock,
}

/// Host microsecond clock used by [`Pacing::WallClock`].
pub trait TimeSource {
    /// Microseconds since an arbitrary fixed origin. Must not decrease.
    fn now_micros(&mut self) -> u64;
}

/// [`TimeSource`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Starts a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for MonotonicClock {
    fn now_micros(&mut self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Per-VM pacing state.
///
/// Under [`Pacing::WallClock`] the mark is measured from a host anchor taken
/// whenever the mark is rewound or restored, so a restored or rebooted VM
/// never inherits the host clock's own origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerClock {
    pacing: Pacing,
    time_divisor: u32,
    last_time: u64,
    anchor_mark: u64,
    anchor_host: u64,
}

impl SchedulerClock {
    /// Creates a clock with `last_time` at zero. A zero divisor is treated
    /// as one.
    #[must_use]
    pub const fn new(pacing: Pacing, time_divisor: u32) -> Self {
        Self {
            pacing,
            time_divisor: if time_divisor == 0 { 1 } else { time_divisor },
            last_time: 0,
            anchor_mark: 0,
            anchor_host: 0,
        }
    }

    /// Active pacing source.
    #[must_use]
    pub const fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Divisor applied to the pacing source.
    #[must_use]
    pub const fn time_divisor(&self) -> u32 {
        self.time_divisor
    }

    /// Mark reached by the previous tick.
    #[must_use]
    pub const fn last_time(&self) -> u64 {
        self.last_time
    }

    /// Restores a saved mark. Wall-clock pacing continues from `last_time`
    /// as of the current host time.
    pub fn set_last_time(&mut self, last_time: u64, source: &mut dyn TimeSource) {
        self.last_time = last_time;
        self.anchor_mark = last_time;
        if self.pacing == Pacing::WallClock {
            self.anchor_host = source.now_micros();
        }
    }

    /// Rewinds the mark to zero.
    pub fn reset(&mut self, source: &mut dyn TimeSource) {
        self.set_last_time(0, source);
    }

    /// Computes the time that passed since the previous tick and advances
    /// the mark by the same amount. Gaps longer than `u32::MAX` are handed
    /// out over several ticks.
    pub fn advance(&mut self, cpu: &CpuState, source: &mut dyn TimeSource) -> u32 {
        let divisor = u64::from(self.time_divisor);
        let mark = match self.pacing {
            Pacing::CycleCounter => cpu.cycle() / divisor,
            Pacing::WallClock => {
                let since_anchor = source.now_micros().saturating_sub(self.anchor_host);
                self.anchor_mark.saturating_add(since_anchor / divisor)
            }
        };
        let elapsed = u32::try_from(mark.saturating_sub(self.last_time)).unwrap_or(u32::MAX);
        self.last_time += u64::from(elapsed);
        elapsed
    }
}
