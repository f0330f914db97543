//! Tick-driven scheduling primitive for hooks
//!
//! A [`TimeStep`] describes "fire every `interval` units of `scale`, for up
//! to `live_time` times". The template half is immutable; the local half
//! (`local_interval`, `local_live_time`) is a per-owner countdown advanced
//! by [`TimeStep::tick`]. Iteration and Epoch scales tick once per loop
//! completion; lifecycle scales tick once per transition.

use serde::{Deserialize, Serialize};

/// Fires indefinitely
pub const LIVE_TIME_UNBOUNDED: i64 = -1;

/// The unit of training time a hook is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeScale {
    /// One training iteration of one worker (or the global iteration event)
    Iteration,
    /// One full pass over the epoch's data stream
    Epoch,
    /// Lifecycle: training started
    Start,
    /// Lifecycle: training paused
    Pause,
    /// Lifecycle: training resumed
    Resume,
    /// Lifecycle: training stopped
    Stop,
    /// Lifecycle: operator reset to its initial state
    Reset,
}

impl TimeScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeScale::Iteration => "Iteration",
            TimeScale::Epoch => "Epoch",
            TimeScale::Start => "Start",
            TimeScale::Pause => "Pause",
            TimeScale::Resume => "Resume",
            TimeScale::Stop => "Stop",
            TimeScale::Reset => "Reset",
        }
    }

    /// All scales, in declaration order
    pub fn all() -> [TimeScale; 7] {
        [
            TimeScale::Iteration,
            TimeScale::Epoch,
            TimeScale::Start,
            TimeScale::Pause,
            TimeScale::Resume,
            TimeScale::Stop,
            TimeScale::Reset,
        ]
    }
}

impl std::fmt::Display for TimeScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When and how often a hook fires
///
/// Invariant between ticks: `1 <= local_interval <= interval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStep {
    scale: TimeScale,
    interval: u32,
    live_time: i64,
    local_interval: u32,
    local_live_time: i64,
}

impl TimeStep {
    /// Fire every `interval` ticks of `scale`, indefinitely
    pub fn every(interval: u32, scale: TimeScale) -> Self {
        Self::limited(interval, scale, LIVE_TIME_UNBOUNDED)
    }

    /// Fire every `interval` ticks of `scale`, at most `live_time` times
    ///
    /// `live_time == -1` means unbounded; `interval` is clamped to >= 1.
    pub fn limited(interval: u32, scale: TimeScale, live_time: i64) -> Self {
        let interval = interval.max(1);
        let live_time = live_time.max(LIVE_TIME_UNBOUNDED);
        Self {
            scale,
            interval,
            live_time,
            local_interval: interval,
            local_live_time: live_time,
        }
    }

    pub fn scale(&self) -> TimeScale {
        self.scale
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn live_time(&self) -> i64 {
        self.live_time
    }

    pub fn local_interval(&self) -> u32 {
        self.local_interval
    }

    pub fn local_live_time(&self) -> i64 {
        self.local_live_time
    }

    /// Independent copy with the local countdown reset from the template
    pub fn deep_copy(&self) -> Self {
        Self {
            scale: self.scale,
            interval: self.interval,
            live_time: self.live_time,
            local_interval: self.interval,
            local_live_time: self.live_time,
        }
    }

    /// Advance the local countdown by one tick of this step's scale
    ///
    /// Returns `true` when the step fires: the local interval reached zero,
    /// was reset to the template interval, and the remaining live time was
    /// decremented (unless unbounded). A dead step never fires.
    pub fn tick(&mut self) -> bool {
        if self.is_dead() {
            return false;
        }
        self.local_interval -= 1;
        if self.local_interval > 0 {
            return false;
        }
        self.local_interval = self.interval;
        if self.local_live_time > 0 {
            self.local_live_time -= 1;
        }
        true
    }

    /// Out of remaining fires
    pub fn is_dead(&self) -> bool {
        self.local_live_time == 0
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The local interval stays within [1, interval] between ticks
        #[test]
        fn prop_local_interval_in_range(
            interval in 1u32..32,
            ticks in 0usize..200,
        ) {
            let mut step = TimeStep::every(interval, TimeScale::Iteration);
            for _ in 0..ticks {
                step.tick();
                prop_assert!(step.local_interval() >= 1);
                prop_assert!(step.local_interval() <= interval);
            }
        }

        /// A step with live_time L fires exactly L times
        #[test]
        fn prop_bounded_step_fires_live_time_times(
            interval in 1u32..8,
            live in 0i64..16,
        ) {
            let mut step = TimeStep::limited(interval, TimeScale::Iteration, live);
            let mut fired = 0u64;
            for _ in 0..(interval as u64 * 20 + 20) {
                if step.tick() {
                    fired += 1;
                }
            }
            prop_assert_eq!(fired, live as u64);
            prop_assert!(step.is_dead());
        }

        /// Fires land exactly on multiples of the interval
        #[test]
        fn prop_fire_cadence(interval in 1u32..16) {
            let mut step = TimeStep::every(interval, TimeScale::Epoch);
            for tick in 1u32..=interval * 5 {
                let fired = step.tick();
                prop_assert_eq!(fired, tick % interval == 0);
            }
        }
    }
}
