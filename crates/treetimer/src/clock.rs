//! Underlying clock sources.
//!
//! A source is chosen from a closed set before initialization. Each variant
//! has an init step that may fail; [`Clock::now`] returns seconds as `f64`.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimerError};
use crate::tsc;

/// Selectable clock sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClockSource {
    /// Wall clock with microsecond resolution.
    #[default]
    GetTimeOfDay,
    /// Hardware cycle counter scaled by a ratio measured at init.
    Nanotime,
    /// Monotonic system clock.
    ClockGettime,
    /// Always returns zero. Used to estimate instrumentation overhead.
    Placebo,
}

impl ClockSource {
    /// Every variant, in fallback order.
    pub const ALL: [Self; 4] = [
        Self::GetTimeOfDay,
        Self::Nanotime,
        Self::ClockGettime,
        Self::Placebo,
    ];

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetTimeOfDay => "gettimeofday",
            Self::Nanotime => "nanotime",
            Self::ClockGettime => "clock_gettime",
            Self::Placebo => "placebo",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    WallClock { ref_secs: u64 },
    Cycles { sec_per_tick: f64 },
    Monotonic { origin: Instant },
    Placebo,
}

/// An initialized clock source.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    source: ClockSource,
    state: State,
}

impl Clock {
    /// Run the init step of `source`.
    pub fn init(source: ClockSource) -> Result<Self> {
        let state = match source {
            ClockSource::GetTimeOfDay => {
                let since = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| TimerError::Clock(source.name()))?;
                State::WallClock {
                    ref_secs: since.as_secs(),
                }
            }
            ClockSource::Nanotime => {
                let sec_per_tick =
                    tsc::seconds_per_tick().ok_or(TimerError::Clock(source.name()))?;
                tracing::debug!(mhz = 1.0e-6 / sec_per_tick, "cycle counter calibrated");
                State::Cycles { sec_per_tick }
            }
            ClockSource::ClockGettime => State::Monotonic {
                origin: Instant::now(),
            },
            ClockSource::Placebo => State::Placebo,
        };
        Ok(Self { source, state })
    }

    /// The variant backing this clock.
    #[must_use]
    pub const fn source(&self) -> ClockSource {
        self.source
    }

    /// Current timestamp in seconds.
    #[inline]
    #[must_use]
    pub fn now(&self) -> f64 {
        match self.state {
            State::WallClock { ref_secs } => {
                let since = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let secs = since.as_secs().wrapping_sub(ref_secs) as f64;
                secs + f64::from(since.subsec_micros()) * 1.0e-6
            }
            State::Cycles { sec_per_tick } => tsc::read() as f64 * sec_per_tick,
            State::Monotonic { origin } => origin.elapsed().as_secs_f64(),
            State::Placebo => 0.0,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            source: ClockSource::Placebo,
            state: State::Placebo,
        }
    }
}
