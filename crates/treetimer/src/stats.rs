//! Per-timer statistics and their merge rules.

use serde::{Deserialize, Serialize};

use crate::cpu::CpuSample;
use crate::options::MAX_CHARS;

/// Number of words in the auxiliary counter slot.
pub const MAX_AUX: usize = 9;

/// Inclusive wall-clock statistics, in seconds.
///
/// A negative elapsed interval turns `accum` into NaN. The NaN survives every
/// later record and merge until the timer is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WallStats {
    pub accum: f64,
    pub max: f64,
    pub min: f64,
    pub latest: f64,
    pub negcount: u32,
}

impl WallStats {
    /// Record one elapsed interval. `first` is true for the first completed
    /// interval since creation or reset. Returns false for a negative interval.
    pub fn record(&mut self, elapsed: f64, first: bool) -> bool {
        self.latest = elapsed;
        if elapsed < 0.0 {
            self.negcount += 1;
            self.accum = f64::NAN;
            return false;
        }
        self.accum += elapsed;
        if first {
            self.max = elapsed;
            self.min = elapsed;
        } else {
            self.max = self.max.max(elapsed);
            self.min = self.min.min(elapsed);
        }
        true
    }

    /// False once a negative interval has been recorded or merged in.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.accum.is_nan()
    }
}

/// Accumulated CPU time, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    pub accum_utime: i64,
    pub accum_stime: i64,
}

impl CpuStats {
    /// Add the CPU time spent between two samples.
    pub fn record(&mut self, start: CpuSample, end: CpuSample) {
        self.accum_utime += end.utime - start.utime;
        self.accum_stime += end.stime - start.stime;
    }

    /// User and system seconds.
    #[must_use]
    pub fn seconds(&self, ticks_per_sec: i64) -> (f64, f64) {
        if ticks_per_sec <= 0 {
            return (0.0, 0.0);
        }
        let tps = ticks_per_sec as f64;
        (self.accum_utime as f64 / tps, self.accum_stime as f64 / tps)
    }
}

/// Opaque payload owned by the hardware-counter collaborator.
///
/// The timing core never reads these words; it only stores them and passes
/// them back to the collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxSlot(pub [i64; MAX_AUX]);

/// Everything accumulated for one region on one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub count: u64,
    pub wall: WallStats,
    pub cpu: CpuStats,
}

impl RegionStats {
    /// Completed intervals that were not negative, the ones behind `max` and
    /// `min`.
    #[must_use]
    pub fn timed(&self) -> u64 {
        self.count.saturating_sub(u64::from(self.wall.negcount))
    }

    /// Combine with the stats of the same region from another thread or timer.
    ///
    /// Sums accumulate; extremes take the extreme of both sides, ignoring a
    /// side with no timed intervals.
    pub fn merge(&mut self, other: &Self) {
        if other.timed() > 0 {
            if self.timed() == 0 {
                self.wall.max = other.wall.max;
                self.wall.min = other.wall.min;
                self.wall.latest = other.wall.latest;
            } else {
                self.wall.max = self.wall.max.max(other.wall.max);
                self.wall.min = self.wall.min.min(other.wall.min);
            }
        }
        // NaN + x stays NaN, so invalidity from either side carries over.
        self.wall.accum += other.wall.accum;
        self.wall.negcount += other.wall.negcount;
        self.count += other.count;
        self.cpu.accum_utime += other.cpu.accum_utime;
        self.cpu.accum_stime += other.cpu.accum_stime;
    }

    /// Mean wall time per call, or zero when nothing completed.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.wall.accum / self.count as f64
        }
    }
}

/// Truncate a region name to [`MAX_CHARS`] bytes on a char boundary.
#[must_use]
pub fn bounded(name: &str) -> &str {
    if name.len() <= MAX_CHARS {
        return name;
    }
    let mut end = MAX_CHARS;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
